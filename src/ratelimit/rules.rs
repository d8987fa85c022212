//! Named feature rules and dynamic limit configuration.
//!
//! A feature rule is an on/off toggle plus the limit parameters to apply
//! when it is on. Rules are looked up per request through the
//! [`ConfigProvider`] trait, so the lookup can be backed by a static map,
//! a configuration file, or an operator-facing settings service without
//! the core limiter knowing the difference.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FloodgateError, Result};

use super::key::KeyParam;
use super::limiter::{Algorithm, LimitSpec, TimeUnit, DEFAULT_MESSAGE};

/// A dynamic rate limit rule for one named feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRule {
    /// Whether the limit is enforced at all
    #[serde(default = "default_active")]
    pub active: bool,
    /// Maximum requests allowed within one window
    pub max_count: u64,
    /// Window granularity
    pub unit: TimeUnit,
    /// Strategy used to count requests
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Optional denial message override
    #[serde(default)]
    pub message: Option<String>,
    /// Request attributes the key is built from
    #[serde(default = "default_params")]
    pub params: Vec<KeyParam>,
}

fn default_active() -> bool {
    true
}

fn default_params() -> Vec<KeyParam> {
    vec![KeyParam::Path, KeyParam::AuthenticatedUser]
}

impl FeatureRule {
    /// Derive the concrete limit spec this rule configures.
    pub fn to_spec(&self) -> LimitSpec {
        LimitSpec {
            max_count: self.max_count,
            unit: self.unit,
            algorithm: self.algorithm,
            message: self
                .message
                .clone()
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            params: self.params.clone(),
        }
    }
}

/// A complete set of named feature rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Map of feature name to rule
    #[serde(default)]
    pub features: HashMap<String, FeatureRule>,
}

impl RulesConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string, rejecting invalid active rules so
    /// misconfiguration surfaces at startup.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RulesConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rules: {}", e)))?;

        for (name, rule) in &config.features {
            if rule.active {
                rule.to_spec().validate().map_err(|e| {
                    FloodgateError::Config(format!("Invalid rule for feature '{}': {}", name, e))
                })?;
            }
        }

        Ok(config)
    }

    /// Get the rule for a feature, if one is defined.
    pub fn get(&self, feature: &str) -> Option<&FeatureRule> {
        self.features.get(feature)
    }
}

/// Per-feature rule lookup.
///
/// Consulted on every request so a backing settings store can flip
/// features or retune limits without a restart.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Get the current rule for a feature, or `None` when the feature has
    /// no rate limit configured.
    async fn feature_rule(&self, feature: &str) -> Option<FeatureRule>;
}

/// In-memory [`ConfigProvider`] over a mutable rule map.
///
/// Serves file-loaded rules in the service binary and acts as the test
/// double everywhere else.
#[derive(Default)]
pub struct StaticConfigProvider {
    rules: RwLock<HashMap<String, FeatureRule>>,
}

impl StaticConfigProvider {
    /// Create a provider with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider serving the rules from `config`.
    pub fn from_config(config: RulesConfig) -> Self {
        Self {
            rules: RwLock::new(config.features),
        }
    }

    /// Insert or replace the rule for a feature.
    pub fn set_rule(&self, feature: impl Into<String>, rule: FeatureRule) {
        self.rules.write().insert(feature.into(), rule);
    }

    /// Remove the rule for a feature.
    pub fn remove_rule(&self, feature: &str) {
        self.rules.write().remove(feature);
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn feature_rule(&self, feature: &str) -> Option<FeatureRule> {
        self.rules.read().get(feature).cloned()
    }
}
