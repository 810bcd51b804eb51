use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Builder;
use crate::error::{Result, StoreError};
use crate::graph::StoreGraph;

pub const CONFIG_FILE_ENV: &str = "PARAM_STORE_CONFIG_FILE";
pub const CONFIG_OVERRIDE_ENV: &str = "PARAM_STORE_CONFIG_OVERRIDE";

const DEFAULT_STORE_CAPACITY: usize = 128;

/// Runtime switches for a [`StoreGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Gate for [`StoreGraph::dump`].
    pub dump_enabled: bool,
    /// Verify every binding before it propagates during a tick.
    pub verify_on_tick: bool,
    /// Initial arena capacity.
    pub store_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dump_enabled: false,
            verify_on_tick: false,
            store_capacity: DEFAULT_STORE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Replace a single top-level field with a JSON value.
    pub fn apply_override(&mut self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut doc = serde_json::to_value(&*self)?;
        let fields = doc
            .as_object_mut()
            .ok_or_else(|| StoreError::Config("config is not a JSON object".to_string()))?;
        if !fields.contains_key(key) {
            return Err(StoreError::Config(format!("unknown config key '{}'", key)));
        }
        fields.insert(key.to_string(), value);
        *self = serde_json::from_value(doc).map_err(|e| {
            StoreError::Config(format!("invalid value for config key '{}': {}", key, e))
        })?;
        Ok(())
    }
}

/// Parse `key1=value1;key2=value2` with JSON values.
fn parse_overrides(overrides: &str) -> Result<Vec<(String, serde_json::Value)>> {
    let mut parsed = Vec::new();
    for pair in overrides.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let Some((key, value)) = pair.split_once('=') else {
            return Err(StoreError::Config(format!(
                "Invalid {} format: '{}'. Expected 'key=value'",
                CONFIG_OVERRIDE_ENV, pair
            )));
        };
        let key = key.trim();
        let value = value.trim();
        let json_value = serde_json::from_str::<serde_json::Value>(value).map_err(|e| {
            StoreError::Config(format!(
                "Failed to parse {} value for key '{}': {} (value: {})",
                CONFIG_OVERRIDE_ENV, key, e, value
            ))
        })?;
        tracing::debug!("Override: {} = {}", key, json_value);
        parsed.push((key.to_string(), json_value));
    }
    Ok(parsed)
}

/// Builds a [`StoreGraph`] from layered configuration.
///
/// Priority: explicit config, config file, `PARAM_STORE_CONFIG_FILE`, defaults.
/// `PARAM_STORE_CONFIG_OVERRIDE` is applied on top, then builder overrides.
#[derive(Debug, Default)]
pub struct StoreGraphBuilder {
    config: Option<StoreConfig>,
    config_file: Option<PathBuf>,
    config_overrides: Vec<(String, serde_json::Value)>,
    invalid_override: Option<String>,
}

impl StoreGraphBuilder {
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a JSON file
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Add a JSON configuration override
    pub fn with_json<K: Into<String>, V: Serialize>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        match serde_json::to_value(&value) {
            Ok(value) => self.config_overrides.push((key, value)),
            Err(e) => self.invalid_override = Some(format!("{}: {}", key, e)),
        }
        self
    }

    pub fn with_dump(self, enabled: bool) -> Self {
        self.with_json("dump_enabled", enabled)
    }

    pub fn with_verify_on_tick(self, enabled: bool) -> Self {
        self.with_json("verify_on_tick", enabled)
    }

    pub fn with_store_capacity(self, capacity: usize) -> Self {
        self.with_json("store_capacity", capacity)
    }

    /// Resolve the final configuration without building a graph.
    pub fn resolve_config(&self) -> Result<StoreConfig> {
        if let Some(e) = &self.invalid_override {
            return Err(StoreError::Config(format!(
                "Failed to serialize override {}",
                e
            )));
        }

        let mut config = if let Some(config) = &self.config {
            config.clone()
        } else if let Some(path) = &self.config_file {
            StoreConfig::from_file(path)?
        } else if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            tracing::debug!("Loading config from {}: {}", CONFIG_FILE_ENV, path);
            StoreConfig::from_file(path)?
        } else {
            StoreConfig::default()
        };

        if let Ok(overrides) = std::env::var(CONFIG_OVERRIDE_ENV) {
            tracing::debug!(
                "Applying config overrides from {}: {}",
                CONFIG_OVERRIDE_ENV,
                overrides
            );
            for (key, value) in parse_overrides(&overrides)? {
                config.apply_override(&key, value)?;
            }
        }

        for (key, value) in &self.config_overrides {
            config.apply_override(key, value.clone())?;
        }

        Ok(config)
    }
}

impl Builder for StoreGraphBuilder {
    type Output = StoreGraph;

    #[tracing::instrument(name = "graph_build", skip(self))]
    fn build(self) -> Result<StoreGraph> {
        let config = self.resolve_config()?;
        tracing::debug!(?config, "building store graph");
        Ok(StoreGraph::with_config(config))
    }
}
