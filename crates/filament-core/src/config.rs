use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::BackendError;

/// Construction parameters handed to a backend constructor.
///
/// The configuration block is opaque to everything but the backend itself.
#[derive(Debug, Clone, Default)]
pub struct BackendParams {
    config: Value,
}

impl BackendParams {
    pub fn new(config: Value) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Whether a configuration block was provided at all.
    pub fn is_configured(&self) -> bool {
        !self.config.is_null()
    }

    /// Deserialize the configuration block into the backend's own config type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        if !self.is_configured() {
            return Err(BackendError::Config(
                "no configuration block for backend".to_string(),
            ));
        }
        serde_json::from_value(self.config.clone())
            .map_err(|e| BackendError::Config(e.to_string()))
    }
}

/// Mapping from backend id to its configuration block.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct BackendConfigs {
    blocks: HashMap<String, Value>,
}

impl BackendConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, id: impl Into<String>, config: Value) -> Self {
        self.insert(id, config);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, config: Value) {
        self.blocks.insert(id.into(), config);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// Parameters for the backend `id`; unconfigured backends get a null block.
    pub fn params_for(&self, id: &str) -> BackendParams {
        BackendParams::new(self.blocks.get(id).cloned().unwrap_or(Value::Null))
    }
}
