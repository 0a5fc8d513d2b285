// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration and its storage port.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::constants::DEFAULT_ACTOR_ID;
use crate::ident::ActorId;

/// Key engine configuration is stored under.
pub const ENGINE_CONFIG_KEY: &str = "weft.engine";

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Thin service that serializes config values and delegates storage to a `ConfigStore`.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads [`EngineConfig`] from [`ENGINE_CONFIG_KEY`], falling back to defaults.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(self.load(ENGINE_CONFIG_KEY)?.unwrap_or_default())
    }
}

/// Tunables shared by the normalizer and executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Write `null` for required fields missing from a response instead of
    /// warning and skipping them.
    pub treat_missing_fields_as_null: bool,
    /// Traverse client-component fragments.
    pub process_client_components: bool,
    /// Report conflicting values for one id within a pass.
    pub warn_on_conflicts: bool,
    /// Actor used for executions that do not name one.
    pub actor_identifier: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            treat_missing_fields_as_null: false,
            process_client_components: true,
            warn_on_conflicts: true,
            actor_identifier: DEFAULT_ACTOR_ID.to_owned(),
        }
    }
}

impl EngineConfig {
    /// Default actor as an [`ActorId`].
    #[must_use]
    pub fn actor(&self) -> ActorId {
        ActorId::new(self.actor_identifier.clone())
    }
}
