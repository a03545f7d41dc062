use crate::storage::{
    KeyValueStore, MemoryStore, REMOTE_CONFIG_KEY, REMOTE_SECRET_KEY, StorageError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Toml(String),
    #[error("invalid settings payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Toml(value.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        ConfigError::Toml(value.to_string())
    }
}

/// Remote store settings. The secret is deliberately not a field here; it
/// travels through [`ConfigStore`] separately so it never lands in the
/// serialized settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub remember: bool,
}

impl RemoteConfig {
    /// An empty base URL means the remote tier is disabled.
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    pub fn apply_external(&mut self, external: &ExternalConfig) {
        if let Some(url) = &external.url {
            self.base_url = url.trim().to_string();
        }
        if let Some(user) = &external.user {
            self.username = user.trim().to_string();
        }
        if let Some(folder) = &external.folder {
            self.folder = folder.trim().to_string();
        }
        if let Some(remember) = external.remember {
            self.remember = remember;
        }
    }
}

/// Settings payload accepted from outside the process, e.g. a provisioning
/// file. Only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub folder: Option<String>,
    #[serde(alias = "rememberUser")]
    pub remember: Option<bool>,
    pub pass: Option<String>,
}

impl ExternalConfig {
    pub fn parse(payload: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Persistence layer for [`RemoteConfig`] and its secret. Non-secret fields
/// live in durable storage; the secret lives in the session slot and is
/// duplicated into durable storage only while `remember` is on.
pub struct ConfigStore {
    durable: Arc<dyn KeyValueStore>,
    session: MemoryStore,
}

impl ConfigStore {
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            session: MemoryStore::new(),
        }
    }

    /// Reads the persisted settings. Storage or parse failures degrade to
    /// `None` so a damaged settings file never blocks boot.
    pub fn load(&self) -> Option<RemoteConfig> {
        let raw = match self.durable.get(REMOTE_CONFIG_KEY) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    target: "tidemark::config",
                    error = %err,
                    "failed to read remote settings"
                );
                return None;
            }
        };
        match toml::from_str(&raw) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(
                    target: "tidemark::config",
                    error = %err,
                    "persisted remote settings are unreadable, ignoring"
                );
                None
            }
        }
    }

    /// Writes the settings and routes the secret. An empty secret clears both
    /// secret slots; `remember` turned off purges any durable copy.
    pub fn save(
        &self,
        config: &RemoteConfig,
        persist_secret: bool,
        secret: &str,
    ) -> Result<(), ConfigError> {
        self.save_config(config)?;
        self.store_secret(config, persist_secret, secret)
    }

    /// Writes the non-secret settings only; both secret slots keep whatever
    /// they hold.
    pub fn save_config(&self, config: &RemoteConfig) -> Result<(), ConfigError> {
        let serialized = toml::to_string_pretty(config)?;
        self.durable.put(REMOTE_CONFIG_KEY, &serialized)?;
        Ok(())
    }

    fn store_secret(
        &self,
        config: &RemoteConfig,
        persist_secret: bool,
        secret: &str,
    ) -> Result<(), ConfigError> {
        if secret.is_empty() {
            self.session.remove(REMOTE_SECRET_KEY)?;
            self.durable.remove(REMOTE_SECRET_KEY)?;
            return Ok(());
        }
        self.session.put(REMOTE_SECRET_KEY, secret)?;
        if persist_secret && config.remember {
            self.durable.put(REMOTE_SECRET_KEY, secret)?;
        } else if !config.remember {
            self.durable.remove(REMOTE_SECRET_KEY)?;
        }
        Ok(())
    }

    /// Places a secret in the session slot without touching durable storage.
    pub fn stash_secret(&self, secret: &str) -> Result<(), ConfigError> {
        if secret.is_empty() {
            self.session.remove(REMOTE_SECRET_KEY)?;
        } else {
            self.session.put(REMOTE_SECRET_KEY, secret)?;
        }
        Ok(())
    }

    /// Resolves the secret from the first source that has one: session slot,
    /// then durable storage.
    pub fn current_secret(&self) -> Option<String> {
        let sources: [&dyn KeyValueStore; 2] = [&self.session, self.durable.as_ref()];
        sources.iter().find_map(|store| self.read_secret(*store))
    }

    fn read_secret(&self, store: &dyn KeyValueStore) -> Option<String> {
        match store.get(REMOTE_SECRET_KEY) {
            Ok(value) => value.filter(|secret| !secret.is_empty()),
            Err(err) => {
                warn!(
                    target: "tidemark::config",
                    error = %err,
                    "failed to read remote secret"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_pair() -> (Arc<MemoryStore>, ConfigStore) {
        let durable = Arc::new(MemoryStore::new());
        let store = ConfigStore::new(durable.clone());
        (durable, store)
    }

    fn sample_config(remember: bool) -> RemoteConfig {
        RemoteConfig {
            base_url: "https://example.com/dav".to_string(),
            username: "anna".to_string(),
            folder: "notes".to_string(),
            remember,
        }
    }

    #[test]
    fn load_returns_none_when_nothing_saved() {
        let (_, store) = store_pair();
        assert!(store.load().is_none());
    }

    #[test]
    fn load_degrades_to_none_on_malformed_settings() {
        let (durable, store) = store_pair();
        durable.put(REMOTE_CONFIG_KEY, "not = [valid").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_, store) = store_pair();
        let config = sample_config(true);
        store.save(&config, false, "").unwrap();
        assert_eq!(store.load(), Some(config));
    }

    #[test]
    fn settings_file_never_contains_the_secret() {
        let (durable, store) = store_pair();
        store.save(&sample_config(true), true, "hunter2").unwrap();
        let raw = durable.get(REMOTE_CONFIG_KEY).unwrap().unwrap();
        assert!(!raw.contains("hunter2"));
    }

    #[test]
    fn secret_prefers_session_copy() {
        let (durable, store) = store_pair();
        durable.put(REMOTE_SECRET_KEY, "stale").unwrap();
        store.stash_secret("fresh").unwrap();
        assert_eq!(store.current_secret().as_deref(), Some("fresh"));
    }

    #[test]
    fn secret_falls_back_to_durable_copy() {
        let (durable, store) = store_pair();
        durable.put(REMOTE_SECRET_KEY, "remembered").unwrap();
        assert_eq!(store.current_secret().as_deref(), Some("remembered"));
    }

    #[test]
    fn remember_with_persist_writes_durable_secret() {
        let (durable, store) = store_pair();
        store.save(&sample_config(true), true, "hunter2").unwrap();
        assert_eq!(
            durable.get(REMOTE_SECRET_KEY).unwrap().as_deref(),
            Some("hunter2")
        );
        assert_eq!(store.current_secret().as_deref(), Some("hunter2"));
    }

    #[test]
    fn turning_remember_off_purges_durable_secret() {
        let (durable, store) = store_pair();
        store.save(&sample_config(true), true, "hunter2").unwrap();
        store.save(&sample_config(false), false, "hunter2").unwrap();
        assert!(durable.get(REMOTE_SECRET_KEY).unwrap().is_none());
        assert_eq!(store.current_secret().as_deref(), Some("hunter2"));
    }

    #[test]
    fn save_config_leaves_secret_slots_alone() {
        let (durable, store) = store_pair();
        store.save(&sample_config(true), true, "hunter2").unwrap();
        store.save_config(&sample_config(false)).unwrap();
        assert_eq!(
            durable.get(REMOTE_SECRET_KEY).unwrap().as_deref(),
            Some("hunter2")
        );
        assert_eq!(store.load(), Some(sample_config(false)));
    }

    #[test]
    fn empty_secret_clears_both_slots() {
        let (durable, store) = store_pair();
        store.save(&sample_config(true), true, "hunter2").unwrap();
        store.save(&sample_config(true), true, "").unwrap();
        assert!(durable.get(REMOTE_SECRET_KEY).unwrap().is_none());
        assert!(store.current_secret().is_none());
    }

    #[test]
    fn external_payload_accepts_remember_user_alias() {
        let external =
            ExternalConfig::parse(r#"{"url":"https://dav.example.com","rememberUser":true}"#)
                .unwrap();
        assert_eq!(external.url.as_deref(), Some("https://dav.example.com"));
        assert_eq!(external.remember, Some(true));
        assert!(external.pass.is_none());
    }

    #[test]
    fn apply_external_touches_only_present_fields() {
        let mut config = sample_config(true);
        let external = ExternalConfig::parse(r#"{"user":"bo","folder":"journal"}"#).unwrap();
        config.apply_external(&external);
        assert_eq!(config.username, "bo");
        assert_eq!(config.folder, "journal");
        assert_eq!(config.base_url, "https://example.com/dav");
        assert!(config.remember);
    }

    #[test]
    fn rejects_malformed_external_payload() {
        assert!(ExternalConfig::parse("{not json").is_err());
    }
}
