//! Session orchestration: one [`SyncCore`] per session owns the document
//! buffer, the live remote settings, and the three autosave workers (render,
//! local cache, remote store). UI glue holds a reference and calls the
//! explicit operations; everything debounced happens on the workers.

use crate::autosave::{AutosaveConfig, SaveTarget, TargetHandle, TargetStatus, spawn_target};
use crate::config::{ConfigError, ConfigStore, ExternalConfig, RemoteConfig};
use crate::editor::{
    DocumentBuffer, DocumentExport, EXPORT_FILENAME, RenderPipeline, RenderTarget,
    welcome_template,
};
use crate::notify::{DEFAULT_REVERT, Notifier, NullNotifier};
use crate::remote::{RemoteClient, RemoteError, remote_file_url, remote_folder_url};
use crate::share::{ShareClient, ShareError, ShareRequest};
use crate::storage::{DOCUMENT_KEY, KeyValueStore, StorageError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

const SAVED_REVERT: Duration = Duration::from_millis(1_500);
const LOADED_REVERT: Duration = Duration::from_millis(2_000);

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no credentials for the remote store")]
    CredentialsMissing,
    #[error("document is empty")]
    EmptyDocument,
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("settings error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("share error: {0}")]
    Share(#[from] ShareError),
}

/// Everything a session needs at boot. `store` is the durable tier holding
/// both the cached document and the persisted settings.
pub struct BootOptions {
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub pipeline: RenderPipeline,
    pub autosave: AutosaveConfig,
}

impl BootOptions {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(NullNotifier),
            pipeline: RenderPipeline::disabled(),
            autosave: AutosaveConfig::default(),
        }
    }
}

/// Live remote coordinates shared between explicit operations and the remote
/// autosave worker. The filename tracks the last explicit remote save or
/// load, so autosave follows the document the user is actually working on.
struct RemoteState {
    config: Mutex<RemoteConfig>,
    filename: Mutex<String>,
}

pub struct SyncCore {
    buffer: Arc<DocumentBuffer>,
    store: Arc<dyn KeyValueStore>,
    settings: Arc<ConfigStore>,
    remote: Arc<RemoteState>,
    notifier: Arc<dyn Notifier>,
    local_save: TargetHandle,
    remote_save: TargetHandle,
    render: TargetHandle,
    preview: watch::Receiver<String>,
}

impl SyncCore {
    /// Starts a session: restores the cached document (whitespace-only cache
    /// counts as absent), loads persisted settings, and spawns the autosave
    /// workers. Storage failures degrade to a fresh template; boot itself
    /// cannot fail. Must run inside a tokio runtime.
    pub fn boot(options: BootOptions) -> Self {
        let BootOptions {
            store,
            notifier,
            pipeline,
            autosave,
        } = options;

        let (initial, restored) = match store.get(DOCUMENT_KEY) {
            Ok(Some(cached)) if !cached.trim().is_empty() => (cached, true),
            Ok(_) => (welcome_template().to_string(), false),
            Err(err) => {
                warn!(
                    target: "tidemark::core",
                    error = %err,
                    "local cache unreadable, starting from template"
                );
                (welcome_template().to_string(), false)
            }
        };
        let buffer = Arc::new(DocumentBuffer::new(initial));

        let settings = Arc::new(ConfigStore::new(store.clone()));
        let config = settings.load().unwrap_or_default();
        let remote_configured = config.is_configured();
        let remote = Arc::new(RemoteState {
            config: Mutex::new(config),
            filename: Mutex::new(EXPORT_FILENAME.to_string()),
        });

        let (render_target, preview) = RenderTarget::new(pipeline, &buffer.snapshot());
        let render = spawn_target(
            buffer.clone(),
            Arc::new(render_target),
            autosave.render_delay,
        );
        let local_save = spawn_target(
            buffer.clone(),
            Arc::new(LocalCacheTarget {
                store: store.clone(),
                notifier: notifier.clone(),
            }),
            autosave.local_delay,
        );
        let remote_save = spawn_target(
            buffer.clone(),
            Arc::new(RemoteTarget {
                state: remote.clone(),
                settings: settings.clone(),
                notifier: notifier.clone(),
            }),
            autosave.remote_delay,
        );

        info!(
            target: "tidemark::core",
            restored,
            remote_configured,
            "session ready"
        );
        Self {
            buffer,
            store,
            settings,
            remote,
            notifier,
            local_save,
            remote_save,
            render,
            preview,
        }
    }

    /// Replaces the document wholesale. Serves keystroke updates and every
    /// load path alike; the revision bump re-renders and reschedules both
    /// autosave tiers.
    pub fn load_document(&self, text: impl Into<String>) {
        self.buffer.replace(text);
    }

    pub fn snapshot(&self) -> String {
        self.buffer.snapshot()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Latest rendered preview; the receiver updates shortly after each edit.
    pub fn preview(&self) -> watch::Receiver<String> {
        self.preview.clone()
    }

    pub fn config(&self) -> RemoteConfig {
        self.remote.config.lock().unwrap().clone()
    }

    /// Filename the remote autosave worker currently writes to.
    pub fn remote_filename(&self) -> String {
        self.remote.filename.lock().unwrap().clone()
    }

    pub fn local_status(&self) -> TargetStatus {
        self.local_save.status()
    }

    pub fn remote_status(&self) -> TargetStatus {
        self.remote_save.status()
    }

    /// Immediate local cache write, bypassing the debounce. Used on host
    /// shutdown so the tail of a typing burst is not lost.
    pub fn flush_local(&self) -> Result<(), CoreError> {
        self.store.put(DOCUMENT_KEY, &self.buffer.snapshot())?;
        Ok(())
    }

    /// The current document as an exportable file.
    pub fn export(&self) -> DocumentExport {
        DocumentExport::of(self.buffer.snapshot())
    }

    /// Uploads the buffer to `filename` under the configured remote folder.
    /// On success the remote autosave worker follows the same filename.
    pub async fn save_remote(&self, filename: &str) -> Result<(), CoreError> {
        let (client, config) = self.remote_client()?;
        let url = remote_file_url(&config, filename)?;
        self.notifier
            .status("Saving to remote...", Some(DEFAULT_REVERT));
        match client.upload(&url, &self.buffer.snapshot()).await {
            Ok(()) => {
                self.set_remote_filename(filename);
                self.notifier.status("Saved to remote", Some(DEFAULT_REVERT));
                Ok(())
            }
            Err(err) => {
                self.notifier
                    .status("Remote save failed", Some(DEFAULT_REVERT));
                Err(err.into())
            }
        }
    }

    /// Downloads `filename` from the remote folder into the buffer.
    pub async fn load_remote(&self, filename: &str) -> Result<(), CoreError> {
        let (client, config) = self.remote_client()?;
        let url = remote_file_url(&config, filename)?;
        let content = match client.download(&url).await {
            Ok(content) => content,
            Err(err) => {
                self.notifier
                    .status("Remote load failed", Some(DEFAULT_REVERT));
                return Err(err.into());
            }
        };
        self.buffer.replace(content);
        self.set_remote_filename(filename);
        self.notifier
            .status(&format!("Loaded {}", filename.trim()), Some(LOADED_REVERT));
        Ok(())
    }

    /// Names of the files in the configured remote folder, server order.
    pub async fn list_remote(&self) -> Result<Vec<String>, CoreError> {
        let (client, config) = self.remote_client()?;
        let folder = remote_folder_url(&config)?;
        Ok(client.list(&folder).await?)
    }

    /// Replaces the settings wholesale and persists them. `secret` semantics:
    /// `None` leaves the stored secret untouched, `Some("")` clears it, any
    /// other value replaces it (durably only when `persist_secret` and
    /// `config.remember` are both on).
    pub fn apply_settings(
        &self,
        config: RemoteConfig,
        secret: Option<&str>,
        persist_secret: bool,
    ) -> Result<(), CoreError> {
        match secret {
            Some(secret) => self.settings.save(&config, persist_secret, secret)?,
            None => self.settings.save_config(&config)?,
        }
        *self.remote.config.lock().unwrap() = config;
        self.notifier.status("Settings saved", Some(DEFAULT_REVERT));
        Ok(())
    }

    /// Places a secret in the session slot for the lifetime of this process,
    /// without persisting anything.
    pub fn stash_secret(&self, secret: &str) -> Result<(), CoreError> {
        self.settings.stash_secret(secret)?;
        Ok(())
    }

    /// Whether a remote secret is currently resolvable. The secret itself is
    /// never exposed.
    pub fn secret_present(&self) -> bool {
        self.settings.current_secret().is_some()
    }

    /// Applies a provisioning payload. Present fields update the live
    /// settings; a present `pass` goes to the session slot; settings are
    /// persisted immediately only when the payload carries a remember flag.
    pub fn import_config(&self, payload: &str) -> Result<(), CoreError> {
        let external = ExternalConfig::parse(payload)?;
        let updated = {
            let mut config = self.remote.config.lock().unwrap();
            config.apply_external(&external);
            config.clone()
        };
        if let Some(pass) = external.pass.as_deref() {
            self.settings.stash_secret(pass)?;
        }
        if external.remember.is_some() {
            let secret = self.settings.current_secret().unwrap_or_default();
            self.settings.save(&updated, true, &secret)?;
        }
        self.notifier
            .status("Settings imported", Some(DEFAULT_REVERT));
        Ok(())
    }

    /// One-shot gist publication of the buffer. Refused while the document
    /// is empty, before any request goes out.
    pub async fn share(
        &self,
        description: &str,
        public: bool,
        token: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        if self.buffer.is_empty() {
            return Err(CoreError::EmptyDocument);
        }
        let mut request = ShareRequest::new(self.buffer.snapshot());
        request.description = description.to_string();
        request.public = public;
        request.token = token.map(str::to_string);

        self.notifier
            .status("Creating gist, this may take a moment", Some(DEFAULT_REVERT));
        let client = ShareClient::new()?;
        match client.publish(&request).await {
            Ok(link) => {
                self.notifier.status("Gist created", Some(DEFAULT_REVERT));
                Ok(link)
            }
            Err(err) => {
                self.notifier
                    .status("Gist creation failed", Some(DEFAULT_REVERT));
                Err(err.into())
            }
        }
    }

    /// Stops the autosave workers. Pending debounce deadlines are discarded;
    /// an in-flight save finishes first. Callers that want the tail of the
    /// buffer persisted should [`SyncCore::flush_local`] beforehand.
    pub async fn teardown(self) {
        self.local_save.stop().await;
        self.remote_save.stop().await;
        self.render.stop().await;
        info!(target: "tidemark::core", "session closed");
    }

    /// Credential gate for explicit remote operations: resolving the secret
    /// happens before any client exists, so a missing credential never turns
    /// into a network call.
    fn remote_client(&self) -> Result<(RemoteClient, RemoteConfig), CoreError> {
        let config = self.remote.config.lock().unwrap().clone();
        let secret = self
            .settings
            .current_secret()
            .ok_or(CoreError::CredentialsMissing)?;
        let client = RemoteClient::new(&config.username, &secret)?;
        Ok((client, config))
    }

    fn set_remote_filename(&self, filename: &str) {
        let name = filename.trim().trim_start_matches('/');
        if !name.is_empty() {
            *self.remote.filename.lock().unwrap() = name.to_string();
        }
    }
}

struct LocalCacheTarget {
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl SaveTarget for LocalCacheTarget {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn persist(&self, snapshot: &str) -> Result<(), String> {
        match self.store.put(DOCUMENT_KEY, snapshot) {
            Ok(()) => {
                self.notifier.status("Autosaved locally", Some(SAVED_REVERT));
                Ok(())
            }
            Err(err) => {
                self.notifier.status("Autosave failed", Some(DEFAULT_REVERT));
                Err(err.to_string())
            }
        }
    }
}

struct RemoteTarget {
    state: Arc<RemoteState>,
    settings: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl SaveTarget for RemoteTarget {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn armed(&self) -> bool {
        self.state.config.lock().unwrap().is_configured()
            && self.settings.current_secret().is_some()
    }

    async fn persist(&self, snapshot: &str) -> Result<(), String> {
        let (config, filename) = (
            self.state.config.lock().unwrap().clone(),
            self.state.filename.lock().unwrap().clone(),
        );
        let Some(secret) = self.settings.current_secret() else {
            return Err("credentials missing".to_string());
        };
        let url = remote_file_url(&config, &filename).map_err(|err| err.to_string())?;
        let client = RemoteClient::new(&config.username, &secret).map_err(|err| err.to_string())?;
        match client.upload(&url, snapshot).await {
            Ok(()) => {
                self.notifier.status("Saved to remote", Some(SAVED_REVERT));
                Ok(())
            }
            Err(err) => {
                self.notifier
                    .status("Remote save failed", Some(DEFAULT_REVERT));
                Err(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::TargetState;
    use crate::editor::MarkupParser;
    use crate::notify::RecordingNotifier;
    use crate::storage::{MemoryStore, REMOTE_CONFIG_KEY, REMOTE_SECRET_KEY};

    fn boot_with_store(store: Arc<MemoryStore>) -> SyncCore {
        SyncCore::boot(BootOptions::new(store))
    }

    fn sample_config() -> RemoteConfig {
        RemoteConfig {
            base_url: "https://example.com/dav".to_string(),
            username: "anna".to_string(),
            folder: "notes".to_string(),
            remember: false,
        }
    }

    #[tokio::test]
    async fn boot_restores_cached_document() {
        let store = Arc::new(MemoryStore::new());
        store.put(DOCUMENT_KEY, "# my notes\n").unwrap();
        let core = boot_with_store(store);
        assert_eq!(core.snapshot(), "# my notes\n");
        core.teardown().await;
    }

    #[tokio::test]
    async fn boot_treats_blank_cache_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.put(DOCUMENT_KEY, "  \n\t").unwrap();
        let core = boot_with_store(store);
        assert_eq!(core.snapshot(), welcome_template());
        core.teardown().await;
    }

    #[tokio::test]
    async fn boot_without_cache_starts_from_template() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        assert_eq!(core.snapshot(), welcome_template());
        assert!(!core.config().is_configured());
        core.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn edits_reach_the_local_cache_after_the_quiet_window() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut options = BootOptions::new(store.clone());
        options.notifier = notifier.clone();
        let core = SyncCore::boot(options);

        core.load_document("draft one");
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get(DOCUMENT_KEY).unwrap(), None);
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(store.get(DOCUMENT_KEY).unwrap().as_deref(), Some("draft one"));
        assert!(notifier.seen().contains(&"Autosaved locally".to_string()));
        core.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_remote_never_arms() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        for i in 0..10 {
            core.load_document(format!("edit {i}"));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;

        let status = core.remote_status();
        assert_eq!(status.state, TargetState::Idle);
        assert_eq!(status.synced_revision, 0);
        assert!(status.last_error.is_none());
        core.teardown().await;
    }

    #[tokio::test]
    async fn remote_operations_require_a_secret() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        core.apply_settings(sample_config(), None, false).unwrap();

        assert!(matches!(
            core.save_remote("a.md").await,
            Err(CoreError::CredentialsMissing)
        ));
        assert!(matches!(
            core.load_remote("a.md").await,
            Err(CoreError::CredentialsMissing)
        ));
        assert!(matches!(
            core.list_remote().await,
            Err(CoreError::CredentialsMissing)
        ));
        core.teardown().await;
    }

    #[tokio::test]
    async fn apply_settings_replaces_config_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let core = boot_with_store(store.clone());
        core.apply_settings(sample_config(), Some("hunter2"), false)
            .unwrap();

        assert_eq!(core.config(), sample_config());
        assert!(store.get(REMOTE_CONFIG_KEY).unwrap().is_some());
        // remember is off, so no durable copy of the secret.
        assert!(store.get(REMOTE_SECRET_KEY).unwrap().is_none());
        assert!(core.secret_present());
        core.teardown().await;
    }

    #[tokio::test]
    async fn apply_settings_without_secret_keeps_the_stored_one() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        core.stash_secret("hunter2").unwrap();
        core.apply_settings(sample_config(), None, false).unwrap();
        assert!(core.secret_present());

        core.apply_settings(sample_config(), Some(""), false).unwrap();
        assert!(!core.secret_present());
        core.teardown().await;
    }

    #[tokio::test]
    async fn import_without_remember_updates_live_config_only() {
        let store = Arc::new(MemoryStore::new());
        let core = boot_with_store(store.clone());
        core.import_config(r#"{"url":"https://dav.example.com","user":"bo"}"#)
            .unwrap();

        assert_eq!(core.config().base_url, "https://dav.example.com");
        assert_eq!(core.config().username, "bo");
        assert!(store.get(REMOTE_CONFIG_KEY).unwrap().is_none());
        core.teardown().await;
    }

    #[tokio::test]
    async fn import_with_remember_persists_settings_and_secret() {
        let store = Arc::new(MemoryStore::new());
        let core = boot_with_store(store.clone());
        core.import_config(
            r#"{"url":"https://dav.example.com","user":"bo","rememberUser":true,"pass":"hunter2"}"#,
        )
        .unwrap();

        assert!(core.config().remember);
        assert!(store.get(REMOTE_CONFIG_KEY).unwrap().is_some());
        assert_eq!(
            store.get(REMOTE_SECRET_KEY).unwrap().as_deref(),
            Some("hunter2")
        );
        core.teardown().await;
    }

    #[tokio::test]
    async fn share_refuses_an_empty_document() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        core.load_document("");
        assert!(matches!(
            core.share("", false, None).await,
            Err(CoreError::EmptyDocument)
        ));
        core.teardown().await;
    }

    #[tokio::test]
    async fn flush_local_writes_without_waiting() {
        let store = Arc::new(MemoryStore::new());
        let core = boot_with_store(store.clone());
        core.load_document("going down");
        core.flush_local().unwrap();
        assert_eq!(
            store.get(DOCUMENT_KEY).unwrap().as_deref(),
            Some("going down")
        );
        core.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn preview_follows_edits() {
        struct Shouter;
        impl MarkupParser for Shouter {
            fn parse(&self, markdown: &str) -> Result<String, String> {
                Ok(markdown.to_uppercase())
            }
        }

        let mut options = BootOptions::new(Arc::new(MemoryStore::new()));
        options.pipeline = RenderPipeline::new(Some(Arc::new(Shouter)), None);
        let core = SyncCore::boot(options);
        let preview = core.preview();
        assert_eq!(preview.borrow().as_str(), welcome_template().to_uppercase());

        core.load_document("quiet words");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(preview.borrow().as_str(), "QUIET WORDS");
        core.teardown().await;
    }

    #[tokio::test]
    async fn export_carries_the_exact_buffer() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        core.load_document("line one\nline two\n");
        let export = core.export();
        assert_eq!(export.filename, EXPORT_FILENAME);
        assert_eq!(export.content, "line one\nline two\n");
        core.teardown().await;
    }

    #[tokio::test]
    async fn remote_filename_follows_explicit_operations() {
        let core = boot_with_store(Arc::new(MemoryStore::new()));
        assert_eq!(core.remote_filename(), EXPORT_FILENAME);
        core.set_remote_filename("  /journal.md ");
        assert_eq!(core.remote_filename(), "journal.md");
        // Blank names never replace the tracked one.
        core.set_remote_filename("   ");
        assert_eq!(core.remote_filename(), "journal.md");
        core.teardown().await;
    }
}
