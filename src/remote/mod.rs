use crate::config::RemoteConfig;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

mod multistatus;

/// MIME type the document travels under, on uploads and exports alike.
pub const MARKDOWN_MIME: &str = "text/markdown; charset=utf-8";

const PROPFIND_ALLPROP: &str =
    r#"<?xml version="1.0" encoding="utf-8"?><propfind xmlns="DAV:"><allprop/></propfind>"#;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid remote path: {0}")]
    InvalidPath(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Joins a base URL and folder into the remote root path: exactly one slash
/// between segments, no trailing slash on the result, backslashes in the
/// folder treated as path separators. Idempotent, so a previously normalized
/// value passes through unchanged.
pub fn normalize_base(base_url: &str, folder: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let folder = folder.trim().replace('\\', "/");
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{folder}")
    }
}

/// URL of the configured remote folder itself, used for listings.
pub fn remote_folder_url(config: &RemoteConfig) -> Result<Url, RemoteError> {
    if !config.is_configured() {
        return Err(RemoteError::InvalidPath("remote base url is empty".into()));
    }
    let joined = normalize_base(&config.base_url, &config.folder);
    Url::parse(&joined).map_err(|err| RemoteError::InvalidPath(format!("{joined}: {err}")))
}

/// URL of a file under the configured remote folder. Recomputed per operation
/// so settings changes take effect immediately.
pub fn remote_file_url(config: &RemoteConfig, filename: &str) -> Result<Url, RemoteError> {
    let name = filename.trim().trim_start_matches('/');
    if name.is_empty() {
        return Err(RemoteError::InvalidPath("remote filename is empty".into()));
    }
    let joined = format!("{}/{name}", normalize_base(&config.base_url, &config.folder));
    Url::parse(&joined).map_err(|err| RemoteError::InvalidPath(format!("{joined}: {err}")))
}

struct WireResponse {
    status: StatusCode,
    body: String,
}

impl WireResponse {
    fn into_status_error(self) -> RemoteError {
        RemoteError::Status {
            status: self.status.as_u16(),
            body: self.body,
        }
    }
}

#[async_trait]
trait RemoteBackend: Send + Sync {
    async fn put(&self, url: &Url, auth: &str, content: &str) -> Result<WireResponse, RemoteError>;
    async fn get(&self, url: &Url, auth: &str) -> Result<WireResponse, RemoteError>;
    async fn propfind(&self, url: &Url, auth: &str) -> Result<WireResponse, RemoteError>;
}

/// Client for the remote document store. Every request carries one Basic
/// credential; there is no retry and no token refresh, so stale credentials
/// fail every call the same way until the settings change.
pub struct RemoteClient {
    backend: Arc<dyn RemoteBackend>,
    auth: String,
}

impl RemoteClient {
    pub fn new(username: &str, secret: &str) -> Result<Self, RemoteError> {
        let backend = Arc::new(ReqwestRemoteBackend::new()?);
        Ok(Self::with_auth(backend, username, secret))
    }

    #[cfg(test)]
    fn with_backend(backend: Arc<dyn RemoteBackend>, username: &str, secret: &str) -> Self {
        Self::with_auth(backend, username, secret)
    }

    fn with_auth(backend: Arc<dyn RemoteBackend>, username: &str, secret: &str) -> Self {
        let token = BASE64_STANDARD.encode(format!("{username}:{secret}"));
        Self {
            backend,
            auth: format!("Basic {token}"),
        }
    }

    /// Whole-file write. Idempotent on the server side: re-uploading the same
    /// path replaces its contents.
    pub async fn upload(&self, url: &Url, content: &str) -> Result<(), RemoteError> {
        let response = self.backend.put(url, &self.auth, content).await?;
        if !response.status.is_success() {
            return Err(response.into_status_error());
        }
        debug!(
            target: "tidemark::remote",
            path = %url.path(),
            bytes = content.len(),
            "uploaded document"
        );
        Ok(())
    }

    /// Whole-file read, returned as text.
    pub async fn download(&self, url: &Url) -> Result<String, RemoteError> {
        let response = self.backend.get(url, &self.auth).await?;
        if !response.status.is_success() {
            return Err(response.into_status_error());
        }
        Ok(response.body)
    }

    /// Shallow listing of the folder's immediate children, in server order.
    /// An empty folder yields an empty vec, not an error.
    pub async fn list(&self, folder: &Url) -> Result<Vec<String>, RemoteError> {
        let response = self.backend.propfind(folder, &self.auth).await?;
        if !response.status.is_success() {
            return Err(response.into_status_error());
        }
        Ok(multistatus::file_names(&response.body, folder))
    }
}

struct ReqwestRemoteBackend {
    client: reqwest::Client,
    propfind: Method,
}

impl ReqwestRemoteBackend {
    fn new() -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?;
        let propfind = Method::from_bytes(b"PROPFIND").expect("PROPFIND is a valid method token");
        Ok(Self { client, propfind })
    }

    async fn dispatch(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<WireResponse, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(WireResponse { status, body })
    }
}

#[async_trait]
impl RemoteBackend for ReqwestRemoteBackend {
    async fn put(&self, url: &Url, auth: &str, content: &str) -> Result<WireResponse, RemoteError> {
        self.dispatch(
            self.client
                .put(url.clone())
                .header(AUTHORIZATION, auth)
                .header(CONTENT_TYPE, MARKDOWN_MIME)
                .body(content.to_string()),
        )
        .await
    }

    async fn get(&self, url: &Url, auth: &str) -> Result<WireResponse, RemoteError> {
        self.dispatch(self.client.get(url.clone()).header(AUTHORIZATION, auth))
            .await
    }

    async fn propfind(&self, url: &Url, auth: &str) -> Result<WireResponse, RemoteError> {
        self.dispatch(
            self.client
                .request(self.propfind.clone(), url.clone())
                .header(AUTHORIZATION, auth)
                .header("Depth", "1")
                .header(CONTENT_TYPE, "application/xml")
                .body(PROPFIND_ALLPROP),
        )
        .await
    }
}
