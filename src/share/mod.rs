use crate::editor::EXPORT_FILENAME;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const GIST_ENDPOINT: &str = "https://api.github.com/gists";
const DEFAULT_DESCRIPTION: &str = "Created from tidemark";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("share service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One-shot publication of the document as a gist.
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub content: String,
    /// Blank descriptions fall back to [`DEFAULT_DESCRIPTION`].
    pub description: String,
    pub public: bool,
    /// Personal access token. Without one the gist is created anonymously,
    /// subject to the service's unauthenticated limits.
    pub token: Option<String>,
}

impl ShareRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            description: String::new(),
            public: false,
            token: None,
        }
    }
}

#[derive(Serialize)]
struct GistPayload<'a> {
    description: &'a str,
    public: bool,
    files: BTreeMap<&'a str, GistContent<'a>>,
}

#[derive(Serialize)]
struct GistContent<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct GistCreated {
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    files: BTreeMap<String, GistCreatedFile>,
}

#[derive(Deserialize)]
struct GistCreatedFile {
    #[serde(default)]
    raw_url: Option<String>,
}

struct WireResponse {
    status: StatusCode,
    body: String,
}

#[async_trait]
trait ShareBackend: Send + Sync {
    async fn post(
        &self,
        authorization: Option<&str>,
        payload: &str,
    ) -> Result<WireResponse, ShareError>;
}

pub struct ShareClient {
    backend: Arc<dyn ShareBackend>,
}

impl ShareClient {
    pub fn new() -> Result<Self, ShareError> {
        Ok(Self {
            backend: Arc::new(ReqwestShareBackend::new()?),
        })
    }

    #[cfg(test)]
    fn with_backend(backend: Arc<dyn ShareBackend>) -> Self {
        Self { backend }
    }

    /// Creates the gist and returns its page link. The service may answer
    /// with neither a page link nor a raw link; that is still a successful
    /// creation, reported as `None`.
    pub async fn publish(&self, request: &ShareRequest) -> Result<Option<String>, ShareError> {
        let description = match request.description.trim() {
            "" => DEFAULT_DESCRIPTION,
            trimmed => trimmed,
        };
        let payload = serde_json::to_string(&GistPayload {
            description,
            public: request.public,
            files: BTreeMap::from([(
                EXPORT_FILENAME,
                GistContent {
                    content: &request.content,
                },
            )]),
        })?;
        let authorization = request
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| format!("token {token}"));

        let response = self.backend.post(authorization.as_deref(), &payload).await?;
        if !response.status.is_success() {
            return Err(ShareError::Status {
                status: response.status.as_u16(),
                body: response.body,
            });
        }

        let created: GistCreated = serde_json::from_str(&response.body)?;
        let link = created
            .html_url
            .or_else(|| created.files.into_values().find_map(|file| file.raw_url));
        debug!(
            target: "tidemark::share",
            linked = link.is_some(),
            public = request.public,
            "gist created"
        );
        Ok(link)
    }
}

struct ReqwestShareBackend {
    client: reqwest::Client,
}

impl ReqwestShareBackend {
    fn new() -> Result<Self, ShareError> {
        // The gist API rejects requests without a User-Agent.
        let client = reqwest::Client::builder()
            .user_agent("tidemark")
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ShareBackend for ReqwestShareBackend {
    async fn post(
        &self,
        authorization: Option<&str>,
        payload: &str,
    ) -> Result<WireResponse, ShareError> {
        let mut request = self
            .client
            .post(GIST_ENDPOINT)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string());
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(WireResponse { status, body })
    }
}
