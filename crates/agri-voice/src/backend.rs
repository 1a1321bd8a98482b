//! Voice query backend: wire types, the `VoiceBackend` seam, and the reqwest client.
//!
//! Two endpoints:
//! - `POST {base}/voice/query` → `{mode:"ack", request_id}` | `{mode:"final", speech}`
//! - `GET {base}/voice/query/result/{id}` → `{status:"processing"}` | `{status:"completed", speech}` | `{status:"error", error}`

use crate::config::BackendConfig;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    pub locale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// Immediate answer to a submitted query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum QueryReply {
    Ack { request_id: String },
    Final { speech: String },
}

/// Status of an acknowledged query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultStatus {
    Processing,
    Completed { speech: String },
    Error {
        #[serde(default)]
        error: String,
    },
    /// Any status this client does not know; treated like `processing`.
    #[serde(other)]
    Unknown,
}

/// Backend seam used by the dispatcher and the poller. Fakes implement this in tests.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn submit(&self, request: &QueryRequest) -> VoiceResult<QueryReply>;

    async fn fetch_result(&self, request_id: &str) -> VoiceResult<ResultStatus>;
}

/// reqwest-backed client for the voice query API.
#[derive(Debug, Clone)]
pub struct HttpVoiceBackend {
    base_url: reqwest::Url,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpVoiceBackend {
    pub fn new(config: &BackendConfig) -> VoiceResult<Self> {
        let base_url = reqwest::Url::parse(config.base_url.trim())
            .map_err(|e| VoiceError::Config(format!("backend.base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(VoiceError::Config(format!(
                "backend.base_url {} cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url,
            api_token: config.api_token.clone().filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl VoiceBackend for HttpVoiceBackend {
    async fn submit(&self, request: &QueryRequest) -> VoiceResult<QueryReply> {
        let url = self.endpoint(&["voice", "query"]);
        debug!(target: "agri::voice", %url, "POST voice query");
        let res = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|e| VoiceError::Submission(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Submission(format!("backend error {}: {}", status, body)));
        }
        res.json::<QueryReply>()
            .await
            .map_err(|e| VoiceError::Submission(format!("malformed reply: {}", e)))
    }

    async fn fetch_result(&self, request_id: &str) -> VoiceResult<ResultStatus> {
        let url = self.endpoint(&["voice", "query", "result", request_id]);
        let res = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| VoiceError::Polling(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Polling(format!("backend error {}", res.status())));
        }
        res.json::<ResultStatus>()
            .await
            .map_err(|e| VoiceError::Polling(format!("malformed status: {}", e)))
    }
}
