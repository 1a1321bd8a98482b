//! Query dispatch: submit a finalized utterance, classify the immediate reply.
//!
//! No retries here. Submission is user-triggered, so a failure is reported at once.

use crate::backend::{QueryReply, QueryRequest, VoiceBackend};
use crate::error::{VoiceError, VoiceResult};
use crate::session::GeoPoint;
use std::sync::Arc;
use tracing::{info, warn};

/// What the backend said straight away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Final { text: String },
    Ack { request_id: String },
}

#[derive(Clone)]
pub struct QueryDispatcher {
    backend: Arc<dyn VoiceBackend>,
}

impl QueryDispatcher {
    pub fn new(backend: Arc<dyn VoiceBackend>) -> Self {
        Self { backend }
    }

    pub async fn submit(
        &self,
        text: &str,
        locale: &str,
        geo: Option<GeoPoint>,
    ) -> VoiceResult<DispatchResult> {
        let request = QueryRequest {
            text: text.to_string(),
            locale: locale.to_string(),
            lat: geo.map(|g| g.lat),
            lon: geo.map(|g| g.lon),
        };

        let reply = self.backend.submit(&request).await.map_err(|e| {
            warn!(target: "agri::voice", error = %e, "Query submission failed");
            match e {
                VoiceError::Submission(_) => e,
                other => VoiceError::Submission(other.to_string()),
            }
        })?;

        match reply {
            QueryReply::Final { speech } => {
                info!(target: "agri::voice", "Backend answered directly");
                Ok(DispatchResult::Final { text: speech })
            }
            QueryReply::Ack { request_id } if request_id.trim().is_empty() => Err(
                VoiceError::Submission("acknowledgment without request_id".to_string()),
            ),
            QueryReply::Ack { request_id } => {
                info!(target: "agri::voice", %request_id, "Backend acknowledged query");
                Ok(DispatchResult::Ack { request_id })
            }
        }
    }
}
