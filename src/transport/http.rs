use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::model::{Record, RootEnvelope, SessionResult};

use super::{ApiResponse, RecordSink, RecordsUpload, SessionSource, TransportError};

/// Client for the chunk server protocol.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/ubm/{}", self.base_url, path)
    }
}

/// Unwrap a `{code, msg, data}` envelope. A non-zero code is a rejection.
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<ApiResponse<T>, TransportError> {
    let status = response.status();
    let body = response.bytes().await?;
    let envelope: ApiResponse<T> = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!(%status, error = %e, "malformed response from chunk server");
        e
    })?;
    if envelope.code != 0 {
        return Err(if status == reqwest::StatusCode::NOT_FOUND {
            TransportError::NotFound(envelope.msg)
        } else {
            TransportError::Rejected(envelope.msg)
        });
    }
    Ok(envelope)
}

#[async_trait]
impl RecordSink for HttpTransport {
    async fn submit_root(&self, root: &RootEnvelope) -> Result<(), TransportError> {
        let response = self.client.post(self.endpoint("")).json(root).send().await?;
        read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn submit_records(&self, session_id: &str, records: Vec<Record>) -> Result<(), TransportError> {
        if records.is_empty() {
            return Ok(());
        }
        let upload = RecordsUpload {
            session_id: session_id.to_string(),
            records,
        };
        let response = self
            .client
            .post(self.endpoint("records"))
            .json(&upload)
            .send()
            .await?;
        read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    fn notify_stopped(&self, session_id: &str) {
        // The protocol has no end-of-session call; the SessionEnd record is the signal.
        tracing::debug!(session_id, base_url = %self.base_url, "recording stopped");
    }
}

#[async_trait]
impl SessionSource for HttpTransport {
    async fn fetch_session(&self, session_id: &str, lenient: bool) -> Result<SessionResult, TransportError> {
        let response = self
            .client
            .get(self.endpoint(session_id))
            .query(&[("lenient", lenient)])
            .send()
            .await?;
        let envelope = read_envelope::<SessionResult>(response).await?;
        if !envelope.msg.is_empty() {
            tracing::warn!(session_id, msg = %envelope.msg, "session fetched with warnings");
        }
        envelope
            .data
            .ok_or_else(|| TransportError::Rejected(format!("empty response for session {session_id}")))
    }
}
