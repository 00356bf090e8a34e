//! HTTP signaling client for the SRS play API
//!
//! The exchange is a single JSON POST: the local SDP offer and stream name go
//! up, the SDP answer comes back. Transient transport failures are retried a
//! small fixed number of times with doubling backoff; an error code or a
//! malformed answer body fails immediately.

use crate::resolver::StreamTarget;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Total POST attempts before giving up
const MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt; doubles per retry
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Request body for the SRS play API
#[derive(Debug, Serialize)]
pub struct PlayRequest {
    /// API endpoint, echoed in the body as SRS players do
    pub api: String,
    /// Stream to play
    pub streamurl: String,
    /// Local SDP offer
    pub sdp: String,
}

/// Response body from the SRS play API
#[derive(Debug, Deserialize)]
pub struct PlayResponse {
    /// Server result code, 0 on success
    pub code: i64,
    /// Optional server message on failure
    #[serde(default)]
    pub msg: Option<String>,
    /// SDP answer, present on success
    #[serde(default)]
    pub sdp: Option<String>,
    /// Server session identifier, unused by the player
    #[serde(default)]
    pub sessionid: Option<String>,
}

/// Stateless offer/answer client for the resolved play endpoint
pub struct SignalingClient {
    client: reqwest::Client,
}

impl SignalingClient {
    /// Create a signaling client. Certificate verification is disabled to
    /// match the page fetch path.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Signaling(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// POST the local offer and return the remote answer SDP.
    ///
    /// Retries only on transport-level failures (connect refused, timeout).
    /// A non-success HTTP status, a non-zero `code` or a missing `sdp` field
    /// is terminal.
    pub async fn negotiate(&self, target: &StreamTarget, local_offer: &str) -> Result<String> {
        debug_assert!(!target.api_endpoint.is_empty());

        let request = PlayRequest {
            api: target.api_endpoint.clone(),
            streamurl: target.stream_name.clone(),
            sdp: local_offer.to_string(),
        };

        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            info!(
                "Sending SDP offer to {} (attempt {}/{})",
                target.api_endpoint, attempt, MAX_ATTEMPTS
            );

            match self.post_offer(&target.api_endpoint, &request).await {
                Ok(answer) => return Ok(answer),
                Err(PostError::Transient(msg)) => {
                    warn!("Signaling attempt {} failed: {}", attempt, msg);
                    last_error = msg;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
                Err(PostError::Fatal(err)) => return Err(err),
            }
        }

        Err(Error::Signaling(format!(
            "negotiation failed after {MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn post_offer(
        &self,
        endpoint: &str,
        request: &PlayRequest,
    ) -> std::result::Result<String, PostError> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    PostError::Transient(e.to_string())
                } else {
                    PostError::Fatal(Error::Signaling(format!("request failed: {e}")))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PostError::Fatal(Error::Signaling(format!(
                "server returned {status}: {body}"
            ))));
        }

        let answer: PlayResponse = response.json().await.map_err(|e| {
            PostError::Fatal(Error::Signaling(format!("malformed answer body: {e}")))
        })?;

        if answer.code != 0 {
            return Err(PostError::Fatal(Error::Signaling(format!(
                "server returned code {}: {}",
                answer.code,
                answer.msg.unwrap_or_else(|| "unknown error".to_string())
            ))));
        }

        match answer.sdp {
            Some(sdp) if !sdp.is_empty() => {
                debug!("Received SDP answer ({} bytes)", sdp.len());
                Ok(sdp)
            }
            _ => Err(PostError::Fatal(Error::Signaling(
                "answer body is missing the sdp field".to_string(),
            ))),
        }
    }
}

/// Internal classification for the retry loop
enum PostError {
    /// Worth another attempt after backoff
    Transient(String),
    /// Terminal, surfaced as-is
    Fatal(Error),
}
