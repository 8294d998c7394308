//! HTTP client for the journey service.
//!
//! Every outbound call the engine makes goes through [`ApiClient`]:
//! starting and submitting turns, the recording upload flow, the
//! transcription poll, feedback submission, and replay fetches. Failures
//! map to [`EngineError::Transport`] and are surfaced as notices by the
//! engine; nothing here retries on its own.

use crate::config::ApiConfig;
use crate::error::{EngineError, Result};
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

/// Raw bytes of a turn's event stream, fed to the frame parser.
pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>;

/// Result of one transcription poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptionStatus {
    /// Still processing; poll again.
    Pending,
    /// Transcription finished with this text.
    Completed(String),
    /// The service gave up on this recording.
    Failed(String),
}

#[derive(Debug, Serialize)]
struct TurnRequest<'a> {
    attempt_id: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartRecordingResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct UploadChunkRequest<'a> {
    session_id: &'a str,
    audio_data: &'a str,
    chunk_number: u32,
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct CompleteRecordingRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptionPollResponse {
    status: String,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct FeedbackRequest<'a> {
    attempt_id: &'a str,
    rating: u8,
    comments: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReplayAudioResponse {
    #[serde(default)]
    chunks: Vec<String>,
}

/// Client for the journey service's HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a failed response to a transport error with the body's message.
    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::Transport(format!(
            "{what} failed with HTTP {}: {}",
            status.as_u16(),
            extract_error_message(&body)
        )))
    }

    /// Announce a new journey turn; the reply streams over the push
    /// channel rather than this response.
    pub async fn start_turn(&self, attempt_id: &str, input: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/journeys/voice/start"))
            .json(&TurnRequest { attempt_id, input })
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("turn start failed: {e}")))?;
        Self::check(response, "turn start").await?;
        Ok(())
    }

    /// Submit a turn and stream the reply back as event-stream frames.
    pub async fn submit_turn(&self, attempt_id: &str, input: &str) -> Result<ByteStream> {
        let response = self
            .client
            .post(self.url("/journeys/voice/submit"))
            .json(&TurnRequest { attempt_id, input })
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("turn submit failed: {e}")))?;
        let response = Self::check(response, "turn submit").await?;
        Ok(Box::pin(response.bytes_stream()))
    }

    /// Open a recording session; returns the server-side session id the
    /// upload and poll calls are keyed by.
    pub async fn start_recording(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("/audio/start-recording"))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("recording start failed: {e}")))?;
        let response = Self::check(response, "recording start").await?;
        let parsed: StartRecordingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("recording start reply invalid: {e}")))?;
        Ok(parsed.session_id)
    }

    /// Upload the recording as one base64 WAV payload.
    pub async fn upload_audio(
        &self,
        session_id: &str,
        audio_data: &str,
        chunk_number: u32,
        is_final: bool,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url("/audio/process-chunk"))
            .json(&UploadChunkRequest {
                session_id,
                audio_data,
                chunk_number,
                is_final,
            })
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("audio upload failed: {e}")))?;
        Self::check(response, "audio upload").await?;
        Ok(())
    }

    /// Tell the service the recording is fully uploaded and transcription
    /// may begin.
    pub async fn complete_recording(&self, session_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/audio/complete"))
            .json(&CompleteRecordingRequest { session_id })
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("recording complete failed: {e}")))?;
        Self::check(response, "recording complete").await?;
        Ok(())
    }

    /// Ask once whether the transcription for `session_id` is ready.
    pub async fn poll_transcription(&self, session_id: &str) -> Result<TranscriptionStatus> {
        let response = self
            .client
            .get(self.url(&format!("/audio/transcription/{session_id}")))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("transcription poll failed: {e}")))?;
        let response = Self::check(response, "transcription poll").await?;
        let parsed: TranscriptionPollResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("transcription reply invalid: {e}")))?;

        match parsed.status.as_str() {
            "completed" => Ok(TranscriptionStatus::Completed(
                parsed.transcription.unwrap_or_default(),
            )),
            "failed" => Ok(TranscriptionStatus::Failed(
                parsed.error.unwrap_or_else(|| "transcription failed".into()),
            )),
            other => {
                debug!("transcription still pending (status {other:?})");
                Ok(TranscriptionStatus::Pending)
            }
        }
    }

    /// Submit end-of-journey feedback.
    pub async fn submit_feedback(
        &self,
        attempt_id: &str,
        rating: u8,
        comments: &str,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.url("/journeys/voice/feedback"))
            .json(&FeedbackRequest {
                attempt_id,
                rating,
                comments,
            })
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("feedback submit failed: {e}")))?;
        Self::check(response, "feedback submit").await?;
        Ok(())
    }

    /// Fetch the stored speech chunks of an earlier reply for replay.
    pub async fn fetch_reply_audio(&self, response_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url(&format!("/journeys/aivoice/{response_id}")))
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("replay fetch failed: {e}")))?;
        let response = Self::check(response, "replay fetch").await?;
        let parsed: ReplayAudioResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("replay reply invalid: {e}")))?;
        Ok(parsed.chunks)
    }
}

/// Pull a human-readable message out of an error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.as_str().map(String::from))
                .or_else(|| {
                    v.get("message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                })
        })
        .unwrap_or_else(|| body.to_string())
}
