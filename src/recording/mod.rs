//! Spoken-reply recording sessions.
//!
//! One recording session may be live at a time. The session is an
//! explicit state machine driven by the engine: capture chunks flow in
//! while `Recording`, a stop request moves to `Stopping`, and the actual
//! upload waits for the capture stream's finalize event so the payload is
//! never sent half-flushed. The accumulated capture is assembled into a
//! single WAV payload client-side, so each recording costs exactly one
//! upload call.
//!
//! ```text
//! idle -> recording -> stopping -> previewing -> uploading -> transcribing -> completed
//!                              \__ (send immediately) ___/                \-> failed
//! ```

use crate::api::{ApiClient, TranscriptionStatus};
use crate::config::TranscriptionConfig;
use crate::error::{EngineError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io::Cursor;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// No recording in progress.
    Idle,
    /// Microphone is live; chunks are accumulating.
    Recording,
    /// Stop requested; waiting for the capture stream to flush.
    Stopping,
    /// Capture finalized; waiting for the user to confirm or discard.
    Previewing,
    /// Payload is being uploaded.
    Uploading,
    /// Upload done; polling for the transcription result.
    Transcribing,
    /// Transcription arrived and was handed to the turn input.
    Completed,
    /// Upload or transcription failed; inputs re-enabled for retry.
    Failed,
}

/// What the engine should do after a finalize event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Stop-and-send: upload this WAV payload now.
    Upload { payload: String },
    /// Plain stop: hold for user confirmation.
    Preview,
}

/// State machine for one microphone recording.
#[derive(Debug)]
pub struct RecordingSession {
    id: Uuid,
    state: RecordingState,
    captured: Vec<f32>,
    sample_rate: u32,
    send_immediately: bool,
}

impl RecordingSession {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RecordingState::Idle,
            captured: Vec::new(),
            sample_rate,
            send_immediately: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Begin capturing.
    ///
    /// # Errors
    ///
    /// Rejects when a session is already active; the caller must wait for
    /// it to resolve before starting another.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            RecordingState::Idle | RecordingState::Completed | RecordingState::Failed => {
                self.id = Uuid::new_v4();
                self.state = RecordingState::Recording;
                self.captured.clear();
                self.send_immediately = false;
                info!(session = %self.id, "recording started");
                Ok(())
            }
            state => Err(EngineError::Recording(format!(
                "recording already active (state {state:?})"
            ))),
        }
    }

    /// Accumulate one capture chunk. Chunks arriving outside `Recording`
    /// (late flushes) are dropped.
    pub fn push_chunk(&mut self, samples: &[f32]) {
        match self.state {
            RecordingState::Recording | RecordingState::Stopping => {
                self.captured.extend_from_slice(samples);
            }
            _ => debug!("dropping capture chunk outside active recording"),
        }
    }

    /// Request a stop. Idempotent; stopping while idle is a no-op.
    ///
    /// The upload decision is deferred to [`finalize`](Self::finalize):
    /// the capture stream still owes a flush, and sending eagerly here
    /// would truncate the payload.
    pub fn request_stop(&mut self, send_immediately: bool) {
        match self.state {
            RecordingState::Recording => {
                self.state = RecordingState::Stopping;
                self.send_immediately = send_immediately;
            }
            RecordingState::Stopping => {
                // A later stop may upgrade a plain stop to stop-and-send.
                self.send_immediately = self.send_immediately || send_immediately;
            }
            _ => debug!("stop requested with no active recording; ignoring"),
        }
    }

    /// The capture stream has flushed its last chunk.
    ///
    /// Returns what to do next: upload now (stop-and-send) or hold for
    /// preview. `None` when no stop was pending.
    pub fn finalize(&mut self) -> Result<Option<FinalizeOutcome>> {
        if self.state != RecordingState::Stopping {
            return Ok(None);
        }
        if self.send_immediately {
            let payload = self.wav_payload()?;
            self.state = RecordingState::Uploading;
            Ok(Some(FinalizeOutcome::Upload { payload }))
        } else {
            self.state = RecordingState::Previewing;
            Ok(Some(FinalizeOutcome::Preview))
        }
    }

    /// User confirmed the previewed recording; produce the payload.
    pub fn confirm(&mut self) -> Result<String> {
        if self.state != RecordingState::Previewing {
            return Err(EngineError::Recording(format!(
                "nothing to confirm (state {:?})",
                self.state
            )));
        }
        let payload = self.wav_payload()?;
        self.state = RecordingState::Uploading;
        Ok(payload)
    }

    /// Throw the capture away and return to idle.
    pub fn discard(&mut self) {
        self.state = RecordingState::Idle;
        self.captured.clear();
        self.send_immediately = false;
    }

    pub fn mark_transcribing(&mut self) {
        self.state = RecordingState::Transcribing;
    }

    pub fn mark_completed(&mut self) {
        self.state = RecordingState::Completed;
        self.captured.clear();
    }

    pub fn mark_failed(&mut self) {
        self.state = RecordingState::Failed;
    }

    /// Duration captured so far, in seconds.
    pub fn captured_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.captured.len() as f64 / self.sample_rate as f64
    }

    /// Assemble the whole capture into one base64 WAV payload
    /// (mono PCM16 at the capture rate).
    fn wav_payload(&self) -> Result<String> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| EngineError::Recording(format!("cannot create WAV writer: {e}")))?;
            for &sample in &self.captured {
                let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| EngineError::Recording(format!("WAV write failed: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| EngineError::Recording(format!("WAV finalize failed: {e}")))?;
        }

        Ok(STANDARD.encode(cursor.into_inner()))
    }
}

/// Upload one WAV payload as a complete recording session.
///
/// Returns the server-side session id the transcription poll is keyed by.
pub async fn upload_recording(api: &ApiClient, payload: &str) -> Result<String> {
    let session_id = api.start_recording().await?;
    api.upload_audio(&session_id, payload, 0, true).await?;
    api.complete_recording(&session_id).await?;
    Ok(session_id)
}

/// Poll for the transcription of an uploaded recording.
///
/// Polls at a fixed interval for a bounded number of attempts; exhaustion
/// is a [`EngineError::Timeout`]. Cancellation (new turn, view teardown)
/// aborts between polls.
pub async fn await_transcription(
    api: &ApiClient,
    session_id: &str,
    config: &TranscriptionConfig,
    cancel: &CancellationToken,
) -> Result<String> {
    let interval = Duration::from_millis(config.poll_interval_ms);
    for attempt in 1..=config.max_poll_attempts {
        tokio::select! {
            () = cancel.cancelled() => {
                return Err(EngineError::Recording("transcription cancelled".into()));
            }
            () = tokio::time::sleep(interval) => {}
        }

        match api.poll_transcription(session_id).await? {
            TranscriptionStatus::Completed(text) => {
                info!(%session_id, attempt, "transcription ready");
                return Ok(text);
            }
            TranscriptionStatus::Failed(reason) => {
                warn!(%session_id, "transcription failed: {reason}");
                return Err(EngineError::Recording(reason));
            }
            TranscriptionStatus::Pending => {
                debug!(%session_id, attempt, "transcription pending");
            }
        }
    }

    Err(EngineError::Timeout(format!(
        "transcription not ready after {} attempts",
        config.max_poll_attempts
    )))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::ApiConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_with_audio() -> RecordingSession {
        let mut session = RecordingSession::new(16_000);
        session.start().unwrap();
        session.push_chunk(&[0.0, 0.25, -0.25, 0.5]);
        session
    }

    // ── state machine ─────────────────────────────────────────

    #[test]
    fn start_rejects_while_active() {
        let mut session = RecordingSession::new(16_000);
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(EngineError::Recording(_))
        ));
    }

    #[test]
    fn start_allowed_after_completed_or_failed() {
        let mut session = session_with_audio();
        session.request_stop(true);
        session.finalize().unwrap();
        session.mark_transcribing();
        session.mark_completed();
        assert!(session.start().is_ok());

        session.mark_failed();
        assert!(session.start().is_ok());
    }

    #[test]
    fn stop_while_idle_is_noop() {
        let mut session = RecordingSession::new(16_000);
        session.request_stop(true);
        assert_eq!(session.state(), RecordingState::Idle);
        assert!(session.finalize().unwrap().is_none());
    }

    #[test]
    fn plain_stop_flows_through_preview() {
        let mut session = session_with_audio();
        session.request_stop(false);
        assert_eq!(session.state(), RecordingState::Stopping);

        let outcome = session.finalize().unwrap().unwrap();
        assert_eq!(outcome, FinalizeOutcome::Preview);
        assert_eq!(session.state(), RecordingState::Previewing);

        let payload = session.confirm().unwrap();
        assert!(!payload.is_empty());
        assert_eq!(session.state(), RecordingState::Uploading);
    }

    #[test]
    fn stop_and_send_uploads_on_finalize_not_before() {
        let mut session = session_with_audio();
        session.request_stop(true);
        // Still stopping: the flush has not arrived, no payload yet.
        assert_eq!(session.state(), RecordingState::Stopping);

        // Chunks flushed after the stop request still count.
        session.push_chunk(&[0.1, 0.1]);

        match session.finalize().unwrap().unwrap() {
            FinalizeOutcome::Upload { payload } => assert!(!payload.is_empty()),
            other => panic!("expected upload, got {other:?}"),
        }
        assert_eq!(session.state(), RecordingState::Uploading);
    }

    #[test]
    fn second_stop_upgrades_to_send() {
        let mut session = session_with_audio();
        session.request_stop(false);
        session.request_stop(true);
        assert!(matches!(
            session.finalize().unwrap().unwrap(),
            FinalizeOutcome::Upload { .. }
        ));
    }

    #[test]
    fn discard_returns_to_idle() {
        let mut session = session_with_audio();
        session.request_stop(false);
        session.finalize().unwrap();
        session.discard();
        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.captured_secs(), 0.0);
    }

    #[test]
    fn chunks_outside_recording_are_dropped() {
        let mut session = RecordingSession::new(16_000);
        session.push_chunk(&[0.5; 160]);
        assert_eq!(session.captured_secs(), 0.0);
    }

    // ── payload assembly ──────────────────────────────────────

    #[test]
    fn payload_is_valid_mono_pcm16_wav() {
        let mut session = RecordingSession::new(16_000);
        session.start().unwrap();
        session.push_chunk(&[0.0, 0.5, -0.5]);
        session.request_stop(true);
        let payload = match session.finalize().unwrap().unwrap() {
            FinalizeOutcome::Upload { payload } => payload,
            other => panic!("expected upload, got {other:?}"),
        };

        let bytes = STANDARD.decode(payload).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0);
        assert!((samples[1] - 16383).abs() <= 1);
        assert!((samples[2] + 16383).abs() <= 1);
    }

    // ── upload and poll flow ──────────────────────────────────

    fn fast_poll(max_poll_attempts: u32) -> TranscriptionConfig {
        TranscriptionConfig {
            poll_interval_ms: 1,
            max_poll_attempts,
        }
    }

    async fn mock_upload_endpoints(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/audio/start-recording"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"session_id": "rec-1"})),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio/process-chunk"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio/complete"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn transcription_success_returns_text() {
        let server = MockServer::start().await;
        mock_upload_endpoints(&server).await;
        Mock::given(method("GET"))
            .and(path("/audio/transcription/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "completed", "transcription": "yes please"}),
            ))
            .mount(&server)
            .await;

        let api = ApiClient::new(&ApiConfig {
            base_url: server.uri(),
        });
        let session_id = upload_recording(&api, "UklGRg==").await.unwrap();
        assert_eq!(session_id, "rec-1");
        let text =
            await_transcription(&api, &session_id, &fast_poll(5), &CancellationToken::new())
                .await
                .unwrap();
        assert_eq!(text, "yes please");
    }

    #[tokio::test]
    async fn poll_exhaustion_is_timeout() {
        let server = MockServer::start().await;
        mock_upload_endpoints(&server).await;
        Mock::given(method("GET"))
            .and(path("/audio/transcription/rec-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "processing"})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let api = ApiClient::new(&ApiConfig {
            base_url: server.uri(),
        });
        let session_id = upload_recording(&api, "UklGRg==").await.unwrap();
        let err =
            await_transcription(&api, &session_id, &fast_poll(3), &CancellationToken::new())
                .await
                .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_polling() {
        let server = MockServer::start().await;
        mock_upload_endpoints(&server).await;

        let api = ApiClient::new(&ApiConfig {
            base_url: server.uri(),
        });
        let session_id = upload_recording(&api, "UklGRg==").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = await_transcription(&api, &session_id, &fast_poll(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Recording(_)));
    }
}
