//! The journey engine's event loop.
//!
//! One task owns all mutable state and interleaves five inputs with
//! `select!`: host commands, incoming packets, the pacing clock, finished
//! audio buffers, and results from spawned side tasks (turn streams,
//! capture, transcription). Network calls and capture run as spawned
//! tasks that report back over the internal channel, so no component
//! ever blocks the loop; there is no shared-state locking because only
//! this task mutates.

use crate::api::ApiClient;
use crate::audio::capture::MicCapture;
use crate::audio::decode::decode_pcm16_base64;
use crate::audio::output::CpalSink;
use crate::audio::scheduler::{OutputSink, PlaybackScheduler};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventSender};
use crate::ingest::{FrameParser, Packet, Routed, StreamItem, route};
use crate::prefs::Preferences;
use crate::recording::{
    FinalizeOutcome, RecordingSession, RecordingState, await_transcription, upload_recording,
};
use crate::session::StreamSession;
use crate::text::Snapshot;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Instructions from the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Kick off the journey's first turn without user input.
    StartJourney,
    /// Submit typed (or transcribed) text as the next turn.
    SubmitText { input: String },
    /// Start a microphone recording.
    StartRecording,
    /// Stop the recording; `send` skips the preview and uploads directly.
    StopRecording { send: bool },
    /// Upload the previewed recording.
    ConfirmRecording,
    /// Throw the previewed recording away.
    DiscardRecording,
    /// Submit end-of-journey feedback.
    SubmitFeedback { rating: u8, comments: String },
    /// Mute or unmute playback.
    SetMuted { muted: bool },
    /// Re-reveal stored reply text through the normal throttle path.
    ReplayReplyText { html: String },
    /// Replay the speech of the last completed reply.
    ReplayLastReply,
    /// Tear the engine down.
    Shutdown,
}

/// Journey-level facts the host knows at page load.
#[derive(Debug, Clone)]
pub struct JourneyContext {
    /// Attempt identifier every outbound call is keyed by.
    pub attempt_id: String,
    /// The journey asks for feedback before it may read 100% complete.
    pub awaiting_feedback: bool,
    /// Final summary to render once the journey completes, if any.
    pub summary_html: Option<String>,
}

/// Cloneable handle for feeding the engine from outside its task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    packets: mpsc::UnboundedSender<Packet>,
}

impl EngineHandle {
    /// Send a command; silently dropped if the engine has shut down.
    pub fn command(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            debug!("engine gone; dropping command");
        }
    }

    /// Push a packet from the channel transport (voice mode).
    pub fn push_packet(&self, packet: Packet) {
        if self.packets.send(packet).is_err() {
            debug!("engine gone; dropping packet");
        }
    }
}

/// Results reported back by spawned side tasks.
#[derive(Debug)]
enum InternalMsg {
    /// A turn's network exchange failed.
    TurnFailed(String),
    /// The turn's event stream ended ([DONE] or EOF).
    StreamClosed,
    /// One converted capture chunk.
    CaptureChunk(Vec<f32>),
    /// The capture stream flushed its last chunk and closed.
    CaptureFinalized,
    /// The capture stream died.
    CaptureFailed(String),
    /// The recording hard-timeout elapsed.
    RecordingTimeout,
    /// The WAV payload was fully uploaded; polling begins.
    UploadDone,
    /// The transcription poll finished.
    TranscriptionDone(Result<String>),
    /// The feedback submission round trip finished.
    FeedbackDone(Result<()>),
    /// The replay fetch round trip finished.
    ReplayFetched(Result<Vec<String>>),
    /// The pause between transcription delivery and auto-submit elapsed.
    AutoSubmit(String),
    /// The post-completion settle delay elapsed.
    SettleElapsed,
}

/// The engine. Owns every piece of per-journey state; consumed by
/// [`run`](Engine::run).
pub struct Engine {
    config: EngineConfig,
    api: ApiClient,
    events: EventSender,

    session: StreamSession,
    scheduler: PlaybackScheduler,
    recording: RecordingSession,
    feedback: crate::gate::FeedbackGate,
    journey: JourneyContext,

    muted: bool,
    inputs_locked: bool,

    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    packet_rx: mpsc::UnboundedReceiver<Packet>,
    packet_tx: mpsc::UnboundedSender<Packet>,
    internal_rx: mpsc::UnboundedReceiver<InternalMsg>,
    internal_tx: mpsc::UnboundedSender<InternalMsg>,
    ended_rx: mpsc::UnboundedReceiver<()>,

    /// Cancels the current turn's stream task and poll loop.
    turn_cancel: CancellationToken,
    /// Cancels the live capture stream and its hard-timeout.
    capture_cancel: Option<CancellationToken>,
}

impl Engine {
    /// Build an engine over an explicit output sink.
    pub fn new(
        config: EngineConfig,
        journey: JourneyContext,
        sink: Box<dyn OutputSink>,
        events: EventSender,
    ) -> (Self, EngineHandle) {
        let api = ApiClient::new(&config.api);
        let (mut scheduler, ended_rx) =
            PlaybackScheduler::new(sink, config.audio.sample_rate);

        let muted = Preferences::default_path()
            .and_then(|path| Preferences::load_from(&path).ok())
            .unwrap_or_default()
            .muted;
        scheduler.set_muted(muted);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let handle = EngineHandle {
            commands: command_tx,
            packets: packet_tx.clone(),
        };

        let engine = Self {
            session: StreamSession::new(config.text.words_per_second),
            recording: RecordingSession::new(config.recording.capture_sample_rate),
            feedback: crate::gate::FeedbackGate::new(journey.awaiting_feedback),
            api,
            events,
            journey,
            muted,
            inputs_locked: false,
            scheduler,
            command_rx,
            packet_rx,
            packet_tx,
            internal_rx,
            internal_tx,
            ended_rx,
            turn_cancel: CancellationToken::new(),
            capture_cancel: None,
            config,
        };
        (engine, handle)
    }

    /// Build an engine rendering through the system output device.
    pub fn with_speaker_output(
        config: EngineConfig,
        journey: JourneyContext,
        events: EventSender,
    ) -> Result<(Self, EngineHandle)> {
        let sink = CpalSink::new(&config.audio)?;
        Ok(Self::new(config, journey, Box::new(sink), events))
    }

    /// Run until shutdown. Everything the engine does happens on this
    /// task; side tasks only report back through channels.
    pub async fn run(mut self) {
        let tick = Duration::from_millis(self.config.effective_tick_interval_ms());
        let mut pacing = tokio::time::interval(tick);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();

        info!("journey engine running (attempt {})", self.journey.attempt_id);

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    if command == EngineCommand::Shutdown {
                        break;
                    }
                    self.handle_command(command);
                }
                Some(packet) = self.packet_rx.recv() => self.handle_packet(packet),
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                Some(()) = self.ended_rx.recv() => self.check_completion(),
                _ = pacing.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;
                    self.handle_tick(elapsed);
                }
            }
        }

        self.turn_cancel.cancel();
        if let Some(cancel) = self.capture_cancel.take() {
            cancel.cancel();
        }
        info!("journey engine stopped");
    }

    // ── commands ──────────────────────────────────────────────

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::StartJourney => self.begin_push_turn("Start".into()),
            EngineCommand::SubmitText { input } => self.begin_stream_turn(input),
            EngineCommand::StartRecording => self.start_recording(),
            EngineCommand::StopRecording { send } => self.stop_recording(send),
            EngineCommand::ConfirmRecording => self.confirm_recording(),
            EngineCommand::DiscardRecording => self.discard_recording(),
            EngineCommand::SubmitFeedback { rating, comments } => {
                self.submit_feedback(rating, comments);
            }
            EngineCommand::SetMuted { muted } => self.set_muted(muted),
            EngineCommand::ReplayReplyText { html } => self.replay_reply_text(&html),
            EngineCommand::ReplayLastReply => self.replay_last_reply(),
            // Intercepted by the run loop before dispatch.
            EngineCommand::Shutdown => {}
        }
    }

    // ── turns ─────────────────────────────────────────────────

    /// Reset per-turn state; a stale pacing tick or poll loop from the
    /// previous turn must never touch the new one.
    fn reset_turn(&mut self) {
        self.turn_cancel.cancel();
        self.turn_cancel = CancellationToken::new();
        self.session.begin_turn();
        self.scheduler.reset();
        self.lock_inputs();
    }

    /// Start a turn whose reply arrives over the push channel.
    fn begin_push_turn(&mut self, input: String) {
        self.reset_turn();
        self.events
            .emit(EngineEvent::TurnSubmitted { input: input.clone() });

        let api = self.api.clone();
        let attempt_id = self.journey.attempt_id.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = api.start_turn(&attempt_id, &input).await {
                let _ = internal.send(InternalMsg::TurnFailed(e.to_string()));
            }
        });
    }

    /// Start a turn whose reply streams back on the submit response.
    fn begin_stream_turn(&mut self, input: String) {
        self.reset_turn();
        self.events
            .emit(EngineEvent::TurnSubmitted { input: input.clone() });

        let api = self.api.clone();
        let attempt_id = self.journey.attempt_id.clone();
        let packets = self.packet_tx.clone();
        let internal = self.internal_tx.clone();
        let cancel = self.turn_cancel.clone();

        tokio::spawn(async move {
            let mut stream = match api.submit_turn(&attempt_id, &input).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = internal.send(InternalMsg::TurnFailed(e.to_string()));
                    return;
                }
            };

            let mut parser = FrameParser::new();
            loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => return,
                    chunk = stream.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        for item in parser.push(&bytes) {
                            match item {
                                StreamItem::Packet(packet) => {
                                    let _ = packets.send(packet);
                                }
                                StreamItem::Done => {
                                    let _ = internal.send(InternalMsg::StreamClosed);
                                    return;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = internal
                            .send(InternalMsg::TurnFailed(format!("reply stream error: {e}")));
                        return;
                    }
                    None => {
                        if let Some(StreamItem::Packet(packet)) = parser.flush() {
                            let _ = packets.send(packet);
                        }
                        let _ = internal.send(InternalMsg::StreamClosed);
                        return;
                    }
                }
            }
        });
    }

    // ── packet dispatch ───────────────────────────────────────

    fn handle_packet(&mut self, packet: Packet) {
        match route(packet) {
            Routed::Text(fragment) => {
                if let Some(snapshot) = self.session.append_text(&fragment) {
                    self.emit_snapshot(snapshot);
                }
            }
            Routed::Audio { payload } => match decode_pcm16_base64(&payload) {
                Ok(samples) => {
                    if let Err(e) = self.scheduler.enqueue(samples) {
                        warn!("cannot schedule audio chunk: {e}");
                    }
                }
                // A bad chunk is dropped; it never stalls the queue.
                Err(e) => warn!("dropping undecodable audio chunk: {e}"),
            },
            Routed::Progress(percent) => {
                self.session.set_progress(percent);
                self.emit_progress(percent);
            }
            Routed::Complete => {
                self.session.mark_stream_complete();
                self.check_completion();
            }
            Routed::Styles(styles) => self.session.set_styles(styles),
            Routed::ResponseId(id) => self.session.set_response_id(id),
            Routed::Ignored => {}
        }
    }

    // ── pacing ────────────────────────────────────────────────

    fn handle_tick(&mut self, elapsed: Duration) {
        if let Some(snapshot) = self.session.tick(elapsed) {
            let text_complete = self.session.text_complete();
            self.emit_snapshot(snapshot);
            if text_complete {
                self.check_completion();
            }
        }
    }

    // ── completion ────────────────────────────────────────────

    fn check_completion(&mut self) {
        if !self
            .session
            .evaluate_completion(self.scheduler.is_drained())
        {
            return;
        }

        self.events.emit(EngineEvent::OutputComplete {
            response_id: self.session.response_id().map(str::to_string),
        });

        if self.feedback.is_blocking() {
            self.events.emit(EngineEvent::FeedbackRequested);
        } else {
            self.unlock_inputs();
            self.schedule_summary();
        }
    }

    /// Render the deferred summary after the settle delay, unless a new
    /// turn begins first.
    fn schedule_summary(&mut self) {
        if self.journey.summary_html.is_none() {
            return;
        }
        let internal = self.internal_tx.clone();
        let cancel = self.turn_cancel.clone();
        let delay = Duration::from_millis(self.config.text.settle_delay_ms);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = internal.send(InternalMsg::SettleElapsed);
                }
            }
        });
    }

    // ── recording ─────────────────────────────────────────────

    fn start_recording(&mut self) {
        if let Err(e) = self.recording.start() {
            self.events.emit(EngineEvent::Notice {
                message: e.to_string(),
            });
            return;
        }

        let capture = match MicCapture::new(&self.config.recording) {
            Ok(capture) => capture,
            Err(e) => {
                warn!("cannot open microphone: {e}");
                self.recording.discard();
                self.events
                    .emit(EngineEvent::Recording(RecordingState::Idle));
                self.events.emit(EngineEvent::Notice {
                    message: e.to_string(),
                });
                return;
            }
        };

        // Silence playback while the mic is open; scheduled buffers keep
        // playing into the muted gain stage rather than being discarded.
        self.scheduler.set_muted(true);
        self.lock_inputs();
        self.events
            .emit(EngineEvent::Recording(RecordingState::Recording));

        let cancel = CancellationToken::new();
        self.capture_cancel = Some(cancel.clone());

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<f32>>(64);

        // Forwarder: capture chunks, then exactly one finalize once the
        // capture side closes the channel. Ordering matters: the finalize
        // must trail the last chunk.
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let _ = internal.send(InternalMsg::CaptureChunk(chunk));
            }
            let _ = internal.send(InternalMsg::CaptureFinalized);
        });

        let internal = self.internal_tx.clone();
        let capture_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = capture.run(chunk_tx, capture_cancel).await {
                let _ = internal.send(InternalMsg::CaptureFailed(e.to_string()));
            }
        });

        // Hard timeout: force a stop-and-send if the user never stops.
        let internal = self.internal_tx.clone();
        let timeout = Duration::from_secs(self.config.recording.max_duration_secs);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    let _ = internal.send(InternalMsg::RecordingTimeout);
                }
            }
        });
    }

    fn stop_recording(&mut self, send: bool) {
        self.recording.request_stop(send);
        if self.recording.state() == RecordingState::Stopping {
            self.events
                .emit(EngineEvent::Recording(RecordingState::Stopping));
            if let Some(cancel) = self.capture_cancel.take() {
                cancel.cancel();
            }
        }
    }

    fn finish_capture(&mut self) {
        match self.recording.finalize() {
            Ok(Some(FinalizeOutcome::Upload { payload })) => self.start_upload(payload),
            Ok(Some(FinalizeOutcome::Preview)) => {
                self.events
                    .emit(EngineEvent::Recording(RecordingState::Previewing));
            }
            Ok(None) => {}
            Err(e) => self.fail_recording(e.to_string()),
        }
    }

    fn confirm_recording(&mut self) {
        match self.recording.confirm() {
            Ok(payload) => self.start_upload(payload),
            Err(e) => self.events.emit(EngineEvent::Notice {
                message: e.to_string(),
            }),
        }
    }

    fn discard_recording(&mut self) {
        if let Some(cancel) = self.capture_cancel.take() {
            cancel.cancel();
        }
        self.recording.discard();
        self.scheduler.set_muted(self.muted);
        self.events
            .emit(EngineEvent::Recording(RecordingState::Idle));
        self.unlock_inputs();
    }

    fn start_upload(&mut self, payload: String) {
        self.events
            .emit(EngineEvent::Recording(RecordingState::Uploading));

        let api = self.api.clone();
        let config = self.config.transcription.clone();
        let internal = self.internal_tx.clone();
        let cancel = self.turn_cancel.clone();
        tokio::spawn(async move {
            let session_id = match upload_recording(&api, &payload).await {
                Ok(id) => id,
                Err(e) => {
                    let _ = internal.send(InternalMsg::TranscriptionDone(Err(e)));
                    return;
                }
            };
            let _ = internal.send(InternalMsg::UploadDone);
            let result = await_transcription(&api, &session_id, &config, &cancel).await;
            let _ = internal.send(InternalMsg::TranscriptionDone(result));
        });
    }

    fn fail_recording(&mut self, message: String) {
        warn!("recording failed: {message}");
        self.recording.mark_failed();
        self.scheduler.set_muted(self.muted);
        self.events
            .emit(EngineEvent::Recording(RecordingState::Failed));
        self.events.emit(EngineEvent::Notice { message });
        self.unlock_inputs();
    }

    // ── internal messages ─────────────────────────────────────

    fn handle_internal(&mut self, message: InternalMsg) {
        match message {
            InternalMsg::TurnFailed(msg) => {
                warn!("turn failed: {msg}");
                self.events.emit(EngineEvent::Notice { message: msg });
                self.unlock_inputs();
            }
            InternalMsg::StreamClosed => self.check_completion(),
            InternalMsg::CaptureChunk(samples) => self.recording.push_chunk(&samples),
            InternalMsg::CaptureFinalized => self.finish_capture(),
            InternalMsg::CaptureFailed(msg) => self.fail_recording(msg),
            InternalMsg::RecordingTimeout => {
                if self.recording.state() == RecordingState::Recording {
                    self.events.emit(EngineEvent::Notice {
                        message: format!(
                            "recording stopped after {} seconds",
                            self.config.recording.max_duration_secs
                        ),
                    });
                    self.stop_recording(true);
                }
            }
            InternalMsg::UploadDone => {
                // Ignore a late upload result if the session was discarded
                // in the meantime.
                if self.recording.state() == RecordingState::Uploading {
                    self.recording.mark_transcribing();
                    self.events
                        .emit(EngineEvent::Recording(RecordingState::Transcribing));
                }
            }
            InternalMsg::TranscriptionDone(Ok(text)) => {
                self.recording.mark_completed();
                self.scheduler.set_muted(self.muted);
                self.events
                    .emit(EngineEvent::Recording(RecordingState::Completed));
                self.events.emit(EngineEvent::TranscriptionReady {
                    text: text.clone(),
                });
                // Transcribed speech becomes the next turn, after a short
                // pause so the host can show it in the input first.
                let internal = self.internal_tx.clone();
                let delay = Duration::from_millis(self.config.text.settle_delay_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(InternalMsg::AutoSubmit(text));
                });
            }
            InternalMsg::TranscriptionDone(Err(e)) => self.fail_recording(e.to_string()),
            InternalMsg::FeedbackDone(Ok(())) => {
                self.feedback.mark_submitted();
                self.session.set_progress(100);
                self.events.emit(EngineEvent::Progress { percent: 100 });
                self.unlock_inputs();
                if let Some(html) = self.journey.summary_html.clone() {
                    self.events.emit(EngineEvent::SummaryReady { html });
                }
            }
            InternalMsg::FeedbackDone(Err(e)) => self.events.emit(EngineEvent::Notice {
                message: e.to_string(),
            }),
            InternalMsg::ReplayFetched(Ok(chunks)) => {
                self.scheduler.reset();
                for chunk in chunks {
                    match decode_pcm16_base64(&chunk) {
                        Ok(samples) => {
                            if let Err(e) = self.scheduler.enqueue(samples) {
                                warn!("cannot schedule replay chunk: {e}");
                            }
                        }
                        Err(e) => warn!("dropping undecodable replay chunk: {e}"),
                    }
                }
            }
            InternalMsg::ReplayFetched(Err(e)) => self.events.emit(EngineEvent::Notice {
                message: e.to_string(),
            }),
            InternalMsg::AutoSubmit(text) => self.begin_stream_turn(text),
            InternalMsg::SettleElapsed => {
                if !self.feedback.is_blocking()
                    && let Some(html) = self.journey.summary_html.clone()
                {
                    self.events.emit(EngineEvent::SummaryReady { html });
                }
            }
        }
    }

    // ── feedback ──────────────────────────────────────────────

    /// Submit feedback off-loop; the result comes back as
    /// [`InternalMsg::FeedbackDone`] so packets and the pacing clock keep
    /// flowing during the round trip.
    fn submit_feedback(&mut self, rating: u8, comments: String) {
        let api = self.api.clone();
        let attempt_id = self.journey.attempt_id.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.submit_feedback(&attempt_id, rating, &comments).await;
            let _ = internal.send(InternalMsg::FeedbackDone(result));
        });
    }

    // ── playback controls ─────────────────────────────────────

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        // While recording, the echo guard owns the gain stage; the user's
        // choice applies once the mic closes.
        if !matches!(
            self.recording.state(),
            RecordingState::Recording | RecordingState::Stopping
        ) {
            self.scheduler.set_muted(muted);
        }
    }

    /// Re-reveal a stored reply at reading pace, as if it had just
    /// streamed in.
    fn replay_reply_text(&mut self, html: &str) {
        if let Some(snapshot) = self.session.replace_text(html) {
            self.emit_snapshot(snapshot);
        }
    }

    /// Fetch a past reply's speech off-loop; the chunks come back as
    /// [`InternalMsg::ReplayFetched`] and are scheduled from there.
    fn replay_last_reply(&mut self) {
        let Some(response_id) = self.session.response_id().map(str::to_string) else {
            self.events.emit(EngineEvent::Notice {
                message: "nothing to replay yet".into(),
            });
            return;
        };

        let api = self.api.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_reply_audio(&response_id).await;
            let _ = internal.send(InternalMsg::ReplayFetched(result));
        });
    }

    // ── UI locking ────────────────────────────────────────────

    fn lock_inputs(&mut self) {
        if !self.inputs_locked {
            self.inputs_locked = true;
            self.events.emit(EngineEvent::InputsLocked);
        }
    }

    fn unlock_inputs(&mut self) {
        if self.inputs_locked {
            self.inputs_locked = false;
            self.events.emit(EngineEvent::InputsUnlocked);
        }
    }

    fn emit_snapshot(&mut self, snapshot: Snapshot) {
        self.events.emit(EngineEvent::TextSnapshot {
            html: snapshot.html,
            preserve_embeds: snapshot.preserve_embeds,
        });
    }

    fn emit_progress(&mut self, percent: u8) {
        self.events.emit(EngineEvent::Progress {
            percent: self.feedback.clamp_progress(percent),
        });
    }
}
