//! Events emitted by the engine at the UI boundary.
//!
//! The engine never touches the host page directly; every user-visible
//! mutation (revealed text, progress, input locking, notices) is an
//! [`EngineEvent`] delivered on an unbounded channel. The host applies
//! them synchronously in arrival order.

use crate::recording::RecordingState;
use tokio::sync::mpsc;
use tracing::debug;

/// An event the host UI must react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A new partial-HTML snapshot of the current turn's text.
    ///
    /// `preserve_embeds` is set when the snapshot contains the same embed
    /// (video/iframe) source as the previous one, so the host should patch
    /// around the already-loaded element instead of recreating it.
    TextSnapshot {
        /// Well-formed partial HTML; every opened tag is closed.
        html: String,
        /// Patch around loaded embeds instead of replacing them.
        preserve_embeds: bool,
    },
    /// Journey progress, already clamped by the feedback gate.
    Progress { percent: u8 },
    /// Input controls must be disabled (streaming or submission in flight).
    InputsLocked,
    /// Input controls may be re-enabled.
    InputsUnlocked,
    /// The recording session changed state.
    Recording(RecordingState),
    /// A transcription is ready; the text has been placed in the draft input.
    TranscriptionReady { text: String },
    /// A turn input was submitted to the server.
    TurnSubmitted { input: String },
    /// The current turn's text and audio have both finished and the stream
    /// is marked done. `response_id` is the server-side id of the reply,
    /// when the server announced one.
    OutputComplete { response_id: Option<String> },
    /// The optional feedback form should be revealed.
    FeedbackRequested,
    /// The deferred final summary should render now.
    SummaryReady { html: String },
    /// A user-visible inline notice (errors, timeouts).
    Notice { message: String },
}

/// Cloneable sender half of the engine's event channel.
///
/// Emission is infallible from the engine's point of view: if the host
/// dropped the receiver (view torn down), events are discarded.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<EngineEvent>);

impl EventSender {
    /// Create a new event channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Emit an event to the host.
    pub fn emit(&self, event: EngineEvent) {
        if self.0.send(event).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }
}
