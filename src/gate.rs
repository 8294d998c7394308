//! Turn completion and the feedback gate.
//!
//! A turn's output is complete only when three independent signals agree:
//! every word of the reply has been revealed, all scheduled audio has
//! finished, and the server marked the stream done. The completion gate
//! latches that conjunction so downstream effects (unlock, feedback
//! reveal, deferred summary) fire exactly once per turn.

/// The three signals that make up output completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionInputs {
    /// Every word of the current reply is on screen.
    pub text_complete: bool,
    /// No scheduled audio chunk is still queued or playing.
    pub audio_drained: bool,
    /// The server sent its end-of-turn marker.
    pub stream_complete: bool,
}

/// Once-per-turn latch over [`CompletionInputs`].
#[derive(Debug, Default)]
pub struct CompletionGate {
    fired: bool,
}

impl CompletionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-evaluate on a contributing state change. Returns `true` exactly
    /// once per turn, the first time all three signals hold.
    pub fn evaluate(&mut self, inputs: CompletionInputs) -> bool {
        if self.fired {
            return false;
        }
        if inputs.text_complete && inputs.audio_drained && inputs.stream_complete {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Re-arm for a new turn.
    pub fn reset(&mut self) {
        self.fired = false;
    }
}

/// Withholds 100% completion until optional end-of-journey feedback is in.
///
/// While blocking, the reported progress is clamped below 100% and the
/// session is read-only apart from the feedback form.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackGate {
    awaiting_feedback: bool,
    submitted: bool,
}

/// Progress ceiling while feedback is outstanding.
const CLAMPED_PROGRESS: u8 = 95;

impl FeedbackGate {
    pub fn new(awaiting_feedback: bool) -> Self {
        Self {
            awaiting_feedback,
            submitted: false,
        }
    }

    /// Whether the gate is currently holding completion back.
    pub fn is_blocking(&self) -> bool {
        self.awaiting_feedback && !self.submitted
    }

    /// Clamp a progress value under the gate.
    pub fn clamp_progress(&self, percent: u8) -> u8 {
        if self.is_blocking() {
            percent.min(CLAMPED_PROGRESS)
        } else {
            percent
        }
    }

    /// Feedback was accepted by the server.
    pub fn mark_submitted(&mut self) {
        self.submitted = true;
    }

    pub fn awaiting_feedback(&self) -> bool {
        self.awaiting_feedback
    }
}
