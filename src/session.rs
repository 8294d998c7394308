//! Per-turn stream state.
//!
//! Exactly one [`StreamSession`] is live at a time. It owns the
//! throttled renderer for the turn's text, the server-side completion
//! marker, and the once-per-turn completion latch; the audio side is
//! tracked by the scheduler and joined in at evaluation time.

use crate::gate::{CompletionGate, CompletionInputs};
use crate::text::{ParagraphStyles, Snapshot, ThrottledRenderer};
use std::time::Duration;

/// State for one turn-exchange with the server.
#[derive(Debug)]
pub struct StreamSession {
    renderer: ThrottledRenderer,
    stream_complete: bool,
    response_id: Option<String>,
    progress: u8,
    gate: CompletionGate,
}

impl StreamSession {
    pub fn new(words_per_second: f64) -> Self {
        Self {
            renderer: ThrottledRenderer::new(words_per_second),
            stream_complete: false,
            response_id: None,
            progress: 0,
            gate: CompletionGate::new(),
        }
    }

    /// Discard the previous turn's state and start fresh.
    pub fn begin_turn(&mut self) {
        self.renderer.reset();
        self.stream_complete = false;
        self.response_id = None;
        self.gate.reset();
    }

    // ── text ──────────────────────────────────────────────────

    pub fn append_text(&mut self, fragment: &str) -> Option<Snapshot> {
        self.renderer.append(fragment)
    }

    pub fn replace_text(&mut self, text: &str) -> Option<Snapshot> {
        self.renderer.replace(text)
    }

    pub fn set_styles(&mut self, styles: ParagraphStyles) {
        self.renderer.set_styles(styles);
    }

    pub fn set_reveal_rate(&mut self, words_per_second: f64) {
        self.renderer.set_rate(words_per_second);
    }

    /// Advance the pacing clock; forwards to the renderer.
    pub fn tick(&mut self, elapsed: Duration) -> Option<Snapshot> {
        self.renderer.tick(elapsed)
    }

    pub fn text_complete(&self) -> bool {
        self.renderer.is_complete()
    }

    // ── stream markers ────────────────────────────────────────

    pub fn mark_stream_complete(&mut self) {
        self.stream_complete = true;
    }

    pub fn stream_complete(&self) -> bool {
        self.stream_complete
    }

    pub fn set_response_id(&mut self, id: String) {
        self.response_id = Some(id);
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn set_progress(&mut self, percent: u8) {
        self.progress = percent;
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    // ── completion ────────────────────────────────────────────

    /// Re-evaluate output completion against the audio side's drain
    /// state. Returns `true` exactly once per turn.
    pub fn evaluate_completion(&mut self, audio_drained: bool) -> bool {
        self.gate.evaluate(CompletionInputs {
            text_complete: self.renderer.is_complete(),
            audio_drained,
            stream_complete: self.stream_complete,
        })
    }

    pub fn output_complete(&self) -> bool {
        self.gate.has_fired()
    }
}
