//! Gapless playback scheduling.
//!
//! Speech arrives as short PCM chunks with network jitter between them.
//! Played naively back-to-back on arrival, the jitter becomes audible
//! gaps. The scheduler instead keeps a running anchor: each chunk starts
//! at `max(now, end of previous chunk)`, so consecutive chunks are
//! sample-exact contiguous whenever the stream keeps up, and playback
//! resumes immediately (never in the past) after a stall.

use crate::audio::decode::duration_secs;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Callback invoked when a scheduled buffer finishes playing.
pub type EndCallback = Box<dyn FnOnce() + Send>;

/// Where scheduled audio actually goes.
///
/// The production implementation renders through the default output
/// device; tests substitute a sink with a manual clock.
pub trait OutputSink: Send {
    /// Current position of the playback clock, in seconds.
    fn now(&self) -> f64;
    /// Schedule a buffer to begin at `start_at` on the playback clock.
    /// `on_end` fires once the buffer has fully played.
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64, on_end: EndCallback) -> Result<()>;
    /// Drop all scheduled buffers, firing their end callbacks.
    fn clear(&mut self);
    /// Output gain, 0.0 to 1.0.
    fn set_gain(&mut self, gain: f32);
}

/// Schedules decoded speech chunks for gapless playback.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    sample_rate: u32,
    /// End of the last scheduled chunk; `None` until the turn's first chunk.
    next_start: Option<f64>,
    active: Arc<AtomicUsize>,
    ended_tx: mpsc::UnboundedSender<()>,
}

impl PlaybackScheduler {
    /// Create a scheduler over `sink`. Finished-buffer notifications are
    /// delivered on the returned receiver so the engine loop can re-check
    /// turn completion.
    pub fn new(
        sink: Box<dyn OutputSink>,
        sample_rate: u32,
    ) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        (
            Self {
                sink,
                sample_rate,
                next_start: None,
                active: Arc::new(AtomicUsize::new(0)),
                ended_tx,
            },
            ended_rx,
        )
    }

    /// Queue one decoded chunk. Empty chunks are dropped.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let now = self.sink.now();
        let start = match self.next_start {
            Some(next) => next.max(now),
            None => now,
        };
        self.next_start = Some(start + duration_secs(&samples, self.sample_rate));

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let ended_tx = self.ended_tx.clone();
        self.sink.schedule(
            samples,
            start,
            Box::new(move || {
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = ended_tx.send(());
            }),
        )
    }

    /// Whether every scheduled chunk has finished playing.
    pub fn is_drained(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }

    /// Number of chunks scheduled but not yet finished.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Mute or unmute playback without touching the schedule.
    pub fn set_muted(&mut self, muted: bool) {
        self.sink.set_gain(if muted { 0.0 } else { 1.0 });
    }

    /// Drop anything still scheduled and start the next turn from a fresh
    /// anchor.
    pub fn reset(&mut self) {
        self.sink.clear();
        self.next_start = None;
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("sample_rate", &self.sample_rate)
            .field("next_start", &self.next_start)
            .field("active", &self.active_count())
            .finish()
    }
}
