//! Audio playback and capture.
//!
//! The playback half decodes base64 PCM16 speech chunks and schedules
//! them gaplessly on an output sink; the capture half records the
//! microphone at the transcription rate for the recording session.

pub mod capture;
pub mod decode;
pub mod output;
pub mod scheduler;

pub use capture::MicCapture;
pub use decode::{decode_pcm16_base64, duration_secs};
pub use output::CpalSink;
pub use scheduler::{OutputSink, PlaybackScheduler};
