//! Wayfarer: client engine for turn-based voice journeys.
//!
//! A journey server streams back interleaved reply text and synthesized
//! speech. This crate renders the text at a human reading pace, plays
//! the speech gaplessly, records and transcribes the user's spoken
//! replies, and gates journey completion behind an optional feedback
//! step.
//!
//! # Architecture
//!
//! ```text
//! packets ─> ingest ─┬─> text renderer (paced reveal) ──┐
//!                    └─> audio scheduler (gapless)  ────┼─> completion gate
//! mic ─> recording ─> upload ─> transcription poll ─> next turn
//! ```
//!
//! The [`engine::Engine`] owns all of this behind a single event loop;
//! hosts talk to it through an [`engine::EngineHandle`] and react to
//! [`events::EngineEvent`]s.

pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod ingest;
pub mod prefs;
pub mod recording;
pub mod session;
pub mod text;

pub use config::EngineConfig;
pub use engine::{Engine, EngineCommand, EngineHandle, JourneyContext};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSender};
