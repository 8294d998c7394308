//! Packet ingest and dispatch.
//!
//! Packets reach the engine from two transports: a push channel (voice
//! mode), where packets arrive pre-framed, and a line-oriented event
//! stream (chat mode), decoded by [`stream::FrameParser`]. Both carry the
//! same logical envelope ([`packet::Packet`]); [`route`] turns it into
//! the action the engine should take.
//!
//! The push channel is assumed reliable and in-order by the transport
//! itself; this layer only filters priming noise (`index <= 0`) and does
//! not attempt gap recovery or reordering for `index > 0`.

pub mod packet;
pub mod stream;

pub use packet::{Packet, PacketKind};
pub use stream::{FrameParser, StreamItem};

use crate::text::ParagraphStyles;
use tracing::{debug, warn};

/// The dispatch decision for one packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Append this fragment to the current turn's raw text.
    Text(String),
    /// Queue this base64 PCM16 payload for playback.
    Audio { payload: String },
    /// Set the journey progress percentage.
    Progress(u8),
    /// The server marked the stream complete.
    Complete,
    /// Install a paragraph-class mapping for subsequent text.
    Styles(ParagraphStyles),
    /// Remember the server-side id of the streaming reply.
    ResponseId(String),
    /// Nothing to do (priming noise, unknown type, unparseable payload).
    Ignored,
}

/// Decide what to do with one packet.
///
/// Never fails: anything malformed or unrecognized routes to
/// [`Routed::Ignored`] with a log entry, per the containment policy.
pub fn route(packet: Packet) -> Routed {
    match packet.kind {
        PacketKind::Text | PacketKind::Audio if packet.is_priming() => {
            debug!(index = ?packet.index, "discarding priming packet");
            Routed::Ignored
        }
        PacketKind::Text => Routed::Text(packet.message),
        PacketKind::Audio => Routed::Audio {
            payload: packet.message,
        },
        PacketKind::Progress => match parse_percent(&packet.message) {
            Some(pct) => Routed::Progress(pct),
            None => {
                debug!("ignoring non-numeric progress payload: {:?}", packet.message);
                Routed::Ignored
            }
        },
        PacketKind::Complete => Routed::Complete,
        PacketKind::Styles => match serde_json::from_str::<ParagraphStyles>(&packet.message) {
            Ok(styles) => Routed::Styles(styles),
            Err(e) => {
                warn!("ignoring malformed styles payload: {e}");
                Routed::Ignored
            }
        },
        PacketKind::Jsrid => {
            if packet.message.is_empty() {
                Routed::Ignored
            } else {
                Routed::ResponseId(packet.message)
            }
        }
        PacketKind::StepInfo | PacketKind::Unknown => Routed::Ignored,
    }
}

/// Parse a progress payload; accepts both `"42"` and `"42%"`.
fn parse_percent(message: &str) -> Option<u8> {
    let trimmed = message.trim().trim_end_matches('%').trim();
    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).round() as u8)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn packet(kind: PacketKind, message: &str, index: Option<i64>) -> Packet {
        Packet {
            kind,
            message: message.into(),
            index,
        }
    }

    // ── priming filter ────────────────────────────────────────

    #[test]
    fn priming_text_and_audio_ignored() {
        assert_eq!(
            route(packet(PacketKind::Text, "noise", Some(0))),
            Routed::Ignored
        );
        assert_eq!(
            route(packet(PacketKind::Audio, "AAA=", Some(-1))),
            Routed::Ignored
        );
    }

    #[test]
    fn priming_filter_applies_only_to_text_and_audio() {
        // A complete packet with a bogus index still dispatches.
        assert_eq!(
            route(packet(PacketKind::Complete, "", Some(0))),
            Routed::Complete
        );
    }

    #[test]
    fn indexless_text_dispatches() {
        // Event-stream frames carry no ordinal.
        assert_eq!(
            route(packet(PacketKind::Text, "Hello", None)),
            Routed::Text("Hello".into())
        );
    }

    // ── per-kind routing ──────────────────────────────────────

    #[test]
    fn audio_routes_with_payload() {
        assert_eq!(
            route(packet(PacketKind::Audio, "UEsD", Some(3))),
            Routed::Audio {
                payload: "UEsD".into()
            }
        );
    }

    #[test]
    fn progress_accepts_bare_and_percent_forms() {
        assert_eq!(route(packet(PacketKind::Progress, "42", None)), Routed::Progress(42));
        assert_eq!(
            route(packet(PacketKind::Progress, "42%", None)),
            Routed::Progress(42)
        );
        assert_eq!(
            route(packet(PacketKind::Progress, " 99.6 ", None)),
            Routed::Progress(100)
        );
    }

    #[test]
    fn progress_clamps_out_of_range() {
        assert_eq!(
            route(packet(PacketKind::Progress, "250", None)),
            Routed::Progress(100)
        );
        assert_eq!(
            route(packet(PacketKind::Progress, "-5", None)),
            Routed::Progress(0)
        );
    }

    #[test]
    fn progress_non_numeric_ignored() {
        assert_eq!(
            route(packet(PacketKind::Progress, "soon", None)),
            Routed::Ignored
        );
    }

    #[test]
    fn styles_parse_to_mapping() {
        let routed = route(packet(PacketKind::Styles, r#"{"0":"lead","1":"quote"}"#, None));
        match routed {
            Routed::Styles(map) => {
                assert_eq!(map.get("0").map(String::as_str), Some("lead"));
                assert_eq!(map.get("1").map(String::as_str), Some("quote"));
            }
            other => panic!("expected styles, got {other:?}"),
        }
    }

    #[test]
    fn malformed_styles_ignored() {
        assert_eq!(
            route(packet(PacketKind::Styles, "not json", None)),
            Routed::Ignored
        );
    }

    #[test]
    fn jsrid_routes_response_id() {
        assert_eq!(
            route(packet(PacketKind::Jsrid, "587", None)),
            Routed::ResponseId("587".into())
        );
        assert_eq!(route(packet(PacketKind::Jsrid, "", None)), Routed::Ignored);
    }

    #[test]
    fn unknown_and_stepinfo_ignored() {
        assert_eq!(route(packet(PacketKind::Unknown, "x", None)), Routed::Ignored);
        assert_eq!(
            route(packet(PacketKind::StepInfo, "Step 2/5", None)),
            Routed::Ignored
        );
    }
}
