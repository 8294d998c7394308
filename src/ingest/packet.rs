//! The logical packet envelope carried by both transports.

use serde::{Deserialize, Serialize};

/// Discriminant of a streamed packet.
///
/// Closed enum: a packet type this client does not understand maps to
/// [`PacketKind::Unknown`] and is dropped by the dispatcher, so new server
/// types can ship without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// Marked-up text fragment for the current reply.
    #[serde(alias = "response_text")]
    Text,
    /// Base64 PCM16 speech chunk.
    #[serde(alias = "response_audio")]
    Audio,
    /// Journey progress percentage.
    Progress,
    /// Server signaled end-of-turn.
    Complete,
    /// Paragraph-class mapping for incoming text.
    Styles,
    /// Step metadata for display; not interpreted by the engine.
    StepInfo,
    /// Server-side id of the reply being streamed.
    Jsrid,
    /// Anything this client does not recognize.
    #[serde(other)]
    Unknown,
}

/// A packet as delivered by either transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet discriminant.
    #[serde(rename = "type")]
    pub kind: PacketKind,
    /// Payload; meaning depends on `kind`.
    #[serde(default)]
    pub message: String,
    /// Ordinal position within the turn, when the transport supplies one.
    ///
    /// Channel-delivered `Text`/`Audio` packets with `index <= 0` are
    /// priming noise and never reach the session.
    #[serde(default)]
    pub index: Option<i64>,
}

impl Packet {
    /// Whether this packet is channel priming noise (`index <= 0`).
    ///
    /// Packets without an index are not priming: the event-stream
    /// transport does not carry ordinals at all.
    pub fn is_priming(&self) -> bool {
        matches!(self.index, Some(i) if i <= 0)
    }
}
