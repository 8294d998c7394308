//! Line-oriented event-stream transport (chat mode).
//!
//! Frames are UTF-8, separated by a blank line; each payload line is
//! prefixed with `data:` and JSON-encoded as a [`Packet`]. The literal
//! `[DONE]` payload terminates the stream with no further action.
//!
//! ```text
//! data: {"type":"text","message":"Hello"}
//!
//! data: {"type":"complete","message":""}
//!
//! data: [DONE]
//! ```

use crate::ingest::packet::Packet;
use tracing::warn;

/// One decoded item from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A decoded packet to dispatch.
    Packet(Packet),
    /// The `[DONE]` sentinel; the stream is over.
    Done,
}

/// Internal state for assembling one frame from its lines.
#[derive(Debug, Default)]
struct FrameBuilder {
    data_lines: Vec<String>,
}

impl FrameBuilder {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    /// Process one line. Returns a finished item at a frame boundary.
    fn process_line(&mut self, line: &str) -> Option<StreamItem> {
        // Blank line = frame boundary.
        if line.is_empty() {
            if self.has_data() {
                return self.build();
            }
            return None;
        }

        // Comment line.
        if line.starts_with(':') {
            return None;
        }

        if let Some((field, value)) = parse_field(line)
            && field == "data"
        {
            self.data_lines.push(value.to_string());
        }
        // `event:` and unknown fields are ignored.

        None
    }

    fn build(&mut self) -> Option<StreamItem> {
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();

        if payload.trim() == "[DONE]" {
            return Some(StreamItem::Done);
        }

        match serde_json::from_str::<Packet>(&payload) {
            Ok(packet) => Some(StreamItem::Packet(packet)),
            Err(e) => {
                // Malformed payloads are dropped; they never abort the stream.
                warn!("dropping malformed stream frame ({} bytes): {e}", payload.len());
                None
            }
        }
    }
}

/// Parse a line into (field, value). A single leading space after the colon
/// is stripped.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let colon_pos = line.find(':')?;
    let field = &line[..colon_pos];
    let mut value = &line[colon_pos + 1..];
    if value.starts_with(' ') {
        value = &value[1..];
    }
    Some((field, value))
}

/// Incremental frame parser fed from the response byte stream.
///
/// Push chunks of bytes as they arrive; complete items are returned as
/// soon as their frame boundary is seen. Once [`StreamItem::Done`] has
/// been emitted the parser yields nothing further.
#[derive(Debug, Default)]
pub struct FrameParser {
    line_buffer: String,
    builder: FrameBuilder,
    done: bool,
}

impl FrameParser {
    /// Create a new incremental parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning all items completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        if self.done {
            return Vec::new();
        }

        let text = String::from_utf8_lossy(chunk);
        let mut items = Vec::new();

        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buffer);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(item) = self.builder.process_line(line) {
                    if matches!(item, StreamItem::Done) {
                        self.done = true;
                        items.push(item);
                        return items;
                    }
                    items.push(item);
                }
            } else {
                self.line_buffer.push(ch);
            }
        }

        items
    }

    /// Flush a trailing frame that never saw its blank-line boundary.
    pub fn flush(&mut self) -> Option<StreamItem> {
        if self.done {
            return None;
        }
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.builder.process_line(line);
        }
        if self.builder.has_data() {
            self.builder.build()
        } else {
            None
        }
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::ingest::packet::PacketKind;

    fn packet(item: &StreamItem) -> &Packet {
        match item {
            StreamItem::Packet(p) => p,
            StreamItem::Done => panic!("expected packet, got Done"),
        }
    }

    // ── frame assembly ────────────────────────────────────────

    #[test]
    fn single_frame_parses() {
        let mut parser = FrameParser::new();
        let items = parser.push(b"data: {\"type\":\"text\",\"message\":\"Hello\"}\n\n");
        assert_eq!(items.len(), 1);
        let p = packet(&items[0]);
        assert_eq!(p.kind, PacketKind::Text);
        assert_eq!(p.message, "Hello");
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: {\"type\":\"te").is_empty());
        let items = parser.push(b"xt\",\"message\":\"hi\"}\n\n");
        assert_eq!(items.len(), 1);
        assert_eq!(packet(&items[0]).message, "hi");
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut parser = FrameParser::new();
        let items = parser.push(
            b"data: {\"type\":\"text\",\"message\":\"a\"}\n\ndata: {\"type\":\"text\",\"message\":\"b\"}\n\n",
        );
        assert_eq!(items.len(), 2);
        assert_eq!(packet(&items[0]).message, "a");
        assert_eq!(packet(&items[1]).message, "b");
    }

    #[test]
    fn crlf_lines_handled() {
        let mut parser = FrameParser::new();
        let items = parser.push(b"data: {\"type\":\"complete\",\"message\":\"\"}\r\n\r\n");
        assert_eq!(items.len(), 1);
        assert_eq!(packet(&items[0]).kind, PacketKind::Complete);
    }

    #[test]
    fn multi_line_data_joined() {
        let mut parser = FrameParser::new();
        // JSON split across two data lines within one frame.
        let items =
            parser.push(b"data: {\"type\":\"text\",\ndata: \"message\":\"x\"}\n\n");
        assert_eq!(items.len(), 1);
        assert_eq!(packet(&items[0]).message, "x");
    }

    // ── sentinel and termination ──────────────────────────────

    #[test]
    fn done_sentinel_terminates() {
        let mut parser = FrameParser::new();
        let items = parser.push(b"data: [DONE]\n\n");
        assert_eq!(items, vec![StreamItem::Done]);
        assert!(parser.is_done());
    }

    #[test]
    fn nothing_after_done() {
        let mut parser = FrameParser::new();
        let items =
            parser.push(b"data: [DONE]\n\ndata: {\"type\":\"text\",\"message\":\"late\"}\n\n");
        assert_eq!(items, vec![StreamItem::Done]);
        assert!(parser.push(b"data: {\"type\":\"complete\"}\n\n").is_empty());
    }

    // ── malformed input ───────────────────────────────────────

    #[test]
    fn malformed_json_dropped_stream_continues() {
        let mut parser = FrameParser::new();
        let items = parser.push(b"data: {not json}\n\ndata: {\"type\":\"complete\"}\n\n");
        assert_eq!(items.len(), 1);
        assert_eq!(packet(&items[0]).kind, PacketKind::Complete);
    }

    #[test]
    fn comments_and_event_fields_ignored() {
        let mut parser = FrameParser::new();
        let items = parser.push(
            b": keepalive\nevent: chunk\ndata: {\"type\":\"text\",\"message\":\"ok\"}\n\n",
        );
        assert_eq!(items.len(), 1);
        assert_eq!(packet(&items[0]).message, "ok");
    }

    #[test]
    fn flush_emits_trailing_frame() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: {\"type\":\"text\",\"message\":\"tail\"}").is_empty());
        let item = parser.flush().unwrap();
        assert_eq!(packet(&item).message, "tail");
    }

    #[test]
    fn flush_empty_is_none() {
        let mut parser = FrameParser::new();
        assert!(parser.flush().is_none());
    }
}
