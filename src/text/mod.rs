//! Throttled text rendering.
//!
//! Incoming reply text is HTML-bearing and arrives at network speed; the
//! renderer reveals it word-by-word at a configured human reading pace,
//! emitting partial-HTML snapshots that are always well-formed.

pub mod renderer;
pub mod tokenizer;

pub use renderer::{Snapshot, ThrottledRenderer};
pub use tokenizer::{Token, tokenize, word_count};

use std::collections::HashMap;

/// Paragraph index (as a string key) to CSS class mapping, pushed by the
/// server in a `styles` packet.
pub type ParagraphStyles = HashMap<String, String>;

/// Format a streamed reply for display.
///
/// Content that already looks like HTML is left untouched. Plain text is
/// split into paragraphs on blank lines, HTML-escaped, single newlines
/// become `<br>`, and each paragraph picks up the class mapped to its
/// index in `styles`.
pub fn format_content(content: &str, styles: Option<&ParagraphStyles>) -> String {
    if looks_like_html(content) {
        return content.to_string();
    }

    let mut out = Vec::new();
    for (i, paragraph) in split_paragraphs(content).iter().enumerate() {
        let body = paragraph
            .lines()
            .map(escape_html)
            .collect::<Vec<_>>()
            .join("<br>");
        let class = styles.and_then(|map| map.get(&i.to_string()));
        match class {
            Some(class) if !class.is_empty() => {
                out.push(format!("<p class=\"{}\">{body}</p>", escape_html(class)));
            }
            _ => out.push(format!("<p>{body}</p>")),
        }
    }
    out.join("\n")
}

/// Whether the content already carries markup (tag followed by a letter
/// or a closing slash).
fn looks_like_html(content: &str) -> bool {
    let bytes = content.as_bytes();
    bytes.windows(2).any(|pair| {
        pair[0] == b'<' && (pair[1].is_ascii_alphabetic() || pair[1] == b'/')
    })
}

/// Split on blank lines (one or more empty lines, tolerating `\r\n`).
fn split_paragraphs(content: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut blank_run = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            blank_run = true;
            continue;
        }
        if blank_run && !current.is_empty() {
            paragraphs.push(std::mem::take(&mut current));
        }
        blank_run = false;
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
