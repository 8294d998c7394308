//! Word-rate throttled reveal of streamed markup.
//!
//! Text arrives faster than a person reads. The renderer holds the full
//! raw text, reveals it a few words per tick at the configured rate, and
//! builds a well-formed partial-HTML snapshot for each new word count:
//! tags and whitespace are reproduced verbatim up to the word budget, and
//! any tags still open at the cut are closed innermost-first.

use crate::text::tokenizer::{self, Token};
use crate::text::{ParagraphStyles, format_content};
use std::time::Duration;

/// One rendered frame of the current turn's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Well-formed partial HTML.
    pub html: String,
    /// The snapshot carries the same embed source as the previous one, so
    /// the host should patch around the loaded element.
    pub preserve_embeds: bool,
}

/// Reveals streamed markup at a configured words-per-second pace.
#[derive(Debug)]
pub struct ThrottledRenderer {
    raw_text: String,
    tokens: Vec<Token>,
    displayed_word_count: usize,
    total_word_count: usize,
    /// Fractional word budget accumulated across ticks.
    carry: f64,
    words_per_second: f64,
    styles: Option<ParagraphStyles>,
    last_embed_src: Option<String>,
}

impl ThrottledRenderer {
    pub fn new(words_per_second: f64) -> Self {
        Self {
            raw_text: String::new(),
            tokens: Vec::new(),
            displayed_word_count: 0,
            total_word_count: 0,
            carry: 0.0,
            words_per_second: words_per_second.max(f64::MIN_POSITIVE),
            styles: None,
            last_embed_src: None,
        }
    }

    /// Change the reveal rate mid-stream. Non-positive rates are ignored.
    pub fn set_rate(&mut self, words_per_second: f64) {
        if words_per_second > 0.0 {
            self.words_per_second = words_per_second;
        }
    }

    /// Install the paragraph-class mapping for this turn's text.
    pub fn set_styles(&mut self, styles: ParagraphStyles) {
        self.styles = Some(styles);
        self.retokenize();
    }

    /// Append a text fragment to the turn.
    ///
    /// Returns an immediate snapshot when the content has no words to
    /// meter (markup-only, e.g. a bare video embed), which must show in
    /// full right away rather than wait on a word budget that will never
    /// accrue.
    pub fn append(&mut self, fragment: &str) -> Option<Snapshot> {
        self.raw_text.push_str(fragment);
        self.retokenize();

        if self.total_word_count == 0 && !self.tokens.is_empty() {
            return Some(self.build_snapshot());
        }
        None
    }

    /// Replace the turn's text wholesale and reveal it from the start.
    pub fn replace(&mut self, text: &str) -> Option<Snapshot> {
        self.reset();
        self.append(text)
    }

    /// Clear all state for a new turn.
    pub fn reset(&mut self) {
        self.raw_text.clear();
        self.tokens.clear();
        self.displayed_word_count = 0;
        self.total_word_count = 0;
        self.carry = 0.0;
        self.styles = None;
        self.last_embed_src = None;
    }

    /// Advance the reveal clock by `elapsed`.
    ///
    /// Returns a snapshot only when at least one more word crossed the
    /// budget. The per-tick advance is clamped to half a second's worth of
    /// words (at least one) so a stalled timer catching up cannot dump the
    /// backlog in one frame.
    pub fn tick(&mut self, elapsed: Duration) -> Option<Snapshot> {
        if self.displayed_word_count >= self.total_word_count {
            return None;
        }

        let burst_cap = (self.words_per_second * 0.5).ceil().max(1.0);
        self.carry += (self.words_per_second * elapsed.as_secs_f64()).min(burst_cap);

        let target = (self.carry.floor() as usize).min(self.total_word_count);
        if target > self.displayed_word_count {
            self.displayed_word_count = target;
            return Some(self.build_snapshot());
        }
        None
    }

    /// Whether every word of the current raw text has been revealed.
    pub fn is_complete(&self) -> bool {
        self.displayed_word_count >= self.total_word_count
    }

    pub fn displayed_words(&self) -> usize {
        self.displayed_word_count
    }

    pub fn total_words(&self) -> usize {
        self.total_word_count
    }

    fn retokenize(&mut self) {
        let formatted = format_content(&self.raw_text, self.styles.as_ref());
        self.tokens = tokenizer::tokenize(&formatted);
        self.total_word_count = tokenizer::word_count(&self.tokens);
        // Realign the budget to what is already on screen; fractional
        // progress from before the append does not carry over.
        self.carry = self.displayed_word_count as f64;
    }

    fn build_snapshot(&mut self) -> Snapshot {
        let html = self.build_partial_html();
        let embed_src = find_embed_src(&html);
        let preserve_embeds =
            embed_src.is_some() && embed_src == self.last_embed_src;
        self.last_embed_src = embed_src;
        Snapshot {
            html,
            preserve_embeds,
        }
    }

    /// Emit tokens up to the displayed word budget, then close any open
    /// tags innermost-first.
    fn build_partial_html(&self) -> String {
        let mut html = String::new();
        let mut open_stack: Vec<&str> = Vec::new();
        let mut words_used = 0usize;

        for token in &self.tokens {
            match token {
                Token::Word(w) => {
                    if words_used >= self.displayed_word_count {
                        break;
                    }
                    html.push_str(w);
                    words_used += 1;
                }
                Token::Space(s) => html.push_str(s),
                Token::TagOpen { name, html: tag } => {
                    html.push_str(tag);
                    open_stack.push(name.as_str());
                }
                Token::TagClose { html: tag, .. } => {
                    html.push_str(tag);
                    open_stack.pop();
                }
                Token::TagVoid(tag) => html.push_str(tag),
            }
        }

        for name in open_stack.iter().rev() {
            html.push_str("</");
            html.push_str(name);
            html.push('>');
        }

        html
    }
}

/// Find the `src` of the first video or iframe tag, if any.
fn find_embed_src(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let tag_start = ["<video", "<iframe"]
        .iter()
        .filter_map(|t| lower.find(t))
        .min()?;
    let tag_end = lower[tag_start..].find('>')? + tag_start;
    let tag = &lower[tag_start..tag_end];

    let src_pos = tag.find("src=")?;
    let value = &html[tag_start + src_pos + 4..tag_end];
    let quote = value.chars().next()?;
    if quote == '"' || quote == '\'' {
        let inner = &value[1..];
        let end = inner.find(quote)?;
        Some(inner[..end].to_string())
    } else {
        let end = value.find(char::is_whitespace).unwrap_or(value.len());
        Some(value[..end].to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn tick_ms(r: &mut ThrottledRenderer, ms: u64) -> Option<Snapshot> {
        r.tick(Duration::from_millis(ms))
    }

    // ── pacing ────────────────────────────────────────────────

    #[test]
    fn reveals_words_at_configured_rate() {
        // 2 words/sec, 250 ms ticks: half a word per tick.
        let mut r = ThrottledRenderer::new(2.0);
        assert!(r.append("Hello ").is_none());

        assert!(tick_ms(&mut r, 250).is_none()); // carry 0.5
        let snap = tick_ms(&mut r, 250).unwrap(); // carry 1.0
        assert_eq!(snap.html, "<p>Hello </p>");
        assert!(r.is_complete());

        // More text arrives mid-stream; already-shown words stay shown.
        assert!(r.append("world").is_none());
        assert!(!r.is_complete());
        assert!(tick_ms(&mut r, 250).is_none());
        let snap = tick_ms(&mut r, 250).unwrap();
        assert_eq!(snap.html, "<p>Hello world</p>");
        assert!(r.is_complete());
    }

    #[test]
    fn no_snapshot_without_new_whole_word() {
        let mut r = ThrottledRenderer::new(3.0);
        r.append("one two three");
        // 3 wps * 100 ms = 0.3 words; not enough.
        assert!(tick_ms(&mut r, 100).is_none());
        assert!(tick_ms(&mut r, 100).is_none());
        assert!(tick_ms(&mut r, 100).is_none());
        let snap = tick_ms(&mut r, 100).unwrap();
        assert_eq!(snap.html, "<p>one </p>");
    }

    #[test]
    fn stalled_timer_catchup_is_capped() {
        // 4 wps with a 10 s gap would owe 40 words; the cap holds it to
        // ceil(4 * 0.5) = 2 per tick.
        let mut r = ThrottledRenderer::new(4.0);
        r.append("a b c d e f g h");
        let snap = tick_ms(&mut r, 10_000).unwrap();
        assert_eq!(r.displayed_words(), 2);
        assert_eq!(snap.html, "<p>a b </p>");
    }

    #[test]
    fn reveal_never_exceeds_available_words() {
        let mut r = ThrottledRenderer::new(100.0);
        r.append("just two");
        // One giant tick; budget is clamped to the total.
        for _ in 0..10 {
            tick_ms(&mut r, 1_000);
        }
        assert_eq!(r.displayed_words(), 2);
        assert!(r.is_complete());
    }

    #[test]
    fn append_realigns_fractional_budget() {
        let mut r = ThrottledRenderer::new(2.0);
        r.append("alpha beta");
        tick_ms(&mut r, 250); // carry 0.5
        r.append(" gamma");
        // Carry snapped back to displayed (0); the old half word is gone,
        // so the first word needs two fresh quarter-second ticks again.
        assert!(tick_ms(&mut r, 250).is_none());
        let snap = tick_ms(&mut r, 250).unwrap();
        assert_eq!(snap.html, "<p>alpha </p>");
    }

    // ── partial markup ────────────────────────────────────────

    #[test]
    fn partial_snapshots_close_open_tags() {
        let mut r = ThrottledRenderer::new(1.0);
        r.append("<p>one <em>two three</em></p>");
        // Tags already opened before the cutoff word stay in the output
        // and are closed empty.
        let snap = tick_ms(&mut r, 2_000).unwrap(); // capped to 1 word
        assert_eq!(snap.html, "<p>one <em></em></p>");

        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<p>one <em>two </em></p>");

        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<p>one <em>two three</em></p>");
    }

    #[test]
    fn nested_tags_closed_innermost_first() {
        let mut r = ThrottledRenderer::new(1.0);
        r.append("<div><p><b>deep word</b></p></div>");
        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<div><p><b>deep </b></p></div>");
    }

    #[test]
    fn void_elements_pass_through_uncounted() {
        let mut r = ThrottledRenderer::new(1.0);
        r.append("<p>a<br>b</p>");
        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<p>a<br></p>");
    }

    // ── markup-only content ───────────────────────────────────

    #[test]
    fn markup_only_content_shows_immediately() {
        let mut r = ThrottledRenderer::new(2.0);
        let snap = r.append(r#"<video src="clip.mp4"></video>"#).unwrap();
        assert_eq!(snap.html, r#"<video src="clip.mp4"></video>"#);
        assert!(r.is_complete());
    }

    // ── embed preservation ────────────────────────────────────

    #[test]
    fn repeated_embed_src_sets_preserve_flag() {
        let mut r = ThrottledRenderer::new(1.0);
        r.append(r#"<video src="clip.mp4"></video><p>one two</p>"#);
        let first = tick_ms(&mut r, 1_000).unwrap();
        assert!(!first.preserve_embeds);
        let second = tick_ms(&mut r, 1_000).unwrap();
        assert!(second.preserve_embeds);
    }

    #[test]
    fn changed_embed_src_clears_preserve_flag() {
        let mut r = ThrottledRenderer::new(2.0);
        let first = r.replace(r#"<iframe src="a.html"></iframe>"#).unwrap();
        assert!(!first.preserve_embeds);
        // New turn, different embed.
        let second = r.replace(r#"<iframe src="b.html"></iframe>"#).unwrap();
        assert!(!second.preserve_embeds);
    }

    // ── plain text formatting ─────────────────────────────────

    #[test]
    fn plain_text_is_wrapped_in_paragraphs() {
        let mut r = ThrottledRenderer::new(10.0);
        r.append("hello there");
        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<p>hello there</p>");
    }

    #[test]
    fn styles_apply_to_metered_output() {
        let mut r = ThrottledRenderer::new(10.0);
        let mut styles = ParagraphStyles::new();
        styles.insert("0".into(), "lead".into());
        r.set_styles(styles);
        r.append("styled text");
        let snap = tick_ms(&mut r, 1_000).unwrap();
        assert_eq!(snap.html, "<p class=\"lead\">styled text</p>");
    }

    // ── reset and replace ─────────────────────────────────────

    #[test]
    fn reset_clears_everything() {
        let mut r = ThrottledRenderer::new(2.0);
        r.append("some words here");
        tick_ms(&mut r, 1_000);
        r.reset();
        assert_eq!(r.displayed_words(), 0);
        assert_eq!(r.total_words(), 0);
        assert!(r.is_complete());
    }

    #[test]
    fn replace_reveals_from_the_start() {
        let mut r = ThrottledRenderer::new(2.0);
        r.append("old content entirely");
        tick_ms(&mut r, 2_000);
        r.replace("fresh words");
        assert_eq!(r.displayed_words(), 0);
        assert!(tick_ms(&mut r, 250).is_none());
        let snap = tick_ms(&mut r, 250).unwrap();
        assert_eq!(snap.html, "<p>fresh </p>");
    }
}
