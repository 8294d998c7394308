//! HTML-aware word tokenizer.
//!
//! Splits marked-up reply text into tags, words, and whitespace runs so the
//! renderer can meter out words while keeping the markup structure intact.
//! This is not a general HTML parser: tags are treated as opaque spans from
//! `<` to the next `>`, which is all the server-produced markup needs.

/// Elements that never take a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
];

/// One lexical unit of marked-up text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A maximal run of non-whitespace text.
    Word(String),
    /// A maximal run of whitespace, reproduced verbatim.
    Space(String),
    /// An opening tag; `html` is the verbatim source span.
    TagOpen { name: String, html: String },
    /// A closing tag.
    TagClose { name: String, html: String },
    /// A self-contained tag: void element, explicit `/>`, comment, doctype.
    TagVoid(String),
}

/// Tokenize marked-up text into tags, words, and whitespace.
pub fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = html;

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => match rest.find('>') {
                Some(end) => {
                    tokens.push(classify_tag(&rest[..=end]));
                    rest = &rest[end + 1..];
                }
                None => {
                    // Unterminated tag: treat the remainder as text.
                    push_text(&mut tokens, rest);
                    break;
                }
            },
            Some(pos) => {
                push_text(&mut tokens, &rest[..pos]);
                rest = &rest[pos..];
            }
            None => {
                push_text(&mut tokens, rest);
                break;
            }
        }
    }

    tokens
}

/// Count the word tokens in a token stream.
pub fn word_count(tokens: &[Token]) -> usize {
    tokens.iter().filter(|t| matches!(t, Token::Word(_))).count()
}

fn classify_tag(span: &str) -> Token {
    let inner = &span[1..span.len() - 1];

    if inner.starts_with('!') || inner.starts_with('?') {
        return Token::TagVoid(span.to_string());
    }

    if let Some(rest) = inner.strip_prefix('/') {
        return Token::TagClose {
            name: tag_name(rest),
            html: span.to_string(),
        };
    }

    let name = tag_name(inner);
    if inner.trim_end().ends_with('/') || VOID_ELEMENTS.contains(&name.as_str()) {
        return Token::TagVoid(span.to_string());
    }

    Token::TagOpen {
        name,
        html: span.to_string(),
    }
}

fn tag_name(inner: &str) -> String {
    inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Split a text run into alternating Word/Space tokens.
fn push_text(tokens: &mut Vec<Token>, text: &str) {
    let mut chars = text.char_indices().peekable();
    while let Some(&(start, first)) = chars.peek() {
        let in_space = first.is_whitespace();
        let mut end = text.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() != in_space {
                end = i;
                break;
            }
            chars.next();
        }
        let run = text[start..end].to_string();
        tokens.push(if in_space {
            Token::Space(run)
        } else {
            Token::Word(run)
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn plain_words_and_spaces() {
        let tokens = tokenize("Hello  world");
        assert_eq!(
            tokens,
            vec![
                Token::Word("Hello".into()),
                Token::Space("  ".into()),
                Token::Word("world".into()),
            ]
        );
        assert_eq!(word_count(&tokens), 2);
    }

    #[test]
    fn open_and_close_tags() {
        let tokens = tokenize("<p>Hi</p>");
        assert_eq!(
            tokens,
            vec![
                Token::TagOpen {
                    name: "p".into(),
                    html: "<p>".into()
                },
                Token::Word("Hi".into()),
                Token::TagClose {
                    name: "p".into(),
                    html: "</p>".into()
                },
            ]
        );
    }

    #[test]
    fn attributes_kept_verbatim() {
        let tokens = tokenize(r#"<p class="lead">x</p>"#);
        assert_eq!(
            tokens[0],
            Token::TagOpen {
                name: "p".into(),
                html: r#"<p class="lead">"#.into()
            }
        );
    }

    #[test]
    fn void_elements_need_no_close() {
        assert_eq!(tokenize("<br>"), vec![Token::TagVoid("<br>".into())]);
        assert_eq!(tokenize("<hr/>"), vec![Token::TagVoid("<hr/>".into())]);
        assert_eq!(
            tokenize(r#"<img src="a.png">"#),
            vec![Token::TagVoid(r#"<img src="a.png">"#.into())]
        );
    }

    #[test]
    fn self_closing_non_void_is_void() {
        assert_eq!(
            tokenize("<custom />"),
            vec![Token::TagVoid("<custom />".into())]
        );
    }

    #[test]
    fn comments_and_doctype_are_void() {
        assert_eq!(
            tokenize("<!-- note -->"),
            vec![Token::TagVoid("<!-- note -->".into())]
        );
        assert_eq!(
            tokenize("<!DOCTYPE html>"),
            vec![Token::TagVoid("<!DOCTYPE html>".into())]
        );
    }

    #[test]
    fn tag_names_lowercased() {
        let tokens = tokenize("<DIV></DIV>");
        assert_eq!(
            tokens,
            vec![
                Token::TagOpen {
                    name: "div".into(),
                    html: "<DIV>".into()
                },
                Token::TagClose {
                    name: "div".into(),
                    html: "</DIV>".into()
                },
            ]
        );
    }

    #[test]
    fn unterminated_tag_treated_as_text() {
        let tokens = tokenize("oops <b");
        assert_eq!(
            tokens,
            vec![
                Token::Word("oops".into()),
                Token::Space(" ".into()),
                Token::Word("<b".into()),
            ]
        );
    }

    #[test]
    fn words_inside_nested_markup_counted() {
        let tokens = tokenize("<p>one <em>two</em> three</p>");
        assert_eq!(word_count(&tokens), 3);
    }
}
