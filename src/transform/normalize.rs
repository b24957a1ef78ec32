//! Text normalization: collapse whitespace, trim, cap length.

use super::{Document, DocumentTransform};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Decode UTF-8, dropping invalid byte sequences instead of replacing them.
pub fn decode_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// Unicode whitespace plus the ASCII information separators U+001C..=U+001F.
fn is_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Replace every whitespace run with a single space and trim both ends.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split(is_space).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Keep at most `max_chars` characters.
pub fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}

/// Normalizes raw documents for the summarization stage.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_chars: usize,
}

impl Normalizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Normalize a raw body.
    pub fn apply(&self, raw: &[u8]) -> String {
        truncate_chars(normalize_text(&decode_text(raw)), self.max_chars)
    }
}

#[async_trait]
impl DocumentTransform for Normalizer {
    fn name(&self) -> &str {
        "normalize"
    }

    async fn transform(&self, input: Document) -> Result<Document> {
        let text = self.apply(&input.body);
        Ok(Document {
            body: Bytes::from(text),
            metadata: input.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_text("Hello   world"), "Hello world");
        assert_eq!(normalize_text("  a\t\tb\r\n\nc  "), "a b c");
        assert_eq!(normalize_text("   "), "");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_normalize_information_separators() {
        assert_eq!(normalize_text("a\u{1c}b\u{1d}\u{1e}c\u{1f}"), "a b c");
        assert_eq!(normalize_text("\u{1f} x \u{a0}y\u{85}"), "x y");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("héllo".to_string(), 2), "hé");
        assert_eq!(truncate_chars("abc".to_string(), 10), "abc");
        assert_eq!(truncate_chars("abc".to_string(), 3), "abc");
        assert_eq!(truncate_chars("abc".to_string(), 0), "");
    }

    #[test]
    fn test_decode_drops_invalid_bytes() {
        assert_eq!(decode_text(b"ab\xffcd"), "abcd");
        assert_eq!(decode_text("ünï".as_bytes()), "ünï");
    }

    #[test]
    fn test_normalizer_apply() {
        let normalizer = Normalizer::new(8);
        assert_eq!(normalizer.apply(b"  Hello \n\n  world  "), "Hello wo");
    }

    #[tokio::test]
    async fn test_transform_preserves_metadata() {
        let mut input = Document::new("a   b");
        input.metadata.insert("lang".to_string(), "en".to_string());

        let output = Normalizer::new(8000).transform(input).await.unwrap();
        assert_eq!(output.body.as_ref(), b"a b");
        assert_eq!(output.metadata.get("lang").map(String::as_str), Some("en"));
    }
}
