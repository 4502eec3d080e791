//! Sentence segmentation for streamed generation output
//!
//! Tokens arrive a few characters at a time. The segmenter buffers them and
//! hands back speakable units as soon as a sentence closes, so synthesis of
//! the first sentence can start while the rest is still generating.

/// Characters that close a sentence
pub const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Characters allowed after a terminator without hiding it (`."`, `?)`)
const CLOSERS: [char; 6] = ['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

/// A speakable unit of generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position within the response, starting at zero
    pub index: usize,

    /// Trimmed, non-empty text
    pub text: String,
}

/// Accumulates tokens and emits complete sentences
///
/// One instance per response.
#[derive(Debug, Default)]
pub struct TextSegmenter {
    buffer: String,
    next_index: usize,
    max_chars: Option<usize>,
}

impl TextSegmenter {
    /// Create a segmenter that only splits on sentence terminators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a segmenter that also splits long unpunctuated runs
    ///
    /// Once the buffer holds `max_chars` characters, the next token ending in
    /// whitespace closes the segment.
    #[must_use]
    pub fn with_max_chars(max_chars: Option<usize>) -> Self {
        Self {
            max_chars: max_chars.filter(|&n| n > 0),
            ..Self::default()
        }
    }

    /// Feed one token, returning any segments it completed
    pub fn feed(&mut self, token: &str) -> Vec<Segment> {
        if token.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(token);

        let closes = ends_sentence(token)
            || self.max_chars.is_some_and(|max| {
                token.ends_with(char::is_whitespace) && self.buffer.chars().count() >= max
            });

        if closes {
            self.take_segment().into_iter().collect()
        } else {
            Vec::new()
        }
    }

    /// Flush whatever is left at end of stream
    pub fn flush(&mut self) -> Option<Segment> {
        self.take_segment()
    }

    /// Text buffered but not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn take_segment(&mut self) -> Option<Segment> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();

        if text.is_empty() {
            return None;
        }

        let segment = Segment {
            index: self.next_index,
            text,
        };
        self.next_index += 1;
        tracing::trace!(index = segment.index, text = %segment.text, "segment complete");
        Some(segment)
    }
}

/// Whether a token ends with a sentence terminator
///
/// Trailing whitespace and closing quotes or brackets are skipped.
fn ends_sentence(token: &str) -> bool {
    token
        .trim_end()
        .trim_end_matches(CLOSERS)
        .ends_with(TERMINATORS)
}
