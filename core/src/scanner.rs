//! Incremental tokenizer for the runtime's diagnostic stream.
//!
//! Tokens are lines, with one twist: the permission prompt ends in
//! [`PROMPT_TERMINATOR`] and then waits for input without ever sending a
//! newline, so a buffered tail that contains the full terminator is emitted
//! as a token too. Without that rule the scanner would starve waiting for a
//! newline the prompt will never send.

use crate::prompt::PROMPT_TERMINATOR;

/// Chunk-size-independent splitter: feed arbitrary slices with [`push`],
/// drain complete tokens with [`next_token`], and flush the final partial
/// token with [`finish`] at end of stream.
///
/// [`push`]: StderrScanner::push
/// [`next_token`]: StderrScanner::next_token
/// [`finish`]: StderrScanner::finish
#[derive(Debug, Default)]
pub struct StderrScanner {
    buf: Vec<u8>,
}

impl StderrScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete token, if one is buffered. A token ends at a newline
    /// (trailing carriage return trimmed) or exactly at the prompt
    /// terminator. The terminator may have arrived split across pushes; it
    /// is only recognizable once fully buffered, which is what makes the
    /// output independent of input chunking.
    pub fn next_token(&mut self) -> Option<String> {
        if let Some(i) = self.buf.iter().position(|&b| b == b'\n') {
            let token = token_text(&self.buf[..i]);
            self.buf.drain(..=i);
            return Some(token);
        }

        let needle = PROMPT_TERMINATOR.as_bytes();
        if let Some(i) = find(&self.buf, needle) {
            let end = i + needle.len();
            let token = token_text(&self.buf[..end]);
            self.buf.drain(..end);
            return Some(token);
        }

        None
    }

    /// Remaining partial bytes at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let token = token_text(&self.buf);
        self.buf.clear();
        Some(token)
    }
}

fn token_text(bytes: &[u8]) -> String {
    let bytes = match bytes {
        [head @ .., b'\r'] => head,
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
