//! Output capture for a single run.
//!
//! Stdout and stderr are accumulated independently, each in arrival order,
//! and only concatenated once the sandbox has terminated. A buffer belongs
//! to exactly one run and is never reused.
//!
//! Stripped ranges: U+0000–U+0009, U+000B–U+000C, U+000E–U+001F and
//! U+007F–U+009F. Newline and carriage return survive, as does all
//! punctuation (a metric like `-1.5e3` must still parse).
//!
//! The C0 range and DEL are removed byte-wise as chunks arrive, which is
//! safe because those bytes never occur inside a multi-byte UTF-8 sequence.
//! C1 controls are encoded as two bytes in UTF-8, so they are removed after
//! decoding, when a chunk boundary can no longer split them.

use crate::runtime::StreamKind;

/// Whether a single byte is a C0 control (other than LF/CR) or DEL.
fn is_stripped_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x09 | 0x0B..=0x0C | 0x0E..=0x1F | 0x7F)
}

/// Whether a decoded character falls in a stripped range.
fn is_stripped_char(c: char) -> bool {
    matches!(
        c,
        '\u{00}'..='\u{09}' | '\u{0B}'..='\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}'..='\u{9F}'
    )
}

/// Remove control characters from already-decoded text.
pub fn sanitize_text(text: &str) -> String {
    text.chars().filter(|c| !is_stripped_char(*c)).collect()
}

/// Per-run accumulator for sandbox output.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk read from `stream`, dropping control bytes.
    pub fn push(&mut self, stream: StreamKind, chunk: &[u8]) {
        let target = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        target.extend(chunk.iter().copied().filter(|b| !is_stripped_byte(*b)));
    }

    /// Sanitized text of one stream.
    pub fn text(&self, stream: StreamKind) -> String {
        let raw = match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        };
        sanitize_text(&String::from_utf8_lossy(raw))
    }

    /// Total bytes retained across both streams.
    pub fn len(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stdout followed by stderr, sanitized.
    pub fn into_combined(self) -> String {
        let mut combined = self.text(StreamKind::Stdout);
        combined.push_str(&self.text(StreamKind::Stderr));
        combined
    }
}
