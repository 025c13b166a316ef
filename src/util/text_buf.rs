/*!
Growable text accumulator used wherever the gateway assembles wire or page text.

Appends are amortized O(1) (the backing `Vec` doubles). An optional ceiling turns the
buffer into a bounded sink: bytes past the limit are dropped and `truncated()` reports it,
so callers can keep draining a peer without buffering unbounded output.
*/

use std::fmt;
use std::io;

#[derive(Debug, Default, Clone)]
pub struct TextBuf {
    bytes: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl TextBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
            ..Self::default()
        }
    }

    /// Bounded buffer: at most `limit` bytes are retained.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit: Some(limit),
            truncated: false,
        }
    }

    pub fn push_bytes(&mut self, b: &[u8]) {
        let take = match self.limit {
            Some(limit) => {
                let room = limit.saturating_sub(self.bytes.len());
                if b.len() > room {
                    self.truncated = true;
                }
                room.min(b.len())
            }
            None => b.len(),
        };
        self.bytes.extend_from_slice(&b[..take]);
    }

    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    pub fn push_byte(&mut self, b: u8) {
        self.push_bytes(&[b]);
    }

    pub fn push_char(&mut self, c: char) {
        let mut tmp = [0u8; 4];
        self.push_str(c.encode_utf8(&mut tmp));
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True once any append was cut short by the ceiling.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lossy view of the contents (invalid UTF-8 replaced).
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Hand out the accumulated bytes and reset to empty. The ceiling, if any, is kept.
    pub fn take(&mut self) -> Vec<u8> {
        self.truncated = false;
        std::mem::take(&mut self.bytes)
    }

    /// Like `take`, decoding as UTF-8 (lossy).
    pub fn take_string(&mut self) -> String {
        match String::from_utf8(self.take()) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

impl fmt::Write for TextBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl io::Write for TextBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Report the full length even when truncating so writers keep draining.
        self.push_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
