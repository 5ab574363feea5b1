//! Token streaming
//!
//! The worker thread reports generated text piece by piece.

/// A piece of output emitted while a completion runs.
#[derive(Debug, Clone)]
pub enum StreamToken {
    /// A decoded text fragment
    Token(String),
    /// Generation completed successfully
    Done,
    /// Generation failed
    Error(String),
}

impl StreamToken {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamToken::Done)
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            StreamToken::Token(s) => Some(s),
            _ => None,
        }
    }
}

/// Reassembles UTF-8 text from raw token bytes.
///
/// A multi-byte character may be split across tokens; incomplete trailing
/// bytes are held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and returns whatever prefix is now valid text
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);

        let valid_len = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) => match e.error_len() {
                // Genuinely invalid bytes, not just an unfinished sequence
                Some(bad) => {
                    let end = e.valid_up_to() + bad;
                    let text = String::from_utf8_lossy(&self.pending[..end]).into_owned();
                    self.pending.drain(..end);
                    return non_empty(text);
                }
                None => e.valid_up_to(),
            },
        };

        let rest = self.pending.split_off(valid_len);
        let text = String::from_utf8(std::mem::replace(&mut self.pending, rest))
            .unwrap_or_default();
        non_empty(text)
    }

    /// Flushes remaining bytes, replacing anything incomplete
    pub fn finish(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.pending);
        non_empty(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
