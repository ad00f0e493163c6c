//! Streaming UTF-8 decoding for captured response bodies.

const REPLACEMENT: char = '\u{FFFD}';

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across chunks is held back until the rest arrives. Invalid
/// sequences decode to U+FFFD, one per maximal invalid subpart.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, appending complete characters to `out`.
    pub fn decode(&mut self, chunk: &[u8], out: &mut String) {
        if self.pending.is_empty() {
            let tail = decode_complete(chunk, out);
            self.pending.extend_from_slice(tail);
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(chunk);
            let tail = decode_complete(&joined, out);
            self.pending = tail.to_vec();
        }
    }

    /// End of stream: a dangling partial sequence becomes one replacement character.
    pub fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.clear();
            out.push(REPLACEMENT);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Decodes everything up to a trailing incomplete sequence and returns that tail.
fn decode_complete<'a>(mut input: &'a [u8], out: &mut String) -> &'a [u8] {
    loop {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                out.push_str(valid);
                return &[];
            }
            Err(err) => {
                let (valid, rest) = input.split_at(err.valid_up_to());
                if let Ok(prefix) = std::str::from_utf8(valid) {
                    out.push_str(prefix);
                }
                match err.error_len() {
                    Some(len) => {
                        out.push(REPLACEMENT);
                        input = &rest[len..];
                    }
                    None => return rest,
                }
            }
        }
    }
}

/// Decode a complete buffer in one go.
pub fn decode_all(bytes: &[u8]) -> String {
    let mut decoder = Utf8StreamDecoder::new();
    let mut out = String::with_capacity(bytes.len());
    decoder.decode(bytes, &mut out);
    decoder.finish(&mut out);
    out
}
