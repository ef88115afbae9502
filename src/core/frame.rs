//! Frame extraction from noisy serial output
//!
//! The device prints log lines, boot chatter and occasionally corrupted bytes
//! around its JSON payloads. A [`FrameExtractor`] accumulates decoded text and
//! hands it to a [`FrameFormat`], which decides when a frame may be complete,
//! strips characters that can never be part of one and parses the payload.

use serde::de::DeserializeOwned;

use crate::core::error::{ProtocolError, ProtocolResult};

/// Streaming UTF-8 decoder
///
/// A multi-byte character split across two chunks is carried over instead of
/// being decoded as garbage. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    rest = &[];
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more bytes
                            self.pending = tail.to_vec();
                            rest = &[];
                        }
                    }
                }
            }
        }
        out
    }
}

/// Keep printable ASCII plus CR and LF
pub fn sanitize_serial_text(text: &str) -> String {
    text.chars()
        .filter(|c| matches!(c, ' '..='~' | '\r' | '\n'))
        .collect()
}

/// Framing rules for one kind of device response
pub trait FrameFormat {
    /// Cheap structural hint that the buffer may hold a whole frame
    fn is_complete(&self, text: &str) -> bool;

    /// Remove characters a frame never contains
    fn sanitize(&self, text: &str) -> String {
        sanitize_serial_text(text)
    }

    /// Parse the frame out of sanitized text
    fn parse<T: DeserializeOwned>(&self, sanitized: &str) -> ProtocolResult<T>;
}

/// A single JSON object, possibly surrounded by chatter
///
/// Candidates run from a `{` through a `}` and must parse with nothing left
/// over. Closing braces are tried from the last one backwards and opening
/// braces from the first one forwards, so a `{}` logged ahead of the payload
/// never shadows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonObjectFrame;

impl FrameFormat for JsonObjectFrame {
    fn is_complete(&self, text: &str) -> bool {
        text.contains('}')
    }

    fn parse<T: DeserializeOwned>(&self, sanitized: &str) -> ProtocolResult<T> {
        let opens: Vec<usize> = sanitized.match_indices('{').map(|(i, _)| i).collect();
        let mut last_error = None;

        for (end, _) in sanitized.rmatch_indices('}') {
            for &start in opens.iter().take_while(|&&start| start < end) {
                match serde_json::from_str::<T>(&sanitized[start..=end]) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        last_error.get_or_insert_with(|| e.to_string());
                    }
                }
            }
        }

        Err(ProtocolError::Parse(
            last_error.unwrap_or_else(|| "no JSON object in buffer".to_string()),
        ))
    }
}

/// A JSON array, parsed from the first `[` to the last `]`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayFrame;

impl FrameFormat for JsonArrayFrame {
    fn is_complete(&self, text: &str) -> bool {
        text.contains(']')
    }

    fn parse<T: DeserializeOwned>(&self, sanitized: &str) -> ProtocolResult<T> {
        let (Some(start), Some(end)) = (sanitized.find('['), sanitized.rfind(']')) else {
            return Err(ProtocolError::Parse("no JSON array in buffer".to_string()));
        };
        if end < start {
            return Err(ProtocolError::Parse(
                "array closes before it opens".to_string(),
            ));
        }

        serde_json::from_str(sanitized[start..=end].trim())
            .map_err(|e| ProtocolError::Parse(e.to_string()))
    }
}

/// Accumulates decoded serial output until a frame can be parsed
#[derive(Debug)]
pub struct FrameExtractor<F> {
    format: F,
    decoder: Utf8StreamDecoder,
    buffer: String,
}

impl<F: FrameFormat> FrameExtractor<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            decoder: Utf8StreamDecoder::new(),
            buffer: String::new(),
        }
    }

    /// Decode a raw chunk into the buffer and return the newly decoded text
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);
        text
    }

    pub fn is_complete(&self) -> bool {
        self.format.is_complete(&self.buffer)
    }

    /// Try to parse a frame out of the buffer
    ///
    /// `None` while the completion signal is absent. `Some(Err(_))` means the
    /// signal is there but the frame does not parse yet; callers keep
    /// accumulating or give up depending on their policy.
    pub fn try_extract<T: DeserializeOwned>(&self) -> Option<ProtocolResult<T>> {
        if !self.is_complete() {
            return None;
        }
        let sanitized = self.format.sanitize(&self.buffer);
        Some(self.format.parse(&sanitized))
    }

    /// Replace the buffer with `text`, keeping any half-decoded character
    pub fn restart_with(&mut self, text: &str) {
        self.buffer.clear();
        self.buffer.push_str(text);
    }
}
