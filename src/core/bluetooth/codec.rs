//! Delimiter framing for the connection byte stream.
//!
//! Inbound bytes are split into records on the configured delimiter; outbound
//! text is serialised with or without a trailing delimiter.
//!
//! The buffer size bounds the payload of a frame in both directions. The
//! delimiter itself is not counted: a `bufferSize`-byte record is accepted
//! inbound, and `writeLine` of the same text is accepted outbound.

use log::{debug, warn};

use crate::core::bluetooth::error::{BridgeError, Result};

/// Splits and builds delimited frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    delimiter: Vec<u8>,
    buffer_size: usize,
}

/// Outcome of splitting a buffer
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Complete records within the size limit, in stream order
    pub records: Vec<String>,
    /// Bytes after the last delimiter
    pub remainder: Vec<u8>,
    /// Payload lengths of complete records dropped for exceeding the limit
    pub oversized: Vec<usize>,
}

impl FrameCodec {
    /// Create a codec for the given delimiter and maximum frame size.
    pub fn new(delimiter: char, buffer_size: usize) -> Self {
        let mut encoded = [0u8; 4];
        Self {
            delimiter: delimiter.encode_utf8(&mut encoded).as_bytes().to_vec(),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn find_delimiter(&self, buffer: &[u8]) -> Option<usize> {
        buffer
            .windows(self.delimiter.len())
            .position(|window| window == self.delimiter.as_slice())
    }

    /// Split `buffer` into complete records plus the undelimited remainder.
    ///
    /// Records do not include the delimiter. Invalid UTF-8 is replaced rather
    /// than rejected. Oversized records are reported, never truncated; the
    /// remainder is returned whatever its length.
    pub fn decode(&self, buffer: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        let mut rest = buffer;

        while let Some(end) = self.find_delimiter(rest) {
            let record = &rest[..end];
            if record.len() > self.buffer_size {
                decoded.oversized.push(record.len());
            } else {
                decoded
                    .records
                    .push(String::from_utf8_lossy(record).into_owned());
            }
            rest = &rest[end + self.delimiter.len()..];
        }

        decoded.remainder = rest.to_vec();
        decoded
    }

    /// Serialise `text` followed by the delimiter.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        self.check_len(text.len())?;
        let mut bytes = Vec::with_capacity(text.len() + self.delimiter.len());
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(&self.delimiter);
        Ok(bytes)
    }

    /// Pass bytes through unmodified, without a delimiter.
    pub fn encode_raw(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        self.check_len(bytes.len())?;
        Ok(bytes.to_vec())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.buffer_size {
            Err(BridgeError::FrameTooLarge {
                len,
                limit: self.buffer_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Stateful decoder that keeps the remainder between reads.
///
/// A frame that outgrows the buffer size is dropped whole: the decoder skips
/// input until the next delimiter and resumes with the frame after it.
#[derive(Debug)]
pub struct FrameDecoder {
    codec: FrameCodec,
    pending: Vec<u8>,
    discarding: bool,
    dropped: usize,
}

impl FrameDecoder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            pending: Vec::new(),
            discarding: false,
            dropped: 0,
        }
    }

    /// Feed freshly read bytes, returning every record completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);

        if self.discarding {
            match self.codec.find_delimiter(&self.pending) {
                Some(end) => {
                    self.pending.drain(..end + self.codec.delimiter.len());
                    self.discarding = false;
                    debug!("Resynchronised after an oversized frame");
                }
                None => {
                    self.keep_delimiter_prefix();
                    return Vec::new();
                }
            }
        }

        let decoded = self.codec.decode(&self.pending);
        for len in &decoded.oversized {
            self.drop_frame(*len);
        }

        if decoded.remainder.len() > self.codec.buffer_size {
            self.drop_frame(decoded.remainder.len());
            self.pending = decoded.remainder;
            self.discarding = true;
            self.keep_delimiter_prefix();
        } else {
            self.pending = decoded.remainder;
        }

        debug!(
            "Decoded {} record(s), {} byte(s) pending",
            decoded.records.len(),
            self.pending.len()
        );
        decoded.records
    }

    fn drop_frame(&mut self, len: usize) {
        self.dropped += 1;
        warn!(
            "Dropping inbound frame of at least {} bytes, buffer size is {} bytes",
            len,
            self.codec.buffer_size
        );
    }

    /// While discarding, only a possible start of a split delimiter is worth keeping.
    fn keep_delimiter_prefix(&mut self) {
        let keep = self.codec.delimiter.len() - 1;
        let cut = self.pending.len().saturating_sub(keep);
        self.pending.drain(..cut);
    }

    /// Number of bytes waiting for a delimiter
    pub fn pending_len(&self) -> usize {
        if self.discarding { 0 } else { self.pending.len() }
    }

    /// Frames dropped for exceeding the buffer size so far
    pub fn dropped_frames(&self) -> usize {
        self.dropped
    }
}
