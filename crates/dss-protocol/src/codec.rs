//! Streaming codec that turns transport bytes into frames.
//!
//! Transports deliver arbitrary chunks. The codec accumulates them, drops
//! anything before a `#`, and yields one decode result per terminated line.

use crate::error::{FrameError, FrameResult};
use crate::frame::{Frame, FRAME_START};
use bytes::{Buf, BytesMut};

/// Maximum length of a single frame line, terminator included.
pub const MAX_FRAME_LENGTH: usize = 512;

/// A codec for reading DSS frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(MAX_FRAME_LENGTH * 2),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame.
    ///
    /// Returns `None` when no complete line is buffered, otherwise the parse
    /// result for the next line. A failed line is consumed so decoding can
    /// continue with the following one.
    pub fn decode(&mut self) -> Option<FrameResult<Frame>> {
        loop {
            // Scan for '#', discarding any preceding garbage
            let start = self.buffer.iter().position(|&b| b == FRAME_START);
            match start {
                Some(0) => {}
                Some(n) => {
                    log::debug!("discarding {} bytes before frame start", n);
                    self.buffer.advance(n);
                }
                None => {
                    if !self.buffer.is_empty() {
                        log::debug!("discarding {} bytes without frame start", self.buffer.len());
                    }
                    self.buffer.clear();
                    return None;
                }
            }

            let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_FRAME_LENGTH {
                    let actual = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(FrameError::BufferOverflow {
                        max: MAX_FRAME_LENGTH,
                        actual,
                    }));
                }
                return None;
            };

            let line = self.buffer.split_to(end + 1);
            if line.len() > MAX_FRAME_LENGTH {
                return Some(Err(FrameError::BufferOverflow {
                    max: MAX_FRAME_LENGTH,
                    actual: line.len(),
                }));
            }

            // A bare terminator right after the marker carries nothing.
            if line.len() <= 3 && line.iter().skip(1).all(|&b| b == b'\r' || b == b'\n') {
                continue;
            }

            return Some(Frame::parse(&line));
        }
    }

    /// Drain every frame currently decodable.
    pub fn decode_all(&mut self) -> Vec<FrameResult<Frame>> {
        std::iter::from_fn(|| self.decode()).collect()
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
