//! Byte stream to loom frame reassembly.
//!
//! Serial reads deliver arbitrary chunks. [`LoomFrameDecoder`] buffers them
//! and yields whole frames according to a [`FrameBoundary`]:
//!
//! - `Fixed(n)`: every `n` bytes is a frame
//! - `Terminated(t)`: bytes up to `t` are a frame; `t` and empty frames are dropped

use super::protocol::FrameBoundary;
use super::ProtocolError;

/// Longest terminated frame accepted before the buffer is discarded.
pub const MAX_TERMINATED_FRAME: usize = 256;

/// Incremental frame decoder that handles partial reads.
#[derive(Debug)]
pub struct LoomFrameDecoder {
    boundary: FrameBoundary,
    buf: Vec<u8>,
}

impl LoomFrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new(boundary: FrameBoundary) -> Self {
        Self {
            boundary,
            buf: Vec::new(),
        }
    }

    /// Feed bytes and extract all complete frames.
    ///
    /// Incomplete data is kept for the next call. An overlong unterminated
    /// frame is discarded and reported as [`ProtocolError::FrameTooLong`];
    /// decoding resumes after it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Vec<u8>, ProtocolError>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        match self.boundary {
            FrameBoundary::Fixed(0) => {
                self.buf.clear();
            }
            FrameBoundary::Fixed(size) => {
                while self.buf.len() >= size {
                    frames.push(Ok(self.buf.drain(..size).collect()));
                }
            }
            FrameBoundary::Terminated(terminator) => {
                while let Some(pos) = self.buf.iter().position(|b| *b == terminator) {
                    let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
                    frame.pop();
                    // tolerate CRLF from the other direction
                    if frame.first() == Some(&b'\n') {
                        frame.remove(0);
                    }
                    if !frame.is_empty() {
                        frames.push(Ok(frame));
                    }
                }
                if self.buf.len() > MAX_TERMINATED_FRAME {
                    self.buf.clear();
                    frames.push(Err(ProtocolError::FrameTooLong(MAX_TERMINATED_FRAME)));
                }
            }
        }

        frames
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
