//! Wire format encoding and decoding.
//!
//! Every frame on the engine's stdin/stdout is a 4-byte length header
//! followed by the payload:
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ Length   │ Payload              │
//! │ 4 bytes  │ `Length` bytes       │
//! │ uint32 BE│ MsgPack message      │
//! └──────────┴──────────────────────┘
//! ```
//!
//! The header carries nothing but the payload size, so a reader can find
//! the frame boundary without scanning for a delimiter.

use crate::error::{Result, SasswireError};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = 2_147_483_647;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(payload_length: u32) -> Self {
        Self { payload_length }
    }

    /// Header for a payload, rejecting payloads over `max_frame_size`.
    pub fn for_payload(payload: &[u8], max_frame_size: u32) -> Result<Self> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            SasswireError::MalformedFrame(format!(
                "Payload size {} does not fit a frame header",
                payload.len()
            ))
        })?;
        let header = Self::new(len);
        header.validate(max_frame_size)?;
        Ok(header)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use sasswire::protocol::Header;
    ///
    /// let bytes = Header::new(258).encode();
    /// assert_eq!(bytes, [0, 0, 1, 2]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.payload_length.to_be_bytes()
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            payload_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        })
    }

    /// Check the declared payload length against a maximum.
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.payload_length > max_frame_size {
            return Err(SasswireError::MalformedFrame(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_frame_size
            )));
        }
        Ok(())
    }
}
