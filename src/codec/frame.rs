//! Length-prefixed frame reading and writing.
//!
//! Each call consumes or produces exactly one frame. Nothing is buffered
//! between calls, so the reader can be handed from one owner to another
//! at any frame boundary.
//!
//! # Example
//!
//! ```
//! use sasswire::codec::FrameCodec;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let codec = FrameCodec::new();
//! let mut wire = Vec::new();
//! codec.write(&mut wire, &"hello").await.unwrap();
//!
//! let mut reader = &wire[..];
//! let decoded: String = codec.read(&mut reader).await.unwrap();
//! assert_eq!(decoded, "hello");
//! # }
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MsgPackCodec;
use crate::error::{Result, SasswireError};
use crate::protocol::{Header, ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use crate::writer::OutboundFrame;

/// Reads and writes MsgPack messages as length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl FrameCodec {
    /// Codec with the default frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Codec with a custom frame limit, capped at [`ABSOLUTE_MAX_FRAME_SIZE`].
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            max_frame_size: max_frame_size.min(ABSOLUTE_MAX_FRAME_SIZE),
        }
    }

    /// Largest payload this codec accepts in either direction.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Serialize a message into a frame ready for the writer task.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<OutboundFrame> {
        let payload = MsgPackCodec::encode(message)?;
        let header = Header::for_payload(&payload, self.max_frame_size)?;
        Ok(OutboundFrame::new(&header, Bytes::from(payload)))
    }

    /// Write one message as a single frame and flush.
    pub async fn write<W, T>(&self, writer: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let frame = self.encode(message)?;
        writer.write_all(&frame.header).await?;
        writer.write_all(&frame.payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read exactly one frame and decode its payload.
    ///
    /// # Errors
    ///
    /// - [`SasswireError::StreamClosed`] if the stream ends before a frame starts
    /// - [`SasswireError::MalformedFrame`] if it ends mid-frame, the declared
    ///   length is over the limit, or the payload is not a `T`
    pub async fn read<R, T>(&self, reader: &mut R) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let payload = self.read_frame(reader).await?;
        MsgPackCodec::decode(&payload).map_err(|e| {
            SasswireError::MalformedFrame(format!(
                "Undecodable {} byte payload: {}",
                payload.len(),
                e
            ))
        })
    }

    /// Read exactly one frame and return the raw payload.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; HEADER_SIZE];
        let mut filled = 0;

        while filled < HEADER_SIZE {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Err(SasswireError::StreamClosed);
                }
                return Err(SasswireError::MalformedFrame(format!(
                    "Stream ended after {} of {} header bytes",
                    filled, HEADER_SIZE
                )));
            }
            filled += n;
        }

        let header = Header::decode(&buf).ok_or_else(|| {
            SasswireError::MalformedFrame("Header shorter than expected".to_string())
        })?;
        header.validate(self.max_frame_size)?;

        let mut payload = vec![0u8; header.payload_length as usize];
        match reader.read_exact(&mut payload).await {
            Ok(_) => Ok(Bytes::from(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(SasswireError::MalformedFrame(format!(
                    "Stream ended inside a {} byte payload",
                    header.payload_length
                )))
            }
            Err(e) => Err(SasswireError::Io(e)),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CanonicalizeRequest, EngineMessage, ImportRequest};
    use tokio::io::duplex;

    fn canonicalize(id: u32, url: &str) -> EngineMessage {
        EngineMessage::CanonicalizeRequest(CanonicalizeRequest {
            id,
            url: url.to_string(),
        })
    }

    #[tokio::test]
    async fn test_write_then_read_one_frame() {
        let codec = FrameCodec::new();
        let mut wire = Vec::new();
        codec.write(&mut wire, &canonicalize(3, "colors")).await.unwrap();

        let declared = Header::decode(&wire).unwrap().payload_length as usize;
        assert_eq!(wire.len(), HEADER_SIZE + declared);

        let mut reader = &wire[..];
        let msg: EngineMessage = codec.read(&mut reader).await.unwrap();
        assert_eq!(msg, canonicalize(3, "colors"));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_each_read_consumes_exactly_one_frame() {
        let codec = FrameCodec::new();
        let mut wire = Vec::new();
        codec.write(&mut wire, &canonicalize(1, "a")).await.unwrap();
        let second = EngineMessage::ImportRequest(ImportRequest {
            id: 2,
            url: "file:///b.scss".to_string(),
        });
        codec.write(&mut wire, &second).await.unwrap();

        let mut reader = &wire[..];
        let first: EngineMessage = codec.read(&mut reader).await.unwrap();
        assert_eq!(first.id(), 1);
        let next: EngineMessage = codec.read(&mut reader).await.unwrap();
        assert_eq!(next, second);
        assert!(matches!(
            codec.read::<_, EngineMessage>(&mut reader).await,
            Err(SasswireError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_stream_is_stream_closed() {
        let codec = FrameCodec::new();
        let mut reader: &[u8] = &[];
        let result = codec.read_frame(&mut reader).await;
        assert!(matches!(result, Err(SasswireError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_truncated_header_is_malformed() {
        let codec = FrameCodec::new();
        let mut reader: &[u8] = &[0, 0];
        let result = codec.read_frame(&mut reader).await;
        assert!(matches!(result, Err(SasswireError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_declared_length_past_end_is_malformed() {
        let codec = FrameCodec::new();
        let mut wire = Header::new(10).encode().to_vec();
        wire.extend_from_slice(b"short");

        let mut reader = &wire[..];
        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, SasswireError::MalformedFrame(_)));
        assert!(err.to_string().contains("10 byte payload"));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let codec = FrameCodec::with_max_frame_size(8);
        let wire = Header::new(9).encode();
        let mut reader = &wire[..];
        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));

        let too_big = "x".repeat(64);
        assert!(matches!(
            codec.encode(&too_big),
            Err(SasswireError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_malformed() {
        let codec = FrameCodec::new();
        let mut wire = Vec::new();
        codec.write(&mut wire, &42u8).await.unwrap();

        let mut reader = &wire[..];
        let result = codec.read::<_, EngineMessage>(&mut reader).await;
        assert!(matches!(result, Err(SasswireError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_read_waits_for_fragmented_frame() {
        let codec = FrameCodec::new();
        let (mut tx, mut rx) = duplex(64);
        let frame = codec.encode(&canonicalize(5, "slow")).unwrap();

        let reader = tokio::spawn(async move {
            codec.read::<_, EngineMessage>(&mut rx).await
        });

        tx.write_all(&frame.header[..2]).await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(&frame.header[2..]).await.unwrap();
        tx.write_all(&frame.payload).await.unwrap();

        let msg = reader.await.unwrap().unwrap();
        assert_eq!(msg, canonicalize(5, "slow"));
    }

    #[test]
    fn test_max_frame_size_is_capped() {
        let codec = FrameCodec::with_max_frame_size(u32::MAX);
        assert_eq!(codec.max_frame_size(), ABSOLUTE_MAX_FRAME_SIZE);
    }
}
