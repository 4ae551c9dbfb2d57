//! Payload serialization with `rmp-serde`.
//!
//! Structs are always written as maps keyed by field name
//! (`to_vec_named`), never as positional arrays, so an optional field can
//! be added to a message without breaking older readers.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MsgPack encoding of frame payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode a payload. Fails with [`MsgPackDecode`] on bytes that are not
    /// a valid encoding of `T`.
    ///
    /// [`MsgPackDecode`]: crate::SasswireError::MsgPackDecode
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CompileResponse, CompileResult, CompileSuccess, EngineMessage};
    use crate::SasswireError;

    #[test]
    fn test_struct_encodes_as_map() {
        let success = CompileSuccess {
            css: "a{b:c}".to_string(),
            source_map: None,
        };
        let encoded = MsgPackCodec::encode(&success).unwrap();

        // fixmap with 2 entries
        assert_eq!(encoded[0], 0x82, "expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_engine_message_survives_encoding() {
        let msg = EngineMessage::CompileResponse(CompileResponse {
            id: 7,
            result: CompileResult::Success(CompileSuccess {
                css: "a {\n  b: c;\n}".to_string(),
                source_map: Some("{}".to_string()),
            }),
        });

        let encoded = MsgPackCodec::encode(&msg).unwrap();
        let decoded: EngineMessage = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result: Result<EngineMessage> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(SasswireError::MsgPackDecode(_))));
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let encoded = MsgPackCodec::encode(&vec![1, 2, 3]).unwrap();
        let result: Result<EngineMessage> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
