//! Codec module - payload serialization and framing.
//!
//! [`MsgPackCodec`] turns protocol messages into bytes and back;
//! [`FrameCodec`] puts those bytes into length-prefixed frames on an async
//! stream.
//!
//! ```
//! use sasswire::codec::MsgPackCodec;
//! use sasswire::protocol::{CanonicalizeRequest, EngineMessage};
//!
//! let msg = EngineMessage::CanonicalizeRequest(CanonicalizeRequest {
//!     id: 1,
//!     url: "colors".to_string(),
//! });
//! let bytes = MsgPackCodec::encode(&msg).unwrap();
//! assert_eq!(MsgPackCodec::decode::<EngineMessage>(&bytes).unwrap(), msg);
//! ```

mod frame;
mod msgpack;

pub use frame::FrameCodec;
pub use msgpack::MsgPackCodec;
