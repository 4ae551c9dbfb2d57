//! Protocol module - wire format and message types.
//!
//! - 4-byte length header encoding/decoding
//! - Typed messages exchanged with the engine

mod message;
mod wire_format;

pub use message::{
    CanonicalizeRequest, CanonicalizeResponse, CanonicalizeResult, CompileFailure,
    CompileRequest, CompileResponse, CompileResult, CompileSuccess, EngineMessage, HostMessage,
    ImportRequest, ImportResponse, ImportResult, Importer, LogEvent, LogEventKind, ProtocolError,
    SourceLocation, SourceSpan,
};
pub use wire_format::{Header, ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
