//! Structured protocol messages carried inside frames.
//!
//! [`HostMessage`] flows from this client to the engine (stdin),
//! [`EngineMessage`] flows from the engine to this client (stdout).
//! Every message carries the request identifier it belongs to.
//!
//! Enumerated options travel as their numeric engine codes
//! (see [`OutputStyle::engine_code`](crate::OutputStyle::engine_code)).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message sent to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostMessage {
    /// Start a compilation.
    CompileRequest(CompileRequest),
    /// Answer to an [`EngineMessage::CanonicalizeRequest`].
    CanonicalizeResponse(CanonicalizeResponse),
    /// Answer to an [`EngineMessage::ImportRequest`].
    ImportResponse(ImportResponse),
}

impl HostMessage {
    /// Request identifier the message is tagged with.
    pub fn id(&self) -> u32 {
        match self {
            HostMessage::CompileRequest(m) => m.id,
            HostMessage::CanonicalizeResponse(m) => m.id,
            HostMessage::ImportResponse(m) => m.id,
        }
    }
}

/// Message received from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineMessage {
    /// Final outcome of a compilation.
    CompileResponse(CompileResponse),
    /// The engine asks the call's custom importer to canonicalize a URL.
    CanonicalizeRequest(CanonicalizeRequest),
    /// The engine asks the call's custom importer to load a canonical URL.
    ImportRequest(ImportRequest),
    /// Warning or debug output emitted while compiling.
    LogEvent(LogEvent),
    /// The engine considers a message it received invalid.
    ProtocolError(ProtocolError),
}

impl EngineMessage {
    /// Request identifier the message is tagged with.
    pub fn id(&self) -> u32 {
        match self {
            EngineMessage::CompileResponse(m) => m.id,
            EngineMessage::CanonicalizeRequest(m) => m.id,
            EngineMessage::ImportRequest(m) => m.id,
            EngineMessage::LogEvent(m) => m.id,
            EngineMessage::ProtocolError(m) => m.id,
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineMessage::CompileResponse(_) => "compileResponse",
            EngineMessage::CanonicalizeRequest(_) => "canonicalizeRequest",
            EngineMessage::ImportRequest(_) => "importRequest",
            EngineMessage::LogEvent(_) => "logEvent",
            EngineMessage::ProtocolError(_) => "protocolError",
        }
    }
}

/// A compilation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub id: u32,
    pub source: String,
    pub url: Option<String>,
    pub style: i32,
    pub syntax: i32,
    pub source_map: bool,
    /// Importers in resolution order.
    pub importers: Vec<Importer>,
}

/// One entry of a compile request's importer chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Importer {
    /// Host-side importer; callbacks are tagged with this identifier.
    ImporterId(u32),
    /// Directory the engine searches itself.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub id: u32,
    pub result: CompileResult,
}

/// Outcome of one compilation. Both variants are terminal for the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompileResult {
    Success(CompileSuccess),
    Failure(CompileFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileSuccess {
    pub css: String,
    pub source_map: Option<String>,
}

/// A stylesheet the engine could not compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileFailure {
    /// Failure reason as produced by the engine.
    pub message: String,
    pub span: Option<SourceSpan>,
    pub stack_trace: Option<String>,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(span) = &self.span {
            let url = span.url.as_deref().unwrap_or("-");
            write!(
                f,
                " ({}:{}:{})",
                url,
                span.start.line + 1,
                span.start.column + 1
            )?;
        }
        Ok(())
    }
}

/// Region of a source file. Lines and columns are zero-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub url: Option<String>,
    pub start: SourceLocation,
    pub end: Option<SourceLocation>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub offset: u32,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalizeRequest {
    pub id: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalizeResponse {
    pub id: u32,
    pub result: CanonicalizeResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalizeResult {
    /// The importer resolved the URL.
    Url(String),
    /// The importer does not handle this URL; the engine tries the next one.
    Unresolved,
    /// The importer failed.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub id: u32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResponse {
    pub id: u32,
    pub result: ImportResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportResult {
    #[serde(rename_all = "camelCase")]
    Success {
        contents: String,
        syntax: i32,
        source_map_url: Option<String>,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub id: u32,
    pub kind: LogEventKind,
    pub message: String,
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogEventKind {
    Warning,
    DeprecationWarning,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub id: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[test]
    fn test_engine_message_id_and_kind() {
        let msg = EngineMessage::ImportRequest(ImportRequest {
            id: 9,
            url: "file:///a.scss".into(),
        });
        assert_eq!(msg.id(), 9);
        assert_eq!(msg.kind(), "importRequest");
    }

    #[test]
    fn test_compile_request_importer_order_survives_encoding() {
        let request = HostMessage::CompileRequest(CompileRequest {
            id: 4,
            source: "a { b: c }".into(),
            url: None,
            style: 1,
            syntax: 0,
            source_map: false,
            importers: vec![
                Importer::ImporterId(4),
                Importer::Path("/first".into()),
                Importer::Path("/second".into()),
            ],
        });

        let encoded = MsgPackCodec::encode(&request).unwrap();
        let decoded: HostMessage = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.id(), 4);
        match decoded {
            HostMessage::CompileRequest(req) => assert_eq!(
                req.importers,
                vec![
                    Importer::ImporterId(4),
                    Importer::Path("/first".into()),
                    Importer::Path("/second".into()),
                ]
            ),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_unit_variant_decodes() {
        let reply = HostMessage::CanonicalizeResponse(CanonicalizeResponse {
            id: 2,
            result: CanonicalizeResult::Unresolved,
        });
        let encoded = MsgPackCodec::encode(&reply).unwrap();
        let decoded: HostMessage = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_compile_failure_display_includes_location() {
        let failure = CompileFailure {
            message: "Undefined variable.".into(),
            span: Some(SourceSpan {
                url: Some("file:///main.scss".into()),
                start: SourceLocation {
                    offset: 10,
                    line: 2,
                    column: 4,
                },
                end: None,
                text: "$x".into(),
            }),
            stack_trace: None,
        };
        assert_eq!(
            failure.to_string(),
            "Undefined variable. (file:///main.scss:3:5)"
        );
    }
}
