//! Correlation dispatcher: the one reader loop per connection.
//!
//! The loop reads [`EngineMessage`]s off the engine's stdout one frame at a
//! time and routes each by its request identifier:
//!
//! - `compileResponse` goes to the waiting caller's delivery slot
//! - `canonicalizeRequest` / `importRequest` go to the call's resolver, run
//!   on the blocking pool; the reply is queued on the writer task. A call
//!   without a resolver gets an error reply
//! - `logEvent` goes to `tracing`
//! - `protocolError` ends the connection
//!
//! An identifier that matches nothing is a protocol violation and ends the
//! connection too. When the loop stops, for any reason, every call still
//! pending is failed with [`SasswireError::ConnectionClosed`].

mod registry;

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::FrameCodec;
use crate::error::{Result, SasswireError};
use crate::options::SourceSyntax;
use crate::protocol::{
    CanonicalizeRequest, CanonicalizeResponse, CanonicalizeResult, EngineMessage, HostMessage,
    ImportRequest, ImportResponse, ImportResult, LogEvent, LogEventKind,
};
use crate::transport::ExitNotice;
use crate::writer::WriterHandle;

pub(crate) use registry::Registry;
use registry::Registration;

/// State the reader loop shares with the callback tasks it spawns.
struct Shared {
    registry: Arc<Registry>,
    writer: WriterHandle,
    codec: FrameCodec,
    fatal_tx: mpsc::UnboundedSender<SasswireError>,
}

impl Shared {
    /// Queue a callback reply for the engine.
    async fn reply(&self, message: HostMessage) {
        let id = message.id();
        let frame = match self.codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.fatal_tx.send(SasswireError::Protocol(format!(
                    "Could not frame reply for request {}: {}",
                    id, e
                )));
                return;
            }
        };

        if self.writer.send(frame).await.is_err() {
            tracing::debug!(id, "Connection closed before reply could be queued");
        }
    }
}

/// Handle to a running reader loop.
pub(crate) struct ReaderHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Stop the loop and wait until it has failed every pending call.
    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Reader loop ended abnormally: {}", e);
        }
    }
}

/// Spawn the reader loop for one connection.
///
/// The loop also watches the writer task and, when process backed, the
/// engine's exit notice; either ending closes the connection. Dropping the
/// returned handle stops the loop.
pub(crate) fn spawn_reader<R>(
    reader: R,
    codec: FrameCodec,
    registry: Arc<Registry>,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    exit: Option<ExitNotice>,
) -> ReaderHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        registry,
        writer,
        codec,
        fatal_tx,
    });

    let task = tokio::spawn(read_loop(
        reader,
        shared,
        writer_task,
        exit,
        stop_rx,
        fatal_rx,
    ));
    ReaderHandle {
        stop_tx: Some(stop_tx),
        task,
    }
}

async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    mut writer_task: JoinHandle<Result<()>>,
    mut exit: Option<ExitNotice>,
    mut stop_rx: oneshot::Receiver<()>,
    mut fatal_rx: mpsc::UnboundedReceiver<SasswireError>,
) where
    R: AsyncRead + Unpin,
{
    let codec = shared.codec;

    let reason = loop {
        tokio::select! {
            biased;

            message = codec.read::<_, EngineMessage>(&mut reader) => {
                let dispatched = message.and_then(|m| dispatch_message(m, &shared));
                if let Err(e) = dispatched {
                    break e;
                }
            }
            Some(e) = fatal_rx.recv() => break e,
            _ = &mut stop_rx => break SasswireError::ConnectionClosed,
            joined = &mut writer_task => {
                break match joined {
                    Ok(Ok(())) => SasswireError::ConnectionClosed,
                    Ok(Err(e)) => e,
                    Err(e) => SasswireError::Protocol(format!("Writer task failed: {}", e)),
                };
            }
            _ = engine_exit(&mut exit) => {
                break SasswireError::Protocol("Engine process exited".to_string());
            }
        }
    };

    let failed = shared.registry.close();
    match reason {
        SasswireError::ConnectionClosed | SasswireError::StreamClosed => {
            tracing::debug!(failed, "Connection to engine closed: {}", reason)
        }
        _ => tracing::error!(failed, "Connection to engine closed: {}", reason),
    }
}

async fn engine_exit(exit: &mut Option<ExitNotice>) {
    match exit {
        Some(notice) => notice.wait().await,
        None => std::future::pending().await,
    }
}

/// Route one inbound message. An `Err` ends the connection.
fn dispatch_message(message: EngineMessage, shared: &Arc<Shared>) -> Result<()> {
    let id = message.id();
    tracing::trace!(id, kind = message.kind(), "Received message");

    match message {
        EngineMessage::CompileResponse(response) => {
            if !shared.registry.complete(response.id, Ok(response.result)) {
                return Err(unknown_request("compileResponse", id));
            }
        }
        EngineMessage::CanonicalizeRequest(request) => {
            match callback_target(shared, "canonicalizeRequest", id)? {
                Some(registration) => {
                    tokio::spawn(canonicalize(shared.clone(), registration, request));
                }
                None => {
                    let reply = HostMessage::CanonicalizeResponse(CanonicalizeResponse {
                        id,
                        result: CanonicalizeResult::Error(no_resolver(&request.url)),
                    });
                    tokio::spawn(refuse(shared.clone(), reply));
                }
            }
        }
        EngineMessage::ImportRequest(request) => {
            match callback_target(shared, "importRequest", id)? {
                Some(registration) => {
                    tokio::spawn(import(shared.clone(), registration, request));
                }
                None => {
                    let reply = HostMessage::ImportResponse(ImportResponse {
                        id,
                        result: ImportResult::Error(no_resolver(&request.url)),
                    });
                    tokio::spawn(refuse(shared.clone(), reply));
                }
            }
        }
        EngineMessage::LogEvent(event) => {
            if !shared.registry.is_pending(id) {
                return Err(unknown_request("logEvent", id));
            }
            log_event(&event);
        }
        EngineMessage::ProtocolError(error) => {
            return Err(SasswireError::Protocol(format!(
                "Engine rejected request {}: {}",
                id, error.message
            )));
        }
    }
    Ok(())
}

fn unknown_request(kind: &str, id: u32) -> SasswireError {
    SasswireError::Protocol(format!("{} for unknown request {}", kind, id))
}

/// The registration a callback for `id` should run against.
///
/// `Ok(None)` means the call is pending but brought no resolver; the engine
/// gets an error reply. An id that names no pending call is fatal.
fn callback_target(shared: &Shared, kind: &str, id: u32) -> Result<Option<Arc<Registration>>> {
    if let Some(registration) = shared.registry.registration(id) {
        return Ok(Some(registration));
    }
    if shared.registry.is_pending(id) {
        return Ok(None);
    }
    Err(unknown_request(kind, id))
}

fn no_resolver(url: &str) -> String {
    format!("No import resolver to handle {}", url)
}

async fn refuse(shared: Arc<Shared>, reply: HostMessage) {
    tracing::debug!(id = reply.id(), "Request has no import resolver, refusing callback");
    shared.reply(reply).await;
}

fn log_event(event: &LogEvent) {
    let text = event.formatted.as_deref().unwrap_or(&event.message);
    match event.kind {
        LogEventKind::Warning => tracing::warn!(id = event.id, "{}", text),
        LogEventKind::DeprecationWarning => {
            tracing::warn!(id = event.id, deprecation = true, "{}", text)
        }
        LogEventKind::Debug => tracing::debug!(id = event.id, "{}", text),
    }
}

async fn canonicalize(
    shared: Arc<Shared>,
    registration: Arc<Registration>,
    request: CanonicalizeRequest,
) {
    let resolver = registration.resolver();
    let url = request.url.clone();
    let outcome = tokio::task::spawn_blocking(move || resolver.canonicalize_url(&url)).await;

    let result = match outcome {
        Ok(Ok(Some(canonical))) if !canonical.is_empty() => {
            registration.remember(&canonical);
            CanonicalizeResult::Url(canonical)
        }
        Ok(Ok(_)) => CanonicalizeResult::Unresolved,
        Ok(Err(e)) => CanonicalizeResult::Error(e.to_string()),
        Err(e) => CanonicalizeResult::Error(format!("Import resolver panicked: {}", e)),
    };

    tracing::debug!(id = request.id, url = %request.url, ?result, "Canonicalized");
    shared
        .reply(HostMessage::CanonicalizeResponse(CanonicalizeResponse {
            id: request.id,
            result,
        }))
        .await;
}

async fn import(shared: Arc<Shared>, registration: Arc<Registration>, request: ImportRequest) {
    let result = if !registration.knows(&request.url) {
        ImportResult::Error(format!(
            "{} was never returned by canonicalize",
            request.url
        ))
    } else {
        let resolver = registration.resolver();
        let url = request.url.clone();
        match tokio::task::spawn_blocking(move || resolver.load(&url)).await {
            Ok(Ok(contents)) => ImportResult::Success {
                contents,
                syntax: SourceSyntax::from_url(&request.url).engine_code(),
                source_map_url: None,
            },
            Ok(Err(e)) => ImportResult::Error(e.to_string()),
            Err(e) => ImportResult::Error(format!("Import resolver panicked: {}", e)),
        }
    };

    tracing::debug!(id = request.id, url = %request.url, "Loaded import");
    shared
        .reply(HostMessage::ImportResponse(ImportResponse {
            id: request.id,
            result,
        }))
        .await;
}
