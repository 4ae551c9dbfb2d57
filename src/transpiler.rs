//! Public entry point: configure once, compile many times.
//!
//! A [`Transpiler`] owns at most one connection to one engine. The
//! connection is opened by the first [`execute`](Transpiler::execute) call
//! and shared by every call after it, concurrent ones included. Once it is
//! closed (explicitly, by an engine crash, or by a protocol violation) the
//! transpiler stays closed: later calls fail with
//! [`SasswireError::ConnectionClosed`] and nothing is restarted.
//!
//! # Example
//!
//! ```no_run
//! use sasswire::{Args, OutputStyle, Transpiler};
//!
//! # async fn run() -> sasswire::Result<()> {
//! let transpiler = Transpiler::builder()
//!     .executable("/usr/local/bin/dart-sass-embedded")
//!     .build();
//!
//! let output = transpiler
//!     .execute(Args::new("a { b: c }").output_style(OutputStyle::Compressed))
//!     .await?;
//! println!("{}", output.css);
//!
//! transpiler.close().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::FrameCodec;
use crate::dispatch::{spawn_reader, ReaderHandle, Registry};
use crate::error::{Result, SasswireError};
use crate::options::{OutputStyle, SourceSyntax};
use crate::protocol::{CompileRequest, CompileResult, HostMessage, Importer, DEFAULT_MAX_FRAME_SIZE};
use crate::resolver::ImportResolver;
use crate::transport::{EngineProcess, ExitNotice, DEFAULT_EXECUTABLE, DEFAULT_STOP_GRACE};
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Transpiler configuration. Build one through [`TranspilerBuilder`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Engine executable. A bare name is looked up on `PATH`.
    pub executable: PathBuf,
    /// Extra command-line arguments for the engine.
    pub args: Vec<String>,
    /// Largest frame accepted or produced.
    pub max_frame_size: u32,
    /// Capacity of the outbound frame queue.
    pub channel_capacity: usize,
    /// Per-call limit on waiting for a response. `None` waits forever.
    pub timeout: Option<Duration>,
    /// How long a stopped engine gets before it is killed.
    pub stop_grace: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            args: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            timeout: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

/// Builder for a [`Transpiler`].
///
/// Building never starts anything; the engine is launched on first use.
#[derive(Debug, Default)]
pub struct TranspilerBuilder {
    options: Options,
}

impl TranspilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path or name of the engine executable.
    ///
    /// Default: `dart-sass-embedded` (`dart-sass-embedded.bat` on Windows)
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.executable = path.into();
        self
    }

    /// Append one engine argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.options.args.push(arg.into());
        self
    }

    /// Append several engine arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the frame size limit.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.options.max_frame_size = max_frame_size;
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.options.channel_capacity = capacity;
        self
    }

    /// Bound how long each call waits for its response.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Set the grace period between closing the engine's stdin and killing it.
    ///
    /// Default: 2 seconds
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.options.stop_grace = grace;
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Build a transpiler that launches the engine process on first use.
    pub fn build(self) -> Transpiler {
        Transpiler::new(self.options, Launch::Process)
    }

    /// Build a transpiler that talks to an already running engine over the
    /// given streams. `reader` is the engine's output, `writer` its input.
    ///
    /// Process-related options are ignored.
    pub fn build_with_streams<R, W>(self, reader: R, writer: W) -> Transpiler
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Transpiler::new(
            self.options,
            Launch::Streams {
                reader: Box::new(reader),
                writer: Box::new(writer),
            },
        )
    }
}

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

enum Launch {
    Process,
    Streams {
        reader: BoxedReader,
        writer: BoxedWriter,
    },
}

enum ConnectionState {
    Unstarted(Launch),
    Running(Connection),
    Terminated,
}

struct Connection {
    registry: Arc<Registry>,
    writer: WriterHandle,
    reader: ReaderHandle,
    process: Option<EngineProcess>,
}

impl Connection {
    fn open<R, W>(
        input: R,
        output: W,
        options: &Options,
        codec: FrameCodec,
        process: Option<EngineProcess>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let exit: Option<ExitNotice> = process.as_ref().map(EngineProcess::exit_notice);
        let registry = Arc::new(Registry::new());
        let (writer, writer_task) = spawn_writer_task(output, options.channel_capacity);
        let reader = spawn_reader(
            input,
            codec,
            registry.clone(),
            writer.clone(),
            writer_task,
            exit,
        );

        Self {
            registry,
            writer,
            reader,
            process,
        }
    }

    async fn shutdown(self) {
        let Connection {
            registry,
            writer,
            reader,
            process,
        } = self;

        reader.shutdown().await;
        registry.close();
        drop(writer);
        if let Some(process) = process {
            process.stop();
        }
    }
}

/// Client for one engine connection. See the [module docs](self).
pub struct Transpiler {
    options: Options,
    codec: FrameCodec,
    state: Mutex<ConnectionState>,
}

impl Transpiler {
    pub fn builder() -> TranspilerBuilder {
        TranspilerBuilder::new()
    }

    fn new(options: Options, launch: Launch) -> Self {
        Self {
            codec: FrameCodec::with_max_frame_size(options.max_frame_size),
            options,
            state: Mutex::new(ConnectionState::Unstarted(launch)),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Compile one stylesheet.
    ///
    /// # Errors
    ///
    /// - [`SasswireError::InvalidOption`] if `args` cannot be sent as given
    /// - [`SasswireError::SpawnFailed`] if the engine could not be launched
    /// - [`SasswireError::Compile`] if the engine rejected the stylesheet
    /// - [`SasswireError::Timeout`] if the configured timeout elapsed
    /// - [`SasswireError::ConnectionClosed`] if the connection is gone
    pub async fn execute(&self, args: Args) -> Result<CompileOutput> {
        args.validate()?;
        let (registry, writer) = self.connect()?;

        let (id, slot) = registry.submit(args.import_resolver.clone())?;
        let unqueued = registry.withdraw_on_drop(id);
        let request = HostMessage::CompileRequest(args.into_request(id));

        let frame = self.codec.encode(&request)?;
        writer.send(frame).await?;
        unqueued.disarm();
        tracing::debug!(id, "Submitted compile request");

        let delivery = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, slot)
                .await
                .map_err(|_| SasswireError::Timeout { id })?,
            None => slot.await,
        };

        match delivery.map_err(|_| SasswireError::ConnectionClosed)?? {
            CompileResult::Success(success) => Ok(CompileOutput {
                css: success.css,
                source_map: success.source_map,
            }),
            CompileResult::Failure(failure) => Err(SasswireError::Compile(failure)),
        }
    }

    /// Close the connection. Pending calls fail with
    /// [`SasswireError::ConnectionClosed`], and so does every later call.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), ConnectionState::Terminated);
        if let ConnectionState::Running(connection) = previous {
            connection.shutdown().await;
            tracing::debug!("Transpiler closed");
        }
    }

    /// True while a connection is open and usable.
    pub fn is_running(&self) -> bool {
        match &*self.lock() {
            ConnectionState::Running(connection) => !connection.registry.is_closed(),
            _ => false,
        }
    }

    /// Number of calls submitted to the engine and not yet answered,
    /// including calls whose caller gave up waiting.
    pub fn pending_calls(&self) -> usize {
        match &*self.lock() {
            ConnectionState::Running(connection) => connection.registry.outstanding(),
            _ => 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the connection on first use and hand out what a call needs.
    fn connect(&self) -> Result<(Arc<Registry>, WriterHandle)> {
        let mut state = self.lock();
        let connection = match std::mem::replace(&mut *state, ConnectionState::Terminated) {
            ConnectionState::Running(connection) if !connection.registry.is_closed() => connection,
            ConnectionState::Running(connection) => {
                // Dropping the connection stops the reader and the engine.
                drop(connection);
                return Err(SasswireError::ConnectionClosed);
            }
            ConnectionState::Unstarted(launch) => self.open(launch)?,
            ConnectionState::Terminated => return Err(SasswireError::ConnectionClosed),
        };

        let handles = (connection.registry.clone(), connection.writer.clone());
        *state = ConnectionState::Running(connection);
        Ok(handles)
    }

    fn open(&self, launch: Launch) -> Result<Connection> {
        match launch {
            Launch::Process => {
                let (process, stdin, stdout) = EngineProcess::start(
                    &self.options.executable,
                    &self.options.args,
                    self.options.stop_grace,
                )?;
                tracing::info!(pid = ?process.pid(), "Connected to engine");
                Ok(Connection::open(
                    stdout,
                    stdin,
                    &self.options,
                    self.codec,
                    Some(process),
                ))
            }
            Launch::Streams { reader, writer } => Ok(Connection::open(
                reader,
                writer,
                &self.options,
                self.codec,
                None,
            )),
        }
    }
}

impl fmt::Debug for Transpiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transpiler")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Arguments of one compile call.
#[derive(Clone, Default)]
pub struct Args {
    /// Stylesheet text.
    pub source: String,
    /// URL of the stylesheet, used for relative imports and error
    /// locations. Must carry a scheme (`file:///a/b.scss`).
    pub url: Option<String>,
    pub output_style: OutputStyle,
    pub source_syntax: SourceSyntax,
    pub enable_source_map: bool,
    /// Consulted before the include paths.
    pub import_resolver: Option<Arc<dyn ImportResolver>>,
    /// Directories the engine searches for imports, in order.
    pub include_paths: Vec<PathBuf>,
}

impl Args {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn output_style(mut self, style: OutputStyle) -> Self {
        self.output_style = style;
        self
    }

    pub fn source_syntax(mut self, syntax: SourceSyntax) -> Self {
        self.source_syntax = syntax;
        self
    }

    pub fn source_map(mut self, enable: bool) -> Self {
        self.enable_source_map = enable;
        self
    }

    pub fn import_resolver<R: ImportResolver + 'static>(mut self, resolver: R) -> Self {
        self.import_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn shared_import_resolver(mut self, resolver: Arc<dyn ImportResolver>) -> Self {
        self.import_resolver = Some(resolver);
        self
    }

    pub fn include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn include_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.include_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Check everything that can be checked without the engine.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            if !has_scheme(url) {
                return Err(SasswireError::InvalidOption(format!(
                    "url {:?} has no scheme",
                    url
                )));
            }
        }
        if self.include_paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(SasswireError::InvalidOption(
                "include path is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The wire request for these arguments under identifier `id`.
    ///
    /// The custom resolver, if any, comes first in the importer chain,
    /// followed by the include paths in order.
    pub fn into_request(self, id: u32) -> CompileRequest {
        let mut importers = Vec::with_capacity(self.include_paths.len() + 1);
        if self.import_resolver.is_some() {
            importers.push(Importer::ImporterId(id));
        }
        importers.extend(
            self.include_paths
                .iter()
                .map(|p| Importer::Path(clean_path(p).to_string_lossy().into_owned())),
        );

        CompileRequest {
            id,
            source: self.source,
            url: self.url,
            style: self.output_style.engine_code(),
            syntax: self.source_syntax.engine_code(),
            source_map: self.enable_source_map,
            importers,
        }
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("source_len", &self.source.len())
            .field("url", &self.url)
            .field("output_style", &self.output_style)
            .field("source_syntax", &self.source_syntax)
            .field("enable_source_map", &self.enable_source_map)
            .field("import_resolver", &self.import_resolver.is_some())
            .field("include_paths", &self.include_paths)
            .finish()
    }
}

/// Compiled CSS of a successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub css: String,
    /// Present when the call asked for a source map.
    pub source_map: Option<String>,
}

/// `scheme:rest`, where the scheme starts with a letter and continues with
/// letters, digits, `+`, `-` or `.`.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Lexical cleanup: drops `.` segments and repeated separators.
fn clean_path(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveResult;

    struct Nothing;

    impl ImportResolver for Nothing {
        fn canonicalize_url(&self, _url: &str) -> ResolveResult<Option<String>> {
            Ok(None)
        }

        fn load(&self, _canonical_url: &str) -> ResolveResult<String> {
            Err("unreachable".into())
        }
    }

    #[test]
    fn test_builder_defaults() {
        let builder = TranspilerBuilder::new();
        let options = builder.options();
        assert_eq!(options.executable, PathBuf::from(DEFAULT_EXECUTABLE));
        assert_eq!(options.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(options.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let builder = TranspilerBuilder::new()
            .executable("/opt/sass/engine")
            .arg("--verbose")
            .args(["--a", "--b"])
            .timeout(Duration::from_secs(3))
            .channel_capacity(4);
        let options = builder.options();
        assert_eq!(options.executable, PathBuf::from("/opt/sass/engine"));
        assert_eq!(options.args, vec!["--verbose", "--a", "--b"]);
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));
        assert_eq!(options.channel_capacity, 4);
    }

    #[test]
    fn test_url_without_scheme_is_invalid() {
        let err = Args::new("a{}").url("styles/main.scss").validate().unwrap_err();
        assert!(matches!(err, SasswireError::InvalidOption(_)));

        assert!(Args::new("a{}").url("file:///styles/main.scss").validate().is_ok());
        assert!(Args::new("a{}").url("custom+x:main").validate().is_ok());
        assert!(Args::new("a{}").url(":main").validate().is_err());
    }

    #[test]
    fn test_empty_include_path_is_invalid() {
        let err = Args::new("a{}").include_path("").validate().unwrap_err();
        assert!(matches!(err, SasswireError::InvalidOption(_)));
    }

    #[test]
    fn test_request_importer_order() {
        let request = Args::new("@use 'x';")
            .import_resolver(Nothing)
            .include_paths(["/first", "/second"])
            .into_request(7);

        assert_eq!(
            request.importers,
            vec![
                Importer::ImporterId(7),
                Importer::Path("/first".to_string()),
                Importer::Path("/second".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_carries_engine_codes() {
        let request = Args::new("a{}")
            .output_style(OutputStyle::Compact)
            .source_syntax(SourceSyntax::Indented)
            .source_map(true)
            .into_request(1);

        assert_eq!(request.style, OutputStyle::Compact.engine_code());
        assert_eq!(request.syntax, SourceSyntax::Indented.engine_code());
        assert!(request.source_map);
        assert!(request.importers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_include_paths_are_cleaned() {
        assert_eq!(clean_path(Path::new("/a//b/./c/")), PathBuf::from("/a/b/c"));
        assert_eq!(clean_path(Path::new("./styles")), PathBuf::from("styles"));
        assert_eq!(clean_path(Path::new(".")), PathBuf::from("."));
        assert_eq!(clean_path(Path::new("../lib")), PathBuf::from("../lib"));
    }

    #[tokio::test]
    async fn test_invalid_args_do_not_start_connection() {
        let transpiler = Transpiler::builder()
            .executable("/definitely/not/here")
            .build();

        let err = transpiler
            .execute(Args::new("a{}").url("no-scheme"))
            .await
            .unwrap_err();
        assert!(matches!(err, SasswireError::InvalidOption(_)));
        assert!(!transpiler.is_running());

        let err = transpiler.execute(Args::new("a{}")).await.unwrap_err();
        assert!(matches!(err, SasswireError::SpawnFailed { .. }));

        let err = transpiler.execute(Args::new("a{}")).await.unwrap_err();
        assert!(matches!(err, SasswireError::ConnectionClosed));
    }
}
