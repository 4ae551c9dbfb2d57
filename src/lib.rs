//! # sasswire
//!
//! Rust client for the Dart Sass embedded compiler protocol.
//!
//! The engine (`dart-sass-embedded`) runs as a long-lived child process and
//! speaks length-prefixed MsgPack frames over its stdin/stdout. Many
//! compile calls share that one connection; while a call is in flight the
//! engine may call back into the host to resolve imports.
//!
//! ## Architecture
//!
//! - **Frames**: 4-byte big-endian length + MsgPack payload
//! - **Writer task**: the single owner of the engine's stdin
//! - **Reader loop**: matches responses to callers by request identifier and
//!   runs import callbacks on the blocking pool
//!
//! ## Example
//!
//! ```no_run
//! use sasswire::{Args, OutputStyle, Transpiler};
//! use sasswire::resolver::PathResolver;
//!
//! #[tokio::main]
//! async fn main() -> sasswire::Result<()> {
//!     let transpiler = Transpiler::builder().build();
//!
//!     let args = Args::new("@use 'colors'; a { color: colors.$primary }")
//!         .output_style(OutputStyle::Compressed)
//!         .import_resolver(PathResolver::new("styles"));
//!
//!     let output = transpiler.execute(args).await?;
//!     println!("{}", output.css);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod options;
pub mod protocol;
pub mod resolver;
pub mod transport;
pub mod transpiler;
pub mod writer;

mod dispatch;

pub use error::{Result, SasswireError};
pub use options::{OutputStyle, SourceSyntax};
pub use protocol::{CompileFailure, SourceLocation, SourceSpan};
pub use resolver::{ImportResolver, PathResolver, ResolverChain};
pub use transpiler::{Args, CompileOutput, Options, Transpiler, TranspilerBuilder};
