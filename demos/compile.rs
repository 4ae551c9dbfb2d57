//! Compile - compile one stylesheet with a locally installed engine.
//!
//! This example demonstrates:
//! - Building a transpiler with the fluent builder
//! - Resolving imports from the stylesheet's directory with `PathResolver`
//! - Turning on engine log output through `RUST_LOG`
//!
//! # Running
//!
//! ```text
//! RUST_LOG=sasswire=debug cargo run --example compile -- styles/main.scss compressed
//! ```
//!
//! Set `SASS_EMBEDDED` to point at the engine if it is not on `PATH`.

use std::path::Path;

use sasswire::transport::DEFAULT_EXECUTABLE;
use sasswire::{Args, OutputStyle, PathResolver, SasswireError, SourceSyntax, Transpiler};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut argv = std::env::args().skip(1);
    let input = argv.next().ok_or("usage: compile <stylesheet> [style]")?;
    let style = argv
        .next()
        .map(|s| OutputStyle::parse(&s))
        .unwrap_or_default();

    let path = Path::new(&input).canonicalize()?;
    let source = std::fs::read_to_string(&path)?;
    let base = path.parent().unwrap_or(Path::new("."));

    let executable =
        std::env::var("SASS_EMBEDDED").unwrap_or_else(|_| DEFAULT_EXECUTABLE.to_string());
    let transpiler = Transpiler::builder().executable(executable).build();

    let args = Args::new(source)
        .url(sasswire::resolver::file_url(&path))
        .source_syntax(SourceSyntax::from_url(&input))
        .output_style(style)
        .import_resolver(PathResolver::new(base));

    match transpiler.execute(args).await {
        Ok(output) => println!("{}", output.css),
        Err(SasswireError::Compile(failure)) => {
            eprintln!("error: {}", failure);
            if let Some(trace) = &failure.stack_trace {
                eprintln!("{}", trace);
            }
        }
        Err(e) => return Err(e.into()),
    }

    transpiler.close().await;
    Ok(())
}
