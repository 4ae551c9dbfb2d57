//! Transport module - the engine subprocess and its stdio.

mod process;

pub use process::{EngineProcess, ExitNotice, DEFAULT_EXECUTABLE, DEFAULT_STOP_GRACE};
