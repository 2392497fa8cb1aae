//! procpipe-core: non-blocking I/O multiplexing for child processes
//!
//! A [`PipeSet`] owns the parent's side of a child's stdin, stdout and
//! stderr for one invocation. A supervisor polls it with `write` and `read`
//! until the child has exited and every channel is closed.
//!
//! # Architecture
//!
//! ```text
//! InputSource ──► StdinWriter ──► stdin ──► child ──► stdout/stderr ──► read()
//!   (fixed,        (buffer,                            (pipes, pty or
//!    stream,        chunking)                           temp files)
//!    sequence)
//! ```
//!
//! # Modules
//!
//! - `channel`: stdin/stdout/stderr identifiers
//! - `buffer`: unsent stdin bytes with consumption tracking
//! - `input`: input sources, streams and sequence elements
//! - `live`: input fed while the child runs
//! - `engine`: stdin transmission shared by every strategy
//! - `pipes`: the `PipeSet` contract and strategy selection
//! - `unix_pipes`: pipe, tty and pty wiring with `poll(2)` (Unix only)
//! - `temp_file_pipes`: output redirected through temporary files
//! - `runner`: reference supervisor
//! - `config`, `logging`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod input;
pub mod live;
pub mod logging;
pub mod pipes;
pub mod runner;
pub mod temp_file_pipes;
#[cfg(unix)]
pub mod unix_pipes;

pub use channel::Channel;
pub use config::{Config, PipesConfig, StrategyKind};
pub use descriptor::{ChildStdio, DescriptorSpec};
pub use engine::{CHUNK_SIZE, StdinSink, StdinWriter};
pub use error::{Error, Result};
pub use input::{InputChunk, InputSource, InputStream};
pub use live::LiveInput;
pub use pipes::{PipeSet, open_pipes, pty_supported, tty_supported};
pub use runner::{RunOutput, Runner};
pub use temp_file_pipes::TempFilePipes;
#[cfg(unix)]
pub use unix_pipes::UnixPipes;
