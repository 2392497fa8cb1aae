//! The pipe set contract shared by every platform strategy.
//!
//! A supervisor drives a [`PipeSet`] like this:
//!
//! 1. ask [`PipeSet::descriptors`] and [`PipeSet::take_child_stdio`] at spawn
//!    time, then drop its `Command` so the child ends close in the parent;
//! 2. call [`PipeSet::unblock`] once;
//! 3. call [`PipeSet::write`] and [`PipeSet::read`] in a loop, passing
//!    `close_on_eof = true` once the child has exited;
//! 4. stop when [`PipeSet::is_open`] turns false and call [`PipeSet::close`].

use crate::channel::Channel;
use crate::config::{PipesConfig, StrategyKind};
use crate::descriptor::{ChildStdio, DescriptorSpec};
use crate::engine::StdinSink;
use crate::error::Result;
use crate::input::InputSource;
use crate::temp_file_pipes::TempFilePipes;
use downcast_rs::{Downcast, impl_downcast};
use filedescriptor::FileDescriptor;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Non-blocking I/O with one child process across stdin, stdout and stderr.
pub trait PipeSet: Downcast + Send {
    /// Short implementation name, used in logs.
    fn strategy(&self) -> &'static str;

    /// How each of the child's handles is created, in channel order.
    fn descriptors(&self) -> [DescriptorSpec; 3];

    /// Files standing in for output pipes. Empty unless the strategy
    /// redirects output through the filesystem.
    fn auxiliary_files(&self) -> BTreeMap<Channel, PathBuf> {
        BTreeMap::new()
    }

    /// Hand the child's ends to the supervisor. Fails on a second call.
    fn take_child_stdio(&mut self) -> Result<ChildStdio>;

    /// Switch every handle the parent owns to non-blocking mode. Idempotent.
    fn unblock(&mut self) -> Result<()>;

    /// Advance stdin transmission.
    ///
    /// `None` means stdin is drained and closed. `Some({Stdin})` means bytes
    /// are waiting on the child; `Some({})` means stdin is open but the input
    /// source has nothing to give yet.
    fn write(&mut self, blocking: bool) -> Result<Option<BTreeSet<Channel>>>;

    /// Collect newly available output. Channels absent from the map produced
    /// nothing. With `close_on_eof`, channels at end-of-data are closed.
    fn read(&mut self, blocking: bool, close_on_eof: bool) -> Result<BTreeMap<Channel, Vec<u8>>>;

    /// True while any channel is still open.
    fn is_open(&self) -> bool;

    /// Release every handle and auxiliary file. Idempotent.
    fn close(&mut self);
}
impl_downcast!(PipeSet);

/// Construct the pipe set selected by `config`.
pub fn open_pipes(config: &PipesConfig, input: InputSource) -> Result<Box<dyn PipeSet>> {
    config.validate()?;
    match config.effective_strategy() {
        StrategyKind::TempFiles => Ok(Box::new(TempFilePipes::new(config, input)?)),
        StrategyKind::Auto | StrategyKind::Pipes => open_native(config, input),
    }
}

#[cfg(unix)]
fn open_native(config: &PipesConfig, input: InputSource) -> Result<Box<dyn PipeSet>> {
    Ok(Box::new(crate::unix_pipes::UnixPipes::new(config, input)?))
}

#[cfg(not(unix))]
fn open_native(_config: &PipesConfig, _input: InputSource) -> Result<Box<dyn PipeSet>> {
    Err(crate::error::ConfigError::Unsupported("the pipes strategy".into()).into())
}

/// Whether the controlling terminal can be handed to a child.
#[must_use]
pub fn tty_supported() -> bool {
    #[cfg(unix)]
    {
        crate::unix_pipes::tty_supported()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Whether pseudo-terminals can be allocated on this host.
#[must_use]
pub fn pty_supported() -> bool {
    #[cfg(unix)]
    {
        crate::unix_pipes::pty_supported()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// The parent's end of a stdin pipe.
pub(crate) struct DescriptorSink {
    fd: FileDescriptor,
}

impl DescriptorSink {
    pub(crate) fn new(fd: FileDescriptor) -> Self {
        Self { fd }
    }
}

impl StdinSink for DescriptorSink {
    #[cfg(unix)]
    fn poll_writable(&mut self, timeout: Duration) -> io::Result<bool> {
        use filedescriptor::{AsRawSocketDescriptor, POLLOUT, pollfd};
        let mut pfd = [pollfd {
            fd: self.fd.as_socket_descriptor(),
            events: POLLOUT,
            revents: 0,
        }];
        filedescriptor::poll(&mut pfd, Some(timeout))
            .map(|ready| ready > 0)
            .map_err(poll_error_into_io)
    }

    // Readiness polling only covers sockets on Windows; pipe writes block.
    #[cfg(not(unix))]
    fn poll_writable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(true)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fd.write(buf)
    }

    fn set_non_blocking(&mut self) -> Result<()> {
        match self.fd.set_non_blocking(true) {
            Ok(()) | Err(filedescriptor::Error::OnlySocketsNonBlocking) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Recover the OS error behind a failed `poll`, so callers can tell EINTR
/// apart from real failures.
pub(crate) fn poll_error_into_io(err: filedescriptor::Error) -> io::Error {
    match err {
        filedescriptor::Error::Poll(err) | filedescriptor::Error::Io(err) => err,
        other => io::Error::other(other),
    }
}
