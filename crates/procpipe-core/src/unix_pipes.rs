//! Unix pipe set: anonymous pipes, the controlling terminal, or a
//! pseudo-terminal, with `poll(2)` readiness checks on the output side.

use crate::channel::Channel;
use crate::config::PipesConfig;
use crate::descriptor::{ChildStdio, DescriptorSpec, into_stdio, open_for, open_null};
use crate::engine::StdinWriter;
use crate::error::{Error, IoDisposition, ResourceError, Result, classify_io_error};
use crate::input::InputSource;
use crate::pipes::{DescriptorSink, PipeSet, poll_error_into_io};
use filedescriptor::{
    AsRawSocketDescriptor, FileDescriptor, POLLERR, POLLHUP, POLLIN, Pipe, pollfd,
};
use nix::pty::{Winsize, openpty};
use nix::sys::termios::Termios;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, trace, warn};

const TTY_PATH: &str = "/dev/tty";

/// Whether `/dev/tty` can be opened by this process.
pub fn tty_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(TTY_PATH)
            .is_ok()
    })
}

/// Whether a pseudo-terminal can be allocated. Probed once by opening and
/// immediately releasing a pair.
pub fn pty_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| openpty(None::<&Winsize>, None::<&Termios>).is_ok())
}

struct OutputPipe {
    fd: FileDescriptor,
    /// End-of-data seen but not yet confirmed by `close_on_eof`.
    at_eof: bool,
}

/// What the parent keeps after setting up the child's handles.
struct Wiring {
    descriptors: [DescriptorSpec; 3],
    child: ChildStdio,
    stdin: Option<FileDescriptor>,
    outputs: Vec<(Channel, FileDescriptor)>,
}

pub struct UnixPipes {
    descriptors: [DescriptorSpec; 3],
    child: Option<ChildStdio>,
    stdin: StdinWriter<DescriptorSink>,
    outputs: BTreeMap<Channel, OutputPipe>,
    pty: bool,
    chunk_size: usize,
    poll_interval: Duration,
    unblocked: bool,
}

impl UnixPipes {
    pub fn new(config: &PipesConfig, input: InputSource) -> Result<Self> {
        let pty = config.pty && !config.output_disabled && !config.tty;
        let wiring = if config.output_disabled {
            wire_output_disabled()?
        } else if config.tty {
            wire_tty(Path::new(TTY_PATH))?
        } else if config.pty {
            wire_pty()?
        } else {
            wire_pipes()?
        };

        if wiring.stdin.is_none() && !matches!(&input, InputSource::Fixed(b) if b.is_empty()) {
            debug!("stdin is bound to the terminal; input source ignored");
        }

        debug!(
            strategy = "pipes",
            stdin = %wiring.descriptors[0],
            stdout = %wiring.descriptors[1],
            stderr = %wiring.descriptors[2],
            "pipe set created"
        );

        Ok(Self {
            descriptors: wiring.descriptors,
            child: Some(wiring.child),
            stdin: StdinWriter::new(
                wiring.stdin.map(DescriptorSink::new),
                input,
                config.chunk_size,
            ),
            outputs: wiring
                .outputs
                .into_iter()
                .map(|(channel, fd)| (channel, OutputPipe { fd, at_eof: false }))
                .collect(),
            pty,
            chunk_size: config.chunk_size.max(1),
            poll_interval: config.poll_interval(),
            unblocked: false,
        })
    }

    /// Close every output channel; used when readiness polling itself fails.
    fn close_outputs(&mut self) {
        for channel in std::mem::take(&mut self.outputs).into_keys() {
            debug!(channel = %channel, "closed output channel");
        }
    }

    /// An interrupted poll is retried on the next call. Anything else leaves
    /// no way to tell when output is ready, so every output channel closes.
    fn poll_failed(&mut self, err: filedescriptor::Error) {
        let err = poll_error_into_io(err);
        if err.kind() == io::ErrorKind::Interrupted {
            trace!("readiness poll interrupted");
        } else {
            warn!(error = %err, "readiness poll failed; closing output channels");
            self.close_outputs();
        }
    }

    /// Read until the handle has nothing more right now. Returns true at
    /// end-of-data.
    fn drain(&self, fd: &mut FileDescriptor, channel: Channel, data: &mut Vec<u8>) -> bool {
        let mut buf = vec![0_u8; self.chunk_size];
        loop {
            match fd.read(&mut buf) {
                Ok(0) => return true,
                Ok(n) => {
                    data.extend_from_slice(&buf[..n]);
                    // A short read means the kernel buffer is empty.
                    if n < buf.len() {
                        return false;
                    }
                }
                // A pty master reports EIO once the slave side has closed.
                Err(err) if self.pty && err.raw_os_error() == Some(libc::EIO) => return true,
                Err(err) => match classify_io_error(&err) {
                    IoDisposition::Transient if err.kind() == io::ErrorKind::Interrupted => {}
                    IoDisposition::Transient => return false,
                    IoDisposition::Closed => return true,
                    IoDisposition::Fatal => {
                        warn!(channel = %channel, error = %err, "read failed; treating channel as finished");
                        return true;
                    }
                },
            }
        }
    }
}

fn wire_output_disabled() -> Result<Wiring> {
    let stdin = Pipe::new().map_err(ResourceError::Pipe)?;
    Ok(Wiring {
        descriptors: [
            DescriptorSpec::Pipe,
            DescriptorSpec::NullDevice,
            DescriptorSpec::NullDevice,
        ],
        child: ChildStdio {
            stdin: into_stdio(stdin.read)?,
            stdout: open_null(Channel::Stdout)?,
            stderr: open_null(Channel::Stderr)?,
        },
        stdin: Some(stdin.write),
        outputs: Vec::new(),
    })
}

fn wire_tty(path: &Path) -> Result<Wiring> {
    let open = |channel| {
        open_for(path, channel).map_err(|source| ResourceError::TtyOpen {
            path: path.to_path_buf(),
            source,
        })
    };
    let tty = DescriptorSpec::Tty(PathBuf::from(path));
    Ok(Wiring {
        descriptors: [tty.clone(), tty.clone(), tty],
        child: ChildStdio {
            stdin: open(Channel::Stdin)?.into(),
            stdout: open(Channel::Stdout)?.into(),
            stderr: open(Channel::Stderr)?.into(),
        },
        stdin: None,
        outputs: Vec::new(),
    })
}

fn wire_pty() -> Result<Wiring> {
    if !pty_supported() {
        return Err(ResourceError::PtyUnsupported.into());
    }
    let pair = openpty(None::<&Winsize>, None::<&Termios>)
        .map_err(|errno| ResourceError::PtyAllocation(errno.into()))?;
    // Duplicates are close-on-exec; the originals from openpty are not.
    let master = FileDescriptor::dup(&pair.master).map_err(ResourceError::Duplicate)?;
    let slave = FileDescriptor::dup(&pair.slave).map_err(ResourceError::Duplicate)?;
    drop(pair);

    let writer = master.try_clone().map_err(ResourceError::Duplicate)?;
    Ok(Wiring {
        descriptors: [DescriptorSpec::Pty, DescriptorSpec::Pty, DescriptorSpec::Pty],
        child: ChildStdio {
            stdin: slave.as_stdio().map_err(ResourceError::Duplicate)?,
            stdout: slave.as_stdio().map_err(ResourceError::Duplicate)?,
            stderr: into_stdio(slave)?,
        },
        stdin: Some(writer),
        // Both output streams arrive on the master; report them as stdout.
        outputs: vec![(Channel::Stdout, master)],
    })
}

fn wire_pipes() -> Result<Wiring> {
    let stdin = Pipe::new().map_err(ResourceError::Pipe)?;
    let stdout = Pipe::new().map_err(ResourceError::Pipe)?;
    let stderr = Pipe::new().map_err(ResourceError::Pipe)?;
    Ok(Wiring {
        descriptors: [DescriptorSpec::Pipe, DescriptorSpec::Pipe, DescriptorSpec::Pipe],
        child: ChildStdio {
            stdin: into_stdio(stdin.read)?,
            stdout: into_stdio(stdout.write)?,
            stderr: into_stdio(stderr.write)?,
        },
        stdin: Some(stdin.write),
        outputs: vec![(Channel::Stdout, stdout.read), (Channel::Stderr, stderr.read)],
    })
}

impl PipeSet for UnixPipes {
    fn strategy(&self) -> &'static str {
        "pipes"
    }

    fn descriptors(&self) -> [DescriptorSpec; 3] {
        self.descriptors.clone()
    }

    fn take_child_stdio(&mut self) -> Result<ChildStdio> {
        self.child.take().ok_or(Error::ChildStdioTaken)
    }

    fn unblock(&mut self) -> Result<()> {
        if self.unblocked {
            return Ok(());
        }
        self.stdin.unblock()?;
        for output in self.outputs.values_mut() {
            output.fd.set_non_blocking(true)?;
        }
        self.unblocked = true;
        Ok(())
    }

    fn write(&mut self, blocking: bool) -> Result<Option<BTreeSet<Channel>>> {
        self.unblock()?;
        self.stdin.write(blocking, self.poll_interval)
    }

    fn read(&mut self, blocking: bool, close_on_eof: bool) -> Result<BTreeMap<Channel, Vec<u8>>> {
        self.unblock()?;
        let mut read = BTreeMap::new();

        if close_on_eof {
            self.outputs.retain(|channel, output| {
                if output.at_eof {
                    debug!(channel = %channel, "closed output channel");
                }
                !output.at_eof
            });
        }

        let channels: Vec<Channel> = self
            .outputs
            .iter()
            .filter(|(_, output)| !output.at_eof)
            .map(|(channel, _)| *channel)
            .collect();
        if channels.is_empty() {
            if blocking && self.is_open() {
                std::thread::sleep(self.poll_interval);
            }
            return Ok(read);
        }

        let mut pfds: Vec<pollfd> = channels
            .iter()
            .filter_map(|channel| self.outputs.get(channel))
            .map(|output| pollfd {
                fd: output.fd.as_socket_descriptor(),
                events: POLLIN,
                revents: 0,
            })
            .collect();
        let timeout = if blocking { self.poll_interval } else { Duration::ZERO };

        match filedescriptor::poll(&mut pfds, Some(timeout)) {
            Ok(0) => return Ok(read),
            Ok(_) => {}
            Err(err) => {
                self.poll_failed(err);
                return Ok(read);
            }
        }

        for (channel, pfd) in channels.into_iter().zip(&pfds) {
            if pfd.revents & (POLLIN | POLLHUP | POLLERR) == 0 {
                continue;
            }
            let Some(mut output) = self.outputs.remove(&channel) else {
                continue;
            };
            let mut data = Vec::new();
            let eof = self.drain(&mut output.fd, channel, &mut data);
            if !data.is_empty() {
                trace!(channel = %channel, bytes = data.len(), "read from child");
                read.insert(channel, data);
            }
            if eof && close_on_eof {
                debug!(channel = %channel, "closed output channel");
            } else {
                output.at_eof |= eof;
                self.outputs.insert(channel, output);
            }
        }
        Ok(read)
    }

    fn is_open(&self) -> bool {
        self.stdin.is_open() || !self.outputs.is_empty()
    }

    fn close(&mut self) {
        self.stdin.close();
        self.outputs.clear();
        self.child = None;
    }
}

impl Drop for UnixPipes {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UnixPipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPipes")
            .field("descriptors", &self.descriptors)
            .field("stdin", &self.stdin)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("pty", &self.pty)
            .finish_non_exhaustive()
    }
}
