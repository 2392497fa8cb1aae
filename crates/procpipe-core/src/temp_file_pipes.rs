//! Pipe set that redirects stdout and stderr to temporary files.
//!
//! Native pipes on Windows hang once a child writes more than the pipe buffer
//! holds while the parent is busy elsewhere. This strategy sidesteps that by
//! letting the child write to regular files, which the parent reads back from
//! a per-channel offset. Stdin stays an ordinary pipe.
//!
//! A file has no end-of-data signal while its writer is alive, so a channel
//! is only closed when a read finds nothing new *and* the caller passes
//! `close_on_eof`, confirming the child has exited.

use crate::channel::Channel;
use crate::config::PipesConfig;
use crate::descriptor::{ChildStdio, DescriptorSpec, into_stdio, open_null};
use crate::engine::StdinWriter;
use crate::error::{Error, ResourceError, Result};
use crate::input::InputSource;
use crate::pipes::{DescriptorSink, PipeSet};
use filedescriptor::Pipe;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, trace, warn};

struct OutputFile {
    file: File,
    path: TempPath,
    /// Bytes already handed to the caller. Never decreases.
    offset: u64,
}

impl OutputFile {
    fn read_new(&mut self) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(self.offset))?;
        let mut data = Vec::new();
        self.file.read_to_end(&mut data)?;
        self.offset += data.len() as u64;
        Ok(data)
    }

    fn remove(self, channel: Channel) {
        let Self { file, path, .. } = self;
        drop(file);
        let location = path.to_path_buf();
        match path.close() {
            Ok(()) => debug!(channel = %channel, path = %location.display(), "removed output file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(channel = %channel, path = %location.display(), error = %err, "failed to remove output file");
            }
        }
    }
}

pub struct TempFilePipes {
    descriptors: [DescriptorSpec; 3],
    files: BTreeMap<Channel, PathBuf>,
    child: Option<ChildStdio>,
    stdin: StdinWriter<DescriptorSink>,
    stdin_pending: bool,
    outputs: BTreeMap<Channel, OutputFile>,
    poll_interval: Duration,
    unblocked: bool,
}

impl TempFilePipes {
    pub fn new(config: &PipesConfig, input: InputSource) -> Result<Self> {
        let stdin = Pipe::new().map_err(ResourceError::Pipe)?;
        let mut outputs = BTreeMap::new();
        let mut child_outputs = Vec::with_capacity(2);

        if config.output_disabled {
            for channel in Channel::OUTPUTS {
                child_outputs.push(open_null(channel)?);
            }
        } else {
            let dir = config.temp_dir();
            for channel in Channel::OUTPUTS {
                let (output, child_end) = create_output(&dir, channel)?;
                child_outputs.push(child_end);
                outputs.insert(channel, output);
            }
        }

        let mut child_outputs = child_outputs.into_iter();
        let (Some(stdout), Some(stderr)) = (child_outputs.next(), child_outputs.next()) else {
            return Err(io::Error::other("output handles missing").into());
        };

        let files: BTreeMap<Channel, PathBuf> = outputs
            .iter()
            .map(|(channel, output)| (*channel, output.path.to_path_buf()))
            .collect();
        let output_spec = |channel| {
            files
                .get(&channel)
                .map_or(DescriptorSpec::NullDevice, |path| DescriptorSpec::File(path.clone()))
        };
        let descriptors = [
            DescriptorSpec::Pipe,
            output_spec(Channel::Stdout),
            output_spec(Channel::Stderr),
        ];

        debug!(
            strategy = "temp-files",
            stdout = %descriptors[1],
            stderr = %descriptors[2],
            "pipe set created"
        );

        Ok(Self {
            descriptors,
            files,
            child: Some(ChildStdio {
                stdin: into_stdio(stdin.read)?,
                stdout,
                stderr,
            }),
            stdin: StdinWriter::new(
                Some(DescriptorSink::new(stdin.write)),
                input,
                config.chunk_size,
            ),
            stdin_pending: false,
            outputs,
            poll_interval: config.poll_interval(),
            unblocked: false,
        })
    }

    /// Bytes of `channel` output already returned by `read`, or `None` once
    /// the channel is closed.
    #[must_use]
    pub fn consumed_offset(&self, channel: Channel) -> Option<u64> {
        self.outputs.get(&channel).map(|output| output.offset)
    }
}

fn create_output(dir: &std::path::Path, channel: Channel) -> Result<(OutputFile, Stdio)> {
    let temp_error = |source| ResourceError::TempFile {
        dir: dir.to_path_buf(),
        source,
    };
    let suffix = if channel == Channel::Stdout { ".out" } else { ".err" };
    let named = tempfile::Builder::new()
        .prefix("procpipe_")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(temp_error)?;
    let child_end = named.reopen().map_err(temp_error)?;
    let (file, path) = named.into_parts();
    Ok((
        OutputFile {
            file,
            path,
            offset: 0,
        },
        Stdio::from(child_end),
    ))
}

impl PipeSet for TempFilePipes {
    fn strategy(&self) -> &'static str {
        "temp-files"
    }

    fn descriptors(&self) -> [DescriptorSpec; 3] {
        self.descriptors.clone()
    }

    fn auxiliary_files(&self) -> BTreeMap<Channel, PathBuf> {
        self.files.clone()
    }

    fn take_child_stdio(&mut self) -> Result<ChildStdio> {
        self.child.take().ok_or(Error::ChildStdioTaken)
    }

    fn unblock(&mut self) -> Result<()> {
        if !self.unblocked {
            self.stdin.unblock()?;
            self.unblocked = true;
        }
        Ok(())
    }

    fn write(&mut self, blocking: bool) -> Result<Option<BTreeSet<Channel>>> {
        self.unblock()?;
        let status = self.stdin.write(blocking, self.poll_interval)?;
        self.stdin_pending = status
            .as_ref()
            .is_some_and(|channels| channels.contains(&Channel::Stdin));
        Ok(status)
    }

    fn read(&mut self, blocking: bool, close_on_eof: bool) -> Result<BTreeMap<Channel, Vec<u8>>> {
        self.unblock()?;

        if blocking {
            if self.stdin_pending && self.stdin.is_open() {
                self.stdin.wait_writable(self.poll_interval);
            } else if !self.outputs.is_empty() {
                std::thread::sleep(self.poll_interval);
            }
        }

        let mut read = BTreeMap::new();
        let mut finished = Vec::new();
        for (channel, output) in &mut self.outputs {
            // A failed read leaves the offset alone, so the bytes are picked
            // up again on the next call.
            let data = match output.read_new() {
                Ok(data) => data,
                Err(err) => {
                    warn!(channel = %channel, offset = output.offset, error = %err, "failed to read output file");
                    continue;
                }
            };
            if data.is_empty() {
                if close_on_eof {
                    finished.push(*channel);
                }
            } else {
                trace!(channel = %channel, bytes = data.len(), offset = output.offset, "read from output file");
                read.insert(*channel, data);
            }
        }
        for channel in finished {
            if let Some(output) = self.outputs.remove(&channel) {
                output.remove(channel);
            }
        }
        Ok(read)
    }

    fn is_open(&self) -> bool {
        self.stdin.is_open() || !self.outputs.is_empty()
    }

    fn close(&mut self) {
        self.stdin.close();
        self.stdin_pending = false;
        for (channel, output) in std::mem::take(&mut self.outputs) {
            output.remove(channel);
        }
        self.child = None;
    }
}

impl Drop for TempFilePipes {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TempFilePipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFilePipes")
            .field("descriptors", &self.descriptors)
            .field("stdin", &self.stdin)
            .field(
                "offsets",
                &self
                    .outputs
                    .iter()
                    .map(|(channel, output)| (*channel, output.offset))
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
