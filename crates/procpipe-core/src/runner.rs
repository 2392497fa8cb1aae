//! Reference supervisor: spawn a command on a pipe set and pump it to
//! completion.

use crate::channel::Channel;
use crate::config::PipesConfig;
use crate::error::{Error, Result};
use crate::input::InputSource;
use crate::pipes::{PipeSet, open_pipes};
use std::collections::BTreeMap;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What a finished child left behind.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub status: ExitStatus,
    /// Empty when output accumulation is disabled.
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct Runner {
    config: PipesConfig,
    timeout: Option<Duration>,
    keep_output: bool,
}

impl Runner {
    #[must_use]
    pub fn new(config: PipesConfig) -> Self {
        Self {
            config,
            timeout: None,
            keep_output: true,
        }
    }

    /// Kill the child if it is still running after `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether `RunOutput` collects stdout and stderr. The callback sees
    /// every chunk either way.
    #[must_use]
    pub fn keep_output(mut self, keep: bool) -> Self {
        self.keep_output = keep;
        self
    }

    /// Run `command` to completion, feeding it `input` and passing each
    /// output chunk to `on_output` as it arrives.
    pub fn run<F>(&self, mut command: Command, input: InputSource, mut on_output: F) -> Result<RunOutput>
    where
        F: FnMut(Channel, &[u8]),
    {
        let mut pipes = open_pipes(&self.config, input)?;
        pipes.take_child_stdio()?.apply(&mut command);
        let mut child = command.spawn().map_err(Error::Spawn)?;
        // The Command holds the child's ends; they must close in the parent.
        drop(command);
        debug!(pid = child.id(), strategy = pipes.strategy(), "child spawned");

        let mut output = Collected::new(self.keep_output);
        let result = self.supervise(pipes.as_mut(), &mut child, |channel, data| {
            on_output(channel, data);
            output.push(channel, data);
        });
        if result.is_err() {
            reap(&mut child);
        }
        pipes.close();

        let status = result?;
        debug!(pid = child.id(), status = %status, "child finished");
        Ok(RunOutput {
            status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn supervise(
        &self,
        pipes: &mut dyn PipeSet,
        child: &mut Child,
        mut emit: impl FnMut(Channel, &[u8]),
    ) -> Result<ExitStatus> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        pipes.unblock()?;

        let status = loop {
            if let (Some(deadline), Some(timeout)) = (deadline, self.timeout) {
                if Instant::now() >= deadline {
                    warn!(pid = child.id(), ?timeout, "child timed out; killing it");
                    return Err(Error::TimedOut { after: timeout });
                }
            }

            let pending = pipes.write(false)?;
            let waiting_on_stdin = pending.is_some_and(|channels| channels.contains(&Channel::Stdin));
            forward(pipes.read(!waiting_on_stdin, false)?, &mut emit);
            if waiting_on_stdin {
                pipes.write(true)?;
            }

            if let Some(status) = child.try_wait()? {
                break status;
            }
            if !pipes.is_open() {
                std::thread::sleep(self.config.poll_interval());
            }
        };

        // The child is gone: take whatever output is left, then let go.
        while pipes.is_open() {
            let read = pipes.read(false, true)?;
            if read.is_empty() {
                break;
            }
            forward(read, &mut emit);
        }
        Ok(status)
    }
}

fn forward(read: BTreeMap<Channel, Vec<u8>>, emit: &mut impl FnMut(Channel, &[u8])) {
    for (channel, data) in read {
        emit(channel, &data);
    }
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(pid = child.id(), error = %err, "kill failed");
    }
    if let Err(err) = child.wait() {
        debug!(pid = child.id(), error = %err, "wait after kill failed");
    }
}

struct Collected {
    keep: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Collected {
    fn new(keep: bool) -> Self {
        Self {
            keep,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn push(&mut self, channel: Channel, data: &[u8]) {
        if !self.keep {
            return;
        }
        match channel {
            Channel::Stdout => self.stdout.extend_from_slice(data),
            Channel::Stderr => self.stderr.extend_from_slice(data),
            Channel::Stdin => {}
        }
    }
}
