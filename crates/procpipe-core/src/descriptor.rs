//! Descriptor specifications and the child's side of the handles.

use crate::channel::Channel;
use crate::error::{ResourceError, Result};
use filedescriptor::FileDescriptor;
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// How one of the child's standard handles is wired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "kebab-case")]
pub enum DescriptorSpec {
    /// Anonymous pipe; the parent keeps the other end.
    Pipe,
    /// The platform null device.
    NullDevice,
    /// The controlling terminal at the given path.
    Tty(PathBuf),
    /// The slave side of a pseudo-terminal allocated by the pipe set.
    Pty,
    /// A regular file the parent reads back by offset.
    File(PathBuf),
}

impl DescriptorSpec {
    /// Whether the parent keeps a handle for this channel.
    #[must_use]
    pub fn parent_owned(&self) -> bool {
        matches!(self, Self::Pipe | Self::Pty | Self::File(_))
    }
}

impl fmt::Display for DescriptorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => f.write_str("pipe"),
            Self::NullDevice => f.write_str("null"),
            Self::Tty(path) => write!(f, "tty:{}", path.display()),
            Self::Pty => f.write_str("pty"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// The child's ends of stdin, stdout and stderr, ready to hand to
/// [`Command`].
pub struct ChildStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl ChildStdio {
    /// Install all three handles on `command`.
    pub fn apply(self, command: &mut Command) {
        command.stdin(self.stdin).stdout(self.stdout).stderr(self.stderr);
    }
}

impl fmt::Debug for ChildStdio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildStdio").finish_non_exhaustive()
    }
}

/// Path of the platform null device.
#[must_use]
pub fn null_device_path() -> &'static Path {
    if cfg!(windows) {
        Path::new("NUL")
    } else {
        Path::new("/dev/null")
    }
}

/// Open the null device for the child's end of `channel`.
pub(crate) fn open_null(channel: Channel) -> Result<Stdio> {
    let file = open_for(null_device_path(), channel).map_err(ResourceError::NullDevice)?;
    Ok(Stdio::from(file))
}

/// Open `path` readable for stdin and writable for the output channels.
pub(crate) fn open_for(path: &Path, channel: Channel) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    if channel.is_output() {
        options.write(true);
    } else {
        options.read(true);
    }
    options.open(path)
}

/// Hand a descriptor to the child, releasing the parent's copy.
pub(crate) fn into_stdio(fd: FileDescriptor) -> Result<Stdio> {
    let stdio = fd.as_stdio().map_err(ResourceError::Duplicate)?;
    drop(fd);
    Ok(stdio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_ownership_follows_kind() {
        assert!(DescriptorSpec::Pipe.parent_owned());
        assert!(DescriptorSpec::Pty.parent_owned());
        assert!(DescriptorSpec::File(PathBuf::from("/tmp/x")).parent_owned());
        assert!(!DescriptorSpec::NullDevice.parent_owned());
        assert!(!DescriptorSpec::Tty(PathBuf::from("/dev/tty")).parent_owned());
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(DescriptorSpec::Pipe.to_string(), "pipe");
        assert_eq!(
            DescriptorSpec::Tty(PathBuf::from("/dev/tty")).to_string(),
            "tty:/dev/tty"
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&DescriptorSpec::File(PathBuf::from("out.txt"))).unwrap();
        assert_eq!(json, r#"{"kind":"file","path":"out.txt"}"#);
        let json = serde_json::to_string(&DescriptorSpec::NullDevice).unwrap();
        assert_eq!(json, r#"{"kind":"null-device"}"#);
    }

    #[test]
    fn null_device_opens_for_every_channel() {
        for channel in Channel::ALL {
            open_null(channel).unwrap();
        }
    }

    #[test]
    fn pipe_end_converts_to_stdio() {
        let pipe = filedescriptor::Pipe::new().unwrap();
        into_stdio(pipe.write).unwrap();
    }
}
