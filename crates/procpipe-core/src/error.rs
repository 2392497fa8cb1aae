//! Error types for procpipe-core

use std::fmt::Write;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for procpipe-core
#[derive(Error, Debug)]
pub enum Error {
    /// A sequence element that is neither a scalar nor a stream.
    /// Never retried: the same element would be rejected again.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// A handle the pipe set needs could not be created
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(#[from] ResourceError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// `take_child_stdio` was called more than once
    #[error("child stdio has already been handed out")]
    ChildStdioTaken,

    /// Input was pushed into a live feed after it was closed
    #[error("live input has already been closed")]
    LiveInputClosed,

    /// The child process could not be started
    #[error("Failed to spawn child process: {0}")]
    Spawn(#[source] io::Error),

    /// The reference runner gave up on the child
    #[error("Child process timed out after {after:?}")]
    TimedOut { after: Duration },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Descriptor manipulation errors
    #[error("File descriptor error: {0}")]
    FileDescriptor(#[from] filedescriptor::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::UnsupportedInput(_) => Some(
                Remediation::new("Only bytes, strings, numbers, booleans and streams can be fed to stdin.")
                    .alternative("Flatten nested collections before passing them as input."),
            ),
            Self::ResourceUnavailable(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Spawn(_) => Some(
                Remediation::new("Check that the command exists and is executable.")
                    .command("Locate command", "command -v <cmd>"),
            ),
            Self::TimedOut { .. } => Some(
                Remediation::new("The child did not finish in time.")
                    .alternative("Raise --timeout or drop it to wait indefinitely."),
            ),
            Self::ChildStdioTaken | Self::LiveInputClosed => None,
            Self::Io(_) | Self::FileDescriptor(_) => Some(
                Remediation::new("An operating system call failed; retry the command.")
                    .command("Check capabilities", "procpipe capabilities"),
            ),
        }
    }
}

/// Failures allocating handles for a pipe set. Always fatal to the pipe set.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("pseudo-terminals are not supported on this host")]
    PtyUnsupported,

    #[error("failed to allocate a pseudo-terminal: {0}")]
    PtyAllocation(#[source] io::Error),

    #[error("failed to open {}: {source}", path.display())]
    TtyOpen { path: PathBuf, source: io::Error },

    #[error("failed to open the null device: {0}")]
    NullDevice(#[source] io::Error),

    #[error("failed to create a pipe: {0}")]
    Pipe(#[source] filedescriptor::Error),

    #[error("failed to duplicate a handle: {0}")]
    Duplicate(#[source] filedescriptor::Error),

    #[error("a temporary output file could not be created in {}: {source}", dir.display())]
    TempFile { dir: PathBuf, source: io::Error },
}

impl ResourceError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::PtyUnsupported | Self::PtyAllocation(_) => {
                Remediation::new("Run without --pty, or on a host with pseudo-terminal support.")
                    .command("Check capabilities", "procpipe capabilities")
            }
            Self::TtyOpen { .. } => {
                Remediation::new("TTY mode needs a controlling terminal; run from an interactive shell.")
                    .alternative("Drop --tty when running under CI or a daemon.")
            }
            Self::NullDevice(_) | Self::Pipe(_) | Self::Duplicate(_) => {
                Remediation::new("The process may be out of file descriptors.")
                    .command("Check limit", "ulimit -n")
            }
            Self::TempFile { dir, .. } => Remediation::new(format!(
                "Make sure {} exists and is writable.",
                dir.display()
            ))
            .alternative("Set pipes.temp_dir in the config file to a writable directory."),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed { path, .. } => Remediation::new(format!(
                "Config file could not be read: {}. Verify the path and retry.",
                path.display()
            ))
            .command("Check path", format!("ls -l \"{}\"", path.display()))
            .alternative("Pass --config with the correct path."),
            Self::ParseFailed(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative("Remove the file to fall back to defaults."),
            Self::ValidationError(_) => {
                Remediation::new("Correct the rejected value in the [pipes] section.")
            }
            Self::Unsupported(_) => Remediation::new("Choose a mode supported by this platform.")
                .command("Check capabilities", "procpipe capabilities"),
        }
    }
}

/// How an I/O error on a pipe handle should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDisposition {
    /// Try again on a later poll; nothing changed.
    Transient,
    /// The other side is gone; treat the channel as finished.
    Closed,
    /// Unexpected; surfaced or logged by the caller.
    Fatal,
}

/// Classify an error returned by a read, write or readiness probe.
#[must_use]
pub fn classify_io_error(err: &io::Error) -> IoDisposition {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            IoDisposition::Transient
        }
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => IoDisposition::Closed,
        _ => IoDisposition::Fatal,
    }
}

/// Format an error with remediation guidance (if available).
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_available_for_structural_errors() {
        let errors = vec![
            Error::UnsupportedInput("list".to_string()),
            Error::ResourceUnavailable(ResourceError::PtyUnsupported),
            Error::ResourceUnavailable(ResourceError::TempFile {
                dir: PathBuf::from("/nonexistent"),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
            Error::Config(ConfigError::ValidationError("chunk_size".to_string())),
            Error::Spawn(io::Error::from(io::ErrorKind::NotFound)),
            Error::TimedOut {
                after: Duration::from_secs(1),
            },
        ];

        for err in errors {
            let remediation = err.remediation().expect("remediation");
            assert!(!remediation.summary.is_empty(), "{err}");
        }
    }

    #[test]
    fn resource_error_converts_into_error() {
        let err: Error = ResourceError::PtyUnsupported.into();
        assert!(matches!(err, Error::ResourceUnavailable(_)));
        assert!(err.to_string().contains("pseudo-terminals"));
    }

    #[test]
    fn temp_file_error_mentions_directory() {
        let err = ResourceError::TempFile {
            dir: PathBuf::from("/scratch/out"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/scratch/out"));
        assert!(err.remediation().summary.contains("/scratch/out"));
    }

    #[test]
    fn render_plain_lists_sections() {
        let text = Remediation::new("Do the thing")
            .command("Check", "procpipe capabilities")
            .alternative("Or not")
            .render_plain();
        assert!(text.contains("To fix:"));
        assert!(text.contains("Commands:"));
        assert!(text.contains("- Check: procpipe capabilities"));
        assert!(text.contains("Alternatives:"));
    }

    #[test]
    fn classify_transient_kinds() {
        for kind in [io::ErrorKind::WouldBlock, io::ErrorKind::Interrupted] {
            assert_eq!(classify_io_error(&io::Error::from(kind)), IoDisposition::Transient);
        }
    }

    #[test]
    fn classify_closed_kinds() {
        assert_eq!(
            classify_io_error(&io::Error::from(io::ErrorKind::BrokenPipe)),
            IoDisposition::Closed
        );
    }

    #[test]
    fn classify_other_kinds_as_fatal() {
        assert_eq!(
            classify_io_error(&io::Error::from(io::ErrorKind::PermissionDenied)),
            IoDisposition::Fatal
        );
    }

    #[test]
    fn format_includes_remediation() {
        let err = Error::UnsupportedInput("nested list".to_string());
        let text = format_error_with_remediation(&err);
        assert!(text.starts_with("Error: Unsupported input: nested list"));
        assert!(text.contains("To fix:"));
    }
}
