//! procpipe - run a command with non-blocking pipe multiplexing
//!
//! Thin CLI over procpipe-core: feeds the child's stdin from arguments,
//! files or our own stdin, forwards its stdout/stderr as they arrive, and
//! exits with the child's exit code.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use filedescriptor::FileDescriptor;
use procpipe_core::config::{Config, LogFormat, StrategyKind};
use procpipe_core::error::format_error_with_remediation;
use procpipe_core::logging::init_logging;
use procpipe_core::{Channel, InputChunk, InputSource, InputStream, Runner};
use serde::Serialize;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, ExitCode, ExitStatus};
use std::time::Duration;

/// Exit code when procpipe itself fails.
const EXIT_INTERNAL: u8 = 125;
/// Exit code when the child was killed for running too long.
const EXIT_TIMEOUT: u8 = 124;
/// Exit code when the command could not be found.
const EXIT_NOT_FOUND: u8 = 127;

/// procpipe - run a command with non-blocking pipe multiplexing
#[derive(Parser, Debug)]
#[command(name = "procpipe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "PROCPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command, streaming its output
    Run(RunArgs),

    /// Report what this host supports
    Capabilities {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Text fed to stdin; repeat to send several pieces in order
    #[arg(long = "input", value_name = "TEXT")]
    inputs: Vec<String>,

    /// File streamed to stdin after any --input text
    #[arg(long, value_name = "PATH")]
    input_file: Option<PathBuf>,

    /// Forward our own stdin to the child after the other inputs
    #[arg(long)]
    stdin: bool,

    /// Bind the child to the controlling terminal
    #[arg(long, conflicts_with = "pty")]
    tty: bool,

    /// Run the child on a pseudo-terminal
    #[arg(long)]
    pty: bool,

    /// Discard the child's stdout and stderr
    #[arg(long)]
    no_output: bool,

    /// Pipe set strategy (auto, pipes, temp-files)
    #[arg(long)]
    strategy: Option<StrategyKind>,

    /// Kill the child after this many seconds
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    timeout: Option<Duration>,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|_| format!("not a number: {value}"))?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| format!("timeout must be a positive number of seconds: {value}"))
}

#[derive(Serialize)]
struct Capabilities {
    platform: &'static str,
    tty: bool,
    pty: bool,
    default_strategy: StrategyKind,
    chunk_size: usize,
    poll_interval_ms: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            match err.downcast_ref::<procpipe_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::from(code)
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    } else if cli.config.is_none() {
        config.logging.level = "warn".to_string();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_logging(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Commands::Run(args) => run_command(config, args),
        Commands::Capabilities { json } => {
            print_capabilities(&config, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_command(mut config: Config, args: RunArgs) -> Result<ExitCode> {
    let pipes = &mut config.pipes;
    pipes.tty |= args.tty;
    pipes.pty |= args.pty;
    pipes.output_disabled |= args.no_output;
    if let Some(strategy) = args.strategy {
        pipes.strategy = strategy;
    }

    let input = build_input(&args)?;
    let (program, rest) = args
        .command
        .split_first()
        .context("no command given")?;
    let mut command = Command::new(program);
    command.args(rest);

    let mut runner = Runner::new(config.pipes.clone()).keep_output(false);
    if let Some(timeout) = args.timeout {
        runner = runner.timeout(timeout);
    }

    let mut forward_error: Option<io::Error> = None;
    let output = runner.run(command, input, |channel, data| {
        if forward_error.is_some() {
            return;
        }
        let result = match channel {
            Channel::Stderr => write_flush(&mut io::stderr().lock(), data),
            _ => write_flush(&mut io::stdout().lock(), data),
        };
        if let Err(err) = result {
            tracing::debug!(channel = %channel, error = %err, "stopped forwarding output");
            forward_error = Some(err);
        }
    })?;

    Ok(ExitCode::from(child_exit_code(output.status)))
}

fn build_input(args: &RunArgs) -> Result<InputSource> {
    let mut items: Vec<InputChunk> = args.inputs.iter().map(|text| InputChunk::from(text.as_str())).collect();
    if let Some(path) = &args.input_file {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open input file {}", path.display()))?;
        items.push(InputStream::from_file(file).into());
    }
    if args.stdin {
        let fd = FileDescriptor::dup(&io::stdin()).context("failed to duplicate stdin")?;
        items.push(InputStream::from_descriptor(fd).into());
    }
    Ok(if items.is_empty() {
        InputSource::none()
    } else {
        InputSource::sequence(items)
    })
}

fn write_flush(out: &mut impl Write, data: &[u8]) -> io::Result<()> {
    out.write_all(data)?;
    out.flush()
}

fn child_exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(1);
        }
    }
    1
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<procpipe_core::Error>() {
        Some(procpipe_core::Error::TimedOut { .. }) => EXIT_TIMEOUT,
        Some(procpipe_core::Error::Spawn(source)) if source.kind() == io::ErrorKind::NotFound => {
            EXIT_NOT_FOUND
        }
        _ => EXIT_INTERNAL,
    }
}

fn print_capabilities(config: &Config, json: bool) -> Result<()> {
    let caps = Capabilities {
        platform: std::env::consts::OS,
        tty: procpipe_core::tty_supported(),
        pty: procpipe_core::pty_supported(),
        default_strategy: config.pipes.effective_strategy(),
        chunk_size: config.pipes.chunk_size,
        poll_interval_ms: config.pipes.poll_interval_ms,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&caps)?);
    } else {
        println!("platform:          {}", caps.platform);
        println!("tty:               {}", yes_no(caps.tty));
        println!("pty:               {}", yes_no(caps.pty));
        println!("default strategy:  {}", caps.default_strategy);
        println!("chunk size:        {}", caps.chunk_size);
        println!("poll interval:     {}ms", caps.poll_interval_ms);
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn timeout_parsing() {
        assert_eq!(parse_timeout("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("-2").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::try_parse_from(["procpipe", "run", "--input", "a", "--input", "b", "--", "cat", "-n"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.inputs, vec!["a", "b"]);
        assert_eq!(args.command, vec![OsString::from("cat"), OsString::from("-n")]);
    }

    #[test]
    fn tty_and_pty_conflict() {
        assert!(Cli::try_parse_from(["procpipe", "run", "--tty", "--pty", "--", "true"]).is_err());
    }

    #[test]
    fn strategy_flag_parses() {
        let cli = Cli::try_parse_from(["procpipe", "run", "--strategy", "temp-files", "--", "true"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.strategy, Some(StrategyKind::TempFiles));
    }

    #[test]
    fn timeout_error_maps_to_exit_code() {
        let err = anyhow::Error::from(procpipe_core::Error::TimedOut {
            after: Duration::from_secs(1),
        });
        assert_eq!(exit_code_for(&err), EXIT_TIMEOUT);
        let err = anyhow::Error::from(procpipe_core::Error::Spawn(io::ErrorKind::NotFound.into()));
        assert_eq!(exit_code_for(&err), EXIT_NOT_FOUND);
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), EXIT_INTERNAL);
    }
}
