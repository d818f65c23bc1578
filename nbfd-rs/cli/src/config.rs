//! Configuration related structures
use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::{os::fd::RawFd, time::Duration};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

macro_rules! prefix {
    () => {
        "NBFD_"
    };
}

#[derive(CopyGetters, Debug, Deserialize, Eq, Getters, Parser, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[command(
    after_help("Every read and write is a single non-blocking syscall."),
    version
)]
/// Non-blocking file descriptor toolbox.
pub struct Config {
    #[get = "pub"]
    #[command(subcommand)]
    /// Possible subcommands.
    command: Commands,

    #[get_copy = "pub"]
    #[arg(
        default_value_t,
        env(concat!(prefix!(), "LOG_LEVEL")),
        global(true),
        long("log-level"),
        short('l'),
        value_enum,
        value_name("LEVEL")
    )]
    /// The logging level written to stderr.
    log_level: LogLevel,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, Subcommand)]
/// Possible subcommands.
pub enum Commands {
    /// Run a command with a FIFO as stdout and read its output without blocking.
    ///
    /// Every iteration waits at most the timeout for output, then reads once.
    Tail {
        #[arg(
            default_value_t = 100,
            env(concat!(prefix!(), "TIMEOUT_MS")),
            long("timeout-ms"),
            short('t'),
            value_name("MILLISECONDS")
        )]
        /// Maximum time to wait for output per iteration.
        timeout_ms: u64,

        #[arg(default_value_t = 10, long("count"), short('n'), value_name("COUNT"))]
        /// Number of read attempts.
        count: usize,

        #[arg(
            default_value_t = 4096,
            long("chunk-size"),
            short('s'),
            value_name("BYTES")
        )]
        /// Size of the read buffer.
        chunk_size: usize,

        #[arg(
            allow_hyphen_values(true),
            required(true),
            trailing_var_arg(true),
            value_name("COMMAND")
        )]
        /// The command to run, including its arguments.
        command: Vec<String>,
    },

    /// Run a command with a FIFO as stdin and write a payload to it without blocking.
    Feed {
        #[arg(
            default_value_t = 100,
            env(concat!(prefix!(), "TIMEOUT_MS")),
            long("timeout-ms"),
            short('t'),
            value_name("MILLISECONDS")
        )]
        /// Maximum time to wait for buffer space per attempt.
        timeout_ms: u64,

        #[arg(long("data"), short('d'), value_name("STRING"))]
        /// The data to write.
        data: String,

        #[arg(default_value_t = 1, long("repeat"), short('r'), value_name("TIMES"))]
        /// Repeat the data this many times.
        repeat: usize,

        #[arg(
            default_value_t = 10,
            long("attempts"),
            short('a'),
            value_name("COUNT")
        )]
        /// Number of write attempts before giving up.
        attempts: usize,

        #[arg(
            allow_hyphen_values(true),
            required(true),
            trailing_var_arg(true),
            value_name("COMMAND")
        )]
        /// The command to run, including its arguments.
        command: Vec<String>,
    },

    /// Print the flags and satisfied capabilities of an inherited descriptor.
    Inspect {
        #[arg(long("fd"), short('f'), value_name("FD"))]
        /// The descriptor number.
        fd: RawFd,

        #[arg(default_value_t, long("format"), value_enum, value_name("FORMAT"))]
        /// The output format.
        format: OutputFormat,
    },

    /// Switch an inherited descriptor to non-blocking mode.
    Unblock {
        #[arg(long("fd"), short('f'), value_name("FD"))]
        /// The descriptor number.
        fd: RawFd,
    },
}

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    PartialEq,
    Serialize,
    ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
/// Available log levels.
pub enum LogLevel {
    /// Trace level, the most verbose one.
    Trace,

    /// Debug level, less verbose than trace.
    Debug,

    /// Info level, less verbose than debug.
    #[default]
    Info,

    /// Warn level, less verbose than info.
    Warn,

    /// Error level, showing only errors.
    Error,

    /// Disable logging.
    Off,
}

#[derive(
    AsRefStr,
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    PartialEq,
    Serialize,
    ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
/// Available output formats.
pub enum OutputFormat {
    /// Human readable text.
    #[default]
    Text,

    /// A single JSON object.
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

impl Config {
    /// Validate the configuration integrity.
    pub fn validate(&self) -> Result<()> {
        match self.command() {
            Commands::Tail {
                count, chunk_size, ..
            } => {
                if *chunk_size == 0 {
                    bail!("--chunk-size must be greater than zero")
                }
                if *count == 0 {
                    bail!("--count must be greater than zero")
                }
            }
            Commands::Feed {
                data,
                repeat,
                attempts,
                ..
            } => {
                if data.is_empty() || *repeat == 0 {
                    bail!("nothing to write, --data and --repeat must not be empty")
                }
                if *attempts == 0 {
                    bail!("--attempts must be greater than zero")
                }
            }
            Commands::Inspect { fd, .. } | Commands::Unblock { fd } => {
                if *fd < 0 {
                    bail!("--fd must not be negative")
                }
            }
        }
        Ok(())
    }
}

/// Convert a millisecond option into a timeout.
pub fn timeout(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter;

    fn parse(args: &[&str]) -> Result<Config> {
        Ok(Config::try_parse_from(
            iter::once("nbfd").chain(args.iter().copied()),
        )?)
    }

    #[test]
    fn parse_tail() -> Result<()> {
        let config = parse(&[
            "tail",
            "--timeout-ms",
            "250",
            "--",
            "sh",
            "-c",
            "echo foo",
        ])?;
        config.validate()?;
        assert_eq!(config.log_level(), LogLevel::Info);
        assert_eq!(
            config.command(),
            &Commands::Tail {
                timeout_ms: 250,
                count: 10,
                chunk_size: 4096,
                command: vec!["sh".into(), "-c".into(), "echo foo".into()],
            }
        );
        Ok(())
    }

    #[test]
    fn parse_tail_without_separator() -> Result<()> {
        let config = parse(&["-l", "debug", "tail", "cat", "-u"])?;
        assert_eq!(config.log_level(), LogLevel::Debug);
        match config.command() {
            Commands::Tail { command, .. } => assert_eq!(command, &["cat", "-u"]),
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn parse_tail_requires_command() {
        assert!(parse(&["tail"]).is_err());
    }

    #[test]
    fn validate_rejects_zero_chunk_size() -> Result<()> {
        let config = parse(&["tail", "--chunk-size", "0", "--", "true"])?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn parse_feed() -> Result<()> {
        let config = parse(&["feed", "-d", "foo", "-r", "3", "--", "cat"])?;
        config.validate()?;
        match config.command() {
            Commands::Feed {
                data,
                repeat,
                attempts,
                timeout_ms,
                ..
            } => {
                assert_eq!(data, "foo");
                assert_eq!(*repeat, 3);
                assert_eq!(*attempts, 10);
                assert_eq!(timeout(*timeout_ms), Duration::from_millis(100));
            }
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn validate_rejects_empty_payload() -> Result<()> {
        let config = parse(&["feed", "--data", "", "--", "cat"])?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn parse_inspect() -> Result<()> {
        let config = parse(&["inspect", "--fd", "0", "--format", "json"])?;
        config.validate()?;
        assert_eq!(
            config.command(),
            &Commands::Inspect {
                fd: 0,
                format: OutputFormat::Json
            }
        );
        Ok(())
    }

    #[test]
    fn log_level_names_match_filters() {
        assert_eq!(LogLevel::Off.as_ref(), "off");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }
}
