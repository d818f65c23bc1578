use crate::{
    config::{self, Commands, Config, OutputFormat},
    report::Report,
};
use anyhow::{Context, Result, format_err};
use getset::Getters;
use nbfd::{NonBlockingFd, create_fifo, set_non_blocking_raw};
use std::{
    io::{self, Write},
    os::fd::RawFd,
    process::{Child, Command, Stdio},
    str::FromStr,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, prelude::*};

#[derive(Debug, Getters)]
/// Executes the configured subcommand.
pub struct Runner {
    #[getset(get = "pub(crate)")]
    config: Config,
}

impl Runner {
    /// Create a new `Runner` from the command line.
    pub fn new() -> Result<Self> {
        let runner = Self {
            config: Default::default(),
        };
        runner.config().validate().context("validate config")?;
        runner.init_logging().context("init logging")?;
        Ok(runner)
    }

    /// Run the configured subcommand and consume the runner.
    pub fn run(self) -> Result<()> {
        match self.config().command().clone() {
            Commands::Tail {
                timeout_ms,
                count,
                chunk_size,
                command,
            } => Self::tail(&command, config::timeout(timeout_ms), count, chunk_size),
            Commands::Feed {
                timeout_ms,
                data,
                repeat,
                attempts,
                command,
            } => Self::feed(
                &command,
                config::timeout(timeout_ms),
                data.repeat(repeat).as_bytes(),
                attempts,
            ),
            Commands::Inspect { fd, format } => Self::inspect(fd, format),
            Commands::Unblock { fd } => Self::unblock(fd),
        }
    }

    fn init_logging(&self) -> Result<()> {
        let level = LevelFilter::from_str(self.config().log_level().as_ref())
            .context("convert log level filter")?;

        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_writer(io::stderr)
            .with_filter(level);
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .context("init stderr fmt layer")?;
        debug!("Using log level {}", self.config().log_level());
        Ok(())
    }

    fn spawn(command: &[String], stdin: Stdio, stdout: Stdio) -> Result<Child> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| format_err!("no command specified"))?;
        let child = Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .spawn()
            .with_context(|| format!("spawn {program}"))?;
        info!("Spawned {} with pid {}", program, child.id());
        Ok(child)
    }

    fn tail(command: &[String], timeout: Duration, count: usize, chunk_size: usize) -> Result<()> {
        let mut output = create_fifo().context("create output FIFO")?;
        let mut child = Self::spawn(
            command,
            Stdio::null(),
            output.as_stdio().context("attach FIFO as stdout")?,
        )?;

        let res = Self::tail_loop(&mut output, timeout, count, chunk_size);
        Self::stop(&mut child);
        output.close().context("close output FIFO")?;
        res
    }

    fn tail_loop(
        output: &mut NonBlockingFd,
        timeout: Duration,
        count: usize,
        chunk_size: usize,
    ) -> Result<()> {
        let mut buf = vec![0; chunk_size];
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for i in 1..=count {
            let start = Instant::now();
            match output.wait_then_read(&mut buf, timeout) {
                Ok(0) => {
                    info!("End of input after {} reads", i);
                    break;
                }
                Ok(n) => {
                    debug!("Read {} bytes in {:?} ({}/{})", n, start.elapsed(), i, count);
                    stdout.write_all(&buf[..n]).context("write to stdout")?;
                    stdout.flush().context("flush stdout")?;
                }
                Err(e) if e.is_would_block() => {
                    debug!("No output within {:?} ({}/{})", start.elapsed(), i, count)
                }
                Err(e) => return Err(e).context("read child output"),
            }
        }
        Ok(())
    }

    fn feed(command: &[String], timeout: Duration, payload: &[u8], attempts: usize) -> Result<()> {
        let mut input = create_fifo().context("create input FIFO")?;
        let mut child = Self::spawn(
            command,
            input.as_stdio().context("attach FIFO as stdin")?,
            Stdio::inherit(),
        )?;

        let res = Self::feed_loop(&mut input, timeout, payload, attempts);
        Self::stop(&mut child);
        input.close().context("close input FIFO")?;

        let written = res?;
        println!("wrote {} of {} bytes", written, payload.len());
        Ok(())
    }

    fn feed_loop(
        input: &mut NonBlockingFd,
        timeout: Duration,
        payload: &[u8],
        attempts: usize,
    ) -> Result<usize> {
        let mut written = 0;
        for i in 1..=attempts {
            if written == payload.len() {
                break;
            }
            match input.wait_then_write(&payload[written..], timeout) {
                Ok(n) => {
                    written += n;
                    debug!("Wrote {} bytes, {} in total ({}/{})", n, written, i, attempts);
                }
                Err(e) if e.is_would_block() => {
                    debug!("No buffer space within {:?} ({}/{})", timeout, i, attempts)
                }
                Err(e) => return Err(e).context("write child input"),
            }
        }

        if written < payload.len() {
            warn!(
                "Gave up after {} attempts with {} bytes left",
                attempts,
                payload.len() - written
            );
        }
        Ok(written)
    }

    fn stop(child: &mut Child) {
        match child.try_wait() {
            Ok(Some(status)) => debug!("Child exited with {}", status),
            _ => {
                if let Err(e) = child.kill() {
                    warn!("Unable to kill child {}: {}", child.id(), e);
                }
                if let Err(e) = child.wait() {
                    warn!("Unable to wait for child {}: {}", child.id(), e);
                }
            }
        }
    }

    fn inspect(fd: RawFd, format: OutputFormat) -> Result<()> {
        let report = Report::new(fd).with_context(|| format!("inspect fd {fd}"))?;
        match format {
            OutputFormat::Text => print!("{report}"),
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string(&report).context("serialize report")?
            ),
        }
        Ok(())
    }

    fn unblock(fd: RawFd) -> Result<()> {
        set_non_blocking_raw(fd).with_context(|| format!("set fd {fd} to non-blocking"))?;
        info!("Fd {} is now non-blocking", fd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbfd::Error;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn spawn_requires_program() {
        assert!(Runner::spawn(&[], Stdio::null(), Stdio::null()).is_err());
    }

    #[test]
    fn tail_loop_reads_child_output() -> Result<()> {
        let mut output = create_fifo()?;
        let mut child = Runner::spawn(&sh("echo foo"), Stdio::null(), output.as_stdio()?)?;
        child.wait()?;

        let mut buf = [0; 16];
        let n = output.wait_then_read(&mut buf, Duration::from_secs(1))?;
        assert_eq!(&buf[..n], b"foo\n");
        assert!(matches!(output.read(&mut buf), Err(Error::WouldBlock)));
        Ok(())
    }

    #[test]
    fn feed_loop_stops_at_full_buffer() -> Result<()> {
        let mut input = create_fifo()?;
        let mut child = Runner::spawn(&sh("sleep 5"), input.as_stdio()?, Stdio::null())?;

        let payload = vec![b'x'; 1 << 20];
        let written = Runner::feed_loop(&mut input, Duration::from_millis(10), &payload, 3)?;
        Runner::stop(&mut child);

        assert!(written > 0 && written < payload.len());
        Ok(())
    }
}
