//! Observation source backed by the interactive `top` tool.
//!
//! Kept for compatibility with setups that validated their numbers against
//! `top`. The child's stdout is drained on a reader thread and forwarded line
//! by line over a channel, so the sampling loop can wait with a timeout.

pub mod parser;

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::collector::source::{Observation, Poll, SampleSource, SourceError};
use parser::{TopLine, global_cpu_usage, parse_line};

/// Reads `top` screen output and turns it into observations.
pub struct TopSource {
    child: Option<Child>,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    cpu_threads: usize,
}

impl TopSource {
    /// Builds the `top` invocation for the given refresh interval and PIDs.
    pub fn command(interval: f64, pids: &[u32]) -> Command {
        let pid_list = pids
            .iter()
            .map(|pid| pid.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let delay = interval.to_string();
        Self::piped_command(
            "top",
            ["-d", delay.as_str(), "-p", pid_list.as_str(), "-o", "PID"],
        )
    }

    /// A child command whose stdout we read.
    ///
    /// `top` needs the terminal, so the child stays in our foreground process
    /// group. A Ctrl-C therefore reaches it too; the sampler treats a source
    /// that closes right before the interrupt flag is set as interrupted.
    fn piped_command<I, S>(program: &str, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::piped());
        cmd
    }

    /// Starts `top` and begins reading its output.
    pub fn spawn(interval: f64, pids: &[u32], cpu_threads: usize) -> Result<Self, SourceError> {
        let mut cmd = Self::command(interval, pids);
        debug!("Spawning {:?}", cmd);
        let mut child = cmd.spawn().map_err(SourceError::Spawn)?;
        let stdout = child.stdout.take().ok_or(SourceError::NoStdout)?;

        let mut source = Self::from_reader(stdout, cpu_threads);
        source.child = Some(child);
        Ok(source)
    }

    /// Reads `top` output from any byte stream. Used for replaying captures.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, cpu_threads: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read top output: {}", e);
                        break;
                    }
                }
            }
            trace!("top reader finished");
        });

        Self {
            child: None,
            lines: rx,
            reader: Some(handle),
            cpu_threads: cpu_threads.max(1),
        }
    }

    /// Turns one line into zero or one observation.
    fn observe(&self, line: &str) -> Vec<Observation> {
        match parse_line(line) {
            Ok(TopLine::GlobalCpu { idle }) => {
                vec![Observation::GlobalCpu(global_cpu_usage(
                    idle,
                    self.cpu_threads,
                ))]
            }
            Ok(TopLine::ProcessCpu { pid, percent }) => {
                vec![Observation::ProcessCpu { pid, percent }]
            }
            Ok(TopLine::Ignore) => Vec::new(),
            Err(e) => {
                warn!(
                    "CPU usage could not be logged ({}), increase your interval if this issue persists",
                    e.message
                );
                Vec::new()
            }
        }
    }
}

impl SampleSource for TopSource {
    fn poll(&mut self, timeout: Duration) -> Poll {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Poll::Ready(self.observe(&line)),
            Err(RecvTimeoutError::Timeout) => Poll::Pending,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("top already exited: {}", e);
            }
            match child.wait() {
                Ok(status) => debug!("top exited with {}", status),
                Err(e) => warn!("Failed to reap top: {}", e),
            }
        }
        // The pipe is closed once the child is gone, so the reader ends too.
        if let Some(handle) = self.reader.take()
            && handle.join().is_err()
        {
            warn!("top reader thread panicked");
        }
    }
}

impl Drop for TopSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
