//! Container log retrieval.
//!
//! The engine multiplexes stdout and stderr into one frame stream. A
//! [`LogSink`] receives the demultiplexed chunks as they arrive;
//! [`LogBuffer`] is the in-memory sink used to render a complete log.

use super::ContainerError;
use bollard::container::LogOutput;
use std::str::FromStr;

/// How much of the log to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTail {
    #[default]
    All,
    /// The last `n` lines of each stream
    Lines(u64),
}

impl FromStr for LogTail {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(LogTail::All);
        }
        s.parse::<u64>().map(LogTail::Lines).map_err(|_| {
            ContainerError::InvalidArgument(format!(
                "log tail must be \"all\" or a line count, got `{}`",
                s
            ))
        })
    }
}

impl std::fmt::Display for LogTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogTail::All => f.write_str("all"),
            LogTail::Lines(n) => write!(f, "{}", n),
        }
    }
}

/// Consumer of demultiplexed log output.
pub trait LogSink: Send {
    fn stdout(&mut self, chunk: &[u8]);
    fn stderr(&mut self, chunk: &[u8]);
}

/// Route one engine log frame to the matching sink stream.
///
/// Console frames (TTY containers) and echoed stdin count as stdout.
pub(crate) fn dispatch<S: LogSink + ?Sized>(sink: &mut S, frame: LogOutput) {
    match frame {
        LogOutput::StdErr { message } => sink.stderr(&message),
        LogOutput::StdOut { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => sink.stdout(&message),
    }
}

/// Buffers both streams in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout_bytes(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr_bytes(&self) -> &[u8] {
        &self.stderr
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Render as `STDOUT:\n<stdout>\nSTDERR:\n<stderr>`.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn render(&self) -> String {
        format!(
            "STDOUT:\n{}\nSTDERR:\n{}",
            String::from_utf8_lossy(&self.stdout),
            String::from_utf8_lossy(&self.stderr)
        )
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.stdout, self.stderr)
    }
}

impl LogSink for LogBuffer {
    fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }
}
