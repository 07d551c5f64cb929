//! Error types for pipeworker-core.

use std::fmt;

use thiserror::Error;

use crate::ipc::PipeError;

/// Result type for pipeworker-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Lines captured from a worker's standard output and error files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    /// True when neither stream produced any output.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Add the lines of `other` after the ones already captured.
    pub fn append(&mut self, mut other: CapturedOutput) {
        self.stdout.append(&mut other.stdout);
        self.stderr.append(&mut other.stderr);
    }
}

/// Errors that can occur in pipeworker-core.
#[derive(Debug, Error)]
pub enum Error {
    /// IPC communication with the worker process broke down.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The stream ended before a complete frame was read.
    #[error("truncated message: expected {expected} bytes, received {received}")]
    TruncatedMessage { expected: usize, received: usize },

    /// A frame length outside the accepted range.
    #[error("frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine answered a call with a nonzero status.
    #[error(transparent)]
    Pipe(#[from] PipeError),

    /// The worker process could not be brought up.
    #[error("worker startup failed: {message}")]
    Startup {
        message: String,
        output: CapturedOutput,
    },

    /// A transport failure, with the worker output captured while recovering.
    #[error("worker failure: {source}")]
    Recovered {
        source: Box<Error>,
        output: CapturedOutput,
    },

    /// The name is still held in the restart cache.
    #[error("name \"{0}\" is already associated with results from the restart cache")]
    DuplicateName(String),

    /// Invalid operation (e.g. evaluating on a stopped worker).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Settings that cannot be translated into worker requests.
    #[error("unsupported settings: {0}")]
    UnsupportedSettings(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more pool members failed to start.
    #[error("{failed} of {total} workers failed to start: {first}")]
    PoolStartup {
        failed: usize,
        total: usize,
        first: Box<Error>,
    },
}

impl Error {
    /// True for failures of the channel itself rather than of a single call.
    ///
    /// A transport failure means the worker can no longer be trusted and has to
    /// be restarted before the next call.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Ipc(_)
            | Error::TruncatedMessage { .. }
            | Error::FrameTooLarge { .. }
            | Error::Serialization(_)
            | Error::Deserialization(_)
            | Error::Io(_) => true,
            Error::Recovered { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Worker output attached to this error, if any was captured.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            Error::Startup { output, .. } | Error::Recovered { output, .. } => Some(output),
            Error::PoolStartup { first, .. } => first.output(),
            _ => None,
        }
    }

    /// Attach captured worker output to a transport error.
    pub fn recovered(self, output: CapturedOutput) -> Error {
        Error::Recovered {
            source: Box::new(self),
            output,
        }
    }

    /// Render the error followed by the worker's stderr, if any was captured.
    pub fn with_hint(&self) -> String {
        let mut text = self.to_string();
        if let Some(output) = self.output() {
            for line in &output.stderr {
                text.push('\n');
                text.push_str(line.trim_end());
            }
        }
        text
    }

    /// The most specific error line available.
    ///
    /// Engines prefix their diagnostics with `ERROR: `; the last such line wins.
    /// Falls back to the last line of the rendered error.
    pub fn error_message(&self) -> String {
        let text = self.with_hint();
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return "Could not determine error message. Please check the worker stdout and stderr manually."
                .to_string();
        }
        for line in lines.iter().rev() {
            if let Some((_, message)) = line.split_once("ERROR: ") {
                return message.to_string();
            }
        }
        lines[lines.len() - 1].to_string()
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.stdout {
            writeln!(f, "{}", line.trim_end())?;
        }
        for line in &self.stderr {
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}
