//! Call kinds and engine status codes.

use std::fmt;

use super::value::{Map, Value};

/// How the engine answers a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Buffered without a flush and never answered. Errors surface on the next
    /// awaited call.
    Deferred,
    /// Flushed, never answered.
    NoReply,
    /// Answered by the terminal message only.
    Status,
    /// Answered by any number of result messages, then the terminal message.
    Stream,
}

/// Methods understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Hello,
    SetSystem,
    SetLattice,
    Solve,
    Optimize,
    DeleteResults,
    ParseInput,
    Exit,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Hello,
        Method::SetSystem,
        Method::SetLattice,
        Method::Solve,
        Method::Optimize,
        Method::DeleteResults,
        Method::ParseInput,
        Method::Exit,
    ];

    /// Name used as the single key of an outbound message.
    pub fn name(self) -> &'static str {
        match self {
            Method::Hello => "Hello",
            Method::SetSystem => "SetSystem",
            Method::SetLattice => "SetLattice",
            Method::Solve => "Solve",
            Method::Optimize => "Optimize",
            Method::DeleteResults => "DeleteResults",
            Method::ParseInput => "ParseInput",
            Method::Exit => "Exit",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn reply_kind(self) -> ReplyKind {
        match self {
            Method::SetSystem | Method::SetLattice => ReplyKind::Deferred,
            Method::Exit => ReplyKind::NoReply,
            Method::Hello | Method::DeleteResults => ReplyKind::Status,
            Method::Solve | Method::Optimize | Method::ParseInput => ReplyKind::Stream,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status carried by a terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    Success,
    DecodeError,
    LogicError,
    RuntimeError,
    UnknownVersion,
    UnknownMethod,
    UnknownArgument,
    InvalidArgument,
    Other(i64),
}

impl PipeStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => PipeStatus::Success,
            1 => PipeStatus::DecodeError,
            2 => PipeStatus::LogicError,
            3 => PipeStatus::RuntimeError,
            4 => PipeStatus::UnknownVersion,
            5 => PipeStatus::UnknownMethod,
            6 => PipeStatus::UnknownArgument,
            7 => PipeStatus::InvalidArgument,
            other => PipeStatus::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            PipeStatus::Success => 0,
            PipeStatus::DecodeError => 1,
            PipeStatus::LogicError => 2,
            PipeStatus::RuntimeError => 3,
            PipeStatus::UnknownVersion => 4,
            PipeStatus::UnknownMethod => 5,
            PipeStatus::UnknownArgument => 6,
            PipeStatus::InvalidArgument => 7,
            PipeStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for PipeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeStatus::Success => f.write_str("success"),
            PipeStatus::DecodeError => f.write_str("decode error"),
            PipeStatus::LogicError => f.write_str("logic error"),
            PipeStatus::RuntimeError => f.write_str("runtime error"),
            PipeStatus::UnknownVersion => f.write_str("unknown version"),
            PipeStatus::UnknownMethod => f.write_str("unknown method"),
            PipeStatus::UnknownArgument => f.write_str("unknown argument"),
            PipeStatus::InvalidArgument => f.write_str("invalid argument"),
            PipeStatus::Other(code) => write!(f, "status {}", code),
        }
    }
}

/// Failure reported by the engine through a nonzero terminal status.
///
/// The channel itself is still intact when this is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeError {
    pub status: PipeStatus,
    pub message: Option<String>,
    pub method: Option<String>,
    pub argument: Option<String>,
}

impl PipeError {
    /// Build from the payload of a `return` message.
    pub fn from_return(ret: &Map) -> Self {
        let text = |key: &str| ret.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            status: PipeStatus::from_code(ret.get("status").and_then(Value::as_i64).unwrap_or(-1)),
            message: text("message"),
            method: text("method"),
            argument: text("argument"),
        }
    }

    /// Payload of the `return` message describing this error.
    pub fn to_return(&self) -> Map {
        let mut ret = Map::new();
        ret.insert("status".into(), Value::Int(self.status.code()));
        if let Some(message) = &self.message {
            ret.insert("message".into(), message.as_str().into());
        }
        if let Some(method) = &self.method {
            ret.insert("method".into(), method.as_str().into());
        }
        if let Some(argument) = &self.argument {
            ret.insert("argument".into(), argument.as_str().into());
        }
        ret
    }
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine reported {}", self.status)?;
        if let Some(method) = &self.method {
            write!(f, " in {}", method)?;
        }
        if let Some(argument) = &self.argument {
            write!(f, " (argument {})", argument)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PipeError {}
