//! One-call-at-a-time request/reply channel over a pair of byte streams.

use std::io::{Read, Write};

use tracing::{debug, trace};

use super::arrays::flatten;
use super::frame::{DEFAULT_MAX_FRAME, read_frame_limited, write_frame};
use super::message::{decode, encode};
use super::method::{Method, PipeError, ReplyKind};
use super::value::{Map, Value};
use crate::error::{Error, Result};

/// Key of the terminal message.
pub const RETURN_KEY: &str = "return";

/// Issues calls on the call stream and collects replies from the reply stream.
///
/// Calls take `&mut self`, so a channel never has two calls in flight. Share
/// it between threads only behind a lock that is held for the whole call.
pub struct CallChannel<W: Write, R: Read> {
    writer: W,
    reader: R,
    max_frame: usize,
}

impl<W: Write, R: Read> CallChannel<W, R> {
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            reader,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Limit the size of reply frames accepted from the engine.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Perform one call and return the intermediate reply messages.
    ///
    /// Arrays in `args` are flattened before encoding. Replies are returned as
    /// decoded, still flattened. A nonzero terminal status is reported as
    /// [`Error::Pipe`]; every other error means the channel is unusable.
    pub fn call(&mut self, method: Method, args: &Map) -> Result<Vec<Map>> {
        let mut message = Map::new();
        message.insert(method.name().to_string(), Value::Map(flatten(args)));
        let bytes = encode(&message)?;

        debug!(method = method.name(), bytes = bytes.len(), "Sending call");
        write_frame(&mut self.writer, &bytes)?;

        let kind = method.reply_kind();
        if kind == ReplyKind::Deferred {
            return Ok(Vec::new());
        }
        self.writer
            .flush()
            .map_err(|e| Error::Ipc(format!("Failed to flush call stream: {}", e)))?;
        if kind == ReplyKind::NoReply {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        loop {
            let frame = read_frame_limited(&mut self.reader, self.max_frame)
                .map_err(|e| Error::Ipc(format!("Error while reading a reply to {}: {}", method, e)))?;
            let mut reply = decode(&frame)
                .map_err(|e| Error::Ipc(format!("Error while decoding a reply to {}: {}", method, e)))?;

            if let Some(ret) = reply.remove(RETURN_KEY) {
                let Value::Map(ret) = ret else {
                    return Err(Error::Ipc(format!(
                        "Terminal message for {} is a {}, expected a map",
                        method,
                        ret.kind()
                    )));
                };
                let status = ret.get("status").and_then(Value::as_i64).ok_or_else(|| {
                    Error::Ipc(format!("Terminal message for {} carries no status", method))
                })?;
                trace!(method = method.name(), status, replies = results.len(), "Call finished");
                if status == 0 {
                    return Ok(results);
                }
                return Err(Error::Pipe(PipeError::from_return(&ret)));
            }

            if kind == ReplyKind::Status {
                return Err(Error::Ipc(format!(
                    "Unexpected result message in reply to {}",
                    method
                )));
            }
            results.push(reply);
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (W, R) {
        (self.writer, self.reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::frame::read_frame;
    use crate::ipc::method::PipeStatus;
    use crate::ipc::value::NdArray;
    use std::io::Cursor;

    fn reply_stream(messages: &[Map]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        for message in messages {
            write_frame(&mut buf, &encode(message).unwrap()).unwrap();
        }
        Cursor::new(buf)
    }

    fn terminal(status: i64) -> Map {
        let mut ret = Map::new();
        ret.insert("status".into(), Value::Int(status));
        let mut msg = Map::new();
        msg.insert(RETURN_KEY.into(), Value::Map(ret));
        msg
    }

    fn result_message(energy: f64) -> Map {
        let mut results = Map::new();
        results.insert("energy".into(), Value::Float(energy));
        let mut msg = Map::new();
        msg.insert("results".into(), Value::Map(results));
        msg
    }

    fn sent_messages(writer: Vec<u8>) -> Vec<Map> {
        let mut cursor = Cursor::new(writer);
        let mut out = Vec::new();
        while (cursor.position() as usize) < cursor.get_ref().len() {
            out.push(decode(&read_frame(&mut cursor).unwrap()).unwrap());
        }
        out
    }

    #[test]
    fn test_stream_call_collects_results() {
        let replies = reply_stream(&[result_message(-1.0), result_message(-2.0), terminal(0)]);
        let mut channel = CallChannel::new(Vec::new(), replies);

        let results = channel.call(Method::Solve, &Map::new()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1]["results"].as_map().unwrap()["energy"],
            Value::Float(-2.0)
        );
    }

    #[test]
    fn test_outbound_message_is_flattened() {
        let mut args = Map::new();
        args.insert("coords".into(), NdArray::from_rows(&[[0.0, 0.0, 1.0]]).into());
        let mut channel = CallChannel::new(Vec::new(), reply_stream(&[]));

        channel.call(Method::SetSystem, &args).unwrap();
        let (writer, _) = channel.into_parts();
        let sent = sent_messages(writer);

        assert_eq!(sent.len(), 1);
        let body = sent[0]["SetSystem"].as_map().unwrap();
        assert!(body.contains_key("coords_dim_"));
        assert!(matches!(body["coords"], Value::List(_)));
    }

    #[test]
    fn test_deferred_and_exit_do_not_read() {
        // An empty reply stream would fail any read.
        let mut channel = CallChannel::new(Vec::new(), reply_stream(&[]));
        assert!(channel.call(Method::SetLattice, &Map::new()).unwrap().is_empty());
        assert!(channel.call(Method::Exit, &Map::new()).unwrap().is_empty());
    }

    #[test]
    fn test_nonzero_status_is_pipe_error() {
        let mut ret = Map::new();
        ret.insert("status".into(), Value::Int(3));
        ret.insert("message".into(), "did not converge".into());
        let mut msg = Map::new();
        msg.insert(RETURN_KEY.into(), Value::Map(ret));

        let mut channel = CallChannel::new(Vec::new(), reply_stream(&[msg]));
        match channel.call(Method::Solve, &Map::new()).unwrap_err() {
            Error::Pipe(err) => {
                assert_eq!(err.status, PipeStatus::RuntimeError);
                assert_eq!(err.message.as_deref(), Some("did not converge"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_terminal_is_transport_error() {
        let replies = reply_stream(&[result_message(-1.0)]);
        let mut channel = CallChannel::new(Vec::new(), replies);
        let err = channel.call(Method::Solve, &Map::new()).unwrap_err();
        assert!(err.is_transport(), "{:?}", err);
    }

    #[test]
    fn test_status_call_rejects_results() {
        let replies = reply_stream(&[result_message(-1.0), terminal(0)]);
        let mut channel = CallChannel::new(Vec::new(), replies);
        let err = channel.call(Method::Hello, &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
    }

    #[test]
    fn test_status_call_succeeds() {
        let mut channel = CallChannel::new(Vec::new(), reply_stream(&[terminal(0)]));
        let mut args = Map::new();
        args.insert("version".into(), Value::Int(1));
        assert!(channel.call(Method::Hello, &args).unwrap().is_empty());
    }
}
