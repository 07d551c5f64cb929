//! Pipe protocol spoken with engine processes.
//!
//! Frames are length-prefixed CBOR maps. Outbound messages hold a single key,
//! the method name, mapping to the call arguments. Replies are zero or more
//! result messages followed by one `{"return": {"status": ..}}` message.

pub mod arrays;
mod channel;
pub mod frame;
pub mod message;
mod method;
mod value;

pub use arrays::{flatten, unflatten};
pub use channel::{CallChannel, RETURN_KEY};
pub use frame::{read_frame, read_frame_limited, write_frame};
pub use method::{Method, PipeError, PipeStatus, ReplyKind};
pub use value::{ArrayData, Map, NdArray, Value};
