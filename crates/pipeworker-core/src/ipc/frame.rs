//! Length-prefixed framing for the call and reply pipes.
//!
//! Format: 4-byte length (i32, native byte order) + payload bytes.

use std::io::{ErrorKind, Read, Write};

use crate::error::{Error, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Default upper bound accepted when reading a frame (256MB).
pub const DEFAULT_MAX_FRAME: usize = 256 * 1024 * 1024;

/// Write one frame. The caller decides when to flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        size: payload.len(),
        limit: i32::MAX as usize,
    })?;

    writer
        .write_all(&len.to_ne_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write frame length: {}", e)))?;
    writer
        .write_all(payload)
        .map_err(|e| Error::Ipc(format!("Failed to write frame body: {}", e)))?;

    Ok(())
}

/// Read one frame using [`DEFAULT_MAX_FRAME`] as the size limit.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    read_frame_limited(reader, DEFAULT_MAX_FRAME)
}

/// Read one frame, rejecting lengths above `limit`.
///
/// A stream that ends part-way through the prefix or the body yields
/// [`Error::TruncatedMessage`].
pub fn read_frame_limited<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; LENGTH_PREFIX];
    let received = read_full(reader, &mut len_bytes)?;
    if received < LENGTH_PREFIX {
        return Err(Error::TruncatedMessage {
            expected: LENGTH_PREFIX,
            received,
        });
    }

    let len = i32::from_ne_bytes(len_bytes);
    if len < 0 {
        return Err(Error::Ipc(format!("Negative frame length: {}", len)));
    }
    let len = len as usize;
    if len > limit {
        return Err(Error::FrameTooLarge { size: len, limit });
    }

    let mut body = vec![0u8; len];
    let received = read_full(reader, &mut body)?;
    if received < len {
        return Err(Error::TruncatedMessage {
            expected: len,
            received,
        });
    }

    Ok(body)
}

/// Fill `buf` until it is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Ipc(format!("Failed to read frame: {}", e))),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").unwrap();
        write_frame(&mut buf, b"").unwrap();
        assert_eq!(buf.len(), 2 * LENGTH_PREFIX + 5);
        assert_eq!(&buf[..4], &5i32.to_ne_bytes());

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"hello");
        assert!(read_frame(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_body() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[7u8; 32]).unwrap();
        buf.truncate(LENGTH_PREFIX + 10);

        let err = read_frame(&mut Cursor::new(buf)).unwrap_err();
        match err {
            Error::TruncatedMessage { expected, received } => {
                assert_eq!(expected, 32);
                assert_eq!(received, 10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_prefix() {
        let err = read_frame(&mut Cursor::new(vec![1u8, 0])).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedMessage {
                expected: 4,
                received: 2
            }
        ));

        let err = read_frame(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_negative_and_oversized_lengths() {
        let buf = (-1i32).to_ne_bytes().to_vec();
        assert!(matches!(
            read_frame(&mut Cursor::new(buf)).unwrap_err(),
            Error::Ipc(_)
        ));

        let mut buf = Vec::new();
        write_frame(&mut buf, &[0u8; 64]).unwrap();
        assert!(matches!(
            read_frame_limited(&mut Cursor::new(buf), 16).unwrap_err(),
            Error::FrameTooLarge { size: 64, limit: 16 }
        ));
    }

    #[test]
    fn test_write_to_closed_stream_is_ipc_error() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let err = write_frame(&mut Closed, b"x").unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
    }
}
