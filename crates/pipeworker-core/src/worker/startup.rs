//! Named pipe creation and the watchdog-guarded open of the caller's ends.
//!
//! Opening a FIFO blocks until the other side opens it too. If the engine dies
//! before it gets that far, the caller would hang forever, so a watchdog polls
//! the child while the caller opens its ends. When the child is gone, the
//! watchdog opens the opposite ends itself and lets the caller through; the
//! caller then sees the dead child and reports a startup failure.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Create a FIFO readable and writable by the current user only.
pub(crate) fn make_fifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| Error::Ipc(format!("Invalid pipe path {}: {}", path.display(), e)))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(Error::Ipc(format!(
            "Failed to create pipe {}: {}",
            path.display(),
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Open the write end of `call_path` and the read end of `reply_path`.
///
/// The engine opens the same pipes in the same order (call first), so the
/// two sides cannot wait on each other crosswise.
pub(crate) fn open_endpoints(
    child: &mut Child,
    call_path: &Path,
    reply_path: &Path,
    interval: Duration,
) -> Result<(File, File)> {
    let opened = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| watch(child, &opened, call_path, reply_path, interval));

        let result = open_pair(call_path, reply_path);
        opened.store(true, Ordering::Release);
        result
    })
}

fn open_pair(call_path: &Path, reply_path: &Path) -> Result<(File, File)> {
    let call = OpenOptions::new()
        .write(true)
        .open(call_path)
        .map_err(|e| Error::Ipc(format!("Failed to open {}: {}", call_path.display(), e)))?;
    let reply = OpenOptions::new()
        .read(true)
        .open(reply_path)
        .map_err(|e| Error::Ipc(format!("Failed to open {}: {}", reply_path.display(), e)))?;
    Ok((call, reply))
}

fn watch(
    child: &mut Child,
    opened: &AtomicBool,
    call_path: &Path,
    reply_path: &Path,
    interval: Duration,
) {
    while !opened.load(Ordering::Acquire) {
        match child.try_wait() {
            Ok(None) => thread::sleep(interval),
            Ok(Some(status)) => {
                debug!(%status, "Engine exited during startup, unblocking pipes");
                unblock(opened, call_path, reply_path, interval);
                return;
            }
            Err(e) => {
                warn!("Failed to poll engine process: {}", e);
                unblock(opened, call_path, reply_path, interval);
                return;
            }
        }
    }
}

/// Stand in for the engine's ends until the caller has opened its own.
///
/// Both opens are non-blocking. The write end can only be opened once the
/// caller waits on the read end, so it is retried every `interval`.
fn unblock(opened: &AtomicBool, call_path: &Path, reply_path: &Path, interval: Duration) {
    let _call = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(call_path);
    let mut reply = None;

    while !opened.load(Ordering::Acquire) {
        if reply.is_none() {
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(reply_path)
            {
                Ok(file) => reply = Some(file),
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {}
                Err(e) => {
                    warn!("Failed to open {}: {}", reply_path.display(), e);
                    return;
                }
            }
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::process::Command;

    #[test]
    fn test_make_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        make_fifo(&path).unwrap();
        assert!(path.exists());
        // A second FIFO at the same path is an error.
        assert!(matches!(make_fifo(&path), Err(Error::Ipc(_))));
    }

    #[test]
    fn test_dead_child_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let call = dir.path().join("call_pipe");
        let reply = dir.path().join("reply_pipe");
        make_fifo(&call).unwrap();
        make_fifo(&reply).unwrap();

        let mut child = Command::new("sh").arg("-c").arg("exit 3").spawn().unwrap();
        let result = open_endpoints(&mut child, &call, &reply, Duration::from_millis(5));

        assert!(result.is_ok());
        assert_eq!(child.wait().unwrap().code(), Some(3));
    }

    #[test]
    fn test_live_partner() {
        let dir = tempfile::tempdir().unwrap();
        let call = dir.path().join("call_pipe");
        let reply = dir.path().join("reply_pipe");
        make_fifo(&call).unwrap();
        make_fifo(&reply).unwrap();

        // Echo one byte from the call pipe back on the reply pipe.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("exec 3<call_pipe 4>reply_pipe; head -c 1 <&3 >&4")
            .current_dir(dir.path())
            .spawn()
            .unwrap();
        let (mut writer, mut reader) =
            open_endpoints(&mut child, &call, &reply, Duration::from_millis(5)).unwrap();

        writer.write_all(b"x").unwrap();
        drop(writer);
        let mut echoed = String::new();
        reader.read_to_string(&mut echoed).unwrap();
        assert_eq!(echoed, "x");
        assert!(child.wait().unwrap().success());
    }
}
