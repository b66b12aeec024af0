//! FIFO creation, opening, and scoped cleanup.
//!
//! The server opens the request FIFO once, in read *and* write mode: keeping
//! a writer of its own around means the pipe never reports EOF while idle,
//! so the dispatch loop can suspend on readiness instead of spinning on
//! zero-length reads. Clients open it write-only and non-blocking for the
//! duration of exactly one request send; that open fails immediately when no
//! reader exists, which is how "server down" is detected without blocking.

use std::io;
use std::path::Path;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::net::unix::pipe;

use crate::error::Result;

/// Well-known path of the shared request FIFO.
pub const REQUEST_FIFO_PATH: &str = "/tmp/secure_srv";

/// Prefix of per-client reply FIFO paths.
pub const REPLY_FIFO_PREFIX: &str = "/tmp/secure_";

/// Width of the zero-padded decimal pid suffix on reply FIFO paths.
pub const REPLY_PID_WIDTH: usize = 5;

/// Derive the reply FIFO path for a client process id.
///
/// The suffix is a fixed-width, zero-padded decimal so the path is
/// deterministic on both ends.
pub fn reply_path_for(prefix: &str, pid: u32) -> String {
    format!("{}{:0width$}", prefix, pid, width = REPLY_PID_WIDTH)
}

/// Create a FIFO at `path` with mode 0666, removing any stale file first.
pub fn create_fifo(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    mkfifo(path, Mode::from_bits_truncate(0o666))?;
    Ok(())
}

/// Open the request FIFO for the server's entire lifetime.
///
/// Opened with `read_write` so the descriptor doubles as a writer and the
/// FIFO never yields EOF between clients.
pub fn open_request_reader(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().read_write(true).open_receiver(path)
}

/// Open the request FIFO write-only for one request send (client side).
///
/// Fails immediately (`ENXIO`) when no server is reading, or with a
/// permission error once the server has sealed the FIFO for shutdown.
pub fn open_request_writer(path: &Path) -> io::Result<pipe::Sender> {
    pipe::OpenOptions::new().open_sender(path)
}

/// Open a client's private reply FIFO for reading (client side).
///
/// Also opened `read_write` so reads suspend until the server's reply
/// arrives instead of hitting EOF while no writer exists yet.
pub fn open_reply_reader(path: &Path) -> io::Result<pipe::Receiver> {
    pipe::OpenOptions::new().read_write(true).open_receiver(path)
}

/// Open a client's reply FIFO write-only and non-blocking (server side).
///
/// Fails when the client has already given up and removed its FIFO, or no
/// longer reads it; the caller downgrades the result to `UsrDown`.
pub fn open_reply_writer(path: &Path) -> io::Result<pipe::Sender> {
    pipe::OpenOptions::new().open_sender(path)
}

/// Read exactly `buf.len()` bytes from a FIFO receiver.
///
/// Suspends on readiness between short reads. Frames are written by the
/// peer in a single `write`, so in practice this completes in one pass, but
/// partial delivery is handled regardless.
pub async fn read_exact(rx: &pipe::Receiver, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        rx.readable().await?;
        match rx.try_read(&mut buf[filled..]) {
            Ok(0) => continue,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Cleanup guard that removes a FIFO from the filesystem namespace on drop.
///
/// Clients hold one for their private reply FIFO so it disappears on exit
/// regardless of outcome; the server holds one for the request FIFO.
pub struct FifoCleanup {
    path: std::path::PathBuf,
}

impl FifoCleanup {
    /// Create a guard that will remove `path` on drop.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Drop for FifoCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_path_fixed_width() {
        assert_eq!(reply_path_for("/tmp/secure_", 42), "/tmp/secure_00042");
        assert_eq!(reply_path_for("/tmp/secure_", 12345), "/tmp/secure_12345");
    }

    #[test]
    fn test_reply_path_wide_pid_not_truncated() {
        assert_eq!(reply_path_for("/tmp/secure_", 1234567), "/tmp/secure_1234567");
    }

    #[test]
    fn test_create_fifo_and_cleanup_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo_test");

        create_fifo(&path).unwrap();
        assert!(path.exists());

        // Recreating over a stale FIFO succeeds.
        create_fifo(&path).unwrap();
        assert!(path.exists());

        {
            let _guard = FifoCleanup::new(&path);
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_request_writer_fails_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_reader");
        create_fifo(&path).unwrap();

        // No receiver has the FIFO open: the non-blocking open must fail
        // immediately rather than block.
        assert!(open_request_writer(&path).is_err());
    }

    #[tokio::test]
    async fn test_read_exact_across_partial_writes() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial");
        create_fifo(&path).unwrap();

        let rx = open_request_reader(&path).unwrap();
        let mut tx = open_request_writer(&path).unwrap();

        let writer = tokio::spawn(async move {
            tx.write_all(b"abc").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.write_all(b"defgh").await.unwrap();
        });

        let mut buf = [0u8; 8];
        read_exact(&rx, &mut buf).await.unwrap();
        assert_eq!(&buf, b"abcdefgh");
        writer.await.unwrap();
    }
}
