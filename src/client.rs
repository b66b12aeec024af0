//! Client runtime: one request, one reply, bounded waiting.
//!
//! The exchange is strictly one-shot. The client opens the shared request
//! FIFO for the duration of a single send; failure to open it means no
//! server is listening (or the server has sealed the FIFO for shutdown) and
//! an `SrvDown` reply is synthesized locally. The private reply FIFO is
//! created before the request goes out, so the server can never race ahead
//! of it, and is removed from the filesystem on return no matter how the
//! exchange ends.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;

use crate::audit;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::{
    OpKind, Reply, Request, RetCode, LENGTH_SIZE, MAX_REPLY_PAYLOAD, REPLY_HEADER_SIZE, TYPE_SIZE,
};
use crate::transport::fifo::{self, FifoCleanup};

/// Perform one request/reply exchange.
///
/// Always produces a [`Reply`]: transport-level failures surface as the
/// synthesized `SrvDown` and `SrvTimeout` outcomes, never as errors. `Err`
/// is reserved for local faults (FIFO creation, I/O on own channels).
///
/// # Example
///
/// ```no_run
/// use securebank::client;
/// use securebank::config::ClientConfig;
/// use securebank::protocol::Request;
///
/// # async fn demo() -> securebank::Result<()> {
/// let request = Request::balance(std::process::id(), 1, "secret-pw", 0);
/// let reply = client::run_request(&ClientConfig::default(), &request).await?;
/// println!("{}", reply.ret_code.label());
/// # Ok(())
/// # }
/// ```
pub async fn run_request(config: &ClientConfig, request: &Request) -> Result<Reply> {
    audit::request(request.header.pid, request);
    let reply = exchange(config, request).await?;
    audit::reply(request.header.pid, &reply);
    Ok(reply)
}

async fn exchange(config: &ClientConfig, request: &Request) -> Result<Reply> {
    let pid = request.header.pid;

    // Opening write-only and non-blocking fails immediately when no reader
    // holds the FIFO, and with a permission error once it is sealed. Both
    // mean the same thing to the client: the server is gone.
    let mut tx = match fifo::open_request_writer(&config.request_fifo) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::debug!(error = %e, "request FIFO unreachable");
            return Ok(Reply::offline(
                request.kind,
                request.header.account_id,
                RetCode::SrvDown,
            ));
        }
    };

    let reply_path = PathBuf::from(fifo::reply_path_for(&config.reply_prefix, pid));
    fifo::create_fifo(&reply_path)?;
    let _cleanup = FifoCleanup::new(&reply_path);
    let rx = fifo::open_reply_reader(&reply_path)?;

    tx.write_all(&request.encode()).await?;
    drop(tx);

    wait_for_reply(config, request, &rx).await
}

/// Poll the private reply FIFO until a frame arrives or the window closes.
///
/// A once-a-second ticker reports remaining time while waiting, mirroring
/// the countdown a user watches on a stalled request.
async fn wait_for_reply(
    config: &ClientConfig,
    request: &Request,
    rx: &pipe::Receiver,
) -> Result<Reply> {
    let start = tokio::time::Instant::now();
    let deadline = start + config.timeout;

    let read = read_reply(rx);
    tokio::pin!(read);
    let mut ticker = tokio::time::interval_at(start + Duration::from_secs(1), Duration::from_secs(1));

    loop {
        tokio::select! {
            reply = &mut read => return reply,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(pid = request.header.pid, "reply window expired");
                return Ok(Reply::offline(
                    request.kind,
                    request.header.account_id,
                    RetCode::SrvTimeout,
                ));
            }
            _ = ticker.tick() => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                tracing::info!(
                    pid = request.header.pid,
                    remaining_s = remaining.as_secs(),
                    "waiting for reply"
                );
            }
        }
    }
}

/// Read frames off the reply FIFO until one parses; malformed frames are
/// discarded best-effort, same as the server-side reader.
async fn read_reply(rx: &pipe::Receiver) -> Result<Reply> {
    loop {
        let mut head = [0u8; TYPE_SIZE + LENGTH_SIZE];
        fifo::read_exact(rx, &mut head).await?;
        let raw_kind = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let length = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);

        if length < REPLY_HEADER_SIZE || length > MAX_REPLY_PAYLOAD {
            tracing::warn!(raw_kind, length, "reply length out of bounds, discarding");
            let mut sink = vec![0u8; length.min(MAX_REPLY_PAYLOAD) as usize];
            fifo::read_exact(rx, &mut sink).await?;
            continue;
        }
        let mut payload = vec![0u8; length as usize];
        fifo::read_exact(rx, &mut payload).await?;

        let Some(kind) = OpKind::from_wire(raw_kind) else {
            tracing::warn!(raw_kind, "unknown reply operation, discarding frame");
            continue;
        };
        match Reply::from_payload(kind, &payload) {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                tracing::warn!(?kind, error = %e, "unparseable reply, discarding frame");
            }
        }
    }
}
