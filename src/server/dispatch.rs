//! Dispatch loop: the single producer feeding the bank office pool.
//!
//! Reads frames off the shared request FIFO, validates framing, and pushes
//! decoded requests through the bounded queue protocol. Blocking on the
//! `empty` semaphore when the queue is full is the server's backpressure:
//! intake throttles to office capacity instead of buffering unboundedly.
//!
//! Reads are readiness-driven rather than busy-polled: the FIFO is held
//! open read-write so it never reports EOF between clients, and the loop
//! suspends on `readable()` whenever a non-blocking probe finds no pending
//! data. A probe that comes up empty is also the only point where the
//! shutdown exit condition (intent flag set, queue drained) is evaluated.

use std::sync::Arc;

use tokio::net::unix::pipe;

use crate::audit;
use crate::error::Result;
use crate::protocol::{
    OpKind, Request, LENGTH_SIZE, MAX_REQUEST_PAYLOAD, REQUEST_HEADER_SIZE, TYPE_SIZE,
};
use crate::transport::fifo;

use super::context::ServerContext;

/// How often the idle loop rechecks the shutdown exit condition. The
/// offices drain the queue without waking this loop, so a periodic check
/// backs up the explicit wakeup.
const IDLE_RECHECK_MS: u64 = 50;

/// Run the dispatch loop until shutdown completes its drain phase.
///
/// On exit the pool-wide stop flag is set; releasing blocked offices is the
/// caller's job (phase two of the shutdown protocol).
pub async fn run(ctx: Arc<ServerContext>, rx: pipe::Receiver) -> Result<()> {
    tracing::info!("dispatch loop running");
    loop {
        let Some(raw_kind) = next_type(&ctx, &rx).await? else {
            break;
        };
        if let Some(request) = read_frame(&rx, raw_kind).await? {
            enqueue(&ctx, request).await?;
        }
    }
    ctx.stop();
    tracing::info!("dispatch loop stopped");
    Ok(())
}

/// Read the next frame's `type` word, suspending while no data is pending.
///
/// Returns `None` when the loop should terminate instead: shutdown has been
/// requested, the queue has drained, and the FIFO holds no unread bytes.
async fn next_type(ctx: &ServerContext, rx: &pipe::Receiver) -> Result<Option<u32>> {
    loop {
        let mut buf = [0u8; TYPE_SIZE];
        match rx.try_read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if n < buf.len() {
                    fifo::read_exact(rx, &mut buf[n..]).await?;
                }
                return Ok(Some(u32::from_be_bytes(buf)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }

        // No data pending: the only state in which termination is checked,
        // so a request already on the wire is never abandoned.
        if ctx.shutdown_requested() && ctx.queue_len().await == 0 {
            return Ok(None);
        }

        tokio::select! {
            ready = rx.readable() => {
                ready?;
            }
            _ = ctx.shutdown_wakeup.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_millis(IDLE_RECHECK_MS)) => {}
        }
    }
}

/// Read length and payload for a frame whose `type` word is already in hand.
///
/// Malformed frames (unknown type, length out of bounds for the type, or a
/// payload that fails to parse) are discarded and `None` is returned; the
/// caller resumes scanning at the next frame boundary, best-effort.
async fn read_frame(rx: &pipe::Receiver, raw_kind: u32) -> Result<Option<Request>> {
    let mut len_buf = [0u8; LENGTH_SIZE];
    fifo::read_exact(rx, &mut len_buf).await?;
    let length = u32::from_be_bytes(len_buf);

    if length < REQUEST_HEADER_SIZE || length > MAX_REQUEST_PAYLOAD {
        tracing::warn!(raw_kind, length, "frame length out of bounds, discarding");
        discard(rx, length.min(MAX_REQUEST_PAYLOAD)).await?;
        return Ok(None);
    }

    let mut payload = vec![0u8; length as usize];
    fifo::read_exact(rx, &mut payload).await?;

    let Some(kind) = OpKind::from_wire(raw_kind) else {
        tracing::warn!(raw_kind, length, "unknown operation, discarding frame");
        return Ok(None);
    };
    match Request::from_payload(kind, &payload) {
        Ok(request) => Ok(Some(request)),
        Err(e) => {
            tracing::warn!(?kind, length, error = %e, "unparseable payload, discarding frame");
            Ok(None)
        }
    }
}

/// Skip `count` payload bytes of a frame that failed validation.
async fn discard(rx: &pipe::Receiver, count: u32) -> Result<()> {
    let mut sink = vec![0u8; count as usize];
    fifo::read_exact(rx, &mut sink).await?;
    Ok(())
}

/// Run one decoded request through the producer half of the queue protocol.
async fn enqueue(ctx: &ServerContext, request: Request) -> Result<()> {
    audit::request(audit::MAIN_ID, &request);
    let sid = request.header.pid;
    ctx.wait_empty(audit::MAIN_ID, sid).await?;
    ctx.push_locked(audit::MAIN_ID, request).await;
    ctx.post_full(audit::MAIN_ID, sid);
    Ok(())
}
