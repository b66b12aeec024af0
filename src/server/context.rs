//! Shared server state.
//!
//! One [`ServerContext`] is built at bootstrap and handed to the dispatch
//! loop and every bank office behind an `Arc`. It owns the account store,
//! the bounded request queue with its two counting semaphores, and the
//! shutdown flags, so no task-local state ever needs to be global.
//!
//! Queue protocol: producers wait on `empty`, lock the queue mutex, push,
//! unlock, post `full`; consumers mirror it (`full` → pop → `empty`). The
//! semaphores count slots, the mutex protects the buffer, and every
//! transition is audited.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, Semaphore};

use crate::audit::{self, SyncOp, SyncRole};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::protocol::Request;

use super::queue::{BoundedQueue, RequestQueue};
use super::store::AccountStore;

/// State shared by the dispatch loop and all bank offices.
pub struct ServerContext {
    /// Account slot table.
    pub store: AccountStore,
    /// Pending requests, capacity = bank office count.
    queue: Mutex<BoundedQueue>,
    /// Free queue slots. Producers wait here before pushing.
    empty: Semaphore,
    /// Occupied queue slots. Consumers wait here before popping.
    full: Semaphore,
    /// Set by the office that processes a valid shutdown request.
    shutdown_requested: AtomicBool,
    /// Set by the dispatch loop once it has stopped producing.
    stop: AtomicBool,
    /// Bank offices that have not yet left their loop.
    live_offices: AtomicUsize,
    /// Wakes the dispatch loop when shutdown state changes.
    pub shutdown_wakeup: Notify,
    /// Path of the shared request FIFO (sealed on shutdown).
    pub request_fifo: PathBuf,
    /// Prefix of per-client reply FIFO paths.
    pub reply_prefix: String,
}

impl ServerContext {
    /// Build the shared state for `config.offices` bank offices.
    pub fn new(config: &ServerConfig) -> Self {
        let capacity = config.offices;
        audit::sync_mech_sem(
            audit::MAIN_ID,
            SyncOp::SemInit,
            SyncRole::Producer,
            0,
            capacity,
        );
        audit::sync_mech_sem(audit::MAIN_ID, SyncOp::SemInit, SyncRole::Consumer, 0, 0);
        Self {
            store: AccountStore::new(),
            queue: Mutex::new(BoundedQueue::new(capacity)),
            empty: Semaphore::new(capacity),
            full: Semaphore::new(0),
            shutdown_requested: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            live_offices: AtomicUsize::new(0),
            shutdown_wakeup: Notify::new(),
            request_fifo: config.request_fifo.clone(),
            reply_prefix: config.reply_prefix.clone(),
        }
    }

    // --- queue protocol -------------------------------------------------

    /// Wait for a free queue slot (producer side).
    pub async fn wait_empty(&self, actor: u32, sid: u32) -> Result<()> {
        self.empty.acquire().await?.forget();
        audit::sync_mech_sem(
            actor,
            SyncOp::SemWait,
            SyncRole::Producer,
            sid,
            self.empty.available_permits(),
        );
        Ok(())
    }

    /// Release a queue slot back to producers (consumer side).
    pub fn post_empty(&self, actor: u32, sid: u32) {
        self.empty.add_permits(1);
        audit::sync_mech_sem(
            actor,
            SyncOp::SemPost,
            SyncRole::Consumer,
            sid,
            self.empty.available_permits(),
        );
    }

    /// Wait for a queued request (consumer side).
    pub async fn wait_full(&self, actor: u32, sid: u32) -> Result<()> {
        self.full.acquire().await?.forget();
        audit::sync_mech_sem(
            actor,
            SyncOp::SemWait,
            SyncRole::Consumer,
            sid,
            self.full.available_permits(),
        );
        Ok(())
    }

    /// Announce a queued request to consumers (producer side).
    pub fn post_full(&self, actor: u32, sid: u32) {
        self.full.add_permits(1);
        audit::sync_mech_sem(
            actor,
            SyncOp::SemPost,
            SyncRole::Producer,
            sid,
            self.full.available_permits(),
        );
    }

    /// Push under the queue mutex. Caller must have waited on `empty`.
    ///
    /// The request's own `op_delay_ms` is applied *inside* the critical
    /// section, between lock and push. The width of this window is what
    /// makes producer/consumer interleavings reproducible, so the ordering
    /// (wait empty → lock → delay → push → unlock → post full) is fixed.
    pub async fn push_locked(&self, actor: u32, request: Request) {
        let sid = request.header.pid;
        let delay_ms = request.header.op_delay_ms;
        let mut queue = self.queue.lock().await;
        audit::sync_mech(actor, SyncOp::MutexLock, SyncRole::Producer, sid);
        if delay_ms > 0 {
            audit::delay(actor, delay_ms);
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(delay_ms))).await;
        }
        queue.push(request);
        drop(queue);
        audit::sync_mech(actor, SyncOp::MutexUnlock, SyncRole::Producer, sid);
    }

    /// Pop under the queue mutex. Caller must have waited on `full`.
    ///
    /// Returns `None` when the queue is empty, which after a `full` post can
    /// only mean the stop flag is set and the post was a release token.
    pub async fn pop_locked(&self, actor: u32) -> Option<Request> {
        let mut queue = self.queue.lock().await;
        audit::sync_mech(actor, SyncOp::MutexLock, SyncRole::Consumer, 0);
        let request = if queue.is_empty() {
            None
        } else {
            Some(queue.pop())
        };
        drop(queue);
        let sid = request.as_ref().map_or(0, |r| r.header.pid);
        audit::sync_mech(actor, SyncOp::MutexUnlock, SyncRole::Consumer, sid);
        request
    }

    /// Number of requests currently queued.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Occupied-slot count as seen by the `full` semaphore.
    pub fn full_value(&self) -> usize {
        self.full.available_permits()
    }

    // --- shutdown state -------------------------------------------------

    /// Mark shutdown as requested and wake the dispatch loop.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_wakeup.notify_waiters();
    }

    /// Whether a valid shutdown request has been processed.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Mark the dispatch loop as stopped; bank offices drain and exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the dispatch loop has stopped producing.
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    // --- office accounting ----------------------------------------------

    /// Record a bank office entering its loop.
    pub fn office_started(&self) {
        self.live_offices.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a bank office leaving its loop; returns how many remain.
    pub fn office_exited(&self) -> usize {
        self.live_offices.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Bank offices that have not yet exited.
    pub fn live_offices(&self) -> usize {
        self.live_offices.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(offices: usize) -> ServerContext {
        ServerContext::new(&ServerConfig::new(offices, "admin-pw"))
    }

    fn request(pid: u32) -> Request {
        Request::balance(pid, 1, "secret-pw", 0)
    }

    #[tokio::test]
    async fn test_producer_consumer_roundtrip() {
        let ctx = context(2);

        ctx.wait_empty(0, 11).await.unwrap();
        ctx.push_locked(0, request(11)).await;
        ctx.post_full(0, 11);

        assert_eq!(ctx.queue_len().await, 1);
        assert_eq!(ctx.full_value(), 1);

        ctx.wait_full(1, 0).await.unwrap();
        let popped = ctx.pop_locked(1).await.unwrap();
        ctx.post_empty(1, popped.header.pid);

        assert_eq!(popped.header.pid, 11);
        assert_eq!(ctx.queue_len().await, 0);
        assert_eq!(ctx.full_value(), 0);
    }

    #[tokio::test]
    async fn test_wait_empty_blocks_when_queue_full() {
        use std::time::Duration;

        let ctx = std::sync::Arc::new(context(1));

        ctx.wait_empty(0, 1).await.unwrap();
        ctx.push_locked(0, request(1)).await;
        ctx.post_full(0, 1);

        // Capacity exhausted: the next wait must not complete until a
        // consumer posts `empty`.
        let blocked = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.wait_empty(0, 2).await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        ctx.wait_full(1, 0).await.unwrap();
        let popped = ctx.pop_locked(1).await.unwrap();
        ctx.post_empty(1, popped.header.pid);

        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_token_pops_none() {
        let ctx = context(1);

        // A `full` post with nothing queued is the shutdown release token.
        ctx.stop();
        ctx.post_full(0, 0);
        ctx.wait_full(1, 0).await.unwrap();
        assert!(ctx.pop_locked(1).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_flags() {
        let ctx = context(1);
        assert!(!ctx.shutdown_requested());
        assert!(!ctx.stopped());

        ctx.request_shutdown();
        assert!(ctx.shutdown_requested());
        assert!(!ctx.stopped());

        ctx.stop();
        assert!(ctx.stopped());
    }

    #[tokio::test]
    async fn test_office_accounting() {
        let ctx = context(3);
        ctx.office_started();
        ctx.office_started();
        ctx.office_started();
        assert_eq!(ctx.live_offices(), 3);

        assert_eq!(ctx.office_exited(), 2);
        assert_eq!(ctx.office_exited(), 1);
        assert_eq!(ctx.office_exited(), 0);
        assert_eq!(ctx.live_offices(), 0);
    }
}
