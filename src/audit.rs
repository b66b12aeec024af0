//! Audit trail call points.
//!
//! Every request, reply, and synchronization-primitive transition is
//! reported here, as structured `tracing` events. Line formatting belongs
//! to whatever subscriber the embedding process installs; this module only
//! fixes *what* is recorded and *where* in the protocol it is recorded.
//!
//! The `id` argument is the reporting actor: a client's pid, a bank office
//! id (1..=N), or [`MAIN_ID`] for the server's dispatch/main flow.

use crate::protocol::{Reply, Request};

/// Audit id of the server's main/dispatch flow.
pub const MAIN_ID: u32 = 0;

/// Synchronization primitive operations recorded in the audit trail.
#[derive(Debug, Clone, Copy)]
pub enum SyncOp {
    MutexLock,
    MutexUnlock,
    SemInit,
    SemWait,
    SemPost,
}

/// Role the actor plays at a synchronization point.
#[derive(Debug, Clone, Copy)]
pub enum SyncRole {
    Producer,
    Consumer,
    Account,
}

/// Record a request (client side before send, server side on receipt and
/// again when a bank office dequeues it).
pub fn request(id: u32, request: &Request) {
    tracing::info!(
        id,
        op = ?request.kind,
        pid = request.header.pid,
        account_id = request.header.account_id,
        op_delay_ms = request.header.op_delay_ms,
        "request"
    );
}

/// Record a reply (sent, received, or locally synthesized).
pub fn reply(id: u32, reply: &Reply) {
    tracing::info!(
        id,
        op = ?reply.kind,
        account_id = reply.account_id,
        ret_code = reply.ret_code.label(),
        value = reply.value_or_zero(),
        "reply"
    );
}

/// Record a bank office starting its loop.
pub fn office_open(id: u32) {
    tracing::info!(id, "bank office open");
}

/// Record a bank office leaving its loop.
pub fn office_close(id: u32) {
    tracing::info!(id, "bank office close");
}

/// Record an account creation (id, balance; secrets stay out of the trail).
pub fn account_created(id: u32, account_id: u32, balance: u32) {
    tracing::info!(id, account_id, balance, "account created");
}

/// Record a mutex transition. `sid` is the pid carried by the request being
/// handled, or the account id for account locks.
pub fn sync_mech(id: u32, op: SyncOp, role: SyncRole, sid: u32) {
    tracing::debug!(id, op = ?op, role = ?role, sid, "sync");
}

/// Record a semaphore transition together with the resulting count.
pub fn sync_mech_sem(id: u32, op: SyncOp, role: SyncRole, sid: u32, value: usize) {
    tracing::debug!(id, op = ?op, role = ?role, sid, value, "sync sem");
}

/// Record the artificial delay applied inside the queue critical section
/// by the dispatch loop.
pub fn delay(id: u32, delay_ms: u32) {
    tracing::debug!(id, delay_ms, "delay");
}

/// Record the artificial delay applied inside an account critical section.
pub fn sync_delay(id: u32, account_id: u32, delay_ms: u32) {
    tracing::debug!(id, account_id, delay_ms, "critical section delay");
}
