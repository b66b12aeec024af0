//! Bank office: a consumer worker processing dequeued requests.
//!
//! Each office runs the consumer half of the queue protocol, applies the
//! business rules against the account store, and writes the reply into the
//! requesting client's private FIFO. A reply FIFO that cannot be opened
//! downgrades the outcome to `UsrDown` with nothing sent.
//!
//! Every operation holds the authenticated account's lock while its
//! `op_delay_ms` runs, so the critical-section width stays tunable: balance
//! and transfer lock the account under query, creation and shutdown lock
//! the admin account (serializing concurrent creations). Transfers take
//! both account locks, always in ascending id order, so the debit and the
//! credit are one atomic step and two offices moving money in opposite
//! directions between the same pair cannot deadlock.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::audit::{self, SyncOp, SyncRole};
use crate::error::Result;
use crate::protocol::{
    OpKind, Reply, Request, RequestOp, RetCode, ADMIN_ACCOUNT_ID, MAX_BALANCE,
};
use crate::transport::fifo;

use super::context::ServerContext;
use super::store::AccountStore;

/// Run one bank office until the pool-wide stop flag releases it.
pub async fn run(ctx: Arc<ServerContext>, office_id: u32) -> Result<()> {
    audit::office_open(office_id);
    loop {
        ctx.wait_full(office_id, 0).await?;
        if ctx.stopped() {
            break;
        }
        // A post with nothing queued can only be a release token that
        // raced ahead of the flag load above.
        let Some(request) = ctx.pop_locked(office_id).await else {
            break;
        };
        ctx.post_empty(office_id, request.header.pid);

        audit::request(office_id, &request);
        let reply = process(&ctx, office_id, &request).await;
        send_reply(&ctx, office_id, &request, reply).await;
    }
    audit::office_close(office_id);
    let remaining = ctx.office_exited();
    tracing::debug!(office_id, remaining, "bank office exited");
    Ok(())
}

/// Apply the business rules for one request and produce its reply.
async fn process(ctx: &ServerContext, office_id: u32, request: &Request) -> Reply {
    let header = &request.header;

    if let Err(code) = ctx
        .store
        .authenticate(header.account_id, &header.password)
        .await
    {
        return Reply::for_request(request, code, 0);
    }

    // Admin runs the bank, not an account: creation and shutdown are its
    // exclusive operations, balance and transfer are denied to it.
    let admin = header.account_id == ADMIN_ACCOUNT_ID;
    let allowed = match request.kind {
        OpKind::CreateAccount | OpKind::Shutdown => admin,
        OpKind::Balance | OpKind::Transfer => !admin,
    };
    if !allowed {
        return Reply::for_request(request, RetCode::OpNallow, 0);
    }

    match request.kind {
        OpKind::CreateAccount => create_account(ctx, office_id, request).await,
        OpKind::Balance => balance(ctx, office_id, request).await,
        OpKind::Transfer => transfer(ctx, office_id, request).await,
        OpKind::Shutdown => shutdown(ctx, office_id, request).await,
    }
}

async fn create_account(ctx: &ServerContext, office_id: u32, request: &Request) -> Reply {
    let RequestOp::CreateAccount {
        account_id,
        balance,
        password,
    } = &request.op
    else {
        return Reply::for_request(request, RetCode::BadReqArgs, 0);
    };
    let admin_id = request.header.account_id;

    // The admin account's own lock is the critical section here: concurrent
    // creations serialize on it, and the delay widens it.
    let admin_slot = ctx.store.lock(admin_id).await;
    audit::sync_mech(office_id, SyncOp::MutexLock, SyncRole::Account, admin_id);
    account_delay(office_id, admin_id, request.header.op_delay_ms).await;

    let reply = if *account_id == admin_id {
        // The admin slot is held right now; creating over it would take the
        // same lock twice, and the id is occupied either way.
        Reply::for_request(request, RetCode::IdInUse, 0)
    } else {
        match ctx
            .store
            .create(office_id, *account_id, *balance, password)
            .await
        {
            Ok(()) => Reply::for_request(request, RetCode::Ok, 0),
            Err(code) => Reply::for_request(request, code, 0),
        }
    };

    drop(admin_slot);
    audit::sync_mech(office_id, SyncOp::MutexUnlock, SyncRole::Account, admin_id);
    reply
}

async fn balance(ctx: &ServerContext, office_id: u32, request: &Request) -> Reply {
    let id = request.header.account_id;

    let slot = ctx.store.lock(id).await;
    audit::sync_mech(office_id, SyncOp::MutexLock, SyncRole::Account, id);
    account_delay(office_id, id, request.header.op_delay_ms).await;
    let reply = match slot.as_ref() {
        Some(account) => Reply::for_request(request, RetCode::Ok, account.balance),
        None => Reply::for_request(request, RetCode::Other, 0),
    };
    drop(slot);
    audit::sync_mech(office_id, SyncOp::MutexUnlock, SyncRole::Account, id);
    reply
}

async fn transfer(ctx: &ServerContext, office_id: u32, request: &Request) -> Reply {
    let RequestOp::Transfer { account_id, amount } = &request.op else {
        return Reply::for_request(request, RetCode::BadReqArgs, 0);
    };
    let (dest, amount) = (*account_id, *amount);
    let src = request.header.account_id;

    if !AccountStore::in_range(dest) {
        return Reply::for_request(request, RetCode::IdNotFound, 0);
    }
    // Checked before locking: taking the same slot twice would deadlock.
    if dest == src {
        return Reply::for_request(request, RetCode::SameId, 0);
    }

    // Ascending-id lock order makes opposing transfers deadlock-free.
    let (lo, hi) = (src.min(dest), src.max(dest));
    let mut lo_slot = ctx.store.lock(lo).await;
    audit::sync_mech(office_id, SyncOp::MutexLock, SyncRole::Account, lo);
    let mut hi_slot = ctx.store.lock(hi).await;
    audit::sync_mech(office_id, SyncOp::MutexLock, SyncRole::Account, hi);

    account_delay(office_id, src, request.header.op_delay_ms).await;

    let (src_slot, dest_slot) = if src == lo {
        (&mut lo_slot, &mut hi_slot)
    } else {
        (&mut hi_slot, &mut lo_slot)
    };
    let reply = match (src_slot.as_mut(), dest_slot.as_mut()) {
        (Some(source), Some(destination)) => {
            if source.balance < amount {
                Reply::for_request(request, RetCode::NoFunds, 0)
            } else if u64::from(destination.balance) + u64::from(amount) > u64::from(MAX_BALANCE) {
                Reply::for_request(request, RetCode::TooHigh, 0)
            } else if dest == ADMIN_ACCOUNT_ID {
                Reply::for_request(request, RetCode::Other, 0)
            } else {
                source.balance -= amount;
                destination.balance += amount;
                Reply::for_request(request, RetCode::Ok, source.balance)
            }
        }
        _ => Reply::for_request(request, RetCode::IdNotFound, 0),
    };

    drop(hi_slot);
    audit::sync_mech(office_id, SyncOp::MutexUnlock, SyncRole::Account, hi);
    drop(lo_slot);
    audit::sync_mech(office_id, SyncOp::MutexUnlock, SyncRole::Account, lo);
    reply
}

async fn shutdown(ctx: &ServerContext, office_id: u32, request: &Request) -> Reply {
    let admin_id = request.header.account_id;

    let admin_slot = ctx.store.lock(admin_id).await;
    audit::sync_mech(office_id, SyncOp::MutexLock, SyncRole::Account, admin_id);
    account_delay(office_id, admin_id, request.header.op_delay_ms).await;

    // Seal the request FIFO: existing bytes stay readable, but no new
    // writer is admitted, so intake ends without closing the channel.
    let perms = std::fs::Permissions::from_mode(0o444);
    let reply = match tokio::fs::set_permissions(&ctx.request_fifo, perms).await {
        Ok(()) => {
            // Depth as the `full` semaphore sees it at this instant.
            let pending = ctx.full_value() as u32;
            ctx.request_shutdown();
            tracing::info!(pending, "shutdown accepted");
            Reply::for_request(request, RetCode::Ok, pending)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to seal request FIFO");
            Reply::for_request(request, RetCode::Other, 0)
        }
    };

    drop(admin_slot);
    audit::sync_mech(office_id, SyncOp::MutexUnlock, SyncRole::Account, admin_id);
    reply
}

/// Write the reply into the client's private FIFO, or downgrade to
/// `UsrDown` when the client is gone.
async fn send_reply(ctx: &ServerContext, office_id: u32, request: &Request, reply: Reply) {
    let path = fifo::reply_path_for(&ctx.reply_prefix, request.header.pid);
    match fifo::open_reply_writer(Path::new(&path)) {
        Ok(mut tx) => {
            audit::reply(office_id, &reply);
            if let Err(e) = tx.write_all(&reply.encode()).await {
                tracing::warn!(pid = request.header.pid, error = %e, "reply write failed");
            }
        }
        Err(e) => {
            // Recorded but never transmitted: the client gave up already.
            let downgraded = Reply::for_request(request, RetCode::UsrDown, 0);
            audit::reply(office_id, &downgraded);
            tracing::warn!(pid = request.header.pid, error = %e, "client reply FIFO unreachable");
        }
    }
}

/// Artificial service latency inside the account critical section.
async fn account_delay(office_id: u32, account_id: u32, delay_ms: u32) {
    audit::sync_delay(office_id, account_id, delay_ms);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(u64::from(delay_ms))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::ReplyValue;

    const ADMIN_PW: &str = "admin-pw";

    async fn context_with_accounts(dir: &tempfile::TempDir) -> ServerContext {
        let config = ServerConfig {
            offices: 2,
            admin_password: ADMIN_PW.to_string(),
            request_fifo: dir.path().join("srv"),
            reply_prefix: dir.path().join("usr_").to_string_lossy().into_owned(),
        };
        let ctx = ServerContext::new(&config);
        ctx.store
            .create(0, ADMIN_ACCOUNT_ID, 0, ADMIN_PW)
            .await
            .unwrap();
        ctx.store.create(0, 1, 100, "alice-pw").await.unwrap();
        ctx.store.create(0, 2, 50, "bob-pw00").await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_login_failure_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let request = Request::balance(10, 1, "wrong-pw", 0);
        let reply = process(&ctx, 1, &request).await;
        assert_eq!(reply.ret_code, RetCode::LoginFail);
        assert_eq!(reply.value, ReplyValue::None);
    }

    #[tokio::test]
    async fn test_admin_operation_restrictions() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        // Admin may not query balance or transfer.
        let reply = process(&ctx, 1, &Request::balance(10, 0, ADMIN_PW, 0)).await;
        assert_eq!(reply.ret_code, RetCode::OpNallow);
        let reply = process(&ctx, 1, &Request::transfer(10, 0, ADMIN_PW, 0, 1, 10)).await;
        assert_eq!(reply.ret_code, RetCode::OpNallow);

        // Non-admin may not create accounts or shut down.
        let reply = process(
            &ctx,
            1,
            &Request::create_account(10, 1, "alice-pw", 0, 5, 10, "fresh-pw"),
        )
        .await;
        assert_eq!(reply.ret_code, RetCode::OpNallow);
        let reply = process(&ctx, 1, &Request::shutdown(10, 1, "alice-pw", 0)).await;
        assert_eq!(reply.ret_code, RetCode::OpNallow);
    }

    #[tokio::test]
    async fn test_create_account_and_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let request = Request::create_account(10, 0, ADMIN_PW, 0, 7, 300, "carol-pw");
        let reply = process(&ctx, 1, &request).await;
        assert_eq!(reply.ret_code, RetCode::Ok);
        assert_eq!(reply.value, ReplyValue::None);
        assert!(ctx.store.exists(7).await);

        let reply = process(&ctx, 1, &request).await;
        assert_eq!(reply.ret_code, RetCode::IdInUse);
    }

    #[tokio::test]
    async fn test_balance_reports_current_value() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let reply = process(&ctx, 1, &Request::balance(10, 1, "alice-pw", 0)).await;
        assert_eq!(reply.ret_code, RetCode::Ok);
        assert_eq!(reply.value, ReplyValue::Balance(100));
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 2, 40)).await;
        assert_eq!(reply.ret_code, RetCode::Ok);
        // The reply carries the source's resulting balance.
        assert_eq!(reply.value, ReplyValue::Transfer(60));

        let reply = process(&ctx, 1, &Request::balance(10, 2, "bob-pw00", 0)).await;
        assert_eq!(reply.value, ReplyValue::Balance(90));
    }

    #[tokio::test]
    async fn test_transfer_failure_codes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 999, 10)).await;
        assert_eq!(reply.ret_code, RetCode::IdNotFound);

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 1, 10)).await;
        assert_eq!(reply.ret_code, RetCode::SameId);

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 2, 101)).await;
        assert_eq!(reply.ret_code, RetCode::NoFunds);

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 0, 10)).await;
        assert_eq!(reply.ret_code, RetCode::Other);

        // Failed transfers leave balances untouched.
        let reply = process(&ctx, 1, &Request::balance(10, 1, "alice-pw", 0)).await;
        assert_eq!(reply.value, ReplyValue::Balance(100));
    }

    #[tokio::test]
    async fn test_transfer_overflow_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;
        ctx.store
            .create(0, 3, MAX_BALANCE, "carol-pw")
            .await
            .unwrap();

        let reply = process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 0, 3, 1)).await;
        assert_eq!(reply.ret_code, RetCode::TooHigh);
    }

    #[tokio::test]
    async fn test_opposing_transfers_do_not_deadlock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context_with_accounts(&dir).await);

        // Wide critical sections in both directions between the same pair.
        let a = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(&ctx, 1, &Request::transfer(10, 1, "alice-pw", 30, 2, 10)).await
            })
        };
        let b = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(&ctx, 2, &Request::transfer(11, 2, "bob-pw00", 30, 1, 5)).await
            })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.ret_code, RetCode::Ok);
        assert_eq!(b.ret_code, RetCode::Ok);

        // Net effect: 100-10+5 and 50+10-5.
        let reply = process(&ctx, 1, &Request::balance(10, 1, "alice-pw", 0)).await;
        assert_eq!(reply.value, ReplyValue::Balance(95));
        let reply = process(&ctx, 1, &Request::balance(11, 2, "bob-pw00", 0)).await;
        assert_eq!(reply.value, ReplyValue::Balance(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_creations_serialize_on_admin_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context_with_accounts(&dir).await);

        let start = tokio::time::Instant::now();
        let a = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(
                    &ctx,
                    1,
                    &Request::create_account(10, 0, ADMIN_PW, 100, 8, 10, "fresh-pw"),
                )
                .await
            })
        };
        let b = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(
                    &ctx,
                    2,
                    &Request::create_account(11, 0, ADMIN_PW, 100, 9, 10, "fresh-pw"),
                )
                .await
            })
        };
        assert_eq!(a.await.unwrap().ret_code, RetCode::Ok);
        assert_eq!(b.await.unwrap().ret_code, RetCode::Ok);

        // Both delays ran under the admin lock, one after the other, never
        // overlapping.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_create_over_admin_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let request = Request::create_account(10, 0, ADMIN_PW, 0, 0, 10, "fresh-pw");
        let reply = process(&ctx, 1, &request).await;
        assert_eq!(reply.ret_code, RetCode::IdInUse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_delay_runs_under_admin_lock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context_with_accounts(&dir).await);
        fifo::create_fifo(&ctx.request_fifo).unwrap();

        // A creation and a shutdown contend for the admin lock; their
        // delays must not overlap.
        let start = tokio::time::Instant::now();
        let create = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(
                    &ctx,
                    1,
                    &Request::create_account(10, 0, ADMIN_PW, 100, 8, 10, "fresh-pw"),
                )
                .await
            })
        };
        let shutdown = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                process(&ctx, 2, &Request::shutdown(11, 0, ADMIN_PW, 100)).await
            })
        };
        assert_eq!(create.await.unwrap().ret_code, RetCode::Ok);
        assert_eq!(shutdown.await.unwrap().ret_code, RetCode::Ok);
        assert!(ctx.shutdown_requested());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_shutdown_seals_fifo_and_reports_depth() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;
        fifo::create_fifo(&ctx.request_fifo).unwrap();

        // One request left queued at shutdown time.
        ctx.wait_empty(0, 10).await.unwrap();
        ctx.push_locked(0, Request::balance(10, 1, "alice-pw", 0)).await;
        ctx.post_full(0, 10);

        let reply = process(&ctx, 1, &Request::shutdown(11, 0, ADMIN_PW, 0)).await;
        assert_eq!(reply.ret_code, RetCode::Ok);
        assert_eq!(reply.value, ReplyValue::Shutdown(1));
        assert!(ctx.shutdown_requested());

        let mode = std::fs::metadata(&ctx.request_fifo)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o444);
    }

    #[tokio::test]
    async fn test_reply_downgraded_when_client_gone() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_accounts(&dir).await;

        let request = Request::balance(77, 1, "alice-pw", 0);
        let reply = process(&ctx, 1, &request).await;
        // No reply FIFO exists for pid 77: must not error or block.
        send_reply(&ctx, 1, &request, reply).await;
    }

    #[tokio::test]
    async fn test_office_exits_on_release_token() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(context_with_accounts(&dir).await);

        ctx.office_started();
        let office = tokio::spawn(run(ctx.clone(), 1));

        ctx.stop();
        ctx.post_full(audit::MAIN_ID, 0);
        office.await.unwrap().unwrap();
        assert_eq!(ctx.live_offices(), 0);
    }
}
