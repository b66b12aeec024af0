//! Server side: bootstrap, dispatch loop, bank office pool, shutdown.
//!
//! [`BankServer`] ties the pieces together: it validates the bootstrap
//! parameters, creates the admin account and the request FIFO, spawns one
//! task per bank office, and runs the dispatch loop on the current task.
//! When the dispatch loop returns (shutdown drained the queue), the server
//! enters the release phase: it keeps posting the `full` semaphore until
//! every office has observed the stop flag and exited.

mod context;
mod dispatch;
mod office;
mod queue;
mod store;

pub use context::ServerContext;
pub use queue::{BoundedQueue, RequestQueue};
pub use store::{Account, AccountStore};

use std::sync::Arc;
use std::time::Duration;

use crate::audit;
use crate::config::{valid_password, ServerConfig};
use crate::error::{BankError, Result};
use crate::protocol::{
    ADMIN_ACCOUNT_ID, MAX_BANK_OFFICES, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN,
};
use crate::transport::fifo::{self, FifoCleanup};

/// The bank server: one dispatch producer plus a pool of office consumers.
///
/// # Example
///
/// ```no_run
/// use securebank::config::ServerConfig;
/// use securebank::BankServer;
///
/// # async fn demo() -> securebank::Result<()> {
/// let config = ServerConfig::new(4, "admin-pw");
/// let server = BankServer::bootstrap(config).await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct BankServer {
    ctx: Arc<ServerContext>,
    config: ServerConfig,
}

impl BankServer {
    /// Validate parameters, create the admin account and the request FIFO.
    ///
    /// After this returns, clients can open the request FIFO for writing.
    pub async fn bootstrap(config: ServerConfig) -> Result<Self> {
        if config.offices == 0 || config.offices > MAX_BANK_OFFICES {
            return Err(BankError::Config(format!(
                "office count must be in 1..={}, got {}",
                MAX_BANK_OFFICES, config.offices
            )));
        }
        if !valid_password(&config.admin_password) {
            return Err(BankError::Config(format!(
                "admin password must be {}..={} characters without whitespace",
                MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
            )));
        }

        let ctx = Arc::new(ServerContext::new(&config));
        ctx.store
            .create(audit::MAIN_ID, ADMIN_ACCOUNT_ID, 0, &config.admin_password)
            .await
            .map_err(|code| BankError::Config(format!("admin account: {}", code.label())))?;

        fifo::create_fifo(&config.request_fifo)?;
        tracing::info!(offices = config.offices, fifo = %config.request_fifo.display(), "bank server ready");
        Ok(Self { ctx, config })
    }

    /// Shared state, for embedding the server in-process.
    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Run until a shutdown request completes both protocol phases.
    ///
    /// The request FIFO is removed from the filesystem on return, even when
    /// an error propagates out.
    pub async fn run(self) -> Result<()> {
        let _cleanup = FifoCleanup::new(&self.config.request_fifo);
        let rx = fifo::open_request_reader(&self.config.request_fifo)?;

        let mut offices = Vec::with_capacity(self.config.offices);
        for office_id in 1..=self.config.offices as u32 {
            self.ctx.office_started();
            offices.push(tokio::spawn(office::run(self.ctx.clone(), office_id)));
        }

        // Phase one ends when this returns: intake stopped, queue drained.
        // Offices are released whether or not the loop failed; an I/O fault
        // here must not leave them parked on `full` forever.
        let dispatched = dispatch::run(self.ctx.clone(), rx).await;
        self.ctx.stop();
        release_offices(&self.ctx, offices).await?;
        dispatched?;
        tracing::info!("bank server stopped");
        Ok(())
    }
}

/// Phase two of the shutdown protocol: offices may be parked on `full`.
/// Keep posting until every one of them has woken, seen the stop flag, and
/// exited, then collect their results.
async fn release_offices(
    ctx: &ServerContext,
    offices: Vec<tokio::task::JoinHandle<Result<()>>>,
) -> Result<()> {
    while ctx.live_offices() > 0 {
        ctx.post_full(audit::MAIN_ID, 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    for handle in offices {
        handle.await??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir, offices: usize, password: &str) -> ServerConfig {
        ServerConfig {
            offices,
            admin_password: password.to_string(),
            request_fifo: dir.path().join("srv"),
            reply_prefix: dir.path().join("usr_").to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_admin_and_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, 4, "admin-pw");

        let server = BankServer::bootstrap(config.clone()).await.unwrap();
        assert!(config.request_fifo.exists());
        assert!(server.ctx.store.exists(ADMIN_ACCOUNT_ID).await);
        assert!(server
            .ctx
            .store
            .authenticate(ADMIN_ACCOUNT_ID, "admin-pw")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_bad_parameters() {
        let dir = tempfile::tempdir().unwrap();

        let result = BankServer::bootstrap(test_config(&dir, 0, "admin-pw")).await;
        assert!(matches!(result, Err(BankError::Config(_))));

        let result =
            BankServer::bootstrap(test_config(&dir, MAX_BANK_OFFICES + 1, "admin-pw")).await;
        assert!(matches!(result, Err(BankError::Config(_))));

        let result = BankServer::bootstrap(test_config(&dir, 2, "short")).await;
        assert!(matches!(result, Err(BankError::Config(_))));

        let result = BankServer::bootstrap(test_config(&dir, 2, "has a space")).await;
        assert!(matches!(result, Err(BankError::Config(_))));
    }

    #[tokio::test]
    async fn test_release_frees_parked_offices_without_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(ServerContext::new(&test_config(&dir, 2, "admin-pw")));

        // Offices parked on `full` with no producer running, as after a
        // dispatch-loop failure.
        let mut offices = Vec::new();
        for office_id in 1..=2 {
            ctx.office_started();
            offices.push(tokio::spawn(office::run(ctx.clone(), office_id)));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        ctx.stop();
        release_offices(&ctx, offices).await.unwrap();
        assert_eq!(ctx.live_offices(), 0);
    }
}
