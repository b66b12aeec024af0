//! # securebank
//!
//! A single-process bank server accessed by independent client processes
//! through Unix FIFOs, simulating concurrent financial operations with
//! configurable per-operation delays used to expose and study race
//! conditions.
//!
//! ## Architecture
//!
//! ```text
//! user process ──► request FIFO ──► dispatch loop ──► bounded queue
//!                  (many writers,    (producer)        (empty/full
//!                   one reader)                         semaphores)
//!                                                           │
//! user process ◄── reply FIFO ◄──── bank office pool ◄──────┘
//!                  (per client)      (N consumer tasks,
//!                                     per-account locks)
//! ```
//!
//! - **Data plane**: binary TLV frames (`type`, `length`, `payload`) over
//!   named pipes. One well-known request FIFO shared by all clients, one
//!   private reply FIFO per client derived from its process id.
//! - **Concurrency core**: a fixed-capacity circular request queue
//!   coordinated by two counting semaphores plus a mutex (classic bounded
//!   buffer), drained by a fixed pool of bank office tasks that serialize
//!   per-account mutation with per-account locks.
//! - **Shutdown**: a two-phase protocol that drains queued work before
//!   releasing blocked offices.
//!
//! ## Example
//!
//! ```ignore
//! use securebank::config::{ClientConfig, ServerConfig};
//! use securebank::protocol::Request;
//! use securebank::server::BankServer;
//!
//! #[tokio::main]
//! async fn main() -> securebank::Result<()> {
//!     let server = BankServer::bootstrap(ServerConfig::new(4, "admin-pw-123")).await?;
//!     tokio::spawn(server.run());
//!
//!     let request = Request::balance(std::process::id(), 1, "secret-pw", 0);
//!     let reply = securebank::client::run_request(&ClientConfig::default(), &request).await?;
//!     println!("balance reply: {:?}", reply);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use error::{BankError, Result};
pub use server::BankServer;
