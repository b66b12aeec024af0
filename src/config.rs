//! Configuration for the server and the client runtime.
//!
//! Values arrive here already validated (argument parsing and bounds
//! checking happen at the process boundary, outside this crate's core).
//! Paths are overridable so tests can run against FIFOs in a private
//! directory instead of the well-known ones.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use crate::transport::{REPLY_FIFO_PREFIX, REQUEST_FIFO_PATH};

/// How long a client waits for a reply before synthesizing `SrvTimeout`.
pub const FIFO_TIMEOUT: Duration = Duration::from_secs(30);

/// Server bootstrap parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of bank offices; also the capacity of the request queue.
    pub offices: usize,
    /// Admin account password (bounded length, no whitespace).
    pub admin_password: String,
    /// Path of the shared request FIFO.
    pub request_fifo: PathBuf,
    /// Prefix of per-client reply FIFO paths.
    pub reply_prefix: String,
}

impl ServerConfig {
    /// Config with the well-known FIFO locations.
    pub fn new(offices: usize, admin_password: impl Into<String>) -> Self {
        Self {
            offices,
            admin_password: admin_password.into(),
            request_fifo: PathBuf::from(REQUEST_FIFO_PATH),
            reply_prefix: REPLY_FIFO_PREFIX.to_string(),
        }
    }
}

/// Client runtime parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the shared request FIFO.
    pub request_fifo: PathBuf,
    /// Prefix of per-client reply FIFO paths.
    pub reply_prefix: String,
    /// Reply wait window.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_fifo: PathBuf::from(REQUEST_FIFO_PATH),
            reply_prefix: REPLY_FIFO_PREFIX.to_string(),
            timeout: FIFO_TIMEOUT,
        }
    }
}

/// Whether a password satisfies the length bounds and carries no whitespace.
pub fn valid_password(password: &str) -> bool {
    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len())
        && !password.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_password_shape() {
        assert!(valid_password("12345678"));
        assert!(valid_password("twenty-characters-xx"));
        assert!(!valid_password("1234567"));
        assert!(!valid_password("twenty-one-characters"));
        assert!(!valid_password("white space"));
        assert!(!valid_password("tab\there"));
    }
}
