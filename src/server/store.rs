//! Account store: a fixed slot table of independently lockable accounts.
//!
//! Slots are indexed directly by account id (0 is the admin account); the
//! slot's own mutex *is* the per-account lock, so "lock the account" and
//! "access the slot" cannot drift apart. Accounts are created once and
//! never deleted during a run, which is what makes the two-step
//! check-then-lock patterns in the business rules sound.

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};

use crate::audit::{self, SyncOp, SyncRole};
use crate::protocol::{RetCode, MAX_BALANCE, MAX_BANK_ACCOUNTS, SALT_LEN};

/// A bank account. Balance mutation requires holding the slot lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: u32,
    pub balance: u32,
    /// Hex-encoded SHA-256 of password ++ salt.
    pub password_hash: String,
    /// Random hex salt of length `SALT_LEN`.
    pub salt: String,
}

/// Slot guard: `Some(account)` while occupied.
pub type AccountSlot<'a> = MutexGuard<'a, Option<Account>>;

/// Fixed-capacity table of accounts, one lockable slot per id.
pub struct AccountStore {
    slots: Box<[Mutex<Option<Account>>]>,
}

impl AccountStore {
    /// Create an empty store with slots for ids `0..=MAX_BANK_ACCOUNTS`.
    pub fn new() -> Self {
        let slots = (0..=MAX_BANK_ACCOUNTS)
            .map(|_| Mutex::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Whether `id` addresses a slot at all.
    #[inline]
    pub fn in_range(id: u32) -> bool {
        id <= MAX_BANK_ACCOUNTS
    }

    /// Acquire the per-account lock.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range; callers check `in_range` first.
    pub async fn lock(&self, id: u32) -> AccountSlot<'_> {
        self.slots[id as usize].lock().await
    }

    /// Whether an account currently occupies `id` (takes the lock briefly).
    pub async fn exists(&self, id: u32) -> bool {
        Self::in_range(id) && self.lock(id).await.is_some()
    }

    /// Create an account, deriving a fresh salt and password hash.
    ///
    /// `actor_id` identifies the creating actor in the audit trail (a bank
    /// office id, or the main flow during bootstrap).
    pub async fn create(
        &self,
        actor_id: u32,
        id: u32,
        balance: u32,
        password: &str,
    ) -> Result<(), RetCode> {
        if !Self::in_range(id) || balance > MAX_BALANCE {
            return Err(RetCode::BadReqArgs);
        }

        let mut slot = self.lock(id).await;
        audit::sync_mech(actor_id, SyncOp::MutexLock, SyncRole::Account, id);
        if slot.is_some() {
            audit::sync_mech(actor_id, SyncOp::MutexUnlock, SyncRole::Account, id);
            return Err(RetCode::IdInUse);
        }

        let salt = generate_salt();
        let password_hash = derive_hash(password, &salt);
        *slot = Some(Account {
            id,
            balance,
            password_hash,
            salt,
        });
        audit::account_created(actor_id, id, balance);

        drop(slot);
        audit::sync_mech(actor_id, SyncOp::MutexUnlock, SyncRole::Account, id);
        Ok(())
    }

    /// Check an account's password.
    ///
    /// Fails with `LoginFail` when the account is absent or the derived
    /// hash mismatches; the two cases are indistinguishable to the caller.
    pub async fn authenticate(&self, id: u32, password: &str) -> Result<(), RetCode> {
        if !Self::in_range(id) {
            return Err(RetCode::LoginFail);
        }
        let slot = self.lock(id).await;
        match slot.as_ref() {
            Some(account) if derive_hash(password, &account.salt) == account.password_hash => {
                Ok(())
            }
            _ => Err(RetCode::LoginFail),
        }
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the stored digest: hex(sha256(password ++ salt)).
pub fn derive_hash(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh random hex salt using system time and process id.
fn generate_salt() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut state = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        ^ u64::from(std::process::id());

    let mut salt = String::with_capacity(SALT_LEN);
    while salt.len() < SALT_LEN {
        // Multiplicative mixing; quality only has to prevent salt reuse.
        state = state.wrapping_mul(0x517c_c1b7_2722_0a95).rotate_left(17);
        salt.push_str(&format!("{:016x}", state));
    }
    salt.truncate(SALT_LEN);
    salt
}
