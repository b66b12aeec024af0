//! Wire format constants and enumerations.
//!
//! Frame layout on the wire, in order:
//! ```text
//! ┌──────────┬──────────┬──────────────────┐
//! │ type     │ length   │ payload          │
//! │ 4 bytes  │ 4 bytes  │ `length` bytes   │
//! │ u32 BE   │ u32 BE   │ variant-specific │
//! └──────────┴──────────┴──────────────────┘
//! ```
//!
//! `length` is the byte length of the payload that follows. All multi-byte
//! integers are Big Endian. A `type` outside the known operation set, or a
//! `length` outside the valid bound for that type, is a framing error: the
//! malformed message is discarded and the reader resumes scanning.

/// Account id reserved for the administrator (account creation, shutdown).
pub const ADMIN_ACCOUNT_ID: u32 = 0;

/// Highest valid bank account id (ids run 1..=MAX, 0 is the admin).
pub const MAX_BANK_ACCOUNTS: u32 = 4096;

/// Maximum number of bank offices (worker tasks).
pub const MAX_BANK_OFFICES: usize = 99;

/// Minimum balance carried by an operation argument.
pub const MIN_BALANCE: u32 = 1;

/// Maximum balance an account may hold.
pub const MAX_BALANCE: u32 = 1_000_000_000;

/// Password length bounds (characters, no whitespace).
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 20;

/// Maximum artificial operation delay in milliseconds.
pub const MAX_OP_DELAY_MS: u32 = 99_999;

/// Length of the random salt stored per account.
pub const SALT_LEN: usize = 64;

/// Length of the hex-encoded SHA-256 password digest.
pub const HASH_LEN: usize = 64;

/// Size of the `type` field on the wire.
pub const TYPE_SIZE: usize = 4;

/// Size of the `length` field on the wire.
pub const LENGTH_SIZE: usize = 4;

/// Fixed password field on the wire: NUL-padded to `MAX_PASSWORD_LEN + 1`.
pub const PASSWORD_FIELD_LEN: usize = MAX_PASSWORD_LEN + 1;

/// Request header payload: pid + account_id + password field + op_delay_ms.
pub const REQUEST_HEADER_SIZE: u32 = 4 + 4 + PASSWORD_FIELD_LEN as u32 + 4;

/// Create-account variant fields: new id + initial balance + password field.
pub const CREATE_FIELDS_SIZE: u32 = 4 + 4 + PASSWORD_FIELD_LEN as u32;

/// Transfer variant fields: destination id + amount.
pub const TRANSFER_FIELDS_SIZE: u32 = 4 + 4;

/// Largest valid request payload (header + create variant).
pub const MAX_REQUEST_PAYLOAD: u32 = REQUEST_HEADER_SIZE + CREATE_FIELDS_SIZE;

/// Reply header payload: account_id + ret_code.
pub const REPLY_HEADER_SIZE: u32 = 4 + 4;

/// Reply variant value (balance / transfer balance / shutdown queue depth).
pub const REPLY_VALUE_SIZE: u32 = 4;

/// Largest valid reply payload.
pub const MAX_REPLY_PAYLOAD: u32 = REPLY_HEADER_SIZE + REPLY_VALUE_SIZE;

/// Operation kind carried in the frame `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Create a new bank account (admin only).
    CreateAccount = 0,
    /// Query the authenticated account's balance.
    Balance = 1,
    /// Transfer an amount to another account.
    Transfer = 2,
    /// Drain the queue and terminate the server (admin only).
    Shutdown = 3,
}

impl OpKind {
    /// Decode an operation kind from its wire value.
    ///
    /// Returns `None` for values outside the known operation set.
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(OpKind::CreateAccount),
            1 => Some(OpKind::Balance),
            2 => Some(OpKind::Transfer),
            3 => Some(OpKind::Shutdown),
            _ => None,
        }
    }

    /// Wire value of this operation kind.
    #[inline]
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Exact request payload length for this operation kind.
    pub fn request_payload_len(self) -> u32 {
        match self {
            OpKind::CreateAccount => REQUEST_HEADER_SIZE + CREATE_FIELDS_SIZE,
            OpKind::Transfer => REQUEST_HEADER_SIZE + TRANSFER_FIELDS_SIZE,
            OpKind::Balance | OpKind::Shutdown => REQUEST_HEADER_SIZE,
        }
    }

    /// Whether a successful reply to this operation carries a value field.
    pub fn reply_has_value(self) -> bool {
        !matches!(self, OpKind::CreateAccount)
    }
}

/// Closed enumeration of operation outcomes reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCode {
    /// Operation completed.
    Ok = 0,
    /// Server unreachable (request FIFO could not be opened for writing).
    SrvDown = 1,
    /// No reply arrived within the client's timeout window.
    SrvTimeout = 2,
    /// Client reply FIFO unobtainable; reply dropped server-side.
    UsrDown = 3,
    /// Unknown account or password mismatch.
    LoginFail = 4,
    /// Operation not allowed for this account (admin restrictions).
    OpNallow = 5,
    /// Account id already occupied.
    IdInUse = 6,
    /// Destination account does not exist.
    IdNotFound = 7,
    /// Transfer destination equals the source account.
    SameId = 8,
    /// Source balance smaller than the transfer amount.
    NoFunds = 9,
    /// Destination balance would exceed `MAX_BALANCE`.
    TooHigh = 10,
    /// Malformed operation arguments.
    BadReqArgs = 11,
    /// Any other failure.
    Other = 12,
}

impl RetCode {
    /// Decode a return code from its wire value.
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(RetCode::Ok),
            1 => Some(RetCode::SrvDown),
            2 => Some(RetCode::SrvTimeout),
            3 => Some(RetCode::UsrDown),
            4 => Some(RetCode::LoginFail),
            5 => Some(RetCode::OpNallow),
            6 => Some(RetCode::IdInUse),
            7 => Some(RetCode::IdNotFound),
            8 => Some(RetCode::SameId),
            9 => Some(RetCode::NoFunds),
            10 => Some(RetCode::TooHigh),
            11 => Some(RetCode::BadReqArgs),
            12 => Some(RetCode::Other),
            _ => None,
        }
    }

    /// Wire value of this return code.
    #[inline]
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// Stable uppercase label, used by the audit trail and the binaries.
    pub fn label(self) -> &'static str {
        match self {
            RetCode::Ok => "OK",
            RetCode::SrvDown => "SRV_DOWN",
            RetCode::SrvTimeout => "SRV_TIMEOUT",
            RetCode::UsrDown => "USR_DOWN",
            RetCode::LoginFail => "LOGIN_FAIL",
            RetCode::OpNallow => "OP_NALLOW",
            RetCode::IdInUse => "ID_IN_USE",
            RetCode::IdNotFound => "ID_NOT_FOUND",
            RetCode::SameId => "SAME_ID",
            RetCode::NoFunds => "NO_FUNDS",
            RetCode::TooHigh => "TOO_HIGH",
            RetCode::BadReqArgs => "BAD_REQ_ARGS",
            RetCode::Other => "OTHER",
        }
    }
}
