//! Request and reply message types with encoding and payload parsing.
//!
//! Messages are owned values end to end: the client builds a [`Request`],
//! encodes it into a frame, and the server-side dispatch loop parses it back
//! into an owned `Request` that travels through the bounded queue into a
//! bank office. No raw-pointer lifetime crosses the producer/consumer
//! boundary.
//!
//! Decoding the payload is separate from reading the frame off a FIFO: the
//! readers (dispatch loop, client runtime) perform the three wire reads
//! (`type`, `length`, `payload`) and hand the payload bytes to
//! [`Request::from_payload`] / [`Reply::from_payload`].

use bytes::{Buf, BufMut, BytesMut};

use super::wire_format::{
    OpKind, RetCode, LENGTH_SIZE, MAX_PASSWORD_LEN, PASSWORD_FIELD_LEN, REPLY_HEADER_SIZE,
    REPLY_VALUE_SIZE, TYPE_SIZE,
};
use crate::error::{BankError, Result};

/// Fields common to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Process id of the requesting client; determines the reply FIFO path.
    pub pid: u32,
    /// Account performing the operation (0 = admin).
    pub account_id: u32,
    /// Plaintext password, NUL-padded to a fixed field on the wire.
    pub password: String,
    /// Artificial latency applied at the protocol's delay points.
    pub op_delay_ms: u32,
}

/// Operation-specific request fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOp {
    /// Balance and shutdown requests carry no extra fields.
    None,
    /// Fields for `OpKind::CreateAccount`.
    CreateAccount {
        account_id: u32,
        balance: u32,
        password: String,
    },
    /// Fields for `OpKind::Transfer`.
    Transfer { account_id: u32, amount: u32 },
}

/// A complete request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: OpKind,
    pub header: RequestHeader,
    pub op: RequestOp,
}

impl Request {
    /// Build a create-account request (admin only).
    pub fn create_account(
        pid: u32,
        account_id: u32,
        password: &str,
        op_delay_ms: u32,
        new_account_id: u32,
        balance: u32,
        new_password: &str,
    ) -> Self {
        Self {
            kind: OpKind::CreateAccount,
            header: RequestHeader {
                pid,
                account_id,
                password: password.to_string(),
                op_delay_ms,
            },
            op: RequestOp::CreateAccount {
                account_id: new_account_id,
                balance,
                password: new_password.to_string(),
            },
        }
    }

    /// Build a balance query.
    pub fn balance(pid: u32, account_id: u32, password: &str, op_delay_ms: u32) -> Self {
        Self {
            kind: OpKind::Balance,
            header: RequestHeader {
                pid,
                account_id,
                password: password.to_string(),
                op_delay_ms,
            },
            op: RequestOp::None,
        }
    }

    /// Build a transfer request.
    pub fn transfer(
        pid: u32,
        account_id: u32,
        password: &str,
        op_delay_ms: u32,
        dest_account_id: u32,
        amount: u32,
    ) -> Self {
        Self {
            kind: OpKind::Transfer,
            header: RequestHeader {
                pid,
                account_id,
                password: password.to_string(),
                op_delay_ms,
            },
            op: RequestOp::Transfer {
                account_id: dest_account_id,
                amount,
            },
        }
    }

    /// Build a shutdown request (admin only).
    pub fn shutdown(pid: u32, account_id: u32, password: &str, op_delay_ms: u32) -> Self {
        Self {
            kind: OpKind::Shutdown,
            header: RequestHeader {
                pid,
                account_id,
                password: password.to_string(),
                op_delay_ms,
            },
            op: RequestOp::None,
        }
    }

    /// Encode this request as a complete wire frame (type + length + payload).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.kind.request_payload_len();
        let mut buf =
            BytesMut::with_capacity(TYPE_SIZE + LENGTH_SIZE + payload_len as usize);

        buf.put_u32(self.kind.to_wire());
        buf.put_u32(payload_len);
        buf.put_u32(self.header.pid);
        buf.put_u32(self.header.account_id);
        put_password(&mut buf, &self.header.password);
        buf.put_u32(self.header.op_delay_ms);

        match &self.op {
            RequestOp::None => {}
            RequestOp::CreateAccount {
                account_id,
                balance,
                password,
            } => {
                buf.put_u32(*account_id);
                buf.put_u32(*balance);
                put_password(&mut buf, password);
            }
            RequestOp::Transfer { account_id, amount } => {
                buf.put_u32(*account_id);
                buf.put_u32(*amount);
            }
        }

        buf.to_vec()
    }

    /// Parse a request payload for the given operation kind.
    ///
    /// The payload must be exactly the length declared valid for `kind`;
    /// anything else is a framing error and the frame is discarded by the
    /// caller.
    pub fn from_payload(kind: OpKind, payload: &[u8]) -> Result<Self> {
        if payload.len() != kind.request_payload_len() as usize {
            return Err(BankError::Protocol(format!(
                "request payload length {} invalid for {:?}",
                payload.len(),
                kind
            )));
        }

        let mut buf = payload;
        let pid = buf.get_u32();
        let account_id = buf.get_u32();
        let password = take_password(&mut buf)?;
        let op_delay_ms = buf.get_u32();

        let op = match kind {
            OpKind::CreateAccount => {
                let account_id = buf.get_u32();
                let balance = buf.get_u32();
                let password = take_password(&mut buf)?;
                RequestOp::CreateAccount {
                    account_id,
                    balance,
                    password,
                }
            }
            OpKind::Transfer => RequestOp::Transfer {
                account_id: buf.get_u32(),
                amount: buf.get_u32(),
            },
            OpKind::Balance | OpKind::Shutdown => RequestOp::None,
        };

        Ok(Self {
            kind,
            header: RequestHeader {
                pid,
                account_id,
                password,
                op_delay_ms,
            },
            op,
        })
    }
}

/// Value carried by a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyValue {
    /// No value (create-account replies, and every non-`Ok` reply).
    None,
    /// Current balance of the authenticated account.
    Balance(u32),
    /// Resulting source balance after a transfer.
    Transfer(u32),
    /// Queued-but-unprocessed requests observed at shutdown time.
    Shutdown(u32),
}

/// A complete reply message. Produced exactly once per accepted request, or
/// synthesized locally by the client (`SrvDown`/`SrvTimeout`), in which case
/// it is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: OpKind,
    pub account_id: u32,
    pub ret_code: RetCode,
    pub value: ReplyValue,
}

impl Reply {
    /// Build the reply for a processed request.
    ///
    /// The value field is present only for successful operations whose kind
    /// carries one; failed replies are header-only.
    pub fn for_request(request: &Request, ret_code: RetCode, value: u32) -> Self {
        let value = if ret_code == RetCode::Ok {
            match request.kind {
                OpKind::Balance => ReplyValue::Balance(value),
                OpKind::Transfer => ReplyValue::Transfer(value),
                OpKind::Shutdown => ReplyValue::Shutdown(value),
                OpKind::CreateAccount => ReplyValue::None,
            }
        } else {
            ReplyValue::None
        };
        Self {
            kind: request.kind,
            account_id: request.header.account_id,
            ret_code,
            value,
        }
    }

    /// Synthesize a local reply that was never on the wire
    /// (`SrvDown` when the server FIFO is unreachable, `SrvTimeout` on
    /// expiry of the client's wait window).
    pub fn offline(kind: OpKind, account_id: u32, ret_code: RetCode) -> Self {
        Self {
            kind,
            account_id,
            ret_code,
            value: ReplyValue::None,
        }
    }

    /// The reply's value field, or zero when absent.
    pub fn value_or_zero(&self) -> u32 {
        match self.value {
            ReplyValue::None => 0,
            ReplyValue::Balance(v) | ReplyValue::Transfer(v) | ReplyValue::Shutdown(v) => v,
        }
    }

    /// Encode this reply as a complete wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = match self.value {
            ReplyValue::None => REPLY_HEADER_SIZE,
            _ => REPLY_HEADER_SIZE + REPLY_VALUE_SIZE,
        };
        let mut buf =
            BytesMut::with_capacity(TYPE_SIZE + LENGTH_SIZE + payload_len as usize);

        buf.put_u32(self.kind.to_wire());
        buf.put_u32(payload_len);
        buf.put_u32(self.account_id);
        buf.put_u32(self.ret_code.to_wire());
        match self.value {
            ReplyValue::None => {}
            ReplyValue::Balance(v) | ReplyValue::Transfer(v) | ReplyValue::Shutdown(v) => {
                buf.put_u32(v);
            }
        }

        buf.to_vec()
    }

    /// Parse a reply payload for the given operation kind.
    pub fn from_payload(kind: OpKind, payload: &[u8]) -> Result<Self> {
        let with_value = match payload.len() as u32 {
            REPLY_HEADER_SIZE => false,
            l if l == REPLY_HEADER_SIZE + REPLY_VALUE_SIZE => true,
            other => {
                return Err(BankError::Protocol(format!(
                    "reply payload length {} invalid for {:?}",
                    other, kind
                )))
            }
        };

        let mut buf = payload;
        let account_id = buf.get_u32();
        let raw_code = buf.get_u32();
        let ret_code = RetCode::from_wire(raw_code)
            .ok_or_else(|| BankError::Protocol(format!("unknown return code {}", raw_code)))?;

        let value = if with_value {
            let v = buf.get_u32();
            match kind {
                OpKind::Balance => ReplyValue::Balance(v),
                OpKind::Transfer => ReplyValue::Transfer(v),
                OpKind::Shutdown => ReplyValue::Shutdown(v),
                OpKind::CreateAccount => {
                    return Err(BankError::Protocol(
                        "create-account reply carries no value".to_string(),
                    ))
                }
            }
        } else {
            ReplyValue::None
        };

        Ok(Self {
            kind,
            account_id,
            ret_code,
            value,
        })
    }
}

/// Write a password into its fixed, NUL-padded wire field.
///
/// # Panics
///
/// Panics if the password exceeds `MAX_PASSWORD_LEN`; lengths are validated
/// at the process boundary before a message is ever built.
pub fn put_password(buf: &mut BytesMut, password: &str) {
    assert!(
        password.len() <= MAX_PASSWORD_LEN,
        "password exceeds wire field"
    );
    buf.put_slice(password.as_bytes());
    buf.put_bytes(0, PASSWORD_FIELD_LEN - password.len());
}

/// Read a password back out of its fixed wire field.
pub fn take_password(buf: &mut &[u8]) -> Result<String> {
    if buf.len() < PASSWORD_FIELD_LEN {
        return Err(BankError::Protocol(
            "truncated password field".to_string(),
        ));
    }
    let field = &buf[..PASSWORD_FIELD_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let password = std::str::from_utf8(&field[..end])
        .map_err(|_| BankError::Protocol("password field is not valid UTF-8".to_string()))?
        .to_string();
    buf.advance(PASSWORD_FIELD_LEN);
    Ok(password)
}
