//! Protocol module - wire format, operations, and message types.
//!
//! This module implements the binary TLV protocol carried over the FIFOs:
//! - operation and return-code enumerations plus protocol constants
//! - request/reply message types with encoding and payload parsing

mod message;
mod wire_format;

pub use message::{put_password, take_password, Reply, ReplyValue, Request, RequestHeader, RequestOp};
pub use wire_format::{
    OpKind, RetCode, ADMIN_ACCOUNT_ID, CREATE_FIELDS_SIZE, HASH_LEN, LENGTH_SIZE, MAX_BALANCE,
    MAX_BANK_ACCOUNTS, MAX_BANK_OFFICES, MAX_OP_DELAY_MS, MAX_PASSWORD_LEN, MAX_REPLY_PAYLOAD,
    MAX_REQUEST_PAYLOAD, MIN_BALANCE, MIN_PASSWORD_LEN, PASSWORD_FIELD_LEN, REPLY_HEADER_SIZE,
    REPLY_VALUE_SIZE, REQUEST_HEADER_SIZE, SALT_LEN, TRANSFER_FIELDS_SIZE, TYPE_SIZE,
};
