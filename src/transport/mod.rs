//! Transport module - named pipe (FIFO) plumbing.
//!
//! Two kinds of channels:
//! - the shared request FIFO at a well-known path, written by every client
//!   and read by exactly one consumer (the dispatch loop);
//! - one private reply FIFO per client, at a path derived from the client's
//!   process id, written at most once by the server.

pub mod fifo;

pub use fifo::{
    create_fifo, open_reply_reader, open_reply_writer, open_request_reader, open_request_writer,
    read_exact, reply_path_for, FifoCleanup, REPLY_FIFO_PREFIX, REPLY_PID_WIDTH,
    REQUEST_FIFO_PATH,
};
