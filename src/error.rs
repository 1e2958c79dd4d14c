//! The error taxonomy shared across the protocol client.
//!
//! Transport errors tear down the connection and fail every pending
//! request; protocol, target and timeout errors fail only the operation
//! that hit them.  The client never retries on its own, with one
//! exception: the text→binary memory-write fallback in
//! [`crate::debugger::Debugger::write_memory`].

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GdbError {
    /// Underlying socket I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The TCP connect itself did not complete in time.
    #[error("connecting to the target timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A command received no reply within its timeout.  The connection
    /// stays up; only this command fails.
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The socket died or the event loop is gone; every pending request is
    /// failed with this.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A fixed-width reply carried fewer hex characters than the format
    /// requires.
    #[error("reply too short: expected {expected} hex chars, got {actual}")]
    ReplyTooShort { expected: usize, actual: usize },

    /// A targeted command got a reply of the wrong shape (e.g. anything
    /// other than `OK` to a write).
    #[error("unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: String, reply: String },

    /// The target answered `E<code>`.
    #[error("target reported error E{code:02x} during {context}")]
    Target { context: String, code: u8 },

    /// A reply that should have been hex was not.
    #[error("reply is not valid hex: {0:?}")]
    BadHex(String),
}
