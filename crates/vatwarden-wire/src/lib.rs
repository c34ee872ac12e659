//! Newline-delimited JSON-RPC 2.0 framing shared by the vat server, its
//! remote peers and the admin CLI.
//!
//! Every request carries a `target`: the sturdy-ref token of the capability
//! the call is addressed to. Sturdy refs travel as `jrpc://host:port/token`.

mod client;
mod endpoint;
mod frame;

use std::time::Duration;

use thiserror::Error;

pub use client::{DEFAULT_CALL_TIMEOUT, call, probe};
pub use endpoint::{Endpoint, SCHEME};
pub use frame::{JSONRPC_VERSION, MAX_FRAME_LEN, Request, Response, RpcError, codes, read_frame, write_frame};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame exceeds {0} bytes")]
    FrameTooLarge(usize),
    #[error("connection closed before a response arrived")]
    Closed,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },
}
