//! Local stream-socket fan-out.
//!
//! Each daemon exposes one AF_UNIX stream socket with fixed request and
//! response sizes. Connections are one-shot: the client writes its request
//! and half-closes, the server reads to EOF, validates the byte count
//! against its allowed set, handles, answers, closes. Deadlines on both
//! sides are sized so one full serial retry cycle fits inside a connection.

use std::io;
use std::time::Duration;

use thiserror::Error;

use sigil_chain::ChainError;
use sigil_serial::{TransportError, RETRIES, TIMEOUT};
use sigil_store::StoreError;

mod activation;
mod client;
mod server;
mod wire;

pub use activation::{bind_path, inherited_listener, inherited_or_bind};
pub use client::{DisplayClient, IpcClient, PrivateClient, ProxyClient};
pub use server::{
    ClientHandler, DisplayHandler, Handler, IpcServer, PrivateHandler, TipSink, CLIENT_SIZES,
    DISPLAY_SIZES, PRIVATE_SIZES,
};

/// Per-connection deadline: two full serial retry cycles.
pub const IPC_TIMEOUT: Duration = Duration::from_secs(2 * RETRIES as u64 * TIMEOUT.as_secs());

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("bad request size {got} not in {allowed:?}")]
    BadRequestSize {
        got: usize,
        allowed: &'static [usize],
    },

    #[error("bad response size: expected {expected}; got {got}")]
    BadResponseSize { expected: usize, got: usize },

    #[error("response does not end with request")]
    ResponseMismatch,

    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl From<IpcError> for io::Error {
    fn from(err: IpcError) -> io::Error {
        match err {
            IpcError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
