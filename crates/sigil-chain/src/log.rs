//! Structured log lines for frames crossing a trust boundary.
//!
//! Operators read these against the LCD, so the fields are the same base32
//! renderings the display shows.

use tracing::info;

use crate::frame::{b32enc, counter, message, pubkey, signature, timestamp};

pub fn log_genesis(genesis: &[u8]) {
    info!(
        pubkey = %b32enc(pubkey(genesis)),
        signature = %b32enc(signature(genesis)),
        "genesis",
    );
}

pub fn log_request(request: &[u8]) {
    info!(
        pubkey = %b32enc(pubkey(request)),
        counter = counter(request),
        timestamp = timestamp(request),
        digest = %b32enc(message(request)),
        "signing request",
    );
}

pub fn log_request_attempt(request: &[u8], attempt: u32, retries: u32) {
    info!(
        pubkey = %b32enc(pubkey(request)),
        counter = counter(request),
        attempt,
        retries,
        "signing request attempt",
    );
}

pub fn log_response(response: &[u8]) {
    info!(
        pubkey = %b32enc(pubkey(response)),
        counter = counter(response),
        timestamp = timestamp(response),
        signature = %b32enc(signature(response)),
        "signing response",
    );
}
