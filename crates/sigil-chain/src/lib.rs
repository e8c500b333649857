//! Signed frame layout, verification algebra, and the chain signer.
//!
//! Every signed frame is `signature ‖ pubkey ‖ [previous ‖ counter ‖
//! timestamp] ‖ message`; the signature covers everything after it. Three
//! sizes exist on the wire: a 96-byte genesis, a 224-byte request wrapping a
//! 48-byte digest, and a 400-byte response wrapping the full request.

pub mod frame;
pub mod signer;
pub mod verify;

mod log;

pub use frame::{
    b32dec, b32enc, counter, message, pack_signed, previous, pubkey, signature, timestamp,
    unpack_signed, FrameKind, Signed,
};
pub use log::{log_genesis, log_request, log_request_attempt, log_response};
pub use signer::{build_signing_form, ChainSigner, FrameStore, Signer};
pub use verify::{
    is_valid, verify_and_unpack, verify_chain, verify_genesis, verify_node, verify_self,
    ChainError,
};

pub const SIGNATURE: usize = 64;
pub const PUBKEY: usize = 32;
pub const COUNTER: usize = 8;
pub const TIMESTAMP: usize = 8;

pub const GENESIS: usize = SIGNATURE + PUBKEY;
pub const PREFIX: usize = GENESIS + SIGNATURE + COUNTER + TIMESTAMP;

pub const DIGEST: usize = 48;
pub const REQUEST: usize = PREFIX + DIGEST;
pub const RESPONSE: usize = PREFIX + REQUEST;

/// The frame sizes accepted anywhere in the system.
pub const SIZES: [usize; 3] = [GENESIS, REQUEST, RESPONSE];
pub const MAX_SIZE: usize = RESPONSE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes() {
        assert_eq!(GENESIS, 96);
        assert_eq!(PREFIX, 176);
        assert_eq!(REQUEST, 224);
        assert_eq!(RESPONSE, 400);
        assert_eq!(SIZES, [96, 224, 400]);
        assert_eq!(MAX_SIZE, 400);
    }
}
