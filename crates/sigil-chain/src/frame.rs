//! Fixed-offset views over raw signed frames.
//!
//! Frames stay flat byte buffers on the hot path; these accessors slice at
//! the fixed offsets and the `Signed` struct is only built when a caller
//! needs the decomposed form.

use crate::{COUNTER, GENESIS, PREFIX, PUBKEY, REQUEST, RESPONSE, SIGNATURE, TIMESTAMP};

/// The three frame variants, keyed by exact size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Genesis,
    Request,
    Response,
}

impl FrameKind {
    pub fn from_len(len: usize) -> Option<FrameKind> {
        match len {
            GENESIS => Some(FrameKind::Genesis),
            REQUEST => Some(FrameKind::Request),
            RESPONSE => Some(FrameKind::Response),
            _ => None,
        }
    }

    pub fn len(self) -> usize {
        match self {
            FrameKind::Genesis => GENESIS,
            FrameKind::Request => REQUEST,
            FrameKind::Response => RESPONSE,
        }
    }
}

pub fn signature(signed: &[u8]) -> &[u8] {
    debug_assert!(signed.len() >= GENESIS);
    &signed[0..SIGNATURE]
}

pub fn pubkey(signed: &[u8]) -> &[u8] {
    debug_assert!(signed.len() >= GENESIS);
    &signed[SIGNATURE..GENESIS]
}

pub fn previous(signed: &[u8]) -> &[u8] {
    debug_assert!(signed.len() >= PREFIX);
    &signed[GENESIS..GENESIS + SIGNATURE]
}

pub fn counter(signed: &[u8]) -> u64 {
    debug_assert!(signed.len() >= PREFIX);
    let mut le = [0u8; COUNTER];
    le.copy_from_slice(&signed[160..160 + COUNTER]);
    u64::from_le_bytes(le)
}

pub fn timestamp(signed: &[u8]) -> u64 {
    debug_assert!(signed.len() >= PREFIX);
    let mut le = [0u8; TIMESTAMP];
    le.copy_from_slice(&signed[168..168 + TIMESTAMP]);
    u64::from_le_bytes(le)
}

pub fn message(signed: &[u8]) -> &[u8] {
    debug_assert!(signed.len() >= PREFIX);
    &signed[PREFIX..]
}

/// Decomposed view of a non-genesis frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signed {
    pub signature: [u8; SIGNATURE],
    pub pubkey: [u8; PUBKEY],
    pub previous: [u8; SIGNATURE],
    pub counter: u64,
    pub timestamp: u64,
    pub message: Vec<u8>,
}

pub fn unpack_signed(signed: &[u8]) -> Signed {
    assert!(signed.len() >= PREFIX);
    let mut out = Signed {
        signature: [0; SIGNATURE],
        pubkey: [0; PUBKEY],
        previous: [0; SIGNATURE],
        counter: counter(signed),
        timestamp: timestamp(signed),
        message: message(signed).to_vec(),
    };
    out.signature.copy_from_slice(signature(signed));
    out.pubkey.copy_from_slice(pubkey(signed));
    out.previous.copy_from_slice(previous(signed));
    out
}

pub fn pack_signed(signed: &Signed) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX + signed.message.len());
    out.extend_from_slice(&signed.signature);
    out.extend_from_slice(&signed.pubkey);
    out.extend_from_slice(&signed.previous);
    out.extend_from_slice(&signed.counter.to_le_bytes());
    out.extend_from_slice(&signed.timestamp.to_le_bytes());
    out.extend_from_slice(&signed.message);
    out
}

const B32: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Unpadded RFC 4648 base32: a pubkey encodes to 52 chars, a signature to 103.
pub fn b32enc(data: &[u8]) -> String {
    base32::encode(B32, data)
}

pub fn b32dec(text: &str) -> Option<Vec<u8>> {
    base32::decode(B32, text)
}
