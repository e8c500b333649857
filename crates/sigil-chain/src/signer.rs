//! The chain-signer state machine.
//!
//! [`Signer`] is the pure chain arithmetic: key, counter, previous-signature
//! linkage. [`ChainSigner`] layers the durability contract on top: every
//! produced frame is appended to the chain store before it is released, and
//! an exactly-repeated request returns the cached tail without advancing
//! anything.

use std::time::{SystemTime, UNIX_EPOCH};

use sigil_crypto::ed25519;

use crate::verify::{verify_self, ChainError};
use crate::{GENESIS, PREFIX, PUBKEY, REQUEST, SIGNATURE};

/// Counters past 2^63 are treated as overflow; the signer refuses to
/// advance and the daemon must abort for re-provisioning.
pub const COUNTER_CEILING: u64 = 1 << 63;

/// What the key signs: everything after the leading signature.
pub fn build_signing_form(
    pubkey: &[u8; PUBKEY],
    previous: &[u8; SIGNATURE],
    counter: u64,
    timestamp: u64,
    message: &[u8],
) -> Vec<u8> {
    let mut form = Vec::with_capacity(PREFIX - SIGNATURE + message.len());
    form.extend_from_slice(pubkey);
    form.extend_from_slice(previous);
    form.extend_from_slice(&counter.to_le_bytes());
    form.extend_from_slice(&timestamp.to_le_bytes());
    form.extend_from_slice(message);
    form
}

/// A signing key and its chain position. The key lives only in this struct,
/// only for the lifetime of the owning daemon.
pub struct Signer {
    seed: [u8; ed25519::SEED],
    public: [u8; PUBKEY],
    counter: u64,
    previous: [u8; SIGNATURE],
    genesis: [u8; GENESIS],
}

impl Signer {
    /// Fresh key from the system CSPRNG.
    pub fn new() -> Signer {
        Signer::from_seed(ed25519::generate_seed())
    }

    pub fn from_seed(seed: [u8; ed25519::SEED]) -> Signer {
        let public = ed25519::public_key(&seed);
        let sig = ed25519::sign(&seed, &public);
        let mut genesis = [0u8; GENESIS];
        genesis[..SIGNATURE].copy_from_slice(&sig);
        genesis[SIGNATURE..].copy_from_slice(&public);
        Signer {
            seed,
            public,
            counter: 0,
            previous: sig,
            genesis,
        }
    }

    pub fn public(&self) -> &[u8; PUBKEY] {
        &self.public
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn previous(&self) -> &[u8; SIGNATURE] {
        &self.previous
    }

    /// The 96-byte genesis frame: `Sign(key, pubkey) ‖ pubkey`.
    pub fn genesis(&self) -> &[u8] {
        &self.genesis
    }

    /// Sign `message` as the next node: advance the counter, link the
    /// previous signature, return `signature ‖ signing_form`.
    pub fn sign(&mut self, timestamp: u64, message: &[u8]) -> Result<Vec<u8>, ChainError> {
        let counter = match self.counter.checked_add(1) {
            Some(next) if next <= COUNTER_CEILING => next,
            _ => return Err(ChainError::CounterExhausted { counter: self.counter }),
        };
        let signed = self.sign_raw(counter, timestamp, message);
        self.previous.copy_from_slice(&signed[..SIGNATURE]);
        self.counter = counter;
        Ok(signed)
    }

    fn sign_raw(&self, counter: u64, timestamp: u64, message: &[u8]) -> Vec<u8> {
        let form = build_signing_form(&self.public, &self.previous, counter, timestamp, message);
        let sig = ed25519::sign(&self.seed, &form);
        let mut signed = Vec::with_capacity(SIGNATURE + form.len());
        signed.extend_from_slice(&sig);
        signed.extend_from_slice(&form);
        signed
    }

    /// Sign with an arbitrary counter, without advancing state. Only for
    /// constructing adversarial frames in tests.
    #[cfg(test)]
    pub(crate) fn sign_any_counter(&self, counter: u64, timestamp: u64, message: &[u8]) -> Vec<u8> {
        self.sign_raw(counter, timestamp, message)
    }

    #[cfg(test)]
    pub(crate) fn force_counter(&mut self, counter: u64) {
        self.counter = counter;
    }
}

impl Default for Signer {
    fn default() -> Signer {
        Signer::new()
    }
}

/// Durable sink for produced frames. The filesystem chain store implements
/// this; tests substitute in-memory recorders.
pub trait FrameStore {
    fn append(&self, signed: &[u8]) -> std::io::Result<()>;
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A [`Signer`] bound to a chain store, implementing the request contract:
/// verified 224-byte requests in, durable 400-byte responses out.
pub struct ChainSigner<S: FrameStore> {
    signer: Signer,
    store: S,
    tail: Vec<u8>,
    last_message: Option<Vec<u8>>,
}

impl<S: FrameStore> ChainSigner<S> {
    /// Generates the key and persists the genesis frame before returning;
    /// the chain is walkable from the very first response.
    pub fn new(store: S) -> Result<ChainSigner<S>, ChainError> {
        let signer = Signer::new();
        store.append(signer.genesis())?;
        let tail = signer.genesis().to_vec();
        Ok(ChainSigner {
            signer,
            store,
            tail,
            last_message: None,
        })
    }

    pub fn public(&self) -> &[u8; PUBKEY] {
        self.signer.public()
    }

    pub fn counter(&self) -> u64 {
        self.signer.counter()
    }

    pub fn genesis(&self) -> &[u8] {
        self.signer.genesis()
    }

    /// The most recent frame: genesis at start, else the last response.
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// Produce the next response for a self-verified request.
    ///
    /// Repeating the previous request exactly returns the cached tail: no
    /// counter increment, no store write. The serial transport retries
    /// blindly, so this is what makes "exactly once per request content"
    /// hold end to end. A fresh request is signed, appended to the store,
    /// and only then released.
    pub fn sign(&mut self, request: &[u8], timestamp: Option<u64>) -> Result<&[u8], ChainError> {
        if request.len() != REQUEST {
            return Err(ChainError::BadSize { got: request.len() });
        }
        verify_self(request)?;
        if self.last_message.as_deref() == Some(request) {
            return Ok(&self.tail);
        }
        let ts = timestamp.unwrap_or_else(wall_clock);
        let signed = self.signer.sign(ts, request)?;
        self.store.append(&signed)?;
        self.tail = signed;
        self.last_message = Some(request.to_vec());
        Ok(&self.tail)
    }
}
