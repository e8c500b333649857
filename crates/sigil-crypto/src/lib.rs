//! Core cryptographic primitives (thin wrappers around ring)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Crypto,
    EmptyInput,
}

pub mod ed25519 {
    use crate::Error;
    use ring::rand::{SecureRandom, SystemRandom};
    use ring::signature::{self, Ed25519KeyPair, KeyPair};

    pub const SEED: usize = 32;
    pub const PUBKEY: usize = 32;
    pub const SIGNATURE: usize = 64;

    /// Fresh 32-byte private seed from the system CSPRNG.
    pub fn generate_seed() -> [u8; SEED] {
        let rng = SystemRandom::new();
        let mut seed = [0u8; SEED];
        rng.fill(&mut seed).expect("system rng");
        seed
    }

    // Deterministic key from seed for testability
    fn keypair(seed32: &[u8; SEED]) -> Ed25519KeyPair {
        Ed25519KeyPair::from_seed_unchecked(seed32).expect("ed25519 seed")
    }

    pub fn public_key(seed32: &[u8; SEED]) -> [u8; PUBKEY] {
        let kp = keypair(seed32);
        let mut out = [0u8; PUBKEY];
        out.copy_from_slice(kp.public_key().as_ref());
        out
    }

    pub fn sign(seed32: &[u8; SEED], msg: &[u8]) -> [u8; SIGNATURE] {
        let kp = keypair(seed32);
        let mut out = [0u8; SIGNATURE];
        out.copy_from_slice(kp.sign(msg).as_ref());
        out
    }

    pub fn verify(pk: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), Error> {
        signature::UnparsedPublicKey::new(&signature::ED25519, pk)
            .verify(msg, sig)
            .map_err(|_| Error::Crypto)
    }
}

pub mod digest {
    use crate::Error;
    use ring::digest::{digest, SHA384};

    pub const DIGEST: usize = 48;

    /// SHA-384 over a non-empty byte string.
    pub fn sha384(data: &[u8]) -> Result<[u8; DIGEST], Error> {
        if data.is_empty() {
            return Err(Error::EmptyInput);
        }
        let d = digest(&SHA384, data);
        let mut out = [0u8; DIGEST];
        out.copy_from_slice(d.as_ref());
        Ok(out)
    }
}

/// Constant-time equality for key material.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}
