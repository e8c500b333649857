//! Pure verification over raw frame bytes.
//!
//! Verification always uses the pubkey embedded at offset [64, 96); checks
//! against an *expected* pubkey are a separate, constant-time comparison so
//! an attacker-supplied frame cannot leak key-dependent timing.

use thiserror::Error;

use sigil_crypto::{ct_eq, ed25519};

use crate::frame::{b32enc, pubkey, unpack_signed, Signed};
use crate::{GENESIS, PREFIX, PUBKEY, SIGNATURE};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("bad frame size {got}")]
    BadSize { got: usize },

    #[error("bad signature")]
    BadSignature,

    #[error("embedded pubkey mismatch: {embedded} != {expected}")]
    PubkeyMismatch { embedded: String, expected: String },

    #[error("invalid counter {got}, possible overflow")]
    BadCounter { got: u64 },

    #[error("expected counter {expected}; got {got}")]
    CounterLink { expected: u64, got: u64 },

    #[error("counter exhausted at {counter}")]
    CounterExhausted { counter: u64 },

    #[error("tail {tail} is the implied genesis of an unused key")]
    FreshKey { tail: String },

    #[error("chain broken: frame {signature} missing from storage")]
    BrokenChain { signature: String },

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Ed25519-verify `signed` with its own embedded pubkey.
pub fn verify_self(signed: &[u8]) -> Result<(), ChainError> {
    if signed.len() < GENESIS {
        return Err(ChainError::BadSize { got: signed.len() });
    }
    ed25519::verify(pubkey(signed), &signed[SIGNATURE..], &signed[..SIGNATURE])
        .map_err(|_| ChainError::BadSignature)
}

/// Boolean form for untrusted bytes; swallows the failure.
pub fn is_valid(signed: &[u8]) -> bool {
    verify_self(signed).is_ok()
}

/// Verify then decompose; counter 0 on a non-genesis frame means the signer
/// wrapped and the frame must be rejected.
pub fn verify_and_unpack(signed: &[u8]) -> Result<Signed, ChainError> {
    if signed.len() < PREFIX {
        return Err(ChainError::BadSize { got: signed.len() });
    }
    verify_self(signed)?;
    let node = unpack_signed(signed);
    if node.counter < 1 {
        return Err(ChainError::BadCounter { got: node.counter });
    }
    Ok(node)
}

/// `verify_and_unpack` plus the external checks: embedded pubkey equals the
/// expected one, and when a parent is supplied, counter is parent minus one.
pub fn verify_node(
    signed: &[u8],
    expected_pubkey: &[u8; PUBKEY],
    parent_counter: Option<u64>,
) -> Result<Signed, ChainError> {
    let node = verify_and_unpack(signed)?;
    if !ct_eq(&node.pubkey, expected_pubkey) {
        return Err(ChainError::PubkeyMismatch {
            embedded: hex::encode(node.pubkey),
            expected: hex::encode(expected_pubkey),
        });
    }
    if let Some(parent) = parent_counter {
        if node.counter != parent - 1 {
            return Err(ChainError::CounterLink {
                expected: parent - 1,
                got: node.counter,
            });
        }
    }
    Ok(node)
}

/// Verify a 96-byte genesis given as its two halves. The signing form of a
/// genesis frame is the pubkey itself.
pub fn verify_genesis(signature: &[u8; SIGNATURE], pubkey: &[u8; PUBKEY]) -> Result<(), ChainError> {
    ed25519::verify(pubkey, pubkey, signature).map_err(|_| ChainError::BadSignature)
}

/// Walk previous-signature links from `tail` until a genesis frame, checking
/// parent-counter linkage at every step. Returns the number of non-genesis
/// nodes traversed.
///
/// A loader miss is surfaced as one of two distinct kinds: [`ChainError::FreshKey`]
/// when the missing tail is itself a valid genesis signature over
/// `pubkey` (the key has never signed, so its genesis was never published),
/// and [`ChainError::BrokenChain`] otherwise. Neither is auto-healed here;
/// the recovery policy belongs to the operator.
pub fn verify_chain<L>(
    tail: &[u8; SIGNATURE],
    pubkey: &[u8; PUBKEY],
    mut load: L,
) -> Result<u64, ChainError>
where
    L: FnMut(&[u8; SIGNATURE]) -> Result<Option<Vec<u8>>, std::io::Error>,
{
    let mut cursor = *tail;
    let mut parent_counter: Option<u64> = None;
    let mut nodes = 0u64;
    loop {
        let signed = match load(&cursor)? {
            Some(signed) => signed,
            None if parent_counter.is_none() && verify_genesis(&cursor, pubkey).is_ok() => {
                return Err(ChainError::FreshKey {
                    tail: b32enc(&cursor),
                })
            }
            None => {
                return Err(ChainError::BrokenChain {
                    signature: b32enc(&cursor),
                })
            }
        };
        if signed.len() == GENESIS {
            verify_genesis(&cursor_sig(&signed), pubkey)?;
            return Ok(nodes);
        }
        let node = verify_node(&signed, pubkey, parent_counter)?;
        nodes += 1;
        cursor = node.previous;
        parent_counter = Some(node.counter);
    }
}

fn cursor_sig(signed: &[u8]) -> [u8; SIGNATURE] {
    let mut out = [0u8; SIGNATURE];
    out.copy_from_slice(&signed[..SIGNATURE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{build_signing_form, Signer};
    use crate::{frame, DIGEST, REQUEST};
    use std::collections::HashMap;

    fn flipped(data: &[u8]) -> impl Iterator<Item = Vec<u8>> + '_ {
        (0..data.len() * 8).map(move |i| {
            let mut out = data.to_vec();
            out[i / 8] ^= 1 << (i % 8);
            out
        })
    }

    #[test]
    fn self_verification_and_tamper() {
        let mut signer = Signer::new();
        let genesis = signer.genesis().to_vec();
        assert!(is_valid(&genesis));
        verify_self(&genesis).unwrap();

        let signed = signer.sign(1234, &[7u8; DIGEST]).unwrap();
        assert_eq!(signed.len(), REQUEST);
        assert!(is_valid(&signed));

        for bad in flipped(&signed) {
            assert!(!is_valid(&bad));
            assert!(matches!(
                verify_self(&bad),
                Err(ChainError::BadSignature)
            ));
        }

        // Same sweep over a full response frame
        let response = signer.sign(1235, &signed).unwrap();
        assert_eq!(response.len(), crate::RESPONSE);
        assert!(is_valid(&response));
        for bad in flipped(&response) {
            assert!(!is_valid(&bad));
        }
    }

    #[test]
    fn short_input_is_shape_not_crypto() {
        for got in [0, 1, 95] {
            assert!(matches!(
                verify_self(&vec![0u8; got]),
                Err(ChainError::BadSize { got: g }) if g == got
            ));
            assert!(!is_valid(&vec![0u8; got]));
        }
        assert!(matches!(
            verify_and_unpack(&[0u8; 96]),
            Err(ChainError::BadSize { got: 96 })
        ));
    }

    #[test]
    fn unpack_fields_and_zero_counter() {
        let mut signer = Signer::new();
        let msg = [3u8; DIGEST];
        let signed = signer.sign(77, &msg).unwrap();
        let node = verify_and_unpack(&signed).unwrap();
        assert_eq!(&node.signature[..], frame::signature(&signed));
        assert_eq!(&node.pubkey[..], signer.public());
        assert_eq!(node.counter, 1);
        assert_eq!(node.timestamp, 77);
        assert_eq!(node.message, msg);

        // Hand-build a counter=0 frame with a valid signature
        let zero = signer.sign_any_counter(0, 99, &msg);
        verify_self(&zero).unwrap();
        assert!(matches!(
            verify_and_unpack(&zero),
            Err(ChainError::BadCounter { got: 0 })
        ));
    }

    #[test]
    fn embedded_pubkey_mismatch() {
        let mut signer = Signer::new();
        let signed = signer.sign(5, &[0u8; DIGEST]).unwrap();
        let mut expected = [0u8; PUBKEY];
        expected.copy_from_slice(signer.public());

        verify_node(&signed, &expected, None).unwrap();

        let other = Signer::new();
        let mut wrong = [0u8; PUBKEY];
        wrong.copy_from_slice(other.public());
        assert!(matches!(
            verify_node(&signed, &wrong, None),
            Err(ChainError::PubkeyMismatch { .. })
        ));
    }

    #[test]
    fn parent_counter_linkage() {
        let mut signer = Signer::new();
        let mut expected = [0u8; PUBKEY];
        expected.copy_from_slice(signer.public());

        let a = signer.sign(1, &[1u8; DIGEST]).unwrap();
        let b = signer.sign(2, &[2u8; DIGEST]).unwrap();
        verify_node(&a, &expected, Some(frame::counter(&b))).unwrap();
        assert!(matches!(
            verify_node(&b, &expected, Some(frame::counter(&b))),
            Err(ChainError::CounterLink {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn genesis_form_is_the_pubkey() {
        let signer = Signer::new();
        let genesis = signer.genesis();
        let mut sig = [0u8; SIGNATURE];
        sig.copy_from_slice(frame::signature(genesis));
        let mut pk = [0u8; PUBKEY];
        pk.copy_from_slice(signer.public());
        verify_genesis(&sig, &pk).unwrap();

        let other = Signer::new();
        let mut wrong = [0u8; PUBKEY];
        wrong.copy_from_slice(other.public());
        assert!(verify_genesis(&sig, &wrong).is_err());
    }

    struct MapStore(HashMap<[u8; SIGNATURE], Vec<u8>>);

    impl MapStore {
        fn insert(&mut self, signed: &[u8]) {
            self.0.insert(cursor_sig(signed), signed.to_vec());
        }

        fn loader(
            &self,
        ) -> impl FnMut(&[u8; SIGNATURE]) -> Result<Option<Vec<u8>>, std::io::Error> + '_ {
            move |sig| Ok(self.0.get(sig).cloned())
        }
    }

    fn build_chain(n: u64) -> (Signer, MapStore, [u8; SIGNATURE]) {
        let mut signer = Signer::new();
        let mut store = MapStore(HashMap::new());
        store.insert(signer.genesis());
        let mut tail = cursor_sig(signer.genesis());
        for i in 0..n {
            let signed = signer.sign(1000 + i, &[i as u8; DIGEST]).unwrap();
            tail = cursor_sig(&signed);
            store.insert(&signed);
        }
        (signer, store, tail)
    }

    #[test]
    fn chain_walk_counts_nodes() {
        for n in [0u64, 1, 2, 9] {
            let (signer, store, tail) = build_chain(n);
            let mut pk = [0u8; PUBKEY];
            pk.copy_from_slice(signer.public());
            assert_eq!(verify_chain(&tail, &pk, store.loader()).unwrap(), n);
        }
    }

    #[test]
    fn chain_walk_fresh_key_vs_broken() {
        // Unused key: tail is the genesis signature, nothing stored yet
        let signer = Signer::new();
        let tail = cursor_sig(signer.genesis());
        let mut pk = [0u8; PUBKEY];
        pk.copy_from_slice(signer.public());
        let empty = MapStore(HashMap::new());
        assert!(matches!(
            verify_chain(&tail, &pk, empty.loader()),
            Err(ChainError::FreshKey { .. })
        ));

        // A hole mid-chain is a break, not a fresh key
        let (signer, mut store, tail) = build_chain(4);
        let mut pk = [0u8; PUBKEY];
        pk.copy_from_slice(signer.public());
        let victim = store
            .0
            .values()
            .find(|signed| signed.len() == REQUEST && frame::counter(signed) == 2)
            .unwrap()
            .clone();
        store.0.remove(&cursor_sig(&victim));
        assert!(matches!(
            verify_chain(&tail, &pk, store.loader()),
            Err(ChainError::BrokenChain { .. })
        ));

        // Missing tail that is not an implied genesis is also a break
        let missing = [0x5au8; SIGNATURE];
        assert!(matches!(
            verify_chain(&missing, &pk, store.loader()),
            Err(ChainError::BrokenChain { .. })
        ));
    }

    #[test]
    fn chain_walk_rejects_foreign_pubkey() {
        let (_, store, tail) = build_chain(3);
        let other = Signer::new();
        let mut pk = [0u8; PUBKEY];
        pk.copy_from_slice(other.public());
        assert!(matches!(
            verify_chain(&tail, &pk, store.loader()),
            Err(ChainError::PubkeyMismatch { .. })
        ));
    }

    #[test]
    fn signing_form_layout() {
        let public = [1u8; PUBKEY];
        let previous = [2u8; SIGNATURE];
        let msg = [3u8; DIGEST];
        let form = build_signing_form(&public, &previous, 0, 0, &msg);
        let mut expected = Vec::new();
        expected.extend_from_slice(&public);
        expected.extend_from_slice(&previous);
        expected.extend_from_slice(&[0u8; 16]);
        expected.extend_from_slice(&msg);
        assert_eq!(form, expected);

        let form = build_signing_form(&public, &previous, 0x0102030405060708, 0x1112131415161718, &[]);
        assert_eq!(&form[96..104], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&form[104..112], &0x1112131415161718u64.to_le_bytes());
        assert_eq!(form.len(), 112);
    }
}
