//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::{
    abiencode::types::{Address, Hash, Signature},
    error::SignatureError,
};
use core::fmt::Debug;
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use super::{hash_to_eth_signed_msg_hash, PublicIdentifier};

#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
    identifier: PublicIdentifier,
}

// Never print the private key.
impl Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<&VerifyingKey> for Address {
    fn from(key: &VerifyingKey) -> Self {
        // The uncompressed SEC1 encoding is always 65 bytes: a 0x04 tag
        // followed by x and y. The address is derived from x || y only.
        let point = key.to_encoded_point(false);
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::from_key(SigningKey::random(rng))
    }

    /// Import a raw 32 byte secp256k1 private key.
    pub fn from_private_key(bytes: &[u8]) -> Result<Self, SignatureError> {
        let key = SigningKey::from_bytes(bytes)
            .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let verifying_key = key.verifying_key();
        let addr = Address::from(&verifying_key);
        let identifier = PublicIdentifier::from(&verifying_key);
        Self {
            key,
            addr,
            identifier,
        }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn public_identifier(&self) -> PublicIdentifier {
        self.identifier
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, SignatureError> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self
            .key
            .sign_prehash(&hash.0)
            .map_err(|e| SignatureError::Recovery(e.to_string()))?;

        // This Signature type already has the format we need: 65 bytes
        // containing r, s and v in this order. We still have to add 27 to v
        // for the signature to be valid in the EVM.
        let mut sig = Signature::from_slice(sig.as_bytes())
            .map_err(|e| SignatureError::Recovery(e.to_string()))?;
        debug_assert!(sig.0[32] & 0x80 == 0);
        sig.0[64] += 27;

        Ok(sig)
    }
}

/// Recover the address that produced `eth_sig` over `msg` with
/// [Signer::sign_eth].
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, SignatureError> {
    // "\x19Ethereum Signed Message:\n32" format
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64]
        .checked_sub(27)
        .ok_or_else(|| SignatureError::Recovery(format!("invalid v: {}", eth_sig.0[64])))?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)
        .map_err(|e| SignatureError::Recovery(e.to_string()))?;

    let verifying_key = sig
        .recover_verifying_key_from_digest_bytes(&hash.0.into())
        .map_err(|e| SignatureError::Recovery(e.to_string()))?;
    Ok(Address::from(&verifying_key))
}
