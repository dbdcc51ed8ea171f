//! Handles the creation and verification of (Ethereum) Signatures.

use crate::{
    abiencode::types::{Address, Hash, Signature},
    error::SignatureError,
};
use sha3::{Digest, Keccak256};

mod identifier;
mod k256;

pub use self::identifier::PublicIdentifier;
pub use self::k256::{recover_signer, Signer};

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the ABI encoder
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

/// Check that `sig` over `hash` was produced by the key behind `expected`.
pub fn verify(hash: Hash, sig: Signature, expected: Address) -> Result<(), SignatureError> {
    let recovered = recover_signer(hash, sig)?;
    if recovered != expected {
        return Err(SignatureError::SignerMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}
