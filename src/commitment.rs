//! Commitments: on-chain transactions both parties co-sign off-chain.
//!
//! Building a commitment is a pure function of channel and app data plus the
//! [NetworkContext][crate::config::NetworkContext], so both sides compute the
//! same hash-to-sign independently and only exchange signatures.

mod cache;
mod multisig;
mod set_state;

use serde::{Deserialize, Serialize};

use crate::{
    channel::{PartID, PARTICIPANTS},
    error::SignatureError,
    sig::{self, Signer},
    Address, Hash, Signature, U256,
};

pub use cache::StateHashCache;
pub use multisig::{
    ConditionalTransactionCommitment, MultisigCommitment, MultisigOperation, SetupCommitment,
};
pub use set_state::SetStateCommitment;

/// Signatures in participant order.
pub type Signatures = [Option<Signature>; PARTICIPANTS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentKind {
    Setup,
    Conditional,
    SetState,
}

/// Key commitments are stored under. Setup and conditional commitments use
/// version 0 of the app they are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentKey {
    pub kind: CommitmentKind,
    pub identity_hash: Hash,
    pub version: u64,
}

/// Transaction ready to be sent to the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimalTransaction {
    pub to: Address,
    pub value: U256,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
}

/// A fully signed commitment as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCommitment {
    pub key: CommitmentKey,
    pub hash_to_sign: Hash,
    pub signatures: [Signature; PARTICIPANTS],
}

impl StoredCommitment {
    /// Check that this commitment is the one we expect (same hash-to-sign)
    /// and carries a valid signature of every participant, in order.
    pub fn verify(&self, expected_hash: Hash, participants: [Address; PARTICIPANTS]) -> Result<(), SignatureError> {
        if self.hash_to_sign != expected_hash {
            return Err(SignatureError::Recovery(format!(
                "commitment {:?} signs {}, expected {}",
                self.key, self.hash_to_sign, expected_hash
            )));
        }
        for (sig, expected) in self.signatures.iter().zip(participants) {
            sig::verify(self.hash_to_sign, *sig, expected)?;
        }
        Ok(())
    }

    /// Signature of `signer` on this commitment.
    pub fn signature_of(&self, signer: Address, participants: [Address; PARTICIPANTS]) -> Option<Signature> {
        participants
            .iter()
            .position(|p| *p == signer)
            .map(|i| self.signatures[i])
    }

    /// The signature that recovers to `signer`, if any.
    pub fn signed_by(&self, signer: Address) -> Option<Signature> {
        self.signatures
            .iter()
            .copied()
            .find(|s| sig::verify(self.hash_to_sign, *s, signer).is_ok())
    }
}

/// Shared behaviour of all commitments: a deterministic hash-to-sign and one
/// signature slot per participant.
pub trait Commitment {
    fn key(&self) -> CommitmentKey;
    fn hash_to_sign(&self) -> Hash;
    fn participants(&self) -> [Address; PARTICIPANTS];
    fn signatures(&self) -> &Signatures;
    fn signatures_mut(&mut self) -> &mut Signatures;

    /// Add our own signature.
    fn sign(&mut self, signer: &Signer) -> Result<Signature, SignatureError> {
        let part_id = self
            .participants()
            .iter()
            .position(|p| *p == signer.address())
            .ok_or(SignatureError::InvalidSignature {
                recovered: signer.address(),
            })?;
        if self.signatures()[part_id].is_some() {
            return Err(SignatureError::AlreadySigned(part_id));
        }
        let sig = signer.sign_eth(self.hash_to_sign())?;
        self.signatures_mut()[part_id] = Some(sig);
        Ok(sig)
    }

    /// Add a received signature, checking it belongs to a participant.
    ///
    /// Adding the same signature twice is fine, a different one for the same
    /// participant is not.
    fn add_signature(&mut self, sig: Signature) -> Result<PartID, SignatureError> {
        let signer = sig::recover_signer(self.hash_to_sign(), sig)?;

        // Verify signature is coming from a valid participant.
        let part_id = self
            .participants()
            .iter()
            .position(|p| *p == signer)
            .ok_or(SignatureError::InvalidSignature { recovered: signer })?;

        match self.signatures()[part_id] {
            Some(existing) if existing != sig => Err(SignatureError::AlreadySigned(part_id)),
            _ => {
                self.signatures_mut()[part_id] = Some(sig);
                Ok(part_id)
            }
        }
    }

    /// Add a received signature that must come from `expected`.
    fn add_signature_from(&mut self, sig: Signature, expected: Address) -> Result<(), SignatureError> {
        let recovered = sig::recover_signer(self.hash_to_sign(), sig)?;
        if recovered != expected {
            return Err(SignatureError::SignerMismatch {
                expected,
                recovered,
            });
        }
        self.add_signature(sig).map(|_| ())
    }

    fn is_fully_signed(&self) -> bool {
        self.signatures().iter().all(Option::is_some)
    }

    fn to_stored(&self) -> Result<StoredCommitment, SignatureError> {
        // Make sure we have the signature from all participants. They have
        // already been verified when they were added.
        let mut signatures = [Signature::default(); PARTICIPANTS];
        for (part_id, s) in self.signatures().iter().enumerate() {
            signatures[part_id] = s.ok_or(SignatureError::MissingSignature(part_id))?;
        }
        Ok(StoredCommitment {
            key: self.key(),
            hash_to_sign: self.hash_to_sign(),
            signatures,
        })
    }
}
