use super::{
    cache::StateHashCache, Commitment, CommitmentKey, CommitmentKind, MinimalTransaction,
    Signatures,
};
use crate::{
    abiencode::{encode_call, keccak256_packed, AbiEncode, Packed, Token},
    channel::{AppIdentity, AppInstance, AppInstanceProposal, PARTICIPANTS},
    config::NetworkContext,
    error::SignatureError,
    Address, Hash, U256,
};

const SET_STATE: &str =
    "setState((address,uint256,address[],address,uint256),(bytes32,uint256,uint256,bytes[]))";

/// Commits to a specific state of an app at a specific version. Submitted to
/// the challenge registry in a dispute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStateCommitment {
    identity: AppIdentity,
    identity_hash: Hash,
    app_state_hash: Hash,
    version: u64,
    state_timeout: u64,
    signatures: Signatures,
}

impl SetStateCommitment {
    pub fn new(identity: AppIdentity, app_state_hash: Hash, version: u64, state_timeout: u64) -> Self {
        Self {
            identity_hash: identity.identity_hash(),
            identity,
            app_state_hash,
            version,
            state_timeout,
            signatures: [None; PARTICIPANTS],
        }
    }

    /// Commitment to the latest state of `app`.
    pub fn for_app(app: &AppInstance, cache: &StateHashCache) -> Self {
        let state_hash = cache.state_hash(app.identity_hash(), app.latest_version(), app.latest_state());
        Self::new(
            app.identity().clone(),
            state_hash,
            app.latest_version(),
            app.state_timeout(),
        )
    }

    /// Commitment to the initial state (version 0) of a proposed app.
    pub fn for_proposal(proposal: &AppInstanceProposal, cache: &StateHashCache) -> Self {
        let state_hash = cache.state_hash(proposal.identity_hash, 0, &proposal.initial_state);
        Self::new(proposal.identity.clone(), state_hash, 0, proposal.state_timeout)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn identity_hash(&self) -> Hash {
        self.identity_hash
    }

    pub fn app_state_hash(&self) -> Hash {
        self.app_state_hash
    }

    /// `setState` call on the challenge registry. Needs both signatures.
    pub fn signed_transaction(&self, network: &NetworkContext) -> Result<MinimalTransaction, SignatureError> {
        let stored = self.to_stored()?;
        let signatures = stored
            .signatures
            .iter()
            .map(|s| Token::Bytes(s.0.to_vec()))
            .collect();
        let data = encode_call(
            SET_STATE,
            &[
                self.identity.to_token(),
                Token::Tuple(vec![
                    Token::hash(self.app_state_hash),
                    Token::uint(self.version),
                    Token::uint(self.state_timeout),
                    Token::Array(signatures),
                ]),
            ],
        );
        Ok(MinimalTransaction {
            to: network.challenge_registry,
            value: U256::zero(),
            data,
        })
    }
}

impl Commitment for SetStateCommitment {
    fn key(&self) -> CommitmentKey {
        CommitmentKey {
            kind: CommitmentKind::SetState,
            identity_hash: self.identity_hash,
            version: self.version,
        }
    }

    fn hash_to_sign(&self) -> Hash {
        keccak256_packed(&[
            Packed::Uint8(1),
            Packed::Bytes32(self.identity_hash),
            Packed::Bytes32(self.app_state_hash),
            Packed::Uint256(self.version.into()),
            Packed::Uint256(self.state_timeout.into()),
        ])
    }

    fn participants(&self) -> [Address; PARTICIPANTS] {
        self.identity.participants
    }

    fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    fn signatures_mut(&mut self) -> &mut Signatures {
        &mut self.signatures
    }
}
