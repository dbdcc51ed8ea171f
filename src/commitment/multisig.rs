use serde::{Deserialize, Serialize};

use super::{Commitment, CommitmentKey, CommitmentKind, MinimalTransaction, Signatures};
use crate::{
    abiencode::{encode_call, keccak256, keccak256_packed, AbiEncode, Packed, Token},
    channel::{AppInstance, StateChannel, PARTICIPANTS},
    config::NetworkContext,
    error::SignatureError,
    Address, Hash, U256,
};

const EXEC_TRANSACTION: &str = "execTransaction(address,uint256,bytes,uint8,bytes[])";
const EXECUTE_EFFECT_OF_FREE_BALANCE: &str = "executeEffectOfFreeBalance(address,bytes32,address)";
const EXECUTE_EFFECT_OF_INTERPRETED_APP_OUTCOME: &str =
    "executeEffectOfInterpretedAppOutcome(address,bytes32,bytes32,address,bytes)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MultisigOperation {
    Call = 0,
    DelegateCall = 1,
}

/// A transaction executed by the multisig, authorized by both owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigCommitment {
    key: CommitmentKey,
    multisig_address: Address,
    participants: [Address; PARTICIPANTS],
    to: Address,
    value: U256,
    data: Vec<u8>,
    operation: MultisigOperation,
    signatures: Signatures,
}

/// Pays out the free balance: commits the multisig to the channel as a whole.
pub type SetupCommitment = MultisigCommitment;

/// Pays out one installed app according to its interpreter.
pub type ConditionalTransactionCommitment = MultisigCommitment;

impl MultisigCommitment {
    fn delegate_call(key: CommitmentKey, network: &NetworkContext, channel: &StateChannel, data: Vec<u8>) -> Self {
        Self {
            key,
            multisig_address: channel.multisig_address(),
            participants: channel.participants(),
            to: network.conditional_transaction_delegate_target,
            value: U256::zero(),
            data,
            operation: MultisigOperation::DelegateCall,
            signatures: [None; PARTICIPANTS],
        }
    }

    pub fn setup(network: &NetworkContext, channel: &StateChannel) -> SetupCommitment {
        let fb_hash = channel.free_balance().identity_hash();
        let data = encode_call(
            EXECUTE_EFFECT_OF_FREE_BALANCE,
            &[
                Token::Address(network.challenge_registry),
                Token::hash(fb_hash),
                Token::Address(network.multi_asset_multi_party_coin_transfer_interpreter),
            ],
        );
        let key = CommitmentKey {
            kind: CommitmentKind::Setup,
            identity_hash: fb_hash,
            version: 0,
        };
        Self::delegate_call(key, network, channel, data)
    }

    pub fn conditional(
        network: &NetworkContext,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> ConditionalTransactionCommitment {
        let params = app.interpreter_params();
        let data = encode_call(
            EXECUTE_EFFECT_OF_INTERPRETED_APP_OUTCOME,
            &[
                Token::Address(network.challenge_registry),
                Token::hash(channel.free_balance().identity_hash()),
                Token::hash(app.identity_hash()),
                Token::Address(params.interpreter_address(network)),
                Token::Bytes(params.abi_encode()),
            ],
        );
        let key = CommitmentKey {
            kind: CommitmentKind::Conditional,
            identity_hash: app.identity_hash(),
            version: 0,
        };
        Self::delegate_call(key, network, channel, data)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn operation(&self) -> MultisigOperation {
        self.operation
    }

    /// `execTransaction` on the multisig. The contract expects the
    /// signatures sorted by signer address.
    pub fn signed_transaction(&self) -> Result<MinimalTransaction, SignatureError> {
        let stored = self.to_stored()?;
        let mut signed: Vec<_> = self.participants.iter().zip(stored.signatures).collect();
        signed.sort_by_key(|(addr, _)| **addr);
        let signatures = signed
            .into_iter()
            .map(|(_, s)| Token::Bytes(s.0.to_vec()))
            .collect();

        let data = encode_call(
            EXEC_TRANSACTION,
            &[
                Token::Address(self.to),
                Token::Uint(self.value),
                Token::Bytes(self.data.clone()),
                Token::uint(self.operation as u64),
                Token::Array(signatures),
            ],
        );
        Ok(MinimalTransaction {
            to: self.multisig_address,
            value: U256::zero(),
            data,
        })
    }
}

impl Commitment for MultisigCommitment {
    fn key(&self) -> CommitmentKey {
        self.key
    }

    fn hash_to_sign(&self) -> Hash {
        keccak256_packed(&[
            Packed::Uint8(0),
            Packed::Address(self.multisig_address),
            Packed::Address(self.to),
            Packed::Uint256(self.value),
            Packed::Bytes32(keccak256(&self.data)),
            Packed::Uint8(self.operation as u8),
        ])
    }

    fn participants(&self) -> [Address; PARTICIPANTS] {
        self.participants
    }

    fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    fn signatures_mut(&mut self) -> &mut Signatures {
        &mut self.signatures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abiencode::selector,
        channel::tests::{proposal, two_signers},
    };

    fn network() -> NetworkContext {
        NetworkContext {
            challenge_registry: Address([1; 20]),
            conditional_transaction_delegate_target: Address([2; 20]),
            identity_app: Address([3; 20]),
            multi_asset_multi_party_coin_transfer_interpreter: Address([4; 20]),
            single_asset_two_party_coin_transfer_interpreter: Address([5; 20]),
            two_party_fixed_outcome_interpreter: Address([6; 20]),
            proxy_factory: Address([7; 20]),
            minimum_viable_multisig: Address([8; 20]),
        }
    }

    fn channel() -> StateChannel {
        let ids = two_signers().map(|s| s.public_identifier());
        StateChannel::setup(Address([0xaa; 20]), ids, network().identity_app)
    }

    #[test]
    fn setup_targets_the_delegate() {
        let c = MultisigCommitment::setup(&network(), &channel());
        assert_eq!(c.to, Address([2; 20]));
        assert_eq!(c.operation(), MultisigOperation::DelegateCall);
        assert_eq!(&c.data()[..4], &selector(EXECUTE_EFFECT_OF_FREE_BALANCE));
        assert_eq!(c.key().kind, CommitmentKind::Setup);
    }

    #[test]
    fn conditional_commits_to_the_interpreter() {
        let ch = channel();
        let app = proposal(&ch, 1, 1).to_app_instance();
        let c = MultisigCommitment::conditional(&network(), &ch, &app);

        // (address registry, bytes32 fb, bytes32 app, address interpreter, bytes params)
        let args = &c.data()[4..];
        assert_eq!(&args[32 + 12..64], &[1u8; 20]);
        assert_eq!(&args[64..96], &ch.free_balance().identity_hash().0);
        assert_eq!(&args[96..128], &app.identity_hash().0);
        assert_eq!(&args[128 + 12..160], &[5u8; 20]);
        assert_ne!(c.hash_to_sign(), MultisigCommitment::setup(&network(), &ch).hash_to_sign());
    }

    #[test]
    fn signed_transaction_sorts_signatures_by_signer() {
        let signers = two_signers();
        let mut c = MultisigCommitment::setup(&network(), &channel());
        let mut theirs = c.clone();
        c.sign(&signers[0]).unwrap();
        let sig = theirs.sign(&signers[1]).unwrap();
        c.add_signature(sig).unwrap();

        let tx = c.signed_transaction().unwrap();
        assert_eq!(tx.to, Address([0xaa; 20]));
        assert_eq!(&tx.data[..4], &selector(EXEC_TRANSACTION));

        let mut sorted = signers.iter().map(|s| (s.address(), s.sign_eth(c.hash_to_sign()).unwrap())).collect::<Vec<_>>();
        sorted.sort_by_key(|(a, _)| *a);
        let first = &sorted[0].1 .0;
        // the first signature's 65 bytes appear before the second one's
        let pos = |needle: &[u8]| tx.data.windows(65).position(|w| w == needle).unwrap();
        assert!(pos(first) < pos(&sorted[1].1 .0));
    }
}
