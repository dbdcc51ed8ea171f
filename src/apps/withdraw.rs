//! Withdraw app: the initiator locks funds it wants to take out of the
//! channel, the responder finalizes by counter-signing the withdrawal data.

use serde::{Deserialize, Serialize};

use super::{AppAction, ProposalContext};
use crate::{
    abiencode::{AbiEncode, Token},
    channel::{CoinTransfer, Outcome},
    error::ValidationError,
    sig, Address, Hash, Signature, U256,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawState {
    /// `[withdrawer, counterparty]`
    pub transfers: [CoinTransfer; 2],
    pub signatures: [Signature; 2],
    pub signers: [Address; 2],
    /// Hash of the on-chain withdrawal both sides sign.
    pub data: Hash,
    pub nonce: Hash,
    pub finalized: bool,
}

impl WithdrawState {
    pub(super) fn apply(&self, action: &AppAction, actor: Address) -> Result<Self, ValidationError> {
        let signature = match action {
            AppAction::Withdraw { signature } => *signature,
            other => {
                return Err(ValidationError::InvalidAction(format!(
                    "{:?} is not a withdraw action",
                    other
                )))
            }
        };
        if self.finalized {
            return Err(ValidationError::InvalidAction("withdrawal already finalized".into()));
        }
        if actor != self.signers[1] {
            return Err(ValidationError::InvalidAction(
                "only the counterparty finalizes a withdrawal".into(),
            ));
        }
        sig::verify(self.data, signature, self.signers[1])
            .map_err(|e| ValidationError::InvalidAction(e.to_string()))?;

        let mut next = self.clone();
        next.signatures[1] = signature;
        next.finalized = true;
        Ok(next)
    }

    /// A finalized withdrawal leaves the channel, otherwise the withdrawer is
    /// refunded.
    pub(super) fn outcome(&self) -> Outcome {
        let [withdrawer, counterparty] = self.transfers;
        if self.finalized {
            Outcome::CoinTransfers(vec![
                CoinTransfer::new(withdrawer.to, U256::zero()),
                counterparty,
            ])
        } else {
            Outcome::CoinTransfers(self.transfers.to_vec())
        }
    }

    pub(super) fn validate_initial(&self, ctx: &ProposalContext) -> Result<(), ValidationError> {
        let deposits = &ctx.proposal.deposits;
        let fail = |msg: &str| Err(ValidationError::App(format!("invalid withdraw app: {}", msg)));

        if self.finalized {
            return fail("must not start finalized");
        }
        if !self.signatures[1].is_zero() {
            return fail("counterparty signature must be empty");
        }
        if self.signers != [deposits.initiator, deposits.responder] {
            return fail("signers must be the participants");
        }
        if self.transfers[0].to != deposits.initiator
            || self.transfers[0].amount != deposits.initiator_deposit
        {
            return fail("withdrawer transfer must equal its deposit");
        }
        if !self.transfers[1].amount.is_zero() {
            return fail("counterparty transfer must be zero");
        }
        if sig::verify(self.data, self.signatures[0], self.signers[0]).is_err() {
            return fail("withdrawer signature does not match");
        }
        Ok(())
    }
}

impl AbiEncode for WithdrawState {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedArray(self.transfers.iter().map(AbiEncode::to_token).collect()),
            Token::FixedArray(
                self.signatures
                    .iter()
                    .map(|s| Token::Bytes(s.0.to_vec()))
                    .collect(),
            ),
            Token::FixedArray(self.signers.iter().map(AbiEncode::to_token).collect()),
            Token::hash(self.data),
            Token::hash(self.nonce),
            Token::Bool(self.finalized),
        ])
    }
}
