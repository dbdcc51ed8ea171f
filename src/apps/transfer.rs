//! One-way payment app: the sender moves funds to the receiver until either
//! side ends the channel.

use serde::{Deserialize, Serialize};

use super::{AppAction, ProposalContext};
use crate::{
    abiencode::{AbiEncode, Token},
    channel::{CoinTransfer, Outcome},
    error::ValidationError,
    Address,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    /// `[sender, receiver]`
    pub transfers: [CoinTransfer; 2],
    pub finalized: bool,
}

impl TransferState {
    pub fn new(sender: CoinTransfer, receiver: CoinTransfer) -> Self {
        Self {
            transfers: [sender, receiver],
            finalized: false,
        }
    }

    pub(super) fn apply(&self, action: &AppAction, actor: Address) -> Result<Self, ValidationError> {
        if self.finalized {
            return Err(ValidationError::InvalidAction("transfer already ended".into()));
        }
        let [sender, receiver] = self.transfers;
        match action {
            AppAction::SendMoney { amount } => {
                if actor != sender.to {
                    return Err(ValidationError::InvalidAction(
                        "only the sender can send money".into(),
                    ));
                }
                if *amount > sender.amount {
                    return Err(ValidationError::InvalidAction(format!(
                        "cannot send {}, sender has {}",
                        amount, sender.amount
                    )));
                }
                Ok(Self {
                    transfers: [
                        CoinTransfer::new(sender.to, sender.amount - *amount),
                        CoinTransfer::new(receiver.to, receiver.amount + *amount),
                    ],
                    finalized: false,
                })
            }
            AppAction::EndChannel => {
                if actor != sender.to && actor != receiver.to {
                    return Err(ValidationError::InvalidAction(
                        "only a participant can end the transfer".into(),
                    ));
                }
                Ok(Self {
                    finalized: true,
                    ..self.clone()
                })
            }
            other => Err(ValidationError::InvalidAction(format!(
                "{:?} is not a transfer action",
                other
            ))),
        }
    }

    pub(super) fn outcome(&self) -> Outcome {
        Outcome::CoinTransfers(self.transfers.to_vec())
    }

    pub(super) fn validate_initial(&self, ctx: &ProposalContext) -> Result<(), ValidationError> {
        let deposits = &ctx.proposal.deposits;
        let [sender, receiver] = self.transfers;
        if self.finalized {
            return Err(ValidationError::App("transfer must not start finalized".into()));
        }
        if sender.to != deposits.initiator || receiver.to != deposits.responder {
            return Err(ValidationError::App(
                "transfer must go from the initiator to the responder".into(),
            ));
        }
        if sender.amount != deposits.initiator_deposit
            || receiver.amount != deposits.responder_deposit
        {
            return Err(ValidationError::App(
                "initial transfers must equal the deposits".into(),
            ));
        }
        Ok(())
    }
}

impl AbiEncode for TransferState {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedArray(self.transfers.iter().map(AbiEncode::to_token).collect()),
            Token::Bool(self.finalized),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::U256;

    const A: Address = Address([1; 20]);
    const B: Address = Address([2; 20]);

    fn state() -> TransferState {
        TransferState::new(CoinTransfer::new(A, 10u64), CoinTransfer::new(B, 0u64))
    }

    #[test]
    fn sender_moves_money_to_receiver() {
        let next = state()
            .apply(&AppAction::SendMoney { amount: U256::from(4u64) }, A)
            .unwrap();
        assert_eq!(next.transfers[0].amount, U256::from(6u64));
        assert_eq!(next.transfers[1].amount, U256::from(4u64));
        assert_eq!(
            next.outcome(),
            Outcome::CoinTransfers(vec![CoinTransfer::new(A, 6u64), CoinTransfer::new(B, 4u64)])
        );
    }

    #[test]
    fn receiver_cannot_send_and_sender_cannot_overdraw() {
        assert!(state()
            .apply(&AppAction::SendMoney { amount: U256::one() }, B)
            .is_err());
        assert!(state()
            .apply(&AppAction::SendMoney { amount: U256::from(11u64) }, A)
            .is_err());
    }

    #[test]
    fn ended_transfer_takes_no_more_actions() {
        let ended = state().apply(&AppAction::EndChannel, B).unwrap();
        assert!(ended.finalized);
        assert!(ended
            .apply(&AppAction::SendMoney { amount: U256::one() }, A)
            .is_err());
    }
}
