//! Deposit app: credits the depositor with whatever arrived in the multisig
//! while the app was installed.

use serde::{Deserialize, Serialize};

use super::{ChainSnapshot, ProposalContext};
use crate::{
    abiencode::{AbiEncode, Token},
    channel::{CoinTransfer, Outcome},
    error::ValidationError,
    Address, U256,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositState {
    /// `[depositor, counterparty]`, both amounts zero.
    pub transfers: [CoinTransfer; 2],
    pub multisig_address: Address,
    pub asset_id: Address,
    pub starting_total_amount_withdrawn: U256,
    pub starting_multisig_balance: U256,
}

impl DepositState {
    pub fn new(
        depositor: Address,
        counterparty: Address,
        multisig_address: Address,
        asset_id: Address,
        start: ChainSnapshot,
    ) -> Self {
        Self {
            transfers: [
                CoinTransfer::new(depositor, U256::zero()),
                CoinTransfer::new(counterparty, U256::zero()),
            ],
            multisig_address,
            asset_id,
            starting_total_amount_withdrawn: start.total_amount_withdrawn,
            starting_multisig_balance: start.multisig_balance,
        }
    }

    pub fn depositor(&self) -> Address {
        self.transfers[0].to
    }

    /// Everything that entered the multisig since the app was proposed.
    /// Withdrawals that happened in between are added back, they do not
    /// reduce the deposit.
    pub(super) fn outcome(&self, now: ChainSnapshot) -> Outcome {
        let end = now
            .multisig_balance
            .saturating_add(now.total_amount_withdrawn);
        let start = self
            .starting_multisig_balance
            .saturating_add(self.starting_total_amount_withdrawn);
        Outcome::CoinTransfers(vec![
            CoinTransfer::new(self.transfers[0].to, end.saturating_sub(start)),
            CoinTransfer::new(self.transfers[1].to, U256::zero()),
        ])
    }

    pub(super) fn validate_initial(&self, ctx: &ProposalContext) -> Result<(), ValidationError> {
        let deposits = &ctx.proposal.deposits;
        let fail = |msg: &str| Err(ValidationError::App(format!("invalid deposit app: {}", msg)));

        if self.transfers[0].to != deposits.initiator || self.transfers[1].to != deposits.responder
        {
            return fail("transfers must go to the participants");
        }
        if !self.transfers.iter().all(|t| t.amount.is_zero()) {
            return fail("initial transfers must be zero");
        }
        if !deposits.initiator_deposit.is_zero() || !deposits.responder_deposit.is_zero() {
            return fail("deposit apps are installed without deposits");
        }
        if self.multisig_address != ctx.multisig_address {
            return fail("multisig does not match the channel");
        }
        if self.asset_id != deposits.initiator_deposit_asset_id {
            return fail("asset does not match the proposal");
        }
        let chain = match ctx.chain {
            Some(chain) => chain,
            None => return fail("on-chain balance unknown"),
        };
        if chain.multisig_balance != self.starting_multisig_balance {
            return fail("starting multisig balance does not match the chain");
        }
        if chain.total_amount_withdrawn != self.starting_total_amount_withdrawn {
            return fail("starting withdrawn amount does not match the chain");
        }
        Ok(())
    }
}

impl AbiEncode for DepositState {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedArray(self.transfers.iter().map(AbiEncode::to_token).collect()),
            Token::Address(self.multisig_address),
            Token::Address(self.asset_id),
            Token::Uint(self.starting_total_amount_withdrawn),
            Token::Uint(self.starting_multisig_balance),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address([1; 20]);
    const B: Address = Address([2; 20]);
    const MULTISIG: Address = Address([0xaa; 20]);

    fn snapshot(balance: u64, withdrawn: u64) -> ChainSnapshot {
        ChainSnapshot {
            multisig_balance: balance.into(),
            total_amount_withdrawn: withdrawn.into(),
        }
    }

    #[test]
    fn depositor_gets_the_balance_delta() {
        let state = DepositState::new(A, B, MULTISIG, Address::zero(), snapshot(5, 1));
        assert_eq!(
            state.outcome(snapshot(8, 1)),
            Outcome::CoinTransfers(vec![CoinTransfer::new(A, 3u64), CoinTransfer::new(B, 0u64)])
        );
    }

    #[test]
    fn withdrawals_during_the_deposit_do_not_count_against_it() {
        let state = DepositState::new(A, B, MULTISIG, Address::zero(), snapshot(5, 0));
        // 2 deposited, 4 withdrawn by someone else in the meantime
        assert_eq!(
            state.outcome(snapshot(3, 4)),
            Outcome::CoinTransfers(vec![CoinTransfer::new(A, 2u64), CoinTransfer::new(B, 0u64)])
        );
    }

    #[test]
    fn balance_drop_pays_nothing() {
        let state = DepositState::new(A, B, MULTISIG, Address::zero(), snapshot(5, 0));
        assert_eq!(
            state.outcome(snapshot(1, 0)),
            Outcome::CoinTransfers(vec![CoinTransfer::new(A, 0u64), CoinTransfer::new(B, 0u64)])
        );
    }
}
