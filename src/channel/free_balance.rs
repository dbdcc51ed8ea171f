use serde::{Deserialize, Serialize};

use super::{outcome::CoinTransfer, TokenIndexedBalances};
use crate::{
    abiencode::{AbiEncode, Token},
    error::ValidationError,
    Address, Hash, U256,
};

/// State of the free balance app: what each participant can claim per token
/// and which apps are currently funded out of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBalanceState {
    active_apps: Vec<Hash>,
    balances: TokenIndexedBalances,
}

impl FreeBalanceState {
    /// Empty free balance: no active apps, zero ETH for both participants.
    pub fn new(participants: [Address; 2]) -> Self {
        let eth = participants.iter().map(|p| (*p, U256::zero())).collect();
        Self {
            active_apps: Vec::new(),
            balances: [(Address::zero(), eth)].into_iter().collect(),
        }
    }

    pub fn active_apps(&self) -> &[Hash] {
        &self.active_apps
    }

    pub fn is_active(&self, identity_hash: &Hash) -> bool {
        self.active_apps.contains(identity_hash)
    }

    pub fn balances(&self) -> &TokenIndexedBalances {
        &self.balances
    }

    pub fn balance(&self, token: &Address, owner: &Address) -> U256 {
        self.balances
            .get(token)
            .and_then(|b| b.get(owner))
            .copied()
            .unwrap_or_default()
    }

    pub fn credit(&mut self, token: Address, owner: Address, amount: U256) -> Result<(), ValidationError> {
        let entry = self.balances.entry(token).or_default().entry(owner).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| ValidationError::App("free balance overflow".into()))?;
        Ok(())
    }

    pub fn debit(&mut self, token: Address, owner: Address, amount: U256) -> Result<(), ValidationError> {
        let available = self.balance(&token, &owner);
        if available < amount {
            return Err(ValidationError::InsufficientFreeBalance {
                owner,
                token,
                available,
                required: amount,
            });
        }
        self.balances
            .entry(token)
            .or_default()
            .insert(owner, available - amount);
        Ok(())
    }

    pub fn apply_increments(&mut self, increments: &TokenIndexedBalances) -> Result<(), ValidationError> {
        for (token, per_owner) in increments {
            for (owner, amount) in per_owner {
                self.credit(*token, *owner, *amount)?;
            }
        }
        Ok(())
    }

    pub(crate) fn activate(&mut self, identity_hash: Hash) {
        if !self.is_active(&identity_hash) {
            self.active_apps.push(identity_hash);
        }
    }

    pub(crate) fn deactivate(&mut self, identity_hash: &Hash) -> bool {
        let before = self.active_apps.len();
        self.active_apps.retain(|h| h != identity_hash);
        before != self.active_apps.len()
    }
}

impl AbiEncode for FreeBalanceState {
    // (bytes32[] activeApps, address[] tokenAddresses, CoinTransfer[][] balances)
    fn to_token(&self) -> Token {
        let active = self.active_apps.iter().map(AbiEncode::to_token).collect();
        let tokens = self.balances.keys().map(AbiEncode::to_token).collect();
        let balances = self
            .balances
            .values()
            .map(|per_owner| {
                Token::Array(
                    per_owner
                        .iter()
                        .map(|(to, amount)| CoinTransfer::new(*to, *amount).to_token())
                        .collect(),
                )
            })
            .collect();
        Token::Tuple(vec![
            Token::Array(active),
            Token::Array(tokens),
            Token::Array(balances),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address([1; 20]);
    const B: Address = Address([2; 20]);

    #[test]
    fn starts_with_zero_eth() {
        let fb = FreeBalanceState::new([A, B]);
        assert_eq!(fb.balance(&Address::zero(), &A), U256::zero());
        assert_eq!(fb.balances()[&Address::zero()].len(), 2);
        assert!(fb.active_apps().is_empty());
    }

    #[test]
    fn debit_more_than_available_fails() {
        let mut fb = FreeBalanceState::new([A, B]);
        fb.credit(Address::zero(), A, U256::from(5u64)).unwrap();
        fb.debit(Address::zero(), A, U256::from(3u64)).unwrap();
        assert_eq!(fb.balance(&Address::zero(), &A), U256::from(2u64));

        let err = fb.debit(Address::zero(), A, U256::from(3u64)).unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientFreeBalance { .. }));
        assert_eq!(fb.balance(&Address::zero(), &A), U256::from(2u64));
    }

    #[test]
    fn activate_is_idempotent() {
        let mut fb = FreeBalanceState::new([A, B]);
        let h = Hash([7; 32]);
        fb.activate(h);
        fb.activate(h);
        assert_eq!(fb.active_apps(), &[h]);
        assert!(fb.deactivate(&h));
        assert!(!fb.deactivate(&h));
    }

    #[test]
    fn encoding_depends_on_active_apps() {
        let fb = FreeBalanceState::new([A, B]);
        let mut with_app = fb.clone();
        with_app.activate(Hash([7; 32]));
        assert_ne!(fb.abi_encode(), with_app.abi_encode());
    }
}
