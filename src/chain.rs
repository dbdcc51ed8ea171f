//! Read-only view of the chain.
//!
//! The engine never submits transactions. The only on-chain facts it needs
//! are the multisig balances the deposit app pays out.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::{apps::ChainSnapshot, Address, U256};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain provider: {0}")]
    Provider(String),
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Balance of `asset` held by the multisig. The zero address is ETH.
    async fn multisig_balance(&self, multisig: &Address, asset: &Address) -> Result<U256, ChainError>;

    /// Total amount of `asset` ever withdrawn from the multisig.
    async fn total_amount_withdrawn(&self, multisig: &Address, asset: &Address) -> Result<U256, ChainError>;

    async fn snapshot(&self, multisig: &Address, asset: &Address) -> Result<ChainSnapshot, ChainError> {
        Ok(ChainSnapshot {
            multisig_balance: self.multisig_balance(multisig, asset).await?,
            total_amount_withdrawn: self.total_amount_withdrawn(multisig, asset).await?,
        })
    }
}

/// Chain stand-in for tests and demos, shared by all nodes of a test.
#[derive(Debug, Default)]
pub struct MemoryChain {
    accounts: RwLock<HashMap<(Address, Address), ChainSnapshot>>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, multisig: Address, asset: Address, amount: impl Into<U256>) {
        let mut accounts = self.accounts.write();
        let account = accounts.entry((multisig, asset)).or_default();
        account.multisig_balance = account.multisig_balance.saturating_add(amount.into());
    }

    pub fn withdraw(&self, multisig: Address, asset: Address, amount: impl Into<U256>) -> Result<(), ChainError> {
        let amount = amount.into();
        let mut accounts = self.accounts.write();
        let account = accounts.entry((multisig, asset)).or_default();
        account.multisig_balance = account
            .multisig_balance
            .checked_sub(amount)
            .ok_or_else(|| ChainError::Provider(format!("multisig {} has less than {}", multisig, amount)))?;
        account.total_amount_withdrawn = account.total_amount_withdrawn.saturating_add(amount);
        Ok(())
    }

    fn account(&self, multisig: &Address, asset: &Address) -> ChainSnapshot {
        self.accounts
            .read()
            .get(&(*multisig, *asset))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn multisig_balance(&self, multisig: &Address, asset: &Address) -> Result<U256, ChainError> {
        Ok(self.account(multisig, asset).multisig_balance)
    }

    async fn total_amount_withdrawn(&self, multisig: &Address, asset: &Address) -> Result<U256, ChainError> {
        Ok(self.account(multisig, asset).total_amount_withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn withdrawals_are_tracked() {
        let chain = MemoryChain::new();
        let (m, eth) = (Address([1; 20]), Address::zero());
        chain.deposit(m, eth, 5u64);
        chain.withdraw(m, eth, 2u64).unwrap();
        assert!(chain.withdraw(m, eth, 10u64).is_err());

        let snap = chain.snapshot(&m, &eth).await.unwrap();
        assert_eq!(snap.multisig_balance, U256::from(3u64));
        assert_eq!(snap.total_amount_withdrawn, U256::from(2u64));
        assert_eq!(chain.snapshot(&m, &Address([9; 20])).await.unwrap(), ChainSnapshot::default());
    }
}
