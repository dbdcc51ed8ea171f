//! Per-channel serialization.
//!
//! At most one protocol run touches a multisig at a time. Waiters are queued
//! in FIFO order (`tokio::sync::Mutex` is fair), runs on different multisigs
//! never wait for each other.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::{protocol::Role, Address};

/// Which run currently holds a channel lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHolder {
    pub process_id: Uuid,
    pub role: Role,
}

type Holders = Arc<Mutex<HashMap<Address, LockHolder>>>;

#[derive(Debug, Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
    holders: Holders,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, multisig: Address) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(multisig).or_default().clone()
    }

    /// Wait until the channel is free and take it for `holder`.
    pub async fn acquire(&self, multisig: Address, holder: LockHolder) -> ChannelGuard {
        let guard = self.lock_for(multisig).lock_owned().await;
        self.holders.lock().insert(multisig, holder);
        debug!(multisig = %multisig, process_id = %holder.process_id, role = ?holder.role, "channel locked");
        ChannelGuard {
            multisig,
            holder,
            holders: self.holders.clone(),
            _guard: guard,
        }
    }

    pub fn holder(&self, multisig: &Address) -> Option<LockHolder> {
        self.holders.lock().get(multisig).copied()
    }

    pub fn is_locked(&self, multisig: &Address) -> bool {
        self.holder(multisig).is_some()
    }
}

/// Exclusive access to one channel. Released on drop.
#[derive(Debug)]
pub struct ChannelGuard {
    multisig: Address,
    holder: LockHolder,
    holders: Holders,
    _guard: OwnedMutexGuard<()>,
}

impl ChannelGuard {
    pub fn multisig(&self) -> Address {
        self.multisig
    }

    pub fn release(self) {}
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let mut holders = self.holders.lock();
        // The holder entry is removed before the async mutex, so the next
        // waiter always finds it empty when it gets the lock.
        if holders.get(&self.multisig) == Some(&self.holder) {
            holders.remove(&self.multisig);
        }
        debug!(multisig = %self.multisig, process_id = %self.holder.process_id, "channel released");
    }
}
