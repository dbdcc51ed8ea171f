//! Persistence collaborator.
//!
//! The engine only needs the read/write contract below. Channels are handed
//! over as [StateChannelJson], commitments are append-only and keyed by
//! [CommitmentKey].

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    channel::{AppInstance, StateChannelJson},
    commitment::{CommitmentKey, StoredCommitment},
    Address, Hash,
};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A different commitment is already stored under this key.
    #[error("commitment {0:?} is already stored with different content")]
    Conflict(CommitmentKey),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store backend: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_state_channel(&self, multisig: &Address) -> Result<Option<StateChannelJson>, StoreError>;

    /// Multisig addresses of all stored channels.
    async fn get_state_channels(&self) -> Result<Vec<Address>, StoreError>;

    /// Persist a new version of a channel together with the commitments that
    /// make it binding. Either everything is written or nothing is.
    ///
    /// Commitments are never overwritten: saving one whose key already exists
    /// is a no-op if it is identical and a [StoreError::Conflict] otherwise.
    async fn save_state_channel(
        &self,
        channel: StateChannelJson,
        commitments: Vec<StoredCommitment>,
    ) -> Result<(), StoreError>;

    /// Installed app (or free balance) by identity hash, in any channel.
    async fn get_app_instance(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError>;

    async fn get_commitment(&self, key: &CommitmentKey) -> Result<Option<StoredCommitment>, StoreError>;

    /// All commitments bound to one app, ordered by kind and version.
    async fn get_commitments(&self, identity_hash: &Hash) -> Result<Vec<StoredCommitment>, StoreError>;
}
