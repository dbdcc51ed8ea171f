use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Store, StoreError};
use crate::{
    channel::{AppInstance, StateChannelJson},
    commitment::{CommitmentKey, StoredCommitment},
    Address, Hash,
};

#[derive(Debug, Default)]
struct Tables {
    /// multisig -> channel JSON
    channels: HashMap<Address, String>,
    /// identity hash -> multisig, for every app ever installed
    apps: HashMap<Hash, Address>,
    commitments: BTreeMap<CommitmentKey, StoredCommitment>,
}

/// In-process [Store]. Channels are kept serialized so every read hands out
/// an independent copy, the same way a real backend would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_commitments(&self) -> usize {
        self.tables.read().commitments.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_state_channel(&self, multisig: &Address) -> Result<Option<StateChannelJson>, StoreError> {
        match self.tables.read().channels.get(multisig) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn get_state_channels(&self) -> Result<Vec<Address>, StoreError> {
        let mut all: Vec<_> = self.tables.read().channels.keys().copied().collect();
        all.sort();
        Ok(all)
    }

    async fn save_state_channel(
        &self,
        channel: StateChannelJson,
        commitments: Vec<StoredCommitment>,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(&channel)?;
        let mut tables = self.tables.write();

        // Check everything before writing anything.
        for c in &commitments {
            if let Some(existing) = tables.commitments.get(&c.key) {
                if existing != c {
                    return Err(StoreError::Conflict(c.key));
                }
            }
        }

        let multisig = channel.multisig_address;
        let hashes = channel
            .app_instances
            .iter()
            .chain(Some(&channel.free_balance_app_instance))
            .map(AppInstance::identity_hash);
        for hash in hashes {
            tables.apps.insert(hash, multisig);
        }
        for c in commitments {
            tables.commitments.insert(c.key, c);
        }
        tables.channels.insert(multisig, json);
        Ok(())
    }

    async fn get_app_instance(&self, identity_hash: &Hash) -> Result<Option<AppInstance>, StoreError> {
        let multisig = match self.tables.read().apps.get(identity_hash) {
            Some(m) => *m,
            None => return Ok(None),
        };
        let channel = match self.get_state_channel(&multisig).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        if channel.free_balance_app_instance.identity_hash() == *identity_hash {
            return Ok(Some(channel.free_balance_app_instance));
        }
        Ok(channel
            .app_instances
            .into_iter()
            .find(|app| app.identity_hash() == *identity_hash))
    }

    async fn get_commitment(&self, key: &CommitmentKey) -> Result<Option<StoredCommitment>, StoreError> {
        Ok(self.tables.read().commitments.get(key).cloned())
    }

    async fn get_commitments(&self, identity_hash: &Hash) -> Result<Vec<StoredCommitment>, StoreError> {
        Ok(self
            .tables
            .read()
            .commitments
            .values()
            .filter(|c| c.key.identity_hash == *identity_hash)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{tests::two_identifiers, StateChannel},
        commitment::CommitmentKind,
        Signature,
    };

    fn channel() -> StateChannel {
        StateChannel::setup(Address([0xaa; 20]), two_identifiers(), Address([0xee; 20]))
    }

    fn commitment(version: u64, fill: u8) -> StoredCommitment {
        StoredCommitment {
            key: CommitmentKey {
                kind: CommitmentKind::SetState,
                identity_hash: Hash([1; 32]),
                version,
            },
            hash_to_sign: Hash([fill; 32]),
            signatures: [Signature([fill; 65]); 2],
        }
    }

    #[tokio::test]
    async fn saved_channel_reads_back() {
        let store = MemoryStore::new();
        let ch = channel();
        store
            .save_state_channel(StateChannelJson::from(&ch), vec![commitment(0, 1)])
            .await
            .unwrap();

        let json = store.get_state_channel(&ch.multisig_address()).await.unwrap().unwrap();
        assert_eq!(StateChannel::try_from(json).unwrap(), ch);
        let fb = store
            .get_app_instance(&ch.free_balance().identity_hash())
            .await
            .unwrap();
        assert_eq!(fb.as_ref(), Some(ch.free_balance()));
        assert_eq!(store.get_state_channels().await.unwrap(), vec![ch.multisig_address()]);
    }

    #[tokio::test]
    async fn commitments_are_append_only() {
        let store = MemoryStore::new();
        let json = StateChannelJson::from(&channel());
        store.save_state_channel(json.clone(), vec![commitment(0, 1)]).await.unwrap();
        // same content again is fine
        store.save_state_channel(json.clone(), vec![commitment(0, 1)]).await.unwrap();

        let err = store
            .save_state_channel(json, vec![commitment(1, 2), commitment(0, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(k) if k.version == 0));
        // nothing of the failed batch was written
        assert_eq!(store.num_commitments(), 1);
        assert_eq!(store.get_commitments(&Hash([1; 32])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_entries_are_none() {
        let store = MemoryStore::new();
        assert!(store.get_state_channel(&Address([1; 20])).await.unwrap().is_none());
        assert!(store.get_app_instance(&Hash([1; 32])).await.unwrap().is_none());
        assert!(store.get_commitment(&commitment(0, 1).key).await.unwrap().is_none());
    }
}
