use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::{apps::AppState, Hash};

/// Bounded cache of app state hashes, keyed by `(identity hash, version)`.
///
/// A hit is only used if the cached state equals the requested one, so a
/// state that was computed for an aborted run never leaks into a later one
/// at the same version. A capacity of 0 disables caching.
#[derive(Debug)]
pub struct StateHashCache {
    entries: Option<Mutex<LruCache<(Hash, u64), (AppState, Hash)>>>,
}

impl StateHashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
        }
    }

    pub fn state_hash(&self, identity_hash: Hash, version: u64, state: &AppState) -> Hash {
        let entries = match &self.entries {
            Some(entries) => entries,
            None => return state.state_hash(),
        };

        if let Some((cached_state, hash)) = entries.lock().get(&(identity_hash, version)) {
            if cached_state == state {
                return *hash;
            }
        }
        let hash = state.state_hash();
        entries
            .lock()
            .put((identity_hash, version), (state.clone(), hash));
        hash
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apps::TicTacToeState, Address};

    fn game() -> AppState {
        AppState::TicTacToe(TicTacToeState::new([Address([1; 20]), Address([2; 20])]))
    }

    #[test]
    fn cache_is_bounded() {
        let cache = StateHashCache::new(2);
        for v in 0..5 {
            cache.state_hash(Hash::zero(), v, &game());
        }
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn different_state_at_same_version_is_recomputed() {
        let cache = StateHashCache::new(4);
        let a = game();
        let mut b = game();
        if let AppState::TicTacToe(s) = &mut b {
            s.turn_num = 1;
        }
        let ha = cache.state_hash(Hash::zero(), 1, &a);
        let hb = cache.state_hash(Hash::zero(), 1, &b);
        assert_ne!(ha, hb);
        assert_eq!(hb, b.state_hash());
    }

    #[test]
    fn zero_capacity_disables_the_cache() {
        let cache = StateHashCache::new(0);
        assert_eq!(cache.state_hash(Hash::zero(), 0, &game()), game().state_hash());
        assert!(cache.is_empty());
    }
}
