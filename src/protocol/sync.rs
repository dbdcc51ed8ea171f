//! Sync: repair diverged copies of a channel.
//!
//! Both sides send their channel together with the commitments proving it.
//! Anything newer on the other side is adopted, but only if it is backed by
//! a commitment carrying both signatures. The free balance version decides
//! which apps are installed, each app then takes the higher of the two
//! versions. Two different states under the same version cannot be repaired
//! and fail with [Error::SyncConflict].

use std::collections::{HashMap, HashSet};

use tracing::info;

use super::{
    context::{Engine, Run},
    Phase, ProtocolName,
};
use crate::{
    apps::AppState,
    channel::{derive_multisig_address, AppInstanceProposal, StateChannel, StateChannelJson},
    commitment::{
        Commitment, CommitmentKey, CommitmentKind, MultisigCommitment, SetStateCommitment, StateHashCache,
        StoredCommitment,
    },
    config::NetworkContext,
    error::{AbortReason, Error, Result, ValidationError},
    events::{Event, EventName},
    messages::{MessageBody, ProtocolParams, SyncSnapshot},
    Address, Hash,
};

/// Outcome of merging a counterparty snapshot into the local channel.
#[derive(Debug)]
pub(crate) struct Reconciled {
    pub(crate) channel: StateChannel,
    /// Counterparty commitments backing what was adopted.
    pub(crate) adopted: Vec<StoredCommitment>,
    pub(crate) changed: bool,
}

struct Evidence<'a> {
    by_key: HashMap<CommitmentKey, &'a StoredCommitment>,
    adopted: Vec<StoredCommitment>,
}

impl<'a> Evidence<'a> {
    fn new(snapshot: &'a SyncSnapshot) -> Self {
        Self {
            by_key: snapshot.commitments.iter().map(|c| (c.key, c)).collect(),
            adopted: Vec::new(),
        }
    }

    /// Take the counterparty's copy of `expected`, checking that it commits
    /// to the same thing and is signed by both participants.
    fn adopt(&mut self, expected: &impl Commitment) -> Result<()> {
        let key = expected.key();
        let stored = self.by_key.get(&key).ok_or_else(|| {
            ValidationError::InvalidChannel(format!("snapshot lacks commitment {:?}", key))
        })?;
        stored.verify(expected.hash_to_sign(), expected.participants())?;
        self.adopted.push((*stored).clone());
        Ok(())
    }
}

fn key(kind: CommitmentKind, identity_hash: Hash, version: u64) -> CommitmentKey {
    CommitmentKey {
        kind,
        identity_hash,
        version,
    }
}

/// Merge `remote` into `local` (or adopt it if we have no copy at all).
///
/// Proposals are united, except for those in `retired`: proposals we once
/// agreed to and have since rejected or installed and removed.
pub(crate) fn reconcile(
    network: &NetworkContext,
    cache: &StateHashCache,
    local: Option<&StateChannel>,
    remote: &SyncSnapshot,
    retired: &HashSet<Hash>,
) -> Result<Reconciled> {
    let theirs = StateChannel::try_from(remote.channel.clone())?;
    let mut evidence = Evidence::new(remote);

    let base = match local {
        Some(local) => {
            if local.multisig_address() != theirs.multisig_address()
                || local.user_identifiers() != theirs.user_identifiers()
            {
                return Err(ValidationError::InvalidChannel("snapshot is of a different channel".into()).into());
            }
            local.clone()
        }
        None => {
            let owners = *theirs.user_identifiers();
            if derive_multisig_address(network, owners) != theirs.multisig_address() {
                return Err(ValidationError::InvalidChannel(format!(
                    "multisig {} is not owned by the channel's participants",
                    theirs.multisig_address()
                ))
                .into());
            }
            let fresh = StateChannel::setup(theirs.multisig_address(), owners, network.identity_app);
            if fresh.free_balance().identity_hash() != theirs.free_balance().identity_hash() {
                return Err(ValidationError::InvalidChannel("unexpected free balance app".into()).into());
            }
            evidence.adopt(&MultisigCommitment::setup(network, &fresh))?;
            fresh
        }
    };

    let (local_fb, remote_fb) = (base.free_balance(), theirs.free_balance());
    let free_balance = if local.is_none() || remote_fb.latest_version() > local_fb.latest_version() {
        evidence.adopt(&SetStateCommitment::for_app(remote_fb, cache))?;
        remote_fb.clone()
    } else {
        if remote_fb.latest_version() == local_fb.latest_version() && remote_fb.state_hash() != local_fb.state_hash() {
            return Err(Error::SyncConflict(local_fb.identity_hash()));
        }
        local_fb.clone()
    };

    let active = match free_balance.latest_state() {
        AppState::FreeBalance(fb) => fb.active_apps().to_vec(),
        _ => return Err(ValidationError::InvalidChannel("free balance app holds another state".into()).into()),
    };
    let mut apps = Vec::with_capacity(active.len());
    for hash in &active {
        let mine = base.app_instances().iter().find(|a| a.identity_hash() == *hash);
        let yours = theirs.app_instances().iter().find(|a| a.identity_hash() == *hash);
        let app = match (mine, yours) {
            (Some(mine), Some(yours)) if yours.latest_version() > mine.latest_version() => {
                evidence.adopt(&SetStateCommitment::for_app(yours, cache))?;
                yours.clone()
            }
            (Some(mine), Some(yours)) => {
                if yours.latest_version() == mine.latest_version() && yours.state_hash() != mine.state_hash() {
                    return Err(Error::SyncConflict(*hash));
                }
                mine.clone()
            }
            (Some(mine), None) => mine.clone(),
            (None, Some(yours)) => {
                evidence.adopt(&MultisigCommitment::conditional(network, &theirs, yours))?;
                evidence.adopt(&SetStateCommitment::for_app(yours, cache))?;
                yours.clone()
            }
            (None, None) => {
                return Err(ValidationError::InvalidChannel(format!("active app {} is missing", hash)).into())
            }
        };
        apps.push(app);
    }

    let mut proposals: Vec<AppInstanceProposal> = base
        .proposed_app_instances()
        .iter()
        .filter(|p| !active.contains(&p.identity_hash))
        .cloned()
        .collect();
    for p in theirs.proposed_app_instances() {
        if active.contains(&p.identity_hash)
            || retired.contains(&p.identity_hash)
            || proposals.iter().any(|q| q.identity_hash == p.identity_hash)
        {
            continue;
        }
        evidence.adopt(&SetStateCommitment::for_proposal(p, cache))?;
        proposals.push(p.clone());
    }
    let num_proposed_apps = base.num_proposed_apps().max(theirs.num_proposed_apps());

    let merged = base
        .with_free_balance(free_balance, apps)
        .with_proposals(proposals, num_proposed_apps);
    // The merged channel has to pass the same checks as anything we load.
    let merged = StateChannel::try_from(StateChannelJson::from(&merged))?;
    let changed = local != Some(&merged);
    Ok(Reconciled {
        channel: merged,
        adopted: evidence.adopted,
        changed,
    })
}

impl Engine {
    pub(crate) async fn sync(&self, multisig: Address) -> Result<StateChannel> {
        let counterparty = self.counterparty_of(&multisig).await?;
        self.initiate(ProtocolName::Sync, counterparty, multisig, None, move |run| {
            self.run_sync(run)
        })
        .await
    }

    /// The channel plus every stored commitment proving it.
    async fn snapshot(&self, channel: &StateChannel) -> Result<SyncSnapshot> {
        let fb = channel.free_balance();
        let mut keys = vec![
            key(CommitmentKind::Setup, fb.identity_hash(), 0),
            key(CommitmentKind::SetState, fb.identity_hash(), fb.latest_version()),
        ];
        for app in channel.app_instances() {
            keys.push(key(CommitmentKind::Conditional, app.identity_hash(), 0));
            keys.push(key(CommitmentKind::SetState, app.identity_hash(), app.latest_version()));
        }
        for p in channel.proposed_app_instances() {
            keys.push(key(CommitmentKind::SetState, p.identity_hash, 0));
        }

        let mut commitments = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(c) = self.store.get_commitment(key).await? {
                commitments.push(c);
            }
        }
        Ok(SyncSnapshot {
            channel: StateChannelJson::from(channel),
            commitments,
        })
    }

    /// Proposals in `remote` we agreed to once but no longer hold.
    async fn retired(&self, local: &StateChannel, remote: &SyncSnapshot) -> Result<HashSet<Hash>> {
        let mut retired = HashSet::new();
        for p in &remote.channel.proposed_app_instances {
            if local.has_proposal(&p.identity_hash) || local.has_app_instance(&p.identity_hash) {
                continue;
            }
            let proposed = key(CommitmentKind::SetState, p.identity_hash, 0);
            if self.store.get_commitment(&proposed).await?.is_some() {
                retired.insert(p.identity_hash);
            }
        }
        Ok(retired)
    }

    async fn run_sync(&self, mut run: Run<'_>) -> Result<StateChannel> {
        let _guard = run.lock().await?;
        let local = self.load_channel(&run.multisig).await?;
        let ours = self.snapshot(&local).await?;

        let reply = run
            .request(
                ProtocolParams::Sync {
                    snapshot: Box::new(ours),
                },
                Vec::new(),
            )
            .await?;
        let theirs = match reply {
            MessageBody::Snapshot(snapshot) => *snapshot,
            _ => return Err(AbortReason::UnexpectedMessage.into()),
        };
        let retired = self.retired(&local, &theirs).await?;
        let reconciled = reconcile(&self.config.network, &self.cache, Some(&local), &theirs, &retired)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        if reconciled.changed {
            self.persist(&reconciled.channel, reconciled.adopted).await?;
        }
        info!(
            changed = reconciled.changed,
            free_balance_version = reconciled.channel.free_balance_version(),
            "channel synced"
        );
        self.emit(Event::new(EventName::Sync, run.multisig, run.process_id));
        Ok(reconciled.channel)
    }

    pub(crate) async fn respond_sync(&self, run: &mut Run<'_>, snapshot: SyncSnapshot) -> Result<MessageBody> {
        let _guard = run.lock().await?;
        let local = self.find_channel(&run.multisig).await?;
        let retired = match &local {
            Some(local) => {
                self.check_counterparty(run, local)?;
                self.retired(local, &snapshot).await?
            }
            None => {
                let ids = snapshot.channel.user_identifiers;
                if !ids.contains(&self.identifier) || !ids.contains(&run.counterparty) {
                    return Err(ValidationError::IdentifierMismatch(format!(
                        "snapshot of {} is not a channel with {}",
                        run.multisig, run.counterparty
                    ))
                    .into());
                }
                HashSet::new()
            }
        };

        run.advance(Phase::Validating);
        let reconciled = reconcile(&self.config.network, &self.cache, local.as_ref(), &snapshot, &retired)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        if reconciled.changed {
            self.persist(&reconciled.channel, reconciled.adopted).await?;
        }
        self.emit(Event::new(EventName::Sync, run.multisig, run.process_id));
        Ok(MessageBody::Snapshot(Box::new(self.snapshot(&reconciled.channel).await?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apps::AppAction,
        channel::tests::{proposal, two_signers},
        sig::Signer,
    };

    struct Fixture {
        network: NetworkContext,
        cache: StateHashCache,
        signers: [Signer; 2],
        fresh: StateChannel,
    }

    impl Fixture {
        fn new() -> Self {
            let network = NetworkContext::default();
            let signers = two_signers();
            let ids = [signers[0].public_identifier(), signers[1].public_identifier()];
            let multisig = derive_multisig_address(&network, ids);
            let fresh = StateChannel::setup(multisig, ids, network.identity_app);
            Self {
                network,
                cache: StateHashCache::new(16),
                signers,
                fresh,
            }
        }

        fn signed(&self, mut commitment: impl Commitment) -> StoredCommitment {
            for signer in &self.signers {
                commitment.sign(signer).unwrap();
            }
            commitment.to_stored().unwrap()
        }

        /// Channel with one zero-deposit transfer app installed.
        fn installed(&self) -> (StateChannel, Hash) {
            let p = proposal(&self.fresh, 0, 0);
            let hash = p.identity_hash;
            let channel = self.fresh.add_proposal(p).unwrap().install_app(&hash).unwrap();
            (channel, hash)
        }

        fn after(&self, channel: &StateChannel, hash: &Hash, action: AppAction) -> StateChannel {
            let app = channel.get_app_instance(hash).unwrap();
            let [a, _] = channel.participants();
            let state = app.latest_state().apply_action(&action, a).unwrap();
            channel.set_app_state(hash, state, app.latest_version() + 1).unwrap()
        }

        fn reconcile(&self, local: Option<&StateChannel>, remote: &SyncSnapshot) -> Result<Reconciled> {
            reconcile(&self.network, &self.cache, local, remote, &HashSet::new())
        }
    }

    fn snapshot(channel: &StateChannel, commitments: Vec<StoredCommitment>) -> SyncSnapshot {
        SyncSnapshot {
            channel: StateChannelJson::from(channel),
            commitments,
        }
    }

    #[test]
    fn newer_app_state_is_adopted() {
        let f = Fixture::new();
        let (local, hash) = f.installed();
        let remote = f.after(&local, &hash, AppAction::EndChannel);
        let proof = f.signed(SetStateCommitment::for_app(
            remote.get_app_instance(&hash).unwrap(),
            &f.cache,
        ));

        let merged = f.reconcile(Some(&local), &snapshot(&remote, vec![proof.clone()])).unwrap();
        assert!(merged.changed);
        assert_eq!(merged.channel, remote);
        assert_eq!(merged.adopted, vec![proof]);
    }

    #[test]
    fn unproven_state_is_not_adopted() {
        let f = Fixture::new();
        let (local, hash) = f.installed();
        let remote = f.after(&local, &hash, AppAction::EndChannel);

        let err = f.reconcile(Some(&local), &snapshot(&remote, Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidChannel(_))));

        // Signed, but for a different state.
        let wrong = f.signed(SetStateCommitment::new(
            local.get_app_instance(&hash).unwrap().identity().clone(),
            Hash([9; 32]),
            1,
            10,
        ));
        let err = f.reconcile(Some(&local), &snapshot(&remote, vec![wrong])).unwrap_err();
        assert!(matches!(err, Error::Signature(_)));
    }

    #[test]
    fn same_version_different_state_conflicts() {
        let f = Fixture::new();
        let (base, hash) = f.installed();
        let local = f.after(&base, &hash, AppAction::EndChannel);
        let remote = f.after(
            &base,
            &hash,
            AppAction::SendMoney {
                amount: 0u64.into(),
            },
        );

        let err = f.reconcile(Some(&local), &snapshot(&remote, Vec::new())).unwrap_err();
        assert!(matches!(err, Error::SyncConflict(h) if h == hash));
    }

    #[test]
    fn older_remote_changes_nothing() {
        let f = Fixture::new();
        let (local, _) = f.installed();

        let merged = f.reconcile(Some(&local), &snapshot(&f.fresh, Vec::new())).unwrap();
        assert!(!merged.changed);
        assert_eq!(merged.channel, local);
        assert!(merged.adopted.is_empty());
    }

    #[test]
    fn missing_channel_is_rebuilt_from_the_snapshot() {
        let f = Fixture::new();
        let setup = f.signed(MultisigCommitment::setup(&f.network, &f.fresh));
        let fb = f.signed(SetStateCommitment::for_app(f.fresh.free_balance(), &f.cache));

        let merged = f
            .reconcile(None, &snapshot(&f.fresh, vec![setup.clone(), fb.clone()]))
            .unwrap();
        assert!(merged.changed);
        assert_eq!(merged.channel, f.fresh);
        assert_eq!(merged.adopted, vec![setup, fb]);
    }

    #[test]
    fn retired_proposals_stay_gone() {
        let f = Fixture::new();
        let p = proposal(&f.fresh, 0, 0);
        let hash = p.identity_hash;
        let remote = f.fresh.add_proposal(p.clone()).unwrap();
        let proof = f.signed(SetStateCommitment::for_proposal(&p, &f.cache));
        let remote = snapshot(&remote, vec![proof]);

        let merged = f.reconcile(Some(&f.fresh), &remote).unwrap();
        assert!(merged.channel.has_proposal(&hash));

        let retired: HashSet<Hash> = [hash].into_iter().collect();
        let merged = reconcile(&f.network, &f.cache, Some(&f.fresh), &remote, &retired).unwrap();
        assert!(!merged.channel.has_proposal(&hash));
        // The app counter still moves past the retired nonce.
        assert_eq!(merged.channel.num_proposed_apps(), 2);
    }
}
