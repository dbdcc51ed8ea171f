//! TakeAction: move an installed app to its next state. Both sides apply the
//! same action with the app's own transition function and co-sign the result
//! at version + 1.

use tracing::info;

use super::{
    context::{countersignatures, expect_signatures, Engine, Run},
    Phase, ProtocolName,
};
use crate::{
    apps::AppAction,
    channel::{AppInstance, StateChannel},
    commitment::{Commitment, CommitmentKey, CommitmentKind, SetStateCommitment},
    error::{Result, ValidationError},
    events::{Event, EventName},
    messages::{MessageBody, ProtocolParams},
    Address, Hash, Signature,
};

/// The channel after `actor` took `action` on the app, and the app itself.
fn apply(
    channel: &StateChannel,
    identity_hash: &Hash,
    action: &AppAction,
    actor: Address,
) -> core::result::Result<(StateChannel, AppInstance), ValidationError> {
    if channel.is_free_balance(identity_hash) {
        return Err(ValidationError::FreeBalanceNotModifiable);
    }
    let app = channel.get_app_instance(identity_hash)?;
    let state = app.latest_state().apply_action(action, actor)?;
    let next = channel.set_app_state(identity_hash, state, app.latest_version() + 1)?;
    let updated = next.get_app_instance(identity_hash)?.clone();
    Ok((next, updated))
}

impl Engine {
    pub(crate) async fn take_action(
        &self,
        multisig: Address,
        identity_hash: Hash,
        action: AppAction,
    ) -> Result<AppInstance> {
        let counterparty = self.counterparty_of(&multisig).await?;
        let action = &action;
        self.initiate(
            ProtocolName::TakeAction,
            counterparty,
            multisig,
            Some(identity_hash),
            move |run| self.run_take_action(run, identity_hash, action),
        )
        .await
    }

    async fn run_take_action(&self, mut run: Run<'_>, identity_hash: Hash, action: &AppAction) -> Result<AppInstance> {
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        let (next, app) = apply(&channel, &identity_hash, action, self.address())?;

        let mut commitment = SetStateCommitment::for_app(&app, &self.cache);
        let signature = self.sign(&mut commitment)?;
        let reply = run
            .request(
                ProtocolParams::TakeAction {
                    multisig_address: run.multisig,
                    identity_hash,
                    action: action.clone(),
                    version: app.latest_version(),
                },
                vec![signature],
            )
            .await?;
        let theirs = countersignatures(reply, 1)?;
        commitment.add_signature_from(theirs[0], run.counterparty_address())?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![commitment.to_stored()?]).await?;
        info!(identity_hash = %identity_hash, version = app.latest_version(), "app state updated");
        self.emit(
            Event::new(EventName::UpdateState, run.multisig, run.process_id)
                .app(identity_hash, app.latest_version()),
        );
        Ok(app)
    }

    pub(crate) async fn respond_take_action(
        &self,
        run: &mut Run<'_>,
        identity_hash: Hash,
        action: AppAction,
        version: u64,
        theirs: &[Signature],
    ) -> Result<MessageBody> {
        expect_signatures(theirs, 1)?;
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        self.check_counterparty(run, &channel)?;
        if channel.is_free_balance(&identity_hash) {
            return Err(ValidationError::FreeBalanceNotModifiable.into());
        }

        let local = channel.get_app_instance(&identity_hash)?.latest_version();
        let key = CommitmentKey {
            kind: CommitmentKind::SetState,
            identity_hash,
            version,
        };
        if let Some(ours) = self
            .check_version(run, identity_hash, version, local, &[key], theirs)
            .await?
        {
            return Ok(MessageBody::Countersignature { signatures: ours });
        }

        run.advance(Phase::Validating);
        let (next, app) = apply(&channel, &identity_hash, &action, run.counterparty_address())?;
        let mut commitment = SetStateCommitment::for_app(&app, &self.cache);
        commitment.add_signature_from(theirs[0], run.counterparty_address())?;
        let ours = self.sign(&mut commitment)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![commitment.to_stored()?]).await?;
        self.emit(Event::new(EventName::UpdateState, run.multisig, run.process_id).app(identity_hash, version));
        Ok(MessageBody::Countersignature {
            signatures: vec![ours],
        })
    }
}
