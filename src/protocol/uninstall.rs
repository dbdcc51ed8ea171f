//! Uninstall: remove an app and credit its outcome, as resolved by the app's
//! interpreter, back to the free balance. The co-signed free balance state
//! without the app is the app's final commitment.

use tracing::info;

use super::{
    context::{countersignatures, expect_signatures, Engine, Run},
    Phase, ProtocolName, Role,
};
use crate::{
    channel::{AppInstance, StateChannel},
    commitment::{Commitment, CommitmentKey, CommitmentKind, SetStateCommitment},
    error::{Result, ValidationError},
    events::{Event, EventName},
    messages::{MessageBody, ProtocolParams},
    middleware::MiddlewareContext,
    Address, Hash, Signature,
};

impl Engine {
    pub(crate) async fn uninstall(&self, multisig: Address, identity_hash: Hash) -> Result<StateChannel> {
        let counterparty = self.counterparty_of(&multisig).await?;
        self.initiate(
            ProtocolName::Uninstall,
            counterparty,
            multisig,
            Some(identity_hash),
            move |run| self.run_uninstall(run, identity_hash),
        )
        .await
    }

    /// Run the middleware and compute the channel without the app.
    async fn uninstalled(
        &self,
        role: Role,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(StateChannel, AppInstance)> {
        if channel.is_free_balance(identity_hash) {
            return Err(ValidationError::FreeBalanceNotModifiable.into());
        }
        let app = channel.get_app_instance(identity_hash)?.clone();
        let chain = self.chain_snapshot(app.latest_state()).await?;
        self.middleware
            .run(&MiddlewareContext {
                protocol: ProtocolName::Uninstall,
                role,
                me: self.address(),
                channel,
                proposal: None,
                app: Some(&app),
                chain,
            })
            .await?;

        let outcome = app.latest_state().outcome(chain)?;
        let increments = app.interpreter_params().interpret(&outcome)?;
        let next = channel.uninstall_app(identity_hash, &increments)?;
        Ok((next, app))
    }

    async fn run_uninstall(&self, mut run: Run<'_>, identity_hash: Hash) -> Result<StateChannel> {
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        let (next, app) = self
            .uninstalled(Role::Initiator, &channel, &identity_hash)
            .await?;

        let mut free_balance = SetStateCommitment::for_app(next.free_balance(), &self.cache);
        let signature = self.sign(&mut free_balance)?;
        let reply = run
            .request(
                ProtocolParams::Uninstall {
                    multisig_address: run.multisig,
                    identity_hash,
                    free_balance_version: next.free_balance_version(),
                },
                vec![signature],
            )
            .await?;
        let theirs = countersignatures(reply, 1)?;
        free_balance.add_signature_from(theirs[0], run.counterparty_address())?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![free_balance.to_stored()?]).await?;
        info!(identity_hash = %identity_hash, free_balance_version = next.free_balance_version(), "app uninstalled");
        self.emit(
            Event::new(EventName::Uninstall, run.multisig, run.process_id)
                .app(identity_hash, app.latest_version()),
        );
        Ok(next)
    }

    pub(crate) async fn respond_uninstall(
        &self,
        run: &mut Run<'_>,
        identity_hash: Hash,
        free_balance_version: u64,
        theirs: &[Signature],
    ) -> Result<MessageBody> {
        expect_signatures(theirs, 1)?;
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        self.check_counterparty(run, &channel)?;

        // A retried uninstall must not credit the outcome twice.
        let fb_hash = channel.free_balance().identity_hash();
        let key = CommitmentKey {
            kind: CommitmentKind::SetState,
            identity_hash: fb_hash,
            version: free_balance_version,
        };
        if let Some(ours) = self
            .check_version(run, fb_hash, free_balance_version, channel.free_balance_version(), &[key], theirs)
            .await?
        {
            return Ok(MessageBody::Countersignature { signatures: ours });
        }

        run.advance(Phase::Validating);
        let (next, app) = self
            .uninstalled(Role::Responder, &channel, &identity_hash)
            .await?;
        let mut free_balance = SetStateCommitment::for_app(next.free_balance(), &self.cache);
        free_balance.add_signature_from(theirs[0], run.counterparty_address())?;
        let ours = self.sign(&mut free_balance)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![free_balance.to_stored()?]).await?;
        self.emit(
            Event::new(EventName::Uninstall, run.multisig, run.process_id)
                .app(identity_hash, app.latest_version()),
        );
        Ok(MessageBody::Countersignature {
            signatures: vec![ours],
        })
    }
}
