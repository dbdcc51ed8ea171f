//! Install: turn a proposal into a running app. Both deposits move out of the
//! free balance into the app, backed by a conditional transaction that pays
//! the app's outcome out of the multisig.

use tracing::{info, warn};

use super::{
    context::{countersignatures, expect_signatures, Engine, Run},
    Phase, ProtocolName, Role,
};
use crate::{
    channel::{AppInstance, AppInstanceProposal, StateChannel},
    commitment::{
        Commitment, CommitmentKey, CommitmentKind, ConditionalTransactionCommitment, MultisigCommitment,
        SetStateCommitment,
    },
    error::{AbortReason, Error, Result},
    events::{Event, EventName},
    messages::{MessageBody, ProtocolParams},
    middleware::MiddlewareContext,
    Address, Hash, Signature,
};

impl Engine {
    pub(crate) async fn install(&self, multisig: Address, identity_hash: Hash) -> Result<AppInstance> {
        let counterparty = self.counterparty_of(&multisig).await?;
        self.initiate(ProtocolName::Install, counterparty, multisig, Some(identity_hash), move |run| {
            self.run_install(run, identity_hash)
        })
        .await
    }

    /// Drop a proposal after a failed install. Only called with the channel
    /// lock held, the removal must not overwrite a newer version.
    async fn discard_proposal(&self, multisig: Address, identity_hash: Hash) {
        let result: Result<()> = async {
            let channel = self.load_channel(&multisig).await?;
            if channel.has_proposal(&identity_hash) {
                self.persist(&channel.remove_proposal(&identity_hash)?, Vec::new())
                    .await?;
            }
            Ok(())
        }
        .await;
        match result {
            Ok(()) => info!(identity_hash = %identity_hash, "proposal discarded after failed install"),
            Err(e) => warn!(identity_hash = %identity_hash, error = %e, "could not discard proposal"),
        }
    }

    fn install_commitments(
        &self,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> (ConditionalTransactionCommitment, SetStateCommitment) {
        (
            MultisigCommitment::conditional(&self.config.network, channel, app),
            SetStateCommitment::for_app(channel.free_balance(), &self.cache),
        )
    }

    async fn check_install(&self, role: Role, channel: &StateChannel, proposal: &AppInstanceProposal) -> Result<()> {
        self.middleware
            .run(&MiddlewareContext {
                protocol: ProtocolName::Install,
                role,
                me: self.address(),
                channel,
                proposal: Some(proposal),
                app: None,
                chain: None,
            })
            .await
    }

    async fn run_install(&self, mut run: Run<'_>, identity_hash: Hash) -> Result<AppInstance> {
        let _guard = run.lock().await?;
        let result = self.try_install(&mut run, identity_hash).await;
        match &result {
            // Nothing was tried, or the counterparty may still be working on
            // it: keep the proposal.
            Ok(_) | Err(Error::Validation(_)) | Err(Error::Abort(AbortReason::CounterpartyBusy)) => {}
            Err(_) => self.discard_proposal(run.multisig, identity_hash).await,
        }
        result
    }

    async fn try_install(&self, run: &mut Run<'_>, identity_hash: Hash) -> Result<AppInstance> {
        let channel = self.load_channel(&run.multisig).await?;
        let proposal = channel.get_proposal(&identity_hash)?;
        self.check_install(Role::Initiator, &channel, proposal).await?;

        let next = channel.install_app(&identity_hash)?;
        let app = next.get_app_instance(&identity_hash)?.clone();
        let (mut conditional, mut free_balance) = self.install_commitments(&next, &app);
        let signatures = vec![self.sign(&mut conditional)?, self.sign(&mut free_balance)?];

        let reply = run
            .request(
                ProtocolParams::Install {
                    multisig_address: run.multisig,
                    identity_hash,
                    free_balance_version: next.free_balance_version(),
                },
                signatures,
            )
            .await?;
        let theirs = countersignatures(reply, 2)?;
        conditional.add_signature_from(theirs[0], run.counterparty_address())?;
        free_balance.add_signature_from(theirs[1], run.counterparty_address())?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![conditional.to_stored()?, free_balance.to_stored()?])
            .await?;
        info!(identity_hash = %identity_hash, free_balance_version = next.free_balance_version(), "app installed");
        self.emit(Event::new(EventName::Install, run.multisig, run.process_id).app(identity_hash, 0));
        Ok(app)
    }

    pub(crate) async fn respond_install(
        &self,
        run: &mut Run<'_>,
        identity_hash: Hash,
        free_balance_version: u64,
        theirs: &[Signature],
    ) -> Result<MessageBody> {
        expect_signatures(theirs, 2)?;
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        self.check_counterparty(run, &channel)?;

        let fb_hash = channel.free_balance().identity_hash();
        let keys = [
            CommitmentKey {
                kind: CommitmentKind::Conditional,
                identity_hash,
                version: 0,
            },
            CommitmentKey {
                kind: CommitmentKind::SetState,
                identity_hash: fb_hash,
                version: free_balance_version,
            },
        ];
        if let Some(ours) = self
            .check_version(run, fb_hash, free_balance_version, channel.free_balance_version(), &keys, theirs)
            .await?
        {
            return Ok(MessageBody::Countersignature { signatures: ours });
        }

        run.advance(Phase::Validating);
        match self.accept_install(run, &channel, identity_hash, theirs).await {
            Ok(reply) => Ok(reply),
            Err(e @ (Error::Abort(AbortReason::Middleware(_)) | Error::Signature(_))) => {
                // Vetoed or badly signed: the proposal is dead on our side.
                if let Ok(next) = channel.remove_proposal(&identity_hash) {
                    self.persist(&next, Vec::new()).await?;
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn accept_install(
        &self,
        run: &mut Run<'_>,
        channel: &StateChannel,
        identity_hash: Hash,
        theirs: &[Signature],
    ) -> Result<MessageBody> {
        let proposal = channel.get_proposal(&identity_hash)?;
        self.check_install(Role::Responder, channel, proposal).await?;

        let next = channel.install_app(&identity_hash)?;
        let app = next.get_app_instance(&identity_hash)?;
        let (mut conditional, mut free_balance) = self.install_commitments(&next, app);
        conditional.add_signature_from(theirs[0], run.counterparty_address())?;
        free_balance.add_signature_from(theirs[1], run.counterparty_address())?;
        let ours = vec![self.sign(&mut conditional)?, self.sign(&mut free_balance)?];

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![conditional.to_stored()?, free_balance.to_stored()?])
            .await?;
        self.emit(Event::new(EventName::Install, run.multisig, run.process_id).app(identity_hash, 0));
        Ok(MessageBody::Countersignature { signatures: ours })
    }
}
