//! Propose: agree on a new app and co-sign its initial state. The proposal is
//! stored by both sides until it is installed or rejected, the channel's app
//! counter moves forward either way.

use tracing::info;

use super::{
    context::{countersignatures, expect_signatures, Engine, Run},
    Phase, ProtocolName, Role,
};
use crate::{
    channel::{AppIdentity, AppInstanceProposal, Deposits, StateChannel},
    commitment::{Commitment, CommitmentKey, CommitmentKind, SetStateCommitment},
    error::{Result, ValidationError},
    events::{Event, EventName},
    messages::{MessageBody, ProposeInstallParams, ProtocolParams},
    middleware::MiddlewareContext,
    Signature,
};

/// Both deposits have to be available in the free balance.
fn check_deposits(channel: &StateChannel, deposits: &Deposits) -> core::result::Result<(), ValidationError> {
    let mut free_balance = channel.free_balance_state().clone();
    for (owner, amount, asset) in deposits.entries() {
        free_balance.debit(asset, owner, amount)?;
    }
    Ok(())
}

impl Engine {
    pub(crate) async fn propose_install(&self, params: ProposeInstallParams) -> Result<AppInstanceProposal> {
        let multisig = params.multisig_address;
        let counterparty = self.counterparty_of(&multisig).await?;
        let params = &params;
        self.initiate(ProtocolName::Propose, counterparty, multisig, None, move |run| {
            self.run_propose(run, params)
        })
        .await
    }

    async fn validate_proposal(
        &self,
        role: Role,
        channel: &StateChannel,
        proposal: &AppInstanceProposal,
    ) -> Result<()> {
        if channel.is_free_balance(&proposal.identity_hash) {
            return Err(ValidationError::FreeBalanceNotModifiable.into());
        }
        let chain = self.chain_snapshot(&proposal.initial_state).await?;
        self.middleware
            .run(&MiddlewareContext {
                protocol: ProtocolName::Propose,
                role,
                me: self.address(),
                channel,
                proposal: Some(proposal),
                app: None,
                chain,
            })
            .await?;
        check_deposits(channel, &proposal.deposits)?;
        Ok(())
    }

    async fn run_propose(&self, mut run: Run<'_>, params: &ProposeInstallParams) -> Result<AppInstanceProposal> {
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;

        let kind = self.registry.resolve(&params.app_definition)?;
        let me = self.address();
        let them = run.counterparty_address();
        let identity = AppIdentity {
            multisig_address: run.multisig,
            channel_nonce: channel.num_proposed_apps(),
            participants: [me, them],
            app_definition: params.app_definition,
            default_timeout: params.default_timeout,
        };
        let deposits = Deposits {
            initiator: me,
            initiator_deposit: params.initiator_deposit,
            initiator_deposit_asset_id: params.initiator_deposit_asset_id,
            responder: them,
            responder_deposit: params.responder_deposit,
            responder_deposit_asset_id: params.responder_deposit_asset_id,
        };
        let interpreter_params = kind.interpreter_params(
            [me, them],
            [
                (params.initiator_deposit, params.initiator_deposit_asset_id),
                (params.responder_deposit, params.responder_deposit_asset_id),
            ],
        )?;
        let proposal = AppInstanceProposal::new(
            identity,
            params.initial_state.clone(),
            [self.identifier, run.counterparty],
            deposits,
            params.state_timeout,
            interpreter_params,
        );
        run.bind_app(proposal.identity_hash);
        self.validate_proposal(Role::Initiator, &channel, &proposal).await?;
        let next = channel.add_proposal(proposal.clone())?;

        let mut commitment = SetStateCommitment::for_proposal(&proposal, &self.cache);
        let signature = self.sign(&mut commitment)?;
        let reply = run
            .request(
                ProtocolParams::Propose {
                    proposal: Box::new(proposal.clone()),
                },
                vec![signature],
            )
            .await?;
        let theirs = countersignatures(reply, 1)?;
        commitment.add_signature_from(theirs[0], them)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![commitment.to_stored()?]).await?;
        info!(identity_hash = %proposal.identity_hash, nonce = proposal.app_nonce(), "app proposed");
        self.emit(
            Event::new(EventName::ProposeInstall, run.multisig, run.process_id)
                .app(proposal.identity_hash, 0),
        );
        Ok(proposal)
    }

    pub(crate) async fn respond_propose(
        &self,
        run: &mut Run<'_>,
        proposal: AppInstanceProposal,
        theirs: &[Signature],
    ) -> Result<MessageBody> {
        expect_signatures(theirs, 1)?;
        let them = run.counterparty_address();
        if !proposal.is_consistent()
            || proposal.initiator_identifier != run.counterparty
            || proposal.responder_identifier != self.identifier
            || proposal.identity.participants != [them, self.address()]
        {
            return Err(ValidationError::IdentifierMismatch(format!(
                "proposal {} does not match its parties",
                proposal.identity_hash
            ))
            .into());
        }

        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        self.check_counterparty(run, &channel)?;

        // Nonces play the role of versions: the last one used is
        // `num_proposed_apps - 1`.
        let key = CommitmentKey {
            kind: CommitmentKind::SetState,
            identity_hash: proposal.identity_hash,
            version: 0,
        };
        if let Some(ours) = self
            .check_version(
                run,
                proposal.identity_hash,
                proposal.app_nonce(),
                channel.num_proposed_apps() - 1,
                &[key],
                theirs,
            )
            .await?
        {
            return Ok(MessageBody::Countersignature { signatures: ours });
        }

        run.advance(Phase::Validating);
        self.validate_proposal(Role::Responder, &channel, &proposal).await?;
        let next = channel.add_proposal(proposal.clone())?;

        let mut commitment = SetStateCommitment::for_proposal(&proposal, &self.cache);
        commitment.add_signature_from(theirs[0], them)?;
        let ours = self.sign(&mut commitment)?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&next, vec![commitment.to_stored()?]).await?;
        self.emit(
            Event::new(EventName::ProposeInstall, run.multisig, run.process_id)
                .app(proposal.identity_hash, 0),
        );
        Ok(MessageBody::Countersignature {
            signatures: vec![ours],
        })
    }
}
