//! Setup: create the channel and co-sign the setup commitment plus the first
//! free balance state. Running it again for an existing channel is a no-op.

use tracing::{debug, info};

use super::{
    context::{countersignatures, expect_signatures, Engine, Run},
    Phase, ProtocolName,
};
use crate::{
    channel::{derive_multisig_address, StateChannel},
    commitment::{Commitment, CommitmentKey, CommitmentKind, MultisigCommitment, SetStateCommitment, SetupCommitment},
    error::{Result, ValidationError},
    events::{Event, EventName},
    messages::{MessageBody, ProtocolParams},
    sig::PublicIdentifier,
    Signature,
};

impl Engine {
    pub(crate) async fn setup(&self, counterparty: PublicIdentifier) -> Result<StateChannel> {
        if counterparty == self.identifier {
            return Err(ValidationError::IdentifierMismatch("cannot open a channel with ourselves".into()).into());
        }
        let multisig = derive_multisig_address(&self.config.network, [self.identifier, counterparty]);
        self.initiate(ProtocolName::Setup, counterparty, multisig, None, move |run| {
            self.run_setup(run)
        })
        .await
    }

    fn setup_commitments(&self, channel: &StateChannel) -> (SetupCommitment, SetStateCommitment) {
        (
            MultisigCommitment::setup(&self.config.network, channel),
            SetStateCommitment::for_app(channel.free_balance(), &self.cache),
        )
    }

    async fn run_setup(&self, mut run: Run<'_>) -> Result<StateChannel> {
        let _guard = run.lock().await?;
        if let Some(existing) = self.find_channel(&run.multisig).await? {
            debug!("channel already exists");
            return Ok(existing);
        }

        let channel = StateChannel::setup(
            run.multisig,
            [self.identifier, run.counterparty],
            self.config.network.identity_app,
        );
        let (mut setup, mut free_balance) = self.setup_commitments(&channel);
        let signatures = vec![self.sign(&mut setup)?, self.sign(&mut free_balance)?];

        let reply = run
            .request(
                ProtocolParams::Setup {
                    multisig_address: run.multisig,
                },
                signatures,
            )
            .await?;
        let theirs = countersignatures(reply, 2)?;
        setup.add_signature_from(theirs[0], run.counterparty_address())?;
        free_balance.add_signature_from(theirs[1], run.counterparty_address())?;

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&channel, vec![setup.to_stored()?, free_balance.to_stored()?])
            .await?;
        info!("channel created");
        self.emit(Event::new(EventName::CreateChannel, run.multisig, run.process_id));
        Ok(channel)
    }

    pub(crate) async fn respond_setup(&self, run: &mut Run<'_>, theirs: &[Signature]) -> Result<MessageBody> {
        expect_signatures(theirs, 2)?;
        let owners = [run.counterparty, self.identifier];
        if run.multisig != derive_multisig_address(&self.config.network, owners) {
            return Err(ValidationError::InvalidChannel(format!(
                "multisig {} is not owned by {} and {}",
                run.multisig, owners[0], owners[1]
            ))
            .into());
        }

        let _guard = run.lock().await?;
        if let Some(existing) = self.find_channel(&run.multisig).await? {
            // A retried setup gets the signatures we gave the first time.
            let fb_hash = existing.free_balance().identity_hash();
            let keys = [
                CommitmentKey {
                    kind: CommitmentKind::Setup,
                    identity_hash: fb_hash,
                    version: 0,
                },
                CommitmentKey {
                    kind: CommitmentKind::SetState,
                    identity_hash: fb_hash,
                    version: 0,
                },
            ];
            let ours = self
                .check_version(run, fb_hash, 0, 0, &keys, theirs)
                .await?
                .ok_or_else(|| ValidationError::InvalidChannel("channel already exists".into()))?;
            return Ok(MessageBody::Countersignature { signatures: ours });
        }

        run.advance(Phase::Validating);
        let channel = StateChannel::setup(run.multisig, owners, self.config.network.identity_app);
        let (mut setup, mut free_balance) = self.setup_commitments(&channel);
        setup.add_signature_from(theirs[0], run.counterparty_address())?;
        free_balance.add_signature_from(theirs[1], run.counterparty_address())?;
        let ours = vec![self.sign(&mut setup)?, self.sign(&mut free_balance)?];

        run.advance(Phase::Committing);
        run.checkpoint()?;
        self.persist(&channel, vec![setup.to_stored()?, free_balance.to_stored()?])
            .await?;
        self.emit(Event::new(EventName::CreateChannel, run.multisig, run.process_id));
        Ok(MessageBody::Countersignature { signatures: ours })
    }
}
