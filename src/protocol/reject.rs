//! RejectInstall: drop a proposal. One-way, the counterparty removes its copy
//! when the message arrives and does not answer.

use tracing::{debug, info};

use super::{
    context::{Engine, Run},
    Phase, ProtocolName,
};
use crate::{
    error::Result,
    events::{Event, EventName},
    messages::ProtocolParams,
    Address, Hash,
};

impl Engine {
    pub(crate) async fn reject_install(&self, multisig: Address, identity_hash: Hash) -> Result<()> {
        let counterparty = self.counterparty_of(&multisig).await?;
        self.initiate(
            ProtocolName::RejectInstall,
            counterparty,
            multisig,
            Some(identity_hash),
            move |run| self.run_reject_install(run, identity_hash),
        )
        .await
    }

    async fn run_reject_install(&self, mut run: Run<'_>, identity_hash: Hash) -> Result<()> {
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        let next = channel.remove_proposal(&identity_hash)?;

        run.advance(Phase::Committing);
        self.persist(&next, Vec::new()).await?;
        run.notify(ProtocolParams::RejectInstall {
            multisig_address: run.multisig,
            identity_hash,
        })
        .await?;
        info!(identity_hash = %identity_hash, "proposal rejected");
        self.emit(Event::new(EventName::RejectInstall, run.multisig, run.process_id).app(identity_hash, 0));
        Ok(())
    }

    pub(crate) async fn respond_reject_install(&self, run: &mut Run<'_>, identity_hash: Hash) -> Result<()> {
        let _guard = run.lock().await?;
        let channel = self.load_channel(&run.multisig).await?;
        self.check_counterparty(run, &channel)?;
        if !channel.has_proposal(&identity_hash) {
            debug!(identity_hash = %identity_hash, "rejected proposal is unknown");
            return Ok(());
        }

        run.advance(Phase::Committing);
        self.persist(&channel.remove_proposal(&identity_hash)?, Vec::new())
            .await?;
        self.emit(Event::new(EventName::RejectInstall, run.multisig, run.process_id).app(identity_hash, 0));
        Ok(())
    }
}
