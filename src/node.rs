use std::{collections::BTreeMap, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    apps::AppAction,
    chain::ChainReader,
    channel::{AppInstance, AppInstanceProposal, StateChannel},
    config::{Config, ConfigError},
    error::{Result, ValidationError},
    events::Event,
    messages::{ProposeInstallParams, ProtocolMessage},
    middleware::{CollateralizationGuard, ValidationMiddleware},
    protocol::Engine,
    sig::{PublicIdentifier, Signer},
    store::Store,
    wire::{decode_frame, Messenger},
    Address, Hash, U256,
};

/// The main object of a channel node.
///
/// It holds the key used for signing, the collaborators for persistence,
/// messaging and chain reads, and everything needed to run protocols with
/// counterparties. Usually you only need one [CfCore] per key. It is cheap
/// to clone, clones share the same node.
#[derive(Debug, Clone)]
pub struct CfCore {
    engine: Arc<Engine>,
}

impl CfCore {
    /// Creates a new node. Fails if the app registry in `config` is invalid.
    pub fn new(
        signer: Signer,
        config: Config,
        store: Arc<dyn Store>,
        messenger: Arc<dyn Messenger>,
        chain: Arc<dyn ChainReader>,
    ) -> core::result::Result<Self, ConfigError> {
        let engine = Engine::new(signer, config, store, messenger, chain)?;
        info!(identifier = %engine.identifier, address = %engine.address(), "node started");
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn identifier(&self) -> PublicIdentifier {
        self.engine.identifier
    }

    /// Signer address of this node.
    pub fn address(&self) -> Address {
        self.engine.address()
    }

    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    /// Open a channel with `counterparty`. Running it again for an existing
    /// channel returns the stored channel.
    pub async fn create_channel(&self, counterparty: PublicIdentifier) -> Result<StateChannel> {
        self.engine.setup(counterparty).await
    }

    pub async fn propose_install(&self, params: ProposeInstallParams) -> Result<AppInstanceProposal> {
        self.engine.propose_install(params).await
    }

    pub async fn install(&self, multisig: Address, identity_hash: Hash) -> Result<AppInstance> {
        self.engine.install(multisig, identity_hash).await
    }

    pub async fn reject_install(&self, multisig: Address, identity_hash: Hash) -> Result<()> {
        self.engine.reject_install(multisig, identity_hash).await
    }

    /// Apply `action` to an installed app and return the app at its new
    /// version.
    pub async fn take_action(&self, multisig: Address, identity_hash: Hash, action: AppAction) -> Result<AppInstance> {
        self.engine.take_action(multisig, identity_hash, action).await
    }

    /// Remove an app and credit its outcome to the free balance. Returns the
    /// channel afterwards.
    pub async fn uninstall(&self, multisig: Address, identity_hash: Hash) -> Result<StateChannel> {
        self.engine.uninstall(multisig, identity_hash).await
    }

    /// Exchange snapshots with the counterparty and adopt whatever they can
    /// prove is newer.
    pub async fn sync(&self, multisig: Address) -> Result<StateChannel> {
        self.engine.sync(multisig).await
    }

    pub async fn get_state_channel(&self, multisig: Address) -> Result<StateChannel> {
        self.engine.load_channel(&multisig).await
    }

    /// Multisig addresses of all channels this node knows about.
    pub async fn get_state_channels(&self) -> Result<Vec<Address>> {
        Ok(self.engine.store.get_state_channels().await?)
    }

    pub async fn get_app_instance(&self, identity_hash: Hash) -> Result<AppInstance> {
        self.engine
            .store
            .get_app_instance(&identity_hash)
            .await?
            .ok_or_else(|| ValidationError::NoApp(identity_hash).into())
    }

    pub async fn get_app_instances(&self, multisig: Address) -> Result<Vec<AppInstance>> {
        Ok(self.get_state_channel(multisig).await?.app_instances().to_vec())
    }

    pub async fn get_proposed_app_instances(&self, multisig: Address) -> Result<Vec<AppInstanceProposal>> {
        Ok(self
            .get_state_channel(multisig)
            .await?
            .proposed_app_instances()
            .to_vec())
    }

    /// Free balance per participant address for one asset, ETH if `asset`
    /// is `None`.
    pub async fn get_free_balance_state(
        &self,
        multisig: Address,
        asset: Option<Address>,
    ) -> Result<BTreeMap<Address, U256>> {
        let asset = asset.unwrap_or_else(Address::zero);
        let channel = self.get_state_channel(multisig).await?;
        let fb = channel.free_balance_state();
        Ok(channel
            .participants()
            .into_iter()
            .map(|p| (p, fb.balance(&asset, &p)))
            .collect())
    }

    /// Feed one message from the counterparty into the node.
    pub fn handle_message(&self, msg: ProtocolMessage) -> Result<()> {
        self.engine.handle_message(msg)
    }

    /// Like [CfCore::handle_message], for a frame straight off the wire.
    pub fn handle_bytes(&self, frame: &[u8]) -> Result<()> {
        self.handle_message(decode_frame(frame)?)
    }

    /// Handle frames from `inbox` until it closes or the node shuts down.
    pub fn serve(&self, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        let node = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                if node.engine.is_shut_down() {
                    break;
                }
                if let Err(e) = node.handle_bytes(&frame) {
                    warn!(error = %e, "dropping inbound message");
                }
            }
            debug!(identifier = %node.identifier(), "inbox closed");
        })
    }

    /// Cancel running protocols at their next step and refuse new ones.
    pub fn shutdown(&self) {
        info!(identifier = %self.identifier(), "node shutting down");
        self.engine.shutdown();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.engine.events.subscribe()
    }

    /// Append a validation stage run before every protocol commits.
    pub fn use_middleware(&self, middleware: Arc<dyn ValidationMiddleware>) {
        self.engine.middleware.push(middleware);
    }

    /// Handle to mark deposits in progress, see [CollateralizationGuard].
    pub fn collateralization(&self) -> &CollateralizationGuard {
        &self.engine.collateralization
    }
}
