//! Shared machinery of all protocol runs: the [Engine] owning the node's
//! collaborators and the per-run [Run] context (phases, mailbox, timeout,
//! cancellation).

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};
use uuid::Uuid;

use super::{Phase, ProtocolName, Role};
use crate::{
    apps::{AppRegistry, AppState, ChainSnapshot},
    chain::ChainReader,
    channel::{StateChannel, StateChannelJson},
    commitment::{Commitment, CommitmentKey, StateHashCache, StoredCommitment},
    config::{Config, ConfigError},
    error::{AbortReason, Error, Result, SignatureError, ValidationError},
    events::{Event, EventBus, EventName},
    lock::{ChannelGuard, ChannelLocks, LockHolder},
    messages::{MessageBody, ProtocolMessage, ProtocolParams, SEQ_INIT, SEQ_REPLY},
    middleware::{AppKindValidation, CollateralizationGuard, MiddlewarePipeline, ValidationMiddleware},
    sig::{self, PublicIdentifier, Signer},
    store::Store,
    wire::Messenger,
    Address, Hash, Signature,
};

type Mailboxes = Mutex<HashMap<Uuid, oneshot::Sender<ProtocolMessage>>>;

/// App a run is about. Shared between the attempts of one initiator run, so
/// the failure event can name an app that only became known mid-run.
type AppSlot = Arc<Mutex<Option<Hash>>>;

/// Everything a protocol run needs. One per node, shared between the public
/// API and the tasks answering the counterparty.
pub(crate) struct Engine {
    pub(crate) signer: Signer,
    pub(crate) identifier: PublicIdentifier,
    pub(crate) config: Arc<Config>,
    pub(crate) registry: AppRegistry,
    pub(crate) store: Arc<dyn Store>,
    messenger: Arc<dyn Messenger>,
    chain: Arc<dyn ChainReader>,
    pub(crate) locks: ChannelLocks,
    pub(crate) middleware: MiddlewarePipeline,
    pub(crate) collateralization: Arc<CollateralizationGuard>,
    pub(crate) events: EventBus,
    pub(crate) cache: StateHashCache,
    mailboxes: Mailboxes,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("identifier", &self.identifier)
            .field("messenger", &self.messenger)
            .field("middleware", &self.middleware)
            .field("waiting_runs", &self.mailboxes.lock().len())
            .finish()
    }
}

impl Engine {
    pub(crate) fn new(
        signer: Signer,
        config: Config,
        store: Arc<dyn Store>,
        messenger: Arc<dyn Messenger>,
        chain: Arc<dyn ChainReader>,
    ) -> core::result::Result<Self, ConfigError> {
        let config = Arc::new(config);
        let registry = AppRegistry::from_config(&config)?;
        let collateralization = Arc::new(CollateralizationGuard::new());
        let stages: Vec<Arc<dyn ValidationMiddleware>> = vec![
            Arc::new(AppKindValidation::new(registry.clone(), config.clone())),
            collateralization.clone(),
        ];
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            identifier: signer.public_identifier(),
            signer,
            registry,
            store,
            messenger,
            chain,
            locks: ChannelLocks::new(),
            middleware: MiddlewarePipeline::new(stages),
            collateralization,
            events: EventBus::new(config.event_capacity),
            cache: StateHashCache::new(config.state_hash_cache_size),
            mailboxes: Mutex::new(HashMap::new()),
            shutdown,
            config,
        })
    }

    pub(crate) fn address(&self) -> Address {
        self.signer.address()
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [Engine::shutdown] was called.
    async fn cancelled(&self) {
        let mut rx = self.shutdown.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as the engine.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Entry point for everything the counterparty sends. Opening messages
    /// start a responder task, replies go to the run waiting for them.
    pub(crate) fn handle_message(self: &Arc<Self>, msg: ProtocolMessage) -> Result<()> {
        if msg.to != self.identifier {
            return Err(ValidationError::IdentifierMismatch(format!(
                "message for {} delivered to {}",
                msg.to, self.identifier
            ))
            .into());
        }
        trace!(process_id = %msg.process_id, protocol = ?msg.protocol, seq = msg.seq, from = %msg.from, "received");

        match msg.seq {
            SEQ_INIT => {
                if let MessageBody::Init { params, .. } = &msg.body {
                    self.events.emit(Event::new(
                        EventName::ProtocolMessage,
                        params.multisig_address(),
                        msg.process_id,
                    ));
                }
                let engine = Arc::clone(self);
                tokio::spawn(async move { engine.respond(msg).await });
            }
            SEQ_REPLY => match self.mailboxes.lock().remove(&msg.process_id) {
                Some(mailbox) => {
                    if mailbox.send(msg).is_err() {
                        debug!("run finished before its reply arrived");
                    }
                }
                None => {
                    debug!(process_id = %msg.process_id, protocol = ?msg.protocol, "no run waiting for this reply, dropped")
                }
            },
            _ => return Err(AbortReason::UnexpectedMessage.into()),
        }
        Ok(())
    }

    async fn respond(&self, msg: ProtocolMessage) {
        let ProtocolMessage {
            process_id,
            protocol,
            from,
            body,
            ..
        } = msg;
        let (params, signatures) = match body {
            MessageBody::Init { params, signatures } if params.protocol() == protocol => {
                (params, signatures)
            }
            _ => {
                warn!(process_id = %process_id, protocol = ?protocol, "malformed opening message, ignored");
                return;
            }
        };
        let multisig = params.multisig_address();
        let identity_hash = params.identity_hash();
        let app = Arc::new(Mutex::new(identity_hash));
        let mut run = Run::new(self, protocol, process_id, Role::Responder, from, multisig, app);
        let span = run.span();

        async move {
            let result = match params {
                ProtocolParams::Setup { .. } => self.respond_setup(&mut run, &signatures).await.map(Some),
                ProtocolParams::Propose { proposal } => {
                    self.respond_propose(&mut run, *proposal, &signatures).await.map(Some)
                }
                ProtocolParams::Install {
                    identity_hash,
                    free_balance_version,
                    ..
                } => self
                    .respond_install(&mut run, identity_hash, free_balance_version, &signatures)
                    .await
                    .map(Some),
                ProtocolParams::RejectInstall { identity_hash, .. } => self
                    .respond_reject_install(&mut run, identity_hash)
                    .await
                    .map(|()| None),
                ProtocolParams::TakeAction {
                    identity_hash,
                    action,
                    version,
                    ..
                } => self
                    .respond_take_action(&mut run, identity_hash, action, version, &signatures)
                    .await
                    .map(Some),
                ProtocolParams::Uninstall {
                    identity_hash,
                    free_balance_version,
                    ..
                } => self
                    .respond_uninstall(&mut run, identity_hash, free_balance_version, &signatures)
                    .await
                    .map(Some),
                ProtocolParams::Sync { snapshot } => {
                    self.respond_sync(&mut run, *snapshot).await.map(Some)
                }
            };

            match result {
                Ok(reply) => {
                    if let Some(reply) = reply {
                        if let Err(e) = run.reply(reply).await {
                            // Committed anyway: a retry gets the same
                            // countersignatures, a sync repairs the rest.
                            warn!(error = %e, "reply not delivered");
                        }
                    }
                    run.finish();
                }
                Err(e) => {
                    run.abort(&e);
                    if !e.is_retryable() {
                        self.emit_failure(protocol, multisig, identity_hash, process_id, &e);
                    }
                    if protocol != ProtocolName::RejectInstall {
                        let rejection = MessageBody::Rejection {
                            reason: e.to_string(),
                            busy: e.is_retryable(),
                        };
                        if let Err(e) = run.reply(rejection).await {
                            warn!(error = %e, "rejection not delivered");
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run an initiator protocol, retrying (with linear backoff) while the
    /// counterparty answers busy. Emits the failure event if it finally
    /// fails.
    pub(crate) async fn initiate<'a, T, F, Fut>(
        &'a self,
        protocol: ProtocolName,
        counterparty: PublicIdentifier,
        multisig: Address,
        identity_hash: Option<Hash>,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(Run<'a>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let process_id = Uuid::new_v4();
        let app: AppSlot = Arc::new(Mutex::new(identity_hash));
        let mut retries = 0;
        let result = loop {
            let run = Run::new(
                self,
                protocol,
                process_id,
                Role::Initiator,
                counterparty,
                multisig,
                app.clone(),
            );
            let span = run.span();
            let outcome = match run.checkpoint() {
                Ok(()) => attempt(run).instrument(span).await,
                Err(e) => Err(e),
            };
            match outcome {
                Err(e) if e.is_retryable() && retries < self.config.busy_retries => {
                    retries += 1;
                    let backoff = self.config.busy_backoff() * retries;
                    debug!(process_id = %process_id, retries, ?backoff, "counterparty busy, backing off");
                    tokio::time::sleep(backoff).await;
                }
                other => break other,
            }
        };
        if let Err(e) = &result {
            warn!(process_id = %process_id, protocol = ?protocol, multisig = %multisig, error = %e, "protocol failed");
            let identity_hash = *app.lock();
            self.emit_failure(protocol, multisig, identity_hash, process_id, e);
        }
        result
    }

    pub(crate) async fn find_channel(&self, multisig: &Address) -> Result<Option<StateChannel>> {
        match self.store.get_state_channel(multisig).await? {
            Some(json) => Ok(Some(StateChannel::try_from(json)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn load_channel(&self, multisig: &Address) -> Result<StateChannel> {
        self.find_channel(multisig)
            .await?
            .ok_or_else(|| ValidationError::NoChannel(*multisig).into())
    }

    pub(crate) fn counterparty_in(&self, channel: &StateChannel) -> Result<PublicIdentifier> {
        channel.counterparty_of(&self.identifier).ok_or_else(|| {
            ValidationError::IdentifierMismatch(format!(
                "{} is not a participant of {}",
                self.identifier,
                channel.multisig_address()
            ))
            .into()
        })
    }

    pub(crate) async fn counterparty_of(&self, multisig: &Address) -> Result<PublicIdentifier> {
        let channel = self.load_channel(multisig).await?;
        self.counterparty_in(&channel)
    }

    /// The sender of an opening message must be our counterparty on the
    /// channel it refers to.
    pub(crate) fn check_counterparty(&self, run: &Run<'_>, channel: &StateChannel) -> Result<()> {
        if self.counterparty_in(channel)? != run.counterparty {
            return Err(ValidationError::IdentifierMismatch(format!(
                "{} is not our counterparty on {}",
                run.counterparty,
                channel.multisig_address()
            ))
            .into());
        }
        Ok(())
    }

    pub(crate) async fn persist(&self, channel: &StateChannel, commitments: Vec<StoredCommitment>) -> Result<()> {
        self.store
            .save_state_channel(StateChannelJson::from(channel), commitments)
            .await?;
        Ok(())
    }

    pub(crate) fn sign(&self, commitment: &mut impl Commitment) -> Result<Signature> {
        Ok(commitment.sign(&self.signer)?)
    }

    /// On-chain balances for apps whose outcome or validation depends on
    /// them.
    pub(crate) async fn chain_snapshot(&self, state: &AppState) -> Result<Option<ChainSnapshot>> {
        match state {
            AppState::Deposit(s) => Ok(Some(self.chain.snapshot(&s.multisig_address, &s.asset_id).await?)),
            _ => Ok(None),
        }
    }

    /// Decide whether an incoming `received` version can be applied on top
    /// of `local`.
    ///
    /// `Ok(None)`: it is the next version. `Ok(Some(sigs))`: we already
    /// committed exactly these commitments, answer with our stored
    /// signatures instead of applying the change again.
    pub(crate) async fn check_version(
        &self,
        run: &Run<'_>,
        identity_hash: Hash,
        received: u64,
        local: u64,
        keys: &[CommitmentKey],
        theirs: &[Signature],
    ) -> Result<Option<Vec<Signature>>> {
        if received == local + 1 {
            return Ok(None);
        }
        if received > local + 1 {
            return Err(Error::OutOfSync {
                identity_hash,
                received,
                local,
            });
        }
        match self.replay(keys, theirs, run.counterparty_address()).await? {
            Some(ours) => Ok(Some(ours)),
            None => Err(Error::StaleVersion {
                identity_hash,
                received,
                local,
            }),
        }
    }

    async fn replay(&self, keys: &[CommitmentKey], theirs: &[Signature], from: Address) -> Result<Option<Vec<Signature>>> {
        let mut ours = Vec::with_capacity(keys.len());
        for (key, theirs) in keys.iter().zip(theirs) {
            let stored = match self.store.get_commitment(key).await? {
                Some(stored) => stored,
                None => return Ok(None),
            };
            if sig::verify(stored.hash_to_sign, *theirs, from).is_err() {
                return Ok(None);
            }
            match stored.signed_by(self.address()) {
                Some(sig) => ours.push(sig),
                None => return Ok(None),
            }
        }
        debug!(commitments = keys.len(), "already committed, replaying countersignatures");
        Ok(Some(ours))
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.emit(event);
    }

    fn emit_failure(
        &self,
        protocol: ProtocolName,
        multisig: Address,
        identity_hash: Option<Hash>,
        process_id: Uuid,
        error: &Error,
    ) {
        let name = match protocol {
            ProtocolName::Setup => EventName::SetupFailed,
            ProtocolName::Propose => EventName::ProposeInstallFailed,
            ProtocolName::Install => EventName::InstallFailed,
            ProtocolName::RejectInstall => EventName::RejectInstallFailed,
            ProtocolName::TakeAction => EventName::UpdateStateFailed,
            ProtocolName::Uninstall => EventName::UninstallFailed,
            ProtocolName::Sync => EventName::SyncFailed,
        };
        let mut event = Event::new(name, multisig, process_id).failed(error);
        event.identity_hash = identity_hash;
        self.events.emit(event);
    }
}

/// Removes the mailbox of a run when the run ends, however it ends.
struct Mailbox<'e> {
    engine: &'e Engine,
    process_id: Uuid,
}

impl Drop for Mailbox<'_> {
    fn drop(&mut self) {
        self.engine.mailboxes.lock().remove(&self.process_id);
    }
}

/// One protocol run, seen from one side.
pub(crate) struct Run<'e> {
    engine: &'e Engine,
    pub(crate) process_id: Uuid,
    pub(crate) protocol: ProtocolName,
    pub(crate) role: Role,
    pub(crate) counterparty: PublicIdentifier,
    pub(crate) multisig: Address,
    app: AppSlot,
    phase: Phase,
    span: Span,
}

impl<'e> Run<'e> {
    fn new(
        engine: &'e Engine,
        protocol: ProtocolName,
        process_id: Uuid,
        role: Role,
        counterparty: PublicIdentifier,
        multisig: Address,
        app: AppSlot,
    ) -> Self {
        let span = info_span!("protocol", protocol = ?protocol, role = ?role, process_id = %process_id, multisig = %multisig);
        Self {
            engine,
            process_id,
            protocol,
            role,
            counterparty,
            multisig,
            app,
            phase: Phase::Initiated,
            span,
        }
    }

    pub(crate) fn span(&self) -> Span {
        self.span.clone()
    }

    /// Name the app this run is about once it is known.
    pub(crate) fn bind_app(&self, identity_hash: Hash) {
        *self.app.lock() = Some(identity_hash);
    }

    pub(crate) fn counterparty_address(&self) -> Address {
        self.counterparty.signer_address()
    }

    pub(crate) fn advance(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    fn finish(&mut self) {
        self.advance(Phase::Complete);
        info!("protocol complete");
    }

    fn abort(&mut self, error: &Error) {
        self.advance(Phase::Aborted);
        warn!(error = %error, "protocol aborted");
    }

    /// Cancellation point: fails once the node is shutting down.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.engine.is_shut_down() {
            return Err(AbortReason::Cancelled.into());
        }
        Ok(())
    }

    /// Take the channel lock.
    ///
    /// A responder whose own initiator run holds the lock does not wait if
    /// its signer address sorts first: it tells the counterparty to back off
    /// instead, so two crossing runs never wait for each other. One-way
    /// messages always wait, there is nobody to tell.
    pub(crate) async fn lock(&self) -> Result<ChannelGuard> {
        self.checkpoint()?;
        let locks = &self.engine.locks;
        if self.role == Role::Responder && self.protocol != ProtocolName::RejectInstall {
            if let Some(holder) = locks.holder(&self.multisig) {
                if holder.role == Role::Initiator && self.engine.address() < self.counterparty_address() {
                    debug!(holder = %holder.process_id, "channel busy with our own run");
                    return Err(AbortReason::CounterpartyBusy.into());
                }
            }
        }
        let holder = LockHolder {
            process_id: self.process_id,
            role: self.role,
        };
        Ok(locks.acquire(self.multisig, holder).await)
    }

    fn message(&self, seq: u8, body: MessageBody) -> ProtocolMessage {
        ProtocolMessage {
            process_id: self.process_id,
            protocol: self.protocol,
            seq,
            from: self.engine.identifier,
            to: self.counterparty,
            body,
        }
    }

    /// Send the opening message and wait for the reply. Rejections come
    /// back as errors.
    pub(crate) async fn request(&mut self, params: ProtocolParams, signatures: Vec<Signature>) -> Result<MessageBody> {
        self.checkpoint()?;
        let (tx, rx) = oneshot::channel();
        self.engine.mailboxes.lock().insert(self.process_id, tx);
        let _mailbox = Mailbox {
            engine: self.engine,
            process_id: self.process_id,
        };

        self.advance(Phase::AwaitingCounterparty);
        self.engine
            .messenger
            .send(self.message(SEQ_INIT, MessageBody::Init { params, signatures }))
            .await?;

        let timeout = self.engine.config.protocol_timeout();
        let reply: core::result::Result<ProtocolMessage, AbortReason> = tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(AbortReason::Cancelled),
                Err(_) => Err(AbortReason::Timeout),
            },
            _ = self.engine.cancelled() => Err(AbortReason::Cancelled),
        };
        let reply = reply?;

        if reply.from != self.counterparty || reply.protocol != self.protocol {
            warn!(from = %reply.from, protocol = ?reply.protocol, "reply does not belong to this run");
            return Err(AbortReason::UnexpectedMessage.into());
        }
        self.advance(Phase::Validating);
        match reply.body {
            MessageBody::Rejection { busy: true, .. } => Err(AbortReason::CounterpartyBusy.into()),
            MessageBody::Rejection { reason, .. } => Err(AbortReason::Rejected(reason).into()),
            MessageBody::Init { .. } => Err(AbortReason::UnexpectedMessage.into()),
            body => Ok(body),
        }
    }

    /// One-way message, nothing comes back.
    pub(crate) async fn notify(&mut self, params: ProtocolParams) -> Result<()> {
        self.checkpoint()?;
        self.engine
            .messenger
            .send(self.message(
                SEQ_INIT,
                MessageBody::Init {
                    params,
                    signatures: Vec::new(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn reply(&self, body: MessageBody) -> Result<()> {
        self.engine.messenger.send(self.message(SEQ_REPLY, body)).await?;
        Ok(())
    }
}

/// Countersignatures from a reply, exactly as many as we sent.
pub(crate) fn countersignatures(body: MessageBody, expected: usize) -> Result<Vec<Signature>> {
    match body {
        MessageBody::Countersignature { signatures } if signatures.len() == expected => Ok(signatures),
        MessageBody::Countersignature { signatures } => Err(SignatureError::WrongCount {
            expected,
            actual: signatures.len(),
        }
        .into()),
        _ => Err(AbortReason::UnexpectedMessage.into()),
    }
}

pub(crate) fn expect_signatures(signatures: &[Signature], expected: usize) -> Result<()> {
    if signatures.len() != expected {
        return Err(SignatureError::WrongCount {
            expected,
            actual: signatures.len(),
        }
        .into());
    }
    Ok(())
}
