//! Validation gates.
//!
//! Before committing to a Propose, an Install or an Uninstall, both sides run
//! the [MiddlewarePipeline]. Middlewares only read: any error aborts the run
//! at that gate, before anything is signed or persisted.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::{
    apps::{AppKind, AppRegistry, AppState, ChainSnapshot, ProposalContext},
    channel::{AppInstance, AppInstanceProposal, StateChannel},
    config::Config,
    error::{AbortReason, Error, ValidationError},
    messages::ProtocolName,
    protocol::Role,
    Address,
};

/// What a middleware gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct MiddlewareContext<'a> {
    pub protocol: ProtocolName,
    pub role: Role,
    /// Signer address of this node.
    pub me: Address,
    /// Channel before the protocol's change.
    pub channel: &'a StateChannel,
    /// Set for Propose and Install.
    pub proposal: Option<&'a AppInstanceProposal>,
    /// Set for Uninstall.
    pub app: Option<&'a AppInstance>,
    /// On-chain balances, for apps that need them.
    pub chain: Option<ChainSnapshot>,
}

#[async_trait]
pub trait ValidationMiddleware: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, ctx: &MiddlewareContext<'_>) -> Result<(), Error>;
}

/// Ordered list of middlewares. The built-in app kind validation always runs
/// first.
pub struct MiddlewarePipeline {
    stages: RwLock<Vec<Arc<dyn ValidationMiddleware>>>,
}

impl core::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<String> = self.stages.read().iter().map(|m| m.name().to_string()).collect();
        f.debug_struct("MiddlewarePipeline").field("stages", &names).finish()
    }
}

impl MiddlewarePipeline {
    pub fn new(stages: Vec<Arc<dyn ValidationMiddleware>>) -> Self {
        Self {
            stages: RwLock::new(stages),
        }
    }

    pub fn push(&self, middleware: Arc<dyn ValidationMiddleware>) {
        self.stages.write().push(middleware);
    }

    pub async fn run(&self, ctx: &MiddlewareContext<'_>) -> Result<(), Error> {
        let stages = self.stages.read().clone();
        for stage in stages {
            if let Err(e) = stage.validate(ctx).await {
                warn!(middleware = stage.name(), protocol = ?ctx.protocol, role = ?ctx.role, error = %e, "vetoed");
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Checks a proposal against the app registry: known definition, state of
/// the matching kind, supported assets, interpreter parameters derived from
/// the deposits and the app's own checks of its initial state.
#[derive(Debug)]
pub struct AppKindValidation {
    registry: AppRegistry,
    config: Arc<Config>,
}

impl AppKindValidation {
    pub fn new(registry: AppRegistry, config: Arc<Config>) -> Self {
        Self { registry, config }
    }

    fn check_proposal(&self, ctx: &MiddlewareContext<'_>, p: &AppInstanceProposal) -> Result<(), ValidationError> {
        let definition = p.identity.app_definition;
        let kind = self.registry.resolve(&definition)?;
        if kind == AppKind::FreeBalance {
            return Err(ValidationError::FreeBalanceNotModifiable);
        }
        if p.initial_state.kind() != kind {
            return Err(ValidationError::StateKindMismatch(definition));
        }
        let d = &p.deposits;
        for asset in [d.initiator_deposit_asset_id, d.responder_deposit_asset_id] {
            if !self.config.is_supported_token(&asset) {
                return Err(ValidationError::UnsupportedAsset(asset));
            }
        }
        let expected = kind.interpreter_params(
            [d.initiator, d.responder],
            [
                (d.initiator_deposit, d.initiator_deposit_asset_id),
                (d.responder_deposit, d.responder_deposit_asset_id),
            ],
        )?;
        if expected != p.interpreter_params {
            return Err(ValidationError::App(format!(
                "interpreter params do not match a {:?} app",
                kind
            )));
        }
        if kind.needs_chain() && ctx.chain.is_none() {
            return Err(ValidationError::App(format!("{:?} apps need the chain", kind)));
        }
        p.initial_state.validate_initial(&ProposalContext {
            proposal: p,
            multisig_address: ctx.channel.multisig_address(),
            chain: ctx.chain,
        })
    }
}

#[async_trait]
impl ValidationMiddleware for AppKindValidation {
    fn name(&self) -> &str {
        "app_kind"
    }

    async fn validate(&self, ctx: &MiddlewareContext<'_>) -> Result<(), Error> {
        match (ctx.protocol, ctx.proposal) {
            (ProtocolName::Propose, Some(p)) => self.check_proposal(ctx, p)?,
            // The definition may have been dropped from the registry since
            // the proposal was accepted.
            (ProtocolName::Install, Some(p)) => {
                self.registry.resolve(&p.identity.app_definition)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Tracks ongoing collateralizations and vetoes uninstalling a deposit app of
/// ours while one is active for the same multisig and asset.
#[derive(Debug, Default)]
pub struct CollateralizationGuard {
    active: Mutex<HashSet<(Address, Address)>>,
}

impl CollateralizationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a collateralization was already active.
    pub fn start(&self, multisig: Address, asset: Address) -> bool {
        self.active.lock().insert((multisig, asset))
    }

    pub fn finish(&self, multisig: Address, asset: Address) {
        self.active.lock().remove(&(multisig, asset));
    }

    pub fn is_active(&self, multisig: &Address, asset: &Address) -> bool {
        self.active.lock().contains(&(*multisig, *asset))
    }
}

#[async_trait]
impl ValidationMiddleware for CollateralizationGuard {
    fn name(&self) -> &str {
        "collateralization"
    }

    async fn validate(&self, ctx: &MiddlewareContext<'_>) -> Result<(), Error> {
        if ctx.protocol != ProtocolName::Uninstall || ctx.role != Role::Responder {
            return Ok(());
        }
        if let Some(AppState::Deposit(state)) = ctx.app.map(AppInstance::latest_state) {
            if state.depositor() == ctx.me && self.is_active(&ctx.channel.multisig_address(), &state.asset_id) {
                return Err(AbortReason::Middleware(
                    "Cannot uninstall deposit app with active collateralization".into(),
                )
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apps::DepositState,
        channel::{
            tests::{proposal, two_identifiers},
            Deposits, InterpreterParams, OutcomeType,
        },
        config::AppRegistryEntry,
        U256,
    };

    const TRANSFER_APP: Address = Address([0xd1; 20]);
    const DEPOSIT_APP: Address = Address([0xd2; 20]);

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.apps = vec![
            AppRegistryEntry {
                kind: AppKind::UnidirectionalTransfer,
                definition: TRANSFER_APP,
            },
            AppRegistryEntry {
                kind: AppKind::Deposit,
                definition: DEPOSIT_APP,
            },
        ];
        Arc::new(config)
    }

    fn validation() -> AppKindValidation {
        let config = config();
        AppKindValidation::new(AppRegistry::from_config(&config).unwrap(), config)
    }

    fn channel() -> StateChannel {
        StateChannel::setup(Address([0xaa; 20]), two_identifiers(), Address([0xee; 20]))
    }

    fn ctx<'a>(
        protocol: ProtocolName,
        role: Role,
        channel: &'a StateChannel,
        proposal: Option<&'a AppInstanceProposal>,
    ) -> MiddlewareContext<'a> {
        MiddlewareContext {
            protocol,
            role,
            me: channel.participants()[0],
            channel,
            proposal,
            app: None,
            chain: None,
        }
    }

    #[tokio::test]
    async fn valid_transfer_proposal_passes() {
        let ch = channel();
        let p = proposal(&ch, 1, 0);
        validation()
            .validate(&ctx(ProtocolName::Propose, Role::Responder, &ch, Some(&p)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_definition_and_assets_are_rejected() {
        let ch = channel();
        let mut p = proposal(&ch, 1, 0);
        p.identity.app_definition = Address([0x99; 20]);
        let err = validation()
            .validate(&ctx(ProtocolName::Propose, Role::Initiator, &ch, Some(&p)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnknownAppDefinition(_))));

        let mut p = proposal(&ch, 1, 0);
        p.deposits.responder_deposit_asset_id = Address([0x42; 20]);
        let err = validation()
            .validate(&ctx(ProtocolName::Propose, Role::Initiator, &ch, Some(&p)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnsupportedAsset(_))));
    }

    #[tokio::test]
    async fn state_must_match_the_definition() {
        let ch = channel();
        let mut p = proposal(&ch, 1, 0);
        p.identity.app_definition = DEPOSIT_APP;
        let err = validation()
            .validate(&ctx(ProtocolName::Propose, Role::Initiator, &ch, Some(&p)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::StateKindMismatch(_))));
    }

    #[tokio::test]
    async fn inflated_interpreter_limit_is_rejected() {
        let ch = channel();
        let mut p = proposal(&ch, 1, 0);
        p.interpreter_params = InterpreterParams::SingleAssetTwoPartyCoinTransfer {
            limit: U256::from(100u64),
            token: Address::zero(),
        };
        assert!(validation()
            .validate(&ctx(ProtocolName::Propose, Role::Responder, &ch, Some(&p)))
            .await
            .is_err());
    }

    fn deposit_app(ch: &StateChannel) -> AppInstance {
        let [a, b] = ch.participants();
        let state = AppState::Deposit(DepositState::new(
            a,
            b,
            ch.multisig_address(),
            Address::zero(),
            ChainSnapshot::default(),
        ));
        let mut p = proposal(ch, 0, 0);
        p.identity.app_definition = DEPOSIT_APP;
        p.initial_state = state;
        p.deposits = Deposits::none([a, b]);
        p.interpreter_params = InterpreterParams::for_deposits(
            OutcomeType::SingleAssetTwoPartyCoinTransfer,
            [a, b],
            [(U256::zero(), Address::zero()); 2],
        )
        .unwrap();
        p.to_app_instance()
    }

    #[tokio::test]
    async fn uninstall_during_collateralization_is_vetoed() {
        let ch = channel();
        let app = deposit_app(&ch);
        let guard = CollateralizationGuard::new();
        let mut c = ctx(ProtocolName::Uninstall, Role::Responder, &ch, None);
        c.app = Some(&app);

        guard.validate(&c).await.unwrap();
        assert!(guard.start(ch.multisig_address(), Address::zero()));
        let err = guard.validate(&c).await.unwrap_err();
        assert!(err.to_string().contains("Cannot uninstall deposit app with active collateralization"));

        // the initiator side is not guarded
        c.role = Role::Initiator;
        guard.validate(&c).await.unwrap();

        guard.finish(ch.multisig_address(), Address::zero());
        c.role = Role::Responder;
        guard.validate(&c).await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_stops_at_first_veto() {
        struct Veto;
        #[async_trait]
        impl ValidationMiddleware for Veto {
            fn name(&self) -> &str {
                "veto"
            }
            async fn validate(&self, _: &MiddlewareContext<'_>) -> Result<(), Error> {
                Err(AbortReason::Middleware("no".into()).into())
            }
        }

        let ch = channel();
        let p = proposal(&ch, 0, 0);
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(validation())]);
        let c = ctx(ProtocolName::Propose, Role::Initiator, &ch, Some(&p));
        pipeline.run(&c).await.unwrap();

        pipeline.push(Arc::new(Veto));
        assert!(matches!(
            pipeline.run(&c).await,
            Err(Error::Abort(AbortReason::Middleware(_)))
        ));
    }
}
