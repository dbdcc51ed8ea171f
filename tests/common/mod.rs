//! Two nodes on an in-memory network sharing one in-memory chain.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use cf_core::{
    apps::{AppKind, AppState, ChainSnapshot, DepositState, TicTacToeState, TransferState, WithdrawState},
    chain::{ChainReader, MemoryChain},
    channel::CoinTransfer,
    config::{AppRegistryEntry, NetworkContext},
    events::{Event, EventName},
    messages::ProposeInstallParams,
    store::{MemoryStore, Store},
    wire::MemoryNetwork,
    Address, CfCore, Config, Hash, Signature, Signer, U256,
};
use rand::{rngs::StdRng, SeedableRng};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing_subscriber::EnvFilter;

pub const ETH: Address = Address([0; 20]);
pub const IDENTITY_APP: Address = Address([0xaa; 20]);
pub const TRANSFER_APP: Address = Address([0xd1; 20]);
pub const TICTACTOE_APP: Address = Address([0xd2; 20]);
pub const DEPOSIT_APP: Address = Address([0xd3; 20]);
pub const WITHDRAW_APP: Address = Address([0xd4; 20]);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> Config {
    Config {
        network: NetworkContext {
            identity_app: IDENTITY_APP,
            challenge_registry: Address([0xc0; 20]),
            conditional_transaction_delegate_target: Address([0xc1; 20]),
            ..NetworkContext::default()
        },
        apps: vec![
            AppRegistryEntry {
                kind: AppKind::UnidirectionalTransfer,
                definition: TRANSFER_APP,
            },
            AppRegistryEntry {
                kind: AppKind::TicTacToe,
                definition: TICTACTOE_APP,
            },
            AppRegistryEntry {
                kind: AppKind::Deposit,
                definition: DEPOSIT_APP,
            },
            AppRegistryEntry {
                kind: AppKind::Withdraw,
                definition: WITHDRAW_APP,
            },
        ],
        protocol_timeout_ms: 500,
        ..Config::default()
    }
}

pub struct Node {
    pub core: CfCore,
    pub signer: Signer,
    pub store: Arc<MemoryStore>,
    pub task: JoinHandle<()>,
}

impl Node {
    pub fn address(&self) -> Address {
        self.core.address()
    }
}

pub struct Pair {
    pub net: MemoryNetwork,
    pub chain: Arc<MemoryChain>,
    pub a: Node,
    pub b: Node,
}

/// Puts something in front of a node's [MemoryStore].
pub type StoreWrapper = fn(Arc<MemoryStore>) -> Arc<dyn Store>;

fn node(net: &MemoryNetwork, chain: &Arc<MemoryChain>, signer: Signer, config: Config, wrap: StoreWrapper) -> Node {
    let (messenger, inbox) = net.connect(signer.public_identifier());
    let store = Arc::new(MemoryStore::new());
    let core = CfCore::new(
        signer.clone(),
        config,
        wrap(store.clone()),
        Arc::new(messenger),
        chain.clone(),
    )
    .unwrap();
    let task = core.serve(inbox);
    Node {
        core,
        signer,
        store,
        task,
    }
}

fn plain(store: Arc<MemoryStore>) -> Arc<dyn Store> {
    store
}

impl Pair {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, plain)
    }

    /// `a` reads and writes through `wrap(store)`.
    pub fn with_store_of_a(wrap: StoreWrapper) -> Self {
        Self::build(config(), wrap)
    }

    fn build(config: Config, wrap_a: StoreWrapper) -> Self {
        init_tracing();
        let mut rng = StdRng::seed_from_u64(42);
        let net = MemoryNetwork::new();
        let chain = Arc::new(MemoryChain::new());
        let a = node(&net, &chain, Signer::new(&mut rng), config.clone(), wrap_a);
        let b = node(&net, &chain, Signer::new(&mut rng), config, plain);
        Self { net, chain, a, b }
    }

    /// Channel opened by `a`.
    pub async fn open(&self) -> Address {
        self.a
            .core
            .create_channel(self.b.core.identifier())
            .await
            .unwrap()
            .multisig_address()
    }

    /// The other node of the pair.
    pub fn peer(&self, node: &Node) -> &Node {
        if node.address() == self.a.address() {
            &self.b
        } else {
            &self.a
        }
    }

    /// Move `amount` ETH into the channel for `depositor` through a deposit
    /// app: install it, fund the multisig on chain, uninstall it.
    pub async fn deposit(&self, depositor: &Node, multisig: Address, amount: u64) {
        let counterparty = self.peer(depositor).address();
        let start = self.chain.snapshot(&multisig, &ETH).await.unwrap();
        let proposal = depositor
            .core
            .propose_install(deposit_params(multisig, depositor.address(), counterparty, start))
            .await
            .unwrap();
        depositor.core.install(multisig, proposal.identity_hash).await.unwrap();
        self.chain.deposit(multisig, ETH, amount);
        depositor.core.uninstall(multisig, proposal.identity_hash).await.unwrap();
    }

    pub async fn balances(&self, node: &Node, multisig: Address) -> [U256; 2] {
        let fb = node.core.get_free_balance_state(multisig, None).await.unwrap();
        [fb[&self.a.address()], fb[&self.b.address()]]
    }
}

pub fn deposit_params(
    multisig: Address,
    depositor: Address,
    counterparty: Address,
    start: ChainSnapshot,
) -> ProposeInstallParams {
    ProposeInstallParams {
        multisig_address: multisig,
        app_definition: DEPOSIT_APP,
        initial_state: AppState::Deposit(DepositState::new(depositor, counterparty, multisig, ETH, start)),
        initiator_deposit: U256::zero(),
        initiator_deposit_asset_id: ETH,
        responder_deposit: U256::zero(),
        responder_deposit_asset_id: ETH,
        default_timeout: 100,
        state_timeout: 10,
    }
}

pub fn tictactoe_params(multisig: Address, players: [Address; 2], stake: u64) -> ProposeInstallParams {
    ProposeInstallParams {
        multisig_address: multisig,
        app_definition: TICTACTOE_APP,
        initial_state: AppState::TicTacToe(TicTacToeState::new(players)),
        initiator_deposit: stake.into(),
        initiator_deposit_asset_id: ETH,
        responder_deposit: stake.into(),
        responder_deposit_asset_id: ETH,
        default_timeout: 100,
        state_timeout: 10,
    }
}

/// One-way payment of up to `amount` from `sender` to `receiver`.
pub fn transfer_params(multisig: Address, sender: Address, receiver: Address, amount: u64) -> ProposeInstallParams {
    ProposeInstallParams {
        multisig_address: multisig,
        app_definition: TRANSFER_APP,
        initial_state: AppState::UnidirectionalTransfer(TransferState::new(
            CoinTransfer::new(sender, amount),
            CoinTransfer::new(receiver, 0u64),
        )),
        initiator_deposit: amount.into(),
        initiator_deposit_asset_id: ETH,
        responder_deposit: U256::zero(),
        responder_deposit_asset_id: ETH,
        default_timeout: 100,
        state_timeout: 10,
    }
}

/// `withdrawer` takes `amount` out of the channel once `counterparty`
/// countersigns `data`.
pub fn withdraw_params(
    multisig: Address,
    withdrawer: &Signer,
    counterparty: Address,
    data: Hash,
    amount: u64,
) -> ProposeInstallParams {
    let state = WithdrawState {
        transfers: [
            CoinTransfer::new(withdrawer.address(), amount),
            CoinTransfer::new(counterparty, 0u64),
        ],
        signatures: [withdrawer.sign_eth(data).unwrap(), Signature::zero()],
        signers: [withdrawer.address(), counterparty],
        data,
        nonce: Hash([7; 32]),
        finalized: false,
    };
    ProposeInstallParams {
        multisig_address: multisig,
        app_definition: WITHDRAW_APP,
        initial_state: AppState::Withdraw(state),
        initiator_deposit: amount.into(),
        initiator_deposit_asset_id: ETH,
        responder_deposit: U256::zero(),
        responder_deposit_asset_id: ETH,
        default_timeout: 100,
        state_timeout: 10,
    }
}

pub async fn proposal_hashes(node: &Node, multisig: Address) -> Vec<Hash> {
    node.core
        .get_proposed_app_instances(multisig)
        .await
        .unwrap()
        .iter()
        .map(|p| p.identity_hash)
        .collect()
}

/// First event called `name`, skipping everything before it.
pub async fn next_event(events: &mut broadcast::Receiver<Event>, name: EventName) -> Event {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if event.name == name => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream broken: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} event", name.as_str()))
}
