//! Two nodes in one process: open a channel, fund it through deposit apps,
//! play a game of tic tac toe for a stake and settle it.
//!
//! Run with `RUST_LOG=cf_core=debug` to follow the protocol runs.

use std::{error::Error, sync::Arc};

use cf_core::{
    apps::{AppAction, AppKind, AppState, DepositState, TicTacToeState},
    chain::{ChainReader, MemoryChain},
    config::{AppRegistryEntry, NetworkContext},
    messages::ProposeInstallParams,
    store::MemoryStore,
    wire::MemoryNetwork,
    Address, CfCore, Config, Signer, U256,
};
use rand::{rngs::StdRng, SeedableRng};
use tracing_subscriber::EnvFilter;

const ETH: Address = Address([0; 20]);
const TICTACTOE: Address = Address([0xd2; 20]);
const DEPOSIT: Address = Address([0xd3; 20]);

fn config() -> Config {
    Config {
        network: NetworkContext {
            identity_app: Address([0xaa; 20]),
            ..NetworkContext::default()
        },
        apps: vec![
            AppRegistryEntry {
                kind: AppKind::TicTacToe,
                definition: TICTACTOE,
            },
            AppRegistryEntry {
                kind: AppKind::Deposit,
                definition: DEPOSIT,
            },
        ],
        ..Config::default()
    }
}

fn start(net: &MemoryNetwork, chain: &Arc<MemoryChain>, signer: Signer) -> Result<CfCore, Box<dyn Error>> {
    let (messenger, inbox) = net.connect(signer.public_identifier());
    let node = CfCore::new(
        signer,
        config(),
        Arc::new(MemoryStore::new()),
        Arc::new(messenger),
        chain.clone(),
    )?;
    node.serve(inbox);
    Ok(node)
}

fn params(multisig: Address, app_definition: Address, initial_state: AppState, stake: u64) -> ProposeInstallParams {
    ProposeInstallParams {
        multisig_address: multisig,
        app_definition,
        initial_state,
        initiator_deposit: stake.into(),
        initiator_deposit_asset_id: ETH,
        responder_deposit: stake.into(),
        responder_deposit_asset_id: ETH,
        default_timeout: 100,
        state_timeout: 10,
    }
}

async fn deposit(
    node: &CfCore,
    peer: &CfCore,
    chain: &MemoryChain,
    multisig: Address,
    amount: u64,
) -> Result<(), Box<dyn Error>> {
    let now = chain.snapshot(&multisig, &ETH).await?;
    let state = DepositState::new(node.address(), peer.address(), multisig, ETH, now);
    let proposal = node
        .propose_install(params(multisig, DEPOSIT, AppState::Deposit(state), 0))
        .await?;
    node.install(multisig, proposal.identity_hash).await?;
    chain.deposit(multisig, ETH, amount);
    node.uninstall(multisig, proposal.identity_hash).await?;
    Ok(())
}

async fn print_balances(node: &CfCore, multisig: Address) -> Result<(), Box<dyn Error>> {
    for (owner, amount) in node.get_free_balance_state(multisig, None).await? {
        println!("  {}: {}", owner, amount);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = StdRng::seed_from_u64(0);
    let net = MemoryNetwork::new();
    let chain = Arc::new(MemoryChain::new());
    let alice = start(&net, &chain, Signer::new(&mut rng))?;
    let bob = start(&net, &chain, Signer::new(&mut rng))?;

    let multisig = alice.create_channel(bob.identifier()).await?.multisig_address();
    println!("channel {} open", multisig);

    deposit(&alice, &bob, &chain, multisig, 10).await?;
    deposit(&bob, &alice, &chain, multisig, 10).await?;
    println!("funded:");
    print_balances(&alice, multisig).await?;

    let players = [alice.address(), bob.address()];
    let game = alice
        .propose_install(params(
            multisig,
            TICTACTOE,
            AppState::TicTacToe(TicTacToeState::new(players)),
            3,
        ))
        .await?;
    bob.install(multisig, game.identity_hash).await?;

    let moves = [(0, 0), (1, 1), (0, 1), (2, 2), (0, 2)];
    for (turn, (x, y)) in moves.into_iter().enumerate() {
        let player = if turn % 2 == 0 { &alice } else { &bob };
        let app = player
            .take_action(multisig, game.identity_hash, AppAction::PlaceMark { x, y })
            .await?;
        println!("move {} at ({}, {}), version {}", turn + 1, x, y, app.latest_version());
    }

    bob.uninstall(multisig, game.identity_hash).await?;
    println!("settled:");
    print_balances(&bob, multisig).await?;

    let fb = alice.get_free_balance_state(multisig, None).await?;
    assert_eq!(fb[&alice.address()], U256::from(13u64));

    alice.shutdown();
    bob.shutdown();
    Ok(())
}
