//! State channel data model.
//!
//! A [StateChannel] owns its [AppInstance]s (including the free balance app)
//! and its pending [AppInstanceProposal]s. All transitions are copy-on-write.

mod app_instance;
mod free_balance;
mod json;
mod outcome;
mod proposal;
mod state_channel;

use std::collections::BTreeMap;

use crate::{Address, U256};

pub use app_instance::{AppIdentity, AppInstance, Deposits, FREE_BALANCE_DEFAULT_TIMEOUT};
pub use free_balance::FreeBalanceState;
pub use json::{StateChannelJson, SCHEMA_VERSION};
pub use outcome::{CoinTransfer, InterpreterParams, Outcome, OutcomeType, TwoPartyFixedOutcome};
pub use proposal::AppInstanceProposal;
pub use state_channel::{derive_multisig_address, StateChannel};

/// ID (Index) of a participant in the channel.
///
/// `0` is the participant that initiated the setup.
pub type PartID = usize;

/// Channels always have exactly two participants.
pub const PARTICIPANTS: usize = 2;

/// token -> owner -> amount
pub type TokenIndexedBalances = BTreeMap<Address, BTreeMap<Address, U256>>;
