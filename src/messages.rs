//! Messages exchanged between the two nodes of a channel.
//!
//! Every protocol run is identified by a `process_id`. The initiator sends
//! sequence number 1 ([MessageBody::Init]), the responder answers with
//! sequence number 2. RejectInstall is one-way.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    apps::{AppAction, AppState},
    channel::{AppInstanceProposal, StateChannelJson},
    commitment::StoredCommitment,
    sig::PublicIdentifier,
    Address, Hash, Signature, U256,
};

pub const SEQ_INIT: u8 = 1;
pub const SEQ_REPLY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProtocolName {
    Setup = 1,
    Propose = 2,
    Install = 3,
    RejectInstall = 4,
    TakeAction = 5,
    Uninstall = 6,
    Sync = 7,
}

impl ProtocolName {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => ProtocolName::Setup,
            2 => ProtocolName::Propose,
            3 => ProtocolName::Install,
            4 => ProtocolName::RejectInstall,
            5 => ProtocolName::TakeAction,
            6 => ProtocolName::Uninstall,
            7 => ProtocolName::Sync,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub process_id: Uuid,
    pub protocol: ProtocolName,
    pub seq: u8,
    pub from: PublicIdentifier,
    pub to: PublicIdentifier,
    pub body: MessageBody,
}

impl ProtocolMessage {
    pub fn is_init(&self) -> bool {
        self.seq == SEQ_INIT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// First message of a run: what to do plus the initiator's signatures on
    /// the resulting commitments.
    Init {
        params: ProtocolParams,
        signatures: Vec<Signature>,
    },
    /// Responder's signatures, in the same order as in [MessageBody::Init].
    Countersignature { signatures: Vec<Signature> },
    /// Responder's (reconciled) view of the channel during a sync.
    Snapshot(Box<SyncSnapshot>),
    Rejection { reason: String, busy: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolParams {
    Setup {
        multisig_address: Address,
    },
    Propose {
        proposal: Box<AppInstanceProposal>,
    },
    Install {
        multisig_address: Address,
        identity_hash: Hash,
        /// Free balance version after the install.
        free_balance_version: u64,
    },
    RejectInstall {
        multisig_address: Address,
        identity_hash: Hash,
    },
    TakeAction {
        multisig_address: Address,
        identity_hash: Hash,
        action: AppAction,
        /// App version after the action.
        version: u64,
    },
    Uninstall {
        multisig_address: Address,
        identity_hash: Hash,
        /// Free balance version after the uninstall.
        free_balance_version: u64,
    },
    Sync {
        snapshot: Box<SyncSnapshot>,
    },
}

impl ProtocolParams {
    pub fn protocol(&self) -> ProtocolName {
        match self {
            ProtocolParams::Setup { .. } => ProtocolName::Setup,
            ProtocolParams::Propose { .. } => ProtocolName::Propose,
            ProtocolParams::Install { .. } => ProtocolName::Install,
            ProtocolParams::RejectInstall { .. } => ProtocolName::RejectInstall,
            ProtocolParams::TakeAction { .. } => ProtocolName::TakeAction,
            ProtocolParams::Uninstall { .. } => ProtocolName::Uninstall,
            ProtocolParams::Sync { .. } => ProtocolName::Sync,
        }
    }

    pub fn multisig_address(&self) -> Address {
        match self {
            ProtocolParams::Setup { multisig_address }
            | ProtocolParams::Install { multisig_address, .. }
            | ProtocolParams::RejectInstall { multisig_address, .. }
            | ProtocolParams::TakeAction { multisig_address, .. }
            | ProtocolParams::Uninstall { multisig_address, .. } => *multisig_address,
            ProtocolParams::Propose { proposal } => proposal.identity.multisig_address,
            ProtocolParams::Sync { snapshot } => snapshot.channel.multisig_address,
        }
    }

    pub fn identity_hash(&self) -> Option<Hash> {
        match self {
            ProtocolParams::Install { identity_hash, .. }
            | ProtocolParams::RejectInstall { identity_hash, .. }
            | ProtocolParams::TakeAction { identity_hash, .. }
            | ProtocolParams::Uninstall { identity_hash, .. } => Some(*identity_hash),
            ProtocolParams::Propose { proposal } => Some(proposal.identity_hash),
            ProtocolParams::Setup { .. } | ProtocolParams::Sync { .. } => None,
        }
    }
}

/// A channel plus every commitment needed to prove it: the setup commitment,
/// the latest free balance set-state, for each app its conditional
/// transaction and latest set-state, and each proposal's initial set-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub channel: StateChannelJson,
    pub commitments: Vec<StoredCommitment>,
}

/// What the initiator of a Propose asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeInstallParams {
    pub multisig_address: Address,
    pub app_definition: Address,
    pub initial_state: AppState,
    pub initiator_deposit: U256,
    pub initiator_deposit_asset_id: Address,
    pub responder_deposit: U256,
    pub responder_deposit_asset_id: Address,
    pub default_timeout: u64,
    pub state_timeout: u64,
}
