//! Serialized form of a [StateChannel], as handed to the store and sent
//! during sync.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{
    app_instance::AppInstance, proposal::AppInstanceProposal, state_channel::StateChannel,
    PARTICIPANTS,
};
use crate::{apps::AppKind, error::ValidationError, sig::PublicIdentifier, Address};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChannelJson {
    pub schema_version: u32,
    pub multisig_address: Address,
    pub user_identifiers: [PublicIdentifier; PARTICIPANTS],
    pub num_proposed_apps: u64,
    pub free_balance_app_instance: AppInstance,
    pub app_instances: Vec<AppInstance>,
    pub proposed_app_instances: Vec<AppInstanceProposal>,
}

impl From<&StateChannel> for StateChannelJson {
    fn from(value: &StateChannel) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            multisig_address: value.multisig_address,
            user_identifiers: value.user_identifiers,
            num_proposed_apps: value.num_proposed_apps,
            free_balance_app_instance: value.free_balance.clone(),
            app_instances: value.app_instances.clone(),
            proposed_app_instances: value.proposed_app_instances.clone(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ValidationError {
    ValidationError::InvalidChannel(msg.into())
}

impl TryFrom<StateChannelJson> for StateChannel {
    type Error = ValidationError;

    /// Checks everything that must hold for a channel we are willing to
    /// operate on: a single free balance app, consistent identity hashes, and
    /// every installed app funded by the free balance.
    fn try_from(value: StateChannelJson) -> Result<Self, Self::Error> {
        if value.schema_version != SCHEMA_VERSION {
            return Err(invalid(format!(
                "unsupported schema version {}",
                value.schema_version
            )));
        }
        // Nonce 0 belongs to the free balance.
        if value.num_proposed_apps == 0 {
            return Err(invalid("app counter must start at 1"));
        }
        let participants = value.user_identifiers.map(|id| id.signer_address());
        if participants[0] == participants[1] {
            return Err(invalid("both participants are the same"));
        }

        let belongs_to_channel = |app: &AppInstance| {
            app.has_consistent_identity()
                && app.multisig_address() == value.multisig_address
                && app.identity().participants == participants
        };

        let fb = &value.free_balance_app_instance;
        let fb_state = match fb.free_balance_state() {
            Some(state) if belongs_to_channel(fb) && fb.identity().channel_nonce == 0 => state,
            _ => return Err(invalid("invalid free balance app")),
        };

        let mut seen = BTreeSet::new();
        for app in &value.app_instances {
            if !belongs_to_channel(app) || app.kind() == AppKind::FreeBalance {
                return Err(invalid(format!("invalid app instance {}", app.identity_hash())));
            }
            if !fb_state.is_active(&app.identity_hash()) {
                return Err(invalid(format!(
                    "app {} is not funded by the free balance",
                    app.identity_hash()
                )));
            }
            if !seen.insert(app.identity_hash()) {
                return Err(invalid(format!("duplicate app {}", app.identity_hash())));
            }
        }
        if seen.len() != fb_state.active_apps().len() {
            return Err(invalid("free balance funds apps that are not installed"));
        }

        for p in &value.proposed_app_instances {
            if !p.is_consistent()
                || p.identity.multisig_address != value.multisig_address
                || p.identity.participants != participants
                || p.app_nonce() >= value.num_proposed_apps
            {
                return Err(invalid(format!("invalid proposal {}", p.identity_hash)));
            }
            if !seen.insert(p.identity_hash) {
                return Err(invalid(format!(
                    "proposal {} is already installed",
                    p.identity_hash
                )));
            }
        }

        Ok(StateChannel {
            multisig_address: value.multisig_address,
            user_identifiers: value.user_identifiers,
            num_proposed_apps: value.num_proposed_apps,
            app_instances: value.app_instances,
            proposed_app_instances: value.proposed_app_instances,
            free_balance: value.free_balance_app_instance,
        })
    }
}
