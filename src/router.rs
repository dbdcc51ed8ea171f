//! Method call surface for clients that talk JSON to the node.
//!
//! A [MethodRequest] names one public operation of [CfCore] together with
//! its parameters, [RequestRouter::dispatch] runs it and wraps the result in
//! the matching [MethodResponse].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    apps::AppAction,
    channel::{AppInstance, AppInstanceProposal, StateChannelJson},
    error::Result,
    messages::ProposeInstallParams,
    sig::PublicIdentifier,
    Address, CfCore, Hash, U256,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum MethodRequest {
    #[serde(rename = "chan_create")]
    CreateChannel { counterparty: PublicIdentifier },
    #[serde(rename = "chan_proposeInstall")]
    ProposeInstall(ProposeInstallParams),
    #[serde(rename = "chan_install")]
    Install { multisig_address: Address, identity_hash: Hash },
    #[serde(rename = "chan_rejectInstall")]
    RejectInstall { multisig_address: Address, identity_hash: Hash },
    #[serde(rename = "chan_takeAction")]
    TakeAction {
        multisig_address: Address,
        identity_hash: Hash,
        action: AppAction,
    },
    #[serde(rename = "chan_uninstall")]
    Uninstall { multisig_address: Address, identity_hash: Hash },
    #[serde(rename = "chan_sync")]
    Sync { multisig_address: Address },
    #[serde(rename = "chan_getStateChannel")]
    GetStateChannel { multisig_address: Address },
    #[serde(rename = "chan_getAppInstance")]
    GetAppInstance { identity_hash: Hash },
    #[serde(rename = "chan_getAppInstances")]
    GetAppInstances { multisig_address: Address },
    #[serde(rename = "chan_getProposedAppInstances")]
    GetProposedAppInstances { multisig_address: Address },
    #[serde(rename = "chan_getFreeBalanceState")]
    GetFreeBalanceState {
        multisig_address: Address,
        #[serde(default)]
        asset_id: Option<Address>,
    },
}

impl MethodRequest {
    pub fn method(&self) -> &'static str {
        match self {
            MethodRequest::CreateChannel { .. } => "chan_create",
            MethodRequest::ProposeInstall(_) => "chan_proposeInstall",
            MethodRequest::Install { .. } => "chan_install",
            MethodRequest::RejectInstall { .. } => "chan_rejectInstall",
            MethodRequest::TakeAction { .. } => "chan_takeAction",
            MethodRequest::Uninstall { .. } => "chan_uninstall",
            MethodRequest::Sync { .. } => "chan_sync",
            MethodRequest::GetStateChannel { .. } => "chan_getStateChannel",
            MethodRequest::GetAppInstance { .. } => "chan_getAppInstance",
            MethodRequest::GetAppInstances { .. } => "chan_getAppInstances",
            MethodRequest::GetProposedAppInstances { .. } => "chan_getProposedAppInstances",
            MethodRequest::GetFreeBalanceState { .. } => "chan_getFreeBalanceState",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "result")]
pub enum MethodResponse {
    #[serde(rename = "chan_create")]
    CreateChannel(StateChannelJson),
    #[serde(rename = "chan_proposeInstall")]
    ProposeInstall(AppInstanceProposal),
    #[serde(rename = "chan_install")]
    Install(AppInstance),
    #[serde(rename = "chan_rejectInstall")]
    RejectInstall,
    #[serde(rename = "chan_takeAction")]
    TakeAction(AppInstance),
    #[serde(rename = "chan_uninstall")]
    Uninstall(StateChannelJson),
    #[serde(rename = "chan_sync")]
    Sync(StateChannelJson),
    #[serde(rename = "chan_getStateChannel")]
    GetStateChannel(StateChannelJson),
    #[serde(rename = "chan_getAppInstance")]
    GetAppInstance(AppInstance),
    #[serde(rename = "chan_getAppInstances")]
    GetAppInstances(Vec<AppInstance>),
    #[serde(rename = "chan_getProposedAppInstances")]
    GetProposedAppInstances(Vec<AppInstanceProposal>),
    #[serde(rename = "chan_getFreeBalanceState")]
    GetFreeBalanceState(BTreeMap<Address, U256>),
}

/// Runs [MethodRequest]s against one node.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    node: CfCore,
}

impl RequestRouter {
    pub fn new(node: CfCore) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &CfCore {
        &self.node
    }

    pub async fn dispatch(&self, request: MethodRequest) -> Result<MethodResponse> {
        debug!(method = request.method(), "dispatching");
        let node = &self.node;
        let response = match request {
            MethodRequest::CreateChannel { counterparty } => {
                MethodResponse::CreateChannel((&node.create_channel(counterparty).await?).into())
            }
            MethodRequest::ProposeInstall(params) => MethodResponse::ProposeInstall(node.propose_install(params).await?),
            MethodRequest::Install {
                multisig_address,
                identity_hash,
            } => MethodResponse::Install(node.install(multisig_address, identity_hash).await?),
            MethodRequest::RejectInstall {
                multisig_address,
                identity_hash,
            } => {
                node.reject_install(multisig_address, identity_hash).await?;
                MethodResponse::RejectInstall
            }
            MethodRequest::TakeAction {
                multisig_address,
                identity_hash,
                action,
            } => MethodResponse::TakeAction(node.take_action(multisig_address, identity_hash, action).await?),
            MethodRequest::Uninstall {
                multisig_address,
                identity_hash,
            } => MethodResponse::Uninstall((&node.uninstall(multisig_address, identity_hash).await?).into()),
            MethodRequest::Sync { multisig_address } => {
                MethodResponse::Sync((&node.sync(multisig_address).await?).into())
            }
            MethodRequest::GetStateChannel { multisig_address } => {
                MethodResponse::GetStateChannel((&node.get_state_channel(multisig_address).await?).into())
            }
            MethodRequest::GetAppInstance { identity_hash } => {
                MethodResponse::GetAppInstance(node.get_app_instance(identity_hash).await?)
            }
            MethodRequest::GetAppInstances { multisig_address } => {
                MethodResponse::GetAppInstances(node.get_app_instances(multisig_address).await?)
            }
            MethodRequest::GetProposedAppInstances { multisig_address } => {
                MethodResponse::GetProposedAppInstances(node.get_proposed_app_instances(multisig_address).await?)
            }
            MethodRequest::GetFreeBalanceState {
                multisig_address,
                asset_id,
            } => MethodResponse::GetFreeBalanceState(node.get_free_balance_state(multisig_address, asset_id).await?),
        };
        Ok(response)
    }
}
