//! Apps that were proposed, but not installed yet.

use serde::{Deserialize, Serialize};

use super::{
    app_instance::{AppIdentity, AppInstance, Deposits},
    outcome::InterpreterParams,
};
use crate::{apps::AppState, sig::PublicIdentifier, Hash};

/// Record of a proposed app, exchanged during Propose and stored by both
/// sides until it is installed or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstanceProposal {
    pub identity: AppIdentity,
    pub identity_hash: Hash,
    pub initial_state: AppState,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    pub deposits: Deposits,
    pub state_timeout: u64,
    pub interpreter_params: InterpreterParams,
}

impl AppInstanceProposal {
    pub fn new(
        identity: AppIdentity,
        initial_state: AppState,
        identifiers: [PublicIdentifier; 2],
        deposits: Deposits,
        state_timeout: u64,
        interpreter_params: InterpreterParams,
    ) -> Self {
        Self {
            identity_hash: identity.identity_hash(),
            identity,
            initial_state,
            initiator_identifier: identifiers[0],
            responder_identifier: identifiers[1],
            deposits,
            state_timeout,
            interpreter_params,
        }
    }

    pub fn app_nonce(&self) -> u64 {
        self.identity.channel_nonce
    }

    /// The app this proposal turns into once installed, at version 0.
    pub fn to_app_instance(&self) -> AppInstance {
        AppInstance::new(
            self.identity.clone(),
            self.initial_state.clone(),
            0,
            self.state_timeout,
            self.interpreter_params.clone(),
            self.deposits,
        )
    }

    /// Whether the proposal is internally consistent: the identity hash
    /// matches the identity and the deposits belong to the identifiers.
    pub fn is_consistent(&self) -> bool {
        self.identity.identity_hash() == self.identity_hash
            && self.deposits.initiator == self.initiator_identifier.signer_address()
            && self.deposits.responder == self.responder_identifier.signer_address()
    }
}
