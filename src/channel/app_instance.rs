use serde::{Deserialize, Serialize};

use super::{free_balance::FreeBalanceState, outcome::InterpreterParams, PARTICIPANTS};
use crate::{
    abiencode::{keccak256_packed, AbiEncode, Packed, Token},
    apps::{AppKind, AppState},
    Address, Hash, U256,
};

/// Timeout used for the free balance app, which is never challenged on
/// its own.
pub const FREE_BALANCE_DEFAULT_TIMEOUT: u64 = 172_800;

/// Everything that makes an app instance unique. Never changes after the app
/// was proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub multisig_address: Address,
    pub channel_nonce: u64,
    pub participants: [Address; PARTICIPANTS],
    pub app_definition: Address,
    pub default_timeout: u64,
}

impl AppIdentity {
    pub fn identity_hash(&self) -> Hash {
        let participants = keccak256_packed(&[Packed::AddressArray(&self.participants)]);
        keccak256_packed(&[
            Packed::Address(self.multisig_address),
            Packed::Uint256(self.channel_nonce.into()),
            Packed::Bytes32(participants),
            Packed::Address(self.app_definition),
            Packed::Uint256(self.default_timeout.into()),
        ])
    }
}

impl AbiEncode for AppIdentity {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.multisig_address),
            Token::uint(self.channel_nonce),
            Token::Array(self.participants.iter().map(AbiEncode::to_token).collect()),
            Token::Address(self.app_definition),
            Token::uint(self.default_timeout),
        ])
    }
}

/// What each side put into an app when it was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposits {
    pub initiator: Address,
    pub initiator_deposit: U256,
    pub initiator_deposit_asset_id: Address,
    pub responder: Address,
    pub responder_deposit: U256,
    pub responder_deposit_asset_id: Address,
}

impl Deposits {
    pub fn none(participants: [Address; PARTICIPANTS]) -> Self {
        Self {
            initiator: participants[0],
            initiator_deposit: U256::zero(),
            initiator_deposit_asset_id: Address::zero(),
            responder: participants[1],
            responder_deposit: U256::zero(),
            responder_deposit_asset_id: Address::zero(),
        }
    }

    /// `(owner, amount, asset)` for both sides.
    pub fn entries(&self) -> [(Address, U256, Address); 2] {
        [
            (
                self.initiator,
                self.initiator_deposit,
                self.initiator_deposit_asset_id,
            ),
            (
                self.responder,
                self.responder_deposit,
                self.responder_deposit_asset_id,
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    identity: AppIdentity,
    identity_hash: Hash,
    latest_state: AppState,
    latest_version: u64,
    state_timeout: u64,
    interpreter_params: InterpreterParams,
    deposits: Deposits,
}

impl AppInstance {
    pub fn new(
        identity: AppIdentity,
        state: AppState,
        version: u64,
        state_timeout: u64,
        interpreter_params: InterpreterParams,
        deposits: Deposits,
    ) -> Self {
        Self {
            identity_hash: identity.identity_hash(),
            identity,
            latest_state: state,
            latest_version: version,
            state_timeout,
            interpreter_params,
            deposits,
        }
    }

    pub(crate) fn free_balance(
        multisig_address: Address,
        participants: [Address; PARTICIPANTS],
        identity_app: Address,
    ) -> Self {
        let identity = AppIdentity {
            multisig_address,
            channel_nonce: 0,
            participants,
            app_definition: identity_app,
            default_timeout: FREE_BALANCE_DEFAULT_TIMEOUT,
        };
        Self::new(
            identity,
            AppState::FreeBalance(FreeBalanceState::new(participants)),
            0,
            FREE_BALANCE_DEFAULT_TIMEOUT,
            InterpreterParams::MultiAssetMultiPartyCoinTransfer {
                limits: Vec::new(),
                tokens: Vec::new(),
            },
            Deposits::none(participants),
        )
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn identity_hash(&self) -> Hash {
        self.identity_hash
    }

    pub fn multisig_address(&self) -> Address {
        self.identity.multisig_address
    }

    pub fn app_definition(&self) -> Address {
        self.identity.app_definition
    }

    pub fn kind(&self) -> AppKind {
        self.latest_state.kind()
    }

    pub fn latest_state(&self) -> &AppState {
        &self.latest_state
    }

    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    pub fn state_timeout(&self) -> u64 {
        self.state_timeout
    }

    pub fn interpreter_params(&self) -> &InterpreterParams {
        &self.interpreter_params
    }

    pub fn deposits(&self) -> &Deposits {
        &self.deposits
    }

    pub fn state_hash(&self) -> Hash {
        self.latest_state.state_hash()
    }

    pub fn free_balance_state(&self) -> Option<&FreeBalanceState> {
        match &self.latest_state {
            AppState::FreeBalance(fb) => Some(fb),
            _ => None,
        }
    }

    /// New version of this app with `state` at `version`. The identity stays
    /// the same.
    pub fn with_state(&self, state: AppState, version: u64) -> Self {
        Self {
            latest_state: state,
            latest_version: version,
            ..self.clone()
        }
    }

    /// Whether the stored identity hash belongs to the stored identity.
    pub(crate) fn has_consistent_identity(&self) -> bool {
        self.identity.identity_hash() == self.identity_hash
    }
}
