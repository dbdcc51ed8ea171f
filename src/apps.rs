//! Application kinds the engine knows how to run.
//!
//! The set of apps is closed: each [AppKind] brings its own state type,
//! transition function, outcome and proposal validation. Which on-chain app
//! definition maps to which kind is resolved once from the configuration
//! into an [AppRegistry].

mod deposit;
mod registry;
mod tictactoe;
mod transfer;
mod withdraw;

use serde::{Deserialize, Serialize};

use crate::{
    abiencode::{keccak256, AbiEncode, Token},
    channel::{AppInstanceProposal, FreeBalanceState, InterpreterParams, Outcome, OutcomeType},
    error::ValidationError,
    Address, Hash, Signature, U256,
};

pub use deposit::DepositState;
pub use registry::AppRegistry;
pub use tictactoe::TicTacToeState;
pub use transfer::TransferState;
pub use withdraw::WithdrawState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    FreeBalance,
    UnidirectionalTransfer,
    TicTacToe,
    Deposit,
    Withdraw,
}

impl AppKind {
    pub fn outcome_type(self) -> OutcomeType {
        match self {
            AppKind::FreeBalance => OutcomeType::MultiAssetMultiPartyCoinTransfer,
            AppKind::TicTacToe => OutcomeType::TwoPartyFixedOutcome,
            AppKind::UnidirectionalTransfer | AppKind::Deposit | AppKind::Withdraw => {
                OutcomeType::SingleAssetTwoPartyCoinTransfer
            }
        }
    }

    /// Interpreter parameters for an app of this kind funded by `deposits`
    /// (`[initiator, responder]`).
    pub fn interpreter_params(
        self,
        players: [Address; 2],
        deposits: [(U256, Address); 2],
    ) -> Result<InterpreterParams, ValidationError> {
        if self == AppKind::FreeBalance {
            return Err(ValidationError::FreeBalanceNotModifiable);
        }
        let params = InterpreterParams::for_deposits(self.outcome_type(), players, deposits)?;
        match (self, params) {
            // Deposit apps pay out what arrived on chain, which is not
            // bounded by the (zero) deposits of the app itself.
            (AppKind::Deposit, InterpreterParams::SingleAssetTwoPartyCoinTransfer { token, .. }) => {
                Ok(InterpreterParams::SingleAssetTwoPartyCoinTransfer {
                    limit: U256::MAX,
                    token,
                })
            }
            (_, params) => Ok(params),
        }
    }

    /// Whether validating a proposal of this kind needs on-chain balances.
    pub fn needs_chain(self) -> bool {
        self == AppKind::Deposit
    }
}

/// On-chain view of a multisig for one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub multisig_balance: U256,
    pub total_amount_withdrawn: U256,
}

/// What a proposal is checked against besides its own content.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    pub proposal: &'a AppInstanceProposal,
    pub multisig_address: Address,
    pub chain: Option<ChainSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum AppState {
    FreeBalance(FreeBalanceState),
    UnidirectionalTransfer(TransferState),
    TicTacToe(TicTacToeState),
    Deposit(DepositState),
    Withdraw(WithdrawState),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppAction {
    SendMoney { amount: U256 },
    EndChannel,
    PlaceMark { x: u8, y: u8 },
    Withdraw { signature: Signature },
}

fn no_actions(kind: AppKind) -> ValidationError {
    ValidationError::InvalidAction(format!("{:?} apps take no actions", kind))
}

impl AppState {
    pub fn kind(&self) -> AppKind {
        match self {
            AppState::FreeBalance(_) => AppKind::FreeBalance,
            AppState::UnidirectionalTransfer(_) => AppKind::UnidirectionalTransfer,
            AppState::TicTacToe(_) => AppKind::TicTacToe,
            AppState::Deposit(_) => AppKind::Deposit,
            AppState::Withdraw(_) => AppKind::Withdraw,
        }
    }

    /// `keccak256(abi.encode(state))`
    pub fn state_hash(&self) -> Hash {
        keccak256(&self.abi_encode())
    }

    /// Deterministic transition function: the state after `actor` took
    /// `action`.
    pub fn apply_action(&self, action: &AppAction, actor: Address) -> Result<AppState, ValidationError> {
        match self {
            AppState::FreeBalance(_) => Err(ValidationError::FreeBalanceNotModifiable),
            AppState::UnidirectionalTransfer(s) => {
                s.apply(action, actor).map(AppState::UnidirectionalTransfer)
            }
            AppState::TicTacToe(s) => s.apply(action, actor).map(AppState::TicTacToe),
            AppState::Deposit(_) => Err(no_actions(AppKind::Deposit)),
            AppState::Withdraw(s) => s.apply(action, actor).map(AppState::Withdraw),
        }
    }

    /// Outcome of the app in its current state. Deposit apps need the current
    /// on-chain balance of the multisig.
    pub fn outcome(&self, chain: Option<ChainSnapshot>) -> Result<Outcome, ValidationError> {
        match self {
            AppState::FreeBalance(_) => Err(ValidationError::FreeBalanceNotModifiable),
            AppState::UnidirectionalTransfer(s) => Ok(s.outcome()),
            AppState::TicTacToe(s) => Ok(s.outcome()),
            AppState::Deposit(s) => {
                let chain = chain.ok_or_else(|| {
                    ValidationError::App("deposit outcome needs the multisig balance".into())
                })?;
                Ok(s.outcome(chain))
            }
            AppState::Withdraw(s) => Ok(s.outcome()),
        }
    }

    /// App specific checks of a proposed initial state.
    pub fn validate_initial(&self, ctx: &ProposalContext) -> Result<(), ValidationError> {
        match self {
            AppState::FreeBalance(_) => Err(ValidationError::FreeBalanceNotModifiable),
            AppState::UnidirectionalTransfer(s) => s.validate_initial(ctx),
            AppState::TicTacToe(s) => s.validate_initial(ctx),
            AppState::Deposit(s) => s.validate_initial(ctx),
            AppState::Withdraw(s) => s.validate_initial(ctx),
        }
    }
}

impl AbiEncode for AppState {
    fn to_token(&self) -> Token {
        match self {
            AppState::FreeBalance(s) => s.to_token(),
            AppState::UnidirectionalTransfer(s) => s.to_token(),
            AppState::TicTacToe(s) => s.to_token(),
            AppState::Deposit(s) => s.to_token(),
            AppState::Withdraw(s) => s.to_token(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_apps_are_not_limited_by_their_deposits() {
        let players = [Address([1; 20]), Address([2; 20])];
        let zero = [(U256::zero(), Address::zero()); 2];
        match AppKind::Deposit.interpreter_params(players, zero).unwrap() {
            InterpreterParams::SingleAssetTwoPartyCoinTransfer { limit, .. } => {
                assert_eq!(limit, U256::MAX)
            }
            other => panic!("unexpected params {:?}", other),
        }
        assert!(AppKind::FreeBalance.interpreter_params(players, zero).is_err());
    }

    #[test]
    fn state_json_is_tagged_by_kind() {
        let state = AppState::TicTacToe(TicTacToeState::new([Address([1; 20]), Address([2; 20])]));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["kind"], "tic_tac_toe");
        let back: AppState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn action_json_is_tagged_by_type() {
        let action: AppAction = serde_json::from_str(r#"{"type":"place_mark","x":1,"y":2}"#).unwrap();
        assert_eq!(action, AppAction::PlaceMark { x: 1, y: 2 });
    }
}
