//! Outcome interpreters: turning an app's final outcome into free balance
//! increments.
//!
//! Every app instance is installed with one [InterpreterParams] which bounds
//! what its outcome may pay out. The same parameters are ABI encoded into the
//! conditional transaction commitment so the on-chain interpreter applies the
//! exact same rules.

use serde::{Deserialize, Serialize};

use super::TokenIndexedBalances;
use crate::{
    abiencode::{AbiEncode, Token},
    config::NetworkContext,
    error::ValidationError,
    Address, U256,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinTransfer {
    pub to: Address,
    pub amount: U256,
}

impl CoinTransfer {
    pub fn new(to: Address, amount: impl Into<U256>) -> Self {
        Self {
            to,
            amount: amount.into(),
        }
    }
}

impl AbiEncode for CoinTransfer {
    fn to_token(&self) -> Token {
        Token::Tuple(vec![Token::Address(self.to), Token::Uint(self.amount)])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    TwoPartyFixedOutcome,
    SingleAssetTwoPartyCoinTransfer,
    MultiAssetMultiPartyCoinTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TwoPartyFixedOutcome {
    SendToAddrOne,
    SendToAddrTwo,
    SplitAndSendToBoth,
}

/// Outcome computed by an app from its latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    TwoPartyFixed(TwoPartyFixedOutcome),
    CoinTransfers(Vec<CoinTransfer>),
    /// One list of transfers per token, in the order of the interpreter's
    /// tokens.
    MultiAssetCoinTransfers(Vec<Vec<CoinTransfer>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterpreterParams {
    TwoPartyFixedOutcome {
        player_addrs: [Address; 2],
        amount: U256,
        token: Address,
    },
    SingleAssetTwoPartyCoinTransfer {
        limit: U256,
        token: Address,
    },
    MultiAssetMultiPartyCoinTransfer {
        limits: Vec<U256>,
        tokens: Vec<Address>,
    },
}

fn sum(a: U256, b: U256) -> Result<U256, ValidationError> {
    a.checked_add(b)
        .ok_or_else(|| ValidationError::App("deposit sum overflows".into()))
}

fn mismatch(outcome_type: OutcomeType) -> ValidationError {
    ValidationError::App(format!("outcome can not be interpreted as {:?}", outcome_type))
}

fn add_increment(
    increments: &mut TokenIndexedBalances,
    token: Address,
    to: Address,
    amount: U256,
) -> Result<(), ValidationError> {
    if amount.is_zero() {
        return Ok(());
    }
    let entry = increments.entry(token).or_default().entry(to).or_default();
    *entry = sum(*entry, amount)?;
    Ok(())
}

impl InterpreterParams {
    /// Build the interpreter parameters bounding an app funded by the given
    /// deposits. `players` is `[initiator, responder]`.
    pub fn for_deposits(
        outcome_type: OutcomeType,
        players: [Address; 2],
        deposits: [(U256, Address); 2],
    ) -> Result<Self, ValidationError> {
        let [(initiator_deposit, initiator_asset), (responder_deposit, responder_asset)] =
            deposits;
        let single_asset = initiator_asset == responder_asset;
        let total = sum(initiator_deposit, responder_deposit);

        match outcome_type {
            OutcomeType::TwoPartyFixedOutcome | OutcomeType::SingleAssetTwoPartyCoinTransfer
                if !single_asset =>
            {
                Err(ValidationError::App(format!(
                    "{:?} requires both deposits in the same asset",
                    outcome_type
                )))
            }
            OutcomeType::TwoPartyFixedOutcome => Ok(Self::TwoPartyFixedOutcome {
                player_addrs: players,
                amount: total?,
                token: initiator_asset,
            }),
            OutcomeType::SingleAssetTwoPartyCoinTransfer => {
                Ok(Self::SingleAssetTwoPartyCoinTransfer {
                    limit: total?,
                    token: initiator_asset,
                })
            }
            OutcomeType::MultiAssetMultiPartyCoinTransfer if single_asset => {
                Ok(Self::MultiAssetMultiPartyCoinTransfer {
                    limits: vec![total?],
                    tokens: vec![initiator_asset],
                })
            }
            OutcomeType::MultiAssetMultiPartyCoinTransfer => {
                Ok(Self::MultiAssetMultiPartyCoinTransfer {
                    limits: vec![initiator_deposit, responder_deposit],
                    tokens: vec![initiator_asset, responder_asset],
                })
            }
        }
    }

    pub fn outcome_type(&self) -> OutcomeType {
        match self {
            Self::TwoPartyFixedOutcome { .. } => OutcomeType::TwoPartyFixedOutcome,
            Self::SingleAssetTwoPartyCoinTransfer { .. } => {
                OutcomeType::SingleAssetTwoPartyCoinTransfer
            }
            Self::MultiAssetMultiPartyCoinTransfer { .. } => {
                OutcomeType::MultiAssetMultiPartyCoinTransfer
            }
        }
    }

    pub fn interpreter_address(&self, network: &NetworkContext) -> Address {
        match self {
            Self::TwoPartyFixedOutcome { .. } => network.two_party_fixed_outcome_interpreter,
            Self::SingleAssetTwoPartyCoinTransfer { .. } => {
                network.single_asset_two_party_coin_transfer_interpreter
            }
            Self::MultiAssetMultiPartyCoinTransfer { .. } => {
                network.multi_asset_multi_party_coin_transfer_interpreter
            }
        }
    }

    /// Resolve `outcome` into free balance increments, rejecting outcomes
    /// that pay out more than the interpreter allows.
    pub fn interpret(&self, outcome: &Outcome) -> Result<TokenIndexedBalances, ValidationError> {
        let mut increments = TokenIndexedBalances::new();
        match (self, outcome) {
            (
                Self::TwoPartyFixedOutcome {
                    player_addrs,
                    amount,
                    token,
                },
                Outcome::TwoPartyFixed(fixed),
            ) => match fixed {
                TwoPartyFixedOutcome::SendToAddrOne => {
                    add_increment(&mut increments, *token, player_addrs[0], *amount)?
                }
                TwoPartyFixedOutcome::SendToAddrTwo => {
                    add_increment(&mut increments, *token, player_addrs[1], *amount)?
                }
                TwoPartyFixedOutcome::SplitAndSendToBoth => {
                    let half = *amount / U256::from(2u64);
                    add_increment(&mut increments, *token, player_addrs[0], half)?;
                    add_increment(&mut increments, *token, player_addrs[1], *amount - half)?;
                }
            },
            (Self::SingleAssetTwoPartyCoinTransfer { limit, token }, Outcome::CoinTransfers(ts)) => {
                check_limit(ts, *limit)?;
                for t in ts {
                    add_increment(&mut increments, *token, t.to, t.amount)?;
                }
            }
            (
                Self::MultiAssetMultiPartyCoinTransfer { limits, tokens },
                Outcome::MultiAssetCoinTransfers(per_token),
            ) => {
                if per_token.len() != tokens.len() {
                    return Err(ValidationError::App(format!(
                        "outcome has {} assets, interpreter expects {}",
                        per_token.len(),
                        tokens.len()
                    )));
                }
                for ((ts, limit), token) in per_token.iter().zip(limits).zip(tokens) {
                    check_limit(ts, *limit)?;
                    for t in ts {
                        add_increment(&mut increments, *token, t.to, t.amount)?;
                    }
                }
            }
            _ => return Err(mismatch(self.outcome_type())),
        }
        Ok(increments)
    }
}

fn check_limit(transfers: &[CoinTransfer], limit: U256) -> Result<(), ValidationError> {
    let mut total = U256::zero();
    for t in transfers {
        total = sum(total, t.amount)?;
    }
    if total > limit {
        return Err(ValidationError::App(format!(
            "outcome pays out {}, limit is {}",
            total, limit
        )));
    }
    Ok(())
}

impl AbiEncode for InterpreterParams {
    fn to_token(&self) -> Token {
        match self {
            Self::TwoPartyFixedOutcome {
                player_addrs,
                amount,
                token,
            } => Token::Tuple(vec![
                Token::FixedArray(player_addrs.iter().map(AbiEncode::to_token).collect()),
                Token::Uint(*amount),
                Token::Address(*token),
            ]),
            Self::SingleAssetTwoPartyCoinTransfer { limit, token } => {
                Token::Tuple(vec![Token::Uint(*limit), Token::Address(*token)])
            }
            Self::MultiAssetMultiPartyCoinTransfer { limits, tokens } => Token::Tuple(vec![
                Token::Array(limits.iter().map(AbiEncode::to_token).collect()),
                Token::Array(tokens.iter().map(AbiEncode::to_token).collect()),
            ]),
        }
    }
}
