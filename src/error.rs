//! Error taxonomy of the engine.
//!
//! Everything a protocol run can fail with ends up in [Error]. The lower
//! layers keep their own small enums ([crate::wire::WireError],
//! [crate::store::StoreError], [crate::chain::ChainError]) and convert into
//! it with `?`.

use thiserror::Error;

use crate::{chain::ChainError, store::StoreError, wire::WireError, Address, Hash, U256};

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or disallowed parameters. The protocol never started.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The run was aborted. Nothing was committed.
    #[error("protocol aborted: {0}")]
    Abort(#[from] AbortReason),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("stale version for {identity_hash}: received {received}, local is {local}")]
    StaleVersion {
        identity_hash: Hash,
        received: u64,
        local: u64,
    },
    #[error("out of sync on {identity_hash}: received {received}, local is {local}")]
    OutOfSync {
        identity_hash: Hash,
        received: u64,
        local: u64,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Both parties hold different states under the same version.
    #[error("conflicting states at the same version for {0}")]
    SyncConflict(Hash),
}

impl Error {
    /// Only a busy counterparty is worth retrying, every other failure needs
    /// a decision by the caller (or a sync).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Abort(AbortReason::CounterpartyBusy))
    }

    /// Errors that indicate the local copy is behind or ahead of the
    /// counterparty and should be followed by a sync.
    pub fn needs_sync(&self) -> bool {
        matches!(self, Error::StaleVersion { .. } | Error::OutOfSync { .. })
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no channel with multisig {0}")]
    NoChannel(Address),
    #[error("no proposal with identity hash {0}")]
    NoProposal(Hash),
    #[error("no app instance with identity hash {0}")]
    NoApp(Hash),
    #[error("unknown app definition {0}")]
    UnknownAppDefinition(Address),
    #[error("state does not match app definition {0}")]
    StateKindMismatch(Address),
    #[error("unsupported asset {0}")]
    UnsupportedAsset(Address),
    #[error("{owner} has {available} of {token} in the free balance, {required} required")]
    InsufficientFreeBalance {
        owner: Address,
        token: Address,
        available: U256,
        required: U256,
    },
    #[error("the free balance app cannot be proposed, acted on or uninstalled")]
    FreeBalanceNotModifiable,
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("{0}")]
    App(String),
    #[error("identifier mismatch: {0}")]
    IdentifierMismatch(String),
    #[error("invalid channel data: {0}")]
    InvalidChannel(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbortReason {
    #[error("timed out waiting for the counterparty")]
    Timeout,
    #[error("rejected by counterparty: {0}")]
    Rejected(String),
    #[error("counterparty is busy with its own run on this channel")]
    CounterpartyBusy,
    #[error("vetoed by middleware: {0}")]
    Middleware(String),
    #[error("unexpected message from counterparty")]
    UnexpectedMessage,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("could not recover signer: {0}")]
    Recovery(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("signature recovers to {recovered}, expected one of the participants")]
    InvalidSignature { recovered: Address },
    #[error("signature recovers to {recovered}, expected {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("missing signature of participant {0}")]
    MissingSignature(usize),
    #[error("participant {0} already signed")]
    AlreadySigned(usize),
    #[error("expected {expected} signatures, got {actual}")]
    WrongCount { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_busy_is_retryable() {
        assert!(Error::from(AbortReason::CounterpartyBusy).is_retryable());
        assert!(!Error::from(AbortReason::Timeout).is_retryable());
        assert!(!Error::from(ValidationError::FreeBalanceNotModifiable).is_retryable());
        assert!(!Error::SyncConflict(Hash::zero()).is_retryable());
    }

    #[test]
    fn version_errors_need_sync() {
        let stale = Error::StaleVersion {
            identity_hash: Hash::zero(),
            received: 1,
            local: 2,
        };
        assert!(stale.needs_sync());
        assert!(!Error::from(AbortReason::Timeout).needs_sync());
    }
}
