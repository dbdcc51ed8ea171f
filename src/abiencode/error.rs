//! Error type returned when parsing the fixed-size primitive types.

use thiserror::Error;

/// Represents all possible errors that can happen while turning external
/// representations (hex strings, raw wire bytes) into primitive types.
///
/// Encoding itself is infallible: every [Token][super::Token] has exactly one
/// Solidity representation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Alias for `Result` using the [Error] returned while parsing.
pub type Result<T> = core::result::Result<T, Error>;
