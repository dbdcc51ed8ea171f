//! Solidity ABI encoding (`abi.encode`) of a tree of [Token]s.
//!
//! Encoding happens in two passes per tuple, the same way the EVM lays it out:
//! the head holds static values in place and a 32 byte offset for every
//! dynamic value, the tail holds the dynamic values themselves. Offsets are
//! relative to the start of the enclosing tuple.

use super::types::{Address, Hash, U256};

/// Size of a single ABI slot.
pub const SLOT_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    /// `bytes32`
    Word([u8; 32]),
    Bool(bool),
    /// `bytes` (dynamic length)
    Bytes(Vec<u8>),
    /// `T[]` (dynamic length)
    Array(Vec<Token>),
    /// `T[N]`
    FixedArray(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn uint(v: impl Into<U256>) -> Self {
        Token::Uint(v.into())
    }

    pub fn hash(h: Hash) -> Self {
        Token::Word(h.0)
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            Token::Bytes(_) | Token::Array(_) => true,
            Token::FixedArray(inner) | Token::Tuple(inner) => inner.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    /// Number of bytes this token occupies in the head of its parent.
    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return SLOT_SIZE;
        }
        match self {
            Token::FixedArray(inner) | Token::Tuple(inner) => {
                inner.iter().map(Token::head_size).sum()
            }
            _ => SLOT_SIZE,
        }
    }
}

fn write_uint(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&U256::from(v).to_word());
}

fn encode_tuple(tokens: &[Token], out: &mut Vec<u8>) {
    let head_size: usize = tokens.iter().map(Token::head_size).sum();
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            write_uint(out, head_size + tail.len());
            encode_value(token, &mut tail);
        } else {
            encode_value(token, out);
        }
    }
    out.extend_from_slice(&tail);
}

fn encode_value(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Address(a) => out.extend_from_slice(&a.to_word()),
        Token::Uint(v) => out.extend_from_slice(&v.to_word()),
        Token::Word(w) => out.extend_from_slice(w),
        Token::Bool(b) => write_uint(out, *b as usize),
        Token::Bytes(bytes) => {
            write_uint(out, bytes.len());
            out.extend_from_slice(bytes);
            let padding = (SLOT_SIZE - bytes.len() % SLOT_SIZE) % SLOT_SIZE;
            out.extend(core::iter::repeat(0u8).take(padding));
        }
        Token::Array(inner) => {
            write_uint(out, inner.len());
            encode_tuple(inner, out);
        }
        Token::FixedArray(inner) | Token::Tuple(inner) => encode_tuple(inner, out),
    }
}

/// `abi.encode(tokens...)`
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_tuple(tokens, &mut out);
    out
}

/// Values that can be represented as a single Solidity value.
///
/// Application states implement this to get a canonical byte representation,
/// which is what both parties hash and sign.
pub trait AbiEncode {
    fn to_token(&self) -> Token;

    fn abi_encode(&self) -> Vec<u8> {
        encode(&[self.to_token()])
    }
}

impl AbiEncode for Address {
    fn to_token(&self) -> Token {
        Token::Address(*self)
    }
}

impl AbiEncode for U256 {
    fn to_token(&self) -> Token {
        Token::Uint(*self)
    }
}

impl AbiEncode for Hash {
    fn to_token(&self) -> Token {
        Token::Word(self.0)
    }
}

impl AbiEncode for bool {
    fn to_token(&self) -> Token {
        Token::Bool(*self)
    }
}

impl AbiEncode for u64 {
    fn to_token(&self) -> Token {
        Token::Uint((*self).into())
    }
}
