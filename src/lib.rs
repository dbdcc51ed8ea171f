//! Two-party generalized state channel engine.
//!
//! A [CfCore] node drives the channel protocols (setup, propose, install,
//! take action, uninstall, sync) against a single counterparty, co-signing
//! commitments and persisting each fully-signed channel version through an
//! injected [store::Store]. Messages travel over an injected
//! [wire::Messenger], on-chain reads go through a [chain::ChainReader].

pub mod abiencode {
    mod error;
    mod hashing;
    mod packed;
    mod token;

    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{encode_call, keccak256, selector, to_hash, Keccak256Writer, Writer};
    pub use packed::{encode_packed, keccak256_packed, Packed};
    pub use token::{encode, AbiEncode, Token, SLOT_SIZE};
    pub use types::{Address, Bytes32, Hash, Signature, U256};

    #[cfg(test)]
    mod tests;
}
pub mod sig;

pub mod apps;
pub mod chain;
pub mod channel;
pub mod commitment;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod messages;
pub mod middleware;
mod node;
pub mod protocol;
pub mod router;
pub mod store;
pub mod wire;

pub use abiencode::types::{Address, Hash, Signature, U256};
pub use config::Config;
pub use error::{Error, Result};
pub use node::CfCore;
pub use sig::{PublicIdentifier, Signer};
