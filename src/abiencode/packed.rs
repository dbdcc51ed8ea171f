//! Non-standard packed encoding (`abi.encodePacked` / ethers' `solidityPack`).
//!
//! Used for everything that is only ever hashed, never decoded: identity
//! hashes and the hash-to-sign of each commitment.

use super::{
    hashing::{Keccak256Writer, Writer},
    types::{Address, Hash, U256},
};

#[derive(Debug, Clone, Copy)]
pub enum Packed<'a> {
    Uint8(u8),
    Address(Address),
    Uint256(U256),
    Bytes32(Hash),
    /// Array elements are padded to 32 bytes even in packed mode.
    AddressArray(&'a [Address]),
    Bytes(&'a [u8]),
}

pub fn encode_packed<W: Writer>(values: &[Packed], writer: &mut W) {
    for value in values {
        match value {
            Packed::Uint8(v) => writer.write(&[*v]),
            Packed::Address(a) => writer.write(&a.0),
            Packed::Uint256(v) => writer.write(&v.to_word()),
            Packed::Bytes32(h) => writer.write(&h.0),
            Packed::AddressArray(addrs) => {
                for a in addrs.iter() {
                    writer.write(&a.to_word());
                }
            }
            Packed::Bytes(b) => writer.write(b),
        }
    }
}

/// `keccak256(abi.encodePacked(values...))`
pub fn keccak256_packed(values: &[Packed]) -> Hash {
    let mut writer = Keccak256Writer::default();
    encode_packed(values, &mut writer);
    writer.finalize_hash()
}
