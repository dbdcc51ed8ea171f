use super::{encode, types::Hash, Token};

use sha3::{
    digest::{core_api::CoreWrapper, Output},
    Digest, Keccak256, Keccak256Core,
};

/// Sink for encoded bytes. Packed encoding streams into it directly, so
/// hashing a commitment never needs an intermediate buffer.
pub trait Writer {
    fn write(&mut self, data: &[u8]);
}

impl Writer for Vec<u8> {
    fn write(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }
}

pub struct Keccak256Writer {
    hasher: CoreWrapper<Keccak256Core>,
}

impl Default for Keccak256Writer {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl Writer for Keccak256Writer {
    fn write(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Output<Keccak256> {
        self.hasher.finalize()
    }

    pub fn finalize_hash(self) -> Hash {
        Hash(self.finalize().into())
    }
}

pub fn keccak256(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}

/// `keccak256(abi.encode(tokens...))`
pub fn to_hash(tokens: &[Token]) -> Hash {
    keccak256(&encode(tokens))
}

/// First four bytes of the keccak hash of a canonical function signature,
/// e.g. `transfer(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash.0[0], hash.0[1], hash.0[2], hash.0[3]]
}

/// ABI encoded call data: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(args));
    data
}
