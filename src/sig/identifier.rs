use core::{
    fmt::{Debug, Display},
    str::FromStr,
};

use k256::{ecdsa::VerifyingKey, elliptic_curve::sec1::ToEncodedPoint};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{abiencode::types::Address, error::SignatureError};

const COMPRESSED_LEN: usize = 33;

/// Public identifier of a node: its compressed secp256k1 public key.
///
/// The signer address is derived once when the identifier is created, there
/// is no global cache for it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicIdentifier {
    key: [u8; COMPRESSED_LEN],
    address: Address,
}

impl PublicIdentifier {
    /// Parse a SEC1 encoded key (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::from(&key))
    }

    pub fn signer_address(&self) -> Address {
        self.address
    }

    pub fn as_bytes(&self) -> &[u8; COMPRESSED_LEN] {
        &self.key
    }
}

impl From<&VerifyingKey> for PublicIdentifier {
    fn from(key: &VerifyingKey) -> Self {
        let mut compressed = [0u8; COMPRESSED_LEN];
        compressed.copy_from_slice(key.to_encoded_point(true).as_bytes());
        Self {
            key: compressed,
            address: Address::from(key),
        }
    }
}

impl Debug for PublicIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("0x")?;
        for b in self.key {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl Display for PublicIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for PublicIdentifier {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| SignatureError::InvalidPublicKey(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }
}

impl Serialize for PublicIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
