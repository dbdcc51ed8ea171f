use core::fmt::{Debug, Display};
use core::str::FromStr;

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

use super::Error;

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                Debug::fmt(self, f)
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl $T {
            pub const LEN: usize = $N;

            pub fn zero() -> Self {
                Self([0; $N])
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
                let inner: [u8; $N] = bytes.try_into().or(Err(Error::LengthMismatch {
                    expected: $N,
                    actual: bytes.len(),
                }))?;
                Ok(Self(inner))
            }
        }

        impl FromStr for $T {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                Self::from_slice(&hex::decode(s)?)
            }
        }

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                let mut inner = [0u8; $N];
                rng.fill_bytes(&mut inner);
                $T(inner)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::zero()
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);
bytesN!(Address, 20);
bytesN!(Signature, 65);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

impl Address {
    /// Addresses are right aligned in a 32 byte ABI slot (like uints), unlike
    /// bytesN which are left aligned.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[32 - 20..].copy_from_slice(&self.0);
        word
    }
}

// primitive_types and ethereum_types both wrap construct_uint but serialize to
// a format that doesn't match the rest of our JSON, so we construct our own.
construct_uint! {
    pub struct U256(4);
}

impl U256 {
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        self.to_big_endian(&mut word);
        word
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("0x{:x}", self))
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16).map_err(de::Error::custom),
            None => U256::from_dec_str(&s).map_err(de::Error::custom),
        }
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_json_is_prefixed_hex() {
        let addr: Address = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x5b38da6a701c568545dcfcb03fcb875f56beddc4\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = "0x1234".parse::<Hash>().unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 32,
                actual: 2
            }
        ));
    }

    #[test]
    fn u256_accepts_hex_and_decimal() {
        let a: U256 = serde_json::from_str("\"0x10\"").unwrap();
        let b: U256 = serde_json::from_str("\"16\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"0x10\"");
    }

    #[test]
    fn address_word_is_right_aligned() {
        let addr = Address([0xff; 20]);
        let word = addr.to_word();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(&word[12..], &[0xff; 20]);
    }
}
