use std::{fmt, ops::Deref, str::FromStr};

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::HumanKitError;

/// A 256-bit value exchanged with the proving runtime, the state oracle and the contracts.
///
/// SNARK outputs (`pi_a`, `pub_signals`, ...) and identity ids travel as **decimal** strings,
/// while state hashes and roots usually travel as `0x`-prefixed hex. Parsing accepts both; the
/// value serializes back to decimal, which is what the runtime expects.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct FieldValue(pub U256);

impl FieldValue {
    /// Parses a decimal string, or a hex string when it carries a `0x` prefix.
    ///
    /// # Errors
    /// Returns [`HumanKitError::InvalidNumber`] if the input is not a number up to 256 bits.
    pub fn parse(value: &str) -> Result<Self, HumanKitError> {
        let value = value.trim();
        let number = value.strip_prefix("0x").map_or_else(
            || U256::from_str_radix(value, 10),
            |hex| U256::from_str_radix(hex, 16),
        );
        number.map(Self).map_err(|_| HumanKitError::InvalidNumber)
    }

    /// Hex representation padded to 32 bytes, with the `0x` prefix.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        format!("{:#066x}", self.0)
    }

    /// Decimal representation.
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }

    /// Big-endian 32-byte form, as stored in `bytes32` contract slots.
    #[must_use]
    pub fn to_b256(&self) -> B256 {
        B256::from(self.0.to_be_bytes::<32>())
    }
}

impl FromStr for FieldValue {
    type Err = HumanKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<U256> for FieldValue {
    fn from(val: U256) -> Self {
        Self(val)
    }
}

impl From<FieldValue> for U256 {
    fn from(val: FieldValue) -> Self {
        val.0
    }
}

impl From<B256> for FieldValue {
    fn from(val: B256) -> Self {
        Self(U256::from_be_bytes(val.0))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for FieldValue {
    type Target = U256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Self(U256::from(n))),
        }
    }
}
