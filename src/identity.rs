use std::{fmt, str::FromStr};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use solana_program::pubkey::Pubkey;

use crate::error::EscrowError;

/// A 32-byte public identity: a wallet, a program, or a derived account.
///
/// Records read from the chain or the metadata store are normalized into
/// this type at the boundary, so business logic never sees a bare string
/// or a wrapped wallet object.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Identity([u8; 32]);

impl Identity {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<Pubkey> for Identity {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey.to_bytes())
    }
}

impl From<&Pubkey> for Identity {
    fn from(pubkey: &Pubkey) -> Self {
        Self(pubkey.to_bytes())
    }
}

impl From<Identity> for Pubkey {
    fn from(identity: Identity) -> Self {
        identity.pubkey()
    }
}

impl AsRef<[u8]> for Identity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.pubkey(), f)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.pubkey())
    }
}

impl FromStr for Identity {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_str(s.trim())
            .map(Identity::from)
            .map_err(|e| EscrowError::InvalidInput(format!("not a public key `{s}`: {e}")))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        Identity::from_str(&s).map_err(de::Error::custom)
    }
}

/// The owner of an off-chain record. Older records store the owner either as
/// a wallet address string, a wallet object, or an application user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRef {
    Wallet(Identity),
    User(String),
}

impl OwnerRef {
    const WALLET_KEYS: [&'static str; 3] = ["publicKey", "address", "wallet"];
    const USER_KEYS: [&'static str; 3] = ["uid", "userId", "id"];

    /// Normalizes any of the stored owner shapes. Returns `None` for shapes
    /// that carry no usable owner.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::from_str_lossy(s),
            Value::Object(map) => {
                for key in Self::WALLET_KEYS {
                    if let Some(Value::String(s)) = map.get(key) {
                        if let Ok(identity) = Identity::from_str(s) {
                            return Some(OwnerRef::Wallet(identity));
                        }
                    }
                }
                Self::USER_KEYS.iter().find_map(|key| match map.get(*key) {
                    Some(Value::String(s)) if !s.trim().is_empty() => {
                        Some(OwnerRef::User(s.trim().to_string()))
                    }
                    _ => None,
                })
            }
            _ => None,
        }
    }

    fn from_str_lossy(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match Identity::from_str(s) {
            Ok(identity) => Some(OwnerRef::Wallet(identity)),
            Err(_) => Some(OwnerRef::User(s.to_string())),
        }
    }

    pub fn wallet(&self) -> Option<&Identity> {
        match self {
            OwnerRef::Wallet(identity) => Some(identity),
            OwnerRef::User(_) => None,
        }
    }
}

impl Serialize for OwnerRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OwnerRef::Wallet(identity) => serializer.collect_str(identity),
            OwnerRef::User(id) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("uid", id)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for OwnerRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        OwnerRef::from_value(&value)
            .ok_or_else(|| de::Error::custom(format!("unrecognized owner field: {value}")))
    }
}
