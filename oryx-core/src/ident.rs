use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use rand::prelude::*;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

use crate::time::now_msec;

/// An internal identifier composed of a 128-bit process id (a startup
/// timestamp and a random number) plus a 64-bit per-process sequence
/// number. Not part of any wire protocol; lets messages, mailboxes and
/// delivery rows be named uniquely without cross-process coordination.
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct UniqueIdent(pub [u8; 24]);

struct IdentGenerator {
    pid: u128,
    sn: AtomicU64,
}

impl IdentGenerator {
    fn new() -> Self {
        let time = now_msec() as u128;
        let rand = thread_rng().gen::<u64>() as u128;
        Self {
            pid: (time << 64) | rand,
            sn: AtomicU64::new(0),
        }
    }

    fn gen(&self) -> UniqueIdent {
        let sn = self.sn.fetch_add(1, Ordering::Relaxed);
        let mut res = [0u8; 24];
        res[0..16].copy_from_slice(&u128::to_be_bytes(self.pid));
        res[16..24].copy_from_slice(&u64::to_be_bytes(sn));
        UniqueIdent(res)
    }
}

lazy_static! {
    static ref GENERATOR: IdentGenerator = IdentGenerator::new();
}

pub fn gen_ident() -> UniqueIdent {
    GENERATOR.gen()
}

impl<'de> Deserialize<'de> for UniqueIdent {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = String::deserialize(d)?;
        UniqueIdent::from_str(&v).map_err(D::Error::custom)
    }
}

impl Serialize for UniqueIdent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for UniqueIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for UniqueIdent {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<UniqueIdent, &'static str> {
        let bytes = hex::decode(s).map_err(|_| "invalid hex")?;

        if bytes.len() != 24 {
            return Err("bad length");
        }

        let mut tmp = [0u8; 24];
        tmp[..].copy_from_slice(&bytes);
        Ok(UniqueIdent(tmp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_is_monotonic_and_unique() {
        let a = gen_ident();
        let b = gen_ident();
        assert_ne!(a, b);
    }

    #[test]
    fn display_from_str_roundtrip() {
        let id = gen_ident();
        let text = id.to_string();
        let parsed = UniqueIdent::from_str(&text).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_str_rejects_bad_length() {
        assert!(UniqueIdent::from_str("abcd").is_err());
    }

    #[test]
    fn from_str_rejects_non_hex() {
        assert!(UniqueIdent::from_str(&"zz".repeat(24)).is_err());
    }
}
