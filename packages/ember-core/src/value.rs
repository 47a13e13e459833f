//! The stored value domain type and the per-key record it's wrapped in.
//!
//! Per-data-type command bodies (hash, list, set, sorted-set) are out of
//! scope for the core; `Value` carries only what the built-in command set
//! needs. It's deliberately a small open enum -- one variant per supported
//! value shape, with a handler for a new data type expected to add a variant.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The value half of a key's data. `String` is the byte-string type backing
/// `GET`/`SET`/`MGET`/`MSET`; `Int` is a fast path for `INCR`/`DECR` that also
/// serves as the `WrongType` demonstration (an `INCR` against a `String` that
/// doesn't parse as an integer fails with `WrongType`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    String(#[serde(with = "serde_bytes_bytes")] Bytes),
    Int(i64),
}

impl Value {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) | Value::Int(_) => "string",
        }
    }

    /// Renders the value the way `GET`-style handlers hand it to the codec:
    /// integers render as their decimal ASCII form, same as the reference protocol.
    #[must_use]
    pub fn as_bytes(&self) -> Bytes {
        match self {
            Value::String(b) => b.clone(),
            Value::Int(i) => Bytes::from(i.to_string()),
        }
    }
}

/// A key's stored data: the value plus an optional absolute expiry instant.
///
/// `expire_at` absent means persistent. Milliseconds since the Unix epoch,
/// produced by a [`crate::clock::ClockSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyData {
    pub value: Value,
    pub expire_at: Option<u64>,
}

impl KeyData {
    #[must_use]
    pub fn persistent(value: Value) -> Self {
        Self {
            value,
            expire_at: None,
        }
    }

    #[must_use]
    pub fn with_expiry(value: Value, expire_at: u64) -> Self {
        Self {
            value,
            expire_at: Some(expire_at),
        }
    }

    /// Whether this entry has expired as of `now_millis`.
    #[must_use]
    pub fn is_expired(&self, now_millis: u64) -> bool {
        matches!(self.expire_at, Some(t) if t <= now_millis)
    }
}

/// `serde(with = ...)` helper: `Bytes` doesn't implement `Serialize`/`Deserialize`
/// directly in a way that round-trips through `rmp-serde` as a byte string.
mod serde_bytes_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let buf: Vec<u8> = serde_bytes::deserialize(d)?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_expired_checks_boundary_inclusive() {
        let kd = KeyData::with_expiry(Value::Int(1), 1000);
        assert!(!kd.is_expired(999));
        assert!(kd.is_expired(1000));
        assert!(kd.is_expired(1001));
    }

    #[test]
    fn persistent_has_no_expiry() {
        let kd = KeyData::persistent(Value::String(Bytes::from_static(b"hi")));
        assert!(kd.expire_at.is_none());
        assert!(!kd.is_expired(u64::MAX));
    }

    #[test]
    fn int_as_bytes_renders_decimal() {
        assert_eq!(Value::Int(-42).as_bytes(), Bytes::from_static(b"-42"));
    }
}
