use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use crate::error::{Result, StatsError};

// ─── Key ─────────────────────────────────────────────────────────

/// Declared value type of a tag key. Decides how encoded values render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    String,
    Int64,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::String => "string",
            KeyKind::Int64 => "int64",
        }
    }
}

/// A named tag dimension.
///
/// Cheap to clone. Equality, hashing and ordering are by name only; the
/// [`KeyRegistry`] guarantees a name maps to exactly one kind.
#[derive(Clone)]
pub struct Key {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    name: String,
    kind: KeyKind,
}

impl Key {
    fn new(name: &str, kind: KeyKind) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                name: name.to_owned(),
                kind,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> KeyKind {
        self.inner.kind
    }

    /// Encode a string value for this key.
    pub fn encode_str(&self, value: &str) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    /// Encode an integer value as 8 big-endian bytes.
    pub fn encode_i64(&self, value: i64) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    /// Render an encoded value as human-readable text.
    pub fn value_to_string(&self, value: &[u8]) -> String {
        match self.inner.kind {
            KeyKind::String => String::from_utf8_lossy(value).into_owned(),
            KeyKind::Int64 => match <[u8; 8]>::try_from(value) {
                Ok(raw) => i64::from_be_bytes(raw).to_string(),
                Err(_) => format!("{value:?}"),
            },
        }
    }

    /// True if both handles came out of the same registry entry.
    pub fn same_identity(&self, other: &Key) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.name.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.name.cmp(&other.inner.name)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}:{})", self.inner.name, self.inner.kind.as_str())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

// ─── KeyRegistry ─────────────────────────────────────────────────

/// Creates and interns tag keys.
///
/// Creating a key twice with the same kind returns the same identity.
/// Asking for an existing name with a different kind is an error.
#[derive(Default)]
pub struct KeyRegistry {
    keys: RwLock<HashMap<String, Key>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_string_key(&self, name: &str) -> Result<Key> {
        self.get_or_create(name, KeyKind::String)
    }

    pub fn new_int64_key(&self, name: &str) -> Result<Key> {
        self.get_or_create(name, KeyKind::Int64)
    }

    pub fn find(&self, name: &str) -> Option<Key> {
        self.keys.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    fn get_or_create(&self, name: &str, kind: KeyKind) -> Result<Key> {
        if let Some(existing) = self.keys.read().get(name) {
            return check_kind(existing, kind);
        }

        let mut keys = self.keys.write();
        // Another thread may have won the race between the two locks.
        if let Some(existing) = keys.get(name) {
            return check_kind(existing, kind);
        }
        let key = Key::new(name, kind);
        keys.insert(name.to_owned(), key.clone());
        tracing::debug!(key = name, kind = kind.as_str(), "created tag key");
        Ok(key)
    }
}

fn check_kind(existing: &Key, kind: KeyKind) -> Result<Key> {
    if existing.kind() == kind {
        Ok(existing.clone())
    } else {
        Err(StatsError::DuplicateKeyMismatch {
            name: existing.name().to_owned(),
            existing: existing.kind().as_str(),
            requested: kind.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_kind_is_idempotent() {
        let reg = KeyRegistry::new();
        let a = reg.new_string_key("rpc.method").unwrap();
        let b = reg.new_string_key("rpc.method").unwrap();
        assert!(a.same_identity(&b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn same_name_different_kind_fails() {
        let reg = KeyRegistry::new();
        reg.new_string_key("shard").unwrap();
        let err = reg.new_int64_key("shard").unwrap_err();
        assert_eq!(
            err,
            StatsError::DuplicateKeyMismatch {
                name: "shard".into(),
                existing: "string",
                requested: "int64",
            }
        );
    }

    #[test]
    fn int64_values_render_as_decimal() {
        let reg = KeyRegistry::new();
        let k = reg.new_int64_key("shard").unwrap();
        assert_eq!(k.value_to_string(&k.encode_i64(-42)), "-42");
        // Malformed payloads still render instead of panicking
        assert_eq!(k.value_to_string(&[1, 2]), "[1, 2]");
    }
}
