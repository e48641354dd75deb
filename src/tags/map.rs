use std::collections::HashMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::key::Key;

/// A key paired with its encoded value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn value_to_string(&self) -> String {
        self.key.value_to_string(&self.value)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.key.name(), &self.value_to_string())?;
        map.end()
    }
}

/// One edit applied by [`TagMap::apply`].
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Set only if the key is absent.
    Insert(Key, Vec<u8>),
    /// Set only if the key is present.
    Update(Key, Vec<u8>),
    /// Always set.
    Upsert(Key, Vec<u8>),
    /// Remove unconditionally.
    Delete(Key),
}

/// Recording context: keys mapped to encoded values.
///
/// Storage order is meaningless; rendering sorts by key name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    m: HashMap<Key, Vec<u8>>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(size_hint: usize) -> Self {
        Self {
            m: HashMap::with_capacity(size_hint),
        }
    }

    /// Sets `key` only when it is not already present.
    pub fn insert(&mut self, key: Key, value: Vec<u8>) {
        self.m.entry(key).or_insert(value);
    }

    /// Replaces the value of `key` only when it is already present.
    pub fn update(&mut self, key: &Key, value: Vec<u8>) {
        if let Some(slot) = self.m.get_mut(key) {
            *slot = value;
        }
    }

    pub fn upsert(&mut self, key: Key, value: Vec<u8>) {
        self.m.insert(key, value);
    }

    pub fn delete(&mut self, key: &Key) {
        self.m.remove(key);
    }

    /// Returns a new map with `mutations` applied in order. `self` is left
    /// untouched.
    pub fn apply<I>(&self, mutations: I) -> TagMap
    where
        I: IntoIterator<Item = Mutation>,
    {
        let mut next = self.clone();
        for mutation in mutations {
            match mutation {
                Mutation::Insert(k, v) => next.insert(k, v),
                Mutation::Update(k, v) => next.update(&k, v),
                Mutation::Upsert(k, v) => next.upsert(k, v),
                Mutation::Delete(k) => next.delete(&k),
            }
        }
        next
    }

    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        self.m.get(key).map(Vec::as_slice)
    }

    /// Renders the value stored under `key`, or `None` if absent.
    pub fn value_to_string(&self, key: &Key) -> Option<String> {
        self.m.get(key).map(|v| key.value_to_string(v))
    }

    pub fn len(&self) -> usize {
        self.m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.m.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &[u8])> {
        self.m.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Tags sorted by key name.
    pub fn sorted_tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .m
            .iter()
            .map(|(k, v)| Tag::new(k.clone(), v.clone()))
            .collect();
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        tags
    }
}

impl fmt::Display for TagMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for tag in self.sorted_tags() {
            write!(f, "{{{} {}}}", tag.key.name(), tag.value_to_string())?;
        }
        f.write_str(" }")
    }
}

impl Serialize for TagMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tags = self.sorted_tags();
        let mut map = serializer.serialize_map(Some(tags.len()))?;
        for tag in &tags {
            map.serialize_entry(tag.key.name(), &tag.value_to_string())?;
        }
        map.end()
    }
}
