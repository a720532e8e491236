//! Structured cache keys and key predicates.
//!
//! A key is an ordered tuple of segments, `(entity, discriminators…)`. Keys
//! are built by pure functions (see `keys`), and their equality is plain
//! segment-wise equality, so two keys built from the same inputs always
//! address the same entry.

use std::collections::BTreeMap;
use std::fmt;

/// Canonical parameter map. Fields are kept sorted by name so that insertion
/// order never affects key identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, value: impl ToString) {
        self.0.insert(field.to_string(), value.to_string());
    }

    pub fn with(mut self, field: &str, value: impl ToString) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn without(&self, field: &str) -> Self {
        let mut copy = self.clone();
        copy.0.remove(field);
        copy
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Name(String),
    Id(i64),
    Params(Params),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Name(name) => write!(f, "{}", name),
            Segment::Id(id) => write!(f, "{}", id),
            Segment::Params(params) => write!(f, "{}", params),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<Segment>);

impl Key {
    /// Start a key with its entity segment.
    pub fn entity(name: &str) -> Self {
        Self(vec![Segment::Name(name.to_string())])
    }

    pub fn name(mut self, name: &str) -> Self {
        self.0.push(Segment::Name(name.to_string()));
        self
    }

    pub fn id(mut self, id: i64) -> Self {
        self.0.push(Segment::Id(id));
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.0.push(Segment::Params(params));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn contains(&self, segment: &Segment) -> bool {
        self.0.contains(segment)
    }

    /// Trailing parameter segment, if the key ends with one.
    pub fn trailing_params(&self) -> Option<&Params> {
        match self.0.last() {
            Some(Segment::Params(p)) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Selects a set of keys; the unit of bulk reads, writes and invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPredicate {
    Exact(Key),
    Prefix(Key),
    /// Any key holding this segment at any position.
    Contains(Segment),
    All(Vec<KeyPredicate>),
    Any(Vec<KeyPredicate>),
}

impl KeyPredicate {
    /// Matches every key (an empty conjunction).
    pub fn every_key() -> Self {
        KeyPredicate::All(Vec::new())
    }

    pub fn matches(&self, key: &Key) -> bool {
        match self {
            KeyPredicate::Exact(k) => k == key,
            KeyPredicate::Prefix(prefix) => key.starts_with(prefix),
            KeyPredicate::Contains(segment) => key.contains(segment),
            KeyPredicate::All(preds) => preds.iter().all(|p| p.matches(key)),
            KeyPredicate::Any(preds) => preds.iter().any(|p| p.matches(key)),
        }
    }

    pub fn or(self, other: KeyPredicate) -> KeyPredicate {
        match self {
            KeyPredicate::Any(mut preds) => {
                preds.push(other);
                KeyPredicate::Any(preds)
            }
            first => KeyPredicate::Any(vec![first, other]),
        }
    }
}

impl From<Key> for KeyPredicate {
    fn from(key: Key) -> Self {
        KeyPredicate::Exact(key)
    }
}

impl From<&Key> for KeyPredicate {
    fn from(key: &Key) -> Self {
        KeyPredicate::Exact(key.clone())
    }
}
