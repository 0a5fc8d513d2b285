// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types and graph-local id derivation.
use std::borrow::Borrow;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::constants::{LOCAL_ID_PREFIX, ROOT_ID};

/// Opaque identity of one entity in the record graph.
///
/// Two namespaces share this type: server-assigned ids (opaque, globally
/// unique per schema contract) and graph-local ids, which always start with
/// [`LOCAL_ID_PREFIX`]. Graph-local ids are produced by [`derive_id`] or an
/// [`IdGenerator`]; tooling must not assume any other structure.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataId(String);

impl DataId {
    /// Wraps a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Identifier of the singleton root record.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_ID.to_owned())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this id lives in the graph-local namespace.
    #[must_use]
    pub fn is_local(&self) -> bool {
        is_local_id(&self.0)
    }

    /// Returns `true` for the singleton root id.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DataId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of the partition ("actor") a record or publish queue belongs to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Wraps a raw actor identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self(crate::constants::DEFAULT_ACTOR_ID.to_owned())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Returns `true` when `id` carries the graph-local prefix.
#[must_use]
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Derives the graph-local id for the object stored under `storage_key` on
/// `parent` (and at `index` for plural fields).
///
/// The result is `parent:storage_key[:index]`, prefixed with
/// [`LOCAL_ID_PREFIX`] unless `parent` already carries it. Pure: identical
/// inputs always yield identical ids, so re-normalizing a payload converges
/// on the same records.
#[must_use]
pub fn derive_id(parent: &DataId, storage_key: &str, index: Option<usize>) -> DataId {
    let mut key = String::with_capacity(
        LOCAL_ID_PREFIX.len() + parent.as_str().len() + storage_key.len() + 8,
    );
    if !parent.is_local() {
        key.push_str(LOCAL_ID_PREFIX);
    }
    key.push_str(parent.as_str());
    key.push(':');
    key.push_str(storage_key);
    if let Some(index) = index {
        key.push(':');
        key.push_str(&index.to_string());
    }
    DataId(key)
}

/// Id of the synthetic record that stores abstract-type membership flags for
/// concrete type `type_name`.
#[must_use]
pub fn type_record_id(type_name: &str) -> DataId {
    DataId(format!("{LOCAL_ID_PREFIX}__type:{type_name}"))
}

/// Engine-owned source of unique graph-local ids.
///
/// Used only when no deterministic basis exists (subscription roots,
/// anonymous optimistic records). Clones share one counter, so every
/// component of an engine instance draws from the same sequence while two
/// engine instances in one process never interfere.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator {
    next: Rc<Cell<u64>>,
}

impl IdGenerator {
    /// Creates a generator starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh `client:local:<n>` id; never repeats for this generator.
    pub fn unique_id(&self) -> DataId {
        let n = self.next.get();
        self.next.set(n.wrapping_add(1));
        DataId(format!("{LOCAL_ID_PREFIX}local:{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_prefixes_server_parents() {
        let id = derive_id(&DataId::from("P"), "items", Some(0));
        assert_eq!(id.as_str(), "client:P:items:0");
        let id = derive_id(&DataId::from("P"), "items", Some(1));
        assert_eq!(id.as_str(), "client:P:items:1");
    }

    #[test]
    fn derive_id_does_not_double_prefix_local_parents() {
        let id = derive_id(&DataId::root(), "me", None);
        assert_eq!(id.as_str(), "client:root:me");
        assert!(id.is_local());
    }

    #[test]
    fn derive_id_is_deterministic() {
        let parent = DataId::from("4");
        let a = derive_id(&parent, "friends(first:10)", Some(3));
        let b = derive_id(&parent, "friends(first:10)", Some(3));
        assert_eq!(a, b);
    }

    #[test]
    fn generators_are_independent_but_clones_share() {
        let a = IdGenerator::new();
        let shared = a.clone();
        let b = IdGenerator::new();
        assert_eq!(a.unique_id().as_str(), "client:local:0");
        assert_eq!(shared.unique_id().as_str(), "client:local:1");
        assert_eq!(b.unique_id().as_str(), "client:local:0");
    }

    #[test]
    fn type_record_ids_are_local() {
        let id = type_record_id("User");
        assert_eq!(id.as_str(), "client:__type:User");
        assert!(id.is_local());
        assert!(!id.is_root());
    }
}
