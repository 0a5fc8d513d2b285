// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat entity records: one map of storage keys to values per entity.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::{ERRORS_KEY, ID_KEY, TYPENAME_KEY};
use crate::ident::{ActorId, DataId};

/// Value stored under one storage key of a [`Record`].
///
/// Links hold ids, never record references: cycles in the entity graph are
/// plain id cycles in the record map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Scalar value, including `null`, lists, and custom object scalars.
    Scalar(Value),
    /// Link to a single record.
    Link(DataId),
    /// Links to a list of records; `None` entries are null list items.
    Links(Vec<Option<DataId>>),
    /// Link to a record that lives in another actor's partition.
    ActorLink {
        /// Partition owning the target record.
        actor: ActorId,
        /// Target record id inside that partition.
        id: DataId,
    },
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Link(_) => "link",
            Self::Links(_) => "plural link",
            Self::ActorLink { .. } => "actor link",
        }
    }
}

/// Contract violations raised by record accessors and merges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A scalar was read from a key holding a link.
    #[error("expected a scalar (non-link) value for `{id}.{key}` but found a {found}")]
    ExpectedScalar {
        /// Record id.
        id: DataId,
        /// Storage key that was read.
        key: String,
        /// Kind of value actually stored.
        found: &'static str,
    },
    /// A link was read from a key holding a different kind of value.
    #[error("expected `{id}.{key}` to be a {expected}, was a {found}")]
    ExpectedLink {
        /// Record id.
        id: DataId,
        /// Storage key that was read.
        key: String,
        /// Kind of link the caller asked for.
        expected: &'static str,
        /// Kind of value actually stored.
        found: &'static str,
    },
    /// A frozen record was mutated.
    #[error("cannot modify frozen record `{0}`")]
    Frozen(DataId),
    /// Two versions of a record disagree on identity.
    #[error("invalid record update, expected both versions to have the same id, got `{prev}` and `{next}`")]
    IdMismatch {
        /// Id of the existing version.
        prev: DataId,
        /// Id of the incoming version.
        next: DataId,
    },
    /// Two versions of a server-identified record disagree on type.
    #[error(
        "invalid record update, expected both versions of record `{id}` to have the same `__typename` \
         but got conflicting types `{prev}` and `{next}`"
    )]
    TypeMismatch {
        /// Record id.
        id: DataId,
        /// Type of the existing version.
        prev: String,
        /// Type of the incoming version.
        next: String,
    },
}

/// One entity of the graph: reserved id and type plus a flat field map.
///
/// Invariants
/// - `id` never changes after creation.
/// - `type_name` only changes for graph-local ids other than the root.
/// - A frozen record rejects every mutation with [`RecordError::Frozen`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    id: DataId,
    type_name: String,
    fields: BTreeMap<String, FieldValue>,
    #[serde(skip)]
    frozen: bool,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.type_name == other.type_name && self.fields == other.fields
    }
}

impl Record {
    /// Creates an empty record with the given identity.
    pub fn new(id: DataId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            fields: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Record identifier.
    #[must_use]
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Record type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns `true` once [`Record::freeze`] was called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Marks the record immutable; every later mutation fails.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Iterates over non-reserved fields in storage-key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Returns `true` if `key` is present (reserved keys always are).
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        key == ID_KEY || key == TYPENAME_KEY || self.fields.contains_key(key)
    }

    /// Raw access to the value under `key`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Reads the scalar under `key`; `Ok(None)` when the key is absent.
    ///
    /// Reserved keys read back the record's id and type.
    pub fn value(&self, key: &str) -> Result<Option<Value>, RecordError> {
        if key == ID_KEY {
            return Ok(Some(Value::String(self.id.as_str().to_owned())));
        }
        if key == TYPENAME_KEY {
            return Ok(Some(Value::String(self.type_name.clone())));
        }
        match self.fields.get(key) {
            None => Ok(None),
            Some(FieldValue::Scalar(v)) => Ok(Some(v.clone())),
            Some(other) => Err(RecordError::ExpectedScalar {
                id: self.id.clone(),
                key: key.to_owned(),
                found: other.kind(),
            }),
        }
    }

    /// Writes a scalar under `key`.
    ///
    /// Writing [`ID_KEY`] must repeat the current id; writing [`TYPENAME_KEY`]
    /// follows the same rule as [`Record::update`].
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        if key == ID_KEY {
            if value.as_str() != Some(self.id.as_str()) {
                return Err(RecordError::IdMismatch {
                    prev: self.id.clone(),
                    next: DataId::new(value.as_str().unwrap_or("null")),
                });
            }
            return Ok(());
        }
        if key == TYPENAME_KEY {
            let next = value.as_str().unwrap_or("null").to_owned();
            check_type_change(&self.id, &self.type_name, &next)?;
            self.type_name = next;
            return Ok(());
        }
        self.fields.insert(key.to_owned(), FieldValue::Scalar(value));
        Ok(())
    }

    /// Reads a single link. Absent keys and `null` scalars read as `None`.
    pub fn linked_id(&self, key: &str) -> Result<Option<&DataId>, RecordError> {
        match self.fields.get(key) {
            None | Some(FieldValue::Scalar(Value::Null)) => Ok(None),
            Some(FieldValue::Link(id)) => Ok(Some(id)),
            Some(other) => Err(self.link_error(key, "linked id", other)),
        }
    }

    /// Writes a single link.
    pub fn set_linked_id(&mut self, key: &str, id: DataId) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.fields.insert(key.to_owned(), FieldValue::Link(id));
        Ok(())
    }

    /// Reads a plural link. Absent keys and `null` scalars read as `None`.
    pub fn linked_ids(&self, key: &str) -> Result<Option<&[Option<DataId>]>, RecordError> {
        match self.fields.get(key) {
            None | Some(FieldValue::Scalar(Value::Null)) => Ok(None),
            Some(FieldValue::Links(ids)) => Ok(Some(ids)),
            Some(other) => Err(self.link_error(key, "plural linked ids", other)),
        }
    }

    /// Writes a plural link.
    pub fn set_linked_ids(&mut self, key: &str, ids: Vec<Option<DataId>>) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.fields.insert(key.to_owned(), FieldValue::Links(ids));
        Ok(())
    }

    /// Reads an actor-scoped link.
    pub fn actor_link(&self, key: &str) -> Result<Option<(&ActorId, &DataId)>, RecordError> {
        match self.fields.get(key) {
            None | Some(FieldValue::Scalar(Value::Null)) => Ok(None),
            Some(FieldValue::ActorLink { actor, id }) => Ok(Some((actor, id))),
            Some(other) => Err(self.link_error(key, "actor linked id", other)),
        }
    }

    /// Writes an actor-scoped link.
    pub fn set_actor_link(&mut self, key: &str, actor: ActorId, id: DataId) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        self.fields
            .insert(key.to_owned(), FieldValue::ActorLink { actor, id });
        Ok(())
    }

    /// Attaches server-reported errors to the field stored under `key`.
    pub fn set_errors(&mut self, key: &str, errors: Vec<Value>) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        let entry = self
            .fields
            .entry(ERRORS_KEY.to_owned())
            .or_insert_with(|| FieldValue::Scalar(Value::Object(serde_json::Map::new())));
        match entry {
            FieldValue::Scalar(Value::Object(map)) => {
                map.insert(key.to_owned(), Value::Array(errors));
                Ok(())
            }
            other => Err(RecordError::ExpectedScalar {
                id: self.id.clone(),
                key: ERRORS_KEY.to_owned(),
                found: other.kind(),
            }),
        }
    }

    /// Returns the server errors attached to the field under `key`.
    #[must_use]
    pub fn errors(&self, key: &str) -> Option<&[Value]> {
        match self.fields.get(ERRORS_KEY) {
            Some(FieldValue::Scalar(Value::Object(map))) => match map.get(key) {
                Some(Value::Array(errors)) => Some(errors),
                _ => None,
            },
            _ => None,
        }
    }

    /// Copies every non-reserved field of `from` onto `self`.
    pub fn copy_fields_from(&mut self, from: &Record) -> Result<(), RecordError> {
        self.ensure_mutable()?;
        for (key, value) in &from.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Returns an unfrozen copy of this record.
    #[must_use]
    pub fn thaw(&self) -> Self {
        Self {
            frozen: false,
            ..self.clone()
        }
    }

    /// Diffs `next` onto `prev` field by field.
    ///
    /// Returns `prev` itself (same `Arc`) when no field of `next` differs, so
    /// callers can detect "no change" with [`Arc::ptr_eq`]. Otherwise returns
    /// a new record with the differing fields overwritten. Fields present only
    /// in `prev` are kept.
    pub fn update(prev: &Arc<Record>, next: &Record) -> Result<Arc<Record>, RecordError> {
        check_same_identity(prev, next)?;
        let type_changed = prev.type_name != next.type_name;
        let changed = type_changed
            || next
                .fields
                .iter()
                .any(|(key, value)| prev.fields.get(key) != Some(value));
        if !changed {
            return Ok(Arc::clone(prev));
        }
        let mut updated = prev.thaw();
        updated.type_name.clone_from(&next.type_name);
        for (key, value) in &next.fields {
            if updated.fields.get(key) != Some(value) {
                updated.fields.insert(key.clone(), value.clone());
            }
        }
        Ok(Arc::new(updated))
    }

    /// Like [`Record::update`] but always allocates a new record.
    pub fn merge(a: &Record, b: &Record) -> Result<Record, RecordError> {
        check_same_identity(a, b)?;
        let mut merged = a.thaw();
        merged.type_name.clone_from(&b.type_name);
        for (key, value) in &b.fields {
            merged.fields.insert(key.clone(), value.clone());
        }
        Ok(merged)
    }

    fn ensure_mutable(&self) -> Result<(), RecordError> {
        if self.frozen {
            return Err(RecordError::Frozen(self.id.clone()));
        }
        Ok(())
    }

    fn link_error(&self, key: &str, expected: &'static str, found: &FieldValue) -> RecordError {
        RecordError::ExpectedLink {
            id: self.id.clone(),
            key: key.to_owned(),
            expected,
            found: found.kind(),
        }
    }
}

fn check_same_identity(prev: &Record, next: &Record) -> Result<(), RecordError> {
    if prev.id != next.id {
        return Err(RecordError::IdMismatch {
            prev: prev.id.clone(),
            next: next.id.clone(),
        });
    }
    check_type_change(&prev.id, &prev.type_name, &next.type_name)
}

fn check_type_change(id: &DataId, prev: &str, next: &str) -> Result<(), RecordError> {
    if prev == next || (id.is_local() && !id.is_root()) {
        return Ok(());
    }
    Err(RecordError::TypeMismatch {
        id: id.clone(),
        prev: prev.to_owned(),
        next: next.to_owned(),
    })
}
