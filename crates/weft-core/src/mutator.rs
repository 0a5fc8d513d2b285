// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Copy-on-write mutation of the store's records into a delta.
use std::rc::Rc;

use serde_json::Value;

use crate::handler::HandlerProvider;
use crate::ident::DataId;
use crate::payload::HandleFieldPayload;
use crate::publish_queue::PublishError;
use crate::record::Record;
use crate::source::{RecordSource, RecordState, RecordStatus};

/// Id-addressed read/write view over a base source and a sink delta.
///
/// Reads see the sink first and fall back to the base; writes only touch the
/// sink, where a record starts out holding just its identity, so publishing
/// the sink merges exactly the fields that were written.
pub struct RecordSourceProxy<'a> {
    base: &'a RecordSource,
    sink: &'a mut RecordSource,
    handlers: Option<Rc<dyn HandlerProvider>>,
}

impl<'a> RecordSourceProxy<'a> {
    /// Proxy reading `base` and writing `sink`.
    pub fn new(
        base: &'a RecordSource,
        sink: &'a mut RecordSource,
        handlers: Option<Rc<dyn HandlerProvider>>,
    ) -> Self {
        Self {
            base,
            sink,
            handlers,
        }
    }

    /// Existence of `id` as seen through the proxy.
    #[must_use]
    pub fn status(&self, id: &DataId) -> RecordStatus {
        match self.sink.status(id.as_str()) {
            RecordStatus::Unknown => self.base.status(id.as_str()),
            status => status,
        }
    }

    /// Returns `true` if a record exists for `id`.
    #[must_use]
    pub fn exists(&self, id: &DataId) -> bool {
        self.status(id) == RecordStatus::Existent
    }

    /// Type of the record for `id`.
    #[must_use]
    pub fn record_type(&self, id: &DataId) -> Option<String> {
        self.existing(id).map(|r| r.type_name().to_owned())
    }

    /// Creates an empty record. Fails if one already exists.
    pub fn create(&mut self, id: DataId, type_name: &str) -> Result<(), PublishError> {
        if self.exists(&id) {
            return Err(PublishError::RecordExists(id));
        }
        self.sink.set(Record::new(id, type_name));
        Ok(())
    }

    /// Deletes the record for `id`.
    pub fn delete(&mut self, id: DataId) {
        self.sink.delete(id);
    }

    /// Reads a scalar.
    pub fn get_value(&self, id: &DataId, key: &str) -> Result<Option<Value>, PublishError> {
        match self.holder(id, key) {
            Some(record) => Ok(record.value(key)?),
            None => Ok(None),
        }
    }

    /// Writes a scalar.
    pub fn set_value(&mut self, id: &DataId, key: &str, value: Value) -> Result<(), PublishError> {
        self.sink_record(id)?.set_value(key, value)?;
        Ok(())
    }

    /// Reads a single link.
    pub fn linked_id(&self, id: &DataId, key: &str) -> Result<Option<DataId>, PublishError> {
        match self.holder(id, key) {
            Some(record) => Ok(record.linked_id(key)?.cloned()),
            None => Ok(None),
        }
    }

    /// Writes a single link.
    pub fn set_linked_id(&mut self, id: &DataId, key: &str, target: DataId) -> Result<(), PublishError> {
        self.sink_record(id)?.set_linked_id(key, target)?;
        Ok(())
    }

    /// Reads a plural link.
    pub fn linked_ids(&self, id: &DataId, key: &str) -> Result<Option<Vec<Option<DataId>>>, PublishError> {
        match self.holder(id, key) {
            Some(record) => Ok(record.linked_ids(key)?.map(<[Option<DataId>]>::to_vec)),
            None => Ok(None),
        }
    }

    /// Writes a plural link.
    pub fn set_linked_ids(
        &mut self,
        id: &DataId,
        key: &str,
        ids: Vec<Option<DataId>>,
    ) -> Result<(), PublishError> {
        self.sink_record(id)?.set_linked_ids(key, ids)?;
        Ok(())
    }

    /// Copies every non-reserved field of `from` onto `to`.
    pub fn copy_fields(&mut self, from: &DataId, to: &DataId) -> Result<(), PublishError> {
        let base_source: &'a RecordSource = self.base;
        let base = base_source.get(from.as_str());
        let mut fields = base.map_or_else(|| Record::new(from.clone(), ""), |r| r.thaw());
        match self.sink.state(from.as_str()) {
            Some(RecordState::Existent(overlay)) => fields.copy_fields_from(overlay)?,
            None if base.is_some() => {}
            _ => return Err(PublishError::MissingRecord(from.clone())),
        }
        self.sink_record(to)?.copy_fields_from(&fields)?;
        Ok(())
    }

    /// Writes a whole delta through the proxy, then runs the handlers for
    /// `field_payloads`.
    pub fn publish_source(
        &mut self,
        source: &RecordSource,
        field_payloads: &[HandleFieldPayload],
    ) -> Result<(), PublishError> {
        for (id, state) in source.iter() {
            match state {
                RecordState::Existent(record) => {
                    if !self.exists(id) {
                        self.create(id.clone(), record.type_name())?;
                    }
                    self.sink_record(id)?.copy_fields_from(record)?;
                }
                RecordState::Nonexistent => self.delete(id.clone()),
            }
        }
        self.apply_field_payloads(field_payloads)
    }

    /// Hands each payload to the handler registered for its handle name.
    pub fn apply_field_payloads(&mut self, field_payloads: &[HandleFieldPayload]) -> Result<(), PublishError> {
        if field_payloads.is_empty() {
            return Ok(());
        }
        let handlers = self.handlers.clone();
        for payload in field_payloads {
            let handler = handlers
                .as_ref()
                .and_then(|provider| provider.handler(&payload.handle))
                .ok_or_else(|| PublishError::MissingHandler(payload.handle.clone()))?;
            handler.update(self, payload)?;
        }
        Ok(())
    }

    fn existing(&self, id: &DataId) -> Option<&Record> {
        match self.sink.state(id.as_str()) {
            Some(RecordState::Existent(record)) => Some(record.as_ref()),
            Some(RecordState::Nonexistent) => None,
            None => self.base.get(id.as_str()).map(AsRef::as_ref),
        }
    }

    /// Record holding the current value of `key` for `id`.
    fn holder(&self, id: &DataId, key: &str) -> Option<&Record> {
        match self.sink.state(id.as_str()) {
            Some(RecordState::Nonexistent) => None,
            Some(RecordState::Existent(record)) if record.has(key) => Some(record.as_ref()),
            Some(RecordState::Existent(record)) => self
                .base
                .get(id.as_str())
                .map(AsRef::as_ref)
                .or(Some(record.as_ref())),
            None => self.base.get(id.as_str()).map(AsRef::as_ref),
        }
    }

    fn sink_record(&mut self, id: &DataId) -> Result<&mut Record, PublishError> {
        if self.sink.status(id.as_str()) == RecordStatus::Unknown {
            let base = self
                .base
                .get(id.as_str())
                .ok_or_else(|| PublishError::MissingRecord(id.clone()))?;
            self.sink.set(Record::new(id.clone(), base.type_name()));
        }
        self.sink
            .get_mut(id.as_str())
            .ok_or_else(|| PublishError::MissingRecord(id.clone()))
    }
}
