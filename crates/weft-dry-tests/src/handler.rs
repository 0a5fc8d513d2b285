// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handle-field handler that mirrors a field under its handle key.

use std::cell::Cell;
use std::rc::Rc;

use weft_core::{HandleFieldHandler, HandleFieldPayload, PublishError, RecordSourceProxy};

/// Copies the raw field to the handle key.
///
/// Plural links are copied as plural links, single links as links, and
/// anything else as a scalar. A missing raw field is skipped.
#[derive(Clone, Debug, Default)]
pub struct CopyFieldHandler {
    calls: Rc<Cell<usize>>,
}

impl CopyFieldHandler {
    /// Fresh handler with a zero call count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads handled.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl HandleFieldHandler for CopyFieldHandler {
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), PublishError> {
        self.calls.set(self.calls.get() + 1);
        let id = &payload.data_id;
        if !proxy.exists(id) {
            return Ok(());
        }
        if let Ok(Some(ids)) = proxy.linked_ids(id, &payload.field_key) {
            return proxy.set_linked_ids(id, &payload.handle_key, ids);
        }
        if let Ok(Some(target)) = proxy.linked_id(id, &payload.field_key) {
            return proxy.set_linked_id(id, &payload.handle_key, target);
        }
        match proxy.get_value(id, &payload.field_key)? {
            Some(value) => proxy.set_value(id, &payload.handle_key, value),
            None => Ok(()),
        }
    }
}
