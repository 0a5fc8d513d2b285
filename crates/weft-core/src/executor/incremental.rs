// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `@defer`/`@stream` bookkeeping.
//!
//! Chunks are keyed by `(label, path)`. A chunk that arrives before its
//! placeholder is buffered; registering the placeholder replays the buffer
//! once and replaces it, so each buffered chunk is processed exactly once.
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{Executor, ExecutorError};
use crate::constants::{DEFER_LABEL_MARKER, MAX_STREAM_INDEX_GAP, TYPENAME_KEY};
use crate::ident::{derive_id, DataId};
use crate::mutator::RecordSourceProxy;
use crate::payload::{
    DeferPlaceholder, HandleFieldPayload, IncrementalPlaceholder, NormalizationPayload,
    StreamPlaceholder,
};
use crate::publish_queue::StoreUpdater;
use crate::record::Record;
use crate::response::{format_path, PathSegment, ResponseChunk, ResponseData};
use crate::selection::{LinkedField, Selection, Selector};
use crate::storage_key::storage_key;

/// An incremental chunk split from its envelope.
#[derive(Clone, Debug)]
pub(super) struct IncrementalResponse {
    pub label: String,
    pub path: Vec<PathSegment>,
    pub chunk: ResponseChunk,
}

#[derive(Debug)]
pub(super) enum IncrementalResult {
    Placeholder(IncrementalPlaceholder),
    Responses(Vec<IncrementalResponse>),
}

/// label → path key → placeholder or buffered chunks.
pub(super) type IncrementalResults = BTreeMap<String, BTreeMap<String, IncrementalResult>>;

/// This execution's view of a deferred/streamed parent: the record as last
/// observed plus the handle payloads computed for it.
#[derive(Clone, Debug)]
pub(super) struct ParentEntry {
    pub record: Arc<Record>,
    pub field_payloads: Vec<HandleFieldPayload>,
}

struct StreamItem {
    payload: NormalizationPayload,
    field_payloads: Vec<HandleFieldPayload>,
    storage_key: String,
    prev_ids: Vec<Option<DataId>>,
    item_id: DataId,
    index: usize,
}

const fn kind_name(placeholder: &IncrementalPlaceholder) -> &'static str {
    match placeholder {
        IncrementalPlaceholder::Defer(_) => "@defer",
        IncrementalPlaceholder::Stream(_) => "@stream",
    }
}

fn place(ids: &mut Vec<Option<DataId>>, index: usize, id: DataId) {
    if index >= ids.len() {
        ids.resize(index + 1, None);
    }
    ids[index] = Some(id);
}

/// Writes `parent.field[index] = item` unless the list changed since this
/// execution last observed it.
fn stream_item_updater(
    parent_id: DataId,
    storage_key: String,
    prev_ids: Vec<Option<DataId>>,
    item_id: DataId,
    index: usize,
) -> StoreUpdater {
    Rc::new(move |proxy: &mut RecordSourceProxy<'_>| {
        if !proxy.exists(&parent_id) {
            return Ok(());
        }
        let Some(mut current) = proxy.linked_ids(&parent_id, &storage_key)? else {
            return Ok(());
        };
        if current != prev_ids {
            debug!(parent = %parent_id, field = %storage_key, index, "stale stream item skipped");
            return Ok(());
        }
        place(&mut current, index, item_id.clone());
        proxy.set_linked_ids(&parent_id, &storage_key, current)
    })
}

impl Executor {
    /// Registers `placeholder`, caches its parent record and replays any
    /// chunks that arrived early.
    pub(super) fn process_incremental_placeholder(
        &mut self,
        payload: &NormalizationPayload,
        placeholder: &IncrementalPlaceholder,
    ) -> Result<(), ExecutorError> {
        let path_key = format_path(placeholder.path());
        let buffered = match self
            .incremental_results
            .entry(placeholder.label().to_owned())
            .or_default()
            .insert(path_key, IncrementalResult::Placeholder(placeholder.clone()))
        {
            Some(IncrementalResult::Responses(responses)) => responses,
            _ => Vec::new(),
        };

        let parent_id = placeholder.parent_id();
        let parent_record = payload
            .source
            .get(parent_id.as_str())
            .cloned()
            .ok_or_else(|| ExecutorError::MissingParentRecord(parent_id.clone()))?;
        let parent_payloads = payload.field_payloads.iter().filter(|p| {
            &p.data_id == parent_id || &derive_id(&p.data_id, &p.field_key, None) == parent_id
        });
        let entry = match self.parents.get(parent_id) {
            Some(previous) => {
                let mut field_payloads = previous.field_payloads.clone();
                for candidate in parent_payloads {
                    let key = candidate.dedupe_key();
                    if !field_payloads.iter().any(|p| p.dedupe_key() == key) {
                        field_payloads.push(candidate.clone());
                    }
                }
                ParentEntry {
                    record: Record::update(&previous.record, &parent_record)?,
                    field_payloads,
                }
            }
            None => ParentEntry {
                record: parent_record,
                field_payloads: parent_payloads.cloned().collect(),
            },
        };
        self.parents.insert(parent_id.clone(), entry);

        if !buffered.is_empty() {
            debug!(label = placeholder.label(), replayed = buffered.len(), "replaying buffered chunks");
            let payloads = self.process_incremental_responses(buffered)?;
            self.process_payload_followups(payloads)?;
        }
        Ok(())
    }

    /// Buffers or processes incremental chunks, depending on whether their
    /// placeholder is registered.
    pub(super) fn process_incremental_responses(
        &mut self,
        responses: Vec<IncrementalResponse>,
    ) -> Result<Vec<NormalizationPayload>, ExecutorError> {
        let mut payloads = Vec::new();
        for response in responses {
            let is_defer = response.label.contains(DEFER_LABEL_MARKER);
            // Stream chunk paths end in `field, index`; the placeholder sits
            // at the parent.
            let key_path = if is_defer {
                &response.path[..]
            } else {
                &response.path[..response.path.len().saturating_sub(2)]
            };
            let path_key = format_path(key_path);
            let results = self
                .incremental_results
                .entry(response.label.clone())
                .or_default();
            let placeholder = match results.get_mut(&path_key) {
                None => {
                    results.insert(path_key, IncrementalResult::Responses(vec![response]));
                    continue;
                }
                Some(IncrementalResult::Responses(buffer)) => {
                    buffer.push(response);
                    continue;
                }
                Some(IncrementalResult::Placeholder(placeholder)) => placeholder.clone(),
            };
            let payload = match (is_defer, &placeholder) {
                (true, IncrementalPlaceholder::Defer(defer)) => {
                    self.process_defer_response(defer, &response.chunk)?
                }
                (false, IncrementalPlaceholder::Stream(stream)) => {
                    self.process_stream_response(stream, &response)?
                }
                (_, other) => {
                    return Err(ExecutorError::PlaceholderMismatch {
                        label: response.label,
                        path: path_key,
                        expected: if is_defer { "@defer" } else { "@stream" },
                        found: kind_name(other),
                    })
                }
            };
            payloads.push(payload);
        }
        Ok(payloads)
    }

    /// Processes deferred placeholders from their inline data; used when no
    /// incremental chunks will follow.
    pub(super) fn walk_deferred_eagerly(
        &mut self,
        payload: &NormalizationPayload,
    ) -> Result<(), ExecutorError> {
        if !self.client_payload {
            warn!(
                operation = %self.operation.request.name,
                "operation contains @defer/@stream directives but was executed in non-streaming mode"
            );
        }
        let mut eager = Vec::new();
        for placeholder in &payload.incremental_placeholders {
            if let IncrementalPlaceholder::Defer(defer) = placeholder {
                let chunk = ResponseChunk::data(defer.data.clone());
                eager.push(self.process_defer_response(defer, &chunk)?);
            }
        }
        if eager.is_empty() {
            return Ok(());
        }
        self.process_payload_followups(eager)
    }

    /// Commits a deferred fragment, then replays the parent's handle payloads.
    pub(super) fn process_defer_response(
        &mut self,
        placeholder: &DeferPlaceholder,
        chunk: &ResponseChunk,
    ) -> Result<NormalizationPayload, ExecutorError> {
        self.with_actor(placeholder.actor.as_ref(), |this| {
            let payload = this.normalize_chunk(
                chunk,
                &placeholder.selector,
                &placeholder.type_name,
                placeholder.path.clone(),
            )?;
            let queue = this.queue_and_save_actor()?;
            queue.commit_payload(&this.operation, payload.clone(), None);
            let parent_id = &placeholder.selector.data_id;
            let parent = this
                .parents
                .get(parent_id)
                .ok_or_else(|| ExecutorError::UnregisteredParent(parent_id.clone()))?;
            if !parent.field_payloads.is_empty() {
                let handles = NormalizationPayload {
                    field_payloads: parent.field_payloads.clone(),
                    is_final: chunk.is_final(),
                    ..NormalizationPayload::default()
                };
                queue.commit_payload(&this.operation, handles, None);
            }
            Ok(payload)
        })
    }

    /// Commits one streamed list item.
    fn process_stream_response(
        &mut self,
        placeholder: &StreamPlaceholder,
        response: &IncrementalResponse,
    ) -> Result<NormalizationPayload, ExecutorError> {
        self.with_actor(placeholder.actor.as_ref(), |this| {
            let Some(Selection::LinkedField(field)) = placeholder.node.selections.first() else {
                return Err(ExecutorError::StreamOnNonPluralField);
            };
            if !field.plural {
                return Err(ExecutorError::StreamOnNonPluralField);
            }
            let item = this.normalize_stream_item(placeholder, field, response)?;
            let queue = this.queue_and_save_actor()?;
            let updater = stream_item_updater(
                placeholder.parent_id.clone(),
                item.storage_key,
                item.prev_ids,
                item.item_id,
                item.index,
            );
            queue.commit_payload(&this.operation, item.payload.clone(), Some(updater));
            if !item.field_payloads.is_empty() {
                let handles = NormalizationPayload {
                    field_payloads: item.field_payloads,
                    is_final: response.chunk.is_final(),
                    ..NormalizationPayload::default()
                };
                queue.commit_payload(&this.operation, handles, None);
            }
            Ok(item.payload)
        })
    }

    fn normalize_stream_item(
        &mut self,
        placeholder: &StreamPlaceholder,
        field: &LinkedField,
        response: &IncrementalResponse,
    ) -> Result<StreamItem, ExecutorError> {
        let empty = ResponseData::new();
        let data = response.chunk.data.as_ref().unwrap_or(&empty);
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let key = storage_key(
            &field.name,
            &field.args,
            field.storage_key.as_deref(),
            &placeholder.variables,
        )?;
        let parent_id = &placeholder.parent_id;
        let parent = self
            .parents
            .get(parent_id)
            .ok_or_else(|| ExecutorError::UnregisteredParent(parent_id.clone()))?;
        let prev_ids = parent
            .record
            .linked_ids(&key)?
            .map(<[Option<DataId>]>::to_vec)
            .ok_or_else(|| ExecutorError::StreamFieldNotFetched {
                id: parent_id.clone(),
                field: field.name.clone(),
            })?;
        let index = match response.path.last() {
            Some(PathSegment::Index(index)) => *index,
            other => {
                return Err(ExecutorError::StreamIndex(
                    other.map_or_else(String::new, ToString::to_string),
                ))
            }
        };
        if index > prev_ids.len().saturating_add(MAX_STREAM_INDEX_GAP) {
            return Err(ExecutorError::StreamIndexOutOfRange {
                index,
                len: prev_ids.len(),
            });
        }
        let type_name = match &field.concrete_type {
            Some(concrete) => concrete.clone(),
            None => data
                .get(TYPENAME_KEY)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| ExecutorError::StreamTypename(field.name.clone()))?,
        };
        let item_id = self
            .options
            .id_resolver
            .resolve(data, &type_name)
            .or_else(|| prev_ids.get(index).cloned().flatten())
            .unwrap_or_else(|| derive_id(parent_id, &key, Some(index)));

        let mut next_ids = prev_ids.clone();
        place(&mut next_ids, index, item_id.clone());
        let mut next_parent = parent.record.thaw();
        next_parent.set_linked_ids(&key, next_ids)?;
        let field_payloads = parent.field_payloads.clone();
        self.parents.insert(
            parent_id.clone(),
            ParentEntry {
                record: Arc::new(next_parent),
                field_payloads: field_payloads.clone(),
            },
        );

        let selector = Selector::new(
            item_id.clone(),
            Arc::clone(&field.selections),
            placeholder.variables.clone(),
        );
        let mut path = placeholder.path.clone();
        path.push(PathSegment::Key(response_key.to_owned()));
        path.push(PathSegment::Index(index));
        let payload = self.normalize_data(
            data,
            response.chunk.errors.as_deref(),
            response.chunk.is_final(),
            &selector,
            &type_name,
            path,
        )?;
        Ok(StreamItem {
            payload,
            field_payloads,
            storage_key: key,
            prev_ids,
            item_id,
            index,
        })
    }
}
