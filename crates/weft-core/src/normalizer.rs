// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response normalizer: walks a selection tree and a response body in
//! lock-step and writes a flat record delta.
//!
//! One pass never touches the backing store. It reads and writes only the
//! delta [`RecordSource`] it is handed (seeded with the selector's record),
//! and reports everything it could not finish inline through the
//! [`NormalizationPayload`] side channels: handle payloads, incremental
//! placeholders, and follow-up payloads.
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::EngineConfig;
use crate::constants::{
    module_component_key, module_operation_key, ACTOR_IDENTIFIER_FIELD_NAME, TYPENAME_KEY,
    TYPE_SCHEMA_TYPE, VIEWER_ID, VIEWER_TYPE,
};
use crate::error_trie::ErrorTrie;
use crate::ident::{derive_id, type_record_id, ActorId, DataId};
use crate::payload::{
    ActorPayload, DeferPlaceholder, Diagnostic, DiagnosticKind, FollowupPayload,
    HandleFieldPayload, IncrementalPlaceholder, ModuleImportPayload, NormalizationPayload,
    StreamPlaceholder,
};
use crate::record::{FieldValue, Record, RecordError};
use crate::response::{format_path, PathSegment, ResponseData, ResponseError};
use crate::selection::{
    Defer, HandleField, InlineFragment, LinkedField, ModuleImport, ScalarField, Selection,
    Selector, Stream, Variables,
};
use crate::source::RecordSource;
use crate::storage_key::{
    argument_map, handle_storage_key, local_variables, storage_key, variable_value,
};

/// Contract violations detected while normalizing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// A selection referenced a variable with no bound value.
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    /// An object without a concrete type arrived without `__typename`.
    #[error("expected a typename for the record at `{path}`")]
    MissingTypename {
        /// Response path of the object.
        path: String,
    },
    /// A field value had the wrong shape for its selection.
    #[error("expected field `{key}` at `{path}` to be {expected}")]
    UnexpectedValue {
        /// Storage key of the field.
        key: String,
        /// Response path of the field.
        path: String,
        /// Shape the selection requires.
        expected: &'static str,
    },
    /// The selector's record was not seeded into the delta.
    #[error("expected record `{0}` to exist in the normalization source")]
    MissingRecord(DataId),
    /// A record accessor rejected the write.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Resolves the server identity of a response object.
pub trait EntityIdResolver {
    /// Returns the id for `value` of type `type_name`, or `None` when the
    /// object has no server identity.
    fn resolve(&self, value: &ResponseData, type_name: &str) -> Option<DataId>;
}

/// Viewer objects map to the viewer id; everything else uses its string `id`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIdResolver;

impl EntityIdResolver for DefaultIdResolver {
    fn resolve(&self, value: &ResponseData, type_name: &str) -> Option<DataId> {
        if type_name == VIEWER_TYPE {
            return Some(DataId::from(VIEWER_ID));
        }
        value.get("id").and_then(Value::as_str).map(DataId::from)
    }
}

/// Per-pass normalization policy.
#[derive(Clone)]
pub struct NormalizeOptions {
    /// Write `null` for missing required fields instead of skipping them.
    pub treat_missing_fields_as_null: bool,
    /// Traverse client-component fragments.
    pub process_client_components: bool,
    /// Report conflicting values for one id.
    pub warn_on_conflicts: bool,
    /// Actor stamped on emitted placeholders and follow-ups.
    pub actor: Option<ActorId>,
    /// Response path of the selector's record.
    pub path: Vec<PathSegment>,
    /// Entity identity hook.
    pub id_resolver: Rc<dyn EntityIdResolver>,
}

impl fmt::Debug for NormalizeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizeOptions")
            .field("treat_missing_fields_as_null", &self.treat_missing_fields_as_null)
            .field("process_client_components", &self.process_client_components)
            .field("warn_on_conflicts", &self.warn_on_conflicts)
            .field("actor", &self.actor)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl NormalizeOptions {
    /// Options derived from engine configuration, with the default resolver.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            treat_missing_fields_as_null: config.treat_missing_fields_as_null,
            process_client_components: config.process_client_components,
            warn_on_conflicts: config.warn_on_conflicts,
            actor: None,
            path: Vec::new(),
            id_resolver: Rc::new(DefaultIdResolver),
        }
    }

    /// Same options anchored at `path`.
    #[must_use]
    pub fn with_path(&self, path: Vec<PathSegment>) -> Self {
        Self {
            path,
            ..self.clone()
        }
    }

    /// Same options stamped with `actor`.
    #[must_use]
    pub fn with_actor(&self, actor: Option<ActorId>) -> Self {
        Self {
            actor,
            ..self.clone()
        }
    }
}

/// Normalizes `data` against `selector` into `source`.
///
/// `source` must already contain the selector's record. Server `errors` are
/// attached to the fields their paths point at (relative to
/// [`NormalizeOptions::path`]).
#[instrument(level = "trace", skip_all, fields(data_id = %selector.data_id))]
pub fn normalize(
    source: RecordSource,
    selector: &Selector,
    data: &ResponseData,
    options: &NormalizeOptions,
    errors: Option<&[ResponseError]>,
) -> Result<NormalizationPayload, NormalizeError> {
    if source.get(selector.data_id.as_str()).is_none() {
        return Err(NormalizeError::MissingRecord(selector.data_id.clone()));
    }
    let trie = errors.and_then(ErrorTrie::build);
    let errors = trie.as_ref().and_then(|t| t.descend(&options.path));
    let mut normalizer = Normalizer {
        payload: NormalizationPayload::from_source(source),
        variables: selector.variables.clone(),
        path: options.path.clone(),
        options,
        in_client_extension: false,
    };
    normalizer.traverse(&selector.selections, &selector.data_id, data, errors)?;
    Ok(normalizer.payload)
}

/// Seeds a delta with `Record(selector.data_id, type_name)` and normalizes.
pub fn normalize_into_new_source(
    selector: &Selector,
    type_name: &str,
    data: &ResponseData,
    options: &NormalizeOptions,
    errors: Option<&[ResponseError]>,
) -> Result<NormalizationPayload, NormalizeError> {
    let mut source = RecordSource::new();
    source.set(Record::new(selector.data_id.clone(), type_name));
    normalize(source, selector, data, options, errors)
}

struct Normalizer<'a> {
    payload: NormalizationPayload,
    variables: Variables,
    path: Vec<PathSegment>,
    options: &'a NormalizeOptions,
    in_client_extension: bool,
}

impl Normalizer<'_> {
    fn traverse(
        &mut self,
        selections: &[Selection],
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        for selection in selections {
            match selection {
                Selection::ScalarField(field) => self.normalize_scalar(field, id, data, errors)?,
                Selection::LinkedField(field) => self.normalize_linked(field, id, data, errors)?,
                Selection::Condition(condition) => {
                    let value = variable_value(&condition.condition, &self.variables)?;
                    if truthy(&value) == condition.passing_value {
                        self.traverse(&condition.selections, id, data, errors)?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let scoped = local_variables(
                        &self.variables,
                        &spread.fragment.argument_definitions,
                        &spread.args,
                    )?;
                    let outer = std::mem::replace(&mut self.variables, scoped);
                    let result = self.traverse(&spread.fragment.selections, id, data, errors);
                    self.variables = outer;
                    result?;
                }
                Selection::InlineFragment(fragment) => {
                    self.normalize_inline_fragment(fragment, id, data, errors)?;
                }
                Selection::TypeDiscriminator(discriminator) => {
                    let implements = data.contains_key(&discriminator.abstract_key);
                    self.write_type_flag(id, &discriminator.abstract_key, implements)?;
                }
                Selection::ClientExtension(extension) => {
                    let outer = std::mem::replace(&mut self.in_client_extension, true);
                    let result = self.traverse(&extension.selections, id, data, errors);
                    self.in_client_extension = outer;
                    result?;
                }
                Selection::ClientComponent(component) => {
                    if self.options.process_client_components {
                        self.traverse(&component.fragment.selections, id, data, errors)?;
                    }
                }
                Selection::Defer(defer) => self.normalize_defer(defer, id, data, errors)?,
                Selection::Stream(stream) => self.normalize_stream(stream, id, data, errors)?,
                Selection::ModuleImport(import) => self.normalize_module_import(import, id, data)?,
                Selection::ActorChange(change) => {
                    self.normalize_actor_change(&change.linked_field, id, data)?;
                }
                Selection::ScalarHandle(handle) | Selection::LinkedHandle(handle) => {
                    self.push_handle(handle, id)?;
                }
            }
        }
        Ok(())
    }

    fn normalize_scalar(
        &mut self,
        field: &ScalarField,
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let key = storage_key(
            &field.name,
            &field.args,
            field.storage_key.as_deref(),
            &self.variables,
        )?;
        let Some(value) = data.get(response_key) else {
            return self.missing_field(id, &key, response_key);
        };
        if key == TYPENAME_KEY {
            return self.write_typename(id, value);
        }
        if !value.is_null() {
            self.check_value_conflict(id, &key, value);
        }
        self.record_mut(id)?.set_value(&key, value.clone())?;
        self.attach_errors(id, &key, errors.and_then(|t| t.field(response_key)))
    }

    fn normalize_linked(
        &mut self,
        field: &LinkedField,
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let key = storage_key(
            &field.name,
            &field.args,
            field.storage_key.as_deref(),
            &self.variables,
        )?;
        let field_errors = errors.and_then(|t| t.field(response_key));
        let value = match data.get(response_key) {
            None => return self.missing_field(id, &key, response_key),
            Some(Value::Null) => {
                self.record_mut(id)?.set_value(&key, Value::Null)?;
                return self.attach_errors(id, &key, field_errors);
            }
            Some(value) => value,
        };
        self.path.push(PathSegment::Key(response_key.to_owned()));
        let result = if field.plural {
            self.normalize_plural_link(field, id, &key, value, field_errors)
        } else {
            self.normalize_link(field, id, &key, value, field_errors)
        };
        self.path.pop();
        result
    }

    fn normalize_link(
        &mut self,
        field: &LinkedField,
        parent: &DataId,
        key: &str,
        value: &Value,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        let object = self.expect_object(value, key)?;
        let type_name = self.object_type(field, object)?;
        let previous = self.record(parent)?.linked_id(key)?.cloned();
        let next_id = self
            .options
            .id_resolver
            .resolve(object, &type_name)
            .or_else(|| previous.clone())
            .unwrap_or_else(|| derive_id(parent, key, None));
        if let Some(previous) = &previous {
            self.check_link_conflict(parent, key, previous, &next_id);
        }
        self.record_mut(parent)?
            .set_linked_id(key, next_id.clone())?;
        self.ensure_record(&next_id, &type_name);
        self.traverse(&field.selections, &next_id, object, errors)
    }

    fn normalize_plural_link(
        &mut self,
        field: &LinkedField,
        parent: &DataId,
        key: &str,
        value: &Value,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        let Value::Array(items) = value else {
            return Err(self.unexpected(key, "a list"));
        };
        let previous = self
            .record(parent)?
            .linked_ids(key)?
            .map(<[Option<DataId>]>::to_vec);
        let mut next_ids = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if item.is_null() {
                next_ids.push(None);
                continue;
            }
            let prev_id = previous
                .as_ref()
                .and_then(|ids| ids.get(index).cloned().flatten());
            self.path.push(PathSegment::Index(index));
            let result = self.normalize_item(
                field,
                parent,
                key,
                index,
                item,
                prev_id,
                errors.and_then(|t| t.index(index)),
            );
            self.path.pop();
            next_ids.push(Some(result?));
        }
        self.record_mut(parent)?.set_linked_ids(key, next_ids)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn normalize_item(
        &mut self,
        field: &LinkedField,
        parent: &DataId,
        key: &str,
        index: usize,
        item: &Value,
        prev_id: Option<DataId>,
        errors: Option<&ErrorTrie>,
    ) -> Result<DataId, NormalizeError> {
        let object = self.expect_object(item, key)?;
        let type_name = self.object_type(field, object)?;
        let next_id = self
            .options
            .id_resolver
            .resolve(object, &type_name)
            .or_else(|| prev_id.clone())
            .unwrap_or_else(|| derive_id(parent, key, Some(index)));
        if let Some(prev_id) = &prev_id {
            self.check_link_conflict(parent, key, prev_id, &next_id);
        }
        self.ensure_record(&next_id, &type_name);
        self.traverse(&field.selections, &next_id, object, errors)?;
        Ok(next_id)
    }

    fn normalize_inline_fragment(
        &mut self,
        fragment: &InlineFragment,
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        match &fragment.abstract_key {
            None => {
                if self.record(id)?.type_name() == fragment.type_condition {
                    self.traverse(&fragment.selections, id, data, errors)?;
                }
            }
            Some(abstract_key) => {
                let implements = data.contains_key(abstract_key);
                self.write_type_flag(id, abstract_key, implements)?;
                if implements {
                    self.traverse(&fragment.selections, id, data, errors)?;
                }
            }
        }
        Ok(())
    }

    fn normalize_defer(
        &mut self,
        defer: &Defer,
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        let deferred = match &defer.if_condition {
            None => true,
            Some(var) => truthy(&variable_value(var, &self.variables)?),
        };
        if !deferred {
            return self.traverse(&defer.selections, id, data, errors);
        }
        let type_name = self.record(id)?.type_name().to_owned();
        self.payload
            .incremental_placeholders
            .push(IncrementalPlaceholder::Defer(DeferPlaceholder {
                label: defer.label.clone(),
                path: self.path.clone(),
                selector: Selector::new(
                    id.clone(),
                    Arc::clone(&defer.selections),
                    self.variables.clone(),
                ),
                type_name,
                data: data.clone(),
                actor: self.options.actor.clone(),
            }));
        Ok(())
    }

    fn normalize_stream(
        &mut self,
        stream: &Stream,
        id: &DataId,
        data: &ResponseData,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        self.traverse(&stream.selections, id, data, errors)?;
        let streamed = match &stream.if_condition {
            None => true,
            Some(var) => truthy(&variable_value(var, &self.variables)?),
        };
        if streamed {
            self.payload
                .incremental_placeholders
                .push(IncrementalPlaceholder::Stream(StreamPlaceholder {
                    label: stream.label.clone(),
                    path: self.path.clone(),
                    parent_id: id.clone(),
                    node: stream.clone(),
                    variables: self.variables.clone(),
                    actor: self.options.actor.clone(),
                }));
        }
        Ok(())
    }

    fn normalize_module_import(
        &mut self,
        import: &ModuleImport,
        id: &DataId,
        data: &ResponseData,
    ) -> Result<(), NormalizeError> {
        let type_name = self.record(id)?.type_name().to_owned();
        let component_key = module_component_key(&import.document_name);
        let component = resolve_reference(import.component_module_provider.as_ref(), data, &component_key);
        let operation_key = module_operation_key(&import.document_name);
        let operation = resolve_reference(import.operation_module_provider.as_ref(), data, &operation_key);
        let record = self.record_mut(id)?;
        record.set_value(&component_key, component)?;
        record.set_value(&operation_key, operation.clone())?;
        if let Value::String(reference) = operation {
            self.payload
                .followup_payloads
                .push(FollowupPayload::ModuleImport(ModuleImportPayload {
                    data_id: id.clone(),
                    data: data.clone(),
                    variables: self.variables.clone(),
                    args: import.args.clone(),
                    type_name,
                    path: self.path.clone(),
                    operation_reference: reference,
                    actor: self.options.actor.clone(),
                }));
        }
        Ok(())
    }

    fn normalize_actor_change(
        &mut self,
        field: &LinkedField,
        id: &DataId,
        data: &ResponseData,
    ) -> Result<(), NormalizeError> {
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let key = storage_key(
            &field.name,
            &field.args,
            field.storage_key.as_deref(),
            &self.variables,
        )?;
        let value = match data.get(response_key) {
            None => return self.missing_field(id, &key, response_key),
            Some(Value::Null) => {
                self.record_mut(id)?.set_value(&key, Value::Null)?;
                return Ok(());
            }
            Some(value) => value,
        };
        let object = self.expect_object(value, &key)?;
        let Some(actor) = object
            .get(ACTOR_IDENTIFIER_FIELD_NAME)
            .and_then(Value::as_str)
            .map(ActorId::from)
        else {
            self.record_mut(id)?.set_value(&key, Value::Null)?;
            self.diagnose(
                DiagnosticKind::MissingActorIdentifier,
                id,
                &key,
                format!(
                    "expected a string `{ACTOR_IDENTIFIER_FIELD_NAME}` on field `{response_key}`; the link was cleared"
                ),
            );
            return Ok(());
        };
        let type_name = self.object_type(field, object)?;
        let previous = self
            .record(id)?
            .actor_link(&key)?
            .map(|(_, linked)| linked.clone());
        let next_id = self
            .options
            .id_resolver
            .resolve(object, &type_name)
            .or(previous)
            .unwrap_or_else(|| derive_id(id, &key, None));
        self.record_mut(id)?
            .set_actor_link(&key, actor.clone(), next_id.clone())?;
        let mut path = self.path.clone();
        path.push(PathSegment::Key(response_key.to_owned()));
        self.payload
            .followup_payloads
            .push(FollowupPayload::Actor(ActorPayload {
                data_id: next_id,
                data: object.clone(),
                variables: self.variables.clone(),
                type_name,
                path,
                field: field.clone(),
                actor,
            }));
        Ok(())
    }

    fn push_handle(&mut self, handle: &HandleField, id: &DataId) -> Result<(), NormalizeError> {
        let payload = HandleFieldPayload {
            data_id: id.clone(),
            field_key: storage_key(&handle.name, &handle.args, None, &self.variables)?,
            handle: handle.handle.clone(),
            handle_key: handle_storage_key(handle, &self.variables)?,
            args: argument_map(&handle.args, &self.variables)?,
            handle_args: argument_map(&handle.handle_args, &self.variables)?,
        };
        self.payload.field_payloads.push(payload);
        Ok(())
    }

    fn missing_field(
        &mut self,
        id: &DataId,
        key: &str,
        response_key: &str,
    ) -> Result<(), NormalizeError> {
        if self.in_client_extension {
            return Ok(());
        }
        if self.options.treat_missing_fields_as_null {
            self.record_mut(id)?.set_value(key, Value::Null)?;
            return Ok(());
        }
        self.diagnose(
            DiagnosticKind::MissingField,
            id,
            key,
            format!(
                "payload did not contain a value for field `{response_key}` (storage key `{key}`)"
            ),
        );
        Ok(())
    }

    fn write_typename(&mut self, id: &DataId, value: &Value) -> Result<(), NormalizeError> {
        let current = self.record(id)?.type_name().to_owned();
        match value.as_str() {
            Some(next) if next == current => Ok(()),
            Some(next) if id.is_local() && !id.is_root() => {
                self.record_mut(id)?
                    .set_value(TYPENAME_KEY, Value::String(next.to_owned()))?;
                Ok(())
            }
            _ if id.is_root() => Ok(()),
            _ => {
                self.diagnose(
                    DiagnosticKind::ConflictingType,
                    id,
                    TYPENAME_KEY,
                    format!("expected record `{id}` to have type `{current}` but got {value}"),
                );
                Ok(())
            }
        }
    }

    fn write_type_flag(
        &mut self,
        id: &DataId,
        abstract_key: &str,
        implements: bool,
    ) -> Result<(), NormalizeError> {
        let type_id = type_record_id(self.record(id)?.type_name());
        if self.payload.source.get(type_id.as_str()).is_none() {
            self.payload
                .source
                .set(Record::new(type_id.clone(), TYPE_SCHEMA_TYPE));
        }
        self.record_mut(&type_id)?
            .set_value(abstract_key, Value::Bool(implements))?;
        Ok(())
    }

    fn attach_errors(
        &mut self,
        id: &DataId,
        key: &str,
        errors: Option<&ErrorTrie>,
    ) -> Result<(), NormalizeError> {
        if let Some(errors) = errors.map(ErrorTrie::errors).filter(|e| !e.is_empty()) {
            self.record_mut(id)?.set_errors(key, errors.to_vec())?;
        }
        Ok(())
    }

    fn ensure_record(&mut self, id: &DataId, type_name: &str) {
        let existing = match self.payload.source.get(id.as_str()) {
            None => {
                self.payload.source.set(Record::new(id.clone(), type_name));
                return;
            }
            Some(record) => record.type_name().to_owned(),
        };
        if existing != type_name && !(id.is_local() && !id.is_root()) {
            self.diagnose(
                DiagnosticKind::ConflictingType,
                id,
                TYPENAME_KEY,
                format!("expected record `{id}` to have type `{type_name}` but got `{existing}`"),
            );
        }
    }

    fn check_value_conflict(&mut self, id: &DataId, key: &str, next: &Value) {
        if !self.options.warn_on_conflicts {
            return;
        }
        let previous = match self.payload.source.get(id.as_str()).and_then(|r| r.field(key)) {
            Some(FieldValue::Scalar(previous)) if previous != next => previous.clone(),
            _ => return,
        };
        self.diagnose(
            DiagnosticKind::ConflictingValue,
            id,
            key,
            format!(
                "the record contains two instances of the same id `{id}` with conflicting field `{key}`: {previous} and {next}"
            ),
        );
    }

    fn check_link_conflict(&mut self, parent: &DataId, key: &str, previous: &DataId, next: &DataId) {
        if !self.options.warn_on_conflicts || previous == next {
            return;
        }
        self.diagnose(
            DiagnosticKind::ConflictingLink,
            parent,
            key,
            format!(
                "the record contains references to the conflicting field `{key}` with ids `{previous}` and `{next}`"
            ),
        );
    }

    fn diagnose(&mut self, kind: DiagnosticKind, id: &DataId, key: &str, message: String) {
        warn!(?kind, data_id = %id, storage_key = key, path = %format_path(&self.path), "{message}");
        self.payload.diagnostics.push(Diagnostic {
            kind,
            data_id: id.clone(),
            storage_key: key.to_owned(),
            message,
        });
    }

    fn object_type(&self, field: &LinkedField, object: &ResponseData) -> Result<String, NormalizeError> {
        if let Some(concrete) = &field.concrete_type {
            return Ok(concrete.clone());
        }
        object
            .get(TYPENAME_KEY)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| NormalizeError::MissingTypename {
                path: format_path(&self.path),
            })
    }

    fn expect_object<'v>(&self, value: &'v Value, key: &str) -> Result<&'v ResponseData, NormalizeError> {
        value
            .as_object()
            .ok_or_else(|| self.unexpected(key, "an object"))
    }

    fn unexpected(&self, key: &str, expected: &'static str) -> NormalizeError {
        NormalizeError::UnexpectedValue {
            key: key.to_owned(),
            path: format_path(&self.path),
            expected,
        }
    }

    fn record(&self, id: &DataId) -> Result<&Record, NormalizeError> {
        self.payload
            .source
            .get(id.as_str())
            .map(AsRef::as_ref)
            .ok_or_else(|| NormalizeError::MissingRecord(id.clone()))
    }

    fn record_mut(&mut self, id: &DataId) -> Result<&mut Record, NormalizeError> {
        self.payload
            .source
            .get_mut(id.as_str())
            .ok_or_else(|| NormalizeError::MissingRecord(id.clone()))
    }
}

fn resolve_reference(provided: Option<&String>, data: &ResponseData, key: &str) -> Value {
    provided
        .map(|reference| Value::String(reference.clone()))
        .or_else(|| data.get(key).cloned())
        .unwrap_or(Value::Null)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> ResponseData {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn linked(name: &str, plural: bool, selections: Vec<Selection>) -> Selection {
        Selection::LinkedField(LinkedField {
            alias: None,
            name: name.into(),
            args: Vec::new(),
            storage_key: None,
            concrete_type: None,
            plural,
            selections: selections.into(),
        })
    }

    fn root_selector(selections: Vec<Selection>) -> Selector {
        Selector::new(DataId::root(), selections.into(), Variables::new())
    }

    fn run(selector: &Selector, data: Value) -> NormalizationPayload {
        normalize_into_new_source(
            selector,
            "__Root",
            &object(data),
            &NormalizeOptions::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn server_ids_become_records_and_links() {
        let selector = root_selector(vec![linked(
            "node",
            false,
            vec![Selection::scalar("id"), Selection::scalar("name")],
        )]);
        let payload = run(
            &selector,
            json!({"node": {"id": "1", "__typename": "User", "name": "Alice"}}),
        );
        let user = payload.source.get("1").unwrap();
        assert_eq!(user.type_name(), "User");
        assert_eq!(user.value("name").unwrap(), Some(json!("Alice")));
        let root = payload.source.get("client:root").unwrap();
        assert_eq!(root.linked_id("node").unwrap(), Some(&DataId::from("1")));
        assert!(payload.diagnostics.is_empty());
    }

    #[test]
    fn objects_without_ids_get_derived_ids() {
        let selector = root_selector(vec![linked(
            "items",
            true,
            vec![Selection::scalar("name")],
        )]);
        let payload = run(
            &selector,
            json!({"items": [
                {"__typename": "Item", "name": "a"},
                null,
                {"__typename": "Item", "name": "b"}
            ]}),
        );
        let root = payload.source.get("client:root").unwrap();
        assert_eq!(
            root.linked_ids("items").unwrap().unwrap(),
            &[
                Some(DataId::from("client:root:items:0")),
                None,
                Some(DataId::from("client:root:items:2")),
            ]
        );
    }

    #[test]
    fn missing_typename_without_concrete_type_is_fatal() {
        let selector = root_selector(vec![linked("node", false, vec![])]);
        let err = normalize_into_new_source(
            &selector,
            "__Root",
            &object(json!({"node": {"id": "1"}})),
            &NormalizeOptions::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingTypename {
                path: "node".into()
            }
        );
    }

    #[test]
    fn missing_fields_warn_or_write_null() {
        let selector = root_selector(vec![Selection::scalar("name")]);
        let payload = run(&selector, json!({}));
        assert_eq!(payload.diagnostics[0].kind, DiagnosticKind::MissingField);
        assert!(!payload.source.get("client:root").unwrap().has("name"));

        let options = NormalizeOptions {
            treat_missing_fields_as_null: true,
            ..NormalizeOptions::default()
        };
        let payload = normalize_into_new_source(&selector, "__Root", &ResponseData::new(), &options, None).unwrap();
        assert_eq!(
            payload.source.get("client:root").unwrap().value("name").unwrap(),
            Some(Value::Null)
        );
        assert!(payload.diagnostics.is_empty());
    }

    #[test]
    fn truthiness_matches_boolean_coercion() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
    }
}
