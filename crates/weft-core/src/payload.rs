// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalizer output: the record delta plus side-channel descriptors.
use serde_json::Value;

use crate::ident::{ActorId, DataId};
use crate::response::{PathSegment, ResponseData};
use crate::selection::{Argument, LinkedField, Selector, Stream, Variables};
use crate::source::RecordSource;

/// Derived field a handle handler must materialize after commit.
#[derive(Clone, Debug, PartialEq)]
pub struct HandleFieldPayload {
    /// Record owning the field.
    pub data_id: DataId,
    /// Storage key of the raw field.
    pub field_key: String,
    /// Handler name.
    pub handle: String,
    /// Storage key the derived value goes under.
    pub handle_key: String,
    /// Evaluated field arguments.
    pub args: Variables,
    /// Evaluated handler arguments.
    pub handle_args: Variables,
}

impl HandleFieldPayload {
    /// Identity used to deduplicate payloads cached for deferred parents.
    pub(crate) fn dedupe_key(&self) -> String {
        format!(
            "{}\u{0}{}\u{0}{}\u{0}{}\u{0}{}\u{0}{}",
            self.data_id,
            self.field_key,
            self.handle,
            self.handle_key,
            Value::Object(self.args.clone()),
            Value::Object(self.handle_args.clone()),
        )
    }
}

/// Nested response fragment that must be normalized against another subtree.
#[derive(Clone, Debug, PartialEq)]
pub enum FollowupPayload {
    /// `@module` data waiting for its split operation.
    ModuleImport(ModuleImportPayload),
    /// Data belonging to another actor's partition.
    Actor(ActorPayload),
}

/// Follow-up for a `@module` field.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleImportPayload {
    /// Record the split operation is anchored at.
    pub data_id: DataId,
    /// Response object the module selections apply to.
    pub data: ResponseData,
    /// Variables in scope at the field.
    pub variables: Variables,
    /// Arguments forwarded to the split operation.
    pub args: Option<Vec<Argument>>,
    /// Type of the anchor record.
    pub type_name: String,
    /// Response path of the anchor.
    pub path: Vec<PathSegment>,
    /// Operation reference the loader resolves.
    pub operation_reference: String,
    /// Actor the anchor record belongs to.
    pub actor: Option<ActorId>,
}

/// Follow-up for a cross-partition field.
#[derive(Clone, Debug, PartialEq)]
pub struct ActorPayload {
    /// Record id inside the target partition.
    pub data_id: DataId,
    /// Response object for the field.
    pub data: ResponseData,
    /// Variables in scope at the field.
    pub variables: Variables,
    /// Type of the target record.
    pub type_name: String,
    /// Response path of the field.
    pub path: Vec<PathSegment>,
    /// The field whose selections apply to `data`.
    pub field: LinkedField,
    /// Partition the data belongs to.
    pub actor: ActorId,
}

/// Promise that a labeled chunk will arrive later.
#[derive(Clone, Debug, PartialEq)]
pub enum IncrementalPlaceholder {
    /// `@defer` fragment.
    Defer(DeferPlaceholder),
    /// `@stream` field.
    Stream(StreamPlaceholder),
}

impl IncrementalPlaceholder {
    /// Chunk label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Defer(p) => &p.label,
            Self::Stream(p) => &p.label,
        }
    }

    /// Response path of the parent object.
    #[must_use]
    pub fn path(&self) -> &[PathSegment] {
        match self {
            Self::Defer(p) => &p.path,
            Self::Stream(p) => &p.path,
        }
    }

    /// Record the deferred/streamed data attaches to.
    #[must_use]
    pub fn parent_id(&self) -> &DataId {
        match self {
            Self::Defer(p) => &p.selector.data_id,
            Self::Stream(p) => &p.parent_id,
        }
    }

    /// Actor the parent belongs to.
    #[must_use]
    pub fn actor(&self) -> Option<&ActorId> {
        match self {
            Self::Defer(p) => p.actor.as_ref(),
            Self::Stream(p) => p.actor.as_ref(),
        }
    }
}

/// Placeholder for a `@defer` fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct DeferPlaceholder {
    /// Defer label.
    pub label: String,
    /// Response path of the parent object.
    pub path: Vec<PathSegment>,
    /// Deferred selections anchored at the parent record.
    pub selector: Selector,
    /// Type of the parent record.
    pub type_name: String,
    /// Inline data skipped at the defer site.
    pub data: ResponseData,
    /// Actor the parent belongs to.
    pub actor: Option<ActorId>,
}

/// Placeholder for a `@stream` field.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamPlaceholder {
    /// Stream label.
    pub label: String,
    /// Response path of the parent object.
    pub path: Vec<PathSegment>,
    /// Record owning the streamed list.
    pub parent_id: DataId,
    /// Stream selection.
    pub node: Stream,
    /// Variables in scope at the stream.
    pub variables: Variables,
    /// Actor the parent belongs to.
    pub actor: Option<ActorId>,
}

/// Category of an advisory diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A required field was absent from the response.
    MissingField,
    /// One id received two different values for a scalar field.
    ConflictingValue,
    /// One id received two different links for a field.
    ConflictingLink,
    /// A record was reached with a different type than it already had.
    ConflictingType,
    /// A cross-partition field carried no actor identifier.
    MissingActorIdentifier,
}

/// Non-fatal finding reported by the normalizer; processing continued.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// Category.
    pub kind: DiagnosticKind,
    /// Record involved.
    pub data_id: DataId,
    /// Storage key involved.
    pub storage_key: String,
    /// Human-readable description.
    pub message: String,
}

/// Everything one normalization pass produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizationPayload {
    /// Record delta.
    pub source: RecordSource,
    /// Derived fields to materialize.
    pub field_payloads: Vec<HandleFieldPayload>,
    /// Incremental chunks still to come.
    pub incremental_placeholders: Vec<IncrementalPlaceholder>,
    /// Nested fragments to normalize separately.
    pub followup_payloads: Vec<FollowupPayload>,
    /// Advisory findings.
    pub diagnostics: Vec<Diagnostic>,
    /// The server promised no further chunks.
    pub is_final: bool,
}

impl NormalizationPayload {
    /// Payload carrying only a record delta.
    #[must_use]
    pub fn from_source(source: RecordSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }
}
