// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reserved keys, identifiers, and type names shared across the engine.
//!
//! These strings are part of the graph's on-memory contract: the normalizer
//! writes them, the store and publish queue read them, and compiled selection
//! trees assume them. Changing any of them changes record identity.

/// Prefix marking graph-local identifiers (ids the engine synthesized).
pub const LOCAL_ID_PREFIX: &str = "client:";

/// Identifier of the singleton root record every operation is anchored to.
pub const ROOT_ID: &str = "client:root";

/// Type name of the singleton root record.
pub const ROOT_TYPE: &str = "__Root";

/// Identifier assigned to `Viewer` typed objects by the default id resolver.
pub const VIEWER_ID: &str = "client:root:viewer";

/// Type name that the default id resolver maps to [`VIEWER_ID`].
pub const VIEWER_TYPE: &str = "Viewer";

/// Reserved record field holding the record's own identifier.
pub const ID_KEY: &str = "__id";

/// Reserved record field holding the record's type name. Also the response
/// key servers use to report an object's concrete type.
pub const TYPENAME_KEY: &str = "__typename";

/// Reserved record field holding per-field server errors.
pub const ERRORS_KEY: &str = "__errors";

/// Type name of the synthetic per-type records holding abstract-type flags.
pub const TYPE_SCHEMA_TYPE: &str = "__TypeSchema";

/// Response field carrying the actor identifier for cross-partition fields.
pub const ACTOR_IDENTIFIER_FIELD_NAME: &str = "actor_key";

/// Marker that identifies `@defer` labels; any other label is a `@stream`.
pub const DEFER_LABEL_MARKER: &str = "$defer$";

/// Extension key stamped on subscription chunks with the root id their data
/// was normalized under.
pub const SUBSCRIPTION_ROOT_ID_KEY: &str = "__subscription_root_id";

/// Actor used when an execution is not partitioned.
pub const DEFAULT_ACTOR_ID: &str = "actor:default";

/// Largest number of null slots a single streamed item may open past the end
/// of the list it extends.
pub const MAX_STREAM_INDEX_GAP: usize = 1 << 16;

/// Record key holding the component reference resolved for a `@module` field.
#[must_use]
pub fn module_component_key(document_name: &str) -> String {
    format!("__module_component_{document_name}")
}

/// Record key holding the operation reference resolved for a `@module` field.
#[must_use]
pub fn module_operation_key(document_name: &str) -> String {
    format!("__module_operation_{document_name}")
}
