// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Compiled selection trees consumed by the normalizer.
//!
//! Trees are produced ahead of time by a query compiler and loaded as JSON
//! artifacts (`"kind"`-tagged, camelCase fields). The engine never mutates
//! them; subtrees are shared behind [`Arc`] so placeholders and selectors can
//! point into a tree without copying it.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::DataId;

/// Bound operation variables.
pub type Variables = serde_json::Map<String, Value>;

/// Shared list of child selections.
pub type Selections = Arc<[Selection]>;

fn empty_selections() -> Selections {
    Arc::from(Vec::new())
}

/// Field or directive argument as written in the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Argument {
    /// Constant value.
    Literal(LiteralArgument),
    /// Reference to an operation or fragment variable.
    Variable(VariableArgument),
    /// Object built from nested arguments.
    ObjectValue(ObjectArgument),
    /// List built from nested arguments.
    ListValue(ListArgument),
}

impl Argument {
    /// Argument name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Literal(a) => &a.name,
            Self::Variable(a) => &a.name,
            Self::ObjectValue(a) => &a.name,
            Self::ListValue(a) => &a.name,
        }
    }

    /// Shorthand for a literal argument.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self::Literal(LiteralArgument {
            name: name.into(),
            value,
        })
    }

    /// Shorthand for a variable argument.
    pub fn variable(name: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self::Variable(VariableArgument {
            name: name.into(),
            variable_name: variable_name.into(),
        })
    }
}

/// Constant argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiteralArgument {
    /// Argument name.
    pub name: String,
    /// Constant value.
    pub value: Value,
}

/// Variable-bound argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableArgument {
    /// Argument name.
    pub name: String,
    /// Variable the value is read from.
    pub variable_name: String,
}

/// Object-valued argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectArgument {
    /// Argument name.
    pub name: String,
    /// Object fields, one argument per key.
    pub fields: Vec<Argument>,
}

/// List-valued argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListArgument {
    /// Argument name.
    pub name: String,
    /// List items; `None` is a null item.
    pub items: Vec<Option<Argument>>,
}

/// Variable declared by an operation or fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ArgumentDefinition {
    /// Fragment-local variable with a default.
    LocalArgument {
        /// Variable name.
        name: String,
        /// Value used when the spread does not pass one.
        #[serde(rename = "defaultValue", default)]
        default_value: Value,
    },
    /// Variable read from the enclosing operation.
    RootArgument {
        /// Variable name.
        name: String,
    },
}

impl ArgumentDefinition {
    /// Declared variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::LocalArgument { name, .. } | Self::RootArgument { name } => name,
        }
    }
}

/// One node of a selection tree. The variant set is closed; the normalizer
/// matches on it exhaustively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    /// Scalar-valued field.
    ScalarField(ScalarField),
    /// Object-valued field, singular or plural.
    LinkedField(LinkedField),
    /// Subtree included only when a boolean variable matches.
    Condition(Condition),
    /// Named fragment with its own variable scope.
    FragmentSpread(FragmentSpread),
    /// Subtree applying to one concrete or abstract type.
    InlineFragment(InlineFragment),
    /// Records abstract-type membership without selecting fields.
    TypeDiscriminator(TypeDiscriminator),
    /// Client-only schema extension; its fields never come from the server.
    ClientExtension(ClientExtension),
    /// Fragment rendered by a client component.
    ClientComponent(ClientComponent),
    /// `@defer`-ed subtree.
    Defer(Defer),
    /// `@stream`-ed plural field.
    Stream(Stream),
    /// Lazily-resolved `@module` field.
    ModuleImport(ModuleImport),
    /// Field whose value lives in another actor's partition.
    ActorChange(ActorChange),
    /// Handle annotation on a scalar field.
    ScalarHandle(HandleField),
    /// Handle annotation on a linked field.
    LinkedHandle(HandleField),
}

/// Scalar field selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarField {
    /// Response alias, when different from the name.
    #[serde(default)]
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Field arguments.
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Precomputed storage key when all arguments are literals.
    #[serde(default)]
    pub storage_key: Option<String>,
}

/// Linked (object-valued) field selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedField {
    /// Response alias, when different from the name.
    #[serde(default)]
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Field arguments.
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Precomputed storage key when all arguments are literals.
    #[serde(default)]
    pub storage_key: Option<String>,
    /// Concrete type when the field's type is not abstract.
    #[serde(default)]
    pub concrete_type: Option<String>,
    /// Whether the field is a list.
    #[serde(default)]
    pub plural: bool,
    /// Child selections.
    #[serde(default = "empty_selections")]
    pub selections: Selections,
}

/// Boolean-variable conditional subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Variable holding the condition.
    pub condition: String,
    /// Value the variable must have for the subtree to apply.
    pub passing_value: bool,
    /// Child selections.
    pub selections: Selections,
}

/// Reusable fragment definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Fragment name.
    pub name: String,
    /// Declared fragment variables.
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,
    /// Child selections.
    pub selections: Selections,
}

/// Spread of a fragment with arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSpread {
    /// Spread fragment.
    pub fragment: Fragment,
    /// Arguments passed at the spread site.
    #[serde(default)]
    pub args: Vec<Argument>,
}

/// Type-conditioned inline fragment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    /// Type condition.
    #[serde(rename = "type")]
    pub type_condition: String,
    /// Response key that is present iff the object implements the
    /// (abstract) type condition.
    #[serde(default)]
    pub abstract_key: Option<String>,
    /// Child selections.
    pub selections: Selections,
}

/// Abstract-type membership check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDiscriminator {
    /// Response key that is present iff the object implements the type.
    pub abstract_key: String,
}

/// Client-only extension subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientExtension {
    /// Child selections.
    pub selections: Selections,
}

/// Fragment processed for client-rendered components.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientComponent {
    /// Component fragment.
    pub fragment: Fragment,
}

/// `@defer` subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defer {
    /// Label the server echoes on the deferred chunk.
    pub label: String,
    /// Variable gating deferral; `None` means always deferred.
    #[serde(rename = "if", default)]
    pub if_condition: Option<String>,
    /// Deferred selections.
    pub selections: Selections,
}

/// `@stream` field; its first selection is the plural linked field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    /// Label the server echoes on streamed chunks.
    pub label: String,
    /// Variable gating streaming; `None` means always streamed.
    #[serde(rename = "if", default)]
    pub if_condition: Option<String>,
    /// Streamed selections.
    pub selections: Selections,
}

/// Lazily-resolved `@module` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleImport {
    /// Name of the document owning the `@match`.
    pub document_name: String,
    /// Fragment selected by the module.
    pub fragment_name: String,
    /// Property name the fragment is exposed under.
    #[serde(default)]
    pub fragment_property_name: String,
    /// Statically known component reference.
    #[serde(default)]
    pub component_module_provider: Option<String>,
    /// Statically known operation reference.
    #[serde(default)]
    pub operation_module_provider: Option<String>,
    /// Arguments forwarded to the split operation.
    #[serde(default)]
    pub args: Option<Vec<Argument>>,
}

/// Cross-partition field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorChange {
    /// The linked field whose value belongs to another actor.
    pub linked_field: LinkedField,
}

/// Handle annotation describing a derived field a handler materializes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleField {
    /// Response alias, when different from the name.
    #[serde(default)]
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Field arguments.
    #[serde(default)]
    pub args: Vec<Argument>,
    /// Handler name.
    pub handle: String,
    /// Explicit handle key; empty means "use the field name".
    #[serde(default)]
    pub key: String,
    /// Argument names that partition the handle's storage.
    #[serde(default)]
    pub filters: Option<Vec<String>>,
    /// Extra argument partitioning the handle's storage.
    #[serde(default)]
    pub dynamic_key: Option<Argument>,
    /// Arguments passed to the handler.
    #[serde(default)]
    pub handle_args: Vec<Argument>,
}

/// Kind of a top-level normalization artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A full operation.
    Operation,
    /// A split operation loaded for a `@module` field.
    SplitOperation,
}

/// Root artifact: an operation or a split operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationNode {
    /// Artifact kind.
    pub kind: NodeKind,
    /// Operation or split operation name.
    pub name: String,
    /// Declared variables.
    #[serde(default)]
    pub argument_definitions: Vec<ArgumentDefinition>,
    /// Root selections.
    pub selections: Selections,
}

/// "Normalize this response against this entity using this subtree."
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    /// Entity the subtree is anchored at.
    pub data_id: DataId,
    /// Subtree to traverse.
    pub selections: Selections,
    /// Variables bound for the traversal.
    pub variables: Variables,
}

impl Selector {
    /// Builds a selector.
    pub fn new(data_id: DataId, selections: Selections, variables: Variables) -> Self {
        Self {
            data_id,
            selections,
            variables,
        }
    }
}

impl Selection {
    /// Shorthand for a plain scalar field selection.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::ScalarField(ScalarField {
            alias: None,
            name: name.into(),
            args: Vec::new(),
            storage_key: None,
        })
    }
}
