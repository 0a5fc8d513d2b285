// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Selection-tree and operation builders.
//!
//! Compiled artifacts are verbose; these helpers build the handful of shapes
//! tests need without spelling out every optional field.

use std::sync::Arc;

use serde_json::Value;
use weft_core::selection::{
    ActorChange, Argument, ArgumentDefinition, Defer, HandleField, LinkedField, ModuleImport,
    NodeKind, Stream,
};
use weft_core::{NormalizationNode, OperationDescriptor, OperationKind, Selection, Variables};

/// Builder for [`LinkedField`] selections.
///
/// # Example
///
/// ```
/// use weft_core::Selection;
/// use weft_dry_tests::LinkedFieldBuilder;
///
/// let friends = LinkedFieldBuilder::new("friends")
///     .concrete("User")
///     .plural()
///     .select(Selection::scalar("id"))
///     .build();
/// assert!(matches!(friends, Selection::LinkedField(ref f) if f.plural));
/// ```
#[derive(Clone, Debug)]
pub struct LinkedFieldBuilder {
    field: LinkedField,
    selections: Vec<Selection>,
}

impl LinkedFieldBuilder {
    /// Singular, abstract-typed field with no arguments.
    pub fn new(name: &str) -> Self {
        Self {
            field: LinkedField {
                alias: None,
                name: name.to_owned(),
                args: Vec::new(),
                storage_key: None,
                concrete_type: None,
                plural: false,
                selections: Arc::from(Vec::new()),
            },
            selections: Vec::new(),
        }
    }

    /// Response alias.
    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.field.alias = Some(alias.to_owned());
        self
    }

    /// Concrete type; omit it to read `__typename` from the response.
    #[must_use]
    pub fn concrete(mut self, type_name: &str) -> Self {
        self.field.concrete_type = Some(type_name.to_owned());
        self
    }

    /// Makes the field a list.
    #[must_use]
    pub fn plural(mut self) -> Self {
        self.field.plural = true;
        self
    }

    /// Adds a literal argument.
    #[must_use]
    pub fn arg(mut self, name: &str, value: Value) -> Self {
        self.field.args.push(Argument::literal(name, value));
        self
    }

    /// Adds a variable argument.
    #[must_use]
    pub fn var_arg(mut self, name: &str, variable: &str) -> Self {
        self.field.args.push(Argument::variable(name, variable));
        self
    }

    /// Adds a child selection.
    #[must_use]
    pub fn select(mut self, selection: Selection) -> Self {
        self.selections.push(selection);
        self
    }

    /// Adds plain scalar children.
    #[must_use]
    pub fn scalars(mut self, names: &[&str]) -> Self {
        self.selections
            .extend(names.iter().map(|name| Selection::scalar(*name)));
        self
    }

    /// The bare [`LinkedField`].
    pub fn into_field(mut self) -> LinkedField {
        self.field.selections = Arc::from(self.selections);
        self.field
    }

    /// The field as a [`Selection`].
    pub fn build(self) -> Selection {
        Selection::LinkedField(self.into_field())
    }
}

/// `@defer` fragment; `label` should contain `$defer$`.
pub fn defer(label: &str, selections: Vec<Selection>) -> Selection {
    Selection::Defer(Defer {
        label: label.to_owned(),
        if_condition: None,
        selections: Arc::from(selections),
    })
}

/// `@defer` gated on a boolean variable.
pub fn defer_if(label: &str, variable: &str, selections: Vec<Selection>) -> Selection {
    Selection::Defer(Defer {
        label: label.to_owned(),
        if_condition: Some(variable.to_owned()),
        selections: Arc::from(selections),
    })
}

/// `@stream` over `field`, which must be a plural linked field to be valid.
pub fn stream(label: &str, field: Selection) -> Selection {
    Selection::Stream(Stream {
        label: label.to_owned(),
        if_condition: None,
        selections: Arc::from(vec![field]),
    })
}

/// `@module` field whose operation reference is read from the response.
pub fn module_import(document_name: &str, fragment_name: &str) -> Selection {
    Selection::ModuleImport(ModuleImport {
        document_name: document_name.to_owned(),
        fragment_name: fragment_name.to_owned(),
        fragment_property_name: String::new(),
        component_module_provider: None,
        operation_module_provider: None,
        args: None,
    })
}

/// Cross-actor field.
pub fn actor_change(field: LinkedField) -> Selection {
    Selection::ActorChange(ActorChange {
        linked_field: field,
    })
}

/// Scalar handle annotation on `name`.
pub fn handle(name: &str, handle: &str) -> Selection {
    Selection::ScalarHandle(HandleField {
        alias: None,
        name: name.to_owned(),
        args: Vec::new(),
        handle: handle.to_owned(),
        key: String::new(),
        filters: None,
        dynamic_key: None,
        handle_args: Vec::new(),
    })
}

/// Compiled operation.
pub fn operation(name: &str, selections: Vec<Selection>) -> Arc<NormalizationNode> {
    Arc::new(NormalizationNode {
        kind: NodeKind::Operation,
        name: name.to_owned(),
        argument_definitions: Vec::new(),
        selections: Arc::from(selections),
    })
}

/// Split operation loaded for a `@module` field.
pub fn split_operation(
    name: &str,
    argument_definitions: Vec<ArgumentDefinition>,
    selections: Vec<Selection>,
) -> Arc<NormalizationNode> {
    Arc::new(NormalizationNode {
        kind: NodeKind::SplitOperation,
        name: name.to_owned(),
        argument_definitions,
        selections: Arc::from(selections),
    })
}

/// Query descriptor for `node` with `variables` (a JSON object, or null).
pub fn query(node: Arc<NormalizationNode>, variables: Value) -> OperationDescriptor {
    OperationDescriptor::new(node, OperationKind::Query, to_variables(variables))
}

/// Subscription descriptor for `node` without variables.
pub fn subscription(node: Arc<NormalizationNode>) -> OperationDescriptor {
    OperationDescriptor::new(node, OperationKind::Subscription, Variables::new())
}

fn to_variables(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}
