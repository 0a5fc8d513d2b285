// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request and operation descriptors.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::DataId;
use crate::selection::{NormalizationNode, Selector, Variables};

/// Stable identity of a request: operation name plus its variables.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Identifier for `name` executed with `variables`.
    #[must_use]
    pub fn for_request(name: &str, variables: &Variables) -> Self {
        Self(format!("{name}{}", Value::Object(variables.clone())))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of GraphQL operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Read.
    Query,
    /// Write.
    Mutation,
    /// Server push; each root chunk is a separate event.
    Subscription,
}

/// Request identity handed to trackers and subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    /// Request identifier.
    pub identifier: RequestId,
    /// Operation name.
    pub name: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Bound variables.
    pub variables: Variables,
}

/// An operation bound to variables, anchored at the root record.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationDescriptor {
    /// Request identity.
    pub request: RequestDescriptor,
    /// Root selector (`client:root` + operation selections).
    pub root: Selector,
    /// Compiled operation.
    pub node: Arc<NormalizationNode>,
}

impl OperationDescriptor {
    /// Binds `node` to `variables`.
    pub fn new(node: Arc<NormalizationNode>, kind: OperationKind, variables: Variables) -> Self {
        let request = RequestDescriptor {
            identifier: RequestId::for_request(&node.name, &variables),
            name: node.name.clone(),
            kind,
            variables: variables.clone(),
        };
        let root = Selector::new(DataId::root(), Arc::clone(&node.selections), variables);
        Self {
            request,
            root,
            node,
        }
    }

    /// Returns `true` for subscription operations.
    #[must_use]
    pub fn is_subscription(&self) -> bool {
        self.request.kind == OperationKind::Subscription
    }
}
