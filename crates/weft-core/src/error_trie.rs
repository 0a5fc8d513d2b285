// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server errors indexed by response path.
use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::response::{PathSegment, ResponseError};

/// Trie of server errors keyed by response path segments.
///
/// Errors live at the node their path ends on; the normalizer walks the trie
/// in step with the response and attaches each node's errors to the record
/// field it is normalizing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorTrie {
    errors: Vec<Value>,
    children: BTreeMap<PathSegment, ErrorTrie>,
}

impl ErrorTrie {
    /// Builds a trie from `errors`; errors without a path are skipped.
    /// Returns `None` when nothing could be placed.
    #[must_use]
    pub fn build(errors: &[ResponseError]) -> Option<Self> {
        let mut root = Self::default();
        let mut placed = false;
        for error in errors {
            let Some(path) = error.path.as_deref().filter(|p| !p.is_empty()) else {
                continue;
            };
            let mut node = &mut root;
            for segment in path {
                node = node.children.entry(segment.clone()).or_default();
            }
            node.errors.push(json!({
                "message": error.message,
                "path": path.iter().map(PathSegment::to_value).collect::<Vec<_>>(),
            }));
            placed = true;
        }
        placed.then_some(root)
    }

    /// Subtrie for a field response key.
    #[must_use]
    pub fn field(&self, response_key: &str) -> Option<&Self> {
        self.children.get(&PathSegment::Key(response_key.to_owned()))
    }

    /// Subtrie for a list index.
    #[must_use]
    pub fn index(&self, index: usize) -> Option<&Self> {
        self.children.get(&PathSegment::Index(index))
    }

    /// Walks `path` from this node.
    #[must_use]
    pub fn descend(&self, path: &[PathSegment]) -> Option<&Self> {
        path.iter()
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    /// Errors whose path ends at this node.
    #[must_use]
    pub fn errors(&self) -> &[Value] {
        &self.errors
    }
}
