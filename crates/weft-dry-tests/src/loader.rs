// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation loader fake with synchronous and manually resolved modules.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use weft_core::{ModuleCompletion, NormalizationNode, OperationLoader};

#[derive(Debug, Default)]
struct Modules {
    available: BTreeMap<String, Arc<NormalizationNode>>,
    pending: Vec<(String, ModuleCompletion)>,
    requested: Vec<String>,
}

/// [`OperationLoader`] fake.
///
/// References registered with [`InMemoryOperationLoader::with_available`]
/// resolve synchronously through `get`. Everything else is parked by `load`
/// until the test calls [`InMemoryOperationLoader::resolve`] or
/// [`InMemoryOperationLoader::reject`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryOperationLoader {
    modules: Rc<RefCell<Modules>>,
}

impl InMemoryOperationLoader {
    /// Loader with nothing available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` available synchronously under `reference`.
    #[must_use]
    pub fn with_available(self, reference: &str, node: Arc<NormalizationNode>) -> Self {
        self.modules
            .borrow_mut()
            .available
            .insert(reference.to_owned(), node);
        self
    }

    /// References passed to `load`, in order.
    pub fn requested(&self) -> Vec<String> {
        self.modules.borrow().requested.clone()
    }

    /// Number of loads waiting for a manual answer.
    pub fn pending(&self) -> usize {
        self.modules.borrow().pending.len()
    }

    /// Answers every parked load for `reference` with `node`. Returns how
    /// many loads were answered.
    pub fn resolve(&self, reference: &str, node: Option<Arc<NormalizationNode>>) -> usize {
        let completions = self.take(reference);
        let count = completions.len();
        for completion in completions {
            completion.resolve(node.clone());
        }
        count
    }

    /// Fails every parked load for `reference`.
    pub fn reject(&self, reference: &str, message: &str) -> usize {
        let completions = self.take(reference);
        let count = completions.len();
        for completion in completions {
            completion.reject(message);
        }
        count
    }

    fn take(&self, reference: &str) -> Vec<ModuleCompletion> {
        let mut modules = self.modules.borrow_mut();
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut modules.pending)
            .into_iter()
            .partition(|(r, _)| r == reference);
        modules.pending = rest;
        matching.into_iter().map(|(_, c)| c).collect()
    }
}

impl OperationLoader for InMemoryOperationLoader {
    fn get(&self, reference: &str) -> Option<Arc<NormalizationNode>> {
        self.modules.borrow().available.get(reference).cloned()
    }

    fn load(&self, reference: &str, completion: ModuleCompletion) {
        let mut modules = self.modules.borrow_mut();
        modules.requested.push(reference.to_owned());
        modules.pending.push((reference.to_owned(), completion));
    }
}
