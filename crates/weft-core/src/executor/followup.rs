// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `@module` and cross-actor follow-ups, and the optimistic path.
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Executor, ExecutorError, ExecutionState, PendingLoad, PendingTask, Unit};
use crate::constants::ROOT_TYPE;
use crate::ident::ActorId;
use crate::payload::{ActorPayload, FollowupPayload, ModuleImportPayload, NormalizationPayload};
use crate::ports::OperationLoader;
use crate::publish_queue::{OptimisticUpdate, StoreUpdater, UpdateId};
use crate::response::{ResponseChunk, ResponseData};
use crate::selection::{NodeKind, NormalizationNode, Selector};
use crate::storage_key::local_variables;

fn validate_optimistic(payload: &NormalizationPayload) -> Result<(), ExecutorError> {
    if payload.incremental_placeholders.is_empty() {
        Ok(())
    } else {
        Err(ExecutorError::OptimisticIncremental)
    }
}

impl Executor {
    pub(super) fn process_followup(&mut self, followup: &FollowupPayload) -> Result<(), ExecutorError> {
        match followup {
            FollowupPayload::ModuleImport(payload) => self
                .with_actor(payload.actor.as_ref(), |this| this.process_module_import(payload)),
            FollowupPayload::Actor(payload) => {
                self.with_actor(Some(&payload.actor), |this| this.process_actor_payload(payload))
            }
        }
    }

    fn expect_loader(&self) -> Result<Rc<dyn OperationLoader>, ExecutorError> {
        self.loader.clone().ok_or(ExecutorError::MissingOperationLoader)
    }

    /// Resolves a `@module` follow-up now if the loader has it, otherwise
    /// starts an asynchronous load tracked as a pending unit.
    fn process_module_import(&mut self, payload: &ModuleImportPayload) -> Result<(), ExecutorError> {
        let loader = self.expect_loader()?;
        if let Some(node) = loader.get(&payload.operation_reference) {
            return self.handle_module_import(payload, &node);
        }
        let unit = self.open_unit(Unit::ModuleLoad);
        self.pending_modules += 1;
        self.loads.insert(unit, PendingLoad::Followup(payload.clone()));
        self.update_activity();
        debug!(reference = %payload.operation_reference, unit, "module load started");
        loader.load(&payload.operation_reference, self.module_completion(unit));
        Ok(())
    }

    fn handle_module_import(
        &mut self,
        payload: &ModuleImportPayload,
        node: &NormalizationNode,
    ) -> Result<(), ExecutorError> {
        let normalized = self.normalize_module(payload, node)?;
        self.queue_and_save_actor()?
            .commit_payload(&self.operation, normalized.clone(), None);
        self.process_payload_followups(vec![normalized])
    }

    fn normalize_module(
        &self,
        payload: &ModuleImportPayload,
        node: &NormalizationNode,
    ) -> Result<NormalizationPayload, ExecutorError> {
        let variables = match node.kind {
            NodeKind::SplitOperation => local_variables(
                &payload.variables,
                &node.argument_definitions,
                payload.args.as_deref().unwrap_or(&[]),
            )?,
            NodeKind::Operation => payload.variables.clone(),
        };
        let selector = Selector::new(payload.data_id.clone(), Arc::clone(&node.selections), variables);
        self.normalize_data(
            &payload.data,
            None,
            false,
            &selector,
            &payload.type_name,
            payload.path.clone(),
        )
    }

    /// Normalizes cross-actor data into the target actor's queue.
    fn process_actor_payload(&mut self, payload: &ActorPayload) -> Result<(), ExecutorError> {
        let selector = Selector::new(
            payload.data_id.clone(),
            Arc::clone(&payload.field.selections),
            payload.variables.clone(),
        );
        let normalized = self.normalize_data(
            &payload.data,
            None,
            false,
            &selector,
            &payload.type_name,
            payload.path.clone(),
        )?;
        self.queue_and_save_actor()?
            .commit_payload(&self.operation, normalized.clone(), None);
        self.process_payload_followups(vec![normalized])
    }

    pub(super) fn on_module_loaded(
        &mut self,
        unit: u64,
        result: Result<Option<Arc<NormalizationNode>>, String>,
    ) -> Result<(), ExecutorError> {
        match self.loads.remove(&unit) {
            None => Ok(()),
            Some(PendingLoad::Followup(payload)) => self.settle_module_load(unit, payload, result),
            Some(PendingLoad::Optimistic(payload)) => self.apply_loaded_optimistic_module(&payload, result),
        }
    }

    fn settle_module_load(
        &mut self,
        unit: u64,
        payload: ModuleImportPayload,
        result: Result<Option<Arc<NormalizationNode>>, String>,
    ) -> Result<(), ExecutorError> {
        let node = match result {
            Ok(Some(node)) => node,
            Ok(None) => {
                self.pending_modules -= 1;
                self.complete_unit(unit);
                self.after_module_settled();
                return Ok(());
            }
            Err(message) => {
                self.pending_modules -= 1;
                return Err(ExecutorError::ModuleLoad {
                    reference: payload.operation_reference,
                    message,
                });
            }
        };
        if let Some(scheduler) = self.scheduler.clone() {
            // The load unit becomes a scheduled publish unit.
            self.units.remove(&unit);
            let task = self.schedule(&scheduler, PendingTask::PublishModule { payload, node });
            debug!(unit, task, "module publish scheduled");
            return Ok(());
        }
        let published = self.publish_module(&payload, &node);
        self.pending_modules -= 1;
        published?;
        self.complete_unit(unit);
        self.after_module_settled();
        Ok(())
    }

    /// Commits a loaded module's data and flushes immediately.
    pub(super) fn publish_module(
        &mut self,
        payload: &ModuleImportPayload,
        node: &NormalizationNode,
    ) -> Result<(), ExecutorError> {
        self.with_actor(payload.actor.as_ref(), |this| {
            this.handle_module_import(payload, node)?;
            let owners = this.run_publish_queues(None)?;
            this.update_tracker(&owners);
            Ok(())
        })
    }

    /// Returns `true` if the batch was a single optimistic chunk (now applied).
    pub(super) fn handle_optimistic(
        &mut self,
        batch: &[ResponseChunk],
        with_data: &[usize],
    ) -> Result<bool, ExecutorError> {
        if with_data.len() > 1 {
            let any_optimistic = with_data
                .iter()
                .filter_map(|&i| batch.get(i))
                .any(ResponseChunk::is_optimistic);
            if any_optimistic {
                return Err(ExecutorError::OptimisticBatched);
            }
            return Ok(false);
        }
        let Some(chunk) = with_data.first().and_then(|&i| batch.get(i)) else {
            return Ok(false);
        };
        if !chunk.is_optimistic() {
            return Ok(false);
        }
        if self.state != ExecutionState::Started {
            return Err(ExecutorError::OptimisticAfterServer);
        }
        self.process_optimistic_response(chunk.data.as_ref(), None)?;
        Ok(true)
    }

    /// Applies the execution's single optimistic payload and/or updater.
    pub(super) fn process_optimistic_response(
        &mut self,
        data: Option<&ResponseData>,
        updater: Option<StoreUpdater>,
    ) -> Result<(), ExecutorError> {
        if self.optimistic_updates.is_some() {
            return Err(ExecutorError::MultipleOptimistic);
        }
        let mut updates = Vec::new();
        match (data, updater) {
            (None, None) => return Ok(()),
            (Some(data), updater) => {
                let root = self.operation.root.clone();
                let payload = self.normalize_data(data, None, false, &root, ROOT_TYPE, Vec::new())?;
                validate_optimistic(&payload)?;
                let followups = payload.followup_payloads.clone();
                updates.push(OptimisticUpdate::Payload { payload, updater });
                self.process_optimistic_followups(&followups, &mut updates)?;
            }
            (None, Some(updater)) => updates.push(OptimisticUpdate::Updater(updater)),
        }
        let applied = self.apply_optimistic(updates)?;
        debug!(updates = applied.len(), "optimistic updates applied");
        self.optimistic_updates = Some(applied);
        self.run_publish_queues(None)?;
        Ok(())
    }

    fn apply_optimistic(
        &mut self,
        updates: Vec<OptimisticUpdate>,
    ) -> Result<Vec<(ActorId, UpdateId)>, ExecutorError> {
        let queue = self.queue_and_save_actor()?;
        Ok(updates
            .into_iter()
            .map(|update| (self.actor.clone(), queue.apply_update(update)))
            .collect())
    }

    fn process_optimistic_followups(
        &mut self,
        followups: &[FollowupPayload],
        updates: &mut Vec<OptimisticUpdate>,
    ) -> Result<(), ExecutorError> {
        for followup in followups {
            match followup {
                FollowupPayload::ModuleImport(payload) => {
                    let loader = self.expect_loader()?;
                    if let Some(node) = loader.get(&payload.operation_reference) {
                        updates.extend(self.optimistic_module_updates(payload, &node)?);
                    } else {
                        // Not a completion unit: the execution may finish first.
                        let unit = self.allocate_unit();
                        self.loads.insert(unit, PendingLoad::Optimistic(payload.clone()));
                        loader.load(&payload.operation_reference, self.module_completion(unit));
                    }
                }
                FollowupPayload::Actor(payload) => {
                    warn!(actor = %payload.actor, "optimistic actor payloads are not supported; skipped");
                }
            }
        }
        Ok(())
    }

    fn optimistic_module_updates(
        &mut self,
        payload: &ModuleImportPayload,
        node: &NormalizationNode,
    ) -> Result<Vec<OptimisticUpdate>, ExecutorError> {
        let normalized = self.normalize_module(payload, node)?;
        validate_optimistic(&normalized)?;
        let followups = normalized.followup_payloads.clone();
        let mut updates = vec![OptimisticUpdate::Payload {
            payload: normalized,
            updater: None,
        }];
        self.process_optimistic_followups(&followups, &mut updates)?;
        Ok(updates)
    }

    fn apply_loaded_optimistic_module(
        &mut self,
        payload: &ModuleImportPayload,
        result: Result<Option<Arc<NormalizationNode>>, String>,
    ) -> Result<(), ExecutorError> {
        let node = match result {
            Ok(Some(node)) => node,
            Ok(None) => return Ok(()),
            Err(message) => {
                warn!(reference = %payload.operation_reference, %message, "optimistic module load failed");
                return Ok(());
            }
        };
        if self.state != ExecutionState::Started {
            return Ok(());
        }
        if self.optimistic_updates.is_none() {
            warn!(
                operation = %self.operation.request.name,
                "unexpected module import optimistic update"
            );
            return Ok(());
        }
        let updates = self.optimistic_module_updates(payload, &node)?;
        let applied = self.apply_optimistic(updates)?;
        if let Some(outstanding) = &mut self.optimistic_updates {
            outstanding.extend(applied);
        }
        self.run_publish_queues(None)?;
        Ok(())
    }
}
