// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{json, Value};
use weft_core::{
    DataId, Executor, ExecutorError, OperationDescriptor, OptimisticResponse, OptimisticUpdate,
    PublishQueue, Record, RecordSource, RecordSourceProxy, Selection, Store, StoreUpdater,
};
use weft_dry_tests::{
    defer, module_import, operation, query, split_operation, EnvironmentBuilder,
    InMemoryOperationLoader, LinkedFieldBuilder,
};
mod common;
use common::{chunk, obj};

fn user_query() -> OperationDescriptor {
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .scalars(&["id", "name"])
        .build();
    query(operation("UserQuery", vec![me]), Value::Null)
}

fn optimistic_user(name: &str) -> OptimisticResponse {
    OptimisticResponse {
        data: Some(obj(json!({"me": {"id": "1", "name": name}}))),
        updater: None,
    }
}

#[test]
fn optimistic_data_is_replaced_by_server_data() {
    let env = EnvironmentBuilder::new().build();
    let config = env.config(user_query()).with_optimistic(optimistic_user("Guess"));
    let (mut executor, handle) = Executor::new(config);
    assert_eq!(env.value("1", "name"), Some(json!("Guess")));
    assert_eq!(env.queue.applied_count(), 1);

    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Real"}})));
    executor.drain();
    assert_eq!(env.value("1", "name"), Some(json!("Real")));
    assert_eq!(env.queue.applied_count(), 0);
    assert!(!env.store.borrow().has_snapshot());
}

#[test]
fn cancel_reverts_optimistic_data() {
    let env = EnvironmentBuilder::new().build();
    let config = env.config(user_query()).with_optimistic(optimistic_user("Guess"));
    let (mut executor, handle) = Executor::new(config);
    assert!(env.record("1").is_some());
    handle.cancel();
    executor.drain();
    assert!(env.record("1").is_none());
    assert!(env.sink.events().is_empty());
}

#[test]
fn optimistic_updater_without_data() {
    let env = EnvironmentBuilder::new().build();
    let updater: StoreUpdater = Rc::new(|proxy: &mut RecordSourceProxy<'_>| {
        proxy.set_value(&DataId::root(), "pending", json!(true))
    });
    let optimistic = OptimisticResponse {
        data: None,
        updater: Some(updater),
    };
    let (mut executor, handle) = Executor::new(env.config(user_query()).with_optimistic(optimistic));
    assert_eq!(env.value("client:root", "pending"), Some(json!(true)));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Real"}})));
    executor.drain();
    assert_eq!(env.value("client:root", "pending"), None);
}

#[test]
fn optimistic_chunk_from_the_transport_is_applied() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Guess"}})).optimistic());
    executor.drain();
    assert_eq!(env.value("1", "name"), Some(json!("Guess")));
    assert_eq!(env.sink.batches().len(), 1);

    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Real"}})));
    executor.drain();
    assert_eq!(env.value("1", "name"), Some(json!("Real")));
    assert!(env.sink.errors().is_empty());
}

#[test]
fn optimistic_after_server_data_fails() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Real"}})));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Late"}})).optimistic());
    executor.drain();
    assert_eq!(env.sink.errors(), vec![ExecutorError::OptimisticAfterServer]);
    assert_eq!(env.value("1", "name"), Some(json!("Real")));
}

#[test]
fn second_optimistic_payload_fails() {
    let env = EnvironmentBuilder::new().build();
    let config = env.config(user_query()).with_optimistic(optimistic_user("One"));
    let (mut executor, handle) = Executor::new(config);
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Two"}})).optimistic());
    executor.drain();
    assert_eq!(env.sink.errors(), vec![ExecutorError::MultipleOptimistic]);
    assert!(env.record("1").is_none());
}

#[test]
fn optimistic_chunks_cannot_be_batched() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next(vec![
        chunk(json!({"me": {"id": "1", "name": "Guess"}})).optimistic(),
        chunk(json!({"me": {"id": "1", "name": "Real"}})),
    ]);
    executor.drain();
    assert_eq!(env.sink.errors(), vec![ExecutorError::OptimisticBatched]);
}

#[test]
fn optimistic_data_for_deferred_operations_fails_at_start() {
    let env = EnvironmentBuilder::new().build();
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .select(Selection::scalar("id"))
        .select(defer("Q$defer$bio", vec![Selection::scalar("bio")]))
        .build();
    let op = query(operation("Q", vec![me]), Value::Null);
    let optimistic = OptimisticResponse {
        data: Some(obj(json!({"me": {"id": "1", "bio": "x"}}))),
        updater: None,
    };
    let (executor, _handle) = Executor::new(env.config(op).with_optimistic(optimistic));
    assert!(executor.is_completed());
    assert_eq!(env.sink.errors(), vec![ExecutorError::OptimisticIncremental]);
    assert!(env.record("1").is_none());
}

#[test]
fn available_modules_are_part_of_the_optimistic_update() {
    let loader = InMemoryOperationLoader::new().with_available(
        "Avatar$normalization",
        split_operation("Avatar", Vec::new(), vec![Selection::scalar("url")]),
    );
    let env = EnvironmentBuilder::new().with_loader(loader).build();
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .select(Selection::scalar("id"))
        .select(module_import("Q", "Avatar_user"))
        .build();
    let op = query(operation("Q", vec![me]), Value::Null);
    let optimistic = OptimisticResponse {
        data: Some(obj(json!({"me": {
            "id": "1",
            "url": "guess.png",
            "__module_component_Q": "Avatar.react",
            "__module_operation_Q": "Avatar$normalization",
        }}))),
        updater: None,
    };
    let (mut executor, handle) = Executor::new(env.config(op).with_optimistic(optimistic));
    assert_eq!(env.value("1", "url"), Some(json!("guess.png")));
    assert_eq!(env.queue.applied_count(), 2);
    handle.cancel();
    executor.drain();
    assert!(env.record("1").is_none());
}

#[test]
fn late_optimistic_module_is_not_a_completion_unit() {
    let loader = InMemoryOperationLoader::new();
    let env = EnvironmentBuilder::new().with_loader(loader.clone()).build();
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .select(Selection::scalar("id"))
        .select(module_import("Q", "Avatar_user"))
        .build();
    let op = query(operation("Q", vec![me]), Value::Null);
    let optimistic = OptimisticResponse {
        data: Some(obj(json!({"me": {
            "id": "1",
            "url": "guess.png",
            "__module_operation_Q": "Avatar$normalization",
        }}))),
        updater: None,
    };
    let (mut executor, handle) = Executor::new(env.config(op).with_optimistic(optimistic));
    assert_eq!(loader.requested(), vec!["Avatar$normalization".to_owned()]);
    assert_eq!(executor.pending_module_count(), 0);

    let split = split_operation("Avatar", Vec::new(), vec![Selection::scalar("url")]);
    assert_eq!(loader.resolve("Avatar$normalization", Some(split)), 1);
    executor.drain();
    assert_eq!(env.value("1", "url"), Some(json!("guess.png")));

    handle.complete();
    executor.drain();
    assert!(executor.is_completed());
    assert_eq!(env.sink.complete_count(), 1);
    assert!(env.record("1").is_none());
}

fn field_setter(index: usize) -> StoreUpdater {
    Rc::new(move |proxy: &mut RecordSourceProxy<'_>| {
        proxy.set_value(&DataId::root(), &format!("f{index}"), json!(index))?;
        proxy.set_value(&DataId::root(), "last", json!(index))
    })
}

fn root_value(queue: &PublishQueue, key: &str) -> Option<Value> {
    queue
        .store()
        .borrow()
        .get("client:root")
        .and_then(|r| r.value(key).unwrap())
}

fn canonical(key: &str, value: Value) -> RecordSource {
    let mut root = Record::new(DataId::root(), "__Root");
    root.set_value(key, value).unwrap();
    std::iter::once(root).collect()
}

proptest! {
    #[test]
    fn reverting_any_subset_rebases_the_rest_in_order(
        (count, reverted) in (1usize..7).prop_flat_map(|n| {
            (Just(n), prop::collection::vec(any::<bool>(), n))
        }),
        rotation in 0usize..8,
    ) {
        let queue = PublishQueue::new(Rc::new(RefCell::new(Store::new())), None);
        let ids: Vec<_> = (0..count)
            .map(|i| queue.apply_update(OptimisticUpdate::Updater(field_setter(i))))
            .collect();
        queue.run(None).unwrap();
        prop_assert_eq!(root_value(&queue, "last"), Some(json!(count - 1)));

        queue.commit_source(canonical("server", json!("v1")));
        queue.run(None).unwrap();

        let mut to_revert: Vec<usize> = (0..count).filter(|&i| reverted[i]).collect();
        let len = to_revert.len();
        if len > 1 {
            to_revert.rotate_left(rotation % len);
        }
        for &i in &to_revert {
            queue.revert_update(ids[i]);
        }
        queue.run(None).unwrap();

        for i in 0..count {
            let expected = (!reverted[i]).then(|| json!(i));
            prop_assert_eq!(root_value(&queue, &format!("f{i}")), expected);
        }
        let last = (0..count).filter(|&i| !reverted[i]).max().map(|i| json!(i));
        prop_assert_eq!(root_value(&queue, "last"), last);
        prop_assert_eq!(root_value(&queue, "server"), Some(json!("v1")));
        prop_assert_eq!(queue.applied_count(), count - len);
        prop_assert_eq!(queue.store().borrow().has_snapshot(), len < count);
    }
}
