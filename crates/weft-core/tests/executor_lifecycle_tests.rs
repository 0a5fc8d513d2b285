// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
use std::rc::Rc;

use serde_json::{json, Value};
use weft_core::constants::SUBSCRIPTION_ROOT_ID_KEY;
use weft_core::{
    Activity, DataId, EntityIdResolver, ExecutionState, Executor, ExecutorError, OperationDescriptor,
    PublishError, RecordSourceProxy, RequestId, ResponseChunk, ResponseData, Selection,
    StoreUpdater, TransportError,
};
use weft_dry_tests::{operation, query, subscription, EnvironmentBuilder, LinkedFieldBuilder, SinkEvent};
mod common;
use common::{chunk, error_chunk};

fn user_query() -> OperationDescriptor {
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .scalars(&["id", "name"])
        .build();
    query(operation("UserQuery", vec![me]), Value::Null)
}

#[test]
fn root_chunk_commits_and_completion_tears_down() {
    let env = EnvironmentBuilder::new().build();
    let op = user_query();
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);
    assert_eq!(env.registry.get(&request), Some(Activity::Active));

    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    assert_eq!(executor.drain(), 1);
    assert_eq!(executor.state(), ExecutionState::LoadingIncremental);
    assert_eq!(env.linked_id("client:root", "me"), Some(DataId::from("1")));
    assert_eq!(env.value("1", "name"), Some(json!("Ada")));
    assert_eq!(env.sink.batches().len(), 1);
    assert_eq!(env.sink.complete_count(), 0);

    handle.complete();
    executor.drain();
    assert!(executor.is_completed());
    assert_eq!(env.sink.complete_count(), 1);
    assert!(env.registry.is_empty());
    assert_eq!(env.tracker.completions(), vec![request]);
    assert!(!executor.is_retaining());
}

#[test]
fn batched_root_chunks_all_commit() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next(vec![
        chunk(json!({"me": {"id": "1", "name": "Ada"}})),
        chunk(json!({"me": {"id": "2", "name": "Bob"}})),
    ]);
    executor.drain();
    assert_eq!(env.value("1", "name"), Some(json!("Ada")));
    assert_eq!(env.value("2", "name"), Some(json!("Bob")));
    assert_eq!(env.linked_id("client:root", "me"), Some(DataId::from("2")));
    assert_eq!(env.sink.batches()[0].len(), 2);
}

#[test]
fn error_only_chunk_fails_with_joined_messages() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(error_chunk(&["boom", "also bad"]));
    executor.drain();

    assert!(executor.is_completed());
    let errors = env.sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].to_string(),
        "No data returned for operation `UserQuery`, got error(s):\nboom\nalso bad"
    );
    assert_eq!(env.sink.complete_count(), 0);
    assert!(env.registry.is_empty());
}

#[test]
fn error_chunk_with_empty_list_reports_no_errors() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(error_chunk(&[]));
    executor.drain();
    let [ExecutorError::NoData { messages, .. }] = &env.sink.errors()[..] else {
        panic!("expected a no-data error");
    };
    assert_eq!(messages, "(No errors)");
}

#[test]
fn metadata_only_final_chunk_moves_to_loading_final() {
    let env = EnvironmentBuilder::new().build();
    let op = user_query();
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    handle.next_chunk(ResponseChunk::default().finalized());
    executor.drain();

    assert_eq!(executor.state(), ExecutionState::LoadingFinal);
    assert_eq!(env.registry.get(&request), Some(Activity::Inactive));
    assert_eq!(env.sink.batches().len(), 2);
    assert!(env.sink.batches()[1][0].data.is_none());

    handle.complete();
    executor.drain();
    assert_eq!(env.registry.get(&request), None);
}

#[test]
fn final_root_chunk_is_inactive_until_completion() {
    let env = EnvironmentBuilder::new().build();
    let op = user_query();
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})).finalized());
    executor.drain();
    assert_eq!(executor.state(), ExecutionState::LoadingFinal);
    assert_eq!(env.registry.get(&request), Some(Activity::Inactive));
}

#[test]
fn label_without_path_is_rejected() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    let mut bad = chunk(json!({"name": "x"}));
    bad.label = Some("UserQuery$defer$name".into());
    handle.next_chunk(bad);
    executor.drain();
    assert!(matches!(
        &env.sink.errors()[..],
        [ExecutorError::IncompleteIncrementalMetadata { label: Some(_), path: None, .. }]
    ));
}

#[test]
fn transport_errors_terminate_the_execution() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.error(TransportError::new("connection reset"));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert_eq!(
        env.sink.events(),
        vec![SinkEvent::Error(ExecutorError::Transport(TransportError::new(
            "connection reset"
        )))]
    );
    assert!(env.record("1").is_none());
}

#[test]
fn cancel_is_silent_and_ignores_later_events() {
    let env = EnvironmentBuilder::new().build();
    let op = user_query();
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);
    handle.cancel();
    assert!(handle.is_cancelled());
    executor.drain();
    assert!(executor.is_completed());

    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    handle.complete();
    assert_eq!(executor.drain(), 0);
    assert!(env.sink.events().is_empty());
    assert!(env.record("1").is_none());
    assert!(env.registry.is_empty());
    assert_eq!(env.tracker.completions(), vec![request]);
}

#[test]
fn handle_reports_a_dropped_executor() {
    let env = EnvironmentBuilder::new().build();
    let (executor, handle) = env.execute(user_query());
    drop(executor);
    assert!(!handle.next_chunk(chunk(json!({}))));
    assert!(!handle.complete());
}

#[test]
fn other_owners_of_touched_ids_are_reported() {
    let env = EnvironmentBuilder::new().build();
    let other = RequestId::new("ProfileQuery{}");
    env.store
        .borrow_mut()
        .subscribe(other.clone(), [DataId::from("1")]);
    let op = user_query();
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert_eq!(env.tracker.updates(), vec![(request, vec![other])]);
}

#[test]
fn own_subscriptions_are_not_reported_back() {
    let env = EnvironmentBuilder::new().build();
    let op = user_query();
    env.store
        .borrow_mut()
        .subscribe(op.request.identifier.clone(), [DataId::from("1")]);
    let (mut executor, handle) = env.execute(op);
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert!(env.tracker.updates().is_empty());
}

#[test]
fn updater_runs_after_each_root_commit() {
    let env = EnvironmentBuilder::new().build();
    let updater: StoreUpdater = Rc::new(|proxy: &mut RecordSourceProxy<'_>| {
        let count = proxy
            .get_value(&DataId::root(), "commits")?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        proxy.set_value(&DataId::root(), "commits", json!(count + 1))
    });
    let (mut executor, handle) = Executor::new(env.config(user_query()).with_updater(updater));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert_eq!(env.value("client:root", "commits"), Some(json!(2)));
}

#[test]
fn failing_updater_fails_the_execution() {
    let env = EnvironmentBuilder::new().build();
    let updater: StoreUpdater =
        Rc::new(|proxy: &mut RecordSourceProxy<'_>| proxy.set_value(&DataId::from("nope"), "x", json!(1)));
    let (mut executor, handle) = Executor::new(env.config(user_query()).with_updater(updater));
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert!(executor.is_completed());
    assert!(matches!(
        &env.sink.errors()[..],
        [ExecutorError::Publish(PublishError::MissingRecord(_))]
    ));
}

struct HandleResolver;

impl EntityIdResolver for HandleResolver {
    fn resolve(&self, value: &ResponseData, type_name: &str) -> Option<DataId> {
        value
            .get("handle")
            .and_then(Value::as_str)
            .map(|h| DataId::from(format!("{type_name}:{h}")))
    }
}

#[test]
fn custom_id_resolver_controls_identity() {
    let env = EnvironmentBuilder::new().build();
    let me = LinkedFieldBuilder::new("me")
        .concrete("User")
        .scalars(&["handle"])
        .build();
    let op = query(operation("Q", vec![me]), Value::Null);
    let config = env.config(op).with_id_resolver(Rc::new(HandleResolver));
    let (mut executor, handle) = Executor::new(config);
    handle.next_chunk(chunk(json!({"me": {"handle": "ada"}})));
    executor.drain();
    assert_eq!(env.linked_id("client:root", "me"), Some(DataId::from("User:ada")));
}

#[test]
fn subscription_pushes_get_fresh_roots() {
    let env = EnvironmentBuilder::new().build();
    let feed = LinkedFieldBuilder::new("post")
        .concrete("Post")
        .scalars(&["id", "title"])
        .build();
    let op = subscription(operation("PostSub", vec![feed]));
    let request = op.request.identifier.clone();
    let (mut executor, handle) = env.execute(op);

    handle.next_chunk(chunk(json!({"post": {"id": "p", "title": "one"}})));
    executor.drain();
    assert_eq!(executor.operation().root.data_id, DataId::from("client:local:0"));
    assert_eq!(env.linked_id("client:local:0", "post"), Some(DataId::from("p")));
    assert_eq!(env.tracker.completions().len(), 1);

    handle.next_chunk(chunk(json!({"post": {"id": "p", "title": "two"}})));
    executor.drain();
    assert!(env.record("client:local:1").is_some());
    assert_eq!(env.value("p", "title"), Some(json!("two")));
    assert_eq!(env.tracker.completions().len(), 2);

    let stamped: Vec<Value> = env
        .sink
        .batches()
        .iter()
        .map(|batch| {
            batch[0]
                .extensions
                .as_ref()
                .and_then(|e| e.get(SUBSCRIPTION_ROOT_ID_KEY))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();
    assert_eq!(stamped, vec![json!("client:local:0"), json!("client:local:1")]);

    handle.complete();
    executor.drain();
    assert_eq!(env.tracker.completions(), vec![request.clone(), request.clone(), request]);
    assert!(env.record("client:root").is_some_and(|r| !r.has("post")));
}

#[test]
fn batched_subscription_pushes_each_get_a_root() {
    let env = EnvironmentBuilder::new().build();
    let feed = LinkedFieldBuilder::new("post")
        .concrete("Post")
        .scalars(&["id", "title"])
        .build();
    let (mut executor, handle) = env.execute(subscription(operation("PostSub", vec![feed])));

    handle.next(vec![
        chunk(json!({"post": {"id": "p1", "title": "one"}})),
        chunk(json!({"post": {"id": "p2", "title": "two"}})),
    ]);
    executor.drain();
    assert_eq!(env.linked_id("client:local:0", "post"), Some(DataId::from("p1")));
    assert_eq!(env.linked_id("client:local:1", "post"), Some(DataId::from("p2")));
    assert_eq!(executor.operation().root.data_id, DataId::from("client:local:1"));

    let batches = env.sink.batches();
    let stamped: Vec<Value> = batches[0]
        .iter()
        .map(|chunk| {
            chunk
                .extensions
                .as_ref()
                .and_then(|e| e.get(SUBSCRIPTION_ROOT_ID_KEY))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();
    assert_eq!(stamped, vec![json!("client:local:0"), json!("client:local:1")]);
}

#[test]
fn queries_keep_the_root_anchor() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    executor.drain();
    assert!(executor.operation().root.data_id.is_root());
    assert!(env.sink.batches()[0][0].extensions.is_none());
    assert!(env.tracker.completions().is_empty());
}

#[tokio::test]
async fn run_processes_until_completion() {
    let env = EnvironmentBuilder::new().build();
    let (mut executor, handle) = env.execute(user_query());
    handle.next_chunk(chunk(json!({"me": {"id": "1", "name": "Ada"}})));
    handle.complete();
    executor.run().await;
    assert!(executor.is_completed());
    assert_eq!(env.value("1", "name"), Some(json!("Ada")));
    assert_eq!(env.sink.complete_count(), 1);
}

#[tokio::test]
async fn handle_feeds_from_another_task() {
    let env = EnvironmentBuilder::new().build();
    let count = LinkedFieldBuilder::new("counter")
        .concrete("Counter")
        .scalars(&["id", "value"])
        .build();
    let op = query(operation("CounterQuery", vec![count]), Value::Null);
    let (mut executor, handle) = env.execute(op);
    let feeder = tokio::spawn(async move {
        for value in 0..3 {
            handle.next_chunk(ResponseChunk::data(
                json!({"counter": {"id": "c", "value": value}})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            ));
            tokio::task::yield_now().await;
        }
        handle.complete();
    });
    executor.run().await;
    feeder.await.expect("feeder task");
    assert_eq!(env.value("c", "value"), Some(json!(2)));
    assert_eq!(env.sink.batches().len(), 3);
    assert_eq!(env.sink.complete_count(), 1);
}

#[test]
fn scalar_only_operations_need_no_links() {
    let env = EnvironmentBuilder::new().build();
    let op = query(operation("CountQuery", vec![Selection::scalar("count")]), Value::Null);
    let (mut executor, handle) = env.execute(op);
    handle.next_chunk(chunk(json!({"count": 7})));
    handle.complete();
    executor.drain();
    assert_eq!(env.value("client:root", "count"), Some(json!(7)));
}
