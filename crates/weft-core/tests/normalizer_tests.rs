// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::panic)]
use proptest::prelude::*;
use serde_json::{json, Value};
use weft_core::constants::{module_component_key, module_operation_key};
use weft_core::selection::{
    Argument, ArgumentDefinition, ClientExtension, Condition, Fragment, FragmentSpread, InlineFragment,
};
use weft_core::{
    derive_id, type_record_id, DataId, DiagnosticKind, FieldValue, FollowupPayload,
    IncrementalPlaceholder, NormalizeOptions, PathSegment, ResponseError, Selection, Store,
};
use weft_dry_tests::{actor_change, defer, defer_if, handle, module_import, stream, LinkedFieldBuilder};
mod common;
use common::{normalize_root, normalize_root_with_errors};
use std::sync::Arc;

fn user(selections: &[&str]) -> LinkedFieldBuilder {
    LinkedFieldBuilder::new("me").concrete("User").scalars(selections)
}

#[test]
fn plural_items_keep_nulls_and_derive_ids_by_index() {
    let items = LinkedFieldBuilder::new("items")
        .concrete("Item")
        .plural()
        .scalars(&["name"])
        .build();
    let payload = normalize_root(
        vec![items],
        json!({"items": [{"name": "a"}, null, {"id": "srv", "name": "c"}]}),
        &NormalizeOptions::default(),
    );
    let root = payload.source.get("client:root").unwrap();
    assert_eq!(
        root.linked_ids("items").unwrap().unwrap(),
        &[
            Some(DataId::from("client:root:items:0")),
            None,
            Some(DataId::from("srv")),
        ][..]
    );
    let first = payload.source.get("client:root:items:0").unwrap();
    assert_eq!(first.type_name(), "Item");
    assert_eq!(first.value("name").unwrap(), Some(json!("a")));
}

#[test]
fn arguments_and_aliases_shape_storage_keys() {
    let field = LinkedFieldBuilder::new("friends")
        .alias("buddies")
        .concrete("User")
        .plural()
        .arg("first", json!(2))
        .arg("after", Value::Null)
        .scalars(&["id"])
        .build();
    let payload = normalize_root(
        vec![field],
        json!({"buddies": [{"id": "u1"}]}),
        &NormalizeOptions::default(),
    );
    let root = payload.source.get("client:root").unwrap();
    assert!(root.has("friends(first:2)"));
    assert!(!root.has("buddies"));
}

#[test]
fn variable_arguments_read_operation_variables() {
    let field = LinkedFieldBuilder::new("node")
        .var_arg("id", "nodeId")
        .concrete("User")
        .scalars(&["id"])
        .build();
    let selector = weft_core::Selector::new(
        DataId::root(),
        Arc::from(vec![field]),
        common::obj(json!({"nodeId": "4"})),
    );
    let payload = weft_core::normalize_into_new_source(
        &selector,
        weft_core::constants::ROOT_TYPE,
        &common::obj(json!({"node": {"id": "4"}})),
        &NormalizeOptions::default(),
        None,
    )
    .unwrap();
    let root = payload.source.get("client:root").unwrap();
    assert_eq!(
        root.linked_id("node(id:\"4\")").unwrap(),
        Some(&DataId::from("4"))
    );
}

#[test]
fn server_errors_attach_to_the_field_they_name() {
    let errors = vec![ResponseError {
        message: "denied".into(),
        path: Some(vec!["me".into(), "email".into()]),
        extensions: None,
    }];
    let payload = normalize_root_with_errors(
        vec![user(&["id", "email"]).build()],
        json!({"me": {"id": "1", "email": null}}),
        &NormalizeOptions::default(),
        Some(&errors),
    );
    let me = payload.source.get("1").unwrap();
    assert_eq!(me.value("email").unwrap(), Some(Value::Null));
    let attached = me.errors("email").unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0]["message"], json!("denied"));
    assert_eq!(attached[0]["path"], json!(["me", "email"]));
}

#[test]
fn abstract_inline_fragments_record_membership() {
    let node = LinkedFieldBuilder::new("node")
        .select(Selection::scalar("id"))
        .select(Selection::InlineFragment(InlineFragment {
            type_condition: "Actor".into(),
            abstract_key: Some("__isActor".into()),
            selections: Arc::from(vec![Selection::scalar("handle")]),
        }))
        .build();
    let payload = normalize_root(
        vec![node],
        json!({"node": {"__typename": "Page", "id": "p", "__isActor": "Page", "handle": "pg"}}),
        &NormalizeOptions::default(),
    );
    let flags = payload.source.get(type_record_id("Page").as_str()).unwrap();
    assert_eq!(flags.value("__isActor").unwrap(), Some(json!(true)));
    let page = payload.source.get("p").unwrap();
    assert_eq!(page.type_name(), "Page");
    assert_eq!(page.value("handle").unwrap(), Some(json!("pg")));
}

#[test]
fn client_extension_fields_may_be_missing() {
    let me = user(&["id"])
        .select(Selection::ClientExtension(ClientExtension {
            selections: Arc::from(vec![Selection::scalar("local_note")]),
        }))
        .build();
    let payload = normalize_root(
        vec![me],
        json!({"me": {"id": "1"}}),
        &NormalizeOptions::default(),
    );
    assert!(payload.diagnostics.is_empty());
    assert!(!payload.source.get("1").unwrap().has("local_note"));
}

#[test]
fn fragment_spreads_rebind_local_variables() {
    let fragment = Fragment {
        name: "Avatar".into(),
        argument_definitions: vec![ArgumentDefinition::LocalArgument {
            name: "size".into(),
            default_value: json!(32),
        }],
        selections: Arc::from(vec![Selection::ScalarField(weft_core::selection::ScalarField {
            alias: None,
            name: "pic".into(),
            args: vec![Argument::variable("size", "size")],
            storage_key: None,
        })]),
    };
    let spread = |args: Vec<Argument>| {
        Selection::FragmentSpread(FragmentSpread {
            fragment: fragment.clone(),
            args,
        })
    };
    let payload = normalize_root(
        vec![user(&["id"])
            .select(spread(Vec::new()))
            .select(spread(vec![Argument::literal("size", json!(64))]))
            .build()],
        json!({"me": {"id": "1", "pic": "url"}}),
        &NormalizeOptions::default(),
    );
    let me = payload.source.get("1").unwrap();
    assert!(me.has("pic(size:32)"));
    assert!(me.has("pic(size:64)"));
}

#[test]
fn conflicting_values_for_one_id_are_reported_not_fatal() {
    let a = LinkedFieldBuilder::new("a").concrete("User").scalars(&["id", "name"]).build();
    let b = LinkedFieldBuilder::new("b").concrete("User").scalars(&["id", "name"]).build();
    let payload = normalize_root(
        vec![a, b],
        json!({"a": {"id": "1", "name": "x"}, "b": {"id": "1", "name": "y"}}),
        &NormalizeOptions::default(),
    );
    assert!(payload
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::ConflictingValue && d.storage_key == "name"));
    assert_eq!(
        payload.source.get("1").unwrap().value("name").unwrap(),
        Some(json!("y"))
    );

    let quiet = NormalizeOptions {
        warn_on_conflicts: false,
        ..NormalizeOptions::default()
    };
    let a = LinkedFieldBuilder::new("a").concrete("User").scalars(&["id", "name"]).build();
    let b = LinkedFieldBuilder::new("b").concrete("User").scalars(&["id", "name"]).build();
    let payload = normalize_root(
        vec![a, b],
        json!({"a": {"id": "1", "name": "x"}, "b": {"id": "1", "name": "y"}}),
        &quiet,
    );
    assert!(payload.diagnostics.is_empty());
}

#[test]
fn defer_emits_placeholder_with_inline_data() {
    let me = user(&["id"])
        .select(defer("Q$defer$bio", vec![Selection::scalar("bio")]))
        .build();
    let payload = normalize_root(
        vec![me],
        json!({"me": {"id": "1", "bio": "inline"}}),
        &NormalizeOptions::default(),
    );
    assert!(!payload.source.get("1").unwrap().has("bio"));
    let [IncrementalPlaceholder::Defer(placeholder)] = &payload.incremental_placeholders[..] else {
        panic!("expected one defer placeholder");
    };
    assert_eq!(placeholder.label, "Q$defer$bio");
    assert_eq!(placeholder.path, vec![PathSegment::from("me")]);
    assert_eq!(placeholder.selector.data_id, DataId::from("1"));
    assert_eq!(placeholder.type_name, "User");
    assert_eq!(placeholder.data.get("bio"), Some(&json!("inline")));
}

#[test]
fn disabled_defer_is_normalized_inline() {
    let me = user(&["id"])
        .select(defer_if("Q$defer$bio", "deferBio", vec![Selection::scalar("bio")]))
        .build();
    let selector = weft_core::Selector::new(
        DataId::root(),
        Arc::from(vec![me]),
        common::obj(json!({"deferBio": false})),
    );
    let payload = weft_core::normalize_into_new_source(
        &selector,
        weft_core::constants::ROOT_TYPE,
        &common::obj(json!({"me": {"id": "1", "bio": "now"}})),
        &NormalizeOptions::default(),
        None,
    )
    .unwrap();
    assert!(payload.incremental_placeholders.is_empty());
    assert_eq!(
        payload.source.get("1").unwrap().value("bio").unwrap(),
        Some(json!("now"))
    );
}

fn normalize_with_variables(selections: Vec<Selection>, data: Value, variables: Value) -> weft_core::NormalizationPayload {
    let selector = weft_core::Selector::new(DataId::root(), Arc::from(selections), common::obj(variables));
    weft_core::normalize_into_new_source(
        &selector,
        weft_core::constants::ROOT_TYPE,
        &common::obj(data),
        &NormalizeOptions::default(),
        None,
    )
    .unwrap()
}

fn condition(variable: &str, passing_value: bool, selections: Vec<Selection>) -> Selection {
    Selection::Condition(Condition {
        condition: variable.to_owned(),
        passing_value,
        selections: Arc::from(selections),
    })
}

#[test]
fn conditions_skip_branches_whose_variable_does_not_pass() {
    let me = user(&["id"])
        .select(condition("withEmail", true, vec![Selection::scalar("email")]))
        .select(condition("hideName", false, vec![Selection::scalar("name")]))
        .build();
    let data = json!({"me": {"id": "1", "email": "a@b.c", "name": "Ada"}});
    let cases = [
        (json!({"withEmail": true, "hideName": false}), true, true),
        (json!({"withEmail": false, "hideName": true}), false, false),
        (json!({"withEmail": null, "hideName": null}), false, true),
    ];
    for (variables, has_email, has_name) in cases {
        let payload = normalize_with_variables(vec![me.clone()], data.clone(), variables);
        let record = payload.source.get("1").unwrap();
        assert_eq!(record.has("email"), has_email);
        assert_eq!(record.has("name"), has_name);
    }
}

#[test]
fn condition_with_undefined_variable_is_an_error() {
    let me = user(&["id"])
        .select(condition("withEmail", true, vec![Selection::scalar("email")]))
        .build();
    let selector = weft_core::Selector::new(
        DataId::root(),
        Arc::from(vec![me]),
        weft_core::Variables::new(),
    );
    let result = weft_core::normalize_into_new_source(
        &selector,
        weft_core::constants::ROOT_TYPE,
        &common::obj(json!({"me": {"id": "1", "email": "a@b.c"}})),
        &NormalizeOptions::default(),
        None,
    );
    assert!(result.is_err());
}

#[test]
fn null_if_variables_neither_defer_nor_stream() {
    let me = user(&["id"])
        .select(defer_if("Q$defer$bio", "incremental", vec![Selection::scalar("bio")]))
        .build();
    let Selection::Stream(mut items) = stream(
        "Q_items",
        LinkedFieldBuilder::new("items").concrete("Item").plural().scalars(&["id"]).build(),
    ) else {
        panic!("expected a stream selection");
    };
    items.if_condition = Some("incremental".to_owned());
    let payload = normalize_with_variables(
        vec![me, Selection::Stream(items)],
        json!({"me": {"id": "1", "bio": "now"}, "items": [{"id": "a"}]}),
        json!({"incremental": null}),
    );
    assert!(payload.incremental_placeholders.is_empty());
    assert_eq!(payload.source.get("1").unwrap().value("bio").unwrap(), Some(json!("now")));
}

#[test]
fn stream_normalizes_initial_items_and_emits_placeholder() {
    let items = LinkedFieldBuilder::new("items")
        .concrete("Item")
        .plural()
        .scalars(&["id"])
        .build();
    let payload = normalize_root(
        vec![stream("Q_items", items)],
        json!({"items": [{"id": "a"}]}),
        &NormalizeOptions::default(),
    );
    assert_eq!(
        payload
            .source
            .get("client:root")
            .unwrap()
            .linked_ids("items")
            .unwrap()
            .unwrap(),
        &[Some(DataId::from("a"))][..]
    );
    let [IncrementalPlaceholder::Stream(placeholder)] = &payload.incremental_placeholders[..] else {
        panic!("expected one stream placeholder");
    };
    assert_eq!(placeholder.parent_id, DataId::root());
    assert!(placeholder.path.is_empty());
}

#[test]
fn module_import_records_references_and_emits_followup() {
    let me = user(&["id"]).select(module_import("Feed", "Feed_me")).build();
    let payload = normalize_root(
        vec![me],
        json!({"me": {
            "id": "1",
            "__module_component_Feed": "FeedComponent",
            "__module_operation_Feed": "Feed$normalization",
        }}),
        &NormalizeOptions::default(),
    );
    let record = payload.source.get("1").unwrap();
    assert_eq!(
        record.value(&module_component_key("Feed")).unwrap(),
        Some(json!("FeedComponent"))
    );
    assert_eq!(
        record.value(&module_operation_key("Feed")).unwrap(),
        Some(json!("Feed$normalization"))
    );
    let [FollowupPayload::ModuleImport(followup)] = &payload.followup_payloads[..] else {
        panic!("expected one module followup");
    };
    assert_eq!(followup.operation_reference, "Feed$normalization");
    assert_eq!(followup.data_id, DataId::from("1"));
    assert_eq!(followup.path, vec![PathSegment::from("me")]);
}

#[test]
fn actor_change_links_into_other_partition() {
    let field = LinkedFieldBuilder::new("as_page")
        .concrete("Page")
        .scalars(&["id", "name"])
        .into_field();
    let payload = normalize_root(
        vec![actor_change(field.clone())],
        json!({"as_page": {"actor_key": "actor:page", "id": "p1", "name": "P"}}),
        &NormalizeOptions::default(),
    );
    let root = payload.source.get("client:root").unwrap();
    let (actor, id) = root.actor_link("as_page").unwrap().unwrap();
    assert_eq!(actor.as_str(), "actor:page");
    assert_eq!(id, &DataId::from("p1"));
    assert!(payload.source.get("p1").is_none());
    let [FollowupPayload::Actor(followup)] = &payload.followup_payloads[..] else {
        panic!("expected one actor followup");
    };
    assert_eq!(followup.actor.as_str(), "actor:page");

    let payload = normalize_root(
        vec![actor_change(field)],
        json!({"as_page": {"id": "p1"}}),
        &NormalizeOptions::default(),
    );
    let root = payload.source.get("client:root").unwrap();
    assert_eq!(root.field("as_page"), Some(&FieldValue::Scalar(Value::Null)));
    assert_eq!(payload.diagnostics[0].kind, DiagnosticKind::MissingActorIdentifier);
    assert!(payload.followup_payloads.is_empty());
}

#[test]
fn handles_emit_field_payloads() {
    let me = user(&["id", "name"]).select(handle("name", "upper")).build();
    let payload = normalize_root(
        vec![me],
        json!({"me": {"id": "1", "name": "ada"}}),
        &NormalizeOptions::default(),
    );
    let [field_payload] = &payload.field_payloads[..] else {
        panic!("expected one handle payload");
    };
    assert_eq!(field_payload.data_id, DataId::from("1"));
    assert_eq!(field_payload.field_key, "name");
    assert_eq!(field_payload.handle_key, "__name_upper");
}

fn items_selection() -> Vec<Selection> {
    vec![LinkedFieldBuilder::new("items")
        .concrete("Item")
        .plural()
        .scalars(&["name"])
        .build()]
}

proptest! {
    #[test]
    fn republishing_the_same_response_changes_nothing(
        items in prop::collection::vec(
            (prop::option::of("[a-z]{1,4}"), "[a-z]{0,6}"),
            0..8,
        )
    ) {
        let data = Value::Array(
            items
                .iter()
                .map(|(id, name)| match id {
                    Some(id) => json!({"id": format!("srv:{id}"), "name": name}),
                    None => json!({"name": name}),
                })
                .collect(),
        );
        let options = NormalizeOptions {
            warn_on_conflicts: false,
            ..NormalizeOptions::default()
        };
        let first = normalize_root(items_selection(), json!({"items": data.clone()}), &options);
        let second = normalize_root(items_selection(), json!({"items": data}), &options);
        prop_assert_eq!(&first.source, &second.source);

        let mut store = Store::new();
        store.publish(&first.source).unwrap();
        store.notify(None);
        store.publish(&second.source).unwrap();
        prop_assert_eq!(store.updated_ids().count(), 0);
    }

    #[test]
    fn derived_ids_are_deterministic_and_index_distinct(
        parent in "[a-z0-9:]{1,12}",
        key in "[a-z]{1,8}",
        a in 0usize..64,
        b in 0usize..64,
    ) {
        let parent = DataId::from(parent.as_str());
        prop_assert_eq!(derive_id(&parent, &key, Some(a)), derive_id(&parent, &key, Some(a)));
        prop_assert!(derive_id(&parent, &key, Some(a)).is_local());
        if a != b {
            prop_assert_ne!(derive_id(&parent, &key, Some(a)), derive_id(&parent, &key, Some(b)));
        }
        prop_assert_ne!(derive_id(&parent, &key, None), derive_id(&parent, &key, Some(a)));
    }
}
