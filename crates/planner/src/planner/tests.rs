use std::collections::HashSet;

use serde_json::json;

use super::*;
use crate::error::PlanError;
use crate::types::{MessageCreate, MessageCreateInput, MessageRef, MessageUpdate, UpdateParent};

fn plan(
    operations: ChatMessageOperations,
    branch_info: ChatPreBranchInfo,
) -> PlanResult<Option<ChatMutationPlan>> {
    prepare_chat_message_operations(&operations, &branch_info)
}

fn creates(records: Vec<MessageCreateInput>) -> ChatMessageOperations {
    ChatMessageOperations {
        create: records,
        ..ChatMessageOperations::default()
    }
}

fn deletes(ids: &[&str]) -> ChatMessageOperations {
    ChatMessageOperations {
        delete: ids.iter().map(|id| MessageRef::new(*id)).collect(),
        ..ChatMessageOperations::default()
    }
}

fn tip(id: &str) -> ChatPreBranchInfo {
    ChatPreBranchInfo::new(Some(id.into()))
}

/// Fails the test if any id shows up twice along the nested `parent.create` chain.
fn assert_no_repeated_ids(create: &MessageCreate) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for node in create.lineage() {
        assert!(
            seen.insert(node.id.clone()),
            "id '{}' repeats in nested create chain",
            node.id
        );
        ids.push(node.id.to_string());
    }
    ids
}

fn to_json(plan: &ChatMutationPlan) -> serde_json::Value {
    serde_json::to_value(plan).unwrap()
}

#[test]
fn empty_operations_yield_no_plan() {
    let result = plan(ChatMessageOperations::default(), tip("123")).unwrap();
    assert!(result.is_none());
}

#[test]
fn single_create_without_tip_has_no_parent() {
    let result = plan(
        creates(vec![MessageCreateInput::new("1").with_content("Hello")]),
        ChatPreBranchInfo::default(),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({ "create": { "id": "1", "content": "Hello" } })
    );
}

#[test]
fn single_create_hangs_off_branch_tip() {
    let result = plan(
        creates(vec![MessageCreateInput::new("1").with_content("Hello")]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "create": {
                "id": "1",
                "content": "Hello",
                "parent": { "connect": { "id": "123" } }
            }
        })
    );
}

#[test]
fn parentless_creates_chain_in_submission_order() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("1").with_content("Hello"),
            MessageCreateInput::new("2").with_content("World"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "create": {
                "id": "2",
                "content": "World",
                "parent": {
                    "create": {
                        "id": "1",
                        "content": "Hello",
                        "parent": { "connect": { "id": "123" } }
                    }
                }
            }
        })
    );
}

#[test]
fn explicit_links_are_reordered_into_one_chain() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("1").with_content("one").with_parent("3"),
            MessageCreateInput::new("2").with_content("two").with_parent("1"),
            MessageCreateInput::new("3").with_content("three").with_parent("4"),
            MessageCreateInput::new("4").with_content("four"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    let create = result.create.as_ref().unwrap();
    assert_eq!(assert_no_repeated_ids(create), vec!["2", "1", "3", "4"]);
    assert_eq!(create.anchor().map(MessageId::as_str), Some("123"));
    assert_eq!(
        to_json(&result),
        json!({
            "create": {
                "id": "2",
                "content": "two",
                "parent": { "create": {
                    "id": "1",
                    "content": "one",
                    "parent": { "create": {
                        "id": "3",
                        "content": "three",
                        "parent": { "create": {
                            "id": "4",
                            "content": "four",
                            "parent": { "connect": { "id": "123" } }
                        } }
                    } }
                } }
            }
        })
    );
}

#[test]
fn connect_outside_batch_overrides_branch_tip() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("b").with_parent("a"),
            MessageCreateInput::new("a").with_parent("existing"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    let create = result.create.unwrap();
    assert_eq!(assert_no_repeated_ids(&create), vec!["b", "a"]);
    assert_eq!(create.anchor().map(MessageId::as_str), Some("existing"));
}

#[test]
fn nested_input_creates_are_unfolded_into_the_chain() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("3")
                .with_content("c")
                .with_nested_parent(
                    MessageCreateInput::new("2")
                        .with_content("b")
                        .with_nested_parent(MessageCreateInput::new("1").with_content("a")),
                ),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "create": {
                "id": "3",
                "content": "c",
                "parent": { "create": {
                    "id": "2",
                    "content": "b",
                    "parent": { "create": {
                        "id": "1",
                        "content": "a",
                        "parent": { "connect": { "id": "123" } }
                    } }
                } }
            }
        })
    );
}

#[test]
fn flat_record_can_connect_to_nested_input_create() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("2").with_nested_parent(MessageCreateInput::new("1")),
            MessageCreateInput::new("3").with_parent("2"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    let create = result.create.unwrap();
    assert_eq!(assert_no_repeated_ids(&create), vec!["3", "2", "1"]);
    assert_eq!(create.anchor().map(MessageId::as_str), Some("123"));
}

#[test]
fn nested_input_create_repeating_batch_id_is_rejected() {
    let error = plan(
        creates(vec![
            MessageCreateInput::new("1"),
            MessageCreateInput::new("2").with_nested_parent(MessageCreateInput::new("1")),
        ]),
        tip("123"),
    )
    .unwrap_err();

    match error {
        PlanError::DuplicateId { list, id, .. } => {
            assert_eq!(list, "create");
            assert_eq!(id.as_str(), "1");
        }
        other => panic!("expected duplicate id, got {other:?}"),
    }
}

#[test]
fn nested_input_creates_count_toward_batch_limit() {
    let planner = MessageTreePlanner::new(PlannerSettings {
        max_batch_operations: 2,
        ..PlannerSettings::default()
    });
    let operations = creates(vec![
        MessageCreateInput::new("3").with_nested_parent(
            MessageCreateInput::new("2").with_nested_parent(MessageCreateInput::new("1")),
        ),
    ]);

    let error = planner.plan(&operations, &tip("123")).unwrap_err();

    assert!(matches!(
        error,
        PlanError::BatchTooLarge {
            count: 3,
            limit: 2,
            ..
        }
    ));
}

#[test]
fn fork_inside_batch_is_rejected() {
    let error = plan(
        creates(vec![
            MessageCreateInput::new("1"),
            MessageCreateInput::new("2").with_parent("1"),
            MessageCreateInput::new("3").with_parent("1"),
        ]),
        tip("123"),
    )
    .unwrap_err();

    match error {
        PlanError::BranchingDetected { leaves, .. } => {
            assert_eq!(leaves, vec![MessageId::from("2"), MessageId::from("3")]);
        }
        other => panic!("expected branching error, got {other:?}"),
    }
}

#[test]
fn two_independent_roots_are_rejected() {
    let error = plan(
        creates(vec![
            MessageCreateInput::new("1").with_parent("old-a"),
            MessageCreateInput::new("2"),
        ]),
        tip("123"),
    )
    .unwrap_err();

    assert!(matches!(error, PlanError::BranchingDetected { .. }));
    assert_eq!(error.stage(), "create-chain-find-leaf");
}

#[test]
fn single_cycle_is_cut_without_repeating_ids() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("1").with_parent("3"),
            MessageCreateInput::new("2").with_parent("1"),
            MessageCreateInput::new("3").with_parent("2"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    let create = result.create.unwrap();
    let ids = assert_no_repeated_ids(&create);
    assert_eq!(ids.len(), 3);
    assert_eq!(create.anchor(), None);
}

#[test]
fn leaf_with_detached_cycle_keeps_only_leaf_chain() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("C"),
            MessageCreateInput::new("A").with_parent("B"),
            MessageCreateInput::new("B").with_parent("A"),
        ]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "create": { "id": "C", "parent": { "connect": { "id": "123" } } }
        })
    );
}

#[test]
fn disjoint_cycles_do_not_loop() {
    let result = plan(
        creates(vec![
            MessageCreateInput::new("1").with_parent("2"),
            MessageCreateInput::new("2").with_parent("1"),
            MessageCreateInput::new("3").with_parent("4"),
            MessageCreateInput::new("4").with_parent("3"),
        ]),
        ChatPreBranchInfo::default(),
    )
    .unwrap()
    .unwrap();

    let ids = assert_no_repeated_ids(result.create.as_ref().unwrap());
    assert!(!ids.is_empty());
    assert!(ids.len() <= 2);
}

#[test]
fn self_parented_create_does_not_loop() {
    let result = plan(
        creates(vec![MessageCreateInput::new("1").with_parent("1")]),
        tip("123"),
    )
    .unwrap()
    .unwrap();

    assert_eq!(to_json(&result), json!({ "create": { "id": "1" } }));
}

#[test]
fn deleting_inner_message_reconnects_children_to_its_parent() {
    let result = plan(
        deletes(&["B"]),
        ChatPreBranchInfo::default().with_node("B", Some("A"), ["C", "D"]),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "update": [
                { "id": "C", "parent": { "connect": { "id": "A" } } },
                { "id": "D", "parent": { "connect": { "id": "A" } } }
            ],
            "delete": [{ "id": "B" }]
        })
    );
}

#[test]
fn deleting_root_disconnects_children() {
    let result = plan(
        deletes(&["A"]),
        ChatPreBranchInfo::default().with_node("A", None, ["B"]),
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        result.update,
        vec![MessageUpdate::reparent("B".into(), UpdateParent::Disconnect)]
    );
    assert_eq!(result.delete, vec![MessageRef::new("A")]);
}

#[test]
fn cascading_deletes_skip_to_nearest_survivor() {
    // A -> B -> C -> {D, E}, B -> F; B and C are deleted together.
    let branch_info = ChatPreBranchInfo::default()
        .with_node("B", Some("A"), ["C", "F"])
        .with_node("C", Some("B"), ["D", "E"]);

    let result = plan(deletes(&["C", "B"]), branch_info).unwrap().unwrap();

    assert_eq!(
        result.update,
        vec![
            MessageUpdate::reparent("D".into(), UpdateParent::Connect("A".into())),
            MessageUpdate::reparent("E".into(), UpdateParent::Connect("A".into())),
            MessageUpdate::reparent("C".into(), UpdateParent::Connect("A".into())),
            MessageUpdate::reparent("F".into(), UpdateParent::Connect("A".into())),
        ]
    );
}

#[test]
fn cascading_deletes_from_root_disconnect_survivors() {
    let branch_info = ChatPreBranchInfo::default()
        .with_node("A", None, ["B"])
        .with_node("B", Some("A"), ["C"]);

    let result = plan(deletes(&["A", "B"]), branch_info).unwrap().unwrap();

    assert_eq!(
        result.update,
        vec![
            MessageUpdate::reparent("B".into(), UpdateParent::Disconnect),
            MessageUpdate::reparent("C".into(), UpdateParent::Disconnect),
        ]
    );
}

#[test]
fn deleted_ancestor_cycle_ends_as_disconnect() {
    let branch_info = ChatPreBranchInfo::default()
        .with_node("A", Some("B"), ["B", "X"])
        .with_node("B", Some("A"), ["A"]);

    let result = plan(deletes(&["A", "B"]), branch_info).unwrap().unwrap();

    assert_eq!(
        result.update,
        vec![
            MessageUpdate::reparent("B".into(), UpdateParent::Disconnect),
            MessageUpdate::reparent("X".into(), UpdateParent::Disconnect),
            MessageUpdate::reparent("A".into(), UpdateParent::Disconnect),
        ]
    );
}

#[test]
fn child_under_two_deleted_parents_gets_one_update() {
    let branch_info = ChatPreBranchInfo::default()
        .with_node("P", Some("root"), ["C"])
        .with_node("Q", Some("root"), ["C"]);

    let result = plan(deletes(&["P", "Q"]), branch_info).unwrap().unwrap();

    assert_eq!(
        result.update,
        vec![MessageUpdate::reparent(
            "C".into(),
            UpdateParent::Connect("root".into())
        )]
    );
}

#[test]
fn childless_delete_passes_through_alone() {
    let result = plan(
        deletes(&["Z"]),
        ChatPreBranchInfo::default().with_node("Z", Some("Y"), []),
    )
    .unwrap()
    .unwrap();

    assert_eq!(to_json(&result), json!({ "delete": [{ "id": "Z" }] }));
}

#[test]
fn delete_without_topology_fails() {
    let error = plan(
        deletes(&["B", "missing"]),
        ChatPreBranchInfo::default().with_node("B", Some("A"), ["C"]),
    )
    .unwrap_err();

    match error {
        PlanError::MissingTreeTopology { id, .. } => assert_eq!(id.as_str(), "missing"),
        other => panic!("expected missing topology, got {other:?}"),
    }
}

#[test]
fn explicit_updates_pass_through_unchanged() {
    let update = MessageUpdate::new("7")
        .with_content("edited")
        .with_field("pinned", json!(true));
    let operations = ChatMessageOperations {
        update: vec![update.clone()],
        ..ChatMessageOperations::default()
    };

    let result = plan(operations, tip("123")).unwrap().unwrap();

    assert_eq!(result.update, vec![update]);
    assert!(result.create.is_none());
    assert!(result.delete.is_empty());
}

#[test]
fn explicit_update_and_reparent_stay_separate_entries() {
    let operations = ChatMessageOperations {
        update: vec![MessageUpdate::new("C").with_content("new text")],
        delete: vec![MessageRef::new("B")],
        ..ChatMessageOperations::default()
    };
    let branch_info = ChatPreBranchInfo::default().with_node("B", Some("A"), ["C"]);

    let result = plan(operations, branch_info).unwrap().unwrap();

    assert_eq!(
        to_json(&result)["update"],
        json!([
            { "id": "C", "content": "new text" },
            { "id": "C", "parent": { "connect": { "id": "A" } } }
        ])
    );
}

#[test]
fn combined_batch_applies_every_step() {
    let operations = ChatMessageOperations {
        create: vec![
            MessageCreateInput::new("n2").with_content("reply").with_parent("n1"),
            MessageCreateInput::new("n1").with_content("question"),
        ],
        update: vec![MessageUpdate::new("m1").with_content("fixed typo")],
        delete: vec![MessageRef::new("m2")],
    };
    let branch_info = tip("m3").with_node("m2", Some("m1"), ["m3"]);

    let result = plan(operations, branch_info).unwrap().unwrap();

    assert_eq!(
        to_json(&result),
        json!({
            "create": {
                "id": "n2",
                "content": "reply",
                "parent": { "create": {
                    "id": "n1",
                    "content": "question",
                    "parent": { "connect": { "id": "m3" } }
                } }
            },
            "update": [
                { "id": "m1", "content": "fixed typo" },
                { "id": "m3", "parent": { "connect": { "id": "m1" } } }
            ],
            "delete": [{ "id": "m2" }]
        })
    );
}

#[test]
fn planner_leaves_inputs_untouched() {
    let operations = ChatMessageOperations {
        create: vec![
            MessageCreateInput::new("1"),
            MessageCreateInput::new("2"),
        ],
        update: Vec::new(),
        delete: vec![MessageRef::new("B")],
    };
    let branch_info = tip("123").with_node("B", Some("A"), ["C"]);
    let operations_before = operations.clone();
    let branch_info_before = branch_info.clone();

    let first = prepare_chat_message_operations(&operations, &branch_info).unwrap();
    let second = prepare_chat_message_operations(&operations, &branch_info).unwrap();

    assert_eq!(operations, operations_before);
    assert_eq!(branch_info, branch_info_before);
    assert_eq!(first, second);
}

#[test]
fn duplicate_create_ids_are_rejected() {
    let error = plan(
        creates(vec![
            MessageCreateInput::new("1"),
            MessageCreateInput::new("1").with_content("again"),
        ]),
        tip("123"),
    )
    .unwrap_err();

    assert!(matches!(
        error,
        PlanError::DuplicateId { list: "create", .. }
    ));
}

#[test]
fn blank_ids_are_rejected() {
    let error = plan(deletes(&["  "]), ChatPreBranchInfo::default()).unwrap_err();
    assert!(matches!(error, PlanError::InvalidId { .. }));
}

#[test]
fn blank_create_parent_id_is_rejected() {
    let error = plan(
        creates(vec![MessageCreateInput::new("1").with_parent("  ")]),
        tip("123"),
    )
    .unwrap_err();

    match error {
        PlanError::InvalidId { raw, .. } => assert_eq!(raw, "  "),
        other => panic!("expected invalid id, got {other:?}"),
    }
}

#[test]
fn blank_update_parent_id_is_rejected() {
    let operations = ChatMessageOperations {
        update: vec![MessageUpdate::reparent(
            "7".into(),
            UpdateParent::Connect("".into()),
        )],
        ..ChatMessageOperations::default()
    };

    let error = plan(operations, tip("123")).unwrap_err();

    assert!(matches!(error, PlanError::InvalidId { .. }));
    assert_eq!(error.stage(), "validate-batch-ids");
}

#[test]
fn oversized_batch_is_rejected() {
    let planner = MessageTreePlanner::new(PlannerSettings {
        max_batch_operations: 2,
        ..PlannerSettings::default()
    });
    let operations = creates(vec![
        MessageCreateInput::new("1"),
        MessageCreateInput::new("2"),
        MessageCreateInput::new("3"),
    ]);

    assert_eq!(planner.settings().max_batch_operations, 2);
    let error = planner.plan(&operations, &tip("123")).unwrap_err();

    assert!(matches!(
        error,
        PlanError::BatchTooLarge {
            count: 3,
            limit: 2,
            ..
        }
    ));
}

#[test]
fn planner_normalizes_zero_batch_limit() {
    let planner = MessageTreePlanner::new(PlannerSettings {
        max_batch_operations: 0,
        ..PlannerSettings::default()
    });

    assert_eq!(
        planner.settings().max_batch_operations,
        PlannerSettings::default().max_batch_operations
    );
    let result = planner
        .plan(&creates(vec![MessageCreateInput::new("1")]), &tip("123"))
        .unwrap();
    assert!(result.is_some());
}

#[test]
fn long_chain_keeps_every_id_once() {
    let records = (0..200)
        .map(|index| {
            let record = MessageCreateInput::new(format!("m{index}"));
            if index == 0 {
                record
            } else {
                record.with_parent(format!("m{}", index - 1))
            }
        })
        .rev()
        .collect::<Vec<_>>();

    let result = plan(creates(records), tip("root")).unwrap().unwrap();

    let create = result.create.unwrap();
    let ids = assert_no_repeated_ids(&create);
    assert_eq!(ids.len(), 200);
    assert_eq!(ids.first().map(String::as_str), Some("m199"));
    assert_eq!(create.anchor().map(MessageId::as_str), Some("root"));
}
