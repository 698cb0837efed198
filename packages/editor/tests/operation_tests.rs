//! Built-in operation behavior through the public document API
//!
//! Every effective operation is checked against its inverse: running the
//! returned undo descriptors must restore the exact prior node set.

use folio_editor::{
    Document, DocumentState, EditorConfig, EditorError, Node, OperationDescriptor,
    OperationError, Selection, TransactionOptions, TransactionOutcome,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// `doc > [p1 > t1 "Hello", p2 > t2 "World"]`
fn two_paragraphs() -> Document {
    let nodes = [
        Node::element("doc", "doc", vec!["p1".into(), "p2".into()]),
        Node::element("p1", "paragraph", vec!["t1".into()]).with_parent("doc"),
        Node::text("t1", "text", "Hello").with_parent("p1"),
        Node::element("p2", "paragraph", vec!["t2".into()]).with_parent("doc"),
        Node::text("t2", "text", "World").with_parent("p2"),
    ];
    let doc = Document::new(EditorConfig::default()).unwrap();
    doc.set_document_state(DocumentState {
        site_id: "local".into(),
        next_sid: 1,
        nodes: nodes
            .into_iter()
            .map(|node| (node.sid.clone(), node))
            .collect::<BTreeMap<_, _>>(),
    })
    .unwrap();
    doc
}

fn op(op_type: &str, payload: Value) -> OperationDescriptor {
    OperationDescriptor::new(op_type, payload)
}

fn run(doc: &Document, ops: &[OperationDescriptor]) -> Result<TransactionOutcome, EditorError> {
    doc.run_transaction(ops, TransactionOptions::default())
}

/// Run `ops`, then their inverses, and check nothing changed
fn assert_reverts(doc: &Document, ops: &[OperationDescriptor]) -> TransactionOutcome {
    let before = doc.snapshot();
    let outcome = run(doc, ops).unwrap();
    assert!(outcome.committed);

    let after = doc.snapshot();
    run(doc, &outcome.undo).unwrap();
    assert_eq!(*doc.snapshot(), *before, "undo of {:?}", ops);

    // Put the edit back so callers can inspect it
    run(doc, &outcome.operations.iter().map(|o| o.to_descriptor()).collect::<Vec<_>>()).unwrap();
    assert_eq!(*doc.snapshot(), *after);
    outcome
}

fn text(doc: &Document, sid: &str) -> String {
    doc.read(sid).unwrap().as_text().unwrap().to_string()
}

fn children(doc: &Document, sid: &str) -> Vec<String> {
    doc.read(sid).unwrap().children().unwrap().to_vec()
}

fn op_error(err: EditorError) -> OperationError {
    err.operation_error().cloned().expect("operation error")
}

// --- text ------------------------------------------------------------------

#[test]
fn test_replace_text_counts_chars() {
    let doc = two_paragraphs();
    run(&doc, &[OperationDescriptor::insert_text("t1", 5, " 🌍")]).unwrap();

    let outcome = assert_reverts(
        &doc,
        &[op("replaceText", json!({ "nodeId": "t1", "from": 6, "to": 7, "text": "world" }))],
    );
    assert_eq!(text(&doc, "t1"), "Hello world");
    assert_eq!(outcome.selection_after, Some(Selection::caret("t1", 11)));
}

#[test]
fn test_delete_text_out_of_range() {
    let doc = two_paragraphs();
    let err = run(&doc, &[OperationDescriptor::delete_text("t1", 2, 9)]).unwrap_err();
    assert_eq!(
        op_error(err),
        OperationError::OffsetOutOfRange { sid: "t1".into(), offset: 9, len: 5 }
    );
}

#[test]
fn test_text_operations_abort_on_missing_node() {
    let doc = two_paragraphs();
    let err = run(&doc, &[OperationDescriptor::insert_text("nope", 0, "x")]).unwrap_err();
    assert_eq!(op_error(err), OperationError::NotFound("nope".into()));
}

#[test]
fn test_split_then_merge_text() {
    let doc = two_paragraphs();

    let outcome = assert_reverts(
        &doc,
        &[
            op("splitText", json!({ "nodeId": "t1", "offset": 2, "alias": "tail" })),
            OperationDescriptor::insert_text("$tail", 0, "-"),
        ],
    );
    let tail = outcome.operations[0].data["sids"][0].as_str().unwrap().to_string();
    assert_eq!(outcome.operations[1].node_id, tail);
    assert_eq!(text(&doc, "t1"), "He");
    assert_eq!(text(&doc, &tail), "-llo");
    assert_eq!(children(&doc, "p1"), vec!["t1".to_string(), tail.clone()]);
    assert!(doc.read(&tail).unwrap().attrs.is_empty());

    assert_reverts(&doc, &[op("mergeText", json!({ "nodeId": "t1" }))]);
    assert_eq!(text(&doc, "t1"), "He-llo");
    assert!(doc.read(&tail).is_none());
    assert_eq!(children(&doc, "p1"), vec!["t1".to_string()]);
}

#[test]
fn test_merge_text_requires_equal_marks() {
    let doc = two_paragraphs();
    run(
        &doc,
        &[
            op("splitText", json!({ "nodeId": "t1", "offset": 2, "alias": "tail" })),
            op("applyMark", json!({ "nodeIds": ["$tail"], "mark": "bold" })),
        ],
    )
    .unwrap();

    let err = run(&doc, &[op("mergeText", json!({ "nodeId": "t1" }))]).unwrap_err();
    assert!(matches!(op_error(err), OperationError::InvalidStructure(_)));
}

// --- marks -----------------------------------------------------------------

#[test]
fn test_marks_apply_only_to_text() {
    let doc = two_paragraphs();
    let err = run(&doc, &[op("applyMark", json!({ "nodeIds": ["p1"], "mark": "bold" }))])
        .unwrap_err();
    assert!(matches!(op_error(err), OperationError::InvalidStructure(_)));
}

#[test]
fn test_toggle_mark_over_mixed_range_applies() {
    let doc = two_paragraphs();
    run(&doc, &[op("applyMark", json!({ "nodeIds": ["t1"], "mark": "italic" }))]).unwrap();

    let outcome = assert_reverts(&doc, &[OperationDescriptor::toggle_mark(&["t1", "t2"], "italic")]);
    assert!(doc.read("t1").unwrap().marks.contains("italic"));
    assert!(doc.read("t2").unwrap().marks.contains("italic"));
    // Only t2 actually changed, so only t2 is in the inverse
    assert_eq!(outcome.undo[0].payload["nodeIds"], json!(["t2"]));
}

#[test]
fn test_removing_absent_mark_has_no_inverse() {
    let doc = two_paragraphs();
    let outcome = run(&doc, &[op("removeMark", json!({ "nodeIds": ["t1"], "mark": "bold" }))])
        .unwrap();
    assert!(outcome.committed);
    assert!(outcome.undo.is_empty());
}

#[test]
fn test_mark_targets_listed_twice_change_once() {
    let doc = two_paragraphs();
    let outcome = assert_reverts(
        &doc,
        &[op("applyMark", json!({ "nodeIds": ["t2", "t1", "t2"], "mark": "bold" }))],
    );

    assert_eq!(outcome.undo.len(), 1);
    assert_eq!(outcome.undo[0].payload["nodeIds"], json!(["t1", "t2"]));
    assert!(doc.read("t1").unwrap().marks.contains("bold"));
}

// --- structure -------------------------------------------------------------

#[test]
fn test_create_node_under_parent() {
    let doc = two_paragraphs();
    let outcome = assert_reverts(
        &doc,
        &[op(
            "createNode",
            json!({ "stype": "text", "text": "!", "parentId": "p2", "index": 0, "marks": ["bold"] }),
        )],
    );

    let sid = outcome.operations[0].node_id.clone();
    assert_eq!(sid, "local:1");
    assert_eq!(children(&doc, "p2"), vec![sid.clone(), "t2".to_string()]);
    assert_eq!(doc.read(&sid).unwrap().parent.as_deref(), Some("p2"));
    assert!(doc.read(&sid).unwrap().marks.contains("bold"));
}

#[test]
fn test_preassigned_sid_must_be_fresh() {
    let doc = two_paragraphs();
    let err = run(
        &doc,
        &[op("createNode", json!({ "stype": "text", "text": "", "sids": ["t1"] }))],
    )
    .unwrap_err();
    assert!(matches!(op_error(err), OperationError::InvalidDescriptor(_)));
}

#[test]
fn test_delete_node_removes_subtree() {
    let doc = two_paragraphs();
    assert_reverts(&doc, &[OperationDescriptor::delete_node("p1")]);

    assert!(doc.read("p1").is_none());
    assert!(doc.read("t1").is_none());
    assert_eq!(children(&doc, "doc"), vec!["p2".to_string()]);
}

#[test]
fn test_structural_deletes_of_missing_targets_are_noops() {
    let doc = two_paragraphs();
    let before = doc.snapshot();

    let outcome = run(
        &doc,
        &[
            OperationDescriptor::delete_node("ghost"),
            op("removeChild", json!({ "parentId": "ghost", "index": 0 })),
            op("removeChild", json!({ "parentId": "p1", "index": 7 })),
        ],
    )
    .unwrap();
    assert!(outcome.committed);
    assert!(outcome.undo.is_empty());
    assert_eq!(*doc.snapshot(), *before);
}

#[test]
fn test_remove_child_by_index() {
    let doc = two_paragraphs();
    assert_reverts(&doc, &[op("removeChild", json!({ "parentId": "doc", "index": 1 }))]);
    assert_eq!(children(&doc, "doc"), vec!["p1".to_string()]);
    assert!(doc.read("t2").is_none());
}

#[test]
fn test_move_node_between_parents() {
    let doc = two_paragraphs();
    assert_reverts(&doc, &[OperationDescriptor::move_node("t2", "p1", 0)]);

    assert_eq!(children(&doc, "p1"), vec!["t2".to_string(), "t1".to_string()]);
    assert!(children(&doc, "p2").is_empty());
    assert_eq!(doc.read("t2").unwrap().parent.as_deref(), Some("p1"));
}

#[test]
fn test_move_node_into_descendant_is_cycle() {
    let doc = two_paragraphs();
    let err = run(&doc, &[OperationDescriptor::move_node("doc", "p1", 0)]).unwrap_err();
    assert_eq!(op_error(err), OperationError::CycleDetected);
}

#[test]
fn test_move_child_reorders_and_checks_bounds() {
    let doc = two_paragraphs();
    assert_reverts(&doc, &[op("moveChild", json!({ "parentId": "doc", "from": 0, "to": 1 }))]);
    assert_eq!(children(&doc, "doc"), vec!["p2".to_string(), "p1".to_string()]);

    let err = run(&doc, &[op("moveChild", json!({ "parentId": "doc", "from": 0, "to": 2 }))])
        .unwrap_err();
    assert_eq!(
        op_error(err),
        OperationError::IndexOutOfRange { sid: "doc".into(), index: 2, len: 2 }
    );
}

#[test]
fn test_add_child_requires_detached_child() {
    let doc = two_paragraphs();
    let err = run(&doc, &[op("addChild", json!({ "parentId": "p1", "childId": "t2" }))])
        .unwrap_err();
    assert!(matches!(op_error(err), OperationError::InvalidStructure(_)));

    assert_reverts(
        &doc,
        &[
            op("removeChild", json!({ "parentId": "doc", "index": 1 })),
            op("createNode", json!({ "stype": "text", "text": "x", "attrs": { "$alias": "x" } })),
            op("addChild", json!({ "parentId": "p1", "childId": "$x" })),
        ],
    );
    assert_eq!(children(&doc, "p1"), vec!["t1".to_string(), "local:1".to_string()]);
}

#[test]
fn test_transform_node_replaces_identity() {
    let doc = two_paragraphs();
    let outcome = assert_reverts(
        &doc,
        &[op("transformNode", json!({ "nodeId": "p1", "stype": "heading", "attrs": { "level": 2 } }))],
    );

    let heading = outcome.operations[0].data["sids"][0].as_str().unwrap().to_string();
    assert!(doc.read("p1").is_none());
    assert_eq!(doc.read(&heading).unwrap().stype, "heading");
    assert_eq!(doc.read(&heading).unwrap().attrs["level"], json!(2));
    assert_eq!(children(&doc, "doc"), vec![heading.clone(), "p2".to_string()]);
    assert_eq!(doc.read("t1").unwrap().parent, Some(heading));
}

#[test]
fn test_split_and_merge_node() {
    let doc = two_paragraphs();
    run(&doc, &[OperationDescriptor::move_node("t2", "p1", 1)]).unwrap();

    let outcome = assert_reverts(&doc, &[op("splitNode", json!({ "nodeId": "p1", "index": 1 }))]);
    let second = outcome.operations[0].data["sids"][0].as_str().unwrap().to_string();
    assert_eq!(children(&doc, "p1"), vec!["t1".to_string()]);
    assert_eq!(children(&doc, &second), vec!["t2".to_string()]);
    assert_eq!(children(&doc, "doc"), vec!["p1".to_string(), second.clone(), "p2".to_string()]);

    assert_reverts(&doc, &[op("mergeNode", json!({ "nodeId": "p1" }))]);
    assert_eq!(children(&doc, "p1"), vec!["t1".to_string(), "t2".to_string()]);
    assert!(doc.read(&second).is_none());
}

#[test]
fn test_wrap_and_unwrap() {
    let doc = two_paragraphs();
    let outcome = assert_reverts(
        &doc,
        &[op("wrapNode", json!({ "nodeIds": ["p1", "p2"], "stype": "blockquote" }))],
    );
    let quote = outcome.operations[0].data["sids"][0].as_str().unwrap().to_string();
    assert_eq!(children(&doc, "doc"), vec![quote.clone()]);
    assert_eq!(children(&doc, &quote), vec!["p1".to_string(), "p2".to_string()]);

    assert_reverts(&doc, &[op("unwrapNode", json!({ "nodeId": quote }))]);
    assert_eq!(children(&doc, "doc"), vec!["p1".to_string(), "p2".to_string()]);
    assert_eq!(doc.read("p1").unwrap().parent.as_deref(), Some("doc"));
}

#[test]
fn test_wrap_requires_contiguous_siblings() {
    let doc = two_paragraphs();
    let err = run(
        &doc,
        &[op("wrapNode", json!({ "nodeIds": ["p2", "p1"], "stype": "blockquote" }))],
    )
    .unwrap_err();
    assert!(matches!(op_error(err), OperationError::InvalidStructure(_)));
}

#[test]
fn test_update_attributes_null_removes_key() {
    let doc = two_paragraphs();
    run(&doc, &[op("updateAttributes", json!({ "nodeId": "p1", "attrs": { "align": "left", "id": 3 } }))])
        .unwrap();

    assert_reverts(
        &doc,
        &[op("updateAttributes", json!({ "nodeId": "p1", "attrs": { "align": null } }))],
    );
    let attrs = doc.read("p1").unwrap().attrs;
    assert!(!attrs.contains_key("align"));
    assert_eq!(attrs["id"], json!(3));
}

#[test]
fn test_insert_paragraph_mid_text() {
    let doc = two_paragraphs();
    let outcome = assert_reverts(&doc, &[OperationDescriptor::insert_paragraph("t1", 2)]);

    let block = outcome.operations[0].data["sids"][1].as_str().unwrap().to_string();
    let tail = outcome.operations[0].data["sids"][0].as_str().unwrap().to_string();
    assert_eq!(children(&doc, "doc"), vec!["p1".to_string(), block.clone(), "p2".to_string()]);
    assert_eq!(text(&doc, "t1"), "He");
    assert_eq!(children(&doc, &block), vec![tail.clone()]);
    assert_eq!(text(&doc, &tail), "llo");
    assert_eq!(outcome.selection_after, Some(Selection::caret(tail, 0)));
}

#[test]
fn test_unresolved_alias_aborts() {
    let doc = two_paragraphs();
    let err = run(&doc, &[OperationDescriptor::delete_node("$never")]).unwrap_err();
    assert_eq!(
        op_error(err),
        OperationError::AliasResolutionFailure("$never".into())
    );
}
