//! Collaboration seam: remote application, echo suppression, channel
//! adapters and document state transfer

use folio_editor::{
    batch_channel, AtomicOperation, BusError, ChannelAdapter, CollaborationAdapter, Document,
    DocumentState, EditorConfig, EditorError, OperationDescriptor, Selection, TransactionOptions,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn site(name: &str) -> Arc<Document> {
    init_tracing();
    Arc::new(Document::new(EditorConfig::default().with_site_id(name)).unwrap())
}

/// Build `doc > [p > t "Hello", q > u "World"]` on `doc` through transactions
fn seed(doc: &Document) {
    doc.run_transaction(
        &[
            OperationDescriptor::new("createNode", json!({ "stype": "doc", "attrs": { "$alias": "doc" } })),
            OperationDescriptor::new(
                "createNode",
                json!({ "stype": "paragraph", "parentId": "$doc", "attrs": { "$alias": "p" } }),
            ),
            OperationDescriptor::new(
                "createNode",
                json!({ "stype": "text", "text": "Hello", "parentId": "$p" }),
            ),
            OperationDescriptor::new(
                "createNode",
                json!({ "stype": "paragraph", "parentId": "$doc", "attrs": { "$alias": "q" } }),
            ),
            OperationDescriptor::new(
                "createNode",
                json!({ "stype": "text", "text": "World", "parentId": "$q" }),
            ),
        ],
        TransactionOptions::default(),
    )
    .unwrap();
}

/// Record every batch the document emits
fn recorder(doc: &Document) -> Arc<Mutex<Vec<Vec<AtomicOperation>>>> {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    doc.subscribe(Arc::new(move |ops: &[AtomicOperation]| -> Result<(), BusError> {
        sink.lock().unwrap().push(ops.to_vec());
        Ok(())
    }));
    batches
}

#[test]
fn test_emitted_operations_carry_real_ids() {
    let doc = site("alice");
    let batches = recorder(&doc);
    seed(&doc);

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let ops = &batches[0];
    assert_eq!(ops.len(), 5);
    assert_eq!(ops[0].kind, "createNode");
    assert_eq!(ops[0].node_id, "alice:1");
    assert_eq!(ops[1].parent_id.as_deref(), Some("alice:1"));
    assert_eq!(ops[2].data["parentId"], json!("alice:2"));
    assert_eq!(ops[2].data["sids"], json!(["alice:3"]));
    assert!(ops.iter().all(|op| op.timestamp > 0));
}

#[test]
fn test_remote_apply_suppresses_echo() {
    let alice = site("alice");
    let bob = site("bob");
    let from_alice = recorder(&alice);
    let from_bob = recorder(&bob);

    seed(&alice);
    let batch = from_alice.lock().unwrap()[0].clone();

    let outcome = bob.apply_remote(&batch).unwrap();
    assert!(outcome.committed);
    assert_eq!(outcome.operations.len(), 5);

    assert!(from_bob.lock().unwrap().is_empty());
    assert!(!bob.can_undo());
    assert_eq!(*bob.snapshot(), *alice.snapshot());
}

#[test]
fn test_remote_apply_keeps_local_selection() {
    let alice = site("alice");
    let bob = site("bob");
    let from_alice = recorder(&alice);
    seed(&alice);
    bob.apply_remote(&from_alice.lock().unwrap()[0]).unwrap();

    bob.set_selection(Some(Selection::caret("alice:5", 2)));
    alice
        .run_transaction(
            &[OperationDescriptor::insert_text("alice:3", 5, "!")],
            TransactionOptions::default(),
        )
        .unwrap();
    let edit = from_alice.lock().unwrap()[1].clone();

    bob.apply_remote(&edit).unwrap();
    assert_eq!(bob.read("alice:3").unwrap().as_text(), Some("Hello!"));
    assert_eq!(bob.selection(), Some(Selection::caret("alice:5", 2)));
}

#[test]
fn test_failed_remote_batch_leaves_store_untouched() {
    let alice = site("alice");
    let bob = site("bob");
    let from_alice = recorder(&alice);
    seed(&alice);

    // Bob never saw the seed, so the edit targets unknown nodes
    alice
        .run_transaction(
            &[OperationDescriptor::insert_text("alice:3", 0, ">")],
            TransactionOptions::default(),
        )
        .unwrap();
    let edit = from_alice.lock().unwrap()[1].clone();

    let err = bob.apply_remote(&edit).unwrap_err();
    assert!(matches!(err, EditorError::Operation { .. }));
    assert!(bob.snapshot().is_empty());
    assert!(!bob.is_locked());
}

#[test]
fn test_channel_adapters_converge() -> anyhow::Result<()> {
    let alice = site("alice");
    let bob = site("bob");
    seed(&alice);
    bob.set_document_state(alice.get_document_state())?;

    let (to_bob, mut bob_inbox) = batch_channel();
    let (to_alice, mut alice_inbox) = batch_channel();
    let mut alice_link = ChannelAdapter::new(to_bob);
    let mut bob_link = ChannelAdapter::new(to_alice);
    alice_link.connect(Arc::clone(&alice))?;
    bob_link.connect(Arc::clone(&bob))?;

    alice.run_transaction(
        &[OperationDescriptor::insert_paragraph("alice:3", 2)],
        TransactionOptions::default(),
    )?;
    bob.run_transaction(
        &[
            OperationDescriptor::insert_text("alice:5", 5, "!"),
            OperationDescriptor::toggle_mark(&["alice:5"], "bold"),
        ],
        TransactionOptions::default(),
    )?;

    assert_eq!(bob_link.drain(&mut bob_inbox)?, 1);
    assert_eq!(alice_link.drain(&mut alice_inbox)?, 1);
    assert_eq!(*alice.snapshot(), *bob.snapshot());

    // Undo on one site travels as ordinary operations
    assert!(alice.undo()?);
    bob_link.drain(&mut bob_inbox)?;
    assert_eq!(*alice.snapshot(), *bob.snapshot());
    assert_eq!(bob.read("alice:3").unwrap().as_text(), Some("Hello"));

    // Nothing bounced back
    assert!(alice_inbox.try_recv().is_err());
    Ok(())
}

#[test]
fn test_disconnected_adapter() {
    let doc = site("alice");
    let (to_peer, mut inbox) = batch_channel();
    let mut link = ChannelAdapter::new(to_peer);

    assert!(matches!(link.get_document_state(), Err(EditorError::NotConnected)));

    link.connect(Arc::clone(&doc)).unwrap();
    seed(&doc);
    assert!(inbox.try_recv().is_ok());

    link.disconnect();
    assert!(!link.is_connected());
    doc.run_transaction(
        &[OperationDescriptor::insert_text("alice:3", 0, ">")],
        TransactionOptions::default(),
    )
    .unwrap();
    assert!(inbox.try_recv().is_err());
}

#[test]
fn test_state_transfer_through_adapter() -> anyhow::Result<()> {
    let alice = site("alice");
    seed(&alice);

    let (to_bob, _inbox) = batch_channel();
    let mut alice_link = ChannelAdapter::new(to_bob);
    alice_link.connect(Arc::clone(&alice))?;
    let state = alice_link.get_document_state()?;
    assert_eq!(state.next_sid, 6);

    let json = state.to_json()?;
    let bob = site("bob");
    let (to_alice, _alice_inbox) = batch_channel();
    let mut bob_link = ChannelAdapter::new(to_alice);
    bob_link.connect(Arc::clone(&bob))?;
    bob_link.set_document_state(DocumentState::from_json(&json)?)?;

    assert_eq!(*bob.snapshot(), *alice.snapshot());
    // The importing site keeps minting identifiers under its own prefix
    let outcome = bob.run_transaction(
        &[OperationDescriptor::create_node("text", Some("alice:2"), Some("hi"))],
        TransactionOptions::default(),
    )?;
    assert_eq!(outcome.operations[0].node_id, "bob:1");
    Ok(())
}

#[test]
fn test_config_from_json_drives_identifiers() -> anyhow::Result<()> {
    let config = EditorConfig::from_json(r#"{ "siteId": "carol", "maxUndoLevels": 1 }"#)?;
    let doc = Document::new(config)?;
    seed(&doc);
    assert!(doc.read("carol:1").is_some());

    doc.run_transaction(
        &[OperationDescriptor::insert_text("carol:3", 0, "a")],
        TransactionOptions::default(),
    )?;
    assert!(doc.undo()?);
    // Only one level is kept
    assert!(!doc.undo()?);
    Ok(())
}

#[tokio::test]
async fn test_run_inbound_applies_until_closed() -> anyhow::Result<()> {
    let alice = site("alice");
    let bob = site("bob");
    seed(&alice);
    bob.set_document_state(alice.get_document_state())?;

    let (to_bob, bob_inbox) = batch_channel();
    let (to_alice, _alice_inbox) = batch_channel();
    let mut alice_link = ChannelAdapter::new(to_bob);
    let mut bob_link = ChannelAdapter::new(to_alice);
    alice_link.connect(Arc::clone(&alice))?;
    bob_link.connect(Arc::clone(&bob))?;

    for ch in ["a", "b", "c"] {
        alice.run_transaction(
            &[OperationDescriptor::insert_text("alice:5", 0, ch)],
            TransactionOptions::default(),
        )?;
    }
    // Bob cannot apply this one: the node does not exist anywhere
    alice_link.send_operation(&AtomicOperation {
        kind: "insertText".into(),
        node_id: "ghost".into(),
        data: json!({ "nodeId": "ghost", "offset": 0, "text": "?" }),
        timestamp: 0,
        parent_id: None,
        position: Some(0),
    })?;
    drop(alice_link);

    let received = bob_link.run_inbound(bob_inbox).await;
    assert_eq!(received, 3);
    assert_eq!(bob.read("alice:5").unwrap().as_text(), Some("cbaWorld"));
    assert_eq!(*alice.snapshot(), *bob.snapshot());
    Ok(())
}
