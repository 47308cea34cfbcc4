use super::{harness, settle, CLIENT, OPERATOR};
use crate::{ChangeKind, UnreadCache};
use backstage_core::memory::{InMemoryTokenStore, StoreCall};
use backstage_core::{ConversationStatus, ConversationStore, Error, MessageStatus, SenderRole, TokenFamily};
use backstage_delivery::testing::{FakeGateway, FakeRelay};
use backstage_notify::Dispatcher;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn starting_twice_returns_the_same_thread() {
    let h = harness();

    let first = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    let second = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.service.list_conversations(CLIENT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn start_requires_two_participants() {
    let h = harness();
    let err = h.service.start_conversation(OPERATOR, OPERATOR).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn participant_ids_cannot_contain_the_separator() {
    let h = harness();

    // "a:b" + "c" and "a" + "b:c" would both map to "a:b:c"
    let err = h.service.start_conversation("a:b", "c").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = h.service.start_conversation("a", "b:c").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert!(h.service.list_conversations("c").await.unwrap().is_empty());
    assert!(h.service.start_conversation("a", "c").await.is_ok());
}

#[tokio::test]
async fn send_increments_only_the_recipient() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();

    let message = h
        .service
        .send_message(&conversation.id, CLIENT, "Can I bring a plus one?")
        .await
        .unwrap();

    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(message.sender_role, SenderRole::Client);

    let stored = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for(OPERATOR), 1);
    assert_eq!(stored.unread_for(CLIENT), 0);
    assert_eq!(stored.last_message_text.as_deref(), Some("Can I bring a plus one?"));
    assert_eq!(h.cache.get(&conversation.id, OPERATOR).await.unwrap(), 1);

    let published = h.feed.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].kind, ChangeKind::MessageCreated);
    assert_eq!(published[0].message_id.as_deref(), Some(message.id.as_str()));
}

#[tokio::test]
async fn send_to_closed_conversation_is_rejected() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    h.service
        .set_status(&conversation.id, ConversationStatus::Closed)
        .await
        .unwrap();

    let err = h
        .service
        .send_message(&conversation.id, CLIENT, "hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn outsiders_cannot_send() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();

    let err = h
        .service
        .send_message(&conversation.id, "someone-else", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn closing_and_reopening_append_system_messages() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();

    h.service
        .set_status(&conversation.id, ConversationStatus::Closed)
        .await
        .unwrap();
    let reopened = h
        .service
        .set_status(&conversation.id, ConversationStatus::Active)
        .await
        .unwrap();
    assert_eq!(reopened.status, ConversationStatus::Active);

    let messages = h.service.load_messages(&conversation.id).await.unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["Conversation closed", "Conversation reopened"]);
    assert!(messages.iter().all(|m| m.is_system));

    // System messages never count as unread
    let stored = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for(OPERATOR), 0);
    assert_eq!(stored.unread_for(CLIENT), 0);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = harness();
    let err = h.service.load_messages("nobody:nowhere").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn open_clears_unread_and_marks_messages_read() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    let message = h
        .service
        .send_message(&conversation.id, CLIENT, "Running late")
        .await
        .unwrap();

    let cleared = h.service.open(&conversation.id, OPERATOR).await.unwrap();
    assert!(cleared);

    let mut status = MessageStatus::Sent;
    for _ in 0..50 {
        status = h.store.message(&conversation.id, &message.id).unwrap().status;
        if status == MessageStatus::Read && h.store.calls().contains(&StoreCall::ResetUnread(OPERATOR.into())) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, MessageStatus::Read);

    let stored = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for(OPERATOR), 0);
    assert_eq!(h.cache.get(&conversation.id, OPERATOR).await.unwrap(), 0);
}

#[tokio::test]
async fn watchers_receive_changes() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    let mut changes = h.service.watch(&conversation.id).await.unwrap();

    h.service
        .send_message(&conversation.id, OPERATOR, "Your tickets are ready")
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.conversation_id, conversation.id);
    assert_eq!(change.kind, ChangeKind::MessageCreated);
}

#[tokio::test]
async fn new_message_is_pushed_to_the_recipient() {
    let tokens = Arc::new(InMemoryTokenStore::new());
    tokens.add_token(CLIENT, "phone", "fcm-client-phone", TokenFamily::Fcm);
    let gateway = Arc::new(FakeGateway::new());
    let dispatcher = Dispatcher::new(
        tokens.clone(),
        gateway.clone(),
        Arc::new(FakeRelay::new()),
        Duration::from_secs(1),
    );

    let h = harness();
    let service = h.service.clone().with_notifier(dispatcher);
    let conversation = service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    service
        .send_message(&conversation.id, OPERATOR, "Doors open at 7")
        .await
        .unwrap();

    let mut calls = Vec::new();
    for _ in 0..50 {
        calls = gateway.calls();
        if !calls.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tokens, vec!["fcm-client-phone".to_string()]);
    assert_eq!(calls[0].notification.body, "Doors open at 7");
    assert_eq!(
        calls[0].notification.data.get("conversationId"),
        Some(&serde_json::Value::String(conversation.id.clone()))
    );
}

#[tokio::test]
async fn read_receipts_reach_the_senders_watcher() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    let mut sender_view = h.service.watch(&conversation.id).await.unwrap();

    h.service
        .send_message(&conversation.id, CLIENT, "Is the terrace open?")
        .await
        .unwrap();
    h.service.open(&conversation.id, OPERATOR).await.unwrap();

    let mut kinds = Vec::new();
    while !kinds.contains(&ChangeKind::MessagesUpdated) {
        let change = tokio::time::timeout(Duration::from_secs(1), sender_view.recv())
            .await
            .expect("receipt change within a second")
            .unwrap();
        kinds.push(change.kind);
    }
    assert_eq!(kinds[0], ChangeKind::MessageCreated);
}

#[tokio::test]
async fn clearing_unread_is_announced() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    h.service
        .send_message(&conversation.id, CLIENT, "Table for four")
        .await
        .unwrap();

    h.service.open(&conversation.id, OPERATOR).await.unwrap();

    assert!(
        settle(|| h.feed.published().iter().any(|c| c.kind == ChangeKind::UnreadCleared)).await
    );
}

#[tokio::test]
async fn refreshing_a_settled_snapshot_publishes_nothing() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    h.service
        .send_message(&conversation.id, CLIENT, "Thanks!")
        .await
        .unwrap();
    h.service.open(&conversation.id, OPERATOR).await.unwrap();
    assert!(
        settle(|| {
            let kinds: Vec<ChangeKind> = h.feed.published().iter().map(|c| c.kind).collect();
            kinds.contains(&ChangeKind::MessagesUpdated) && kinds.contains(&ChangeKind::UnreadCleared)
        })
        .await
    );
    let published = h.feed.published().len();
    let writes = h.store.calls().len();

    // What a watcher does when it receives its own echo
    h.service.refresh(&conversation.id, OPERATOR).await.unwrap();
    h.service.refresh(&conversation.id, CLIENT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.feed.published().len(), published);
    assert_eq!(h.store.calls().len(), writes);
}

#[tokio::test]
async fn connected_viewer_reads_new_messages_and_keeps_unread_at_zero() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();
    let mut operator_view = h.service.watch(&conversation.id).await.unwrap();
    h.service.refresh(&conversation.id, OPERATOR).await.unwrap();

    let message = h
        .service
        .send_message(&conversation.id, CLIENT, "Can we move to 8pm?")
        .await
        .unwrap();
    let change = tokio::time::timeout(Duration::from_secs(1), operator_view.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.kind, ChangeKind::MessageCreated);

    let snapshot = h.service.refresh(&conversation.id, OPERATOR).await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.conversation.unread_for(OPERATOR), 1);

    assert!(
        settle(|| {
            h.store.message(&conversation.id, &message.id).unwrap().status == MessageStatus::Read
                && h.store.calls().contains(&StoreCall::ResetUnread(OPERATOR.into()))
        })
        .await
    );
    let stored = h.store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_for(OPERATOR), 0);
    assert_eq!(h.cache.get(&conversation.id, OPERATOR).await.unwrap(), 0);
}

#[tokio::test]
async fn refresh_is_for_participants_only() {
    let h = harness();
    let conversation = h.service.start_conversation(OPERATOR, CLIENT).await.unwrap();

    let err = h.service.refresh(&conversation.id, "someone-else").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = h.service.refresh("nobody:nowhere", OPERATOR).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
