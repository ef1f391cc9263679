use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use wavery_client::{
    Conversation, EngineAction, Message, OutboundEvent, ServerEvent, SyncEngine, UserRef,
    PAGE_SIZE,
};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + Duration::seconds(secs)
}

fn msg(id: &str, conv: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conv.to_string(),
        sender_id: sender.to_string(),
        text: format!("message {id}"),
        created_at: at(secs),
        seen: false,
        is_deleted: false,
    }
}

fn conv(id: &str, peer: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        participants: vec![UserRef::placeholder("me"), UserRef::placeholder(peer)],
        messages: Vec::new(),
        unread_count: 0,
        last_message: None,
    }
}

fn push(conv: &str, message: Message) -> ServerEvent {
    ServerEvent::Message {
        conversation_id: conv.to_string(),
        message,
    }
}

fn engine_with(convs: Vec<Conversation>) -> SyncEngine {
    let mut engine = SyncEngine::new("me");
    engine.set_conversations(convs, HashMap::new());
    engine
}

fn ids(engine: &SyncEngine, conv: &str) -> Vec<String> {
    engine
        .store()
        .get(conv)
        .map(|c| c.messages.iter().map(|m| m.id.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn push_during_history_fetch_is_buffered_then_replayed_in_order() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");

    // m0 has the earliest timestamp but arrives first, while the fetch is
    // still in flight.
    let actions = engine.handle_event(push("c1", msg("m0", "c1", "peer", 0)));
    assert!(actions.is_empty());
    assert!(ids(&engine, "c1").is_empty());

    let actions = engine.complete_focus(
        "c1",
        token,
        vec![msg("m1", "c1", "peer", 10), msg("m2", "c1", "peer", 20)],
    );
    assert_eq!(ids(&engine, "c1"), vec!["m0", "m1", "m2"]);
    assert!(actions.contains(&EngineAction::AckRead {
        conversation_id: "c1".to_string()
    }));
}

#[test]
fn buffered_duplicate_of_fetched_message_is_dropped() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.handle_event(push("c1", msg("m1", "c1", "peer", 10)));
    engine.complete_focus("c1", token, vec![msg("m1", "c1", "peer", 10)]);
    assert_eq!(ids(&engine, "c1"), vec!["m1"]);
}

#[test]
fn superseded_fetch_is_discarded() {
    let mut engine = engine_with(vec![conv("c1", "peer"), conv("c2", "other")]);
    let stale = engine.begin_focus("c1");
    let fresh = engine.begin_focus("c2");

    // c1's page resolves after the user opened c2: it must not land.
    let actions = engine.complete_focus("c1", stale, vec![msg("m1", "c1", "peer", 10)]);
    assert!(actions.is_empty());
    assert!(ids(&engine, "c1").is_empty());

    engine.complete_focus("c2", fresh, vec![msg("m9", "c2", "other", 10)]);
    assert_eq!(ids(&engine, "c2"), vec!["m9"]);
    assert_eq!(engine.focused(), Some("c2"));
}

#[test]
fn focused_conversation_reads_immediately_and_never_counts_unread() {
    let mut engine = engine_with(vec![conv("c1", "peer"), conv("c2", "other")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());

    let actions = engine.handle_event(push("c1", msg("m1", "c1", "peer", 10)));
    let c1 = engine.store().get("c1").unwrap();
    assert_eq!(c1.unread_count, 0);
    assert!(c1.messages[0].seen);
    assert_eq!(
        actions,
        vec![EngineAction::AckRead {
            conversation_id: "c1".to_string()
        }]
    );

    // A message for a background conversation only bumps its counter.
    let actions = engine.handle_event(push("c2", msg("m2", "c2", "other", 10)));
    assert!(actions.is_empty());
    assert_eq!(engine.store().get("c2").unwrap().unread_count, 1);
}

#[test]
fn own_echo_does_not_ack_or_count() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());
    let actions = engine.handle_event(push("c1", msg("m1", "c1", "me", 10)));
    assert!(actions.is_empty());
    assert_eq!(engine.store().get("c1").unwrap().unread_count, 0);
}

#[test]
fn duplicate_push_is_a_silent_noop() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    engine.handle_event(push("c1", msg("m1", "c1", "peer", 10)));
    engine.handle_event(push("c1", msg("m1", "c1", "peer", 10)));
    assert_eq!(ids(&engine, "c1"), vec!["m1"]);
    assert_eq!(engine.store().get("c1").unwrap().unread_count, 1);
}

#[test]
fn out_of_order_push_is_sorted_into_place() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    engine.handle_event(push("c1", msg("m2", "c1", "peer", 20)));
    engine.handle_event(push("c1", msg("m1", "c1", "peer", 10)));
    assert_eq!(ids(&engine, "c1"), vec!["m1", "m2"]);
}

#[test]
fn presence_set_is_idempotent() {
    let mut engine = engine_with(Vec::new());
    engine.handle_event(ServerEvent::UserOnline {
        user_id: "u1".to_string(),
    });
    engine.handle_event(ServerEvent::UserOnline {
        user_id: "u1".to_string(),
    });
    assert!(engine.is_online("u1"));
    engine.handle_event(ServerEvent::UserOffline {
        user_id: "u1".to_string(),
    });
    engine.handle_event(ServerEvent::UserOffline {
        user_id: "nobody".to_string(),
    });
    assert!(!engine.is_online("u1"));
}

#[test]
fn typing_indicator_tracks_focused_peer_only() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());

    // Typing in some other conversation is not shown.
    engine.handle_event(ServerEvent::TypingStart {
        conversation_id: "c9".to_string(),
        from_user_id: "other".to_string(),
    });
    assert!(engine.typing_in("c1").is_none());

    // Our own typing echo is not shown either.
    engine.handle_event(ServerEvent::TypingStart {
        conversation_id: "c1".to_string(),
        from_user_id: "me".to_string(),
    });
    assert!(engine.typing_in("c1").is_none());

    engine.handle_event(ServerEvent::TypingStart {
        conversation_id: "c1".to_string(),
        from_user_id: "peer".to_string(),
    });
    assert_eq!(engine.typing_in("c1"), Some("peer"));

    engine.handle_event(ServerEvent::TypingStop {
        conversation_id: "c1".to_string(),
    });
    assert!(engine.typing_in("c1").is_none());
}

#[test]
fn deletion_applies_in_place_wherever_the_message_is() {
    let mut engine = engine_with(vec![conv("c1", "peer"), conv("c2", "other")]);
    engine.handle_event(push("c2", msg("m1", "c2", "other", 10)));
    engine.handle_event(ServerEvent::MessageDeleted {
        message_id: "m1".to_string(),
    });
    engine.handle_event(ServerEvent::MessageDeleted {
        message_id: "m1".to_string(),
    });
    let c2 = engine.store().get("c2").unwrap();
    assert_eq!(c2.messages.len(), 1);
    assert!(c2.messages[0].is_deleted);
    assert!(c2.messages[0].text.is_empty());
}

#[test]
fn read_receipt_marks_the_whole_thread_seen() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    engine.handle_event(push("c1", msg("m1", "c1", "me", 10)));
    engine.handle_event(ServerEvent::MessageRead {
        conversation_id: "c1".to_string(),
    });
    assert!(engine.store().get("c1").unwrap().messages[0].seen);
}

#[test]
fn keystrokes_supersede_scheduled_stops() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());

    let (start, first) = engine.keystroke().unwrap();
    assert!(matches!(start, OutboundEvent::TypingStart { .. }));
    let (_, second) = engine.keystroke().unwrap();

    // The first timer fires after being superseded: nothing to emit.
    assert!(engine.typing_elapsed(first).is_none());
    // The latest timer emits exactly one stop, and only once.
    let stop = engine.typing_elapsed(second).unwrap();
    assert_eq!(
        stop,
        OutboundEvent::TypingStop {
            conversation_id: "c1".to_string(),
            to_user_id: "peer".to_string(),
        }
    );
    assert!(engine.typing_elapsed(second).is_none());
}

#[test]
fn send_is_provisional_until_confirmed() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());

    let pending = engine.begin_send("  hello  ").unwrap();
    assert_eq!(pending.receiver_id, "peer");
    assert_eq!(pending.text, "hello");
    assert_eq!(ids(&engine, "c1"), vec![pending.temp_id.clone()]);

    let actions = engine.complete_send(&pending, msg("m1", "c1", "me", 10));
    assert_eq!(ids(&engine, "c1"), vec!["m1"]);
    assert!(actions.iter().any(|a| matches!(
        a,
        EngineAction::Emit(OutboundEvent::TypingStop { .. })
    )));
}

#[test]
fn failed_send_removes_the_provisional_message() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, Vec::new());

    let pending = engine.begin_send("hello").unwrap();
    engine.fail_send(&pending);
    assert!(ids(&engine, "c1").is_empty());

    assert!(engine.begin_send("   ").is_none());
}

#[test]
fn pagination_cursor_follows_page_size() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    let token = engine.begin_focus("c1");
    let full_page: Vec<Message> = (0..PAGE_SIZE)
        .map(|i| msg(&format!("m{i:02}"), "c1", "peer", 100 + i as i64))
        .collect();
    engine.complete_focus("c1", token, full_page);

    let (conversation_id, page) = engine.begin_load_older().unwrap();
    assert_eq!((conversation_id.as_str(), page), ("c1", 2));
    // No second pagination while one is running.
    assert!(engine.begin_load_older().is_none());

    engine.complete_load_older("c1", 2, vec![msg("m-old", "c1", "peer", 1)]);
    assert_eq!(engine.store().get("c1").unwrap().messages.len(), PAGE_SIZE + 1);
    // Short page means history is exhausted.
    assert!(engine.begin_load_older().is_none());
}

#[test]
fn reconnect_refetches_focused_conversation_and_summaries() {
    let mut engine = engine_with(vec![conv("c1", "peer")]);
    assert!(engine.handle_event(ServerEvent::Connected).is_empty());

    let token = engine.begin_focus("c1");
    engine.complete_focus("c1", token, vec![msg("m1", "c1", "peer", 10)]);

    engine.handle_event(ServerEvent::Disconnected);
    let actions = engine.handle_event(ServerEvent::Connected);
    assert!(actions.contains(&EngineAction::RefreshSummaries));
    let refetch_token = actions.iter().find_map(|a| match a {
        EngineAction::RefetchFocused {
            conversation_id,
            token,
        } if conversation_id == "c1" => Some(*token),
        _ => None,
    });
    let refetch_token = refetch_token.expect("reconnect should refetch the focused conversation");

    // A push racing the refetch is buffered, then replayed without dupes.
    engine.handle_event(push("c1", msg("m3", "c1", "peer", 30)));
    engine.complete_focus(
        "c1",
        refetch_token,
        vec![msg("m1", "c1", "peer", 10), msg("m2", "c1", "peer", 20)],
    );
    assert_eq!(ids(&engine, "c1"), vec!["m1", "m2", "m3"]);
}

#[test]
fn bootstrap_merges_unread_counts_into_summaries() {
    let mut engine = SyncEngine::new("me");
    let unread = HashMap::from([("c1".to_string(), 4u32)]);
    engine.set_conversations(vec![conv("c1", "peer"), conv("c2", "other")], unread);
    assert_eq!(engine.store().get("c1").unwrap().unread_count, 4);
    assert_eq!(engine.store().get("c2").unwrap().unread_count, 0);
}

#[test]
fn search_matches_peer_names_case_insensitively() {
    let mut engine = SyncEngine::new("me");
    let mut c1 = conv("c1", "u-ada");
    c1.participants[1].display_name = "Ada Lovelace".to_string();
    let mut c2 = conv("c2", "u-bob");
    c2.participants[1].display_name = "Bob".to_string();
    engine.set_conversations(vec![c1, c2], HashMap::new());

    let hits: Vec<&str> = engine.search("ada").iter().map(|c| c.id.as_str()).collect();
    assert_eq!(hits, vec!["c1"]);
    assert_eq!(engine.search("").len(), 2);
}
