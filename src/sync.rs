use crate::api::events::{OutboundEvent, ServerEvent};
use crate::api::models::{Conversation, Message};
use crate::store::ChatStore;
use chrono::Utc;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Messages per history page; the server pages newest-first and the client
/// walks backwards by incrementing the page number.
pub const PAGE_SIZE: usize = 20;

/// Quiet interval after the last keystroke before a typing_stop is emitted.
pub const TYPING_QUIET_MS: u64 = 1_000;

/// IO the engine wants performed. The engine is a synchronous state machine;
/// the client shell executes these against the REST adapter and the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Acknowledge the focused conversation as read server-side.
    AckRead { conversation_id: String },
    /// Send an event to the peer over the socket.
    Emit(OutboundEvent),
    /// Reconnect reconciliation: refetch the focused conversation's newest
    /// page under the given fetch token.
    RefetchFocused { conversation_id: String, token: u64 },
    /// Reconnect reconciliation: refetch conversation summaries and unread
    /// counts for the whole list.
    RefreshSummaries,
}

/// An optimistic send in flight: the provisional message is already in the
/// store under `temp_id` until the server confirms.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub temp_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
struct PageCursor {
    page: u32,
    has_more: bool,
}

/// Reconciles the three input streams - paginated REST fetches, socket push
/// events, and locally originated sends - into one consistent [`ChatStore`].
///
/// Push events for a conversation whose history fetch is still in flight are
/// buffered and replayed after the fetch lands, so nothing is lost or applied
/// twice. A fetch that resolves after the user moved on is discarded by token.
pub struct SyncEngine {
    self_id: String,
    store: ChatStore,
    focused: Option<String>,
    /// conversation id -> token of the history fetch currently in flight.
    loading: HashMap<String, u64>,
    /// Push messages buffered while their conversation is loading.
    buffered: HashMap<String, Vec<Message>>,
    cursors: HashMap<String, PageCursor>,
    paging: bool,
    online: HashSet<String>,
    /// (conversation id, user id) of the peer currently typing, if any.
    typing_peer: Option<(String, String)>,
    /// Local typing debounce generation; bumped on every keystroke so stale
    /// stop timers cancel themselves.
    typing_gen: u64,
    next_token: u64,
    ever_connected: bool,
}

impl SyncEngine {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            store: ChatStore::new(),
            focused: None,
            loading: HashMap::new(),
            buffered: HashMap::new(),
            cursors: HashMap::new(),
            paging: false,
            online: HashSet::new(),
            typing_peer: None,
            typing_gen: 0,
            next_token: 0,
            ever_connected: false,
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    /// The peer typing in the given conversation, if any.
    pub fn typing_in(&self, conversation_id: &str) -> Option<&str> {
        self.typing_peer
            .as_ref()
            .filter(|(conv, _)| conv == conversation_id)
            .map(|(_, user)| user.as_str())
    }

    /// Conversation list filtered by peer display name, case-insensitive.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.to_lowercase();
        self.store
            .all()
            .into_iter()
            .filter(|c| {
                c.peer(&self.self_id)
                    .map(|p| p.display_name.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn conversation_with_peer(&self, peer_id: &str) -> Option<String> {
        self.store
            .all()
            .into_iter()
            .find(|c| c.participants.iter().any(|p| p.id == peer_id))
            .map(|c| c.id.clone())
    }

    /// Merges the conversation summaries with the unread-count map fetched
    /// alongside them.
    pub fn set_conversations(
        &mut self,
        conversations: Vec<Conversation>,
        unread: HashMap<String, u32>,
    ) {
        for mut conv in conversations {
            if let Some(count) = unread.get(&conv.id) {
                conv.unread_count = *count;
            }
            self.store.upsert_conversation(conv);
        }
    }

    fn alloc_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Opens a conversation: it becomes the focused one and its history fetch
    /// is marked in flight, so pushes arriving meanwhile get buffered. The
    /// returned token must be handed back to [`complete_focus`].
    pub fn begin_focus(&mut self, conversation_id: &str) -> u64 {
        if self.focused.as_deref() != Some(conversation_id) {
            self.typing_peer = None;
            // A keystroke timer from the previous conversation must not fire.
            self.typing_gen += 1;
        }
        self.focused = Some(conversation_id.to_string());
        self.paging = false;
        let token = self.alloc_token();
        self.loading.insert(conversation_id.to_string(), token);
        self.buffered.entry(conversation_id.to_string()).or_default();
        token
    }

    /// Applies a resolved history fetch, then replays any pushes buffered
    /// while it was in flight. A fetch whose token no longer matches (the
    /// user has moved on, or a newer fetch superseded it) is discarded.
    pub fn complete_focus(
        &mut self,
        conversation_id: &str,
        token: u64,
        messages: Vec<Message>,
    ) -> Vec<EngineAction> {
        if self.loading.get(conversation_id) != Some(&token) {
            info!("discarding superseded history fetch for {conversation_id}");
            return Vec::new();
        }
        self.loading.remove(conversation_id);

        if self.focused.as_deref() != Some(conversation_id) {
            info!("history for {conversation_id} resolved after focus moved; discarding");
            return self.replay_buffer(conversation_id);
        }

        self.cursors.insert(
            conversation_id.to_string(),
            PageCursor {
                page: 1,
                has_more: messages.len() == PAGE_SIZE,
            },
        );
        self.store.load_history(conversation_id, messages);
        self.replay_buffer(conversation_id);
        self.store.mark_read(conversation_id, &self.self_id);
        vec![EngineAction::AckRead {
            conversation_id: conversation_id.to_string(),
        }]
    }

    /// A failed history fetch: surface nothing into the store, but release
    /// the buffer so live pushes still display.
    pub fn fail_focus(&mut self, conversation_id: &str, token: u64) -> Vec<EngineAction> {
        if self.loading.get(conversation_id) == Some(&token) {
            self.loading.remove(conversation_id);
            return self.replay_buffer(conversation_id);
        }
        Vec::new()
    }

    fn replay_buffer(&mut self, conversation_id: &str) -> Vec<EngineAction> {
        let Some(buffer) = self.buffered.remove(conversation_id) else {
            return Vec::new();
        };
        let mut actions = Vec::new();
        for message in buffer {
            actions.extend(self.apply_push(conversation_id.to_string(), message));
        }
        actions.dedup();
        actions
    }

    /// Requests the next older history page for the focused conversation.
    pub fn begin_load_older(&mut self) -> Option<(String, u32)> {
        let conversation_id = self.focused.clone()?;
        if self.paging || self.loading.contains_key(&conversation_id) {
            return None;
        }
        let cursor = self.cursors.get(&conversation_id)?;
        if !cursor.has_more {
            return None;
        }
        self.paging = true;
        Some((conversation_id, cursor.page + 1))
    }

    pub fn complete_load_older(
        &mut self,
        conversation_id: &str,
        page: u32,
        messages: Vec<Message>,
    ) {
        self.paging = false;
        if self.focused.as_deref() != Some(conversation_id) {
            info!("older page for {conversation_id} resolved after focus moved; discarding");
            return;
        }
        let has_more = messages.len() == PAGE_SIZE;
        self.store.prepend_history(conversation_id, messages);
        self.cursors
            .insert(conversation_id.to_string(), PageCursor { page, has_more });
    }

    pub fn fail_load_older(&mut self) {
        self.paging = false;
    }

    /// A keystroke in the focused conversation's input. Emits typing_start and
    /// returns the debounce generation the caller should schedule a
    /// [`typing_elapsed`] call for, one quiet interval out.
    pub fn keystroke(&mut self) -> Option<(OutboundEvent, u64)> {
        let conversation_id = self.focused.clone()?;
        let peer = self.store.get(&conversation_id)?.peer(&self.self_id)?;
        let to_user_id = peer.id.clone();
        self.typing_gen += 1;
        Some((
            OutboundEvent::TypingStart {
                conversation_id,
                to_user_id,
            },
            self.typing_gen,
        ))
    }

    /// The quiet interval elapsed for the given generation. Returns the
    /// typing_stop to emit, or None when a newer keystroke superseded it.
    pub fn typing_elapsed(&mut self, generation: u64) -> Option<OutboundEvent> {
        if generation != self.typing_gen {
            return None;
        }
        // Consume the generation so a duplicate timer cannot fire twice.
        self.typing_gen += 1;
        let conversation_id = self.focused.clone()?;
        let peer = self.store.get(&conversation_id)?.peer(&self.self_id)?;
        Some(OutboundEvent::TypingStop {
            conversation_id,
            to_user_id: peer.id.clone(),
        })
    }

    /// Starts an optimistic send in the focused conversation: a provisional
    /// message goes into the store immediately and is reconciled by
    /// [`complete_send`] / [`fail_send`].
    pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let conversation_id = self.focused.clone()?;
        let receiver_id = self
            .store
            .get(&conversation_id)?
            .peer(&self.self_id)?
            .id
            .clone();

        let temp_id = format!("tmp-{}", Uuid::new_v4());
        let provisional = Message {
            id: temp_id.clone(),
            conversation_id: conversation_id.clone(),
            sender_id: self.self_id.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
            seen: false,
            is_deleted: false,
        };
        self.store
            .append_message(&conversation_id, provisional, false);
        // The send supersedes any scheduled typing_stop.
        self.typing_gen += 1;
        Some(PendingSend {
            temp_id,
            receiver_id,
            conversation_id,
            text: text.to_string(),
        })
    }

    pub fn complete_send(&mut self, pending: &PendingSend, server: Message) -> Vec<EngineAction> {
        self.store
            .replace_temporary(&pending.conversation_id, &pending.temp_id, server);
        vec![EngineAction::Emit(OutboundEvent::TypingStop {
            conversation_id: pending.conversation_id.clone(),
            to_user_id: pending.receiver_id.clone(),
        })]
    }

    pub fn fail_send(&mut self, pending: &PendingSend) {
        self.store
            .remove_message(&pending.conversation_id, &pending.temp_id);
    }

    /// Applies a server-confirmed unsend to the local store.
    pub fn delete_message_local(&mut self, message_id: &str) {
        self.store.soft_delete(message_id);
    }

    fn apply_push(&mut self, conversation_id: String, message: Message) -> Vec<EngineAction> {
        let from_peer = message.sender_id != self.self_id;
        let is_focused = self.focused.as_deref() == Some(conversation_id.as_str());
        let inserted =
            self.store
                .append_message(&conversation_id, message, from_peer && !is_focused);
        if inserted && is_focused && from_peer {
            // Reading happens implicitly while the thread is on screen.
            self.store.mark_read(&conversation_id, &self.self_id);
            return vec![EngineAction::AckRead { conversation_id }];
        }
        Vec::new()
    }

    /// Feeds one socket event through the reconciliation rules.
    pub fn handle_event(&mut self, event: ServerEvent) -> Vec<EngineAction> {
        match event {
            ServerEvent::Message {
                conversation_id,
                message,
            } => {
                if self.loading.contains_key(&conversation_id) {
                    debug!("buffering push for loading conversation {conversation_id}");
                    self.buffered
                        .entry(conversation_id)
                        .or_default()
                        .push(message);
                    return Vec::new();
                }
                self.apply_push(conversation_id, message)
            }
            ServerEvent::MessageRead { conversation_id } => {
                self.store.apply_read_receipt(&conversation_id);
                Vec::new()
            }
            ServerEvent::MessageDeleted { message_id } => {
                self.store.soft_delete(&message_id);
                Vec::new()
            }
            ServerEvent::TypingStart {
                conversation_id,
                from_user_id,
            } => {
                if self.focused.as_deref() == Some(conversation_id.as_str())
                    && from_user_id != self.self_id
                {
                    self.typing_peer = Some((conversation_id, from_user_id));
                }
                Vec::new()
            }
            ServerEvent::TypingStop { .. } => {
                self.typing_peer = None;
                Vec::new()
            }
            ServerEvent::UserOnline { user_id } => {
                self.online.insert(user_id);
                Vec::new()
            }
            ServerEvent::UserOffline { user_id } => {
                self.online.remove(&user_id);
                Vec::new()
            }
            ServerEvent::Connected => {
                if !self.ever_connected {
                    self.ever_connected = true;
                    return Vec::new();
                }
                // The socket does not replay missed events; reconcile by
                // refetching what the UI shows.
                info!("socket reconnected; refetching visible state");
                let mut actions = vec![EngineAction::RefreshSummaries];
                if let Some(conversation_id) = self.focused.clone() {
                    let token = self.alloc_token();
                    self.loading.insert(conversation_id.clone(), token);
                    self.buffered.entry(conversation_id.clone()).or_default();
                    actions.push(EngineAction::RefetchFocused {
                        conversation_id,
                        token,
                    });
                }
                actions
            }
            ServerEvent::Disconnected => {
                info!("socket disconnected");
                Vec::new()
            }
        }
    }
}
