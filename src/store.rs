use crate::api::models::{Conversation, Message, Notification, UserRef};
use log::{debug, warn};
use std::collections::HashMap;

/// In-memory conversation store: the single source of truth the messaging UI
/// renders from. Only the sync engine and the mutation layer write to it.
///
/// Operations never fail. Payloads that lost required fields on the way here
/// are logged and ignored; a partial payload must not take messaging down.
#[derive(Default)]
pub struct ChatStore {
    conversations: HashMap<String, Conversation>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Conversations for list display, most recently active first.
    pub fn all(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            let a_at = a.last_message.as_ref().map(|m| m.created_at);
            let b_at = b.last_message.as_ref().map(|m| m.created_at);
            b_at.cmp(&a_at).then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Insert or merge by id. A merge keeps the loaded message history unless
    /// the incoming conversation explicitly carries a non-empty one, so a
    /// summary refresh never clobbers messages already on screen.
    pub fn upsert_conversation(&mut self, incoming: Conversation) {
        if incoming.id.is_empty() {
            warn!("ignoring conversation without id");
            return;
        }
        match self.conversations.get_mut(&incoming.id) {
            Some(existing) => {
                if !incoming.participants.is_empty() {
                    existing.participants = incoming.participants;
                }
                if !incoming.messages.is_empty() {
                    existing.messages = sorted_dedup(incoming.messages);
                }
                if incoming.last_message.is_some() {
                    existing.last_message = incoming.last_message;
                }
                existing.unread_count = incoming.unread_count;
                refresh_last(existing);
            }
            None => {
                let mut conv = incoming;
                conv.messages = sorted_dedup(std::mem::take(&mut conv.messages));
                refresh_last(&mut conv);
                self.conversations.insert(conv.id.clone(), conv);
            }
        }
    }

    /// Inserts a message at its sorted `(created_at, id)` position, deduplicated
    /// by id. Returns false when the id was already present (or the payload is
    /// unusable), so callers can treat redelivery as a no-op.
    pub fn append_message(
        &mut self,
        conversation_id: &str,
        message: Message,
        bump_unread: bool,
    ) -> bool {
        if message.id.is_empty() {
            warn!("ignoring message without id in {conversation_id}");
            return false;
        }
        let conv = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                // First sign of life for this thread (e.g. a push from a brand
                // new peer): hold the message in a skeleton until the next
                // summary fetch fills in the participants.
                debug!("creating skeleton conversation {conversation_id}");
                Conversation {
                    id: conversation_id.to_string(),
                    participants: vec![UserRef::placeholder(message.sender_id.clone())],
                    messages: Vec::new(),
                    unread_count: 0,
                    last_message: None,
                }
            });

        if conv.messages.iter().any(|m| m.id == message.id) {
            debug!("duplicate message {} dropped", message.id);
            return false;
        }
        let pos = conv.messages.partition_point(|m| {
            (m.created_at, m.id.as_str()) <= (message.created_at, message.id.as_str())
        });
        conv.messages.insert(pos, message);
        if bump_unread {
            conv.unread_count += 1;
        }
        refresh_last(conv);
        true
    }

    /// Swaps a provisional client-side message for the server-confirmed one,
    /// keeping its list position. If the confirmed id already arrived over the
    /// socket, the provisional entry is dropped instead of duplicated.
    pub fn replace_temporary(&mut self, conversation_id: &str, temp_id: &str, server: Message) {
        let Some(conv) = self.conversations.get_mut(conversation_id) else {
            warn!("replace_temporary on unknown conversation {conversation_id}");
            return;
        };
        match conv.messages.iter().position(|m| m.id == temp_id) {
            Some(pos) => {
                if conv.messages.iter().any(|m| m.id == server.id) {
                    conv.messages.remove(pos);
                } else {
                    conv.messages[pos] = server;
                }
                refresh_last(conv);
            }
            // Provisional entry is gone (cleared by a history reload); fall
            // back to a plain insert.
            None => {
                self.append_message(conversation_id, server, false);
            }
        }
    }

    /// Zeroes the unread counter and marks everything the peer sent as seen.
    pub fn mark_read(&mut self, conversation_id: &str, self_id: &str) {
        if let Some(conv) = self.conversations.get_mut(conversation_id) {
            conv.unread_count = 0;
            for msg in conv.messages.iter_mut().filter(|m| m.sender_id != self_id) {
                msg.seen = true;
            }
            refresh_last(conv);
        }
    }

    /// Peer-side read receipt: the peer has seen everything in the thread.
    pub fn apply_read_receipt(&mut self, conversation_id: &str) {
        if let Some(conv) = self.conversations.get_mut(conversation_id) {
            conv.unread_count = 0;
            for msg in conv.messages.iter_mut() {
                msg.seen = true;
            }
            refresh_last(conv);
        }
    }

    /// Backward pagination: splices an older page (already ascending) in front
    /// of the loaded history. Ids already present are silently dropped.
    pub fn prepend_history(&mut self, conversation_id: &str, older: Vec<Message>) {
        let Some(conv) = self.conversations.get_mut(conversation_id) else {
            warn!("prepend_history on unknown conversation {conversation_id}");
            return;
        };
        let mut merged: Vec<Message> = older
            .into_iter()
            .filter(|m| !m.id.is_empty() && !conv.messages.iter().any(|e| e.id == m.id))
            .collect();
        merged.append(&mut conv.messages);
        conv.messages = merged;
        refresh_last(conv);
    }

    /// Replaces the loaded history with a freshly fetched page.
    pub fn load_history(&mut self, conversation_id: &str, messages: Vec<Message>) {
        let Some(conv) = self.conversations.get_mut(conversation_id) else {
            warn!("load_history on unknown conversation {conversation_id}");
            return;
        };
        conv.messages = sorted_dedup(messages);
        refresh_last(conv);
    }

    /// Soft delete wherever the message currently lives: the id survives for
    /// layout stability, the text does not. Idempotent.
    pub fn soft_delete(&mut self, message_id: &str) -> bool {
        let mut found = false;
        for conv in self.conversations.values_mut() {
            for msg in conv.messages.iter_mut().filter(|m| m.id == message_id) {
                msg.is_deleted = true;
                msg.text.clear();
                found = true;
            }
            if let Some(last) = conv.last_message.as_mut() {
                if last.id == message_id {
                    last.is_deleted = true;
                    last.text.clear();
                }
            }
        }
        found
    }

    /// Drops a provisional message whose send failed.
    pub fn remove_message(&mut self, conversation_id: &str, message_id: &str) {
        if let Some(conv) = self.conversations.get_mut(conversation_id) {
            conv.messages.retain(|m| m.id != message_id);
            conv.last_message = conv.messages.last().cloned();
        }
    }

    pub fn set_unread(&mut self, conversation_id: &str, count: u32) {
        if let Some(conv) = self.conversations.get_mut(conversation_id) {
            conv.unread_count = count;
        }
    }
}

fn refresh_last(conv: &mut Conversation) {
    if let Some(last) = conv.messages.last() {
        conv.last_message = Some(last.clone());
    }
}

fn sorted_dedup(mut messages: Vec<Message>) -> Vec<Message> {
    messages.retain(|m| !m.id.is_empty());
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut seen = std::collections::HashSet::new();
    messages.retain(|m| seen.insert(m.id.clone()));
    messages
}

/// Notification list with one-way read transitions.
#[derive(Default)]
pub struct NotificationFeed {
    items: Vec<Notification>,
}

impl NotificationFeed {
    pub fn set_all(&mut self, mut items: Vec<Notification>) {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items = items;
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    /// Read state only moves false to true; re-reading is a no-op.
    pub fn mark_read(&mut self, notification_id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == notification_id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        }
    }
}
