use crate::utils::parse_timestamp;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PLACEHOLDER_NAME: &str = "Unknown User";
pub const PLACEHOLDER_AVATAR: &str = "/static/default-avatar.png";

/// A participant as the server may send it: either a bare id or an embedded
/// profile object. Everything downstream of normalization sees `UserRef` only.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserPayload {
    Id(String),
    Embedded {
        #[serde(alias = "_id", alias = "userId")]
        id: String,
        #[serde(default, alias = "displayName", alias = "username", alias = "name")]
        display_name: Option<String>,
        #[serde(default, alias = "avatarUri", alias = "avatar", alias = "profilePicture")]
        avatar_uri: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
    pub avatar_uri: String,
}

impl UserRef {
    /// Reference to a user we only know by id. The placeholders are fixed so
    /// repeated normalization of the same payload gives the same entity.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: PLACEHOLDER_NAME.to_string(),
            avatar_uri: PLACEHOLDER_AVATAR.to_string(),
        }
    }
}

impl From<UserPayload> for UserRef {
    fn from(payload: UserPayload) -> Self {
        match payload {
            UserPayload::Id(id) => UserRef::placeholder(id),
            UserPayload::Embedded {
                id,
                display_name,
                avatar_uri,
            } => UserRef {
                id,
                display_name: display_name.unwrap_or_else(|| PLACEHOLDER_NAME.to_string()),
                avatar_uri: avatar_uri.unwrap_or_else(|| PLACEHOLDER_AVATAR.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<UserRef>,
    pub messages: Vec<Message>,
    pub unread_count: u32,
    pub last_message: Option<Message>,
}

impl Conversation {
    /// The other participant of a 1:1 thread.
    pub fn peer(&self, self_id: &str) -> Option<&UserRef> {
        self.participants.iter().find(|p| p.id != self_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    StoryView,
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub actor: UserRef,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Server-confirmed like state. The count comes back in the response and is
/// authoritative over whatever the client incremented locally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub likes: i64,
}

fn string_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| value.get(k))
        .and_then(|v| v.as_str())
}

/// Normalizes a participant payload of unknown shape. Re-normalizing an
/// already-normalized user is a no-op.
pub fn normalize_user(value: &Value) -> Option<UserRef> {
    match serde_json::from_value::<UserPayload>(value.clone()) {
        Ok(payload) => Some(payload.into()),
        Err(_) => {
            warn!("dropping participant with no usable id: {value}");
            None
        }
    }
}

pub fn normalize_message(value: &Value) -> Option<Message> {
    let Some(id) = string_field(value, &["_id", "id"]) else {
        warn!("dropping message without id");
        return None;
    };

    let conversation_id = string_field(value, &["conversationId", "conversation_id", "conversation"])
        .unwrap_or_default()
        .to_string();

    // `sender` may be an id or an embedded profile, same as participants.
    let sender_id = value
        .get("sender")
        .and_then(normalize_user)
        .map(|u| u.id)
        .or_else(|| string_field(value, &["senderId", "sender_id"]).map(str::to_string))
        .unwrap_or_else(|| {
            warn!("message {id} has no sender");
            String::new()
        });

    let is_deleted = value
        .get("isDeleted")
        .or_else(|| value.get("is_deleted"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let text = if is_deleted {
        String::new()
    } else {
        string_field(value, &["text"]).unwrap_or_default().to_string()
    };

    Some(Message {
        id: id.to_string(),
        conversation_id,
        sender_id,
        text,
        created_at: parse_timestamp(
            value
                .get("createdAt")
                .or_else(|| value.get("created_at"))
                .unwrap_or(&Value::Null),
        ),
        seen: value.get("seen").and_then(|v| v.as_bool()).unwrap_or(false),
        is_deleted,
    })
}

pub fn normalize_conversation(value: &Value) -> Option<Conversation> {
    let Some(id) = string_field(value, &["_id", "id"]) else {
        warn!("dropping conversation without id");
        return None;
    };

    let participants = value
        .get("participants")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(normalize_user).collect::<Vec<_>>())
        .unwrap_or_default();
    if participants.is_empty() {
        warn!("conversation {id} arrived without participants");
    }

    let messages = value
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(normalize_message).collect::<Vec<_>>())
        .unwrap_or_default();

    let last_message = value
        .get("lastMessage")
        .or_else(|| value.get("last_message"))
        .and_then(normalize_message);

    let unread_count = value
        .get("unreadCount")
        .or_else(|| value.get("unread_count"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    Some(Conversation {
        id: id.to_string(),
        participants,
        messages,
        unread_count,
        last_message,
    })
}

pub fn normalize_notification(value: &Value) -> Option<Notification> {
    let Some(id) = string_field(value, &["_id", "id"]) else {
        warn!("dropping notification without id");
        return None;
    };

    let kind = value
        .get("type")
        .or_else(|| value.get("kind"))
        .cloned()
        .and_then(|v| serde_json::from_value::<NotificationKind>(v).ok());
    let Some(kind) = kind else {
        warn!("dropping notification {id} with unknown type");
        return None;
    };

    let actor = value
        .get("actor")
        .or_else(|| value.get("sender"))
        .and_then(normalize_user);
    let Some(actor) = actor else {
        warn!("dropping notification {id} without actor");
        return None;
    };

    Some(Notification {
        id: id.to_string(),
        kind,
        actor,
        is_read: value
            .get("isRead")
            .or_else(|| value.get("is_read"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        created_at: parse_timestamp(
            value
                .get("createdAt")
                .or_else(|| value.get("created_at"))
                .unwrap_or(&Value::Null),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_from_bare_id_gets_placeholders() {
        let user = normalize_user(&json!("u1")).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.display_name, PLACEHOLDER_NAME);
        assert_eq!(user.avatar_uri, PLACEHOLDER_AVATAR);
    }

    #[test]
    fn user_from_embedded_object() {
        let user = normalize_user(&json!({
            "_id": "u2", "username": "ada", "avatar": "/a.png", "bio": "ignored"
        }))
        .unwrap();
        assert_eq!(user.display_name, "ada");
        assert_eq!(user.avatar_uri, "/a.png");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_user(&json!({"_id": "u3", "name": "bo"})).unwrap();
        let twice = normalize_user(&serde_json::to_value(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn user_without_id_is_dropped() {
        assert!(normalize_user(&json!({"username": "ghost"})).is_none());
        assert!(normalize_user(&json!(42)).is_none());
    }

    #[test]
    fn message_sender_may_be_object_or_id() {
        let by_object = normalize_message(&json!({
            "_id": "m1", "conversationId": "c1",
            "sender": {"_id": "u1", "username": "ada"},
            "text": "hi", "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(by_object.sender_id, "u1");

        let by_id = normalize_message(&json!({
            "_id": "m2", "conversationId": "c1", "sender": "u1", "text": "yo"
        }))
        .unwrap();
        assert_eq!(by_id.sender_id, "u1");
    }

    #[test]
    fn deleted_message_has_empty_text() {
        let msg = normalize_message(&json!({
            "_id": "m3", "conversationId": "c1", "sender": "u1",
            "text": "should vanish", "isDeleted": true
        }))
        .unwrap();
        assert!(msg.is_deleted);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn conversation_summary_without_messages() {
        let conv = normalize_conversation(&json!({
            "_id": "c1",
            "participants": ["u1", {"_id": "u2", "username": "bo"}],
            "lastMessage": {"_id": "m9", "sender": "u2", "text": "later"},
            "unreadCount": 3
        }))
        .unwrap();
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.messages.is_empty());
        assert_eq!(conv.unread_count, 3);
        assert_eq!(conv.last_message.as_ref().unwrap().id, "m9");
        assert_eq!(conv.peer("u1").unwrap().id, "u2");
    }

    #[test]
    fn notification_kinds_decode() {
        let n = normalize_notification(&json!({
            "_id": "n1", "type": "story_view", "actor": "u5",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::StoryView);
        assert!(!n.is_read);
        assert!(normalize_notification(&json!({"_id": "n2", "type": "poke", "actor": "u5"})).is_none());
    }
}
