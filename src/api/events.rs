use crate::api::models::{normalize_message, Message};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Raw socket frame: `{"event": "...", "data": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Push events consumed from the socket channel, plus connection lifecycle
/// markers emitted by the connection task itself.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Message {
        conversation_id: String,
        message: Message,
    },
    MessageRead {
        conversation_id: String,
    },
    MessageDeleted {
        message_id: String,
    },
    TypingStart {
        conversation_id: String,
        from_user_id: String,
    },
    TypingStop {
        conversation_id: String,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
    },
    Connected,
    Disconnected,
}

fn data_string(data: &Value, keys: &[&str]) -> Option<String> {
    // Presence events carry a bare id; the rest wrap fields in an object.
    if let Some(s) = data.as_str() {
        return Some(s.to_string());
    }
    keys.iter()
        .find_map(|k| data.get(k))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl ServerEvent {
    /// Decodes a frame into a typed event. Unknown or malformed frames are
    /// logged and discarded; a bad frame must never take the channel down.
    pub fn decode(frame: &Frame) -> Option<ServerEvent> {
        let data = &frame.data;
        match frame.event.as_str() {
            "message" => {
                let conversation_id = data_string(data, &["conversationId", "conversation_id"])?;
                let message = data
                    .get("message")
                    .and_then(normalize_message)
                    .or_else(|| {
                        warn!("message frame without message body for {conversation_id}");
                        None
                    })?;
                Some(ServerEvent::Message {
                    conversation_id,
                    message,
                })
            }
            "message_read" => Some(ServerEvent::MessageRead {
                conversation_id: data_string(data, &["conversationId", "conversation_id"])?,
            }),
            "message_deleted" => Some(ServerEvent::MessageDeleted {
                message_id: data_string(data, &["messageId", "message_id"])?,
            }),
            "typing_start" => Some(ServerEvent::TypingStart {
                conversation_id: data_string(data, &["conversationId", "conversation_id"])?,
                from_user_id: data_string(data, &["fromUserId", "from_user_id"])?,
            }),
            "typing_stop" => Some(ServerEvent::TypingStop {
                conversation_id: data_string(data, &["conversationId", "conversation_id"])?,
            }),
            "user_online" => Some(ServerEvent::UserOnline {
                user_id: data_string(data, &["userId", "user_id"])?,
            }),
            "user_offline" => Some(ServerEvent::UserOffline {
                user_id: data_string(data, &["userId", "user_id"])?,
            }),
            other => {
                debug!("ignoring unknown socket event: {other}");
                None
            }
        }
    }
}

/// Events this client emits to the peer through the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    TypingStart {
        conversation_id: String,
        to_user_id: String,
    },
    TypingStop {
        conversation_id: String,
        to_user_id: String,
    },
}

impl OutboundEvent {
    pub fn to_frame(&self) -> Frame {
        match self {
            OutboundEvent::TypingStart {
                conversation_id,
                to_user_id,
            } => Frame {
                event: "typing_start".to_string(),
                data: json!({ "conversationId": conversation_id, "toUserId": to_user_id }),
            },
            OutboundEvent::TypingStop {
                conversation_id,
                to_user_id,
            } => Frame {
                event: "typing_stop".to_string(),
                data: json!({ "conversationId": conversation_id, "toUserId": to_user_id }),
            },
        }
    }
}
