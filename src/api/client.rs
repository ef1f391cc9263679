use crate::api::models::{
    normalize_conversation, normalize_message, normalize_notification, normalize_user,
    Conversation, LikeState, Message, Notification,
};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::collections::HashMap;

/// REST surface the sync engine and mutation layer consume. Implemented by
/// [`ApiClient`] against a live server and by in-memory fakes in tests.
#[async_trait]
pub trait SocialApi: Send + Sync {
    async fn conversations(&self) -> Result<Vec<Conversation>>;
    async fn unread_counts(&self) -> Result<HashMap<String, u32>>;
    async fn messages(&self, conversation_id: &str, page: u32) -> Result<Vec<Message>>;
    async fn send_message(&self, receiver_id: &str, text: &str) -> Result<Message>;
    async fn mark_read(&self, conversation_id: &str) -> Result<()>;
    async fn unsend_message(&self, message_id: &str) -> Result<()>;
    async fn following(&self) -> Result<Vec<String>>;
    async fn follow(&self, user_id: &str) -> Result<()>;
    async fn unfollow(&self, user_id: &str) -> Result<()>;
    async fn like_post(&self, post_id: &str) -> Result<LikeState>;
    async fn notifications(&self) -> Result<Vec<Notification>>;
    async fn mark_notification_read(&self, notification_id: &str) -> Result<()>;
}

pub struct ApiClient {
    http: HttpClient,
    base_api: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: HttpClient::new(),
            base_api: Self::base_api(base_url),
            token: token.to_string(),
        }
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") {
            trimmed.to_string()
        } else {
            format!("{}/api", trimmed)
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn finish(req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        Self::finish(self.with_auth(self.http.get(format!("{}{}", self.base_api, path)))).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        Self::finish(
            self.with_auth(self.http.post(format!("{}{}", self.base_api, path)))
                .json(&body),
        )
        .await
    }

    async fn put_empty(&self, path: &str) -> Result<()> {
        Self::finish(self.with_auth(self.http.put(format!("{}{}", self.base_api, path)))).await?;
        Ok(())
    }

    /// Pulls the payload list out of a response that may be a bare array or
    /// wrapped under one of the given keys.
    fn array_of(json: &Value, keys: &[&str]) -> Vec<Value> {
        if let Some(arr) = json.as_array() {
            return arr.clone();
        }
        keys.iter()
            .find_map(|k| json.get(k).and_then(|v| v.as_array()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SocialApi for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>> {
        let json = self.get_json("/messages/conversations").await?;
        Ok(Self::array_of(&json, &["conversations", "data"])
            .iter()
            .filter_map(normalize_conversation)
            .collect())
    }

    async fn unread_counts(&self) -> Result<HashMap<String, u32>> {
        let json = self.get_json("/messages/unread").await?;
        let mut counts = HashMap::new();
        for entry in Self::array_of(&json, &["conversations", "data"]) {
            let id = entry
                .get("conversationId")
                .or_else(|| entry.get("conversation_id"))
                .and_then(|v| v.as_str());
            let count = entry
                .get("unreadCount")
                .or_else(|| entry.get("unread_count"))
                .and_then(|v| v.as_u64());
            if let (Some(id), Some(count)) = (id, count) {
                counts.insert(id.to_string(), count as u32);
            }
        }
        Ok(counts)
    }

    async fn messages(&self, conversation_id: &str, page: u32) -> Result<Vec<Message>> {
        let json = self
            .get_json(&format!("/messages/{}?page={}", conversation_id, page))
            .await?;
        Ok(Self::array_of(&json, &["messages", "data"])
            .iter()
            .filter_map(normalize_message)
            .collect())
    }

    async fn send_message(&self, receiver_id: &str, text: &str) -> Result<Message> {
        let json = self
            .post_json(
                "/messages",
                serde_json::json!({ "receiverId": receiver_id, "text": text }),
            )
            .await?;
        json.get("message")
            .and_then(normalize_message)
            .or_else(|| normalize_message(&json))
            .ok_or_else(|| ClientError::Payload("send response carried no message".into()))
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        self.put_empty(&format!("/messages/{}/read", conversation_id))
            .await
    }

    async fn unsend_message(&self, message_id: &str) -> Result<()> {
        let resp = self
            .with_auth(
                self.http
                    .delete(format!("{}/messages/unsend/{}", self.base_api, message_id)),
            )
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn following(&self) -> Result<Vec<String>> {
        let json = self.get_json("/users/me/following").await?;
        Ok(Self::array_of(&json, &["following", "users", "data"])
            .iter()
            .filter_map(normalize_user)
            .map(|u| u.id)
            .collect())
    }

    async fn follow(&self, user_id: &str) -> Result<()> {
        self.post_json(&format!("/users/{}/follow", user_id), Value::Null)
            .await?;
        Ok(())
    }

    async fn unfollow(&self, user_id: &str) -> Result<()> {
        self.post_json(&format!("/users/{}/unfollow", user_id), Value::Null)
            .await?;
        Ok(())
    }

    async fn like_post(&self, post_id: &str) -> Result<LikeState> {
        let json = self
            .post_json(&format!("/posts/{}/like", post_id), Value::Null)
            .await?;
        Ok(LikeState {
            liked: json.get("liked").and_then(|v| v.as_bool()).unwrap_or(true),
            likes: json
                .get("likes")
                .or_else(|| json.get("likeCount"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        })
    }

    async fn notifications(&self) -> Result<Vec<Notification>> {
        let json = self.get_json("/notifications").await?;
        Ok(Self::array_of(&json, &["notifications", "data"])
            .iter()
            .filter_map(normalize_notification)
            .collect())
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<()> {
        self.put_empty(&format!("/notifications/{}/read", notification_id))
            .await
    }
}
