use crate::api::models::{LikeState, Notification};
use crate::store::NotificationFeed;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Which direction a follow toggle went, so a failure can be inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowAction {
    Follow,
    Unfollow,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InFlight {
    Follow(String),
    Like(String),
}

/// Local-first mutations over the follow graph, like counts and notification
/// read state. Every toggle lands locally before the request goes out;
/// `complete_*` confirms it, `fail_*` rolls it back.
///
/// A target with a request already pending refuses a second toggle, so rapid
/// double-clicks cannot issue duplicate network calls.
#[derive(Default)]
pub struct Mutations {
    following: HashSet<String>,
    likes: HashMap<String, LikeState>,
    notifications: NotificationFeed,
    in_flight: HashSet<InFlight>,
}

impl Mutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_following(&mut self, ids: Vec<String>) {
        self.following = ids.into_iter().collect();
    }

    pub fn is_following(&self, user_id: &str) -> bool {
        self.following.contains(user_id)
    }

    pub fn following(&self) -> &HashSet<String> {
        &self.following
    }

    /// Toggles follow state locally and reports which call to make, or None
    /// while a previous toggle for this user is unresolved.
    pub fn begin_follow_toggle(&mut self, user_id: &str) -> Option<FollowAction> {
        let key = InFlight::Follow(user_id.to_string());
        if self.in_flight.contains(&key) {
            debug!("follow toggle for {user_id} already in flight");
            return None;
        }
        self.in_flight.insert(key);
        if self.following.remove(user_id) {
            Some(FollowAction::Unfollow)
        } else {
            self.following.insert(user_id.to_string());
            Some(FollowAction::Follow)
        }
    }

    pub fn complete_follow(&mut self, user_id: &str) {
        self.in_flight.remove(&InFlight::Follow(user_id.to_string()));
    }

    /// Inverts the optimistic change back to the pre-action state.
    pub fn fail_follow(&mut self, user_id: &str, action: FollowAction) {
        self.in_flight.remove(&InFlight::Follow(user_id.to_string()));
        match action {
            FollowAction::Follow => {
                self.following.remove(user_id);
            }
            FollowAction::Unfollow => {
                self.following.insert(user_id.to_string());
            }
        }
        warn!("follow toggle for {user_id} failed; rolled back");
    }

    pub fn seed_like(&mut self, post_id: &str, state: LikeState) {
        self.likes.insert(post_id.to_string(), state);
    }

    pub fn like_state(&self, post_id: &str) -> Option<LikeState> {
        self.likes.get(post_id).copied()
    }

    /// Toggles a like locally (count included) and returns the pre-action
    /// state for rollback, or None while a toggle for this post is pending.
    pub fn begin_like_toggle(&mut self, post_id: &str) -> Option<LikeState> {
        let key = InFlight::Like(post_id.to_string());
        if self.in_flight.contains(&key) {
            debug!("like toggle for {post_id} already in flight");
            return None;
        }
        self.in_flight.insert(key);
        let previous = self
            .likes
            .get(post_id)
            .copied()
            .unwrap_or(LikeState { liked: false, likes: 0 });
        let optimistic = if previous.liked {
            LikeState {
                liked: false,
                likes: (previous.likes - 1).max(0),
            }
        } else {
            LikeState {
                liked: true,
                likes: previous.likes + 1,
            }
        };
        self.likes.insert(post_id.to_string(), optimistic);
        Some(previous)
    }

    /// The server's count is authoritative and overwrites the local
    /// arithmetic, which may have drifted under concurrent likes.
    pub fn complete_like(&mut self, post_id: &str, server: LikeState) {
        self.in_flight.remove(&InFlight::Like(post_id.to_string()));
        self.likes.insert(post_id.to_string(), server);
    }

    pub fn fail_like(&mut self, post_id: &str, previous: LikeState) {
        self.in_flight.remove(&InFlight::Like(post_id.to_string()));
        self.likes.insert(post_id.to_string(), previous);
        warn!("like toggle for {post_id} failed; rolled back");
    }

    pub fn set_notifications(&mut self, items: Vec<Notification>) {
        self.notifications.set_all(items);
    }

    pub fn notifications(&self) -> &[Notification] {
        self.notifications.items()
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.unread()
    }

    /// Read state only moves forward; the remote acknowledgement is
    /// fire-and-forget and a failure is not rolled back.
    pub fn mark_notification_read(&mut self, notification_id: &str) -> bool {
        self.notifications.mark_read(notification_id)
    }
}
