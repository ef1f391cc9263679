//! Headless sync client for the Wavery social platform.
//!
//! The crate reconciles three input streams - paginated REST fetches, socket
//! push events, and locally originated optimistic actions - into in-memory
//! state a UI renders from. [`Client`] is the entry point: it wires the REST
//! adapter, the socket channel, the [`sync::SyncEngine`] and the
//! [`mutations::Mutations`] layer together. All services are constructed
//! explicitly and injected, so tests run against fresh instances and fake
//! transports.

pub mod api;
pub mod config;
pub mod error;
pub mod mutations;
pub mod session;
pub mod socket;
pub mod store;
pub mod sync;
pub mod utils;

pub use api::client::{ApiClient, SocialApi};
pub use api::events::{OutboundEvent, ServerEvent};
pub use api::models::{
    Conversation, LikeState, Message, Notification, NotificationKind, UserRef,
};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use mutations::{FollowAction, Mutations};
pub use session::Session;
pub use socket::SocketHandle;
pub use store::ChatStore;
pub use sync::{EngineAction, SyncEngine, PAGE_SIZE, TYPING_QUIET_MS};

use log::warn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// The session-scoped service object a UI drives. One instance per login;
/// everything it owns dies with it.
pub struct Client {
    session: Session,
    api: Arc<dyn SocialApi>,
    socket: SocketHandle,
    engine: Arc<Mutex<SyncEngine>>,
    mutations: Arc<Mutex<Mutations>>,
}

impl Client {
    /// Builds a client against a live deployment and opens the socket
    /// channel. Must be called from within a tokio runtime.
    pub fn connect(config: &ClientConfig) -> Result<Client> {
        let session = Session::from_token(&config.token)?;
        // Fail fast on an unusable server url instead of looping forever in
        // the reconnect task.
        socket::ws_url(&config.base_url, &config.token)?;
        let api: Arc<dyn SocialApi> = Arc::new(ApiClient::new(&config.base_url, &config.token));
        let (socket, events) = socket::connect(&config.base_url, &config.token);
        Ok(Self::with_parts(api, session, socket, events))
    }

    /// Assembles a client from injected parts. This is the seam tests use:
    /// a fake [`SocialApi`], a detached socket handle, and a hand-fed event
    /// channel.
    pub fn with_parts(
        api: Arc<dyn SocialApi>,
        session: Session,
        socket: SocketHandle,
        events: UnboundedReceiver<ServerEvent>,
    ) -> Client {
        let engine = Arc::new(Mutex::new(SyncEngine::new(&session.user_id)));
        let mutations = Arc::new(Mutex::new(Mutations::new()));
        spawn_pump(
            Arc::clone(&api),
            socket.clone(),
            Arc::clone(&engine),
            events,
        );
        Client {
            session,
            api,
            socket,
            engine,
            mutations,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Read access to the conversation store. The closure runs under the
    /// state lock; keep it short.
    pub fn with_store<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        f(self.engine.lock().unwrap().store())
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&SyncEngine) -> R) -> R {
        f(&self.engine.lock().unwrap())
    }

    pub fn with_mutations<R>(&self, f: impl FnOnce(&Mutations) -> R) -> R {
        f(&self.mutations.lock().unwrap())
    }

    /// Initial load: conversation summaries enriched with unread counts,
    /// the follow graph, and the notification feed.
    pub async fn bootstrap(&self) -> Result<()> {
        let (conversations, unread) =
            tokio::try_join!(self.api.conversations(), self.api.unread_counts())?;
        self.engine
            .lock()
            .unwrap()
            .set_conversations(conversations, unread);

        let following = self.api.following().await?;
        let notifications = self.api.notifications().await?;
        let mut mutations = self.mutations.lock().unwrap();
        mutations.set_following(following);
        mutations.set_notifications(notifications);
        Ok(())
    }

    /// Opens a conversation: fetches its newest history page and focuses it.
    /// Pushes arriving while the fetch is in flight are buffered by the
    /// engine and replayed afterwards.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<()> {
        let token = self.engine.lock().unwrap().begin_focus(conversation_id);
        match self.api.messages(conversation_id, 1).await {
            Ok(messages) => {
                let actions =
                    self.engine
                        .lock()
                        .unwrap()
                        .complete_focus(conversation_id, token, messages);
                self.run(actions).await;
                Ok(())
            }
            Err(err) => {
                let actions = self
                    .engine
                    .lock()
                    .unwrap()
                    .fail_focus(conversation_id, token);
                self.run(actions).await;
                Err(err)
            }
        }
    }

    /// Fetches the next older page for the focused conversation. Returns
    /// false when there is nothing to do (no focus, no more pages, or a
    /// fetch already running).
    pub async fn load_older(&self) -> Result<bool> {
        let Some((conversation_id, page)) = self.engine.lock().unwrap().begin_load_older() else {
            return Ok(false);
        };
        match self.api.messages(&conversation_id, page).await {
            Ok(messages) => {
                self.engine
                    .lock()
                    .unwrap()
                    .complete_load_older(&conversation_id, page, messages);
                Ok(true)
            }
            Err(err) => {
                self.engine.lock().unwrap().fail_load_older();
                Err(err)
            }
        }
    }

    /// Sends into the focused conversation. The provisional message shows
    /// immediately and is swapped for the server-confirmed one; on failure
    /// it is removed again. Returns None when there was nothing to send.
    pub async fn send_message(&self, text: &str) -> Result<Option<Message>> {
        let Some(pending) = self.engine.lock().unwrap().begin_send(text) else {
            return Ok(None);
        };
        match self
            .api
            .send_message(&pending.receiver_id, &pending.text)
            .await
        {
            Ok(message) => {
                let actions = self
                    .engine
                    .lock()
                    .unwrap()
                    .complete_send(&pending, message.clone());
                self.run(actions).await;
                Ok(Some(message))
            }
            Err(err) => {
                self.engine.lock().unwrap().fail_send(&pending);
                Err(err)
            }
        }
    }

    /// First message to a peer with no existing thread. The server creates
    /// the conversation; we refetch the summaries and focus it.
    pub async fn send_to_user(&self, receiver_id: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.api.send_message(receiver_id, text).await?;

        let (conversations, unread) =
            tokio::try_join!(self.api.conversations(), self.api.unread_counts())?;
        self.engine
            .lock()
            .unwrap()
            .set_conversations(conversations, unread);

        let conversation = self
            .engine
            .lock()
            .unwrap()
            .conversation_with_peer(receiver_id);
        if let Some(conversation_id) = conversation {
            self.open_conversation(&conversation_id).await?;
        }
        Ok(())
    }

    /// A keystroke in the focused conversation's input: emits typing_start
    /// and (re)schedules the typing_stop one quiet interval out. Each call
    /// supersedes the previous timer, so exactly one stop follows the last
    /// keystroke.
    pub fn keystroke(&self) {
        let Some((event, generation)) = self.engine.lock().unwrap().keystroke() else {
            return;
        };
        self.socket.emit(event);
        let engine = Arc::clone(&self.engine);
        let socket = self.socket.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(TYPING_QUIET_MS)).await;
            if let Some(stop) = engine.lock().unwrap().typing_elapsed(generation) {
                socket.emit(stop);
            }
        });
    }

    /// Server-confirmed unsend; the local copy keeps its id but loses its
    /// text, same as an incoming message_deleted push.
    pub async fn unsend_message(&self, message_id: &str) -> Result<()> {
        self.api.unsend_message(message_id).await?;
        self.engine.lock().unwrap().delete_message_local(message_id);
        Ok(())
    }

    /// Optimistic follow toggle. Returns the resulting follow state; on
    /// transport failure the local state is rolled back and the error
    /// reported. A toggle already in flight for this user is a no-op.
    pub async fn toggle_follow(&self, user_id: &str) -> Result<bool> {
        let action = self.mutations.lock().unwrap().begin_follow_toggle(user_id);
        let Some(action) = action else {
            return Ok(self.mutations.lock().unwrap().is_following(user_id));
        };
        let result = match action {
            FollowAction::Follow => self.api.follow(user_id).await,
            FollowAction::Unfollow => self.api.unfollow(user_id).await,
        };
        match result {
            Ok(()) => {
                self.mutations.lock().unwrap().complete_follow(user_id);
                Ok(matches!(action, FollowAction::Follow))
            }
            Err(err) => {
                self.mutations.lock().unwrap().fail_follow(user_id, action);
                Err(ClientError::rolled_back("follow toggle", err))
            }
        }
    }

    /// Optimistic like toggle. The count in the response is authoritative
    /// and replaces the local arithmetic.
    pub async fn toggle_like(&self, post_id: &str) -> Result<LikeState> {
        let previous = self.mutations.lock().unwrap().begin_like_toggle(post_id);
        let Some(previous) = previous else {
            let current = self.mutations.lock().unwrap().like_state(post_id);
            return Ok(current.unwrap_or(LikeState {
                liked: false,
                likes: 0,
            }));
        };
        match self.api.like_post(post_id).await {
            Ok(server) => {
                self.mutations.lock().unwrap().complete_like(post_id, server);
                Ok(server)
            }
            Err(err) => {
                self.mutations.lock().unwrap().fail_like(post_id, previous);
                Err(ClientError::rolled_back("like toggle", err))
            }
        }
    }

    /// One-way notification read. The remote acknowledgement is best-effort;
    /// a failure is logged, not rolled back.
    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<()> {
        let changed = self
            .mutations
            .lock()
            .unwrap()
            .mark_notification_read(notification_id);
        if changed {
            if let Err(err) = self.api.mark_notification_read(notification_id).await {
                warn!("notification read ack for {notification_id} failed: {err}");
            }
        }
        Ok(())
    }

    async fn run(&self, actions: Vec<EngineAction>) {
        run_actions(&self.api, &self.socket, &self.engine, actions).await;
    }
}

fn spawn_pump(
    api: Arc<dyn SocialApi>,
    socket: SocketHandle,
    engine: Arc<Mutex<SyncEngine>>,
    mut events: UnboundedReceiver<ServerEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let actions = engine.lock().unwrap().handle_event(event);
            run_actions(&api, &socket, &engine, actions).await;
        }
    });
}

/// Executes engine-requested IO. Follow-up actions produced while resolving
/// (a refetch completing, say) are queued and drained here too.
async fn run_actions(
    api: &Arc<dyn SocialApi>,
    socket: &SocketHandle,
    engine: &Arc<Mutex<SyncEngine>>,
    actions: Vec<EngineAction>,
) {
    let mut queue: VecDeque<EngineAction> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            EngineAction::Emit(event) => socket.emit(event),
            EngineAction::AckRead { conversation_id } => {
                if let Err(err) = api.mark_read(&conversation_id).await {
                    warn!("read acknowledgement for {conversation_id} failed: {err}");
                }
            }
            EngineAction::RefreshSummaries => {
                match tokio::try_join!(api.conversations(), api.unread_counts()) {
                    Ok((conversations, unread)) => engine
                        .lock()
                        .unwrap()
                        .set_conversations(conversations, unread),
                    Err(err) => warn!("summary refresh failed: {err}"),
                }
            }
            EngineAction::RefetchFocused {
                conversation_id,
                token,
            } => match api.messages(&conversation_id, 1).await {
                Ok(messages) => queue.extend(engine.lock().unwrap().complete_focus(
                    &conversation_id,
                    token,
                    messages,
                )),
                Err(err) => {
                    warn!("refetch of {conversation_id} failed: {err}");
                    queue.extend(engine.lock().unwrap().fail_focus(&conversation_id, token));
                }
            },
        }
    }
}
