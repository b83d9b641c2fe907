use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::client::{Command, request};
use crate::error::PusherError;
use crate::presence::{Member, Members};

/// Channel type, derived from the name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    Presence,
}

impl ChannelKind {
    pub fn of(name: &str) -> Self {
        if name.starts_with("presence-") {
            Self::Presence
        } else if name.starts_with("private-") {
            Self::Private
        } else {
            Self::Public
        }
    }

    /// Check if the channel requires authentication
    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Public)
    }
}

/// Payload handed to bound callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// The string-encoded payload as sent by the server.
    Raw(String),
    /// Snapshot delivered with `pusher:subscription_succeeded` on presence channels.
    Members(Members),
    /// `pusher:member_added` / `pusher:member_removed`.
    Member(Member),
    /// `pusher:subscription_error`, from the server or from a failed auth.
    SubscriptionError(String),
}

/// An event routed to a channel binding
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    pub data: EventData,
}

pub type EventCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Subscription state shared between the client loop and channel handles.
/// Only the client loop writes it.
#[derive(Debug)]
pub(crate) struct ChannelState {
    name: String,
    kind: ChannelKind,
    subscribed: AtomicBool,
}

impl ChannelState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ChannelKind::of(name),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Release);
    }
}

/// Handle to a subscribed (or pending) channel.
///
/// Cheap to clone. All clones for one name share state. The handle only holds
/// a weak reference to the client, so it never keeps the client alive and
/// always acts on whatever connection is current.
#[derive(Clone)]
pub struct EventChannel {
    state: Arc<ChannelState>,
    client: mpsc::WeakSender<Command>,
}

impl EventChannel {
    pub(crate) fn new(state: Arc<ChannelState>, client: mpsc::WeakSender<Command>) -> Self {
        Self { state, client }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn kind(&self) -> ChannelKind {
        self.state.kind()
    }

    /// Whether the server acknowledged the subscription on the current connection.
    pub fn is_subscribed(&self) -> bool {
        self.state.is_subscribed()
    }

    /// Register a callback for `event` on this channel. Several callbacks may
    /// be bound to the same event; they run in registration order.
    pub async fn bind<F>(&self, event: &str, callback: F) -> Result<(), PusherError>
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let sender = self.upgrade()?;
        request(&sender, |reply| Command::Bind {
            channel: self.name().to_string(),
            event: event.to_string(),
            callback: Arc::new(callback),
            reply,
        })
        .await
    }

    /// Remove every callback bound to `event` on this channel.
    pub async fn unbind(&self, event: &str) -> Result<(), PusherError> {
        let sender = self.upgrade()?;
        request(&sender, |reply| Command::Unbind {
            channel: self.name().to_string(),
            event: event.to_string(),
            reply,
        })
        .await
    }

    /// Send a client event. The name is prefixed with `client-` if needed.
    pub async fn trigger(&self, event: &str, data: serde_json::Value) -> Result<(), PusherError> {
        let sender = self.upgrade()?;
        request(&sender, |reply| Command::Trigger {
            channel: self.name().to_string(),
            event: event.to_string(),
            data,
            reply,
        })
        .await?
    }

    fn upgrade(&self) -> Result<mpsc::Sender<Command>, PusherError> {
        self.client.upgrade().ok_or(PusherError::ClientClosed)
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.state.name())
            .field("subscribed", &self.state.is_subscribed())
            .finish()
    }
}
