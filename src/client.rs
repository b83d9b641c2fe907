use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::auth::Authenticator;
use crate::channel::{ChannelEvent, ChannelKind, ChannelState, EventCallback, EventChannel, EventData};
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionEvent, TaggedEvent};
use crate::error::PusherError;
use crate::event::EventHandler;
use crate::message::{
    self, CLIENT_EVENT_PREFIX, CONNECTION_ESTABLISHED, ConnectionData, ERROR, ErrorData, Event,
    INTERNAL_MEMBER_ADDED, INTERNAL_MEMBER_REMOVED, INTERNAL_SUBSCRIPTION_SUCCEEDED, MEMBER_ADDED,
    MEMBER_REMOVED, PING, PONG, SUBSCRIBE, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED, SubscribeData,
    UNSUBSCRIBE, UnsubscribeData,
};
use crate::presence;
use crate::transport::{Dialer, Transport, WebSocketDialer};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Requests from the public API to the client loop.
pub(crate) enum Command {
    Subscribe {
        channel: String,
        reply: oneshot::Sender<EventChannel>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<()>,
    },
    Bind {
        channel: String,
        event: String,
        callback: EventCallback,
        reply: oneshot::Sender<()>,
    },
    Unbind {
        channel: String,
        event: String,
        reply: oneshot::Sender<()>,
    },
    Trigger {
        channel: String,
        event: String,
        data: serde_json::Value,
        reply: oneshot::Sender<Result<(), PusherError>>,
    },
    AddHandler {
        handler: Box<dyn EventHandler>,
        reply: oneshot::Sender<()>,
    },
    SocketId {
        reply: oneshot::Sender<Option<String>>,
    },
    Connect {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Result of a dial running beside the loop, tagged with its epoch.
type DialOutcome = (u64, Result<Box<dyn Transport>, PusherError>);

/// A dial in flight.
struct PendingDial {
    epoch: u64,
    task: tokio::task::JoinHandle<()>,
}

/// Send a command and wait for the loop to answer it.
pub(crate) async fn request<T>(
    sender: &mpsc::Sender<Command>,
    make: impl FnOnce(oneshot::Sender<T>) -> Command,
) -> Result<T, PusherError> {
    let (reply, response) = oneshot::channel();
    sender
        .send(make(reply))
        .await
        .map_err(|_| PusherError::ClientClosed)?;
    response.await.map_err(|_| PusherError::ClientClosed)
}

/// Persistent Pusher client.
///
/// Creating a client starts its control loop, which dials immediately and
/// keeps reconnecting until [`Client::disconnect`] is called or the client is
/// dropped. Must be created inside a tokio runtime.
pub struct Client {
    config: Arc<ClientConfig>,
    commands: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Create a client for the default endpoint with the given application key
    pub fn new(app_key: &str) -> Self {
        Self::with_config(ClientConfig::new(app_key))
    }

    /// Create a client for a custom endpoint
    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_dialer(config, WebSocketDialer)
    }

    /// Create a client that opens sockets through `dialer`
    pub fn with_dialer<D: Dialer>(config: ClientConfig, dialer: D) -> Self {
        let config = Arc::new(config);
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (dials_tx, dials_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let run_loop = RunLoop {
            authenticator: Authenticator::new(&config),
            config: Arc::clone(&config),
            dialer: Arc::new(dialer),
            dials_tx,
            dials_rx,
            dialing: None,
            commands: rx,
            handle_sender: tx.downgrade(),
            events_tx,
            events_rx,
            connection: None,
            next_epoch: 0,
            reconnect_at: Some(Instant::now()),
            failed_attempts: 0,
            channels: HashMap::new(),
            tracked: Vec::new(),
            requested: HashSet::new(),
            bindings: HashMap::new(),
            handlers: Vec::new(),
            connected: Arc::clone(&connected),
        };

        Self {
            config,
            commands: tx,
            connected,
            _task_handle: tokio::spawn(run_loop.run()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the server has confirmed the current connection
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The socket ID of the current connection, once established
    pub async fn socket_id(&self) -> Option<String> {
        request(&self.commands, |reply| Command::SocketId { reply })
            .await
            .ok()
            .flatten()
    }

    /// Subscribe to a channel.
    ///
    /// Returns the channel's handle; repeated calls with the same name share
    /// it. The subscription is sent now if the connection is established,
    /// otherwise as soon as it is, and again after every reconnect.
    ///
    /// Fails with `AuthConfigError` for private and presence channels the
    /// configuration cannot authenticate.
    pub async fn subscribe(&self, channel: &str) -> Result<EventChannel, PusherError> {
        let kind = ChannelKind::of(channel);

        if kind.requires_auth() && !self.config.can_authenticate() {
            return Err(PusherError::AuthConfigError(format!(
                "{} requires an app secret or an auth endpoint",
                channel
            )));
        }
        if kind == ChannelKind::Presence && self.config.user.is_none() {
            return Err(PusherError::AuthConfigError(format!(
                "{} requires a presence user",
                channel
            )));
        }

        request(&self.commands, |reply| Command::Subscribe {
            channel: channel.to_string(),
            reply,
        })
        .await
    }

    /// Unsubscribe from a channel. Existing handles stay usable for a later
    /// [`Client::subscribe`].
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), PusherError> {
        request(&self.commands, |reply| Command::Unsubscribe {
            channel: channel.to_string(),
            reply,
        })
        .await
    }

    /// Add an event handler for connection-level notifications
    pub async fn add_event_handler<H: EventHandler + 'static>(
        &self,
        handler: H,
    ) -> Result<(), PusherError> {
        request(&self.commands, |reply| Command::AddHandler {
            handler: Box::new(handler),
            reply,
        })
        .await
    }

    /// Close the connection. No reconnect is scheduled until [`Client::connect`].
    pub async fn disconnect(&self) -> Result<(), PusherError> {
        request(&self.commands, |reply| Command::Disconnect { reply }).await
    }

    /// Dial again after an explicit disconnect. No-op while connected, while
    /// a dial is in flight or while a reconnect is already scheduled.
    pub async fn connect(&self) -> Result<(), PusherError> {
        request(&self.commands, |reply| Command::Connect { reply }).await
    }
}

/// The client's control loop. Owns every piece of mutable client state and
/// processes one command, connection event or timer expiry at a time.
struct RunLoop {
    config: Arc<ClientConfig>,
    dialer: Arc<dyn Dialer>,
    /// Dials run on their own task so commands are served meanwhile.
    dials_tx: mpsc::UnboundedSender<DialOutcome>,
    dials_rx: mpsc::UnboundedReceiver<DialOutcome>,
    dialing: Option<PendingDial>,
    authenticator: Authenticator,
    commands: mpsc::Receiver<Command>,
    /// Handed to channel handles; does not keep the loop alive.
    handle_sender: mpsc::WeakSender<Command>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    connection: Option<Connection>,
    next_epoch: u64,
    reconnect_at: Option<Instant>,
    failed_attempts: usize,
    channels: HashMap<String, Arc<ChannelState>>,
    /// Channels to (re)subscribe on every establishment, in subscribe order.
    tracked: Vec<String>,
    /// Channels a subscribe request was sent for on the current connection.
    requested: HashSet<String>,
    bindings: HashMap<String, HashMap<String, Vec<EventCallback>>>,
    handlers: Vec<Box<dyn EventHandler>>,
    connected: Arc<AtomicBool>,
}

impl RunLoop {
    async fn run(mut self) {
        loop {
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                _ = tokio::time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.start_dial();
                }

                Some((epoch, result)) = self.dials_rx.recv() => {
                    self.handle_dial_outcome(epoch, result);
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("Client dropped, shutting down");
                            self.disconnect().await;
                            return;
                        }
                    }
                }

                Some((epoch, event)) = self.events_rx.recv() => {
                    self.handle_connection_event(epoch, event).await;
                }
            }
        }
    }

    fn start_dial(&mut self) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let config = Arc::clone(&self.config);
        let dialer = Arc::clone(&self.dialer);
        let outcomes = self.dials_tx.clone();

        let task = tokio::spawn(async move {
            let result = Connection::open(&config, dialer.as_ref()).await;
            let _ = outcomes.send((epoch, result));
        });
        self.dialing = Some(PendingDial { epoch, task });
    }

    fn handle_dial_outcome(&mut self, epoch: u64, result: Result<Box<dyn Transport>, PusherError>) {
        if self.dialing.as_ref().map(|d| d.epoch) != Some(epoch) {
            trace!("Ignoring outcome of abandoned dial {}", epoch);
            return;
        }
        self.dialing = None;

        match result {
            Ok(transport) => {
                info!("Connection opened");
                self.failed_attempts = 0;
                self.connection = Some(Connection::spawn(
                    transport,
                    &self.config,
                    epoch,
                    self.events_tx.clone(),
                ));
                self.reset_subscriptions();
            }
            Err(e) => {
                self.failed_attempts += 1;
                let delay = self.schedule_reconnect();
                warn!("Failed to connect: {}, retrying in {:?}", e, delay);
            }
        }
    }

    fn schedule_reconnect(&mut self) -> Duration {
        let delay = self.config.reconnect.next_delay(self.failed_attempts);
        self.reconnect_at = Some(Instant::now() + delay);
        delay
    }

    /// Nothing is subscribed on a fresh or lost socket.
    fn reset_subscriptions(&mut self) {
        for state in self.channels.values() {
            state.set_subscribed(false);
        }
        self.requested.clear();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Subscribe { channel, reply } => {
                let state = Arc::clone(
                    self.channels
                        .entry(channel.clone())
                        .or_insert_with(|| Arc::new(ChannelState::new(&channel))),
                );
                if !self.tracked.contains(&channel) {
                    self.tracked.push(channel.clone());
                }

                self.subscribe_channel(&channel).await;
                let _ = reply.send(EventChannel::new(state, self.handle_sender.clone()));
            }
            Command::Unsubscribe { channel, reply } => {
                self.unsubscribe_channel(&channel).await;
                let _ = reply.send(());
            }
            Command::Bind {
                channel,
                event,
                callback,
                reply,
            } => {
                self.bindings
                    .entry(channel)
                    .or_default()
                    .entry(event)
                    .or_default()
                    .push(callback);
                let _ = reply.send(());
            }
            Command::Unbind {
                channel,
                event,
                reply,
            } => {
                if let Some(events) = self.bindings.get_mut(&channel) {
                    events.remove(&event);
                }
                let _ = reply.send(());
            }
            Command::Trigger {
                channel,
                event,
                data,
                reply,
            } => {
                let result = self.trigger(&channel, &event, data).await;
                let _ = reply.send(result);
            }
            Command::AddHandler { handler, reply } => {
                self.handlers.push(handler);
                let _ = reply.send(());
            }
            Command::SocketId { reply } => {
                let socket_id = self
                    .connection
                    .as_ref()
                    .and_then(|c| c.socket_id())
                    .map(str::to_string);
                let _ = reply.send(socket_id);
            }
            Command::Connect { reply } => {
                if self.connection.is_none() && self.dialing.is_none() && self.reconnect_at.is_none() {
                    self.reconnect_at = Some(Instant::now());
                }
                let _ = reply.send(());
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        if let Some(dial) = self.dialing.take() {
            debug!("Abandoning dial {}", dial.epoch);
            dial.task.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
            self.connection_lost().await;
        }
    }

    async fn connection_lost(&mut self) {
        self.reset_subscriptions();
        self.connected.store(false, Ordering::Release);
        for handler in self.handlers.iter() {
            handler.on_disconnected().await;
        }
    }

    async fn handle_connection_event(&mut self, epoch: u64, event: ConnectionEvent) {
        if self.connection.as_ref().map(Connection::epoch) != Some(epoch) {
            trace!("Ignoring event from stale connection {}", epoch);
            return;
        }

        match event {
            ConnectionEvent::Message(text) => self.handle_message(&text).await,
            ConnectionEvent::Closed(reason) => {
                self.connection = None;
                self.connection_lost().await;
                let delay = self.schedule_reconnect();
                warn!("Connection closed ({}), will reconnect in {:?}", reason, delay);
            }
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let event = match message::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping message: {} ({})", e, text);
                return;
            }
        };

        debug!(
            "Received: channel={:?} event={}",
            event.channel, event.event
        );

        match event.event.as_str() {
            CONNECTION_ESTABLISHED => self.handle_connection_established(&event.data).await,
            INTERNAL_SUBSCRIPTION_SUCCEEDED => self.handle_subscription_succeeded(event).await,
            INTERNAL_MEMBER_ADDED => self.handle_member_event(event, MEMBER_ADDED),
            INTERNAL_MEMBER_REMOVED => self.handle_member_event(event, MEMBER_REMOVED),
            SUBSCRIPTION_ERROR => self.handle_subscription_error(event),
            ERROR => self.handle_error(&event.data).await,
            PING => self.send(PONG, &serde_json::json!({}), None).await,
            PONG => {}
            name if name.starts_with("pusher_internal:") => {
                debug!("Unhandled internal event: {}", name);
            }
            _ => match event.channel {
                Some(channel) => self.dispatch(&channel, &event.event, EventData::Raw(event.data)),
                None => debug!("Ignoring event without channel: {}", event.event),
            },
        }
    }

    async fn handle_connection_established(&mut self, data: &str) {
        let conn_data = match serde_json::from_str::<ConnectionData>(data) {
            Ok(conn_data) => conn_data,
            Err(e) => {
                warn!("Malformed connection data: {}", e);
                return;
            }
        };

        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        connection.set_socket_id(conn_data.socket_id.clone());

        // The server may ask for pings sooner than configured.
        if let Some(secs) = conn_data.activity_timeout.filter(|s| *s > 0) {
            let server_timeout = Duration::from_secs(secs);
            if server_timeout < self.config.inactivity_timeout {
                debug!("Using server activity timeout of {:?}", server_timeout);
                connection.set_inactivity_timeout(server_timeout);
            }
        }
        self.connected.store(true, Ordering::Release);

        info!(
            "Connection established with socket ID: {}",
            conn_data.socket_id
        );

        for handler in self.handlers.iter() {
            handler.on_connection_established(&conn_data.socket_id).await;
        }

        let pending: Vec<String> = self
            .tracked
            .iter()
            .filter(|name| self.channels.get(*name).is_some_and(|s| !s.is_subscribed()))
            .cloned()
            .collect();

        for name in pending {
            self.subscribe_channel(&name).await;
        }
    }

    /// Send a subscribe request for a tracked channel if the connection is
    /// established and none was sent on this connection yet.
    async fn subscribe_channel(&mut self, name: &str) {
        let Some(socket_id) = self
            .connection
            .as_ref()
            .and_then(|c| c.socket_id())
            .map(str::to_string)
        else {
            debug!("Deferring subscription to {} until connection is established", name);
            return;
        };

        let Some(state) = self.channels.get(name) else {
            return;
        };
        if state.is_subscribed() || self.requested.contains(name) {
            return;
        }
        let kind = state.kind();

        let channel_data = match (kind, &self.config.user) {
            (ChannelKind::Presence, Some(user)) => match serde_json::to_string(user) {
                Ok(data) => Some(data),
                Err(e) => {
                    error!("Failed to encode presence user: {}", e);
                    return;
                }
            },
            _ => None,
        };

        let auth = if kind.requires_auth() {
            match self
                .authenticator
                .authenticate(&socket_id, name, channel_data.as_deref())
                .await
            {
                Ok(auth) => Some(auth),
                Err(e) => {
                    warn!("Authentication for {} failed: {}", name, e);
                    self.requested.insert(name.to_string());
                    self.dispatch(name, SUBSCRIPTION_ERROR, EventData::SubscriptionError(e.to_string()));
                    return;
                }
            }
        } else {
            None
        };

        let data = SubscribeData {
            channel: name.to_string(),
            auth,
            channel_data,
        };

        debug!("Subscribing to {}", name);
        self.requested.insert(name.to_string());
        self.send(SUBSCRIBE, &data, None).await;
    }

    async fn unsubscribe_channel(&mut self, name: &str) {
        let was_tracked = self.tracked.iter().any(|n| n == name);
        self.tracked.retain(|n| n != name);
        self.requested.remove(name);

        if let Some(state) = self.channels.get(name) {
            state.set_subscribed(false);
        }

        if was_tracked && self.connection.is_some() {
            debug!("Unsubscribing from {}", name);
            let data = UnsubscribeData {
                channel: name.to_string(),
            };
            self.send(UNSUBSCRIBE, &data, None).await;
        }
    }

    async fn handle_subscription_succeeded(&mut self, event: Event) {
        let Some(name) = event.channel else {
            warn!("Subscription succeeded without a channel");
            return;
        };
        let Some(state) = self.channels.get(&name) else {
            debug!("Subscription succeeded for unknown channel: {}", name);
            return;
        };
        if !self.tracked.contains(&name) {
            debug!("Subscription succeeded for {} after unsubscribe", name);
            return;
        }

        debug!("Subscription succeeded for channel: {}", name);
        state.set_subscribed(true);

        let data = if state.kind() == ChannelKind::Presence {
            let my_id = self.config.user.as_ref().map(|u| u.user_id.as_str());
            match presence::parse_members(&event.data, my_id) {
                Ok(members) => EventData::Members(members),
                Err(e) => {
                    warn!("Dropping membership snapshot for {}: {}", name, e);
                    return;
                }
            }
        } else {
            EventData::Raw(event.data)
        };

        for handler in self.handlers.iter() {
            handler.on_subscription_succeeded(&name).await;
        }
        self.dispatch(&name, SUBSCRIPTION_SUCCEEDED, data);
    }

    fn handle_member_event(&self, event: Event, public_name: &str) {
        let Some(channel) = event.channel else {
            warn!("{} without a channel", event.event);
            return;
        };
        match presence::parse_member(&event.data) {
            Ok(member) => self.dispatch(&channel, public_name, EventData::Member(member)),
            Err(e) => warn!("Dropping {} on {}: {}", event.event, channel, e),
        }
    }

    fn handle_subscription_error(&self, event: Event) {
        let Some(channel) = event.channel else {
            warn!("Subscription error without a channel: {}", event.data);
            return;
        };
        warn!("Subscription to {} rejected: {}", channel, event.data);

        if let Some(state) = self.channels.get(&channel) {
            state.set_subscribed(false);
        }
        self.dispatch(&channel, SUBSCRIPTION_ERROR, EventData::SubscriptionError(event.data));
    }

    async fn handle_error(&self, data: &str) {
        let error_data = serde_json::from_str::<ErrorData>(data).unwrap_or_else(|_| ErrorData {
            code: None,
            message: data.to_string(),
        });

        error!(
            "Pusher error: {} (code: {:?})",
            error_data.message, error_data.code
        );

        for handler in self.handlers.iter() {
            handler.on_error(error_data.code, &error_data.message).await;
        }
    }

    async fn trigger(
        &self,
        channel: &str,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), PusherError> {
        let event_name = if !event.starts_with(CLIENT_EVENT_PREFIX) {
            format!("{}{}", CLIENT_EVENT_PREFIX, event)
        } else {
            event.to_string()
        };

        let Some(connection) = &self.connection else {
            return Err(PusherError::ConnectionError("Not connected".to_string()));
        };
        if !self.channels.get(channel).is_some_and(|s| s.is_subscribed()) {
            return Err(PusherError::SubscriptionError(format!(
                "{} is not subscribed",
                channel
            )));
        }

        let json = message::encode(&event_name, &data, Some(channel))?;
        connection.send(json).await
    }

    /// Best-effort send on the current connection.
    async fn send<T: serde::Serialize>(&self, event: &str, data: &T, channel: Option<&str>) {
        let Some(connection) = &self.connection else {
            debug!("No active connection to send {} to", event);
            return;
        };

        let result = match message::encode(event, data, channel) {
            Ok(json) => connection.send(json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!("Failed to send {}: {}", event, e);
        }
    }

    fn dispatch(&self, channel: &str, event: &str, data: EventData) {
        let Some(callbacks) = self.bindings.get(channel).and_then(|events| events.get(event)) else {
            trace!("No bindings for {} on {}", event, channel);
            return;
        };

        let channel_event = ChannelEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data,
        };
        for callback in callbacks {
            callback(&channel_event);
        }
    }
}
