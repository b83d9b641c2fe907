use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::PusherError;
use crate::keepalive::{Keepalive, KeepaliveAction};
use crate::transport::{Dialer, Frame, Transport};

/// Deadline for writing control frames
const WRITE_WAIT: Duration = Duration::from_secs(1);

/// What a connection reports to its owner.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Message(String),
    /// Raised at most once, never after an explicit disconnect.
    Closed(PusherError),
}

/// Events carry the epoch of the connection that produced them. The queue is
/// unbounded so the socket task never waits on its owner.
pub(crate) type TaggedEvent = (u64, ConnectionEvent);

/// One live socket. Created per successful dial and discarded on close;
/// never reused across reconnects.
pub(crate) struct Connection {
    epoch: u64,
    socket: mpsc::Sender<String>,
    disconnect: Option<oneshot::Sender<()>>,
    socket_id: Option<String>,
    inactivity: watch::Sender<Duration>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Dial the configured endpoint, giving up after the connect timeout.
    /// Never retries.
    pub async fn open(
        config: &ClientConfig,
        dialer: &dyn Dialer,
    ) -> Result<Box<dyn Transport>, PusherError> {
        let url = config.endpoint_url()?;
        info!("Connecting to {}", url);

        match tokio::time::timeout(config.connect_timeout, dialer.dial(&url)).await {
            Ok(result) => result,
            Err(_) => Err(PusherError::DialError(format!(
                "timed out after {:?}",
                config.connect_timeout
            ))),
        }
    }

    /// Start the connection task over an already open transport.
    pub fn spawn(
        transport: Box<dyn Transport>,
        config: &ClientConfig,
        epoch: u64,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<String>(config.outbound_capacity);
        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let (inactivity_tx, inactivity_rx) = watch::channel(config.inactivity_timeout);

        let task = ConnectionTask {
            epoch,
            transport,
            outbound: rx,
            disconnect: disconnect_rx,
            inactivity: inactivity_rx,
            events,
            keepalive: Keepalive::new(
                config.inactivity_timeout,
                config.pong_timeout,
                Instant::now(),
            ),
            pong_timeout: config.pong_timeout,
        };

        Self {
            epoch,
            socket: tx,
            disconnect: Some(disconnect_tx),
            socket_id: None,
            inactivity: inactivity_tx,
            _task_handle: tokio::spawn(task.run()),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Empty until the server's connection-established event is processed.
    pub fn socket_id(&self) -> Option<&str> {
        self.socket_id.as_deref()
    }

    pub fn set_socket_id(&mut self, socket_id: String) {
        self.socket_id = Some(socket_id);
    }

    /// Change the keepalive inactivity period of the running task.
    pub fn set_inactivity_timeout(&self, timeout: Duration) {
        let _ = self.inactivity.send(timeout);
    }

    /// Queue a text frame. Waits while the outbound queue is full.
    pub async fn send(&self, message: String) -> Result<(), PusherError> {
        self.socket
            .send(message)
            .await
            .map_err(|e| PusherError::SendError(e.to_string()))
    }

    /// Send a close frame and stop without raising a close notification.
    pub fn disconnect(mut self) {
        if let Some(tx) = self.disconnect.take() {
            let _ = tx.send(());
        }
    }
}

struct ConnectionTask {
    epoch: u64,
    transport: Box<dyn Transport>,
    outbound: mpsc::Receiver<String>,
    disconnect: oneshot::Receiver<()>,
    inactivity: watch::Receiver<Duration>,
    events: mpsc::UnboundedSender<TaggedEvent>,
    keepalive: Keepalive,
    pong_timeout: Duration,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            let deadline = self.keepalive.deadline();

            tokio::select! {
                // Fires on an explicit disconnect and when the handle is dropped.
                _ = &mut self.disconnect => {
                    info!("Disconnecting...");
                    self.send_control(Frame::Close).await;
                    return;
                }

                frame = self.transport.recv() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            self.keepalive.on_activity(Instant::now());
                            trace!("Received message: {}", text);

                            if self.events.send((self.epoch, ConnectionEvent::Message(text))).is_err() {
                                debug!("Connection owner is gone, stopping");
                                return;
                            }
                        }
                        Some(Ok(Frame::Ping(data))) => {
                            self.keepalive.on_activity(Instant::now());
                            self.send_control(Frame::Pong(data)).await;
                        }
                        Some(Ok(Frame::Pong(_))) => {
                            self.keepalive.on_activity(Instant::now());
                        }
                        Some(Ok(Frame::Close)) | None => {
                            info!("Disconnected");
                            self.closed(PusherError::ConnectionError(
                                "closed by peer".to_string(),
                            ));
                            return;
                        }
                        Some(Err(e)) => {
                            warn!("Closed: {}", e);
                            self.closed(e);
                            return;
                        }
                    }
                }

                // A write that cannot finish within the pong window means the
                // socket is gone; the keepalive timer is not polled meanwhile.
                Some(message) = self.outbound.recv() => {
                    debug!("Sending: {}", message);
                    match tokio::time::timeout(self.pong_timeout, self.transport.send(Frame::Text(message))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!("Error sending: {}", e);
                            self.closed(e);
                            return;
                        }
                        Err(_) => {
                            warn!("Write stalled for {:?}, closing", self.pong_timeout);
                            self.closed(PusherError::SendError(format!(
                                "write stalled for {:?}",
                                self.pong_timeout
                            )));
                            return;
                        }
                    }
                }

                Ok(()) = self.inactivity.changed() => {
                    let timeout = *self.inactivity.borrow_and_update();
                    debug!("Inactivity timeout set to {:?}", timeout);
                    self.keepalive.set_inactivity_timeout(timeout);
                }

                _ = tokio::time::sleep_until(deadline) => {
                    match self.keepalive.on_timeout(Instant::now()) {
                        Some(KeepaliveAction::SendPing) => {
                            debug!(
                                "No activity in {:?}, sending ping",
                                self.keepalive.last_activity().elapsed()
                            );
                            self.send_control(Frame::Ping(Vec::new())).await;
                        }
                        Some(KeepaliveAction::Close) => {
                            warn!("Closing after non-receipt of pong");
                            if tokio::time::timeout(WRITE_WAIT, self.transport.close()).await.is_err() {
                                debug!("Timed out closing transport");
                            }
                            self.closed(PusherError::KeepaliveTimeout(self.pong_timeout));
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Write a control frame, giving up after [`WRITE_WAIT`].
    async fn send_control(&mut self, frame: Frame) {
        match tokio::time::timeout(WRITE_WAIT, self.transport.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to send control frame: {}", e),
            Err(_) => warn!("Timed out sending control frame"),
        }
    }

    fn closed(&self, reason: PusherError) {
        if self
            .events
            .send((self.epoch, ConnectionEvent::Closed(reason)))
            .is_err()
        {
            debug!("Connection owner is gone, close notification dropped");
        }
    }
}
