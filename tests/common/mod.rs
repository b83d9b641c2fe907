//! Shared utilities for client integration tests.
//!
//! [`mock_network`] returns a dialer to hand to the client and a server side
//! that accepts each dialed connection as a [`MockPeer`]. Everything runs in
//! memory, so tests can use paused time.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pusher_rs::{ClientConfig, Dialer, Frame, PusherError, Transport};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

pub const KEY: &str = "278d425bdf160c739803";
pub const SECRET: &str = "7ad3773142a6692b25b8";

/// How long helpers wait before failing a test.
const WAIT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Plain-text config pointing at a local server.
pub fn config() -> ClientConfig {
    ClientConfig::new(KEY)
        .with_host("127.0.0.1")
        .with_secure(false)
        .with_port(6001)
}

pub fn mock_network() -> (MockDialer, MockServer) {
    init_tracing();

    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    let dials = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));
    let hangs = Arc::new(AtomicUsize::new(0));

    let dialer = MockDialer {
        dials: Arc::clone(&dials),
        failures: Arc::clone(&failures),
        hangs: Arc::clone(&hangs),
        peers: peers_tx,
    };
    let server = MockServer {
        dials,
        failures,
        hangs,
        peers: peers_rx,
    };
    (dialer, server)
}

pub struct MockDialer {
    dials: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    hangs: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, url: &Url) -> Result<Box<dyn Transport>, PusherError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.hangs) {
            return std::future::pending().await;
        }

        if take_one(&self.failures) {
            return Err(PusherError::DialError("connection refused".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();

        let peer = MockPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| PusherError::DialError("server gone".to_string()))?;

        Ok(Box::new(MockTransport { incoming, outgoing }))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), PusherError> {
        self.outgoing
            .send(frame)
            .map_err(|e| PusherError::SendError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, PusherError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), PusherError> {
        let _ = self.outgoing.send(Frame::Close);
        Ok(())
    }
}

pub struct MockServer {
    dials: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    hangs: Arc<AtomicUsize>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockServer {
    /// Wait for the client's next successful dial
    pub async fn accept(&mut self) -> MockPeer {
        self.accept_within(WAIT).await
    }

    pub async fn accept_within(&mut self, timeout: Duration) -> MockPeer {
        tokio::time::timeout(timeout, self.peers.recv())
            .await
            .expect("timed out waiting for the client to dial")
            .expect("dialer dropped")
    }

    /// Make the next `n` dials fail
    pub fn fail_next_dials(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` dials hang without ever completing
    pub fn hang_next_dials(&self, n: usize) {
        self.hangs.store(n, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub async fn assert_no_dial(&mut self, within: Duration) {
        let result = tokio::time::timeout(within, self.peers.recv()).await;
        assert!(result.is_err(), "unexpected dial");
    }
}

/// Server side of one dialed connection. Dropping it closes the connection.
pub struct MockPeer {
    pub url: Url,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockPeer {
    pub fn send_raw(&self, text: &str) {
        self.to_client
            .send(Frame::Text(text.to_string()))
            .expect("client transport dropped");
    }

    /// Send an event with a string-encoded payload, as the server does
    pub fn send_event(&self, event: &str, channel: Option<&str>, data: &str) {
        let mut message = json!({ "event": event, "data": data });
        if let Some(channel) = channel {
            message["channel"] = Value::String(channel.to_string());
        }
        self.send_raw(&message.to_string());
    }

    pub fn establish(&self, socket_id: &str) {
        self.establish_with_activity_timeout(socket_id, 120);
    }

    pub fn establish_with_activity_timeout(&self, socket_id: &str, seconds: u64) {
        let data = json!({ "socket_id": socket_id, "activity_timeout": seconds }).to_string();
        self.send_event("pusher:connection_established", None, &data);
    }

    pub fn subscription_succeeded(&self, channel: &str, data: &str) {
        self.send_event("pusher_internal:subscription_succeeded", Some(channel), data);
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next text frame from the client, parsed. Control frames are skipped.
    pub async fn next_message(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Frame::Text(text)) => {
                    return serde_json::from_str(&text).expect("client sent invalid JSON");
                }
                Some(_) => continue,
                None => panic!("client closed the connection"),
            }
        }
    }

    /// Assert the client sends no text frame for `duration`
    pub async fn assert_silent(&mut self, duration: Duration) {
        let result = tokio::time::timeout(duration, async {
            loop {
                match self.from_client.recv().await {
                    Some(Frame::Text(text)) => return text,
                    Some(_) => continue,
                    None => return std::future::pending::<String>().await,
                }
            }
        })
        .await;

        if let Ok(text) = result {
            panic!("unexpected message: {}", text);
        }
    }
}

/// Poll `condition` until it holds
pub async fn wait_for(condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met in time");
}
