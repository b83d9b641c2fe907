use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::PusherError;
use crate::presence::Member;
use crate::reconnect::{FixedDelay, ReconnectStrategy};

const DEFAULT_SCHEME: &str = "wss";
const DEFAULT_HOST: &str = "ws.pusherapp.com";
const DEFAULT_PORT: u16 = 443;

/// Wire protocol version announced when dialing.
pub const PROTOCOL_VERSION: &str = "7";
pub const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client configuration. Immutable once handed to [`crate::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub key: String,
    pub secret: Option<String>,
    pub auth_endpoint: Option<String>,
    /// Local identity for presence channels.
    pub user: Option<Member>,
    /// Silence after which a ping is sent.
    pub inactivity_timeout: Duration,
    /// How long to wait for any frame after a ping.
    pub pong_timeout: Duration,
    pub reconnect: Arc<dyn ReconnectStrategy>,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_capacity: usize,
    pub auth_timeout: Duration,
    /// Limit on a single dial, including the handshake.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(key: &str) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            key: key.to_string(),
            secret: None,
            auth_endpoint: None,
            user: None,
            inactivity_timeout: Duration::from_secs(100),
            pong_timeout: Duration::from_secs(5),
            reconnect: Arc::new(FixedDelay::default()),
            outbound_capacity: 10,
            auth_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Switch between `wss`/443 and `ws`/80
    pub fn with_secure(mut self, secure: bool) -> Self {
        if secure {
            self.scheme = "wss".to_string();
            self.port = 443;
        } else {
            self.scheme = "ws".to_string();
            self.port = 80;
        }
        self
    }

    /// Use the hosted cluster endpoint, e.g. `eu` or `mt1`
    pub fn with_cluster(mut self, cluster: &str) -> Self {
        self.host = format!("ws-{}.pusher.com", cluster);
        self
    }

    /// Set application secret for local signing of private/presence subscriptions
    pub fn with_app_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// Set an HTTP endpoint that signs subscriptions when no secret is configured
    pub fn with_auth_endpoint(mut self, endpoint: &str) -> Self {
        self.auth_endpoint = Some(endpoint.to_string());
        self
    }

    pub fn with_user(mut self, user: Member) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect = Arc::new(FixedDelay::new(delay));
        self
    }

    pub fn with_reconnect_strategy<S: ReconnectStrategy + 'static>(mut self, strategy: S) -> Self {
        self.reconnect = Arc::new(strategy);
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether private and presence channels can be signed at all
    pub fn can_authenticate(&self) -> bool {
        self.secret.is_some() || self.auth_endpoint.is_some()
    }

    /// The URL dialed for every connection attempt
    pub fn endpoint_url(&self) -> Result<Url, PusherError> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}/app/{}",
            self.scheme, self.host, self.port, self.key
        ))?;
        url.query_pairs_mut()
            .append_pair("protocol", PROTOCOL_VERSION)
            .append_pair("client", CLIENT_NAME)
            .append_pair("version", CLIENT_VERSION);
        Ok(url)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("key", &self.key)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("auth_endpoint", &self.auth_endpoint)
            .field("user", &self.user)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("pong_timeout", &self.pong_timeout)
            .field("outbound_capacity", &self.outbound_capacity)
            .field("auth_timeout", &self.auth_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
