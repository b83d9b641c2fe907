//! Persistent client for Pusher-protocol pub/sub servers.
//!
//! A [`Client`] keeps one WebSocket connection alive, reconnecting after
//! failures and re-subscribing every channel it tracks. Channel events are
//! delivered to callbacks bound on [`EventChannel`] handles; connection-level
//! notifications go to [`EventHandler`]s.
//!
//! ```no_run
//! use pusher_rs::{Client, ClientConfig, EventData};
//!
//! # async fn run() -> Result<(), pusher_rs::PusherError> {
//! let client = Client::with_config(ClientConfig::new("app-key").with_cluster("eu"));
//! let channel = client.subscribe("orders").await?;
//! channel
//!     .bind("created", |event| {
//!         if let EventData::Raw(data) = &event.data {
//!             println!("order created: {}", data);
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod event;
mod keepalive;
pub mod message;
pub mod presence;
pub mod reconnect;
pub mod transport;

pub use channel::{ChannelEvent, ChannelKind, EventCallback, EventChannel, EventData};
pub use client::Client;
pub use config::ClientConfig;
pub use error::PusherError;
pub use event::EventHandler;
pub use presence::{Member, Members, UserInfo};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectStrategy};
pub use transport::{Dialer, Frame, Transport, WebSocketDialer};
