use async_trait::async_trait;

/// Connection-level notifications.
///
/// Handlers run on the client loop, one notification at a time. Channel
/// events are delivered through [`crate::EventChannel::bind`] instead.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when connection is established with the server
    async fn on_connection_established(&self, socket_id: &str);

    /// Called when channel subscription succeeds
    async fn on_subscription_succeeded(&self, channel: &str);

    /// Called when the connection is lost or explicitly closed
    async fn on_disconnected(&self);

    /// Called when the server reports an error
    async fn on_error(&self, code: Option<u32>, message: &str);
}
