use std::time::Duration;

use thiserror::Error;

/// Error types for the pusher-rs library
#[derive(Error, Debug)]
pub enum PusherError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
    /// Opening the transport failed. Recovered by the client's reconnect timer.
    #[error("Dial error: {0}")]
    DialError(String),
    /// An inbound envelope could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// A private or presence subscription was requested without the
    /// configuration needed to authenticate it.
    #[error("Auth configuration error: {0}")]
    AuthConfigError(String),
    #[error("Channel authentication failed: {0}")]
    AuthError(String),
    #[error("No pong received within {0:?}")]
    KeepaliveTimeout(Duration),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Subscription error: {0}")]
    SubscriptionError(String),
    #[error("Send error: {0}")]
    SendError(String),
    #[error("Client run loop has stopped")]
    ClientClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PusherError::AuthConfigError("no secret".to_string());
        assert_eq!(err.to_string(), "Auth configuration error: no secret");

        let err = PusherError::KeepaliveTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "No pong received within 5s");
    }

    #[test]
    fn json_errors_convert() {
        let err: PusherError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, PusherError::JsonError(_)));
    }
}
