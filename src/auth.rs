//! Subscription authentication.
//!
//! Private and presence subscriptions carry an `auth` field of the form
//! `key:hex(hmac_sha256(secret, string_to_sign))`. The string to sign is
//! `socket_id:channel_name`, with `:channel_data` appended for presence
//! channels. The server recomputes it, so the format must match exactly.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::PusherError;

/// Hex-encoded HMAC-SHA256 of `to_sign` keyed by `secret`
pub fn sign(secret: &str, to_sign: &str) -> Result<String, PusherError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| PusherError::AuthError("HMAC creation failed".to_string()))?;
    mac.update(to_sign.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the string the server expects to be signed
pub fn string_to_sign(socket_id: &str, channel: &str, channel_data: Option<&str>) -> String {
    match channel_data {
        Some(data) => format!("{}:{}:{}", socket_id, channel, data),
        None => format!("{}:{}", socket_id, channel),
    }
}

/// Auth format: app_key:hex_encoded_hmac
pub fn auth_string(key: &str, secret: &str, to_sign: &str) -> Result<String, PusherError> {
    Ok(format!("{}:{}", key, sign(secret, to_sign)?))
}

/// Response body of an auth endpoint
#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: String,
}

/// Produces `auth` values for subscribe requests, either by signing locally
/// with the app secret or by asking the configured auth endpoint.
pub(crate) struct Authenticator {
    key: String,
    secret: Option<String>,
    endpoint: Option<String>,
    http_client: HttpClient,
}

impl Authenticator {
    pub fn new(config: &ClientConfig) -> Self {
        let http_client = HttpClient::builder()
            .timeout(config.auth_timeout)
            .build()
            .unwrap_or_else(|_| HttpClient::new());

        Self {
            key: config.key.clone(),
            secret: config.secret.clone(),
            endpoint: config.auth_endpoint.clone(),
            http_client,
        }
    }

    pub async fn authenticate(
        &self,
        socket_id: &str,
        channel: &str,
        channel_data: Option<&str>,
    ) -> Result<String, PusherError> {
        if let Some(secret) = &self.secret {
            let to_sign = string_to_sign(socket_id, channel, channel_data);
            auth_string(&self.key, secret, &to_sign)
        } else if let Some(endpoint) = &self.endpoint {
            self.fetch_auth_from_endpoint(endpoint, socket_id, channel, channel_data)
                .await
        } else {
            Err(PusherError::AuthConfigError(
                "No authentication method available".to_string(),
            ))
        }
    }

    /// Fetch authentication from endpoint
    async fn fetch_auth_from_endpoint(
        &self,
        endpoint: &str,
        socket_id: &str,
        channel: &str,
        channel_data: Option<&str>,
    ) -> Result<String, PusherError> {
        let mut form = HashMap::new();
        form.insert("socket_id", socket_id);
        form.insert("channel_name", channel);

        if let Some(data) = channel_data {
            form.insert("channel_data", data);
        }

        debug!("Requesting auth for {} from {}", channel, endpoint);

        let response = self.http_client.post(endpoint).form(&form).send().await?;
        let status = response.status();

        if status.is_success() {
            let auth_data: AuthResponse = response.json().await?;
            return Ok(auth_data.auth);
        }

        Err(PusherError::AuthError(format!(
            "Authentication failed: {}",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "278d425bdf160c739803";
    const SECRET: &str = "7ad3773142a6692b25b8";

    #[test]
    fn private_channel_signature_matches_reference() {
        let to_sign = string_to_sign("1234.1234", "private-foobar", None);
        assert_eq!(to_sign, "1234.1234:private-foobar");

        let auth = auth_string(KEY, SECRET, &to_sign).unwrap();
        assert_eq!(
            auth,
            "278d425bdf160c739803:58df8b0c36d6982b82c3ecf6b4662e34fe8c25bba48f5369f135bf843651c3a4"
        );
    }

    #[test]
    fn presence_signature_appends_channel_data() {
        let data = r#"{"user_id":"b"}"#;
        let to_sign = string_to_sign("123.456", "presence-room", Some(data));
        assert_eq!(to_sign, r#"123.456:presence-room:{"user_id":"b"}"#);

        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(to_sign.as_bytes());
        let expected = format!("{}:{}", KEY, hex::encode(mac.finalize().into_bytes()));

        assert_eq!(auth_string(KEY, SECRET, &to_sign).unwrap(), expected);
    }

    #[test]
    fn signatures_are_deterministic() {
        let a = sign(SECRET, "123.456:private-room").unwrap();
        let b = sign(SECRET, "123.456:private-room").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign(SECRET, "123.457:private-room").unwrap());
    }

    #[tokio::test]
    async fn authenticator_prefers_local_secret() {
        let config = ClientConfig::new(KEY)
            .with_app_secret(SECRET)
            .with_auth_endpoint("http://127.0.0.1:9/never-called");

        let auth = Authenticator::new(&config)
            .authenticate("1234.1234", "private-foobar", None)
            .await
            .unwrap();
        assert!(auth.ends_with("58df8b0c36d6982b82c3ecf6b4662e34fe8c25bba48f5369f135bf843651c3a4"));
    }

    #[tokio::test]
    async fn authenticator_without_credentials_is_a_config_error() {
        let config = ClientConfig::new(KEY);
        let result = Authenticator::new(&config)
            .authenticate("1.1", "private-x", None)
            .await;
        assert!(matches!(result, Err(PusherError::AuthConfigError(_))));
    }
}
