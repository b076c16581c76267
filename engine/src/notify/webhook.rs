//! Event sink posting JSON to a webhook

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::notify::{EngineEvent, EventSink};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Launchpad-Signature";

/// `sha256=<hex>` signature of a payload
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, EngineError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Posts each event in a background task
pub struct WebhookEventSink {
    client: Client,
    url: String,
    secret: Option<SecretString>,
}

impl WebhookEventSink {
    pub fn new(
        url: impl Into<String>,
        secret: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
            secret,
        })
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn emit(&self, event: EngineEvent) {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                return;
            }
        };

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            match sign(secret.expose_secret(), &payload) {
                Ok(signature) => request = request.header(SIGNATURE_HEADER, signature),
                Err(e) => warn!("Webhook not signed: {}", e),
            }
        }

        let name = event.name();
        tokio::spawn(async move {
            match request.body(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Delivered {} webhook", name);
                }
                Ok(response) => warn!("Webhook for {} returned {}", name, response.status()),
                Err(e) => warn!("Webhook for {} failed: {}", name, e),
            }
        });
    }
}
