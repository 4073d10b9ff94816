//! WhatsApp messaging gateway client.
//!
//! The gateway takes `{number, text}` with a bearer secret. Phones are sent
//! as digits only.

use cmei_core::config::WhatsAppConfig;
use std::time::Duration;

use crate::error::{NotifyError, Result};

/// Strip everything but ASCII digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Clone)]
pub struct WhatsAppGateway {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    timeout: Duration,
}

impl WhatsAppGateway {
    /// `None` unless both the gateway URL and its secret are set.
    pub fn from_config(config: &WhatsAppConfig, timeout_secs: u64) -> Option<Self> {
        config.is_configured().then(|| Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Send a text message. Returns the gateway's JSON reply.
    pub async fn send_text(&self, phone: &str, message: &str) -> Result<serde_json::Value> {
        let number = normalize_phone(phone);
        if number.is_empty() || message.trim().is_empty() {
            return Err(NotifyError::Invalid("phone and message are required".into()));
        }

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&serde_json::json!({
                "number": number,
                "text": message,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NotifyError::Http(format!("WhatsApp gateway request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("WhatsApp gateway error {status}: {body}");
            return Err(NotifyError::Status { status, body });
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .unwrap_or(serde_json::Value::Null);
        tracing::debug!("WhatsApp message sent to {number}");
        Ok(reply)
    }
}
