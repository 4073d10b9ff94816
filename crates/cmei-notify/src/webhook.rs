//! System webhook delivery.

use std::time::Duration;

use crate::error::{NotifyError, Result};
use crate::payload::NotificationPayload;

/// Posts status notifications to the configured webhook.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn send(&self, url: &str, payload: &NotificationPayload) -> Result<()> {
        if url.trim().is_empty() {
            return Err(NotifyError::NotConfigured("Webhook URL"));
        }

        let resp = self
            .client
            .post(url)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NotifyError::Http(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("Webhook notification sent for crianca {} ({})", payload.crianca_id, payload.status);
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(NotifyError::Status { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_downstream;
    use axum::http::StatusCode;
    use chrono::Utc;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            crianca_id: "c-1".into(),
            status: "Convocado".into(),
            responsavel_nome: "Maria".into(),
            responsavel_telefone: "(41) 99999-1111".into(),
            responsavel_email: Some("maria@example.com".into()),
            cmei_nome: Some("CMEI X".into()),
            turma_nome: Some("Berçário I".into()),
            convocacao_deadline: Some(Utc::now()),
            data_acao: Utc::now(),
            is_resend: true,
        }
    }

    #[tokio::test]
    async fn test_send_posts_payload() {
        let (base, captured) = spawn_downstream(StatusCode::OK).await;
        let dispatcher = WebhookDispatcher::new(5);
        dispatcher.send(&format!("{base}/hook"), &payload()).await.unwrap();

        let seen = captured.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body["crianca_id"], "c-1");
        assert_eq!(seen[0].body["is_resend"], true);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (base, _) = spawn_downstream(StatusCode::BAD_GATEWAY).await;
        let err = WebhookDispatcher::new(5)
            .send(&format!("{base}/hook"), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_empty_url_is_not_configured() {
        let err = WebhookDispatcher::new(5).send("  ", &payload()).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured(_)));
    }
}
