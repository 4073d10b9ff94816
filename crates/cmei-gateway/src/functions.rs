//! Serverless-style endpoints: CSV import, notification resend, WhatsApp.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use cmei_core::error::CmeiError;
use cmei_notify::NotificationPayload;
use cmei_workflow::{ImportReport, QueryKey};
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::server::{AppState, Usuario};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    pub csv_content: String,
}

/// Import a CSV of children. Row failures are reported, not fatal.
pub async fn import_criancas(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportReport>, ApiError> {
    if req.csv_content.trim().is_empty() {
        return Err(ApiError::bad_request("csvContent is required"));
    }
    let report = state.workflow.importar_csv(&req.csv_content, &usuario).await?;
    tracing::info!(
        "CSV import by {usuario}: {} ok, {} failed",
        report.results.success_count,
        report.results.error_count
    );
    Ok(Json(report))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub crianca_id: Option<String>,
}

/// Re-send the status webhook for one child and log it in the history.
pub async fn resend_notification(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Json(req): Json<ResendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let crianca_id = req
        .crianca_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("criancaId is required"))?;
    let url = state
        .webhook_url()?
        .ok_or_else(|| ApiError::bad_request("Webhook URL not configured"))?;

    let crianca = state.db.get_crianca(&crianca_id).map_err(|e| match e {
        CmeiError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, "Child not found"),
        other => other.into(),
    })?;
    let cmeis = state.workflow.cache().cmeis().await?;
    let turmas = state.workflow.cache().turmas().await?;
    let payload = NotificationPayload::for_crianca(&crianca, &cmeis, &turmas, true);

    state
        .webhook
        .send(&url, &payload)
        .await
        .map_err(|e| ApiError::internal(format!("Webhook delivery failed: {e}")))?;

    state.db.append_historico(
        &crianca.id,
        "Notificação Reenviada",
        &format!("Notificação de status '{}' reenviada ao responsável", crianca.status),
        &usuario,
    )?;
    state.workflow.cache().invalidate(&[QueryKey::Historico]).await;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Notification resent successfully",
    })))
}

#[derive(Deserialize)]
pub struct WhatsAppRequest {
    pub phone: Option<String>,
    pub message: Option<String>,
}

/// Proxy a text message to the WhatsApp gateway.
pub async fn send_whatsapp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WhatsAppRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gateway = state
        .whatsapp
        .as_ref()
        .ok_or_else(|| ApiError::internal("WhatsApp gateway not configured"))?;

    let (Some(phone), Some(message)) = (
        req.phone.filter(|p| !p.trim().is_empty()),
        req.message.filter(|m| !m.trim().is_empty()),
    ) else {
        return Err(ApiError::bad_request("phone and message are required"));
    };

    let reply = gateway.send_text(&phone, &message).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": reply,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use crate::server::tests::{body_json, test_state};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request, header};
    use axum::routing::post;
    use cmei_core::config::{CmeiConfig, WhatsAppConfig};
    use cmei_db::WaitlistDb;
    use std::sync::Mutex;
    use tower::ServiceExt;

    type Inbox = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    /// Local stand-in for a webhook receiver or messaging gateway.
    async fn downstream(status: StatusCode) -> (String, Inbox) {
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        let app = Router::new().route(
            "/{*path}",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    sink.lock().unwrap().push((auth, body));
                    let reply = if status.is_success() {
                        serde_json::json!({"ok": true})
                    } else {
                        serde_json::json!({"error": "quota exceeded"})
                    };
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), inbox)
    }

    async fn post_json(app: &Router, uri: &str, token: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        (status, body_json(resp).await)
    }

    fn state_with_whatsapp(api_url: &str) -> (Arc<AppState>, String) {
        let db = WaitlistDb::open_in_memory().unwrap();
        let token = db.create_token("secretaria").unwrap();
        let config = CmeiConfig {
            whatsapp: WhatsAppConfig {
                api_url: api_url.to_string(),
                api_token: "segredo".into(),
            },
            ..Default::default()
        };
        (Arc::new(AppState::new(config, db)), token)
    }

    /// One CMEI, one turma and one convoked child.
    fn convocado(state: &AppState) -> String {
        let cmei = state.db.create_cmei("CMEI Boqueirão", "", "").unwrap();
        let turma = state.db.create_turma(&cmei.id, "Maternal I", 10).unwrap();
        let nova = serde_json::from_value(serde_json::json!({
            "nome": "Nina",
            "data_nascimento": "2023-05-04",
            "sexo": "F",
            "cmei1_preferencia": cmei.id,
            "responsavel": {"nome": "Rosa", "cpf": "529.982.247-25", "telefone": "(41) 97777-1111"},
        }))
        .unwrap();
        let c = state.db.insert_crianca(&nova, "secretaria").unwrap();
        state
            .db
            .apply_mutation(&cmei_core::traits::MutationRequest {
                crianca_id: c.id.clone(),
                change: cmei_core::traits::MutationChange::Convocar {
                    cmei_id: cmei.id,
                    turma_id: turma.id,
                    deadline: "2030-01-01T00:00:00Z".parse().unwrap(),
                },
                justificativa: None,
                usuario: "secretaria".into(),
            })
            .unwrap();
        c.id
    }

    #[tokio::test]
    async fn test_import_reports_row_errors() {
        let (state, token) = test_state();
        state.db.create_cmei("CMEI Centro", "", "").unwrap();
        let app = build_router(state.clone());
        let csv = "nome,data_nascimento,sexo,cmei1_preferencia,responsavel_nome,responsavel_cpf,responsavel_telefone\n\
                   Otto,2023-01-20,M,CMEI Centro,Paula,529.982.247-25,(41) 95555-0000\n\
                   Pia,2023-02-11,F,CMEI Centro,Quésia,111.444.777-36,(41) 95555-0001\n";

        let (status, body) = post_json(&app, "/functions/import-criancas", &token, serde_json::json!({"csvContent": csv})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["totalRecords"], 2);
        assert_eq!(body["results"]["successCount"], 1);
        assert_eq!(body["results"]["errorCount"], 1);
        assert_eq!(body["results"]["errors"][0]["row"], 3);
        assert_eq!(state.db.list_criancas().unwrap()[0].fila_posicao, Some(1));
    }

    #[tokio::test]
    async fn test_import_requires_content() {
        let (state, token) = test_state();
        let app = build_router(state);
        let (status, body) = post_json(&app, "/functions/import-criancas", &token, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "csvContent is required");
    }

    #[tokio::test]
    async fn test_resend_without_webhook_is_400() {
        let (state, token) = test_state();
        let id = convocado(&state);
        let app = build_router(state);
        let (status, body) = post_json(&app, "/functions/resend-notification", &token, serde_json::json!({"criancaId": id})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Webhook URL not configured");
    }

    #[tokio::test]
    async fn test_resend_unknown_child_is_404() {
        let (state, token) = test_state();
        state.db.set_webhook_url("http://127.0.0.1:9/hook").unwrap();
        let app = build_router(state);
        let (status, _) = post_json(&app, "/functions/resend-notification", &token, serde_json::json!({"criancaId": "fantasma"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resend_delivers_and_logs_once() {
        let (base, inbox) = downstream(StatusCode::OK).await;
        let (state, token) = test_state();
        let id = convocado(&state);
        state.db.set_webhook_url(&format!("{base}/hook")).unwrap();
        let app = build_router(state.clone());

        let (status, body) = post_json(&app, "/functions/resend-notification", &token, serde_json::json!({"criancaId": id})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let sent = inbox.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["status"], "Convocado");
        assert_eq!(sent[0].1["is_resend"], true);
        assert_eq!(sent[0].1["cmei_nome"], "CMEI Boqueirão");

        let hist = state.db.list_historico(Some(&id)).unwrap();
        assert_eq!(hist.iter().filter(|h| h.acao == "Notificação Reenviada").count(), 1);
    }

    #[tokio::test]
    async fn test_resend_downstream_failure_is_500_without_history() {
        let (base, _) = downstream(StatusCode::SERVICE_UNAVAILABLE).await;
        let (state, token) = test_state();
        let id = convocado(&state);
        state.db.set_webhook_url(&format!("{base}/hook")).unwrap();
        let app = build_router(state.clone());

        let (status, body) = post_json(&app, "/functions/resend-notification", &token, serde_json::json!({"criancaId": id})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Webhook delivery failed"));
        let hist = state.db.list_historico(Some(&id)).unwrap();
        assert!(hist.iter().all(|h| h.acao != "Notificação Reenviada"));
    }

    #[tokio::test]
    async fn test_whatsapp_not_configured_is_500() {
        let (state, token) = test_state();
        let app = build_router(state);
        let (status, body) = post_json(&app, "/functions/send-whatsapp", &token, serde_json::json!({"phone": "41999990000", "message": "Olá"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "WhatsApp gateway not configured");
    }

    #[tokio::test]
    async fn test_whatsapp_missing_fields_is_400() {
        let (state, token) = state_with_whatsapp("http://127.0.0.1:9/send");
        let app = build_router(state);
        for body in [serde_json::json!({"phone": "41999990000"}), serde_json::json!({"message": "Olá", "phone": " "})] {
            let (status, _) = post_json(&app, "/functions/send-whatsapp", &token, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_whatsapp_sends_with_secret() {
        let (base, inbox) = downstream(StatusCode::OK).await;
        let (state, token) = state_with_whatsapp(&format!("{base}/message/sendText"));
        let app = build_router(state);

        let (status, body) = post_json(
            &app,
            "/functions/send-whatsapp",
            &token,
            serde_json::json!({"phone": "(41) 99999-0000", "message": "Sua vaga foi liberada"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ok"], true);

        let sent = inbox.lock().unwrap().clone();
        assert_eq!(sent[0].0.as_deref(), Some("Bearer segredo"));
        assert_eq!(sent[0].1["number"], "41999990000");
        assert_eq!(sent[0].1["text"], "Sua vaga foi liberada");
    }

    #[tokio::test]
    async fn test_whatsapp_gateway_status_is_proxied() {
        let (base, _) = downstream(StatusCode::TOO_MANY_REQUESTS).await;
        let (state, token) = state_with_whatsapp(&format!("{base}/message/sendText"));
        let app = build_router(state);

        let (status, body) = post_json(&app, "/functions/send-whatsapp", &token, serde_json::json!({"phone": "41999990000", "message": "Olá"})).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["error"].as_str().unwrap().contains("quota exceeded"));
    }
}
