//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post, put},
};
use cmei_core::config::CmeiConfig;
use cmei_core::error::Result;
use cmei_db::WaitlistDb;
use cmei_notify::{WebhookDispatcher, WhatsAppGateway};
use cmei_workflow::Workflow;
use crate::error::ApiError;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: CmeiConfig,
    pub start_time: std::time::Instant,
    /// Waitlist store (also holds settings and API tokens).
    pub db: Arc<WaitlistDb>,
    /// Guarded mutations plus the list cache they invalidate.
    pub workflow: Arc<Workflow<WaitlistDb>>,
    pub webhook: WebhookDispatcher,
    /// `None` when the gateway URL or secret is missing.
    pub whatsapp: Option<WhatsAppGateway>,
}

impl AppState {
    pub fn new(config: CmeiConfig, db: WaitlistDb) -> Self {
        let db = Arc::new(db);
        Self {
            workflow: Arc::new(Workflow::new(db.clone(), &config.fila)),
            webhook: WebhookDispatcher::new(config.notify.timeout_secs),
            whatsapp: WhatsAppGateway::from_config(&config.whatsapp, config.notify.timeout_secs),
            start_time: std::time::Instant::now(),
            db,
            config,
        }
    }

    /// Webhook URL from the settings table, falling back to the config file.
    pub fn webhook_url(&self) -> Result<Option<String>> {
        Ok(self
            .db
            .webhook_url()?
            .or_else(|| self.config.notify.webhook_url.clone().filter(|u| !u.trim().is_empty())))
    }
}

/// Operator resolved from the bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct Usuario(pub String);

/// Unknown tokens are 401; a failing token store is a server error.
fn authorize(verified: Result<Option<String>>) -> std::result::Result<Usuario, ApiError> {
    match verified {
        Ok(Some(usuario)) => Ok(Usuario(usuario)),
        Ok(None) => Err(ApiError::new(axum::http::StatusCode::UNAUTHORIZED, "Unauthorized")),
        Err(e) => Err(e.into()),
    }
}

/// Bearer auth middleware: resolves `Authorization: Bearer <token>` to a user.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let verified = match auth_header.strip_prefix("Bearer ") {
        Some(token) => state.db.verify_token(token.trim()),
        None => Ok(None),
    };

    match authorize(verified) {
        Ok(usuario) => {
            let mut req = req;
            req.extensions_mut().insert(usuario);
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!("Rejected request to {}", req.uri().path());
            e.into_response()
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    // Protected routes: bearer token required
    let protected = Router::new()
        .route("/api/cmeis", get(super::routes::list_cmeis).post(super::routes::create_cmei))
        .route("/api/turmas", get(super::routes::list_turmas).post(super::routes::create_turma))
        .route("/api/criancas", get(super::routes::list_criancas).post(super::routes::create_crianca))
        .route("/api/criancas/status-em-massa", post(super::routes::status_em_massa))
        .route("/api/criancas/{id}", get(super::routes::get_crianca))
        .route("/api/criancas/{id}/opcoes/{acao}", get(super::routes::action_options))
        .route("/api/criancas/{id}/convocar", post(super::routes::convocar))
        .route("/api/criancas/{id}/matricular", post(super::routes::matricular))
        .route("/api/criancas/{id}/realocar", post(super::routes::realocar))
        .route("/api/criancas/{id}/transferir", post(super::routes::transferir))
        .route("/api/criancas/{id}/remanejamento", post(super::routes::remanejamento))
        .route("/api/responsaveis/{cpf}", get(super::routes::get_responsavel))
        .route("/api/historico", get(super::routes::list_historico))
        .route("/api/dashboard", get(super::routes::dashboard))
        .route("/api/settings/webhook", put(super::routes::set_webhook))
        // Serverless-style endpoints
        .route("/functions/import-criancas", post(super::functions::import_criancas))
        .route("/functions/resend-notification", post(super::functions::resend_notification))
        .route("/functions/send-whatsapp", post(super::functions::send_whatsapp))
        .route_layer(axum::middleware::from_fn_with_state(shared.clone(), require_auth));

    // Public routes
    let public = Router::new().route("/health", get(super::routes::health_check));

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: CmeiConfig) -> anyhow::Result<()> {
    let db_path = config.database.expanded_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = WaitlistDb::open(&db_path)?;
    tracing::info!("Waitlist DB opened: {}", db_path.display());

    if !config.whatsapp.is_configured() {
        tracing::warn!("WhatsApp gateway not configured; /functions/send-whatsapp will answer 500");
    }

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(AppState::new(config, db));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("CMEI gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
