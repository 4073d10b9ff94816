//! API route handlers for the gateway.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use cmei_core::status::MassStatus;
use cmei_core::transition::{self, Action};
use cmei_core::types::{Cmei, ConvocacaoData, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Turma};
use cmei_notify::NotificationPayload;
use cmei_workflow::ActionOptions;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::server::{AppState, Usuario};

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cmei-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ---- Catalogue ----

pub async fn list_cmeis(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Cmei>> {
    Ok(Json(state.workflow.cache().cmeis().await?))
}

#[derive(Deserialize)]
pub struct CreateCmeiRequest {
    pub nome: String,
    #[serde(default)]
    pub endereco: String,
    #[serde(default)]
    pub telefone: String,
}

pub async fn create_cmei(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCmeiRequest>,
) -> std::result::Result<(StatusCode, Json<Cmei>), ApiError> {
    if req.nome.trim().is_empty() {
        return Err(ApiError::bad_request("nome is required"));
    }
    let cmei = state.db.create_cmei(req.nome.trim(), &req.endereco, &req.telefone)?;
    state.workflow.catalogo_alterado().await;
    Ok((StatusCode::CREATED, Json(cmei)))
}

pub async fn list_turmas(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Turma>> {
    Ok(Json(state.workflow.cache().turmas().await?))
}

#[derive(Deserialize)]
pub struct CreateTurmaRequest {
    pub cmei_id: String,
    pub nome: String,
    pub capacidade: u32,
}

pub async fn create_turma(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTurmaRequest>,
) -> std::result::Result<(StatusCode, Json<Turma>), ApiError> {
    let turma = state.db.create_turma(&req.cmei_id, req.nome.trim(), req.capacidade)?;
    state.workflow.catalogo_alterado().await;
    Ok((StatusCode::CREATED, Json(turma)))
}

// ---- Children ----

pub async fn list_criancas(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Crianca>> {
    Ok(Json(state.workflow.cache().criancas().await?))
}

pub async fn get_crianca(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Crianca> {
    Ok(Json(state.db.get_crianca(&id)?))
}

pub async fn create_crianca(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Json(nova): Json<NovaCrianca>,
) -> std::result::Result<(StatusCode, Json<Crianca>), ApiError> {
    let crianca = state.workflow.registrar_crianca(&nova, &usuario).await?;
    Ok((StatusCode::CREATED, Json(crianca)))
}

pub async fn get_responsavel(
    State(state): State<Arc<AppState>>,
    Path(cpf): Path<String>,
) -> ApiResult<Responsavel> {
    state
        .db
        .find_responsavel_by_cpf(&cpf)?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "No registration for this CPF"))
}

/// Turmas/CMEIs an operator may pick for `acao` on this child.
pub async fn action_options(
    State(state): State<Arc<AppState>>,
    Path((id, acao)): Path<(String, String)>,
) -> ApiResult<ActionOptions> {
    let action = Action::from_slug(&acao).ok_or_else(|| ApiError::bad_request(format!("Unknown action '{acao}'")))?;
    let crianca = state.db.get_crianca(&id)?;
    transition::check_transition(&crianca, &action).map_err(cmei_core::error::CmeiError::from)?;
    Ok(Json(cmei_workflow::modal::action_options(state.db.as_ref(), &crianca, &action).await?))
}

// ---- Workflow actions ----

pub async fn convocar(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Path(id): Path<String>,
    Json(selecao): Json<ConvocacaoData>,
) -> ApiResult<Crianca> {
    let crianca = state.db.get_crianca(&id)?;
    let updated = state.workflow.convocar(&crianca, &selecao, &usuario).await?;
    notify_convocacao(&state, &updated).await;
    Ok(Json(updated))
}

/// Fire-and-forget webhook for a fresh convocation.
async fn notify_convocacao(state: &Arc<AppState>, crianca: &Crianca) {
    let url = match state.webhook_url() {
        Ok(Some(url)) => url,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Could not read webhook URL: {e}");
            return;
        }
    };
    let state = state.clone();
    let crianca = crianca.clone();
    tokio::spawn(async move {
        let (cmeis, turmas) = match (state.workflow.cache().cmeis().await, state.workflow.cache().turmas().await) {
            (Ok(c), Ok(t)) => (c, t),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Convocation webhook skipped: {e}");
                return;
            }
        };
        let payload = NotificationPayload::for_crianca(&crianca, &cmeis, &turmas, false);
        if let Err(e) = state.webhook.send(&url, &payload).await {
            tracing::warn!("Convocation webhook for {} failed: {e}", crianca.id);
        }
    });
}

pub async fn matricular(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Path(id): Path<String>,
) -> ApiResult<Crianca> {
    let crianca = state.db.get_crianca(&id)?;
    Ok(Json(state.workflow.matricular(&crianca, &usuario).await?))
}

#[derive(Deserialize)]
pub struct TurmaRequest {
    #[serde(alias = "turma")]
    pub turma_id: String,
}

pub async fn realocar(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Path(id): Path<String>,
    Json(req): Json<TurmaRequest>,
) -> ApiResult<Crianca> {
    let crianca = state.db.get_crianca(&id)?;
    Ok(Json(state.workflow.realocar(&crianca, &req.turma_id, &usuario).await?))
}

pub async fn transferir(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Path(id): Path<String>,
    Json(req): Json<TurmaRequest>,
) -> ApiResult<Crianca> {
    let crianca = state.db.get_crianca(&id)?;
    Ok(Json(state.workflow.transferir(&crianca, &req.turma_id, &usuario).await?))
}

#[derive(Deserialize)]
pub struct RemanejamentoRequest {
    #[serde(alias = "cmei")]
    pub cmei_id: String,
    #[serde(default)]
    pub justificativa: String,
}

pub async fn remanejamento(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Path(id): Path<String>,
    Json(req): Json<RemanejamentoRequest>,
) -> ApiResult<Crianca> {
    let crianca = state.db.get_crianca(&id)?;
    let updated = state
        .workflow
        .solicitar_remanejamento(&crianca, &req.cmei_id, &req.justificativa, &usuario)
        .await?;
    Ok(Json(updated))
}

#[derive(Deserialize)]
pub struct MassStatusBody {
    pub ids: Vec<String>,
    pub status: MassStatus,
    #[serde(default)]
    pub justificativa: String,
}

pub async fn status_em_massa(
    State(state): State<Arc<AppState>>,
    Extension(Usuario(usuario)): Extension<Usuario>,
    Json(req): Json<MassStatusBody>,
) -> ApiResult<serde_json::Value> {
    let ack = state
        .workflow
        .alterar_status_em_massa(&req.ids, req.status, &req.justificativa, &usuario)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "affected": ack.affected,
        "status": req.status.status().as_str(),
    })))
}

// ---- History, dashboard, settings ----

#[derive(Deserialize)]
pub struct HistoricoQuery {
    pub crianca_id: Option<String>,
}

pub async fn list_historico(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoricoQuery>,
) -> ApiResult<Vec<HistoricoEntry>> {
    match q.crianca_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => Ok(Json(state.db.list_historico(Some(id))?)),
        None => Ok(Json(state.workflow.cache().historico().await?)),
    }
}

pub async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<serde_json::Value> {
    let counts = state.db.status_counts()?;
    let total: u32 = counts.iter().map(|c| c.total).sum();
    let media = state.db.calculate_average_wait_time()?;
    let turmas = state.workflow.cache().turmas().await?;
    let vagas: u32 = turmas.iter().map(Turma::vagas).sum();

    Ok(Json(serde_json::json!({
        "total": total,
        "por_status": counts,
        "tempo_medio_espera_dias": media,
        "vagas_disponiveis": vagas,
    })))
}

#[derive(Deserialize)]
pub struct WebhookSettings {
    pub url: String,
}

pub async fn set_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebhookSettings>,
) -> ApiResult<serde_json::Value> {
    let url = req.url.trim();
    if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::bad_request("Webhook URL must start with http:// or https://"));
    }
    state.db.set_webhook_url(url)?;
    tracing::info!("Webhook URL {}", if url.is_empty() { "cleared" } else { "updated" });
    Ok(Json(serde_json::json!({"success": true, "url": url})))
}
