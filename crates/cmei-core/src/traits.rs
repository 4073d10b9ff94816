//! Backend contract consumed by the workflow layer.
//!
//! The hosted relational store is a black box: row-level reads and
//! inserts, one atomic call per status/location mutation, one atomic call
//! per mass status change, and the two stored procedures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::status::MassStatus;
use crate::transition::Action;
use crate::types::{Cmei, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Turma};

/// Location/status change carried by a single-child mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo", rename_all = "snake_case")]
pub enum MutationChange {
    Convocar {
        cmei_id: String,
        turma_id: String,
        deadline: DateTime<Utc>,
    },
    Matricular,
    Realocar { turma_id: String },
    Transferir { turma_id: String },
    Remanejamento { cmei_id: String },
}

impl MutationChange {
    pub fn action(&self) -> Action {
        match self {
            MutationChange::Convocar { .. } => Action::Convocar,
            MutationChange::Matricular => Action::Matricular,
            MutationChange::Realocar { .. } => Action::Realocar,
            MutationChange::Transferir { .. } => Action::Transferir,
            MutationChange::Remanejamento { .. } => Action::Remanejamento,
        }
    }
}

/// One single-child mutation; the store commits it (and its history row)
/// atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub crianca_id: String,
    pub change: MutationChange,
    pub justificativa: Option<String>,
    pub usuario: String,
}

/// One status applied to many children in a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassStatusRequest {
    pub ids: Vec<String>,
    pub status: MassStatus,
    pub justificativa: String,
    pub usuario: String,
}

/// Aggregate acknowledgment of a mass change; no per-child results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassAck {
    pub affected: usize,
}

/// Waitlist backend (tables `criancas`, `turmas`, `cmeis`, `historico`
/// plus the `recalculate_fila_posicao` / `calculate_average_wait_time`
/// procedures).
#[async_trait]
pub trait WaitlistBackend: Send + Sync {
    async fn list_cmeis(&self) -> Result<Vec<Cmei>>;

    async fn list_turmas(&self) -> Result<Vec<Turma>>;

    /// Children ordered by queue position, then registration date.
    async fn list_criancas(&self) -> Result<Vec<Crianca>>;

    async fn get_crianca(&self, id: &str) -> Result<Crianca>;

    /// Contact fields of the most recent child registered under `cpf`.
    async fn find_responsavel_by_cpf(&self, cpf: &str) -> Result<Option<Responsavel>>;

    /// Insert a child in `Fila de Espera`. Does not touch queue positions.
    async fn insert_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca>;

    /// History rows, newest first, optionally for one child.
    async fn list_historico(&self, crianca_id: Option<&str>) -> Result<Vec<HistoricoEntry>>;

    async fn append_historico(
        &self,
        crianca_id: &str,
        acao: &str,
        detalhes: &str,
        usuario: &str,
    ) -> Result<HistoricoEntry>;

    async fn apply_mutation(&self, request: &MutationRequest) -> Result<Crianca>;

    async fn apply_mass_status(&self, request: &MassStatusRequest) -> Result<MassAck>;

    async fn recalculate_fila_posicao(&self) -> Result<()>;

    /// Average days from registration to enrollment, if anyone was enrolled.
    async fn calculate_average_wait_time(&self) -> Result<Option<f64>>;
}
