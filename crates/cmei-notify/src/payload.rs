//! Status notification payload posted to the system webhook.

use chrono::{DateTime, Utc};
use cmei_core::types::{Cmei, Crianca, Turma};
use serde::{Deserialize, Serialize};

/// Fixed-shape payload. Field names are part of the webhook contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub crianca_id: String,
    pub status: String,
    pub responsavel_nome: String,
    pub responsavel_telefone: String,
    pub responsavel_email: Option<String>,
    pub cmei_nome: Option<String>,
    pub turma_nome: Option<String>,
    pub convocacao_deadline: Option<DateTime<Utc>>,
    pub data_acao: DateTime<Utc>,
    pub is_resend: bool,
}

impl NotificationPayload {
    /// Build the payload for `crianca`. The placement named is the pending
    /// convocation if any, otherwise the current one.
    pub fn for_crianca(crianca: &Crianca, cmeis: &[Cmei], turmas: &[Turma], is_resend: bool) -> Self {
        let (cmei_id, turma_id) = match &crianca.convocacao {
            Some(conv) => (Some(conv.cmei_id.as_str()), Some(conv.turma_id.as_str())),
            None => (crianca.cmei_atual_id.as_deref(), crianca.turma_atual_id.as_deref()),
        };

        Self {
            crianca_id: crianca.id.clone(),
            status: crianca.status.to_string(),
            responsavel_nome: crianca.responsavel.nome.clone(),
            responsavel_telefone: crianca.responsavel.telefone.clone(),
            responsavel_email: crianca.responsavel.email.clone(),
            cmei_nome: cmei_id.and_then(|id| cmeis.iter().find(|c| c.id == id)).map(|c| c.nome.clone()),
            turma_nome: turma_id.and_then(|id| turmas.iter().find(|t| t.id == id)).map(|t| t.nome.clone()),
            convocacao_deadline: crianca.convocacao.as_ref().map(|c| c.deadline),
            data_acao: Utc::now(),
            is_resend,
        }
    }
}
