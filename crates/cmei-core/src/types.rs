//! Data model: CMEIs, turmas, children and the history log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{PrioridadeFila, Status};

/// Municipal daycare unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cmei {
    pub id: String,
    pub nome: String,
    #[serde(default)]
    pub endereco: String,
    #[serde(default)]
    pub telefone: String,
}

/// Classroom within a CMEI. `ocupacao <= capacidade` is enforced by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turma {
    pub id: String,
    pub cmei_id: String,
    pub nome: String,
    pub capacidade: u32,
    #[serde(default)]
    pub ocupacao: u32,
}

impl Turma {
    pub fn vagas(&self) -> u32 {
        self.capacidade.saturating_sub(self.ocupacao)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sexo {
    M,
    F,
}

impl Sexo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sexo::M => "M",
            Sexo::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "M" | "MASCULINO" => Some(Sexo::M),
            "F" | "FEMININO" => Some(Sexo::F),
            _ => None,
        }
    }
}

/// Responsible party contact fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Responsavel {
    pub nome: String,
    pub cpf: String,
    pub telefone: String,
    #[serde(default)]
    pub telefone2: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub endereco: String,
    #[serde(default)]
    pub bairro: String,
}

/// Pending placement created by a convocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convocacao {
    pub cmei_id: String,
    pub turma_id: String,
    pub deadline: DateTime<Utc>,
}

/// Selection handed from the convocation form to the mutation call.
/// Accepts the legacy `{cmei, turma}` shape as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvocacaoData {
    #[serde(alias = "cmei")]
    pub cmei_id: String,
    #[serde(alias = "turma")]
    pub turma_id: String,
}

/// Child record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crianca {
    pub id: String,
    pub nome: String,
    pub data_nascimento: NaiveDate,
    pub sexo: Sexo,
    pub programas_sociais: bool,
    pub aceita_qualquer_cmei: bool,
    pub cmei1_preferencia: String,
    pub cmei2_preferencia: Option<String>,
    pub cmei_atual_id: Option<String>,
    pub turma_atual_id: Option<String>,
    pub convocacao: Option<Convocacao>,
    pub remanejamento_cmei_id: Option<String>,
    pub status: Status,
    pub prioridade: PrioridadeFila,
    pub fila_posicao: Option<u32>,
    pub responsavel: Responsavel,
    pub observacoes: Option<String>,
    pub data_inscricao: DateTime<Utc>,
    pub data_matricula: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Crianca {
    /// CMEI the child currently occupies, if any.
    pub fn cmei_atual(&self) -> Option<&str> {
        self.cmei_atual_id.as_deref()
    }

    /// Still waiting for a seat: queued, or a reassignment request from a
    /// child with neither a placement nor a pending convocation.
    pub fn aguarda_vaga(&self) -> bool {
        match self.status {
            Status::FilaDeEspera => true,
            Status::RemanejamentoSolicitado => self.cmei_atual_id.is_none() && self.convocacao.is_none(),
            _ => false,
        }
    }

    /// Preferred CMEIs in order.
    pub fn preferencias(&self) -> Vec<&str> {
        std::iter::once(self.cmei1_preferencia.as_str())
            .chain(self.cmei2_preferencia.as_deref())
            .collect()
    }
}

/// Intake form payload. New children always start in `Fila de Espera`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NovaCrianca {
    pub nome: String,
    pub data_nascimento: NaiveDate,
    pub sexo: Sexo,
    #[serde(default)]
    pub programas_sociais: bool,
    #[serde(default)]
    pub aceita_qualquer_cmei: bool,
    pub cmei1_preferencia: String,
    #[serde(default)]
    pub cmei2_preferencia: Option<String>,
    pub responsavel: Responsavel,
    #[serde(default)]
    pub observacoes: Option<String>,
}

/// Append-only history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricoEntry {
    pub id: i64,
    pub crianca_id: String,
    pub acao: String,
    pub detalhes: String,
    pub usuario: String,
    pub created_at: DateTime<Utc>,
}
