//! Child status taxonomy.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Placement status of a child. A child has exactly one at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Waiting in the queue.
    #[serde(rename = "Fila de Espera")]
    FilaDeEspera,
    /// Summoned to a placement, with a response deadline.
    Convocado,
    /// Enrolled in a CMEI/turma.
    #[serde(alias = "Matriculada")]
    Matriculado,
    /// Family withdrew.
    Desistente,
    /// Family refused the placement.
    Recusada,
    /// Reassignment to another CMEI requested, pending staff action.
    #[serde(rename = "Remanejamento Solicitado")]
    RemanejamentoSolicitado,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::FilaDeEspera,
        Status::Convocado,
        Status::Matriculado,
        Status::Desistente,
        Status::Recusada,
        Status::RemanejamentoSolicitado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::FilaDeEspera => "Fila de Espera",
            Status::Convocado => "Convocado",
            Status::Matriculado => "Matriculado",
            Status::Desistente => "Desistente",
            Status::Recusada => "Recusada",
            Status::RemanejamentoSolicitado => "Remanejamento Solicitado",
        }
    }

    /// Statuses from which relocation, transfer and reassignment are possible.
    pub fn is_active(&self) -> bool {
        !matches!(self, Status::Desistente | Status::Recusada)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Fila de Espera" => Ok(Status::FilaDeEspera),
            "Convocado" => Ok(Status::Convocado),
            "Matriculado" | "Matriculada" => Ok(Status::Matriculado),
            "Desistente" => Ok(Status::Desistente),
            "Recusada" => Ok(Status::Recusada),
            "Remanejamento Solicitado" => Ok(Status::RemanejamentoSolicitado),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// Queue tier. `FimDeFila` marks a penalized requeue, which otherwise
/// shares the `Fila de Espera` status with a fresh registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrioridadeFila {
    #[default]
    Normal,
    FimDeFila,
}

impl PrioridadeFila {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrioridadeFila::Normal => "normal",
            PrioridadeFila::FimDeFila => "fim_de_fila",
        }
    }
}

impl FromStr for PrioridadeFila {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(PrioridadeFila::Normal),
            "fim_de_fila" => Ok(PrioridadeFila::FimDeFila),
            other => Err(format!("unknown queue tier '{other}'")),
        }
    }
}

/// Targets accepted by the mass status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MassStatus {
    Desistente,
    Recusada,
    /// Back to `Fila de Espera` with the end-of-queue penalty.
    #[serde(rename = "Fim de Fila")]
    FimDeFila,
    #[serde(rename = "Remanejamento Solicitado")]
    RemanejamentoSolicitado,
}

impl MassStatus {
    /// Status value written to every selected child.
    pub fn status(&self) -> Status {
        match self {
            MassStatus::Desistente => Status::Desistente,
            MassStatus::Recusada => Status::Recusada,
            MassStatus::FimDeFila => Status::FilaDeEspera,
            MassStatus::RemanejamentoSolicitado => Status::RemanejamentoSolicitado,
        }
    }

    pub fn prioridade(&self) -> Option<PrioridadeFila> {
        match self {
            MassStatus::FimDeFila => Some(PrioridadeFila::FimDeFila),
            _ => None,
        }
    }

    /// Action label recorded in the history log.
    pub fn label(&self) -> &'static str {
        match self {
            MassStatus::Desistente => "Desistência",
            MassStatus::Recusada => "Recusa",
            MassStatus::FimDeFila => "Fim de Fila",
            MassStatus::RemanejamentoSolicitado => "Remanejamento Solicitado",
        }
    }

    /// Whether the child leaves its placement and any pending convocation.
    pub fn releases_seat(&self) -> bool {
        !matches!(self, MassStatus::RemanejamentoSolicitado)
    }
}
