//! Transition rules between statuses and the option filters each action uses.

use serde::{Deserialize, Serialize};

use crate::status::{MassStatus, Status};
use crate::types::{Cmei, Crianca, Turma};

/// A workflow action an operator can take on a child (or a selection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Convocar,
    Matricular,
    Realocar,
    Transferir,
    Remanejamento,
    StatusEmMassa(MassStatus),
}

impl Action {
    /// Parse the per-child action slug used in routes.
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "convocar" => Some(Action::Convocar),
            "matricular" => Some(Action::Matricular),
            "realocar" => Some(Action::Realocar),
            "transferir" => Some(Action::Transferir),
            "remanejamento" => Some(Action::Remanejamento),
            _ => None,
        }
    }

    /// Label written to the history log.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Convocar => "Convocação",
            Action::Matricular => "Matrícula",
            Action::Realocar => "Realocação",
            Action::Transferir => "Transferência",
            Action::Remanejamento => "Remanejamento Solicitado",
            Action::StatusEmMassa(m) => m.label(),
        }
    }

    /// Destructive or administrative actions need a justificativa.
    pub fn requires_justificativa(&self) -> bool {
        matches!(self, Action::Remanejamento | Action::StatusEmMassa(_))
    }

    /// Statuses from which a per-child action is permitted. `None` means any
    /// active status.
    fn allowed_from(&self) -> Option<&'static [Status]> {
        match self {
            Action::Convocar => Some(&[Status::FilaDeEspera]),
            Action::Matricular => Some(&[Status::Convocado]),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("{action} is not allowed for status '{from}'")]
    NotAllowed { action: Action, from: Status },

    #[error("{action} requires a child with a current CMEI")]
    NoCurrentCmei { action: Action },
}

/// Decide whether `action` may be applied to `crianca` in its current state.
pub fn check_transition(crianca: &Crianca, action: &Action) -> Result<(), TransitionError> {
    let from = crianca.status;
    if *action == Action::Convocar && crianca.aguarda_vaga() {
        return Ok(());
    }
    if let Some(allowed) = action.allowed_from() {
        if !allowed.contains(&from) {
            return Err(TransitionError::NotAllowed { action: *action, from });
        }
        return Ok(());
    }

    match action {
        Action::StatusEmMassa(_) => Ok(()),
        _ if !from.is_active() => Err(TransitionError::NotAllowed { action: *action, from }),
        Action::Realocar | Action::Transferir if crianca.cmei_atual().is_none() => {
            Err(TransitionError::NoCurrentCmei { action: *action })
        }
        _ => Ok(()),
    }
}

/// A turma offered in an action form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurmaOption {
    pub turma_id: String,
    pub turma_nome: String,
    pub cmei_id: String,
    pub cmei_nome: String,
    pub vagas: u32,
    /// Only turmas with free seats, other than the child's own, can be picked.
    pub selectable: bool,
}

/// Turmas offered for `action` on `crianca`.
///
/// Relocation stays inside the current CMEI, transfer leaves it, and
/// convocation may target any turma. Other actions take no turma.
pub fn turma_options(action: &Action, crianca: &Crianca, turmas: &[Turma], cmeis: &[Cmei]) -> Vec<TurmaOption> {
    let current = crianca.cmei_atual();
    let keep = |t: &Turma| match action {
        Action::Convocar => true,
        Action::Realocar => current == Some(t.cmei_id.as_str()),
        Action::Transferir => current.is_some_and(|c| c != t.cmei_id),
        _ => false,
    };

    turmas
        .iter()
        .filter(|t| keep(t))
        .map(|t| TurmaOption {
            selectable: t.vagas() > 0 && crianca.turma_atual_id.as_deref() != Some(t.id.as_str()),
            turma_id: t.id.clone(),
            turma_nome: t.nome.clone(),
            cmei_id: t.cmei_id.clone(),
            cmei_nome: cmeis
                .iter()
                .find(|c| c.id == t.cmei_id)
                .map(|c| c.nome.clone())
                .unwrap_or_default(),
            vagas: t.vagas(),
        })
        .collect()
}

/// Destination CMEIs for a reassignment request: every CMEI but the current one.
pub fn cmei_options<'a>(crianca: &Crianca, cmeis: &'a [Cmei]) -> Vec<&'a Cmei> {
    cmeis
        .iter()
        .filter(|c| crianca.cmei_atual() != Some(c.id.as_str()))
        .collect()
}
