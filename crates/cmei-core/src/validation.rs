//! Client-side validation performed before any backend call.

use chrono::Utc;

use crate::cpf;
use crate::types::NovaCrianca;

/// Minimum length of a justificativa, in characters of the trimmed text.
pub const JUSTIFICATIVA_MIN_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Justification must have at least {min} characters")]
    JustificativaCurta { min: usize },

    #[error("Missing selection: {0}")]
    SelecaoAusente(&'static str),

    #[error("Selected option is not available for this action")]
    OpcaoIndisponivel,

    #[error("No children selected")]
    SelecaoVazia,

    #[error("Missing required fields: {}", .0.join(", "))]
    CamposObrigatorios(Vec<&'static str>),

    #[error("Invalid CPF")]
    CpfInvalido,

    #[error("Invalid value for {field}: {value}")]
    ValorInvalido { field: &'static str, value: String },
}

pub fn validate_justificativa(text: &str) -> Result<(), ValidationError> {
    if text.trim().chars().count() < JUSTIFICATIVA_MIN_CHARS {
        return Err(ValidationError::JustificativaCurta { min: JUSTIFICATIVA_MIN_CHARS });
    }
    Ok(())
}

/// Non-empty identifier picked in a form.
pub fn require_selection(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::SelecaoAusente(field));
    }
    Ok(())
}

/// Validate the intake form.
pub fn validate_nova_crianca(nova: &NovaCrianca) -> Result<(), ValidationError> {
    let mut missing = Vec::new();
    if nova.nome.trim().is_empty() {
        missing.push("nome");
    }
    if nova.cmei1_preferencia.trim().is_empty() {
        missing.push("cmei1_preferencia");
    }
    if nova.responsavel.nome.trim().is_empty() {
        missing.push("responsavel_nome");
    }
    if nova.responsavel.cpf.trim().is_empty() {
        missing.push("responsavel_cpf");
    }
    if nova.responsavel.telefone.trim().is_empty() {
        missing.push("responsavel_telefone");
    }
    if !missing.is_empty() {
        return Err(ValidationError::CamposObrigatorios(missing));
    }
    if !cpf::is_valid(&nova.responsavel.cpf) {
        return Err(ValidationError::CpfInvalido);
    }
    if nova.data_nascimento > Utc::now().date_naive() {
        return Err(ValidationError::ValorInvalido {
            field: "data_nascimento",
            value: nova.data_nascimento.to_string(),
        });
    }
    if nova.cmei2_preferencia.as_deref() == Some(nova.cmei1_preferencia.as_str()) {
        return Err(ValidationError::ValorInvalido {
            field: "cmei2_preferencia",
            value: nova.cmei1_preferencia.clone(),
        });
    }
    Ok(())
}
