//! CSV intake.
//!
//! Rows are imported one by one and failures are reported per row; rows
//! that succeeded stay committed. Queue positions are recalculated once
//! after the batch.

use chrono::NaiveDate;
use cmei_core::error::{CmeiError, Result};
use cmei_core::traits::WaitlistBackend;
use cmei_core::types::{Cmei, NovaCrianca, Responsavel, Sexo};
use cmei_core::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const REQUIRED: [&str; 7] = [
    "nome",
    "data_nascimento",
    "sexo",
    "cmei1_preferencia",
    "responsavel_nome",
    "responsavel_cpf",
    "responsavel_telefone",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub message: String,
    pub results: ImportResults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResults {
    pub total_records: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// Line in the file; the header is line 1.
    pub row: usize,
    pub error: String,
}

/// Split CSV text into records. Handles quoted fields, `""` escapes and
/// CRLF line endings. Blank lines are skipped.
pub fn parse_csv(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.iter().any(|f| !f.trim().is_empty()) {
        records.push(record);
    }
}

/// `;` when the header line has more semicolons than commas.
fn detect_delimiter(content: &str) -> char {
    let header = content.lines().next().unwrap_or_default();
    if header.matches(';').count() > header.matches(',').count() { ';' } else { ',' }
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "" | "não" | "nao" | "n" | "false" | "0" => Ok(false),
        "sim" | "s" | "true" | "1" => Ok(true),
        other => Err(format!("Invalid yes/no value '{other}'")),
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .map_err(|_| format!("Invalid date '{value}'"))
}

/// Match a CMEI by name (case-insensitive) or by id.
fn resolve_cmei(value: &str, cmeis: &[Cmei]) -> std::result::Result<String, String> {
    let wanted = value.trim().to_lowercase();
    cmeis
        .iter()
        .find(|c| c.nome.to_lowercase() == wanted || c.id == value.trim())
        .map(|c| c.id.clone())
        .ok_or_else(|| format!("CMEI not found: {}", value.trim()))
}

fn optional(row: &HashMap<&str, &str>, key: &str) -> Option<String> {
    row.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()).map(String::from)
}

/// Build the intake payload for one CSV row.
fn row_to_nova(row: &HashMap<&str, &str>, cmeis: &[Cmei]) -> std::result::Result<NovaCrianca, String> {
    let get = |key: &str| row.get(key).map(|v| v.trim()).unwrap_or_default();

    let missing: Vec<&'static str> = REQUIRED.into_iter().filter(|k| get(*k).is_empty()).collect();
    if !missing.is_empty() {
        return Err(ValidationError::CamposObrigatorios(missing).to_string());
    }

    let sexo = Sexo::parse(get("sexo")).ok_or_else(|| format!("Invalid sexo '{}'", get("sexo")))?;
    let cmei2_preferencia = match optional(row, "cmei2_preferencia") {
        Some(nome) => Some(resolve_cmei(&nome, cmeis)?),
        None => None,
    };

    Ok(NovaCrianca {
        nome: get("nome").to_string(),
        data_nascimento: parse_date(get("data_nascimento"))?,
        sexo,
        programas_sociais: parse_bool(get("programas_sociais"))?,
        aceita_qualquer_cmei: parse_bool(get("aceita_qualquer_cmei"))?,
        cmei1_preferencia: resolve_cmei(get("cmei1_preferencia"), cmeis)?,
        cmei2_preferencia,
        responsavel: Responsavel {
            nome: get("responsavel_nome").to_string(),
            cpf: get("responsavel_cpf").to_string(),
            telefone: get("responsavel_telefone").to_string(),
            telefone2: optional(row, "responsavel_telefone2"),
            email: optional(row, "responsavel_email"),
            endereco: get("endereco").to_string(),
            bairro: get("bairro").to_string(),
        },
        observacoes: optional(row, "observacoes"),
    })
}

/// Import every data row of `csv`. Only an unreadable file or a failed
/// queue recalculation fails the whole call.
pub async fn import_criancas<B: WaitlistBackend + ?Sized>(backend: &B, csv: &str, usuario: &str) -> Result<ImportReport> {
    let csv = csv.trim_start_matches('\u{feff}');
    let mut records = parse_csv(csv, detect_delimiter(csv)).into_iter();
    let header: Vec<String> = records
        .next()
        .ok_or_else(|| CmeiError::Rejected("CSV content is empty".into()))?
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let cmeis = backend.list_cmeis().await?;
    let mut results = ImportResults {
        total_records: 0,
        success_count: 0,
        error_count: 0,
        errors: Vec::new(),
    };

    for (index, record) in records.enumerate() {
        results.total_records += 1;
        let row: HashMap<&str, &str> = header
            .iter()
            .map(String::as_str)
            .zip(record.iter().map(String::as_str))
            .collect();

        let outcome = match row_to_nova(&row, &cmeis) {
            Ok(nova) => backend.insert_crianca(&nova, usuario).await.map_err(|e| e.user_message()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(_) => results.success_count += 1,
            Err(error) => {
                tracing::warn!("Import row {} rejected: {error}", index + 2);
                results.error_count += 1;
                results.errors.push(RowError { row: index + 2, error });
            }
        }
    }

    backend.recalculate_fila_posicao().await?;
    tracing::info!(
        "CSV import by {usuario}: {} of {} record(s) imported",
        results.success_count,
        results.total_records
    );

    Ok(ImportReport {
        message: format!(
            "Import completed: {} of {} records imported",
            results.success_count, results.total_records
        ),
        results,
    })
}
