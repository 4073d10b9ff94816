//! Waitlist SQLite database.
//!
//! Tables: `cmeis`, `turmas`, `criancas`, `historico` (append-only),
//! `settings` (key/value, holds the system webhook URL) and `api_tokens`
//! (SHA-256 hashes of bearer tokens).

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use cmei_core::error::{CmeiError, Result};
use cmei_core::status::{MassStatus, PrioridadeFila, Status};
use cmei_core::traits::{MassAck, MassStatusRequest, MutationChange, MutationRequest};
use cmei_core::transition::{self, Action};
use cmei_core::types::{Cmei, Convocacao, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Sexo, Turma};
use cmei_core::{cpf, validation};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

/// Waitlist database.
pub struct WaitlistDb {
    conn: Mutex<Connection>,
}

/// Number of children per status, for the dashboard.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StatusCount {
    pub status: Status,
    pub total: u32,
}

/// Shared SELECT column list for child queries.
const CRIANCA_SELECT: &str = "SELECT id, nome, data_nascimento, sexo, programas_sociais, aceita_qualquer_cmei,
    cmei1_preferencia, cmei2_preferencia, cmei_atual_id, turma_atual_id,
    convocacao_cmei_id, convocacao_turma_id, convocacao_deadline, remanejamento_cmei_id,
    status, prioridade, fila_posicao,
    responsavel_nome, responsavel_cpf, responsavel_telefone, responsavel_telefone2, responsavel_email,
    endereco, bairro, observacoes, data_inscricao, data_matricula, updated_at
    FROM criancas";

const WEBHOOK_URL_KEY: &str = "webhook_url";

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now_str() -> String {
    fmt_ts(Utc::now())
}

fn text_err(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| text_err(idx, e))
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(idx, &s)
}

fn opt_ts_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(idx, &s)).transpose()
}

/// Map a database row to a Crianca.
fn row_to_crianca(row: &Row) -> rusqlite::Result<Crianca> {
    let nascimento: String = row.get(2)?;
    let sexo: String = row.get(3)?;
    let status: String = row.get(14)?;
    let prioridade: String = row.get(15)?;

    let convocacao = match (
        row.get::<_, Option<String>>(10)?,
        row.get::<_, Option<String>>(11)?,
        opt_ts_col(row, 12)?,
    ) {
        (Some(cmei_id), Some(turma_id), Some(deadline)) => Some(Convocacao { cmei_id, turma_id, deadline }),
        _ => None,
    };

    Ok(Crianca {
        id: row.get(0)?,
        nome: row.get(1)?,
        data_nascimento: NaiveDate::parse_from_str(&nascimento, "%Y-%m-%d").map_err(|e| text_err(2, e))?,
        sexo: Sexo::parse(&sexo).ok_or_else(|| text_err(3, format!("invalid sexo '{sexo}'")))?,
        programas_sociais: row.get::<_, i32>(4)? != 0,
        aceita_qualquer_cmei: row.get::<_, i32>(5)? != 0,
        cmei1_preferencia: row.get(6)?,
        cmei2_preferencia: row.get(7)?,
        cmei_atual_id: row.get(8)?,
        turma_atual_id: row.get(9)?,
        convocacao,
        remanejamento_cmei_id: row.get(13)?,
        status: status.parse().map_err(|e: String| text_err(14, e))?,
        prioridade: prioridade.parse().map_err(|e: String| text_err(15, e))?,
        fila_posicao: row.get(16)?,
        responsavel: Responsavel {
            nome: row.get(17)?,
            cpf: row.get(18)?,
            telefone: row.get(19)?,
            telefone2: row.get(20)?,
            email: row.get(21)?,
            endereco: row.get(22)?,
            bairro: row.get(23)?,
        },
        observacoes: row.get(24)?,
        data_inscricao: ts_col(row, 25)?,
        data_matricula: opt_ts_col(row, 26)?,
        updated_at: ts_col(row, 27)?,
    })
}

fn row_to_turma(row: &Row) -> rusqlite::Result<Turma> {
    Ok(Turma {
        id: row.get(0)?,
        cmei_id: row.get(1)?,
        nome: row.get(2)?,
        capacidade: row.get(3)?,
        ocupacao: row.get(4)?,
    })
}

fn row_to_historico(row: &Row) -> rusqlite::Result<HistoricoEntry> {
    Ok(HistoricoEntry {
        id: row.get(0)?,
        crianca_id: row.get(1)?,
        acao: row.get(2)?,
        detalhes: row.get(3)?,
        usuario: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> CmeiError + '_ {
    move |e| CmeiError::Database(format!("{context}: {e}"))
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Transaction helpers ──────────────────────────────

fn tx_get_crianca(tx: &Connection, id: &str) -> Result<Crianca> {
    tx.query_row(&format!("{CRIANCA_SELECT} WHERE id=?1"), params![id], row_to_crianca)
        .optional()
        .map_err(db_err("Get crianca"))?
        .ok_or_else(|| CmeiError::NotFound(format!("crianca {id}")))
}

fn tx_get_turma(tx: &Connection, id: &str) -> Result<Turma> {
    tx.query_row(
        "SELECT id, cmei_id, nome, capacidade, ocupacao FROM turmas WHERE id=?1",
        params![id],
        row_to_turma,
    )
    .optional()
    .map_err(db_err("Get turma"))?
    .ok_or_else(|| CmeiError::NotFound(format!("turma {id}")))
}

fn tx_cmei_nome(tx: &Connection, id: &str) -> Result<String> {
    tx.query_row("SELECT nome FROM cmeis WHERE id=?1", params![id], |r| r.get(0))
        .optional()
        .map_err(db_err("Get cmei"))?
        .ok_or_else(|| CmeiError::NotFound(format!("cmei {id}")))
}

/// Occupy one seat; the store is the only place capacity is enforced.
fn take_seat(tx: &Connection, turma: &Turma) -> Result<()> {
    let updated = tx
        .execute(
            "UPDATE turmas SET ocupacao = ocupacao + 1 WHERE id=?1 AND ocupacao < capacidade",
            params![turma.id],
        )
        .map_err(db_err("Take seat"))?;
    if updated == 0 {
        return Err(CmeiError::Rejected(format!("Turma '{}' has no free seats", turma.nome)));
    }
    Ok(())
}

fn release_seat(tx: &Connection, turma_id: &str) -> Result<()> {
    tx.execute(
        "UPDATE turmas SET ocupacao = MAX(ocupacao - 1, 0) WHERE id=?1",
        params![turma_id],
    )
    .map_err(db_err("Release seat"))?;
    Ok(())
}

/// Seat held by a child: the enrolled turma or the one reserved by a convocation.
fn held_seat(c: &Crianca) -> Option<&str> {
    c.turma_atual_id
        .as_deref()
        .or(c.convocacao.as_ref().map(|conv| conv.turma_id.as_str()))
}

fn tx_append_historico(tx: &Connection, crianca_id: &str, acao: &str, detalhes: &str, usuario: &str) -> Result<i64> {
    tx.execute(
        "INSERT INTO historico (crianca_id, acao, detalhes, usuario, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![crianca_id, acao, detalhes, usuario, now_str()],
    )
    .map_err(db_err("Insert historico"))?;
    Ok(tx.last_insert_rowid())
}

/// Children holding a queue position: waiting, or asking for reassignment
/// before any placement or convocation.
const AGUARDA_VAGA: &str = "status = 'Fila de Espera'
    OR (status = 'Remanejamento Solicitado' AND cmei_atual_id IS NULL AND convocacao_turma_id IS NULL)";

/// Gives back the seat reserved by a pending convocation of a child with no
/// placement, and clears the convocation.
fn tx_drop_convocacao(tx: &Connection, c: &Crianca) -> Result<()> {
    if c.turma_atual_id.is_some() {
        return Ok(());
    }
    if let Some(conv) = &c.convocacao {
        release_seat(tx, &conv.turma_id)?;
        tx.execute(
            "UPDATE criancas SET convocacao_cmei_id=NULL, convocacao_turma_id=NULL, convocacao_deadline=NULL
             WHERE id=?1",
            params![c.id],
        )
        .map_err(db_err("Drop convocacao"))?;
    }
    Ok(())
}

/// Queue order: normal tier before end-of-queue penalties, social-program
/// beneficiaries first within a tier, then registration date.
fn tx_recalculate_fila(tx: &Connection) -> Result<usize> {
    let ids: Vec<String> = {
        let mut stmt = tx
            .prepare(
                &format!(
                    "SELECT id FROM criancas WHERE {AGUARDA_VAGA}
                     ORDER BY CASE prioridade WHEN 'fim_de_fila' THEN 1 ELSE 0 END,
                              programas_sociais DESC, data_inscricao ASC, rowid ASC"
                ),
            )
            .map_err(db_err("Prepare fila"))?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .map_err(db_err("Query fila"))?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err("Read fila"))?
    };

    tx.execute(
        &format!("UPDATE criancas SET fila_posicao = NULL WHERE NOT ({AGUARDA_VAGA})"),
        [],
    )
    .map_err(db_err("Clear fila"))?;
    for (pos, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE criancas SET fila_posicao = ?1 WHERE id = ?2",
            params![pos as i64 + 1, id],
        )
        .map_err(db_err("Set fila_posicao"))?;
    }
    Ok(ids.len())
}

impl WaitlistDb {
    /// Open or create the waitlist database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err("DB open error"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err("DB pragma error"))?;

        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CmeiError::Database(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cmeis (
                id TEXT PRIMARY KEY,
                nome TEXT UNIQUE NOT NULL,
                endereco TEXT DEFAULT '',
                telefone TEXT DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS turmas (
                id TEXT PRIMARY KEY,
                cmei_id TEXT NOT NULL REFERENCES cmeis(id),
                nome TEXT NOT NULL,
                capacidade INTEGER NOT NULL,
                ocupacao INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                CHECK (ocupacao <= capacidade)
            );

            CREATE TABLE IF NOT EXISTS criancas (
                id TEXT PRIMARY KEY,
                nome TEXT NOT NULL,
                data_nascimento TEXT NOT NULL,
                sexo TEXT NOT NULL,
                programas_sociais INTEGER DEFAULT 0,
                aceita_qualquer_cmei INTEGER DEFAULT 0,
                cmei1_preferencia TEXT NOT NULL REFERENCES cmeis(id),
                cmei2_preferencia TEXT REFERENCES cmeis(id),
                cmei_atual_id TEXT REFERENCES cmeis(id),
                turma_atual_id TEXT REFERENCES turmas(id),
                convocacao_cmei_id TEXT REFERENCES cmeis(id),
                convocacao_turma_id TEXT REFERENCES turmas(id),
                convocacao_deadline TEXT,
                remanejamento_cmei_id TEXT REFERENCES cmeis(id),
                status TEXT NOT NULL DEFAULT 'Fila de Espera',
                prioridade TEXT NOT NULL DEFAULT 'normal',
                fila_posicao INTEGER,
                responsavel_nome TEXT NOT NULL,
                responsavel_cpf TEXT NOT NULL,
                responsavel_telefone TEXT NOT NULL,
                responsavel_telefone2 TEXT,
                responsavel_email TEXT,
                endereco TEXT DEFAULT '',
                bairro TEXT DEFAULT '',
                observacoes TEXT,
                data_inscricao TEXT NOT NULL,
                data_matricula TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_criancas_status ON criancas(status);
            CREATE INDEX IF NOT EXISTS idx_criancas_cpf ON criancas(responsavel_cpf);

            CREATE TABLE IF NOT EXISTS historico (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crianca_id TEXT NOT NULL REFERENCES criancas(id),
                acao TEXT NOT NULL,
                detalhes TEXT DEFAULT '',
                usuario TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_historico_crianca ON historico(crianca_id);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT DEFAULT '',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token_hash TEXT PRIMARY KEY,
                usuario TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
        ",
        )
        .map_err(db_err("Migration error"))?;
        Ok(())
    }

    // ── CMEIs & turmas ──────────────────────────────

    pub fn create_cmei(&self, nome: &str, endereco: &str, telefone: &str) -> Result<Cmei> {
        validation::require_selection(nome, "nome")?;
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cmeis (id, nome, endereco, telefone, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, nome.trim(), endereco, telefone, now_str()],
        )
        .map_err(db_err("Create cmei"))?;
        Ok(Cmei {
            id,
            nome: nome.trim().to_string(),
            endereco: endereco.to_string(),
            telefone: telefone.to_string(),
        })
    }

    pub fn list_cmeis(&self) -> Result<Vec<Cmei>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, nome, endereco, telefone FROM cmeis ORDER BY nome")
            .map_err(db_err("Prepare"))?;
        let cmeis = stmt
            .query_map([], |row| {
                Ok(Cmei {
                    id: row.get(0)?,
                    nome: row.get(1)?,
                    endereco: row.get(2)?,
                    telefone: row.get(3)?,
                })
            })
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err("Read cmeis"))?;
        Ok(cmeis)
    }

    pub fn create_turma(&self, cmei_id: &str, nome: &str, capacidade: u32) -> Result<Turma> {
        validation::require_selection(nome, "nome")?;
        if capacidade == 0 {
            return Err(validation::ValidationError::ValorInvalido {
                field: "capacidade",
                value: capacidade.to_string(),
            }
            .into());
        }
        let conn = self.lock()?;
        tx_cmei_nome(&conn, cmei_id)?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO turmas (id, cmei_id, nome, capacidade, ocupacao, created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![id, cmei_id, nome.trim(), capacidade, now_str()],
        )
        .map_err(db_err("Create turma"))?;
        Ok(Turma {
            id,
            cmei_id: cmei_id.to_string(),
            nome: nome.trim().to_string(),
            capacidade,
            ocupacao: 0,
        })
    }

    pub fn list_turmas(&self) -> Result<Vec<Turma>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, cmei_id, nome, capacidade, ocupacao FROM turmas ORDER BY cmei_id, nome")
            .map_err(db_err("Prepare"))?;
        let turmas = stmt
            .query_map([], row_to_turma)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err("Read turmas"))?;
        Ok(turmas)
    }

    // ── Criancas ──────────────────────────────

    /// Register a child in `Fila de Espera`. Queue positions are left to
    /// [`WaitlistDb::recalculate_fila_posicao`].
    pub fn insert_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca> {
        validation::validate_nova_crianca(nova)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx_cmei_nome(&tx, &nova.cmei1_preferencia)?;
        if let Some(segunda) = &nova.cmei2_preferencia {
            tx_cmei_nome(&tx, segunda)?;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_str();
        let r = &nova.responsavel;
        tx.execute(
            "INSERT INTO criancas (id, nome, data_nascimento, sexo, programas_sociais, aceita_qualquer_cmei,
                cmei1_preferencia, cmei2_preferencia, status, prioridade,
                responsavel_nome, responsavel_cpf, responsavel_telefone, responsavel_telefone2, responsavel_email,
                endereco, bairro, observacoes, data_inscricao, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'Fila de Espera', 'normal', ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)",
            params![
                id,
                nova.nome.trim(),
                nova.data_nascimento.format("%Y-%m-%d").to_string(),
                nova.sexo.as_str(),
                nova.programas_sociais as i32,
                nova.aceita_qualquer_cmei as i32,
                nova.cmei1_preferencia,
                nova.cmei2_preferencia,
                r.nome.trim(),
                cpf::format(&r.cpf),
                r.telefone,
                r.telefone2,
                r.email,
                r.endereco,
                r.bairro,
                nova.observacoes,
                now,
            ],
        )
        .map_err(db_err("Insert crianca"))?;
        tx_append_historico(&tx, &id, "Inscrição", "Cadastro na fila de espera", usuario)?;
        let crianca = tx_get_crianca(&tx, &id)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(crianca)
    }

    pub fn get_crianca(&self, id: &str) -> Result<Crianca> {
        let conn = self.lock()?;
        tx_get_crianca(&conn, id)
    }

    pub fn list_criancas(&self) -> Result<Vec<Crianca>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{CRIANCA_SELECT} ORDER BY fila_posicao IS NULL, fila_posicao, data_inscricao"
            ))
            .map_err(db_err("Prepare"))?;
        let criancas = stmt
            .query_map([], row_to_crianca)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err("Read criancas"))?;
        Ok(criancas)
    }

    pub fn find_responsavel_by_cpf(&self, cpf_value: &str) -> Result<Option<Responsavel>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT responsavel_nome, responsavel_cpf, responsavel_telefone, responsavel_telefone2,
                    responsavel_email, endereco, bairro
             FROM criancas WHERE responsavel_cpf=?1 ORDER BY data_inscricao DESC LIMIT 1",
            params![cpf::format(cpf_value)],
            |row| {
                Ok(Responsavel {
                    nome: row.get(0)?,
                    cpf: row.get(1)?,
                    telefone: row.get(2)?,
                    telefone2: row.get(3)?,
                    email: row.get(4)?,
                    endereco: row.get(5)?,
                    bairro: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(db_err("Find responsavel"))
    }

    pub fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let conn = self.lock()?;
        Status::ALL
            .iter()
            .map(|status| -> Result<StatusCount> {
                let total: u32 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM criancas WHERE status=?1",
                        params![status.as_str()],
                        |r| r.get(0),
                    )
                    .map_err(db_err("Count"))?;
                Ok(StatusCount { status: *status, total })
            })
            .collect()
    }

    // ── Historico ──────────────────────────────

    pub fn list_historico(&self, crianca_id: Option<&str>) -> Result<Vec<HistoricoEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, crianca_id, acao, detalhes, usuario, created_at FROM historico
                 WHERE ?1 IS NULL OR crianca_id = ?1 ORDER BY id DESC",
            )
            .map_err(db_err("Prepare"))?;
        let rows = stmt
            .query_map(params![crianca_id], row_to_historico)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err("Read historico"))?;
        Ok(rows)
    }

    pub fn append_historico(&self, crianca_id: &str, acao: &str, detalhes: &str, usuario: &str) -> Result<HistoricoEntry> {
        let conn = self.lock()?;
        tx_get_crianca(&conn, crianca_id)?;
        let id = tx_append_historico(&conn, crianca_id, acao, detalhes, usuario)?;
        conn.query_row(
            "SELECT id, crianca_id, acao, detalhes, usuario, created_at FROM historico WHERE id=?1",
            params![id],
            row_to_historico,
        )
        .map_err(db_err("Get historico"))
    }

    // ── Mutations ──────────────────────────────

    /// Apply one single-child mutation atomically. Transition rules and the
    /// justificativa floor are checked again here.
    pub fn apply_mutation(&self, request: &MutationRequest) -> Result<Crianca> {
        let action = request.change.action();
        if action.requires_justificativa() {
            validation::validate_justificativa(request.justificativa.as_deref().unwrap_or(""))?;
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let crianca = tx_get_crianca(&tx, &request.crianca_id)?;
        transition::check_transition(&crianca, &action)?;

        let detalhes = match &request.change {
            MutationChange::Convocar { cmei_id, turma_id, deadline } => {
                let turma = tx_get_turma(&tx, turma_id)?;
                if turma.cmei_id != *cmei_id {
                    return Err(CmeiError::Rejected(format!(
                        "Turma '{}' does not belong to the selected CMEI",
                        turma.nome
                    )));
                }
                let cmei_nome = tx_cmei_nome(&tx, cmei_id)?;
                take_seat(&tx, &turma)?;
                tx.execute(
                    "UPDATE criancas SET status='Convocado', prioridade='normal', remanejamento_cmei_id=NULL,
                        convocacao_cmei_id=?1, convocacao_turma_id=?2, convocacao_deadline=?3, updated_at=?4
                     WHERE id=?5",
                    params![cmei_id, turma_id, fmt_ts(*deadline), now_str(), crianca.id],
                )
                .map_err(db_err("Convocar"))?;
                format!(
                    "Convocado para {cmei_nome} - {} (prazo {})",
                    turma.nome,
                    deadline.format("%d/%m/%Y")
                )
            }
            MutationChange::Matricular => {
                let conv = crianca.convocacao.as_ref().ok_or_else(|| {
                    CmeiError::Rejected("Convocation data missing for this child".into())
                })?;
                let turma = tx_get_turma(&tx, &conv.turma_id)?;
                let cmei_nome = tx_cmei_nome(&tx, &conv.cmei_id)?;
                let now = now_str();
                tx.execute(
                    "UPDATE criancas SET status='Matriculado', cmei_atual_id=?1, turma_atual_id=?2,
                        convocacao_cmei_id=NULL, convocacao_turma_id=NULL, convocacao_deadline=NULL,
                        remanejamento_cmei_id=NULL, data_matricula=?3, updated_at=?3
                     WHERE id=?4",
                    params![conv.cmei_id, conv.turma_id, now, crianca.id],
                )
                .map_err(db_err("Matricular"))?;
                format!("Matriculado em {cmei_nome} - {}", turma.nome)
            }
            MutationChange::Realocar { turma_id } | MutationChange::Transferir { turma_id } => {
                let destino = tx_get_turma(&tx, turma_id)?;
                let mesma_unidade = crianca.cmei_atual() == Some(destino.cmei_id.as_str());
                if matches!(action, Action::Realocar) != mesma_unidade {
                    return Err(CmeiError::Rejected(format!(
                        "Turma '{}' is not a valid destination for {}",
                        destino.nome,
                        action.label()
                    )));
                }
                if crianca.turma_atual_id.as_deref() == Some(destino.id.as_str()) {
                    return Err(CmeiError::Rejected("Child is already in this turma".into()));
                }
                let origem = match crianca.turma_atual_id.as_deref() {
                    Some(id) => {
                        let t = tx_get_turma(&tx, id)?;
                        release_seat(&tx, id)?;
                        t.nome
                    }
                    None => "-".to_string(),
                };
                take_seat(&tx, &destino)?;
                tx.execute(
                    "UPDATE criancas SET cmei_atual_id=?1, turma_atual_id=?2, updated_at=?3 WHERE id=?4",
                    params![destino.cmei_id, destino.id, now_str(), crianca.id],
                )
                .map_err(db_err("Move crianca"))?;
                let cmei_nome = tx_cmei_nome(&tx, &destino.cmei_id)?;
                format!("{origem} -> {cmei_nome} - {}", destino.nome)
            }
            MutationChange::Remanejamento { cmei_id } => {
                if crianca.cmei_atual() == Some(cmei_id.as_str()) {
                    return Err(CmeiError::Rejected("Destination CMEI must differ from the current one".into()));
                }
                let cmei_nome = tx_cmei_nome(&tx, cmei_id)?;
                tx_drop_convocacao(&tx, &crianca)?;
                tx.execute(
                    "UPDATE criancas SET status='Remanejamento Solicitado', remanejamento_cmei_id=?1, updated_at=?2
                     WHERE id=?3",
                    params![cmei_id, now_str(), crianca.id],
                )
                .map_err(db_err("Remanejamento"))?;
                format!("Destino solicitado: {cmei_nome}")
            }
        };

        let detalhes = match &request.justificativa {
            Some(j) if !j.trim().is_empty() => format!("{detalhes}. Justificativa: {}", j.trim()),
            _ => detalhes,
        };
        tx_append_historico(&tx, &crianca.id, action.label(), &detalhes, &request.usuario)?;
        tx_recalculate_fila(&tx)?;
        let updated = tx_get_crianca(&tx, &crianca.id)?;
        tx.commit().map_err(db_err("Commit"))?;

        tracing::info!("{} committed for crianca {}", action.label(), updated.id);
        Ok(updated)
    }

    /// Apply one status to every selected child in a single transaction.
    /// Any failure rolls back the whole batch.
    pub fn apply_mass_status(&self, request: &MassStatusRequest) -> Result<MassAck> {
        validation::validate_justificativa(&request.justificativa)?;
        let mut ids: Vec<&str> = request.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(validation::ValidationError::SelecaoVazia.into());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        for id in &ids {
            let crianca = tx_get_crianca(&tx, id)?;
            apply_mass_one(&tx, &crianca, request.status)?;
            tx_append_historico(
                &tx,
                id,
                request.status.label(),
                &format!("Justificativa: {}", request.justificativa.trim()),
                &request.usuario,
            )?;
        }
        tx_recalculate_fila(&tx)?;
        tx.commit().map_err(db_err("Commit"))?;

        tracing::info!("{} applied to {} crianca(s)", request.status.label(), ids.len());
        Ok(MassAck { affected: ids.len() })
    }

    /// Recompute `fila_posicao` for every child still waiting for a seat.
    pub fn recalculate_fila_posicao(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let total = tx_recalculate_fila(&tx)?;
        tx.commit().map_err(db_err("Commit"))?;
        tracing::debug!("Queue recalculated: {total} waiting");
        Ok(())
    }

    pub fn calculate_average_wait_time(&self) -> Result<Option<f64>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT AVG(julianday(data_matricula) - julianday(data_inscricao))
             FROM criancas WHERE data_matricula IS NOT NULL",
            [],
            |r| r.get::<_, Option<f64>>(0),
        )
        .map_err(db_err("Average wait"))
    }

    // ── Settings ──────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM settings WHERE key=?1", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .map_err(db_err("Get setting"))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=?2, updated_at=?3",
            params![key, value, now_str()],
        )
        .map_err(db_err("Set setting"))?;
        Ok(())
    }

    /// System webhook URL used for status notifications.
    pub fn webhook_url(&self) -> Result<Option<String>> {
        Ok(self.get_setting(WEBHOOK_URL_KEY)?.filter(|u| !u.trim().is_empty()))
    }

    pub fn set_webhook_url(&self, url: &str) -> Result<()> {
        self.set_setting(WEBHOOK_URL_KEY, url.trim())
    }

    // ── API tokens ──────────────────────────────

    /// Mint a bearer token for `usuario`. Only its hash is stored.
    pub fn create_token(&self, usuario: &str) -> Result<String> {
        validation::require_selection(usuario, "usuario")?;
        let token = format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        );
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO api_tokens (token_hash, usuario, created_at) VALUES (?1, ?2, ?3)",
            params![hash_token(&token), usuario.trim(), now_str()],
        )
        .map_err(db_err("Create token"))?;
        Ok(token)
    }

    /// Resolve a bearer token to its user.
    pub fn verify_token(&self, token: &str) -> Result<Option<String>> {
        if token.is_empty() {
            return Ok(None);
        }
        let conn = self.lock()?;
        conn.query_row(
            "SELECT usuario FROM api_tokens WHERE token_hash=?1",
            params![hash_token(token)],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(db_err("Verify token"))
    }

    pub fn revoke_tokens(&self, usuario: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM api_tokens WHERE usuario=?1", params![usuario])
            .map_err(db_err("Revoke tokens"))
    }
}

fn apply_mass_one(tx: &Transaction, crianca: &Crianca, status: MassStatus) -> Result<()> {
    let now = now_str();
    if status.releases_seat() {
        if let Some(turma_id) = held_seat(crianca) {
            release_seat(tx, turma_id)?;
        }
        let prioridade = status.prioridade().unwrap_or(PrioridadeFila::Normal);
        tx.execute(
            "UPDATE criancas SET status=?1, prioridade=?2, cmei_atual_id=NULL, turma_atual_id=NULL,
                convocacao_cmei_id=NULL, convocacao_turma_id=NULL, convocacao_deadline=NULL,
                remanejamento_cmei_id=NULL, data_matricula=NULL, updated_at=?3
             WHERE id=?4",
            params![status.status().as_str(), prioridade.as_str(), now, crianca.id],
        )
        .map_err(db_err("Mass status"))?;
        if status == MassStatus::FimDeFila {
            // Penalized requeue starts counting from now.
            tx.execute(
                "UPDATE criancas SET data_inscricao=?1 WHERE id=?2",
                params![now, crianca.id],
            )
            .map_err(db_err("Fim de fila"))?;
        }
    } else {
        tx_drop_convocacao(tx, crianca)?;
        tx.execute(
            "UPDATE criancas SET status=?1, updated_at=?2 WHERE id=?3",
            params![status.status().as_str(), now, crianca.id],
        )
        .map_err(db_err("Mass status"))?;
    }
    Ok(())
}
