//! Test doubles: a real in-memory store wrapped with call counters, an
//! optional gate that holds mutations pending, and one-shot lookup failures.

use async_trait::async_trait;
use chrono::NaiveDate;
use cmei_core::error::{CmeiError, Result};
use cmei_core::traits::{MassAck, MassStatusRequest, MutationRequest, WaitlistBackend};
use cmei_core::types::{Cmei, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Sexo, Turma};
use cmei_db::WaitlistDb;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub(crate) struct CountingBackend {
    pub db: WaitlistDb,
    calls: Mutex<HashMap<&'static str, usize>>,
    gate: Option<Arc<Semaphore>>,
    fail_lookup: AtomicBool,
}

impl CountingBackend {
    pub fn new(db: WaitlistDb) -> Self {
        Self { db, calls: Mutex::new(HashMap::new()), gate: None, fail_lookup: AtomicBool::new(false) }
    }

    /// Mutations wait until [`CountingBackend::release`] is called.
    pub fn gated(db: WaitlistDb) -> Self {
        Self { gate: Some(Arc::new(Semaphore::new(0))), ..Self::new(db) }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// The next CPF lookup fails with a database error.
    pub fn fail_next_lookup(&self) {
        self.fail_lookup.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn hit(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl WaitlistBackend for CountingBackend {
    async fn list_cmeis(&self) -> Result<Vec<Cmei>> {
        self.hit("list_cmeis");
        self.db.list_cmeis()
    }

    async fn list_turmas(&self) -> Result<Vec<Turma>> {
        self.hit("list_turmas");
        self.db.list_turmas()
    }

    async fn list_criancas(&self) -> Result<Vec<Crianca>> {
        self.hit("list_criancas");
        self.db.list_criancas()
    }

    async fn get_crianca(&self, id: &str) -> Result<Crianca> {
        self.hit("get_crianca");
        self.db.get_crianca(id)
    }

    async fn find_responsavel_by_cpf(&self, cpf: &str) -> Result<Option<Responsavel>> {
        self.hit("find_responsavel_by_cpf");
        if self.fail_lookup.swap(false, Ordering::SeqCst) {
            return Err(CmeiError::Database("Find responsavel: database is locked".into()));
        }
        self.db.find_responsavel_by_cpf(cpf)
    }

    async fn insert_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca> {
        self.hit("insert_crianca");
        self.db.insert_crianca(nova, usuario)
    }

    async fn list_historico(&self, crianca_id: Option<&str>) -> Result<Vec<HistoricoEntry>> {
        self.hit("list_historico");
        self.db.list_historico(crianca_id)
    }

    async fn append_historico(&self, crianca_id: &str, acao: &str, detalhes: &str, usuario: &str) -> Result<HistoricoEntry> {
        self.hit("append_historico");
        self.db.append_historico(crianca_id, acao, detalhes, usuario)
    }

    async fn apply_mutation(&self, request: &MutationRequest) -> Result<Crianca> {
        self.hit("apply_mutation");
        self.wait_gate().await;
        self.db.apply_mutation(request)
    }

    async fn apply_mass_status(&self, request: &MassStatusRequest) -> Result<MassAck> {
        self.hit("apply_mass_status");
        self.wait_gate().await;
        self.db.apply_mass_status(request)
    }

    async fn recalculate_fila_posicao(&self) -> Result<()> {
        self.hit("recalculate_fila_posicao");
        self.db.recalculate_fila_posicao()
    }

    async fn calculate_average_wait_time(&self) -> Result<Option<f64>> {
        self.hit("calculate_average_wait_time");
        self.db.calculate_average_wait_time()
    }
}

pub(crate) struct Seed {
    pub cmei_x: Cmei,
    pub cmei_y: Cmei,
    pub turma_x1: Turma,
    pub turma_x2: Turma,
    pub turma_y1: Turma,
}

/// Two CMEIs, three turmas: two at X (one of them with a single seat), one at Y.
pub(crate) fn seed(db: &WaitlistDb) -> Seed {
    let cmei_x = db.create_cmei("CMEI Pequeno Príncipe", "Rua A", "").unwrap();
    let cmei_y = db.create_cmei("CMEI Sol Nascente", "Rua B", "").unwrap();
    let turma_x1 = db.create_turma(&cmei_x.id, "Berçário I", 5).unwrap();
    let turma_x2 = db.create_turma(&cmei_x.id, "Maternal I", 1).unwrap();
    let turma_y1 = db.create_turma(&cmei_y.id, "Berçário II", 5).unwrap();
    Seed { cmei_x, cmei_y, turma_x1, turma_x2, turma_y1 }
}

pub(crate) fn nova(nome: &str, cpf: &str, cmei: &str) -> NovaCrianca {
    NovaCrianca {
        nome: nome.into(),
        data_nascimento: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        sexo: Sexo::M,
        programas_sociais: false,
        aceita_qualquer_cmei: false,
        cmei1_preferencia: cmei.into(),
        cmei2_preferencia: None,
        responsavel: Responsavel {
            nome: format!("Responsável de {nome}"),
            cpf: cpf.into(),
            telefone: "(41) 99999-0000".into(),
            email: Some("resp@example.com".into()),
            endereco: "Rua das Acácias, 42".into(),
            bairro: "Boqueirão".into(),
            ..Default::default()
        },
        observacoes: None,
    }
}

/// Store with the seed plus the backend wrapper around it.
pub(crate) fn counting() -> (Arc<CountingBackend>, Seed) {
    let db = WaitlistDb::open_in_memory().unwrap();
    let seed = seed(&db);
    (Arc::new(CountingBackend::new(db)), seed)
}

pub(crate) fn gated() -> (Arc<CountingBackend>, Seed) {
    let db = WaitlistDb::open_in_memory().unwrap();
    let seed = seed(&db);
    (Arc::new(CountingBackend::gated(db)), seed)
}
