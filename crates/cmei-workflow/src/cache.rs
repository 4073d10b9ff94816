//! Query cache and post-commit invalidation.
//!
//! Lists are cached whole. A committed mutation marks the affected lists
//! stale and the next refresh refetches each stale list once; there is no
//! local patching of list state.

use cmei_core::config::FilaConfig;
use cmei_core::error::Result;
use cmei_core::status::MassStatus;
use cmei_core::traits::{MassAck, WaitlistBackend};
use cmei_core::transition::Action;
use cmei_core::types::{Cmei, ConvocacaoData, Crianca, HistoricoEntry, NovaCrianca, Turma};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::import::{self, ImportReport};
use crate::mutations::Mutations;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Criancas,
    Historico,
    Cmeis,
    Turmas,
}

impl QueryKey {
    pub const ALL: [QueryKey; 4] = [QueryKey::Criancas, QueryKey::Historico, QueryKey::Cmeis, QueryKey::Turmas];
}

const LISTAS: &[QueryKey] = &[QueryKey::Criancas, QueryKey::Historico];
const LISTAS_E_OCUPACAO: &[QueryKey] = &[QueryKey::Criancas, QueryKey::Historico, QueryKey::Cmeis, QueryKey::Turmas];

/// Lists made stale by committing `action`. Every action can move a seat:
/// a reassignment request gives back a pending convocation seat.
pub fn invalidation_for(action: &Action) -> &'static [QueryKey] {
    match action {
        Action::Convocar
        | Action::Matricular
        | Action::Realocar
        | Action::Transferir
        | Action::Remanejamento
        | Action::StatusEmMassa(_) => LISTAS_E_OCUPACAO,
    }
}

#[derive(Default)]
struct Snapshots {
    criancas: Vec<Crianca>,
    historico: Vec<HistoricoEntry>,
    cmeis: Vec<Cmei>,
    turmas: Vec<Turma>,
    stale: HashSet<QueryKey>,
}

pub struct QueryCache<B: ?Sized> {
    backend: Arc<B>,
    state: Mutex<Snapshots>,
}

impl<B: WaitlistBackend + ?Sized> QueryCache<B> {
    /// Empty cache; every list is fetched on first access.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: Mutex::new(Snapshots {
                stale: QueryKey::ALL.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    /// Mark lists stale. Keys already stale stay scheduled once.
    pub async fn invalidate(&self, keys: &[QueryKey]) {
        let mut state = self.state.lock().await;
        state.stale.extend(keys.iter().copied());
    }

    pub async fn is_stale(&self, key: QueryKey) -> bool {
        self.state.lock().await.stale.contains(&key)
    }

    /// Refetch every stale list once. Returns the lists refreshed.
    ///
    /// The stale set is taken up front, so concurrent callers never fetch
    /// the same invalidation twice. A failed fetch leaves its key stale.
    pub async fn refresh(&self) -> Result<Vec<QueryKey>> {
        let pending: Vec<QueryKey> = {
            let mut state = self.state.lock().await;
            let mut keys: Vec<QueryKey> = state.stale.drain().collect();
            keys.sort_by_key(|k| QueryKey::ALL.iter().position(|a| a == k));
            keys
        };

        let mut refreshed = Vec::with_capacity(pending.len());
        for (i, key) in pending.iter().enumerate() {
            if let Err(e) = self.fetch(*key).await {
                self.invalidate(&pending[i..]).await;
                return Err(e);
            }
            refreshed.push(*key);
        }
        if !refreshed.is_empty() {
            tracing::debug!("Cache refreshed: {refreshed:?}");
        }
        Ok(refreshed)
    }

    async fn fetch(&self, key: QueryKey) -> Result<()> {
        match key {
            QueryKey::Criancas => {
                let rows = self.backend.list_criancas().await?;
                self.state.lock().await.criancas = rows;
            }
            QueryKey::Historico => {
                let rows = self.backend.list_historico(None).await?;
                self.state.lock().await.historico = rows;
            }
            QueryKey::Cmeis => {
                let rows = self.backend.list_cmeis().await?;
                self.state.lock().await.cmeis = rows;
            }
            QueryKey::Turmas => {
                let rows = self.backend.list_turmas().await?;
                self.state.lock().await.turmas = rows;
            }
        }
        Ok(())
    }

    pub async fn criancas(&self) -> Result<Vec<Crianca>> {
        self.refresh().await?;
        Ok(self.state.lock().await.criancas.clone())
    }

    pub async fn historico(&self) -> Result<Vec<HistoricoEntry>> {
        self.refresh().await?;
        Ok(self.state.lock().await.historico.clone())
    }

    pub async fn cmeis(&self) -> Result<Vec<Cmei>> {
        self.refresh().await?;
        Ok(self.state.lock().await.cmeis.clone())
    }

    pub async fn turmas(&self) -> Result<Vec<Turma>> {
        self.refresh().await?;
        Ok(self.state.lock().await.turmas.clone())
    }
}

/// Mutations plus the cache they keep consistent.
pub struct Workflow<B: ?Sized> {
    mutations: Mutations<B>,
    cache: QueryCache<B>,
}

impl<B: WaitlistBackend + ?Sized> Workflow<B> {
    pub fn new(backend: Arc<B>, fila: &FilaConfig) -> Self {
        Self {
            mutations: Mutations::new(backend.clone(), fila),
            cache: QueryCache::new(backend),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        self.mutations.backend()
    }

    pub fn mutations(&self) -> &Mutations<B> {
        &self.mutations
    }

    pub fn cache(&self) -> &QueryCache<B> {
        &self.cache
    }

    pub async fn convocar(&self, crianca: &Crianca, selecao: &ConvocacaoData, usuario: &str) -> Result<Crianca> {
        let result = self.mutations.convocar(crianca, selecao, usuario).await;
        self.committed(invalidation_for(&Action::Convocar), result).await
    }

    pub async fn matricular(&self, crianca: &Crianca, usuario: &str) -> Result<Crianca> {
        let result = self.mutations.matricular(crianca, usuario).await;
        self.committed(invalidation_for(&Action::Matricular), result).await
    }

    pub async fn realocar(&self, crianca: &Crianca, turma_id: &str, usuario: &str) -> Result<Crianca> {
        let result = self.mutations.realocar(crianca, turma_id, usuario).await;
        self.committed(invalidation_for(&Action::Realocar), result).await
    }

    pub async fn transferir(&self, crianca: &Crianca, turma_id: &str, usuario: &str) -> Result<Crianca> {
        let result = self.mutations.transferir(crianca, turma_id, usuario).await;
        self.committed(invalidation_for(&Action::Transferir), result).await
    }

    pub async fn solicitar_remanejamento(
        &self,
        crianca: &Crianca,
        cmei_id: &str,
        justificativa: &str,
        usuario: &str,
    ) -> Result<Crianca> {
        let result = self
            .mutations
            .solicitar_remanejamento(crianca, cmei_id, justificativa, usuario)
            .await;
        self.committed(invalidation_for(&Action::Remanejamento), result).await
    }

    pub async fn alterar_status_em_massa(
        &self,
        ids: &[String],
        status: MassStatus,
        justificativa: &str,
        usuario: &str,
    ) -> Result<MassAck> {
        let result = self
            .mutations
            .alterar_status_em_massa(ids, status, justificativa, usuario)
            .await;
        self.committed(invalidation_for(&Action::StatusEmMassa(status)), result).await
    }

    pub async fn registrar_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca> {
        let result = self.mutations.registrar_crianca(nova, usuario).await;
        self.committed(LISTAS, result).await
    }

    /// Best-effort CSV import. Rows committed before a failure stay committed.
    pub async fn importar_csv(&self, csv: &str, usuario: &str) -> Result<ImportReport> {
        let result = import::import_criancas(self.backend().as_ref(), csv, usuario).await;
        // Partial imports still changed the lists.
        self.cache.invalidate(LISTAS).await;
        self.refresh_quietly().await;
        result
    }

    /// A CMEI or turma was created outside the mutation layer.
    pub async fn catalogo_alterado(&self) {
        self.cache.invalidate(&[QueryKey::Cmeis, QueryKey::Turmas]).await;
        self.refresh_quietly().await;
    }

    async fn committed<T>(&self, keys: &[QueryKey], result: Result<T>) -> Result<T> {
        let value = result?;
        self.cache.invalidate(keys).await;
        self.refresh_quietly().await;
        Ok(value)
    }

    /// The mutation is already committed; a failed refetch only leaves the
    /// lists stale for the next read.
    async fn refresh_quietly(&self) {
        if let Err(e) = self.cache.refresh().await {
            tracing::warn!("Cache refresh failed: {e}");
        }
    }
}
