use async_trait::async_trait;
use cmei_core::error::Result;
use cmei_core::traits::{MassAck, MassStatusRequest, MutationRequest, WaitlistBackend};
use cmei_core::types::{Cmei, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Turma};

use crate::db::WaitlistDb;

#[async_trait]
impl WaitlistBackend for WaitlistDb {
    async fn list_cmeis(&self) -> Result<Vec<Cmei>> {
        WaitlistDb::list_cmeis(self)
    }

    async fn list_turmas(&self) -> Result<Vec<Turma>> {
        WaitlistDb::list_turmas(self)
    }

    async fn list_criancas(&self) -> Result<Vec<Crianca>> {
        WaitlistDb::list_criancas(self)
    }

    async fn get_crianca(&self, id: &str) -> Result<Crianca> {
        WaitlistDb::get_crianca(self, id)
    }

    async fn find_responsavel_by_cpf(&self, cpf: &str) -> Result<Option<Responsavel>> {
        WaitlistDb::find_responsavel_by_cpf(self, cpf)
    }

    async fn insert_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca> {
        WaitlistDb::insert_crianca(self, nova, usuario)
    }

    async fn list_historico(&self, crianca_id: Option<&str>) -> Result<Vec<HistoricoEntry>> {
        WaitlistDb::list_historico(self, crianca_id)
    }

    async fn append_historico(
        &self,
        crianca_id: &str,
        acao: &str,
        detalhes: &str,
        usuario: &str,
    ) -> Result<HistoricoEntry> {
        WaitlistDb::append_historico(self, crianca_id, acao, detalhes, usuario)
    }

    async fn apply_mutation(&self, request: &MutationRequest) -> Result<Crianca> {
        WaitlistDb::apply_mutation(self, request)
    }

    async fn apply_mass_status(&self, request: &MassStatusRequest) -> Result<MassAck> {
        WaitlistDb::apply_mass_status(self, request)
    }

    async fn recalculate_fila_posicao(&self) -> Result<()> {
        WaitlistDb::recalculate_fila_posicao(self)
    }

    async fn calculate_average_wait_time(&self) -> Result<Option<f64>> {
        WaitlistDb::calculate_average_wait_time(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{fixture, nova};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_backend_trait_object() {
        let f = fixture();
        let cmei = f.cmei_x.id.clone();
        let backend: Arc<dyn WaitlistBackend> = Arc::new(f.db);

        let c = backend.insert_crianca(&nova("Ana", "529.982.247-25", &cmei), "secretaria").await.unwrap();
        backend.recalculate_fila_posicao().await.unwrap();
        assert_eq!(backend.get_crianca(&c.id).await.unwrap().fila_posicao, Some(1));

        let entry = backend.append_historico(&c.id, "Notificação Reenviada", "webhook", "secretaria").await.unwrap();
        let hist = backend.list_historico(None).await.unwrap();
        assert_eq!(hist[0], entry);
        assert_eq!(backend.list_cmeis().await.unwrap().len(), 2);
    }
}
