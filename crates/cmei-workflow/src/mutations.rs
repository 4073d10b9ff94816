//! Mutation layer: one operation per transition.
//!
//! Every operation validates against the caller's copy of the child before
//! touching the network. A rejected transition, a missing selection or a
//! short justificativa never reaches the backend. Valid requests become
//! exactly one backend call.

use chrono::{Duration, Utc};
use cmei_core::config::FilaConfig;
use cmei_core::error::Result;
use cmei_core::status::MassStatus;
use cmei_core::traits::{MassAck, MassStatusRequest, MutationChange, MutationRequest, WaitlistBackend};
use cmei_core::transition::{Action, check_transition};
use cmei_core::types::{ConvocacaoData, Crianca, NovaCrianca};
use cmei_core::validation::{self, ValidationError};
use std::sync::Arc;

pub struct Mutations<B: ?Sized> {
    backend: Arc<B>,
    prazo_convocacao_dias: u32,
}

impl<B: WaitlistBackend + ?Sized> Mutations<B> {
    pub fn new(backend: Arc<B>, fila: &FilaConfig) -> Self {
        Self {
            backend,
            prazo_convocacao_dias: fila.prazo_convocacao_dias,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Summon a waitlisted child. The deadline is stamped here.
    pub async fn convocar(&self, crianca: &Crianca, selecao: &ConvocacaoData, usuario: &str) -> Result<Crianca> {
        check_transition(crianca, &Action::Convocar)?;
        validation::require_selection(&selecao.cmei_id, "cmei")?;
        validation::require_selection(&selecao.turma_id, "turma")?;

        let deadline = Utc::now() + Duration::days(i64::from(self.prazo_convocacao_dias));
        self.send(crianca, MutationChange::Convocar {
            cmei_id: selecao.cmei_id.clone(),
            turma_id: selecao.turma_id.clone(),
            deadline,
        }, None, usuario)
        .await
    }

    pub async fn matricular(&self, crianca: &Crianca, usuario: &str) -> Result<Crianca> {
        check_transition(crianca, &Action::Matricular)?;
        self.send(crianca, MutationChange::Matricular, None, usuario).await
    }

    pub async fn realocar(&self, crianca: &Crianca, turma_id: &str, usuario: &str) -> Result<Crianca> {
        check_transition(crianca, &Action::Realocar)?;
        validation::require_selection(turma_id, "turma")?;
        self.send(crianca, MutationChange::Realocar { turma_id: turma_id.to_string() }, None, usuario)
            .await
    }

    pub async fn transferir(&self, crianca: &Crianca, turma_id: &str, usuario: &str) -> Result<Crianca> {
        check_transition(crianca, &Action::Transferir)?;
        validation::require_selection(turma_id, "turma")?;
        self.send(crianca, MutationChange::Transferir { turma_id: turma_id.to_string() }, None, usuario)
            .await
    }

    /// Request reassignment to another CMEI. The child stays where it is.
    pub async fn solicitar_remanejamento(
        &self,
        crianca: &Crianca,
        cmei_id: &str,
        justificativa: &str,
        usuario: &str,
    ) -> Result<Crianca> {
        check_transition(crianca, &Action::Remanejamento)?;
        validation::require_selection(cmei_id, "cmei")?;
        if crianca.cmei_atual() == Some(cmei_id) {
            return Err(ValidationError::OpcaoIndisponivel.into());
        }
        validation::validate_justificativa(justificativa)?;
        self.send(
            crianca,
            MutationChange::Remanejamento { cmei_id: cmei_id.to_string() },
            Some(justificativa.trim().to_string()),
            usuario,
        )
        .await
    }

    /// Apply one status to the whole selection in a single backend call.
    pub async fn alterar_status_em_massa(
        &self,
        ids: &[String],
        status: MassStatus,
        justificativa: &str,
        usuario: &str,
    ) -> Result<MassAck> {
        if ids.is_empty() {
            return Err(ValidationError::SelecaoVazia.into());
        }
        validation::validate_justificativa(justificativa)?;

        let ack = self
            .backend
            .apply_mass_status(&MassStatusRequest {
                ids: ids.to_vec(),
                status,
                justificativa: justificativa.trim().to_string(),
                usuario: usuario.to_string(),
            })
            .await?;
        tracing::info!("{} applied to {} crianca(s) by {usuario}", status.label(), ack.affected);
        Ok(ack)
    }

    /// Intake: insert in `Fila de Espera`, then recompute queue positions.
    pub async fn registrar_crianca(&self, nova: &NovaCrianca, usuario: &str) -> Result<Crianca> {
        validation::validate_nova_crianca(nova)?;
        let crianca = self.backend.insert_crianca(nova, usuario).await?;
        self.backend.recalculate_fila_posicao().await?;
        tracing::info!("Crianca registered: {} ({})", crianca.nome, crianca.id);
        self.backend.get_crianca(&crianca.id).await
    }

    async fn send(
        &self,
        crianca: &Crianca,
        change: MutationChange,
        justificativa: Option<String>,
        usuario: &str,
    ) -> Result<Crianca> {
        let action = change.action();
        let updated = self
            .backend
            .apply_mutation(&MutationRequest {
                crianca_id: crianca.id.clone(),
                change,
                justificativa,
                usuario: usuario.to_string(),
            })
            .await?;
        tracing::info!("{action} committed for {} by {usuario}", updated.id);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{counting, nova};
    use cmei_core::error::CmeiError;
    use cmei_core::status::Status;

    fn mutations<B: WaitlistBackend + ?Sized>(backend: Arc<B>) -> Mutations<B> {
        Mutations::new(backend, &FilaConfig::default())
    }

    #[tokio::test]
    async fn test_blocked_transition_issues_no_call() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let c = m.registrar_crianca(&nova("Ana", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();
        backend.reset();

        let err = m.matricular(&c, "u").await.unwrap_err();
        assert!(matches!(err, CmeiError::Transition(_)));
        let err = m.realocar(&c, &seed.turma_x1.id, "u").await.unwrap_err();
        assert!(matches!(err, CmeiError::Transition(_)));
        assert_eq!(backend.calls("apply_mutation"), 0);
    }

    #[tokio::test]
    async fn test_justificativa_floor_is_exactly_ten_chars() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let c = m.registrar_crianca(&nova("Ana", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();

        let err = m.solicitar_remanejamento(&c, &seed.cmei_y.id, "123456789", "u").await.unwrap_err();
        assert!(matches!(err, CmeiError::Validation(ValidationError::JustificativaCurta { min: 10 })));
        assert_eq!(backend.calls("apply_mutation"), 0);

        let c = m.solicitar_remanejamento(&c, &seed.cmei_y.id, "1234567890", "u").await.unwrap();
        assert_eq!(c.status, Status::RemanejamentoSolicitado);
        assert_eq!(backend.calls("apply_mutation"), 1);
    }

    #[tokio::test]
    async fn test_mass_update_is_one_batch_call() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let mut ids = Vec::new();
        for (nome, cpf) in [("A", "529.982.247-25"), ("B", "111.444.777-35"), ("C", "390.533.447-05")] {
            ids.push(m.registrar_crianca(&nova(nome, cpf, &seed.cmei_x.id), "u").await.unwrap().id);
        }

        let ack = m
            .alterar_status_em_massa(&ids, MassStatus::Desistente, "Família desistiu da vaga", "u")
            .await
            .unwrap();
        assert_eq!(ack.affected, 3);
        assert_eq!(backend.calls("apply_mass_status"), 1);
        assert_eq!(backend.calls("apply_mutation"), 0);
        for id in &ids {
            assert_eq!(backend.db.get_crianca(id).unwrap().status, Status::Desistente);
        }
    }

    #[tokio::test]
    async fn test_mass_update_requires_selection() {
        let (backend, _) = counting();
        let m = mutations(backend.clone());
        let err = m
            .alterar_status_em_massa(&[], MassStatus::Recusada, "Recusou a vaga ofertada", "u")
            .await
            .unwrap_err();
        assert!(matches!(err, CmeiError::Validation(ValidationError::SelecaoVazia)));
        assert_eq!(backend.calls("apply_mass_status"), 0);
    }

    #[tokio::test]
    async fn test_convocar_stamps_configured_deadline() {
        let (backend, seed) = counting();
        let m = Mutations::new(backend.clone(), &FilaConfig { prazo_convocacao_dias: 3 });
        let c = m.registrar_crianca(&nova("Ana", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();
        let selecao = ConvocacaoData { cmei_id: seed.cmei_x.id.clone(), turma_id: seed.turma_x1.id.clone() };

        let c = m.convocar(&c, &selecao, "u").await.unwrap();
        let dias = (c.convocacao.unwrap().deadline - Utc::now()).num_hours();
        assert!((71..=72).contains(&dias));
    }

    #[tokio::test]
    async fn test_convocar_requires_selection() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let c = m.registrar_crianca(&nova("Ana", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();
        let selecao = ConvocacaoData { cmei_id: seed.cmei_x.id.clone(), turma_id: " ".into() };

        let err = m.convocar(&c, &selecao, "u").await.unwrap_err();
        assert!(matches!(err, CmeiError::Validation(ValidationError::SelecaoAusente("turma"))));
        assert_eq!(backend.calls("apply_mutation"), 0);
    }

    #[tokio::test]
    async fn test_backend_rejection_surfaces_as_error() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let a = m.registrar_crianca(&nova("A", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();
        let b = m.registrar_crianca(&nova("B", "111.444.777-35", &seed.cmei_x.id), "u").await.unwrap();
        let selecao = ConvocacaoData { cmei_id: seed.cmei_x.id.clone(), turma_id: seed.turma_x2.id.clone() };

        m.convocar(&a, &selecao, "u").await.unwrap();
        let err = m.convocar(&b, &selecao, "u").await.unwrap_err();
        assert!(matches!(err, CmeiError::Rejected(_)));
        assert!(!err.is_client_side());
    }

    #[tokio::test]
    async fn test_registrar_recalculates_once() {
        let (backend, seed) = counting();
        let m = mutations(backend.clone());
        let c = m.registrar_crianca(&nova("Ana", "529.982.247-25", &seed.cmei_x.id), "u").await.unwrap();
        assert_eq!(c.fila_posicao, Some(1));
        assert_eq!(backend.calls("insert_crianca"), 1);
        assert_eq!(backend.calls("recalculate_fila_posicao"), 1);
    }
}
