//! Action forms.
//!
//! A form is opened for one target (a child, or the current mass
//! selection). Options are fetched fresh from the backend, never from the
//! cache. Each form carries its own in-flight guard: while options load or
//! a submission is pending, further submissions are refused without
//! touching the network.
//!
//! ```text
//! Closed ─open─▶ Loading ─options─▶ Selecting ─submit─▶ Submitting ─ok─▶ Closed
//!                                       ▲                    │
//!                                       └──── Failed ◀──err──┘
//! ```

use cmei_core::error::{CmeiError, Result};
use cmei_core::status::MassStatus;
use cmei_core::traits::WaitlistBackend;
use cmei_core::transition::{self, Action, TransitionError, TurmaOption, check_transition};
use cmei_core::types::{Cmei, ConvocacaoData, Crianca};
use cmei_core::validation::{self, ValidationError};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::Workflow;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModalTarget {
    Crianca(String),
    Selecao,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModalState {
    Closed,
    Loading,
    Selecting,
    Submitting,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient message shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

impl From<&CmeiError> for Notice {
    fn from(e: &CmeiError) -> Self {
        Notice::error(e.user_message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModalError {
    #[error("A form is already open for this target")]
    AlreadyOpen,

    #[error(transparent)]
    Blocked(#[from] TransitionError),

    #[error("Form is not open")]
    NotOpen,

    #[error("Options are still loading")]
    OptionsLoading,

    #[error("A submission is already pending")]
    SubmissionPending,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{0}")]
    Failed(String),
}

impl ModalError {
    pub fn notice(&self) -> Notice {
        Notice::error(self.to_string())
    }
}

/// Options offered by a form, already filtered for the action.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionOptions {
    pub turmas: Vec<TurmaOption>,
    pub cmeis: Vec<Cmei>,
}

/// Fetch the current turmas/CMEIs and keep those valid for `action`.
pub async fn action_options<B: WaitlistBackend + ?Sized>(
    backend: &B,
    crianca: &Crianca,
    action: &Action,
) -> Result<ActionOptions> {
    match action {
        Action::Convocar | Action::Realocar | Action::Transferir => {
            let turmas = backend.list_turmas().await?;
            let cmeis = backend.list_cmeis().await?;
            Ok(ActionOptions {
                turmas: transition::turma_options(action, crianca, &turmas, &cmeis),
                cmeis: Vec::new(),
            })
        }
        Action::Remanejamento => {
            let cmeis = backend.list_cmeis().await?;
            Ok(ActionOptions {
                turmas: Vec::new(),
                cmeis: transition::cmei_options(crianca, &cmeis).into_iter().cloned().collect(),
            })
        }
        Action::Matricular | Action::StatusEmMassa(_) => Ok(ActionOptions::default()),
    }
}

/// What the operator filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormInput {
    /// Picked turma id (convocation, relocation, transfer) or CMEI id
    /// (reassignment).
    pub selecao: Option<String>,
    pub justificativa: String,
}

impl FormInput {
    pub fn selecao(id: impl Into<String>) -> Self {
        Self { selecao: Some(id.into()), ..Default::default() }
    }

    pub fn justificativa(text: impl Into<String>) -> Self {
        Self { justificativa: text.into(), ..Default::default() }
    }

    pub fn com_justificativa(mut self, text: impl Into<String>) -> Self {
        self.justificativa = text.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ModalOutcome {
    pub notice: Notice,
    /// Updated child for single-child actions.
    pub crianca: Option<Crianca>,
}

enum Subject {
    Crianca(Crianca),
    Selecao { ids: Vec<String>, status: MassStatus },
}

/// Call prepared from a validated form.
enum Prepared {
    Convocar(ConvocacaoData),
    Matricular,
    Realocar(String),
    Transferir(String),
    Remanejamento { cmei_id: String, justificativa: String },
    Massa { justificativa: String },
}

struct Inner {
    state: ModalState,
    options: Option<ActionOptions>,
    /// Target already removed from the open set.
    released: bool,
}

type OpenSet = Arc<Mutex<HashSet<ModalTarget>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Selected turma, if it is offered and has a free seat.
fn pick_turma<'a>(
    options: Option<&'a ActionOptions>,
    selecao: &str,
    field: &'static str,
) -> std::result::Result<&'a TurmaOption, ValidationError> {
    validation::require_selection(selecao, field)?;
    options
        .into_iter()
        .flat_map(|o| o.turmas.iter())
        .find(|t| t.turma_id == selecao && t.selectable)
        .ok_or(ValidationError::OpcaoIndisponivel)
}

/// Opens forms for one operator, at most one per target.
pub struct ModalHost<B: ?Sized> {
    workflow: Arc<Workflow<B>>,
    usuario: String,
    abertos: OpenSet,
}

impl<B: WaitlistBackend + ?Sized> ModalHost<B> {
    pub fn new(workflow: Arc<Workflow<B>>, usuario: impl Into<String>) -> Self {
        Self {
            workflow,
            usuario: usuario.into(),
            abertos: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_open(&self, target: &ModalTarget) -> bool {
        lock(&self.abertos).contains(target)
    }

    /// Open a per-child form. Blocked transitions are refused here, before
    /// any option is fetched.
    pub fn open(&self, crianca: Crianca, action: Action) -> std::result::Result<ActionModal<B>, ModalError> {
        check_transition(&crianca, &action)?;
        let target = ModalTarget::Crianca(crianca.id.clone());
        self.reserve(&target)?;
        Ok(self.modal(target, action, Subject::Crianca(crianca), ModalState::Loading))
    }

    /// Open the mass status form for the current selection.
    pub fn open_mass(&self, ids: Vec<String>, status: MassStatus) -> std::result::Result<ActionModal<B>, ModalError> {
        if ids.is_empty() {
            return Err(ValidationError::SelecaoVazia.into());
        }
        self.reserve(&ModalTarget::Selecao)?;
        Ok(self.modal(
            ModalTarget::Selecao,
            Action::StatusEmMassa(status),
            Subject::Selecao { ids, status },
            ModalState::Selecting,
        ))
    }

    fn reserve(&self, target: &ModalTarget) -> std::result::Result<(), ModalError> {
        if !lock(&self.abertos).insert(target.clone()) {
            return Err(ModalError::AlreadyOpen);
        }
        Ok(())
    }

    fn modal(&self, target: ModalTarget, action: Action, subject: Subject, state: ModalState) -> ActionModal<B> {
        ActionModal {
            workflow: self.workflow.clone(),
            usuario: self.usuario.clone(),
            abertos: self.abertos.clone(),
            target,
            action,
            subject,
            inner: Mutex::new(Inner {
                state,
                options: None,
                released: false,
            }),
        }
    }
}

/// One open form. Dropping it releases its target.
pub struct ActionModal<B: ?Sized> {
    workflow: Arc<Workflow<B>>,
    usuario: String,
    abertos: OpenSet,
    target: ModalTarget,
    action: Action,
    subject: Subject,
    inner: Mutex<Inner>,
}

impl<B: WaitlistBackend + ?Sized> ActionModal<B> {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn state(&self) -> ModalState {
        lock(&self.inner).state.clone()
    }

    pub fn options(&self) -> Option<ActionOptions> {
        lock(&self.inner).options.clone()
    }

    /// Fetch options fresh from the backend and move to `Selecting`.
    pub async fn load_options(&self) -> std::result::Result<ActionOptions, ModalError> {
        let crianca = match &self.subject {
            Subject::Crianca(c) => c,
            Subject::Selecao { .. } => return Ok(ActionOptions::default()),
        };
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                ModalState::Closed => return Err(ModalError::NotOpen),
                ModalState::Submitting => return Err(ModalError::SubmissionPending),
                ModalState::Selecting | ModalState::Failed(_) => {
                    if let Some(options) = &inner.options {
                        return Ok(options.clone());
                    }
                }
                ModalState::Loading => {}
            }
            inner.state = ModalState::Loading;
        }

        let fetched = action_options(self.workflow.backend().as_ref(), crianca, &self.action).await;
        let mut inner = lock(&self.inner);
        match fetched {
            Ok(options) => {
                inner.state = ModalState::Selecting;
                inner.options = Some(options.clone());
                Ok(options)
            }
            Err(e) => {
                let message = e.user_message();
                inner.state = ModalState::Failed(message.clone());
                Err(ModalError::Failed(message))
            }
        }
    }

    /// Submit the form: at most one backend mutation per call, and none
    /// while options load or another submission is pending.
    pub async fn submit(&self, input: FormInput) -> std::result::Result<ModalOutcome, ModalError> {
        let prepared = {
            let mut inner = lock(&self.inner);
            match &inner.state {
                ModalState::Closed => return Err(ModalError::NotOpen),
                ModalState::Loading => return Err(ModalError::OptionsLoading),
                ModalState::Submitting => return Err(ModalError::SubmissionPending),
                ModalState::Selecting | ModalState::Failed(_) => {}
            }
            if inner.options.is_none() && matches!(self.subject, Subject::Crianca(_)) {
                return Err(ModalError::OptionsLoading);
            }
            let prepared = self.prepare(&input, inner.options.as_ref())?;
            inner.state = ModalState::Submitting;
            prepared
        };

        let result = self.perform(prepared).await;

        let mut inner = lock(&self.inner);
        match result {
            Ok(outcome) => {
                inner.state = ModalState::Closed;
                drop(inner);
                self.release();
                Ok(outcome)
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!("{} failed: {message}", self.action);
                inner.state = ModalState::Failed(message.clone());
                // Seats may have moved; the next load refetches.
                inner.options = None;
                Err(ModalError::Failed(message))
            }
        }
    }

    /// Dismiss without submitting. Ignored while a submission is pending.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == ModalState::Submitting {
            return;
        }
        inner.state = ModalState::Closed;
        drop(inner);
        self.release();
    }

    fn prepare(&self, input: &FormInput, options: Option<&ActionOptions>) -> std::result::Result<Prepared, ValidationError> {
        let selecao = input.selecao.as_deref().map(str::trim).unwrap_or_default();
        let turma = |field| pick_turma(options, selecao, field);

        Ok(match self.action {
            Action::Convocar => {
                let opcao = turma("turma")?;
                Prepared::Convocar(ConvocacaoData {
                    cmei_id: opcao.cmei_id.clone(),
                    turma_id: opcao.turma_id.clone(),
                })
            }
            Action::Matricular => Prepared::Matricular,
            Action::Realocar => Prepared::Realocar(turma("turma")?.turma_id.clone()),
            Action::Transferir => Prepared::Transferir(turma("turma")?.turma_id.clone()),
            Action::Remanejamento => {
                validation::require_selection(selecao, "cmei")?;
                let valida = options.is_some_and(|o| o.cmeis.iter().any(|c| c.id == selecao));
                if !valida {
                    return Err(ValidationError::OpcaoIndisponivel);
                }
                validation::validate_justificativa(&input.justificativa)?;
                Prepared::Remanejamento {
                    cmei_id: selecao.to_string(),
                    justificativa: input.justificativa.clone(),
                }
            }
            Action::StatusEmMassa(_) => {
                validation::validate_justificativa(&input.justificativa)?;
                Prepared::Massa { justificativa: input.justificativa.clone() }
            }
        })
    }

    async fn perform(&self, prepared: Prepared) -> Result<ModalOutcome> {
        let wf = &self.workflow;
        let usuario = self.usuario.as_str();
        let label = self.action.label();

        let crianca = match (&self.subject, prepared) {
            (Subject::Selecao { ids, status }, Prepared::Massa { justificativa }) => {
                let ack = wf.alterar_status_em_massa(ids, *status, &justificativa, usuario).await?;
                return Ok(ModalOutcome {
                    notice: Notice::success(format!("{label}: {} criança(s) atualizada(s)", ack.affected)),
                    crianca: None,
                });
            }
            (Subject::Crianca(c), Prepared::Convocar(selecao)) => wf.convocar(c, &selecao, usuario).await?,
            (Subject::Crianca(c), Prepared::Matricular) => wf.matricular(c, usuario).await?,
            (Subject::Crianca(c), Prepared::Realocar(turma_id)) => wf.realocar(c, &turma_id, usuario).await?,
            (Subject::Crianca(c), Prepared::Transferir(turma_id)) => wf.transferir(c, &turma_id, usuario).await?,
            (Subject::Crianca(c), Prepared::Remanejamento { cmei_id, justificativa }) => {
                wf.solicitar_remanejamento(c, &cmei_id, &justificativa, usuario).await?
            }
            _ => return Err(CmeiError::Rejected(format!("{label} does not apply to this form"))),
        };

        Ok(ModalOutcome {
            notice: Notice::success(format!("{label}: {}", crianca.nome)),
            crianca: Some(crianca),
        })
    }
}

impl<B: ?Sized> ActionModal<B> {
    /// Free the target once. A later form for the same target owns the
    /// entry after that.
    fn release(&self) {
        let mut inner = lock(&self.inner);
        if inner.released {
            return;
        }
        inner.released = true;
        drop(inner);
        lock(&self.abertos).remove(&self.target);
    }
}

impl<B: ?Sized> Drop for ActionModal<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingBackend, Seed, counting, gated, nova};
    use cmei_core::config::FilaConfig;
    use cmei_core::status::Status;

    fn host(backend: Arc<CountingBackend>) -> ModalHost<CountingBackend> {
        ModalHost::new(Arc::new(Workflow::new(backend, &FilaConfig::default())), "secretaria")
    }

    fn waiting(backend: &CountingBackend, seed: &Seed, nome: &str, cpf: &str) -> Crianca {
        let c = backend.db.insert_crianca(&nova(nome, cpf, &seed.cmei_x.id), "u").unwrap();
        backend.db.recalculate_fila_posicao().unwrap();
        backend.db.get_crianca(&c.id).unwrap()
    }

    async fn enrolled(host: &ModalHost<CountingBackend>, crianca: Crianca, turma_id: &str) -> Crianca {
        let modal = host.open(crianca, Action::Convocar).unwrap();
        modal.load_options().await.unwrap();
        let convocado = modal.submit(FormInput::selecao(turma_id)).await.unwrap().crianca.unwrap();

        let modal = host.open(convocado, Action::Matricular).unwrap();
        modal.load_options().await.unwrap();
        modal.submit(FormInput::default()).await.unwrap().crianca.unwrap()
    }

    #[tokio::test]
    async fn test_blocked_action_never_opens() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        backend.reset();

        let err = host.open(c.clone(), Action::Matricular).err().unwrap();
        assert!(matches!(err, ModalError::Blocked(_)));
        assert!(!host.is_open(&ModalTarget::Crianca(c.id)));
        assert_eq!(backend.calls("list_turmas"), 0);
    }

    #[tokio::test]
    async fn test_one_modal_per_target() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");

        let first = host.open(c.clone(), Action::Convocar).unwrap();
        assert!(matches!(host.open(c.clone(), Action::Remanejamento), Err(ModalError::AlreadyOpen)));

        drop(first);
        let again = host.open(c.clone(), Action::Remanejamento).unwrap();
        again.close();
        assert_eq!(again.state(), ModalState::Closed);
        assert!(!host.is_open(&ModalTarget::Crianca(c.id)));
    }

    #[tokio::test]
    async fn test_dropping_closed_form_keeps_newer_form_open() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        let target = ModalTarget::Crianca(c.id.clone());

        let old = host.open(c.clone(), Action::Convocar).unwrap();
        old.close();
        let current = host.open(c.clone(), Action::Remanejamento).unwrap();
        drop(old);

        assert!(host.is_open(&target));
        assert!(matches!(host.open(c.clone(), Action::Convocar), Err(ModalError::AlreadyOpen)));
        drop(current);
        assert!(!host.is_open(&target));
    }

    #[tokio::test]
    async fn test_submit_refused_while_loading() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");

        let modal = host.open(c, Action::Convocar).unwrap();
        assert_eq!(modal.state(), ModalState::Loading);
        let err = modal.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::OptionsLoading));
        assert_eq!(backend.calls("apply_mutation"), 0);
    }

    #[tokio::test]
    async fn test_options_fetched_fresh_each_open() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");

        for expected in 1..=2 {
            let modal = host.open(c.clone(), Action::Convocar).unwrap();
            let options = modal.load_options().await.unwrap();
            assert_eq!(options.turmas.len(), 3);
            assert_eq!(backend.calls("list_turmas"), expected);
        }
    }

    #[tokio::test]
    async fn test_relocation_options_and_unavailable_choice() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        let c = enrolled(&host, c, &seed.turma_x1.id).await;
        assert_eq!(c.status, Status::Matriculado);
        backend.reset();

        let modal = host.open(c, Action::Realocar).unwrap();
        let options = modal.load_options().await.unwrap();
        assert_eq!(options.turmas.len(), 2);
        assert!(options.turmas.iter().all(|t| t.cmei_id == seed.cmei_x.id));

        let err = modal.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::Invalid(ValidationError::OpcaoIndisponivel)));
        let err = modal.submit(FormInput::selecao(&seed.turma_y1.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::Invalid(ValidationError::OpcaoIndisponivel)));
        assert_eq!(modal.state(), ModalState::Selecting);
        assert_eq!(backend.calls("apply_mutation"), 0);

        let outcome = modal.submit(FormInput::selecao(&seed.turma_x2.id)).await.unwrap();
        assert_eq!(outcome.crianca.unwrap().turma_atual_id.as_deref(), Some(seed.turma_x2.id.as_str()));
        assert_eq!(outcome.notice.level, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn test_double_submit_issues_one_call() {
        let (backend, seed) = gated();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        let modal = host.open(c, Action::Convocar).unwrap();
        modal.load_options().await.unwrap();

        let input = FormInput::selecao(&seed.turma_x1.id);
        let (first, second) = tokio::join!(modal.submit(input.clone()), async {
            let second = modal.submit(input.clone()).await;
            backend.release();
            second
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(ModalError::SubmissionPending)));
        assert_eq!(backend.calls("apply_mutation"), 1);
    }

    #[tokio::test]
    async fn test_success_closes_releases_and_refreshes() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        let target = ModalTarget::Crianca(c.id.clone());

        let modal = host.open(c, Action::Convocar).unwrap();
        modal.load_options().await.unwrap();
        backend.reset();

        let outcome = modal.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap();
        assert_eq!(outcome.crianca.unwrap().status, Status::Convocado);
        assert_eq!(modal.state(), ModalState::Closed);
        assert!(!host.is_open(&target));
        assert_eq!(backend.calls("list_criancas"), 1);
        assert_eq!(backend.calls("list_historico"), 1);

        let err = modal.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::NotOpen));
    }

    #[tokio::test]
    async fn test_failure_keeps_modal_open_for_retry() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let a = waiting(&backend, &seed, "A", "529.982.247-25");
        let b = waiting(&backend, &seed, "B", "111.444.777-35");

        let modal_a = host.open(a, Action::Convocar).unwrap();
        let modal_b = host.open(b, Action::Convocar).unwrap();
        modal_a.load_options().await.unwrap();
        modal_b.load_options().await.unwrap();

        // Both saw the single free seat; only the first gets it.
        modal_a.submit(FormInput::selecao(&seed.turma_x2.id)).await.unwrap();
        let err = modal_b.submit(FormInput::selecao(&seed.turma_x2.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::Failed(_)));
        assert!(matches!(modal_b.state(), ModalState::Failed(_)));
        assert_eq!(err.notice().level, NoticeLevel::Error);
        assert!(modal_b.options().is_none());

        // Retry works on a fresh view of the seats.
        let err = modal_b.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap_err();
        assert!(matches!(err, ModalError::OptionsLoading));
        let options = modal_b.load_options().await.unwrap();
        let x2 = options.turmas.iter().find(|t| t.turma_id == seed.turma_x2.id).unwrap();
        assert_eq!(x2.vagas, 0);
        assert!(!x2.selectable);

        let outcome = modal_b.submit(FormInput::selecao(&seed.turma_x1.id)).await.unwrap();
        assert_eq!(outcome.crianca.unwrap().status, Status::Convocado);
    }

    #[tokio::test]
    async fn test_mass_form_needs_justificativa() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let ids: Vec<String> = [("A", "529.982.247-25"), ("B", "111.444.777-35"), ("C", "390.533.447-05")]
            .into_iter()
            .map(|(nome, cpf)| waiting(&backend, &seed, nome, cpf).id)
            .collect();

        assert!(matches!(host.open_mass(Vec::new(), MassStatus::FimDeFila), Err(ModalError::Invalid(_))));
        let modal = host.open_mass(ids.clone(), MassStatus::FimDeFila).unwrap();
        assert!(matches!(host.open_mass(ids, MassStatus::Recusada), Err(ModalError::AlreadyOpen)));

        let err = modal.submit(FormInput::justificativa("123456789")).await.unwrap_err();
        assert!(matches!(err, ModalError::Invalid(ValidationError::JustificativaCurta { .. })));
        assert_eq!(backend.calls("apply_mass_status"), 0);

        let outcome = modal.submit(FormInput::justificativa("1234567890")).await.unwrap();
        assert!(outcome.crianca.is_none());
        assert_eq!(backend.calls("apply_mass_status"), 1);
        assert!(!host.is_open(&ModalTarget::Selecao));
    }

    #[tokio::test]
    async fn test_remanejamento_form() {
        let (backend, seed) = counting();
        let host = host(backend.clone());
        let c = waiting(&backend, &seed, "Ana", "529.982.247-25");
        let c = enrolled(&host, c, &seed.turma_x1.id).await;

        let modal = host.open(c, Action::Remanejamento).unwrap();
        let options = modal.load_options().await.unwrap();
        assert_eq!(options.cmeis.len(), 1);
        assert_eq!(options.cmeis[0].id, seed.cmei_y.id);

        let input = FormInput::selecao(&seed.cmei_x.id).com_justificativa("Mudança de endereço");
        assert!(matches!(modal.submit(input).await, Err(ModalError::Invalid(ValidationError::OpcaoIndisponivel))));

        let input = FormInput::selecao(&seed.cmei_y.id).com_justificativa("Mudança de endereço");
        let outcome = modal.submit(input).await.unwrap();
        assert_eq!(outcome.crianca.unwrap().status, Status::RemanejamentoSolicitado);
    }
}
