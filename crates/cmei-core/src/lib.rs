//! # CMEI Core
//!
//! Shared vocabulary of the waitlist service: the child/classroom data
//! model, the closed status taxonomy with its transition rules,
//! client-side validation, configuration, and the narrow backend contract
//! every store implements.
//!
//! ```text
//! Fila de Espera ──Convocar──▶ Convocado ──Matricular──▶ Matriculado
//!       ▲                          │                        │
//!       └──── Fim de Fila ◀────────┴── mass actions ◀───────┘
//!                                    (Desistente, Recusada,
//!                                     Remanejamento Solicitado)
//! ```

pub mod config;
pub mod cpf;
pub mod error;
pub mod status;
pub mod traits;
pub mod transition;
pub mod types;
pub mod validation;

pub use config::CmeiConfig;
pub use error::{CmeiError, Result};
pub use status::{MassStatus, PrioridadeFila, Status};
pub use traits::{MassAck, MassStatusRequest, MutationChange, MutationRequest, WaitlistBackend};
pub use transition::{Action, TransitionError, TurmaOption};
pub use types::{Cmei, Convocacao, ConvocacaoData, Crianca, HistoricoEntry, NovaCrianca, Responsavel, Sexo, Turma};
pub use validation::{JUSTIFICATIVA_MIN_CHARS, ValidationError};
