//! # CMEI Workflow
//!
//! Everything between an operator's action and the store:
//! - [`mutations`]: one guarded backend call per transition
//! - [`cache`]: whole-list snapshots and their invalidation table
//! - [`modal`]: per-target action forms with an in-flight guard
//! - [`import`]: best-effort CSV intake
//! - [`cpf_lookup`]: responsible-party autofill

pub mod cache;
pub mod cpf_lookup;
pub mod import;
pub mod modal;
pub mod mutations;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{QueryCache, QueryKey, Workflow, invalidation_for};
pub use cpf_lookup::CpfAutofill;
pub use import::{ImportReport, ImportResults, RowError};
pub use modal::{ActionModal, ActionOptions, FormInput, ModalError, ModalHost, ModalOutcome, ModalState, ModalTarget, Notice, NoticeLevel};
pub use mutations::Mutations;
