//! Responsible-party autofill keyed by CPF.

use cmei_core::cpf;
use cmei_core::error::Result;
use cmei_core::traits::WaitlistBackend;
use cmei_core::types::Responsavel;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Looks up each distinct completed CPF at most once per form.
pub struct CpfAutofill<B: ?Sized> {
    backend: Arc<B>,
    consultados: Mutex<HashSet<String>>,
}

impl<B: WaitlistBackend + ?Sized> CpfAutofill<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            consultados: Mutex::new(HashSet::new()),
        }
    }

    /// Feed the current value of the CPF field. Returns the fields to
    /// populate when this is the first time the completed CPF is seen and
    /// a previous registration matches it.
    pub async fn on_input(&self, value: &str) -> Result<Option<Responsavel>> {
        let masked = cpf::format(value);
        if !cpf::is_complete(&masked) {
            return Ok(None);
        }
        let digits = cpf::digits(&masked);
        if self.consultados().contains(&digits) {
            return Ok(None);
        }

        // Only a completed lookup counts; a failed one is retried next time.
        let found = self.backend.find_responsavel_by_cpf(&masked).await?;
        if !self.consultados().insert(digits) {
            return Ok(None);
        }
        if found.is_some() {
            tracing::debug!("Autofill hit for CPF {}", &masked[..3]);
        }
        Ok(found)
    }

    fn consultados(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.consultados.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
