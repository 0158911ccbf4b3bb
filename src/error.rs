//! Error types for thread processing.
//!
//! Errors are classified by recoverability:
//! - Retryable: transient external failures (mail, calendar, model calls).
//!   The thread lands in `error` state and the next pass retries it.
//! - NonRetryable: semantic failures (bad model output, out-of-range slot
//!   index, missing credentials) that need a config fix or a new reply
//!   before another attempt can succeed.
//!
//! The classification is informational — it is surfaced in the stored
//! `errorMessage` and logs, not acted on automatically.

use thiserror::Error;

use crate::ai::AiError;
use crate::google_api::GoogleApiError;
use crate::mail::MailError;
use crate::store::StoreError;

/// Error raised while processing a single thread. Caught at the
/// per-thread boundary in the batch orchestrator and converted into
/// `error` state — never propagated to the batch caller.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("mail: {0}")]
    Mail(#[from] MailError),

    #[error("calendar: {0}")]
    Calendar(#[from] GoogleApiError),

    #[error("model: {0}")]
    Ai(#[from] AiError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The interpreter resolved a slot reference to an index outside the
    /// currently proposed slots. Caller-side semantic error, not `unclear`.
    #[error("Invalid slot index: {0}")]
    InvalidSlotIndex(usize),
}

impl ProcessError {
    /// Whether a later pass can plausibly succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Mail(_) | ProcessError::Store(_) => true,
            ProcessError::Calendar(e) => !matches!(
                e,
                GoogleApiError::TokenNotFound(_) | GoogleApiError::AuthExpired
            ),
            ProcessError::Ai(e) => matches!(e, AiError::Http(_) | AiError::Api { .. }),
            ProcessError::InvalidSlotIndex(_) => false,
        }
    }
}
