use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use std::time::Duration;
use thiserror::Error;
use tracing::{Span, error, warn};

use crate::validation::FieldErrors;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error(
        "Inconsistent squad size in chain of formation {formation_id}: expected {expected}, formation {offender_id} has {found}"
    )]
    InconsistentSquadSize {
        formation_id: i64,
        offender_id: i64,
        expected: i64,
        found: i64,
    },

    #[error("Cycle detected in chain of formation {formation_id}: formation {revisited_id} revisited")]
    CycleDetected {
        formation_id: i64,
        revisited_id: i64,
    },

    #[error("Owner required: {0}")]
    OwnerRequired(String),

    #[error("Deadline of {0:?} exceeded, transaction rolled back")]
    DeadlineExceeded(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(FieldErrors::single(field, message))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::InconsistentSquadSize { .. } => "inconsistent_squad_size",
            AppError::CycleDetected { .. } => "cycle_detected",
            AppError::OwnerRequired(_) => "owner_required_error",
            AppError::DeadlineExceeded(_) => "deadline_exceeded",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Stored state violates a derivation invariant. Never repaired automatically.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            AppError::InconsistentSquadSize { .. } | AppError::CycleDetected { .. }
        )
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
            }
            AppError::Validation(fields) => {
                warn!(fields = %fields, context = %ctx, "Validation error");
            }
            AppError::Conflict(msg) => {
                warn!(message = %msg, context = %ctx, "Conflict error");
            }
            AppError::Authorization(msg) => {
                warn!(message = %msg, context = %ctx, "Authorization error");
            }
            AppError::InconsistentSquadSize {
                formation_id,
                offender_id,
                expected,
                found,
            } => {
                error!(
                    formation_id,
                    offender_id,
                    expected,
                    found,
                    context = %ctx,
                    "DATA INTEGRITY VIOLATION: inconsistent squad size in derivation chain"
                );
            }
            AppError::CycleDetected {
                formation_id,
                revisited_id,
            } => {
                error!(
                    formation_id,
                    revisited_id,
                    context = %ctx,
                    "DATA INTEGRITY VIOLATION: cycle in derivation chain"
                );
            }
            AppError::OwnerRequired(msg) => {
                warn!(message = %msg, context = %ctx, "Owner required error");
            }
            AppError::DeadlineExceeded(deadline) => {
                error!(deadline_ms = deadline.as_millis() as u64, context = %ctx, "Deadline exceeded");
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal error");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));

            match self {
                AppError::Database(_)
                | AppError::Internal(_)
                | AppError::DeadlineExceeded(_)
                | AppError::InconsistentSquadSize { .. }
                | AppError::CycleDetected { .. } => {
                    current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
                }
                _ => {}
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(FieldErrors::from(errors))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", error))
    }
}
