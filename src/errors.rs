use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{PendingAllocationStatus, QuotaStatus};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("formula resolution failed for unit {unit_id}: {message}")]
    FormulaResolution { unit_id: Uuid, message: String },

    #[error("no exchange rate from currency {from} to {to} as of {as_of}")]
    CurrencyMismatch {
        from: Uuid,
        to: Uuid,
        as_of: chrono::NaiveDate,
    },

    #[error("allocation of payment {payment_id} hit contention after {attempts} attempt(s)")]
    ConcurrentAllocation { payment_id: Uuid, attempts: u32 },

    #[error("pending allocation {allocation_id} already resolved: status is {status:?}")]
    AlreadyResolved {
        allocation_id: Uuid,
        status: PendingAllocationStatus,
    },

    #[error("persistence failure: {message}")]
    Persistence { message: String },

    #[error("stale write to quota {quota_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        quota_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("quota {quota_id} cannot move from {from:?} to {to:?}")]
    InvalidStatusTransition {
        quota_id: Uuid,
        from: QuotaStatus,
        to: QuotaStatus,
    },

    #[error("payment {payment_id} is not completed and cannot be allocated")]
    PaymentNotAllocatable { payment_id: Uuid },

    #[error("allocated total would exceed the payment's usable amount: usable {usable}, attempted {attempted}")]
    AllocationOverrun { usable: Money, attempted: Money },
}

impl BillingError {
    /// retryable errors may be re-run safely under the engine's idempotency guarantees
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::Persistence { .. }
                | BillingError::ConcurrentAllocation { .. }
                | BillingError::VersionConflict { .. }
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        BillingError::Persistence {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;
