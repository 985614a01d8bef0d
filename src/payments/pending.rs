use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{
    CurrencyId, PaymentId, PendingAllocationId, PendingAllocationStatus, QuotaId, ResolutionType,
    UserId,
};

/// an unresolved payment remainder awaiting administrative resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPendingAllocation {
    pub id: PendingAllocationId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub currency_id: CurrencyId,
    pub status: PendingAllocationStatus,
    pub resolution_type: Option<ResolutionType>,
    pub resolution_notes: Option<String>,
    pub allocated_to_quota_id: Option<QuotaId>,
    pub allocated_by: Option<UserId>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PaymentPendingAllocation {
    pub fn new(
        payment_id: PaymentId,
        amount: Money,
        currency_id: CurrencyId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            currency_id,
            status: PendingAllocationStatus::Pending,
            resolution_type: None,
            resolution_notes: None,
            allocated_to_quota_id: None,
            allocated_by: None,
            allocated_at: None,
            created_at,
        }
    }

    /// double resolution is fatal, never retried
    pub fn ensure_pending(&self) -> Result<()> {
        if self.status != PendingAllocationStatus::Pending {
            return Err(BillingError::AlreadyResolved {
                allocation_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// close out toward a designated quota
    pub fn mark_allocated(
        &mut self,
        quota_id: QuotaId,
        by: UserId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_pending()?;
        self.status = PendingAllocationStatus::Allocated;
        self.resolution_type = Some(ResolutionType::AppliedToQuota);
        self.allocated_to_quota_id = Some(quota_id);
        self.allocated_by = Some(by);
        self.allocated_at = Some(at);
        self.resolution_notes = notes;
        Ok(())
    }

    /// close out toward the external refund collaborator, no quota linkage
    pub fn mark_refunded(
        &mut self,
        by: UserId,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_pending()?;
        self.status = PendingAllocationStatus::Refunded;
        self.resolution_type = Some(ResolutionType::Refunded);
        self.allocated_by = Some(by);
        self.allocated_at = Some(at);
        self.resolution_notes = notes;
        Ok(())
    }
}

/// administrator's decision for a pending remainder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingResolution {
    /// apply the remainder to one designated quota
    AllocateToQuota {
        quota_id: QuotaId,
        resolved_by: UserId,
        notes: Option<String>,
    },
    /// authorize a refund via the external collaborator
    Refund {
        resolved_by: UserId,
        notes: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PaymentPendingAllocation {
        PaymentPendingAllocation::new(
            Uuid::new_v4(),
            Money::from_major(10),
            Uuid::new_v4(),
            Utc::now(),
        )
    }

    #[test]
    fn test_allocate_resolution() {
        let mut p = pending();
        let quota_id = Uuid::new_v4();
        let admin = Uuid::new_v4();
        p.mark_allocated(quota_id, admin, Some("applied to march".to_string()), Utc::now())
            .unwrap();
        assert_eq!(p.status, PendingAllocationStatus::Allocated);
        assert_eq!(p.allocated_to_quota_id, Some(quota_id));
        assert_eq!(p.resolution_type, Some(ResolutionType::AppliedToQuota));
    }

    #[test]
    fn test_refund_resolution_has_no_quota() {
        let mut p = pending();
        p.mark_refunded(Uuid::new_v4(), None, Utc::now()).unwrap();
        assert_eq!(p.status, PendingAllocationStatus::Refunded);
        assert!(p.allocated_to_quota_id.is_none());
    }

    #[test]
    fn test_double_resolution_fails() {
        let mut p = pending();
        p.mark_refunded(Uuid::new_v4(), None, Utc::now()).unwrap();
        let err = p
            .mark_allocated(Uuid::new_v4(), Uuid::new_v4(), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, BillingError::AlreadyResolved { .. }));
        assert!(!err.is_retryable());
    }
}
