use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::quota::Quota;
use crate::types::{AdjustmentType, QuotaId, QuotaStatus, UserId};

/// minimum characters for an adjustment reason, a domain invariant
const MIN_REASON_LEN: usize = 10;

/// append-only correction record for a quota's base amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaAdjustment {
    pub id: Uuid,
    pub quota_id: QuotaId,
    pub adjustment_type: AdjustmentType,
    pub previous_amount: Money,
    pub new_amount: Money,
    pub reason: String,
    pub adjusted_by: UserId,
    pub adjusted_at: DateTime<Utc>,
}

/// a requested manual adjustment, before application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub adjustment_type: AdjustmentType,
    /// discount/increase delta, or the replacement base for corrections; unused for waivers
    pub amount: Money,
    pub reason: String,
    pub adjusted_by: UserId,
}

impl AdjustmentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.reason.trim().len() < MIN_REASON_LEN {
            return Err(BillingError::validation(format!(
                "adjustment reason must be at least {MIN_REASON_LEN} characters"
            )));
        }
        match self.adjustment_type {
            AdjustmentType::Discount | AdjustmentType::Increase => {
                if !self.amount.is_positive() {
                    return Err(BillingError::validation(
                        "discount/increase amount must be positive",
                    ));
                }
            }
            AdjustmentType::Correction => {
                if self.amount.is_negative() {
                    return Err(BillingError::validation(
                        "corrected base amount cannot be negative",
                    ));
                }
            }
            AdjustmentType::Waiver => {}
        }
        Ok(())
    }
}

/// applies manual adjustments outside the payment flow
pub struct AdjustmentApplier;

impl AdjustmentApplier {
    pub fn new() -> Self {
        Self
    }

    /// mutate the quota's base per the request and return the audit record
    pub fn apply(
        &self,
        quota: &mut Quota,
        request: &AdjustmentRequest,
        now: DateTime<Utc>,
    ) -> Result<QuotaAdjustment> {
        request.validate()?;
        if !quota.status.is_open() {
            return Err(BillingError::validation(format!(
                "quota {} is {:?} and cannot be adjusted",
                quota.id, quota.status
            )));
        }

        let previous = quota.base_amount;
        match request.adjustment_type {
            AdjustmentType::Discount => {
                let reduced = previous - request.amount;
                if reduced.is_negative() {
                    return Err(BillingError::validation(format!(
                        "discount {} exceeds base amount {previous}",
                        request.amount
                    )));
                }
                quota.rebase(reduced)?;
            }
            AdjustmentType::Increase => quota.rebase(previous + request.amount)?,
            AdjustmentType::Correction => quota.rebase(request.amount)?,
            AdjustmentType::Waiver => {
                // forgive unpaid interest and remaining principal; paid history stays intact
                quota.interest_amount = quota.interest_paid;
                quota.base_amount = quota.paid_amount - quota.interest_paid;
                quota.balance = Money::ZERO;
                quota.set_status(QuotaStatus::Cancelled)?;
            }
        }
        quota.check_invariants()?;

        Ok(QuotaAdjustment {
            id: Uuid::new_v4(),
            quota_id: quota.id,
            adjustment_type: request.adjustment_type,
            previous_amount: previous,
            new_amount: quota.base_amount,
            reason: request.reason.clone(),
            adjusted_by: request.adjusted_by,
            adjusted_at: now,
        })
    }
}

impl Default for AdjustmentApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::test_support::quota_due;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(adjustment_type: AdjustmentType, amount: Money) -> AdjustmentRequest {
        AdjustmentRequest {
            adjustment_type,
            amount,
            reason: "board-approved correction".to_string(),
            adjusted_by: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_reason_length_enforced() {
        let mut req = request(AdjustmentType::Discount, Money::from_major(10));
        req.reason = "too short".to_string();
        assert!(req.validate().is_err());
        req.reason = "waived per assembly minutes 2024-03".to_string();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_discount_reduces_balance() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        let applier = AdjustmentApplier::new();
        let record = applier
            .apply(&mut quota, &request(AdjustmentType::Discount, Money::from_major(30)), Utc::now())
            .unwrap();
        assert_eq!(quota.base_amount, Money::from_major(70));
        assert_eq!(quota.balance, Money::from_major(70));
        assert_eq!(record.previous_amount, Money::from_major(100));
        assert_eq!(record.new_amount, Money::from_major(70));
    }

    #[test]
    fn test_increase_raises_balance() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        AdjustmentApplier::new()
            .apply(&mut quota, &request(AdjustmentType::Increase, Money::from_major(25)), Utc::now())
            .unwrap();
        assert_eq!(quota.balance, Money::from_major(125));
        quota.check_invariants().unwrap();
    }

    #[test]
    fn test_correction_replaces_base() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        quota
            .record_allocation(Money::from_major(40), Money::ZERO)
            .unwrap();
        AdjustmentApplier::new()
            .apply(&mut quota, &request(AdjustmentType::Correction, Money::from_major(90)), Utc::now())
            .unwrap();
        assert_eq!(quota.base_amount, Money::from_major(90));
        assert_eq!(quota.balance, Money::from_major(50));
        quota.check_invariants().unwrap();
    }

    #[test]
    fn test_waiver_zeroes_and_cancels() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        quota.record_accrual(Money::from_major(5), date(2024, 2, 1));
        quota
            .record_allocation(Money::from_major(40), Money::from_major(5))
            .unwrap();

        AdjustmentApplier::new()
            .apply(&mut quota, &request(AdjustmentType::Waiver, Money::ZERO), Utc::now())
            .unwrap();
        assert!(quota.balance.is_zero());
        assert_eq!(quota.status, QuotaStatus::Cancelled);
        // received money is not forgotten
        assert_eq!(quota.paid_amount, Money::from_major(40));
        quota.check_invariants().unwrap();
    }

    #[test]
    fn test_discount_cannot_exceed_base() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        assert!(AdjustmentApplier::new()
            .apply(&mut quota, &request(AdjustmentType::Discount, Money::from_major(150)), Utc::now())
            .is_err());
    }

    #[test]
    fn test_paid_quota_cannot_be_adjusted() {
        let mut quota = quota_due(Money::from_major(100), date(2024, 1, 15));
        quota
            .record_allocation(Money::from_major(100), Money::ZERO)
            .unwrap();
        assert!(AdjustmentApplier::new()
            .apply(&mut quota, &request(AdjustmentType::Discount, Money::from_major(10)), Utc::now())
            .is_err());
    }
}
