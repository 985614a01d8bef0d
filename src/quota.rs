use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::formula::FormulaSnapshot;
use crate::types::{
    BuildingId, ConceptId, CondominiumId, CurrencyId, Period, QuotaId, QuotaStatus, UnitId,
};

/// one billable instance of a payment concept for one unit in one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub id: QuotaId,
    pub condominium_id: CondominiumId,
    pub building_id: Option<BuildingId>,
    pub unit_id: UnitId,
    pub concept_id: ConceptId,
    pub period: Period,
    pub currency_id: CurrencyId,

    pub base_amount: Money,
    /// cumulative interest accrued while overdue
    pub interest_amount: Money,
    /// cumulative amount received, principal and interest together
    pub paid_amount: Money,
    /// interest portion of paid_amount
    pub interest_paid: Money,
    /// base_amount + interest_amount - paid_amount, never negative
    pub balance: Money,

    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: QuotaStatus,
    /// date interest was last brought current; None until the first accrual run
    pub last_interest_accrual: Option<NaiveDate>,
    /// one-time late surcharge already charged
    pub surcharge_applied: bool,
    /// one-time flat interest charge already applied
    pub flat_interest_applied: bool,
    pub formula_snapshot: FormulaSnapshot,
    /// optimistic concurrency token, bumped by the store on every update
    pub version: u64,
}

impl Quota {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        condominium_id: CondominiumId,
        building_id: Option<BuildingId>,
        unit_id: UnitId,
        concept_id: ConceptId,
        period: Period,
        currency_id: CurrencyId,
        base_amount: Money,
        issue_date: NaiveDate,
        due_date: NaiveDate,
        formula_snapshot: FormulaSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            condominium_id,
            building_id,
            unit_id,
            concept_id,
            period,
            currency_id,
            base_amount,
            interest_amount: Money::ZERO,
            paid_amount: Money::ZERO,
            interest_paid: Money::ZERO,
            balance: base_amount,
            issue_date,
            due_date,
            status: QuotaStatus::Pending,
            last_interest_accrual: None,
            surcharge_applied: false,
            flat_interest_applied: false,
            formula_snapshot,
            version: 0,
        }
    }

    /// accrued interest not yet covered by payments
    pub fn unpaid_interest(&self) -> Money {
        (self.interest_amount - self.interest_paid).max(Money::ZERO)
    }

    /// outstanding principal portion of the balance
    pub fn principal_balance(&self) -> Money {
        (self.balance - self.unpaid_interest()).max(Money::ZERO)
    }

    /// whole days past the due date, zero if not yet due
    pub fn days_overdue(&self, as_of: NaiveDate) -> u32 {
        (as_of - self.due_date).num_days().max(0) as u32
    }

    /// guarded status change; backward moves are rejected
    pub fn set_status(&mut self, next: QuotaStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidStatusTransition {
                quota_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// flip pending to overdue once the due date has passed
    pub fn refresh_overdue(&mut self, as_of: NaiveDate) -> Result<()> {
        if self.status == QuotaStatus::Pending && as_of > self.due_date && !self.balance.is_zero() {
            self.set_status(QuotaStatus::Overdue)?;
        }
        Ok(())
    }

    /// add accrued interest and mark the accrual date
    pub fn record_accrual(&mut self, amount: Money, as_of: NaiveDate) {
        if amount.is_positive() {
            self.interest_amount += amount;
            self.balance += amount;
        }
        self.last_interest_accrual = Some(as_of);
    }

    /// add the one-time late surcharge to the carried interest
    pub fn record_surcharge(&mut self, amount: Money) {
        if amount.is_positive() {
            self.interest_amount += amount;
            self.balance += amount;
            self.surcharge_applied = true;
        }
    }

    /// apply an allocation, interest first, and settle the quota when cleared
    pub fn record_allocation(&mut self, total: Money, to_interest: Money) -> Result<()> {
        if total.is_negative() || total > self.balance {
            return Err(BillingError::validation(format!(
                "allocation {total} does not fit quota balance {}",
                self.balance
            )));
        }
        if to_interest > total || to_interest > self.unpaid_interest() {
            return Err(BillingError::validation(
                "interest split exceeds allocation or unpaid interest",
            ));
        }
        self.paid_amount += total;
        self.interest_paid += to_interest;
        self.balance = self.base_amount + self.interest_amount - self.paid_amount;
        if self.balance.is_zero() {
            self.set_status(QuotaStatus::Paid)?;
        }
        Ok(())
    }

    /// replace the base amount after an adjustment and recompute the balance
    pub fn rebase(&mut self, new_base: Money) -> Result<()> {
        let new_balance = new_base + self.interest_amount - self.paid_amount;
        if new_balance.is_negative() {
            return Err(BillingError::validation(format!(
                "adjusted base {new_base} would drive the balance negative"
            )));
        }
        self.base_amount = new_base;
        self.balance = new_balance;
        Ok(())
    }

    /// invariant check: balance identity and non-negativity
    pub fn check_invariants(&self) -> Result<()> {
        let expected = self.base_amount + self.interest_amount - self.paid_amount;
        if self.balance != expected {
            return Err(BillingError::validation(format!(
                "quota {} balance {} != base {} + interest {} - paid {}",
                self.id, self.balance, self.base_amount, self.interest_amount, self.paid_amount
            )));
        }
        if self.balance.is_negative() {
            return Err(BillingError::validation(format!(
                "quota {} balance is negative: {}",
                self.id, self.balance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::formula::{CompiledFormula, FormulaSnapshot};

    pub fn quota_due(base: Money, due_date: NaiveDate) -> Quota {
        use chrono::Datelike;
        let currency_id = Uuid::new_v4();
        Quota::new(
            Uuid::new_v4(),
            None,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Period::monthly(due_date.year(), due_date.month()),
            currency_id,
            base,
            due_date - chrono::Duration::days(14),
            due_date,
            FormulaSnapshot {
                formula_id: Uuid::new_v4(),
                currency_id,
                compiled: CompiledFormula::Fixed { amount: base },
            },
        )
    }
}
