use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{BillingError, Result};
use crate::types::{BuildingId, ConceptId, CondominiumId, CurrencyId};

/// charge scope: whole condominium or one building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConceptScope {
    Condominium,
    Building,
}

/// recurrence of a payment concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencePeriod {
    None,
    Monthly,
    Quarterly,
    Yearly,
}

/// shape of a surcharge or discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeKind {
    None,
    Percentage,
    Fixed,
}

/// late-payment surcharge terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurchargeConfig {
    pub kind: ChargeKind,
    pub value: Decimal,
    pub grace_days: u32,
}

impl SurchargeConfig {
    pub fn none() -> Self {
        Self {
            kind: ChargeKind::None,
            value: Decimal::ZERO,
            grace_days: 0,
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        match self.kind {
            ChargeKind::None => Ok(()),
            ChargeKind::Percentage => {
                if self.value <= Decimal::ZERO || self.value > Decimal::from(100) {
                    return Err(BillingError::validation(format!(
                        "{label} percentage must be in (0, 100], got {}",
                        self.value
                    )));
                }
                Ok(())
            }
            ChargeKind::Fixed => {
                if self.value <= Decimal::ZERO {
                    return Err(BillingError::validation(format!(
                        "{label} fixed value must be positive, got {}",
                        self.value
                    )));
                }
                Ok(())
            }
        }
    }
}

/// early-payment discount terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountConfig {
    pub kind: ChargeKind,
    pub value: Decimal,
    /// paying this many days before the due date earns the discount
    pub days_before_due: u32,
}

impl DiscountConfig {
    pub fn none() -> Self {
        Self {
            kind: ChargeKind::None,
            value: Decimal::ZERO,
            days_before_due: 0,
        }
    }

    /// discount earned on a base amount when paid on `paid_on` against `due_date`
    pub fn discount_for(&self, base: Money, paid_on: NaiveDate, due_date: NaiveDate) -> Money {
        if self.kind == ChargeKind::None {
            return Money::ZERO;
        }
        let days_early = (due_date - paid_on).num_days();
        if days_early < self.days_before_due as i64 {
            return Money::ZERO;
        }
        match self.kind {
            ChargeKind::Percentage => base.percentage(self.value),
            ChargeKind::Fixed => Money::from_decimal(self.value).min(base),
            ChargeKind::None => Money::ZERO,
        }
    }
}

/// recurring or one-off charge definition (maintenance, fee, fine, reserve fund)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConcept {
    pub id: ConceptId,
    pub condominium_id: CondominiumId,
    pub building_id: Option<BuildingId>,
    pub name: String,
    pub scope: ConceptScope,
    pub recurrence: RecurrencePeriod,
    pub currency_id: CurrencyId,
    pub allows_partial_payment: bool,
    pub late_surcharge: SurchargeConfig,
    pub early_discount: DiscountConfig,
    /// day of month quotas are issued (1-28)
    pub issue_day: Option<u32>,
    /// day of month quotas fall due (1-28)
    pub due_day: Option<u32>,
    /// soft-deactivation flag; concepts are never hard-deleted once referenced
    pub active: bool,
}

impl PaymentConcept {
    pub fn is_recurring(&self) -> bool {
        self.recurrence != RecurrencePeriod::None
    }

    /// cross-field invariants of the concept definition
    pub fn validate(&self) -> Result<()> {
        if self.is_recurring() {
            let (Some(issue), Some(due)) = (self.issue_day, self.due_day) else {
                return Err(BillingError::validation(
                    "recurring concept requires issue_day and due_day",
                ));
            };
            for (label, day) in [("issue_day", issue), ("due_day", due)] {
                if !(1..=28).contains(&day) {
                    return Err(BillingError::validation(format!(
                        "{label} must be between 1 and 28, got {day}"
                    )));
                }
            }
        }
        self.late_surcharge.validate("late surcharge")?;
        if self.early_discount.kind == ChargeKind::Percentage
            && (self.early_discount.value <= Decimal::ZERO
                || self.early_discount.value > Decimal::from(100))
        {
            return Err(BillingError::validation(format!(
                "early discount percentage must be in (0, 100], got {}",
                self.early_discount.value
            )));
        }
        if self.early_discount.kind == ChargeKind::Fixed
            && self.early_discount.value <= Decimal::ZERO
        {
            return Err(BillingError::validation(
                "early discount fixed value must be positive",
            ));
        }
        Ok(())
    }
}

/// how interest is computed on overdue balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestType {
    Simple,
    Compound,
    /// one-time flat penalty when the quota first turns overdue
    FixedAmount,
}

/// what one interest period is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationPeriod {
    Monthly,
    Daily,
    /// one charge per overdue quota, independent of elapsed time
    PerOverdueQuota,
}

/// interest terms, scoped to condominium, building, or concept (most specific wins)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestConfiguration {
    pub id: Uuid,
    pub condominium_id: CondominiumId,
    pub building_id: Option<BuildingId>,
    pub concept_id: Option<ConceptId>,
    pub interest_type: InterestType,
    /// per-period rate for simple/compound; ignored for fixed amount
    pub rate: Rate,
    /// flat penalty for fixed amount; ignored otherwise
    pub fixed_amount: Money,
    pub calculation_period: CalculationPeriod,
    pub grace_period_days: u32,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub active: bool,
}

impl InterestConfiguration {
    pub fn validate(&self) -> Result<()> {
        match self.interest_type {
            InterestType::Simple | InterestType::Compound => {
                if self.rate.as_decimal() <= Decimal::ZERO {
                    return Err(BillingError::validation(
                        "interest rate must be positive for simple/compound interest",
                    ));
                }
            }
            InterestType::FixedAmount => {
                if !self.fixed_amount.is_positive() {
                    return Err(BillingError::validation(
                        "fixed amount penalty must be positive",
                    ));
                }
            }
        }
        if let (Some(from), Some(until)) = (self.effective_from, self.effective_until) {
            if until < from {
                return Err(BillingError::validation(
                    "effective window ends before it starts",
                ));
            }
        }
        Ok(())
    }

    /// active and inside the effective window as of the given date
    pub fn is_effective(&self, as_of: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        if let Some(from) = self.effective_from {
            if as_of < from {
                return false;
            }
        }
        if let Some(until) = self.effective_until {
            if as_of > until {
                return false;
            }
        }
        true
    }

    /// specificity for scope resolution: concept > building > condominium
    fn specificity(&self) -> u8 {
        if self.concept_id.is_some() {
            2
        } else if self.building_id.is_some() {
            1
        } else {
            0
        }
    }
}

/// pick the most specific effective configuration for a quota's scope
pub fn resolve_interest_config<'a>(
    configs: &'a [InterestConfiguration],
    concept_id: ConceptId,
    building_id: Option<BuildingId>,
    as_of: NaiveDate,
) -> Option<&'a InterestConfiguration> {
    configs
        .iter()
        .filter(|c| c.is_effective(as_of))
        .filter(|c| match c.concept_id {
            Some(cid) => cid == concept_id,
            None => match c.building_id {
                Some(bid) => building_id == Some(bid),
                None => true,
            },
        })
        .max_by_key(|c| c.specificity())
}
