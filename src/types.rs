use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// unique identifier for a condominium
pub type CondominiumId = Uuid;
/// unique identifier for a building within a condominium
pub type BuildingId = Uuid;
/// unique identifier for a unit (apartment, parking space, etc)
pub type UnitId = Uuid;
/// unique identifier for a payment concept
pub type ConceptId = Uuid;
/// unique identifier for a quota formula
pub type FormulaId = Uuid;
/// unique identifier for a generation rule
pub type RuleId = Uuid;
/// unique identifier for a generation schedule
pub type ScheduleId = Uuid;
/// unique identifier for a quota
pub type QuotaId = Uuid;
/// unique identifier for a payment
pub type PaymentId = Uuid;
/// unique identifier for a pending allocation
pub type PendingAllocationId = Uuid;
/// unique identifier for a currency
pub type CurrencyId = Uuid;
/// unique identifier for a user (administrator or resident)
pub type UserId = Uuid;

/// currency descriptor, resolved by the caller's directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: CurrencyId,
    pub code: String,
    pub decimal_places: u32,
}

impl Currency {
    pub fn new(code: &str, decimal_places: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            decimal_places,
        }
    }
}

/// billing period: a year plus an optional month for monthly concepts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: Option<u32>,
    pub description: Option<String>,
}

impl Period {
    pub fn monthly(year: i32, month: u32) -> Self {
        Self {
            year,
            month: Some(month),
            description: None,
        }
    }

    pub fn yearly(year: i32) -> Self {
        Self {
            year,
            month: None,
            description: None,
        }
    }

    /// first calendar day covered by this period
    pub fn start_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), 1)
    }

    /// identity key used for idempotent generation (description is free text)
    pub fn key(&self) -> (i32, Option<u32>) {
        (self.year, self.month)
    }

    /// next period at the same granularity
    pub fn next(&self) -> Period {
        match self.month {
            Some(12) => Period::monthly(self.year + 1, 1),
            Some(m) => Period::monthly(self.year, m + 1),
            None => Period::yearly(self.year + 1),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(m) => write!(f, "{}-{:02}", self.year, m),
            None => write!(f, "{}", self.year),
        }
    }
}

/// quota lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaStatus {
    /// issued, awaiting payment
    Pending,
    /// fully paid, balance is zero
    Paid,
    /// past due date, interest may accrue
    Overdue,
    /// voided by adjustment or waiver, keeps its history
    Cancelled,
}

impl QuotaStatus {
    /// allowed transitions; backward moves require an explicit adjustment
    pub fn can_transition_to(self, next: QuotaStatus) -> bool {
        use QuotaStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Overdue)
                | (Pending, Cancelled)
                | (Overdue, Paid)
                | (Overdue, Cancelled)
        )
    }

    /// open quotas are allocation candidates
    pub fn is_open(self) -> bool {
        matches!(self, QuotaStatus::Pending | QuotaStatus::Overdue)
    }
}

/// payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    PendingVerification,
    /// verified funds, eligible for allocation
    Completed,
    Failed,
    Refunded,
    Rejected,
}

/// how a generation run was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationMethod {
    /// one unit, one period, by hand
    ManualSingle,
    /// all units in scope, one period, by hand
    ManualBatch,
    /// driven by a generation schedule tick
    Scheduled,
    /// all periods in a requested date range
    Range,
}

/// outcome of one generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationStatus {
    /// every unit in scope produced a quota (or already had one)
    Completed,
    /// some units failed formula resolution
    Partial,
    /// no unit produced a quota
    Failed,
}

/// manual adjustment kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentType {
    /// reduce the base amount
    Discount,
    /// raise the base amount
    Increase,
    /// replace the base amount outright
    Correction,
    /// forgive the remaining balance, cancelling the quota
    Waiver,
}

/// pending-allocation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingAllocationStatus {
    Pending,
    Allocated,
    Refunded,
}

/// how a pending allocation was closed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionType {
    /// applied to an administrator-designated quota
    AppliedToQuota,
    /// handed to the external refund collaborator
    Refunded,
}

/// a unit's billable attributes, resolved by the unit directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitProfile {
    pub id: UnitId,
    pub condominium_id: CondominiumId,
    pub building_id: Option<BuildingId>,
    /// participation coefficient, e.g. 0.0125 for 1.25%
    pub aliquot: rust_decimal::Decimal,
    /// floor area in square meters
    pub area: rust_decimal::Decimal,
}
