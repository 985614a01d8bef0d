use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::{BillingError, Result};
use crate::types::{BuildingId, ConceptId, CondominiumId, FormulaId, Period, RuleId, ScheduleId};

/// binds a payment concept and formula to an effective date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaGenerationRule {
    pub id: RuleId,
    pub condominium_id: CondominiumId,
    /// restricts the rule to one building's units when set
    pub building_id: Option<BuildingId>,
    pub concept_id: ConceptId,
    pub formula_id: FormulaId,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    pub active: bool,
}

impl QuotaGenerationRule {
    /// whether the rule covers the given period
    pub fn covers(&self, period: &Period) -> bool {
        if !self.active {
            return false;
        }
        let Some(start) = period.start_date() else {
            return false;
        };
        if start < first_of_month(self.effective_from) {
            return false;
        }
        if let Some(until) = self.effective_until {
            if start > until {
                return false;
            }
        }
        true
    }
}

/// how often a schedule fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleFrequency {
    /// every n days
    Days(u32),
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl ScheduleFrequency {
    /// months covered by one billing period at this frequency
    pub fn months_per_period(self) -> u32 {
        match self {
            ScheduleFrequency::Days(_) | ScheduleFrequency::Monthly => 1,
            ScheduleFrequency::Quarterly => 3,
            ScheduleFrequency::SemiAnnual => 6,
            ScheduleFrequency::Annual => 12,
        }
    }
}

/// drives automatic triggering of a generation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaGenerationSchedule {
    pub id: ScheduleId,
    pub rule_id: RuleId,
    pub frequency: ScheduleFrequency,
    /// day of month the schedule fires (1-28)
    pub generation_day: u32,
    /// how many future periods to generate beyond the current one
    pub periods_in_advance: u32,
    pub issue_day: u32,
    pub due_day: u32,
    pub grace_days: u32,
    /// cursor: last period a run generated, None before the first run
    pub last_generated_period: Option<Period>,
    /// cursor: next date the schedule should fire
    pub next_generation_date: Option<NaiveDate>,
    pub active: bool,
}

impl QuotaGenerationSchedule {
    pub fn validate(&self) -> Result<()> {
        for (label, day) in [
            ("generation_day", self.generation_day),
            ("issue_day", self.issue_day),
            ("due_day", self.due_day),
        ] {
            if !(1..=28).contains(&day) {
                return Err(BillingError::validation(format!(
                    "{label} must be between 1 and 28, got {day}"
                )));
            }
        }
        if let ScheduleFrequency::Days(n) = self.frequency {
            if n == 0 {
                return Err(BillingError::validation("days frequency must be positive"));
            }
        }
        Ok(())
    }

    /// whether the schedule should fire as of the given date
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        match self.next_generation_date {
            Some(next) => as_of >= next,
            // never fired: due once the generation day of the current month arrives
            None => as_of.day() >= self.generation_day,
        }
    }

    /// periods a run should materialize, current plus periods_in_advance
    pub fn periods_to_generate(&self, as_of: NaiveDate) -> Vec<Period> {
        let step = self.frequency.months_per_period();
        let first = match &self.last_generated_period {
            Some(last) => add_months(last, step),
            None => Period::monthly(as_of.year(), as_of.month()),
        };
        let mut periods = Vec::with_capacity(self.periods_in_advance as usize + 1);
        let mut period = first;
        for _ in 0..=self.periods_in_advance {
            periods.push(period.clone());
            period = add_months(&period, step);
        }
        periods
    }

    /// advance the cursor after a run's log is durably written
    pub fn advance(&mut self, last_period: Period, as_of: NaiveDate) {
        self.last_generated_period = Some(last_period);
        self.next_generation_date = Some(match self.frequency {
            ScheduleFrequency::Days(n) => as_of + Duration::days(n as i64),
            _ => {
                let months = self.frequency.months_per_period();
                let (year, month) = shift_ym(as_of.year(), as_of.month(), months);
                clamp_day_of_month(year, month, self.generation_day)
            }
        });
    }

    /// issue and due dates for a period, clamped to month length
    pub fn quota_dates(&self, period: &Period) -> (NaiveDate, NaiveDate) {
        quota_dates(period, self.issue_day, self.due_day)
    }
}

/// issue/due dates inside a period's first month; a due day before the
/// issue day rolls into the following month
pub fn quota_dates(period: &Period, issue_day: u32, due_day: u32) -> (NaiveDate, NaiveDate) {
    let year = period.year;
    let month = period.month.unwrap_or(1);
    let issue = clamp_day_of_month(year, month, issue_day);
    let due = if due_day >= issue_day {
        clamp_day_of_month(year, month, due_day)
    } else {
        let (y, m) = shift_ym(year, month, 1);
        clamp_day_of_month(y, m, due_day)
    };
    (issue, due)
}

/// resolve a day-of-month, falling back to the month's last valid day
pub fn clamp_day_of_month(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        let (next_y, next_m) = shift_ym(year, month, 1);
        // first of next month minus one day is always the last valid day
        NaiveDate::from_ymd_opt(next_y, next_m, 1)
            .expect("first of month is always valid")
            .pred_opt()
            .expect("predecessor of first of month exists")
    })
}

fn shift_ym(year: i32, month: u32, months: u32) -> (i32, u32) {
    let zero_based = (month - 1) + months;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

fn add_months(period: &Period, months: u32) -> Period {
    match period.month {
        Some(m) => {
            let (y, m) = shift_ym(period.year, m, months);
            Period::monthly(y, m)
        }
        None => Period::yearly(period.year + (months / 12).max(1) as i32),
    }
}

fn first_of_month(d: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(d.year(), d.month(), 1).expect("first of month is always valid")
}
