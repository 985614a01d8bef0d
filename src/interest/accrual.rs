use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::config::{CalculationPeriod, ChargeKind, InterestConfiguration, InterestType, SurchargeConfig};
use crate::decimal::Money;
use crate::quota::Quota;

/// incremental accrual since the last run
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualResult {
    /// interest to add to the quota, rounded to the currency's decimal places
    pub amount: Money,
    /// days charged in this run
    pub days_charged: u32,
    /// balance base the interest was computed on
    pub base: Money,
    /// true when the quota is still inside due date plus grace
    pub grace_applied: bool,
    /// true for a flat penalty that must be applied at most once
    pub one_shot: bool,
}

impl AccrualResult {
    fn zero(base: Money, grace_applied: bool) -> Self {
        Self {
            amount: Money::ZERO,
            days_charged: 0,
            base,
            grace_applied,
            one_shot: false,
        }
    }
}

/// computes overdue interest for quotas under the 30-day-month convention
pub struct AccrualEngine;

impl AccrualEngine {
    pub fn new() -> Self {
        Self
    }

    /// incremental interest for a quota as of a date; pure, no clock access
    pub fn accrue(
        &self,
        quota: &Quota,
        config: &InterestConfiguration,
        as_of: NaiveDate,
        decimal_places: u32,
    ) -> AccrualResult {
        let threshold = quota.due_date + Duration::days(config.grace_period_days as i64);
        if as_of <= threshold || quota.balance.is_zero() {
            return AccrualResult::zero(quota.balance, as_of <= threshold);
        }

        match config.interest_type {
            InterestType::FixedAmount => self.accrue_one_shot(quota, config.fixed_amount, decimal_places),
            InterestType::Simple | InterestType::Compound
                if config.calculation_period == CalculationPeriod::PerOverdueQuota =>
            {
                // one period charged once per overdue quota, independent of elapsed time
                let base = match config.interest_type {
                    InterestType::Simple => quota.principal_balance(),
                    _ => quota.balance,
                };
                self.accrue_one_shot(
                    quota,
                    (base * config.rate.as_decimal()).round_currency(decimal_places),
                    decimal_places,
                )
            }
            InterestType::Simple => {
                let start = accrual_start(quota, threshold);
                let days = (as_of - start).num_days().max(0) as u32;
                if days == 0 {
                    return AccrualResult::zero(quota.principal_balance(), false);
                }
                let base = quota.principal_balance();
                let periods = elapsed_periods(config.calculation_period, days);
                let amount = (base * config.rate.as_decimal() * periods)
                    .round_currency(decimal_places);
                AccrualResult {
                    amount,
                    days_charged: days,
                    base,
                    grace_applied: false,
                    one_shot: false,
                }
            }
            InterestType::Compound => {
                let start = accrual_start(quota, threshold);
                let days = (as_of - start).num_days().max(0) as u32;
                // compounds on principal plus carried interest, whole periods only
                let base = quota.balance;
                let whole_periods = match config.calculation_period {
                    CalculationPeriod::Daily => days,
                    _ => days / 30,
                };
                if whole_periods == 0 {
                    return AccrualResult::zero(base, false);
                }
                let mut factor = Decimal::ONE;
                for _ in 0..whole_periods {
                    factor *= Decimal::ONE + config.rate.as_decimal();
                }
                let amount = ((base * factor) - base).round_currency(decimal_places);
                AccrualResult {
                    amount,
                    days_charged: days,
                    base,
                    grace_applied: false,
                    one_shot: false,
                }
            }
        }
    }

    /// one-time late-payment surcharge from the concept, charged on the first accrual run
    pub fn late_surcharge(
        &self,
        quota: &Quota,
        surcharge: &SurchargeConfig,
        as_of: NaiveDate,
        decimal_places: u32,
    ) -> Money {
        if quota.surcharge_applied || quota.balance.is_zero() {
            return Money::ZERO;
        }
        let threshold = quota.due_date + Duration::days(surcharge.grace_days as i64);
        if as_of <= threshold {
            return Money::ZERO;
        }
        match surcharge.kind {
            ChargeKind::None => Money::ZERO,
            ChargeKind::Percentage => quota
                .principal_balance()
                .percentage(surcharge.value)
                .round_currency(decimal_places),
            ChargeKind::Fixed => Money::from_decimal(surcharge.value).round_currency(decimal_places),
        }
    }

    /// flat charges apply exactly once, keyed on their own marker so an
    /// earlier surcharge run cannot consume them
    fn accrue_one_shot(&self, quota: &Quota, amount: Money, decimal_places: u32) -> AccrualResult {
        if quota.flat_interest_applied {
            return AccrualResult::zero(quota.balance, false);
        }
        AccrualResult {
            amount: amount.round_currency(decimal_places),
            days_charged: 0,
            base: quota.balance,
            grace_applied: false,
            one_shot: true,
        }
    }
}

impl Default for AccrualEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn accrual_start(quota: &Quota, threshold: NaiveDate) -> NaiveDate {
    match quota.last_interest_accrual {
        Some(last) if last > threshold => last,
        _ => threshold,
    }
}

/// elapsed periods under the 30-day-month convention; fractional for monthly
fn elapsed_periods(period: CalculationPeriod, days: u32) -> Decimal {
    match period {
        CalculationPeriod::Daily => Decimal::from(days),
        _ => Decimal::from(days) / Decimal::from(30),
    }
}
