use std::sync::atomic::AtomicBool;

use hourglass_rs::SafeTimeProvider;
use uuid::Uuid;

use crate::adjustment::{AdjustmentApplier, AdjustmentRequest, QuotaAdjustment};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::events::{Event, EventStore};
use crate::generation::generator::{GenerationOutcome, QuotaGenerator};
use crate::payments::pending::PendingResolution;
use crate::payments::{
    AllocationOutcome, PaymentAllocator, PaymentApplication, PaymentPendingAllocation,
};
use crate::store::{BillingStore, ExchangeRates, UnitDirectory};
use crate::types::{
    GenerationMethod, PendingAllocationId, Period, QuotaId, ResolutionType, RuleId,
};

const MAX_RESOLVE_RETRIES: u32 = 3;

/// top-level billing engine: quota generation, payment allocation, pending
/// resolution, and manual adjustments against one store.
///
/// Events accumulate internally; callers drain them with [`take_events`]
/// after each operation and hand them to their notification pipeline.
///
/// [`take_events`]: BillingEngine::take_events
pub struct BillingEngine<S, U, X> {
    store: S,
    units: U,
    rates: X,
    generator: QuotaGenerator,
    allocator: PaymentAllocator,
    adjuster: AdjustmentApplier,
    events: EventStore,
}

impl<S, U, X> BillingEngine<S, U, X>
where
    S: BillingStore,
    U: UnitDirectory,
    X: ExchangeRates,
{
    pub fn new(store: S, units: U, rates: X) -> Self {
        Self {
            store,
            units,
            rates,
            generator: QuotaGenerator::new(),
            allocator: PaymentAllocator::new(),
            adjuster: AdjustmentApplier::new(),
            events: EventStore::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// drain events accumulated since the last call
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    /// generate one period's quotas for a rule, by hand
    pub fn generate_for_period(
        &mut self,
        rule_id: RuleId,
        period: &Period,
        method: GenerationMethod,
        time: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let rule = self.store.rule(rule_id)?;
        if !rule.covers(period) {
            return Err(BillingError::validation(format!(
                "rule {rule_id} does not cover period {period}"
            )));
        }
        let concept = self.store.concept(rule.concept_id)?;
        let (issue_day, due_day) = match (concept.issue_day, concept.due_day) {
            (Some(issue), Some(due)) => (issue, due),
            _ => {
                return Err(BillingError::validation(format!(
                    "concept {} has no issue/due days configured",
                    concept.id
                )))
            }
        };
        self.run_generation(rule_id, period, issue_day, due_day, method, None, time)
    }

    /// generate one rule over an inclusive range of monthly periods
    pub fn generate_range(
        &mut self,
        rule_id: RuleId,
        from: Period,
        to: Period,
        cancel: Option<&AtomicBool>,
        time: &SafeTimeProvider,
    ) -> Result<Vec<GenerationOutcome>> {
        let (Some(start), Some(end)) = (from.start_date(), to.start_date()) else {
            return Err(BillingError::validation("range bounds must be valid periods"));
        };
        if end < start {
            return Err(BillingError::validation(
                "range end precedes its start",
            ));
        }
        // the walk below steps by the bounds' own granularity; mixing
        // monthly and yearly bounds would never reach the end key
        if from.month.is_some() != to.month.is_some() {
            return Err(BillingError::validation(
                "range bounds mix monthly and yearly periods",
            ));
        }
        let rule = self.store.rule(rule_id)?;
        let concept = self.store.concept(rule.concept_id)?;
        let (issue_day, due_day) = match (concept.issue_day, concept.due_day) {
            (Some(issue), Some(due)) => (issue, due),
            _ => {
                return Err(BillingError::validation(format!(
                    "concept {} has no issue/due days configured",
                    concept.id
                )))
            }
        };

        let mut outcomes = Vec::new();
        let mut period = from;
        loop {
            if rule.covers(&period) {
                outcomes.push(self.run_generation(
                    rule_id,
                    &period,
                    issue_day,
                    due_day,
                    GenerationMethod::Range,
                    cancel,
                    time,
                )?);
            }
            if period.key() == to.key() {
                break;
            }
            period = period.next();
        }
        Ok(outcomes)
    }

    /// fire a rule's schedule if due, advancing its cursor after the logs
    /// are written; a schedule that is not due is a no-op
    pub fn run_schedule(
        &mut self,
        rule_id: RuleId,
        time: &SafeTimeProvider,
    ) -> Result<Vec<GenerationOutcome>> {
        let today = time.now().date_naive();
        let rule = self.store.rule(rule_id)?;
        let Some(mut schedule) = self.store.schedule_for_rule(rule_id)? else {
            return Err(BillingError::validation(format!(
                "rule {rule_id} has no generation schedule"
            )));
        };
        if !schedule.is_due(today) {
            return Ok(Vec::new());
        }

        let periods = schedule.periods_to_generate(today);
        let mut outcomes = Vec::new();
        for period in &periods {
            if !rule.covers(period) {
                continue;
            }
            outcomes.push(self.run_generation(
                rule_id,
                period,
                schedule.issue_day,
                schedule.due_day,
                GenerationMethod::Scheduled,
                None,
                time,
            )?);
        }

        // cursor moves only after every run's log is durable. Periods the
        // rule's window excludes are consumed along with the rest: a
        // period outside the window can never become coverable later.
        if let Some(last) = periods.last() {
            schedule.advance(last.clone(), today);
            self.store.update_schedule(&schedule)?;
        }
        Ok(outcomes)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_generation(
        &mut self,
        rule_id: RuleId,
        period: &Period,
        issue_day: u32,
        due_day: u32,
        method: GenerationMethod,
        cancel: Option<&AtomicBool>,
        time: &SafeTimeProvider,
    ) -> Result<GenerationOutcome> {
        let rule = self.store.rule(rule_id)?;
        let concept = self.store.concept(rule.concept_id)?;
        let currency = self.store.currency(concept.currency_id)?;
        let formula = self.store.formula(rule.formula_id)?;
        if formula.currency_id != concept.currency_id {
            return Err(BillingError::validation(format!(
                "formula {} and concept {} disagree on currency",
                formula.id, concept.id
            )));
        }
        let snapshot = formula.compile()?;
        let units = self
            .units
            .units_in_scope(rule.condominium_id, rule.building_id)?;

        self.generator.generate(
            &mut self.store,
            &rule,
            &concept,
            &currency,
            &snapshot,
            &units,
            period,
            issue_day,
            due_day,
            method,
            cancel,
            time.now(),
            &mut self.events,
        )
    }

    /// allocate a completed payment across its unit's open quotas, or the
    /// caller's explicit targets
    pub fn allocate_payment(
        &mut self,
        payment_id: Uuid,
        explicit_targets: Option<&[QuotaId]>,
        time: &SafeTimeProvider,
    ) -> Result<AllocationOutcome> {
        let payment = self.store.payment(payment_id)?;
        self.allocator.allocate(
            &mut self.store,
            &self.rates,
            &payment,
            explicit_targets,
            time.now(),
            &mut self.events,
        )
    }

    /// close out a pending remainder per an administrator's decision
    pub fn resolve_pending_allocation(
        &mut self,
        allocation_id: PendingAllocationId,
        resolution: PendingResolution,
        time: &SafeTimeProvider,
    ) -> Result<PaymentPendingAllocation> {
        let now = time.now();
        let mut pending = self.store.pending_allocation(allocation_id)?;
        pending.ensure_pending()?;

        match resolution {
            PendingResolution::Refund { resolved_by, notes } => {
                pending.mark_refunded(resolved_by, notes, now)?;
                self.store.update_pending_allocation(&pending)?;
                self.events.emit(Event::PendingAllocationResolved {
                    allocation_id,
                    resolution: ResolutionType::Refunded,
                    quota_id: None,
                    timestamp: now,
                });
                Ok(pending)
            }
            PendingResolution::AllocateToQuota {
                quota_id,
                resolved_by,
                notes,
            } => {
                let applied = self.apply_pending_to_quota(&pending, quota_id, now)?;

                // a remainder beyond the quota's balance pends again under a
                // fresh record; the original closes out in full
                let leftover = pending.amount - applied;
                if leftover.is_positive() {
                    let carried = PaymentPendingAllocation::new(
                        pending.payment_id,
                        leftover,
                        pending.currency_id,
                        now,
                    );
                    self.store.insert_pending_allocation(&carried)?;
                    self.events.emit(Event::PendingAllocationCreated {
                        payment_id: pending.payment_id,
                        allocation_id: carried.id,
                        amount: leftover,
                        timestamp: now,
                    });
                }

                pending.mark_allocated(quota_id, resolved_by, notes, now)?;
                self.store.update_pending_allocation(&pending)?;
                self.events.emit(Event::PendingAllocationResolved {
                    allocation_id,
                    resolution: ResolutionType::AppliedToQuota,
                    quota_id: Some(quota_id),
                    timestamp: now,
                });
                Ok(pending)
            }
        }
    }

    fn apply_pending_to_quota(
        &mut self,
        pending: &PaymentPendingAllocation,
        quota_id: QuotaId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Money> {
        for _attempt in 0..MAX_RESOLVE_RETRIES {
            let mut quota = self.store.quota(quota_id)?;
            if !quota.status.is_open() {
                return Err(BillingError::validation(format!(
                    "target quota {quota_id} is {:?}, not open",
                    quota.status
                )));
            }
            if quota.currency_id != pending.currency_id {
                return Err(BillingError::validation(format!(
                    "target quota {quota_id} is billed in another currency"
                )));
            }
            quota.refresh_overdue(now.date_naive())?;

            let applied = pending.amount.min(quota.balance);
            if !applied.is_positive() {
                return Err(BillingError::validation(format!(
                    "target quota {quota_id} has no open balance"
                )));
            }
            let to_interest = applied.min(quota.unpaid_interest());
            quota.record_allocation(applied, to_interest)?;

            match self.store.update_quota(&quota) {
                Ok(updated) => {
                    let application = PaymentApplication {
                        id: Uuid::new_v4(),
                        payment_id: pending.payment_id,
                        quota_id,
                        applied_amount: applied,
                        applied_to_principal: applied - to_interest,
                        applied_to_interest: to_interest,
                        discount_granted: Money::ZERO,
                        applied_at: now,
                    };
                    self.store.insert_application(&application)?;
                    self.events.emit(Event::PaymentAllocated {
                        payment_id: pending.payment_id,
                        quota_id,
                        applied_amount: applied,
                        applied_to_principal: application.applied_to_principal,
                        applied_to_interest: to_interest,
                        timestamp: now,
                    });
                    if updated.status == crate::types::QuotaStatus::Paid {
                        self.events.emit(Event::QuotaPaid {
                            quota_id,
                            unit_id: updated.unit_id,
                            paid_amount: updated.paid_amount,
                            timestamp: now,
                        });
                    }
                    return Ok(applied);
                }
                Err(BillingError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(BillingError::ConcurrentAllocation {
            payment_id: pending.payment_id,
            attempts: MAX_RESOLVE_RETRIES,
        })
    }

    /// apply a manual adjustment to one quota, with audit trail
    pub fn adjust_quota(
        &mut self,
        quota_id: QuotaId,
        request: &AdjustmentRequest,
        time: &SafeTimeProvider,
    ) -> Result<QuotaAdjustment> {
        let now = time.now();
        for _attempt in 0..MAX_RESOLVE_RETRIES {
            let mut quota = self.store.quota(quota_id)?;
            let adjustment = self.adjuster.apply(&mut quota, request, now)?;
            match self.store.update_quota(&quota) {
                Ok(_) => {
                    self.store.insert_adjustment(&adjustment)?;
                    self.events.emit(Event::QuotaAdjusted {
                        quota_id,
                        previous_amount: adjustment.previous_amount,
                        new_amount: adjustment.new_amount,
                        timestamp: now,
                    });
                    return Ok(adjustment);
                }
                Err(BillingError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(BillingError::persistence(format!(
            "adjustment of quota {quota_id} lost the version race {MAX_RESOLVE_RETRIES} times"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConceptScope, DiscountConfig, PaymentConcept, RecurrencePeriod, SurchargeConfig,
    };
    use crate::decimal::Money;
    use crate::formula::{FormulaKind, QuotaFormula};
    use crate::generation::schedule::{
        QuotaGenerationRule, QuotaGenerationSchedule, ScheduleFrequency,
    };
    use crate::payments::{Payment, PaymentMethod};
    use crate::store::{FixedExchangeRates, MemoryStore, StaticUnitDirectory};
    use crate::types::{
        AdjustmentType, Currency, GenerationStatus, PaymentStatus, QuotaStatus, UnitProfile,
    };
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    type TestEngine = BillingEngine<MemoryStore, StaticUnitDirectory, FixedExchangeRates>;

    struct World {
        engine: TestEngine,
        rule_id: RuleId,
        currency: Currency,
        unit_ids: Vec<Uuid>,
    }

    fn world(unit_count: usize) -> World {
        let condominium_id = Uuid::new_v4();
        let currency = Currency::new("USD", 2);
        let concept = PaymentConcept {
            id: Uuid::new_v4(),
            condominium_id,
            building_id: None,
            name: "maintenance".to_string(),
            scope: ConceptScope::Condominium,
            recurrence: RecurrencePeriod::Monthly,
            currency_id: currency.id,
            allows_partial_payment: true,
            late_surcharge: SurchargeConfig::none(),
            early_discount: DiscountConfig::none(),
            issue_day: Some(1),
            due_day: Some(15),
            active: true,
        };
        let formula = QuotaFormula {
            id: Uuid::new_v4(),
            condominium_id,
            name: "flat maintenance".to_string(),
            currency_id: currency.id,
            kind: FormulaKind::Fixed {
                amount: Money::from_major(100),
            },
            update_reason: None,
        };
        let rule = QuotaGenerationRule {
            id: Uuid::new_v4(),
            condominium_id,
            building_id: None,
            concept_id: concept.id,
            formula_id: formula.id,
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_until: None,
            active: true,
        };
        let units: Vec<UnitProfile> = (0..unit_count)
            .map(|_| UnitProfile {
                id: Uuid::new_v4(),
                condominium_id,
                building_id: None,
                aliquot: dec!(0.01),
                area: dec!(75),
            })
            .collect();
        let unit_ids = units.iter().map(|u| u.id).collect();

        let mut store = MemoryStore::new();
        store.put_currency(currency.clone());
        store.put_concept(concept.clone());
        store.put_formula(formula);
        store.put_rule(rule.clone());

        World {
            engine: BillingEngine::new(
                store,
                StaticUnitDirectory::new(units),
                FixedExchangeRates::new(),
            ),
            rule_id: rule.id,
            currency,
            unit_ids,
        }
    }

    fn test_time(y: i32, m: u32, d: u32) -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
        ))
    }

    fn completed_payment(world: &World, unit_id: Uuid, amount: Money, on: NaiveDate) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            unit_id,
            payer_id: Uuid::new_v4(),
            amount,
            currency_id: world.currency.id,
            paid_amount: amount,
            paid_currency_id: world.currency.id,
            exchange_rate: None,
            method: PaymentMethod::BankTransfer,
            status: PaymentStatus::Completed,
            reference: Some("TRF-001".to_string()),
            payment_date: on,
            received_at: Utc::now(),
        }
    }

    fn monthly_schedule(rule_id: RuleId) -> QuotaGenerationSchedule {
        QuotaGenerationSchedule {
            id: Uuid::new_v4(),
            rule_id,
            frequency: ScheduleFrequency::Monthly,
            generation_day: 1,
            periods_in_advance: 0,
            issue_day: 1,
            due_day: 15,
            grace_days: 0,
            last_generated_period: None,
            next_generation_date: None,
            active: true,
        }
    }

    #[test]
    fn test_full_billing_cycle() {
        let mut w = world(2);
        let time = test_time(2024, 3, 1);

        let outcome = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        assert_eq!(outcome.log.status, GenerationStatus::Completed);
        assert_eq!(outcome.log.quotas_created, 2);

        // resident of the first unit pays in full before the due date
        let quota_id = outcome.created_quota_ids[0];
        let unit_id = w.engine.store().quota(quota_id).unwrap().unit_id;
        let payment = completed_payment(
            &w,
            unit_id,
            Money::from_major(100),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        );
        w.engine.store_mut().put_payment(payment.clone());

        let allocation = w.engine.allocate_payment(payment.id, None, &time).unwrap();
        assert_eq!(allocation.total_applied, Money::from_major(100));
        assert!(allocation.pending_allocation.is_none());
        assert_eq!(
            w.engine.store().quota(quota_id).unwrap().status,
            QuotaStatus::Paid
        );

        // generation, allocation, and paid events are all on the stream
        let events = w.engine.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::GenerationRunCompleted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::PaymentAllocated { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::QuotaPaid { .. })));
    }

    #[test]
    fn test_schedule_fires_once_and_advances_cursor() {
        let mut w = world(3);
        w.engine
            .store_mut()
            .put_schedule(monthly_schedule(w.rule_id));
        let time = test_time(2024, 5, 1);

        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].log.quotas_created, 3);
        assert_eq!(outcomes[0].log.period, Period::monthly(2024, 5));

        // same day again: the cursor moved, nothing fires
        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(w.engine.store().quota_count(), 3);

        // a month later the next period generates
        let control = time.test_control().unwrap();
        control.advance(Duration::days(31));
        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].log.period, Period::monthly(2024, 6));
        assert_eq!(w.engine.store().quota_count(), 6);
    }

    #[test]
    fn test_schedule_periods_in_advance() {
        let mut w = world(1);
        let mut schedule = monthly_schedule(w.rule_id);
        schedule.periods_in_advance = 2;
        w.engine.store_mut().put_schedule(schedule);
        let time = test_time(2024, 5, 1);

        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(w.engine.store().quota_count(), 3);
        let periods: Vec<_> = outcomes.iter().map(|o| o.log.period.clone()).collect();
        assert_eq!(
            periods,
            vec![
                Period::monthly(2024, 5),
                Period::monthly(2024, 6),
                Period::monthly(2024, 7),
            ]
        );
    }

    #[test]
    fn test_range_generation() {
        let mut w = world(2);
        let time = test_time(2024, 1, 1);

        let outcomes = w
            .engine
            .generate_range(
                w.rule_id,
                Period::monthly(2024, 1),
                Period::monthly(2024, 4),
                None,
                &time,
            )
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(w.engine.store().quota_count(), 8);
        for outcome in &outcomes {
            assert_eq!(outcome.log.method, GenerationMethod::Range);
        }

        // re-running is idempotent
        let outcomes = w
            .engine
            .generate_range(
                w.rule_id,
                Period::monthly(2024, 1),
                Period::monthly(2024, 4),
                None,
                &time,
            )
            .unwrap();
        assert!(outcomes.iter().all(|o| o.log.quotas_created == 0));
        assert_eq!(w.engine.store().quota_count(), 8);
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let mut w = world(1);
        let time = test_time(2024, 1, 1);
        let err = w
            .engine
            .generate_range(
                w.rule_id,
                Period::monthly(2024, 4),
                Period::monthly(2024, 1),
                None,
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }

    #[test]
    fn test_range_rejects_mixed_granularity() {
        let mut w = world(1);
        let time = test_time(2024, 1, 1);
        let err = w
            .engine
            .generate_range(
                w.rule_id,
                Period::yearly(2024),
                Period::monthly(2024, 3),
                None,
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));

        let err = w
            .engine
            .generate_range(
                w.rule_id,
                Period::monthly(2024, 1),
                Period::yearly(2024),
                None,
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
        assert_eq!(w.engine.store().quota_count(), 0);
    }

    #[test]
    fn test_schedule_consumes_periods_outside_rule_window() {
        let mut w = world(1);
        // the rule only opens in march; the schedule cursor sits behind it
        let mut rule = w.engine.store().rule(w.rule_id).unwrap();
        rule.effective_from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        w.engine.store_mut().put_rule(rule);

        let mut schedule = monthly_schedule(w.rule_id);
        schedule.last_generated_period = Some(Period::monthly(2024, 1));
        schedule.periods_in_advance = 2;
        w.engine.store_mut().put_schedule(schedule);

        let time = test_time(2024, 2, 1);
        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();

        // february falls before the window and generates nothing; march
        // and april do, and the cursor moves past april
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].log.period, Period::monthly(2024, 3));
        assert_eq!(outcomes[1].log.period, Period::monthly(2024, 4));
        assert_eq!(w.engine.store().quota_count(), 2);

        let outcomes = w.engine.run_schedule(w.rule_id, &time).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn test_rule_not_covering_period_fails() {
        let mut w = world(1);
        let time = test_time(2024, 1, 1);
        let err = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2023, 12),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }

    #[test]
    fn test_overpayment_pends_and_resolves_to_next_quota() {
        let mut w = world(1);
        let time = test_time(2024, 3, 1);
        let unit_id = w.unit_ids[0];

        let march = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();

        // $130 against a single $100 quota: $30 pends
        let payment = completed_payment(
            &w,
            unit_id,
            Money::from_major(130),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        );
        w.engine.store_mut().put_payment(payment.clone());
        let allocation = w.engine.allocate_payment(payment.id, None, &time).unwrap();
        let pending = allocation.pending_allocation.unwrap();
        assert_eq!(pending.amount, Money::from_major(30));
        assert_eq!(
            w.engine.store().quota(march.created_quota_ids[0]).unwrap().status,
            QuotaStatus::Paid
        );

        // april's quota arrives; an administrator applies the remainder to it
        let april = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 4),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        let april_quota = april.created_quota_ids[0];
        let admin = Uuid::new_v4();
        let resolved = w
            .engine
            .resolve_pending_allocation(
                pending.id,
                PendingResolution::AllocateToQuota {
                    quota_id: april_quota,
                    resolved_by: admin,
                    notes: Some("applied to april".to_string()),
                },
                &time,
            )
            .unwrap();
        assert_eq!(resolved.allocated_to_quota_id, Some(april_quota));

        let quota = w.engine.store().quota(april_quota).unwrap();
        assert_eq!(quota.paid_amount, Money::from_major(30));
        assert_eq!(quota.balance, Money::from_major(70));
        assert_eq!(quota.status, QuotaStatus::Pending);

        // resolving again is rejected outright
        let err = w
            .engine
            .resolve_pending_allocation(
                pending.id,
                PendingResolution::Refund {
                    resolved_by: admin,
                    notes: None,
                },
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::AlreadyResolved { .. }));
    }

    #[test]
    fn test_pending_resolution_leftover_pends_again() {
        let mut w = world(1);
        let time = test_time(2024, 3, 1);
        let unit_id = w.unit_ids[0];

        let march = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        let march_quota = march.created_quota_ids[0];

        // a cancellation repaid in full leaves the whole payment pending
        let admin = Uuid::new_v4();
        w.engine
            .adjust_quota(
                march_quota,
                &AdjustmentRequest {
                    adjustment_type: AdjustmentType::Correction,
                    amount: Money::from_major(40),
                    reason: "board-approved rebate".to_string(),
                    adjusted_by: admin,
                },
                &time,
            )
            .unwrap();

        let payment = completed_payment(
            &w,
            unit_id,
            Money::from_major(100),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        );
        w.engine.store_mut().put_payment(payment.clone());
        let allocation = w.engine.allocate_payment(payment.id, None, &time).unwrap();
        let pending = allocation.pending_allocation.unwrap();
        assert_eq!(pending.amount, Money::from_major(60));

        // april's quota is corrected down to $50 so the $60 remainder
        // overshoots it and $10 must carry into a fresh pending record
        let april = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 4),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        let april_quota = april.created_quota_ids[0];
        w.engine
            .adjust_quota(
                april_quota,
                &AdjustmentRequest {
                    adjustment_type: AdjustmentType::Correction,
                    amount: Money::from_major(50),
                    reason: "board-approved rebate".to_string(),
                    adjusted_by: admin,
                },
                &time,
            )
            .unwrap();
        w.engine.take_events();

        w.engine
            .resolve_pending_allocation(
                pending.id,
                PendingResolution::AllocateToQuota {
                    quota_id: april_quota,
                    resolved_by: admin,
                    notes: None,
                },
                &time,
            )
            .unwrap();

        assert_eq!(
            w.engine.store().quota(april_quota).unwrap().status,
            QuotaStatus::Paid
        );
        let events = w.engine.take_events();
        let carried = events.iter().find_map(|e| match e {
            Event::PendingAllocationCreated {
                allocation_id,
                amount,
                ..
            } => Some((*allocation_id, *amount)),
            _ => None,
        });
        let (carried_id, carried_amount) = carried.expect("leftover must pend again");
        assert_eq!(carried_amount, Money::from_major(10));
        let carried = w.engine.store().pending_allocation(carried_id).unwrap();
        assert_eq!(
            carried.status,
            crate::types::PendingAllocationStatus::Pending
        );
        assert_eq!(carried.payment_id, payment.id);
    }

    #[test]
    fn test_refund_resolution() {
        let mut w = world(1);
        let time = test_time(2024, 3, 1);
        let unit_id = w.unit_ids[0];

        w.engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        let payment = completed_payment(
            &w,
            unit_id,
            Money::from_major(120),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        );
        w.engine.store_mut().put_payment(payment.clone());
        let pending = w
            .engine
            .allocate_payment(payment.id, None, &time)
            .unwrap()
            .pending_allocation
            .unwrap();

        let resolved = w
            .engine
            .resolve_pending_allocation(
                pending.id,
                PendingResolution::Refund {
                    resolved_by: Uuid::new_v4(),
                    notes: Some("resident requested refund".to_string()),
                },
                &time,
            )
            .unwrap();
        assert_eq!(
            resolved.status,
            crate::types::PendingAllocationStatus::Refunded
        );
        assert!(resolved.allocated_to_quota_id.is_none());

        let events = w.engine.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::PendingAllocationResolved {
                resolution: ResolutionType::Refunded,
                ..
            }
        )));
    }

    #[test]
    fn test_adjustment_through_engine() {
        let mut w = world(1);
        let time = test_time(2024, 3, 1);

        let outcome = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();
        let quota_id = outcome.created_quota_ids[0];

        let adjustment = w
            .engine
            .adjust_quota(
                quota_id,
                &AdjustmentRequest {
                    adjustment_type: AdjustmentType::Discount,
                    amount: Money::from_major(25),
                    reason: "long-standing resident discount".to_string(),
                    adjusted_by: Uuid::new_v4(),
                },
                &time,
            )
            .unwrap();
        assert_eq!(adjustment.previous_amount, Money::from_major(100));
        assert_eq!(adjustment.new_amount, Money::from_major(75));

        let quota = w.engine.store().quota(quota_id).unwrap();
        assert_eq!(quota.base_amount, Money::from_major(75));
        assert_eq!(quota.balance, Money::from_major(75));
        assert_eq!(
            w.engine.store().adjustments_for_quota(quota_id).unwrap().len(),
            1
        );
        assert!(w
            .engine
            .take_events()
            .iter()
            .any(|e| matches!(e, Event::QuotaAdjusted { .. })));
    }

    #[test]
    fn test_short_reason_rejected_through_engine() {
        let mut w = world(1);
        let time = test_time(2024, 3, 1);
        let outcome = w
            .engine
            .generate_for_period(
                w.rule_id,
                &Period::monthly(2024, 3),
                GenerationMethod::ManualBatch,
                &time,
            )
            .unwrap();

        let err = w
            .engine
            .adjust_quota(
                outcome.created_quota_ids[0],
                &AdjustmentRequest {
                    adjustment_type: AdjustmentType::Discount,
                    amount: Money::from_major(10),
                    reason: "typo".to_string(),
                    adjusted_by: Uuid::new_v4(),
                },
                &time,
            )
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }
}
