use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::adjustment::QuotaAdjustment;
use crate::config::{InterestConfiguration, PaymentConcept};
use crate::errors::{BillingError, Result};
use crate::formula::QuotaFormula;
use crate::generation::generator::QuotaGenerationLog;
use crate::generation::schedule::{QuotaGenerationRule, QuotaGenerationSchedule};
use crate::payments::pending::PaymentPendingAllocation;
use crate::payments::{Payment, PaymentApplication};
use crate::quota::Quota;
use crate::types::{
    BuildingId, ConceptId, CondominiumId, Currency, CurrencyId, FormulaId, PaymentId,
    PendingAllocationId, QuotaId, RuleId, UnitId, UnitProfile,
};

/// resolves which units a rule's scope covers
pub trait UnitDirectory {
    fn units_in_scope(
        &self,
        condominium_id: CondominiumId,
        building_id: Option<BuildingId>,
    ) -> Result<Vec<UnitProfile>>;
}

/// currency conversion lookup; conversion logic itself lives outside the engine
pub trait ExchangeRates {
    fn rate(&self, from: CurrencyId, to: CurrencyId, as_of: NaiveDate) -> Option<Decimal>;
}

/// transactional persistence collaborator.
///
/// Implementations must provide a uniqueness constraint on
/// (unit, concept, period) for quotas, optimistic version checks on quota
/// updates, and a single-writer lock per payment during allocation.
/// Generation logs, payment applications, and adjustments are append-only:
/// the contract deliberately has no update path for them.
pub trait BillingStore {
    // reference data
    fn currency(&self, id: CurrencyId) -> Result<Currency>;
    fn concept(&self, id: ConceptId) -> Result<PaymentConcept>;
    fn formula(&self, id: FormulaId) -> Result<QuotaFormula>;
    fn rule(&self, id: RuleId) -> Result<QuotaGenerationRule>;
    fn schedule_for_rule(&self, rule_id: RuleId) -> Result<Option<QuotaGenerationSchedule>>;
    fn update_schedule(&mut self, schedule: &QuotaGenerationSchedule) -> Result<()>;
    fn interest_configs(&self, condominium_id: CondominiumId) -> Result<Vec<InterestConfiguration>>;

    // quotas
    fn quota(&self, id: QuotaId) -> Result<Quota>;
    fn quota_exists(
        &self,
        unit_id: UnitId,
        concept_id: ConceptId,
        period_key: (i32, Option<u32>),
    ) -> Result<bool>;
    fn insert_quota(&mut self, quota: &Quota) -> Result<()>;
    /// version-checked update; the stored copy's version is bumped on success
    fn update_quota(&mut self, quota: &Quota) -> Result<Quota>;
    fn open_quotas_for_unit(&self, unit_id: UnitId) -> Result<Vec<Quota>>;

    // payments
    fn payment(&self, id: PaymentId) -> Result<Payment>;
    fn try_lock_payment(&mut self, id: PaymentId) -> Result<bool>;
    fn unlock_payment(&mut self, id: PaymentId);
    fn insert_application(&mut self, application: &PaymentApplication) -> Result<()>;
    fn applications_for_payment(&self, id: PaymentId) -> Result<Vec<PaymentApplication>>;

    // pending allocations
    fn insert_pending_allocation(&mut self, pending: &PaymentPendingAllocation) -> Result<()>;
    fn pending_allocation(&self, id: PendingAllocationId) -> Result<PaymentPendingAllocation>;
    fn update_pending_allocation(&mut self, pending: &PaymentPendingAllocation) -> Result<()>;

    // append-only audit
    fn insert_generation_log(&mut self, log: &QuotaGenerationLog) -> Result<()>;
    fn generation_logs_for_rule(&self, rule_id: RuleId) -> Result<Vec<QuotaGenerationLog>>;
    fn insert_adjustment(&mut self, adjustment: &QuotaAdjustment) -> Result<()>;
    fn adjustments_for_quota(&self, quota_id: QuotaId) -> Result<Vec<QuotaAdjustment>>;
}

fn not_found(entity: &str, id: impl std::fmt::Display) -> BillingError {
    BillingError::persistence(format!("{entity} not found: {id}"))
}

/// in-memory reference implementation of every collaborator guarantee
#[derive(Debug, Default)]
pub struct MemoryStore {
    currencies: HashMap<CurrencyId, Currency>,
    concepts: HashMap<ConceptId, PaymentConcept>,
    formulas: HashMap<FormulaId, QuotaFormula>,
    rules: HashMap<RuleId, QuotaGenerationRule>,
    schedules: HashMap<RuleId, QuotaGenerationSchedule>,
    interest_configs: Vec<InterestConfiguration>,
    quotas: HashMap<QuotaId, Quota>,
    // uniqueness constraint on (unit, concept, period)
    quota_keys: HashSet<(UnitId, ConceptId, (i32, Option<u32>))>,
    payments: HashMap<PaymentId, Payment>,
    payment_locks: HashSet<PaymentId>,
    applications: Vec<PaymentApplication>,
    pending_allocations: HashMap<PendingAllocationId, PaymentPendingAllocation>,
    generation_logs: Vec<QuotaGenerationLog>,
    adjustments: Vec<QuotaAdjustment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // seeding helpers for tests and callers
    pub fn put_currency(&mut self, currency: Currency) {
        self.currencies.insert(currency.id, currency);
    }

    pub fn put_concept(&mut self, concept: PaymentConcept) {
        self.concepts.insert(concept.id, concept);
    }

    pub fn put_formula(&mut self, formula: QuotaFormula) {
        self.formulas.insert(formula.id, formula);
    }

    pub fn put_rule(&mut self, rule: QuotaGenerationRule) {
        self.rules.insert(rule.id, rule);
    }

    pub fn put_schedule(&mut self, schedule: QuotaGenerationSchedule) {
        self.schedules.insert(schedule.rule_id, schedule);
    }

    pub fn put_interest_config(&mut self, config: InterestConfiguration) {
        self.interest_configs.push(config);
    }

    pub fn put_payment(&mut self, payment: Payment) {
        self.payments.insert(payment.id, payment);
    }

    pub fn quota_count(&self) -> usize {
        self.quotas.len()
    }

    pub fn generation_logs(&self) -> &[QuotaGenerationLog] {
        &self.generation_logs
    }
}

impl BillingStore for MemoryStore {
    fn currency(&self, id: CurrencyId) -> Result<Currency> {
        self.currencies
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("currency", id))
    }

    fn concept(&self, id: ConceptId) -> Result<PaymentConcept> {
        self.concepts
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("concept", id))
    }

    fn formula(&self, id: FormulaId) -> Result<QuotaFormula> {
        self.formulas
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("formula", id))
    }

    fn rule(&self, id: RuleId) -> Result<QuotaGenerationRule> {
        self.rules
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("rule", id))
    }

    fn schedule_for_rule(&self, rule_id: RuleId) -> Result<Option<QuotaGenerationSchedule>> {
        Ok(self.schedules.get(&rule_id).cloned())
    }

    fn update_schedule(&mut self, schedule: &QuotaGenerationSchedule) -> Result<()> {
        self.schedules.insert(schedule.rule_id, schedule.clone());
        Ok(())
    }

    fn interest_configs(&self, condominium_id: CondominiumId) -> Result<Vec<InterestConfiguration>> {
        Ok(self
            .interest_configs
            .iter()
            .filter(|c| c.condominium_id == condominium_id)
            .cloned()
            .collect())
    }

    fn quota(&self, id: QuotaId) -> Result<Quota> {
        self.quotas
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("quota", id))
    }

    fn quota_exists(
        &self,
        unit_id: UnitId,
        concept_id: ConceptId,
        period_key: (i32, Option<u32>),
    ) -> Result<bool> {
        Ok(self.quota_keys.contains(&(unit_id, concept_id, period_key)))
    }

    fn insert_quota(&mut self, quota: &Quota) -> Result<()> {
        let key = (quota.unit_id, quota.concept_id, quota.period.key());
        if !self.quota_keys.insert(key) {
            return Err(BillingError::persistence(format!(
                "quota already exists for unit {} concept {} period {}",
                quota.unit_id, quota.concept_id, quota.period
            )));
        }
        self.quotas.insert(quota.id, quota.clone());
        Ok(())
    }

    fn update_quota(&mut self, quota: &Quota) -> Result<Quota> {
        let stored = self
            .quotas
            .get_mut(&quota.id)
            .ok_or_else(|| not_found("quota", quota.id))?;
        if stored.version != quota.version {
            return Err(BillingError::VersionConflict {
                quota_id: quota.id,
                expected: quota.version,
                actual: stored.version,
            });
        }
        let mut updated = quota.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    fn open_quotas_for_unit(&self, unit_id: UnitId) -> Result<Vec<Quota>> {
        Ok(self
            .quotas
            .values()
            .filter(|q| q.unit_id == unit_id && q.status.is_open())
            .cloned()
            .collect())
    }

    fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("payment", id))
    }

    fn try_lock_payment(&mut self, id: PaymentId) -> Result<bool> {
        Ok(self.payment_locks.insert(id))
    }

    fn unlock_payment(&mut self, id: PaymentId) {
        self.payment_locks.remove(&id);
    }

    fn insert_application(&mut self, application: &PaymentApplication) -> Result<()> {
        self.applications.push(application.clone());
        Ok(())
    }

    fn applications_for_payment(&self, id: PaymentId) -> Result<Vec<PaymentApplication>> {
        Ok(self
            .applications
            .iter()
            .filter(|a| a.payment_id == id)
            .cloned()
            .collect())
    }

    fn insert_pending_allocation(&mut self, pending: &PaymentPendingAllocation) -> Result<()> {
        self.pending_allocations.insert(pending.id, pending.clone());
        Ok(())
    }

    fn pending_allocation(&self, id: PendingAllocationId) -> Result<PaymentPendingAllocation> {
        self.pending_allocations
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("pending allocation", id))
    }

    fn update_pending_allocation(&mut self, pending: &PaymentPendingAllocation) -> Result<()> {
        if !self.pending_allocations.contains_key(&pending.id) {
            return Err(not_found("pending allocation", pending.id));
        }
        self.pending_allocations.insert(pending.id, pending.clone());
        Ok(())
    }

    fn insert_generation_log(&mut self, log: &QuotaGenerationLog) -> Result<()> {
        self.generation_logs.push(log.clone());
        Ok(())
    }

    fn generation_logs_for_rule(&self, rule_id: RuleId) -> Result<Vec<QuotaGenerationLog>> {
        Ok(self
            .generation_logs
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .cloned()
            .collect())
    }

    fn insert_adjustment(&mut self, adjustment: &QuotaAdjustment) -> Result<()> {
        self.adjustments.push(adjustment.clone());
        Ok(())
    }

    fn adjustments_for_quota(&self, quota_id: QuotaId) -> Result<Vec<QuotaAdjustment>> {
        Ok(self
            .adjustments
            .iter()
            .filter(|a| a.quota_id == quota_id)
            .cloned()
            .collect())
    }
}

/// fixed-table exchange rates for tests and simple deployments
#[derive(Debug, Default)]
pub struct FixedExchangeRates {
    rates: HashMap<(CurrencyId, CurrencyId), Decimal>,
}

impl FixedExchangeRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, from: CurrencyId, to: CurrencyId, rate: Decimal) {
        self.rates.insert((from, to), rate);
    }
}

impl ExchangeRates for FixedExchangeRates {
    fn rate(&self, from: CurrencyId, to: CurrencyId, _as_of: NaiveDate) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        self.rates.get(&(from, to)).copied()
    }
}

/// static unit directory backed by a list of profiles
#[derive(Debug, Default)]
pub struct StaticUnitDirectory {
    units: Vec<UnitProfile>,
}

impl StaticUnitDirectory {
    pub fn new(units: Vec<UnitProfile>) -> Self {
        Self { units }
    }
}

impl UnitDirectory for StaticUnitDirectory {
    fn units_in_scope(
        &self,
        condominium_id: CondominiumId,
        building_id: Option<BuildingId>,
    ) -> Result<Vec<UnitProfile>> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.condominium_id == condominium_id)
            .filter(|u| building_id.is_none() || u.building_id == building_id)
            .cloned()
            .collect())
    }
}
