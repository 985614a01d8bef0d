use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PaymentConcept;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{Event, EventStore};
use crate::formula::FormulaSnapshot;
use crate::generation::schedule::{quota_dates, QuotaGenerationRule};
use crate::quota::Quota;
use crate::store::BillingStore;
use crate::types::{
    ConceptId, Currency, GenerationMethod, GenerationStatus, Period, RuleId, UnitId, UnitProfile,
};

/// append-only audit of one generation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaGenerationLog {
    pub id: Uuid,
    pub rule_id: RuleId,
    pub concept_id: ConceptId,
    pub period: Period,
    pub method: GenerationMethod,
    pub status: GenerationStatus,
    pub quotas_created: u32,
    pub quotas_failed: u32,
    pub total_amount: Money,
    pub units_affected: Vec<UnitId>,
    pub units_failed: Vec<FailedUnit>,
    /// frozen copy of the formula used, for historical fidelity
    pub formula_snapshot: FormulaSnapshot,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// one unit the run could not bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUnit {
    pub unit_id: UnitId,
    pub error: String,
}

/// result of one generation run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub log: QuotaGenerationLog,
    pub created_quota_ids: Vec<Uuid>,
}

/// materializes quotas for a rule and period
pub struct QuotaGenerator;

impl QuotaGenerator {
    pub fn new() -> Self {
        Self
    }

    /// generate one period's quotas; per-unit failures never abort the batch
    #[allow(clippy::too_many_arguments)]
    pub fn generate<S: BillingStore>(
        &self,
        store: &mut S,
        rule: &QuotaGenerationRule,
        concept: &PaymentConcept,
        currency: &Currency,
        snapshot: &FormulaSnapshot,
        units: &[UnitProfile],
        period: &Period,
        issue_day: u32,
        due_day: u32,
        method: GenerationMethod,
        cancel: Option<&AtomicBool>,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<GenerationOutcome> {
        let (issue_date, due_date) = quota_dates(period, issue_day, due_day);

        let mut created_quota_ids = Vec::new();
        let mut units_affected = Vec::new();
        let mut units_failed = Vec::new();
        let mut total_amount = Money::ZERO;
        let mut cancelled = false;

        for unit in units {
            // callers may cancel between units; written quotas remain
            if cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false) {
                cancelled = true;
                break;
            }

            // idempotency guard: never duplicate or overwrite
            if store.quota_exists(unit.id, concept.id, period.key())? {
                continue;
            }

            let amount = match snapshot.amount_for(unit) {
                Ok(amount) => amount.round_currency(currency.decimal_places),
                Err(err) => {
                    units_failed.push(FailedUnit {
                        unit_id: unit.id,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let quota = Quota::new(
                rule.condominium_id,
                rule.building_id.or(unit.building_id),
                unit.id,
                concept.id,
                period.clone(),
                concept.currency_id,
                amount,
                issue_date,
                due_date,
                snapshot.clone(),
            );
            store.insert_quota(&quota)?;

            events.emit(Event::QuotaGenerated {
                quota_id: quota.id,
                unit_id: unit.id,
                period: period.clone(),
                amount,
                due_date,
                timestamp: now,
            });

            total_amount += amount;
            created_quota_ids.push(quota.id);
            units_affected.push(unit.id);
        }

        let quotas_created = created_quota_ids.len() as u32;
        let quotas_failed = units_failed.len() as u32;
        let status = if quotas_failed > 0 && quotas_created == 0 {
            GenerationStatus::Failed
        } else if quotas_failed > 0 || cancelled {
            GenerationStatus::Partial
        } else {
            GenerationStatus::Completed
        };

        let error_detail = if cancelled {
            Some("generation cancelled between units".to_string())
        } else if quotas_failed > 0 {
            Some(format!("{quotas_failed} unit(s) failed formula resolution"))
        } else {
            None
        };

        let log = QuotaGenerationLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            concept_id: concept.id,
            period: period.clone(),
            method,
            status,
            quotas_created,
            quotas_failed,
            total_amount,
            units_affected,
            units_failed,
            formula_snapshot: snapshot.clone(),
            error_detail,
            created_at: now,
        };
        store.insert_generation_log(&log)?;

        events.emit(Event::GenerationRunCompleted {
            rule_id: rule.id,
            period: period.clone(),
            status,
            quotas_created,
            quotas_failed,
            total_amount,
            timestamp: now,
        });

        Ok(GenerationOutcome {
            log,
            created_quota_ids,
        })
    }
}

impl Default for QuotaGenerator {
    fn default() -> Self {
        Self::new()
    }
}
