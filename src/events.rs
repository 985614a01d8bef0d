use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    GenerationStatus, PaymentId, PendingAllocationId, Period, QuotaId, ResolutionType, RuleId,
    UnitId,
};

/// all events the engine can emit; delivery is the caller's concern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // generation events
    QuotaGenerated {
        quota_id: QuotaId,
        unit_id: UnitId,
        period: Period,
        amount: Money,
        due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    GenerationRunCompleted {
        rule_id: RuleId,
        period: Period,
        status: GenerationStatus,
        quotas_created: u32,
        quotas_failed: u32,
        total_amount: Money,
        timestamp: DateTime<Utc>,
    },

    // quota lifecycle events
    QuotaPaid {
        quota_id: QuotaId,
        unit_id: UnitId,
        paid_amount: Money,
        timestamp: DateTime<Utc>,
    },
    QuotaOverdue {
        quota_id: QuotaId,
        unit_id: UnitId,
        balance: Money,
        due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    InterestAccrued {
        quota_id: QuotaId,
        amount: Money,
        new_balance: Money,
        timestamp: DateTime<Utc>,
    },
    QuotaAdjusted {
        quota_id: QuotaId,
        previous_amount: Money,
        new_amount: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentAllocated {
        payment_id: PaymentId,
        quota_id: QuotaId,
        applied_amount: Money,
        applied_to_principal: Money,
        applied_to_interest: Money,
        timestamp: DateTime<Utc>,
    },
    PendingAllocationCreated {
        payment_id: PaymentId,
        allocation_id: PendingAllocationId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    PendingAllocationResolved {
        allocation_id: PendingAllocationId,
        resolution: ResolutionType,
        quota_id: Option<QuotaId>,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
