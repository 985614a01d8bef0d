use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{resolve_interest_config, PaymentConcept};
use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::events::{Event, EventStore};
use crate::interest::AccrualEngine;
use crate::payments::pending::PaymentPendingAllocation;
use crate::payments::{Payment, PaymentApplication};
use crate::quota::Quota;
use crate::store::{BillingStore, ExchangeRates};
use crate::types::{Currency, QuotaId, QuotaStatus};

const MAX_OPTIMISTIC_RETRIES: u32 = 3;

/// result of allocating one payment
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub payment_id: Uuid,
    /// paid amount converted to the billing currency
    pub usable_amount: Money,
    pub applications: Vec<PaymentApplication>,
    pub total_applied: Money,
    pub pending_allocation: Option<PaymentPendingAllocation>,
}

/// distributes a completed payment across open quotas, oldest due first
pub struct PaymentAllocator {
    accrual: AccrualEngine,
    max_retries: u32,
}

impl PaymentAllocator {
    pub fn new() -> Self {
        Self {
            accrual: AccrualEngine::new(),
            max_retries: MAX_OPTIMISTIC_RETRIES,
        }
    }

    /// allocate a payment's usable amount; holds the payment's writer lock
    /// for the duration of the run
    pub fn allocate<S: BillingStore, X: ExchangeRates>(
        &self,
        store: &mut S,
        fx: &X,
        payment: &Payment,
        explicit_targets: Option<&[QuotaId]>,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<AllocationOutcome> {
        payment.ensure_allocatable()?;

        if !store.try_lock_payment(payment.id)? {
            return Err(BillingError::ConcurrentAllocation {
                payment_id: payment.id,
                attempts: 0,
            });
        }
        let result = self.allocate_locked(store, fx, payment, explicit_targets, now, events);
        store.unlock_payment(payment.id);
        result
    }

    fn allocate_locked<S: BillingStore, X: ExchangeRates>(
        &self,
        store: &mut S,
        fx: &X,
        payment: &Payment,
        explicit_targets: Option<&[QuotaId]>,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<AllocationOutcome> {
        let currency = store.currency(payment.currency_id)?;
        let usable = self.usable_amount(fx, payment, &currency)?;

        let explicit = explicit_targets.is_some();
        let candidates = self.candidate_quotas(store, payment, explicit_targets)?;

        let mut remaining = usable;
        let mut total_applied = Money::ZERO;
        let mut applications = Vec::new();

        for quota_id in candidates {
            if remaining.is_zero() {
                break;
            }
            if let Some(application) = self.allocate_to_quota(
                store,
                payment,
                &currency,
                quota_id,
                remaining,
                usable,
                total_applied,
                explicit,
                now,
                events,
            )? {
                remaining -= application.applied_amount;
                total_applied += application.applied_amount;
                applications.push(application);
            }
        }

        // nothing is ever silently dropped: a leftover becomes durable
        let pending_allocation = if remaining.is_positive() {
            let pending =
                PaymentPendingAllocation::new(payment.id, remaining, payment.currency_id, now);
            store.insert_pending_allocation(&pending)?;
            events.emit(Event::PendingAllocationCreated {
                payment_id: payment.id,
                allocation_id: pending.id,
                amount: remaining,
                timestamp: now,
            });
            Some(pending)
        } else {
            None
        };

        Ok(AllocationOutcome {
            payment_id: payment.id,
            usable_amount: usable,
            applications,
            total_applied,
            pending_allocation,
        })
    }

    /// paid amount converted to the billing currency via the frozen rate,
    /// falling back to the rate lookup collaborator
    fn usable_amount<X: ExchangeRates>(
        &self,
        fx: &X,
        payment: &Payment,
        currency: &Currency,
    ) -> Result<Money> {
        if payment.paid_currency_id == payment.currency_id {
            return Ok(payment.paid_amount.round_currency(currency.decimal_places));
        }
        let rate = payment
            .exchange_rate
            .or_else(|| {
                fx.rate(
                    payment.paid_currency_id,
                    payment.currency_id,
                    payment.payment_date,
                )
            })
            .ok_or(BillingError::CurrencyMismatch {
                from: payment.paid_currency_id,
                to: payment.currency_id,
                as_of: payment.payment_date,
            })?;
        Ok((payment.paid_amount * rate).round_currency(currency.decimal_places))
    }

    /// candidate order: caller-designated targets verbatim, otherwise the
    /// unit's open quotas in the payment's billing currency, oldest due
    /// first with quota id as tie-break
    fn candidate_quotas<S: BillingStore>(
        &self,
        store: &S,
        payment: &Payment,
        explicit_targets: Option<&[QuotaId]>,
    ) -> Result<Vec<QuotaId>> {
        match explicit_targets {
            Some(targets) => {
                for id in targets {
                    let quota = store.quota(*id)?;
                    if !quota.status.is_open() {
                        return Err(BillingError::validation(format!(
                            "target quota {id} is {:?}, not open",
                            quota.status
                        )));
                    }
                    if quota.currency_id != payment.currency_id {
                        return Err(BillingError::validation(format!(
                            "target quota {id} is billed in another currency"
                        )));
                    }
                }
                Ok(targets.to_vec())
            }
            None => {
                // quotas billed in another currency stay out of the run
                let mut quotas = store.open_quotas_for_unit(payment.unit_id)?;
                quotas.retain(|q| q.currency_id == payment.currency_id);
                quotas.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
                Ok(quotas.into_iter().map(|q| q.id).collect())
            }
        }
    }

    /// one quota's allocation under optimistic concurrency: re-read, refresh
    /// interest, allocate, and retry on version conflicts
    #[allow(clippy::too_many_arguments)]
    fn allocate_to_quota<S: BillingStore>(
        &self,
        store: &mut S,
        payment: &Payment,
        currency: &Currency,
        quota_id: QuotaId,
        remaining: Money,
        usable: Money,
        total_applied: Money,
        explicit: bool,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<Option<PaymentApplication>> {
        let concept = store.concept(store.quota(quota_id)?.concept_id)?;

        for _attempt in 0..self.max_retries {
            // re-read the current balance right before allocating
            let mut quota = store.quota(quota_id)?;
            let was_overdue = quota.status == QuotaStatus::Overdue;
            quota.refresh_overdue(payment.payment_date)?;

            let mut discount_granted = Money::ZERO;
            let mut accrued = Money::ZERO;
            if quota.days_overdue(payment.payment_date) > 0 {
                accrued = self.refresh_interest(store, &mut quota, &concept, currency, payment)?;
            } else {
                // early-payment discount comes off the principal
                let discount = concept.early_discount.discount_for(
                    quota.principal_balance(),
                    payment.payment_date,
                    quota.due_date,
                );
                if discount.is_positive() {
                    let discounted = discount.round_currency(currency.decimal_places);
                    quota.rebase(quota.base_amount - discounted)?;
                    discount_granted = discounted;
                }
            }

            let balance_after_accrual = quota.balance;
            let allocation = remaining.min(quota.balance);
            if allocation.is_zero() {
                return Ok(None);
            }
            // partial coverage requires the concept to allow it, unless the
            // caller designated this quota explicitly
            if allocation < quota.balance && !explicit && !concept.allows_partial_payment {
                return Ok(None);
            }
            // running total may never exceed the usable amount
            if total_applied + allocation > usable {
                return Err(BillingError::AllocationOverrun {
                    usable,
                    attempted: total_applied + allocation,
                });
            }

            let to_interest = allocation.min(quota.unpaid_interest());
            quota.record_allocation(allocation, to_interest)?;

            match store.update_quota(&quota) {
                Ok(updated) => {
                    // events only after the write landed
                    if accrued.is_positive() {
                        events.emit(Event::InterestAccrued {
                            quota_id,
                            amount: accrued,
                            new_balance: balance_after_accrual,
                            timestamp: now,
                        });
                    }
                    if !was_overdue && updated.status == QuotaStatus::Overdue {
                        events.emit(Event::QuotaOverdue {
                            quota_id,
                            unit_id: updated.unit_id,
                            balance: updated.balance,
                            due_date: updated.due_date,
                            timestamp: now,
                        });
                    }
                    let application = PaymentApplication {
                        id: Uuid::new_v4(),
                        payment_id: payment.id,
                        quota_id,
                        applied_amount: allocation,
                        applied_to_principal: allocation - to_interest,
                        applied_to_interest: to_interest,
                        discount_granted,
                        applied_at: now,
                    };
                    store.insert_application(&application)?;

                    events.emit(Event::PaymentAllocated {
                        payment_id: payment.id,
                        quota_id,
                        applied_amount: allocation,
                        applied_to_principal: application.applied_to_principal,
                        applied_to_interest: to_interest,
                        timestamp: now,
                    });
                    if updated.status == QuotaStatus::Paid {
                        events.emit(Event::QuotaPaid {
                            quota_id,
                            unit_id: updated.unit_id,
                            paid_amount: updated.paid_amount,
                            timestamp: now,
                        });
                    }
                    return Ok(Some(application));
                }
                Err(BillingError::VersionConflict { .. }) => continue,
                Err(other) => return Err(other),
            }
        }

        Err(BillingError::ConcurrentAllocation {
            payment_id: payment.id,
            attempts: self.max_retries,
        })
    }

    /// bring accrued interest current as of the payment date, returning the
    /// amount added in this run
    fn refresh_interest<S: BillingStore>(
        &self,
        store: &S,
        quota: &mut Quota,
        concept: &PaymentConcept,
        currency: &Currency,
        payment: &Payment,
    ) -> Result<Money> {
        let configs = store.interest_configs(quota.condominium_id)?;
        let config = resolve_interest_config(
            &configs,
            quota.concept_id,
            quota.building_id,
            payment.payment_date,
        );

        // surcharge and interest are computed off the same balance snapshot,
        // then recorded under their own one-shot markers
        let surcharge = self.accrual.late_surcharge(
            quota,
            &concept.late_surcharge,
            payment.payment_date,
            currency.decimal_places,
        );
        let result = config.map(|c| {
            self.accrual
                .accrue(quota, c, payment.payment_date, currency.decimal_places)
        });
        quota.record_surcharge(surcharge);

        let mut interest = Money::ZERO;
        if let Some(result) = result {
            if result.amount.is_positive() {
                quota.record_accrual(result.amount, payment.payment_date);
                if result.one_shot {
                    quota.flat_interest_applied = true;
                }
            }
            interest = result.amount;
        }
        Ok(surcharge + interest)
    }
}

impl Default for PaymentAllocator {
    fn default() -> Self {
        Self::new()
    }
}
