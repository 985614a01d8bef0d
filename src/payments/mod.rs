pub mod allocator;
pub mod pending;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{CurrencyId, PaymentId, PaymentStatus, QuotaId, UnitId, UserId};

pub use allocator::{AllocationOutcome, PaymentAllocator};
pub use pending::{PaymentPendingAllocation, PendingResolution};

/// money received from a resident against a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub unit_id: UnitId,
    pub payer_id: UserId,
    /// nominal amount in the billing currency
    pub amount: Money,
    pub currency_id: CurrencyId,
    /// amount actually received, possibly in another currency
    pub paid_amount: Money,
    pub paid_currency_id: CurrencyId,
    /// rate frozen at receipt time when the currencies differ
    pub exchange_rate: Option<Decimal>,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub payment_date: NaiveDate,
    pub received_at: DateTime<Utc>,
}

impl Payment {
    /// only completed payments may be allocated
    pub fn ensure_allocatable(&self) -> Result<()> {
        if self.status != PaymentStatus::Completed {
            return Err(BillingError::PaymentNotAllocatable {
                payment_id: self.id,
            });
        }
        Ok(())
    }
}

/// how the payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    MobilePayment,
    Check,
}

/// append-only record of one allocation of a payment to a quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub quota_id: QuotaId,
    pub applied_amount: Money,
    pub applied_to_principal: Money,
    pub applied_to_interest: Money,
    /// early-payment discount granted as part of this application
    pub discount_granted: Money,
    pub applied_at: DateTime<Utc>,
}

impl PaymentApplication {
    pub fn check_split(&self) -> Result<()> {
        if self.applied_to_principal + self.applied_to_interest != self.applied_amount {
            return Err(BillingError::validation(format!(
                "application split {} + {} != {}",
                self.applied_to_principal, self.applied_to_interest, self.applied_amount
            )));
        }
        Ok(())
    }
}
