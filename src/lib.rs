pub mod adjustment;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod formula;
pub mod generation;
pub mod interest;
pub mod payments;
pub mod quota;
pub mod store;
pub mod types;

// re-export key types
pub use decimal::{Money, Rate};
pub use errors::{BillingError, Result};
pub use events::{Event, EventStore};
pub use engine::BillingEngine;
pub use adjustment::{AdjustmentApplier, AdjustmentRequest, QuotaAdjustment};
pub use config::{
    CalculationPeriod, ChargeKind, ConceptScope, DiscountConfig, InterestConfiguration,
    InterestType, PaymentConcept, RecurrencePeriod, SurchargeConfig,
};
pub use formula::{CompiledFormula, FormulaKind, FormulaSnapshot, QuotaFormula};
pub use generation::{
    GenerationOutcome, QuotaGenerationLog, QuotaGenerationRule, QuotaGenerationSchedule,
    QuotaGenerator, ScheduleFrequency,
};
pub use interest::{AccrualEngine, AccrualResult};
pub use payments::{
    AllocationOutcome, Payment, PaymentAllocator, PaymentApplication, PaymentMethod,
    PaymentPendingAllocation, PendingResolution,
};
pub use quota::Quota;
pub use store::{
    BillingStore, ExchangeRates, FixedExchangeRates, MemoryStore, StaticUnitDirectory,
    UnitDirectory,
};
pub use types::{
    AdjustmentType, Currency, GenerationMethod, GenerationStatus, PaymentStatus,
    PendingAllocationStatus, Period, QuotaStatus, ResolutionType, UnitProfile,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
