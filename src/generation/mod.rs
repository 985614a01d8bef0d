pub mod generator;
pub mod schedule;

pub use generator::{GenerationOutcome, QuotaGenerationLog, QuotaGenerator};
pub use schedule::{QuotaGenerationRule, QuotaGenerationSchedule, ScheduleFrequency};
