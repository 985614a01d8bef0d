pub mod accrual;

pub use accrual::{AccrualEngine, AccrualResult};
