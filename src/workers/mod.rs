pub mod reconciliation;

pub use reconciliation::{ReconciliationError, ReconciliationWorker, Resolution, TickOutcome};
