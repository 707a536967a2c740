//! Background tasks.

pub mod reconcile;

pub use reconcile::{run_reconciliation, start_session_reconciler, ReconcileOutcome};
