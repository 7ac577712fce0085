//! Admission control and billing reconciliation.
//!
//! [`AdmissionController::reserve`] atomically claims one of a tenant's
//! concurrent call slots against its effective plan limits, after checking
//! provider allowlists and the usage-minute budget. The claim is released
//! when the [`Reconciler`] finalizes the call's record: computing costs,
//! emitting the write-once usage record, and marking the row terminal.
//! Finalization is idempotent on call id; the stale sweep is the safety
//! net for calls whose session never tore down.

pub mod billing;
pub mod controller;
pub mod plan;
pub mod stores;

pub use billing::{billed_minutes, CallOutcome, RateTable, Reconciler};
pub use controller::{AdmissionController, AdmissionStats, Reservation, ReserveRequest};
pub use plan::{PlanSource, StaticPlanSource};
pub use stores::{CallStore, MemoryCallStore, MemoryUsageStore, UsageStore};
