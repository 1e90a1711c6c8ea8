//! nopas-autoscale: the reconciliation loop.
//!
//! # Cycle
//!
//! ```text
//! every CheckingFreq:
//!     counts  = concurrent current_count() of every resource
//!     ratio   = core ratio source   (only if a CoreRatio policy is loaded)
//!     targets = policy.evaluate(ctx)      // merged by the ensembler
//!     for each target, concurrently:
//!         clamp(target) == current  → skip
//!         otherwise                 → apply_count(target), record event
//! ```
//!
//! A failure on one resource is logged and recorded; it never stops the
//! others or the loop.

pub mod autoscaler;
pub mod reconciler;

pub use autoscaler::{Autoscaler, CycleReport};
pub use reconciler::{ReconcileOutcome, ReconcileResult, reconcile};
