//! nopas-policy: sub-policies and the policy aggregator.
//!
//! A sub-policy maps the evaluation context (time of day, weekday, live
//! counts, cluster core ratio) to one recommended count per managed
//! resource. The aggregator merges overlapping recommendations:
//!
//! ```text
//! for each sub-policy:      recommend(ctx) → {resource: count}
//! for each resource:
//!     one recommendation  → take it
//!     several             → ensembler.merge (max | min | mean)
//! ```
//!
//! Kinds form a closed set ([`SubPolicyKind`]); [`create_subpolicy`] is
//! the only place that maps a stored name to a variant.

pub mod aggregate;
pub mod context;
pub mod core_ratio;
pub mod daily_schedule;
pub mod error;
pub mod office_hour;
pub mod subpolicy;

pub use aggregate::{Evaluation, LoadError, Policy};
pub use context::EvaluationContext;
pub use core_ratio::{CoreRatio, CoreRatioSource, NomadCoreRatio};
pub use daily_schedule::DailySchedule;
pub use error::{PolicyError, PolicyResult};
pub use office_hour::OfficeHour;
pub use subpolicy::{SubPolicy, SubPolicyKind, create_subpolicy};
