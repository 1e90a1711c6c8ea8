//! nopas-core: shared types for the nopas autoscaler.
//!
//! Everything that crosses a persistence or wire boundary lives here:
//! resource `Plan`s, the `GenericSubPolicy` record, schedule windows,
//! scaling magnitudes, the ensembler and the full `PolicyState`. The
//! daemon's `nopas.toml` parser is in [`config`].

pub mod config;
pub mod duration;
pub mod types;

pub use config::NopasConfig;
pub use duration::parse_duration;
pub use types::*;
