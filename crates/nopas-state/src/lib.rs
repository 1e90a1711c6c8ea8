//! nopas-state: embedded state store for nopas.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the persisted
//! `PolicyState` the daemon rebuilds from after a restart, and a history
//! of scaling events per resource.
//!
//! Values are JSON-serialized into `&[u8]` columns. Event keys are
//! `{resource}:{epoch_ms:020}:{seq:010}` so a range scan over one
//! resource's prefix yields its events in time order.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
