//! nopas-resources: scalable resources and their backends.
//!
//! A [`Resource`] wraps one backend (an EC2 auto-scaling group or a
//! Nomad job) behind a single contract: read the live count, apply a
//! clamped count, re-derive the `Plan` it was built from.
//!
//! # Apply sequence
//!
//! ```text
//! apply_count(target)
//!   ├── clamp target into [MinCount, MaxCount]
//!   ├── fresh read (job spec / group description)
//!   ├── write (register job / update desired capacity)
//!   ├── re-read and verify observed == clamped
//!   └── [scaling log] backend, old, new
//! ```
//!
//! Every backend call is bounded by a timeout. Each resource holds its
//! own async mutex so at most one apply runs against it at a time.
//!
//! Backends sit behind `async_trait` seams (`AutoScalingApi`,
//! `NomadApi`, `SecretStore`) built by a [`BackendFactory`]. The
//! [`memory`] module provides in-memory backends for tests.

pub mod ec2;
pub mod error;
pub mod factory;
pub mod memory;
pub mod nomad;
pub mod resource;
pub mod secret;

pub use ec2::{AutoScalingApi, AwsAutoScaling, Ec2AutoScalingGroup, GroupDescription};
pub use error::{ResourceError, ResourceResult};
pub use factory::{BackendFactory, LiveBackends};
pub use nomad::{Allocation, JobSpec, NomadApi, NomadHttpClient, NomadJob};
pub use resource::{Resource, ResourceBackend, ResourceSet, ScaleOutcome};
pub use secret::{SecretStore, VaultClient};
