//! SQLArcade validation core.
//!
//! Students solve SQL quests against a per-session sandbox. This crate
//! provisions those sandboxes, executes candidate and reference queries in
//! always-rolled-back transactions, compares the outcomes, and asks a hosted
//! text model for a short hint when the attempt fails.

pub mod compare;
pub mod config;
pub mod error;
pub mod hint;
pub mod model;
pub mod pool;
pub mod quests;
pub mod sandbox;
pub mod sql;
pub mod store;
pub mod validate;

pub use compare::ComparePolicy;
pub use config::{ArcadeConfig, HintConfig};
pub use error::ArcadeError;
pub use model::{Outcome, RowSet};
pub use pool::SandboxPool;
pub use sandbox::Provisioner;
pub use store::SandboxStore;
pub use validate::{Arcade, ValidationRequest, ValidationResult};
