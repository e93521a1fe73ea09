//! Shared domain types for the keel identity and session subsystem.
//!
//! Nothing in this crate performs I/O. Storage backends implement the
//! traits in [`repository`]; the auth and gateway crates consume them.

pub mod clock;
pub mod error;
pub mod models;
pub mod repository;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FieldViolation, KeelError, KeelResult};
