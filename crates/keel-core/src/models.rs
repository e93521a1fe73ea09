//! Domain models for keel.
//!
//! These are the core types shared across all crates.

pub mod audit;
pub mod event;
pub mod recovery;
pub mod session;
pub mod user;
