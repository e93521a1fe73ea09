//! keel auth: password hashing, access token issuance/verification,
//! refresh session lifecycle, account management, password recovery and
//! identity events.

pub mod accounts;
pub mod audit;
pub mod config;
pub mod error;
pub mod events;
pub mod password;
pub mod recovery;
pub mod service;
pub mod sweep;
pub mod token;

pub use accounts::{AccountService, RegisterInput};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use events::EventPublisher;
pub use recovery::{RecoveryOptions, RecoveryService};
pub use service::{SessionManager, SessionTokens};
pub use sweep::{Sweep, spawn_sweeper};
pub use token::{AccessTokenClaims, TokenService};
