//! Credential lifecycle: storage, validity probes, refresh strategies and the
//! keepalive schedule that drives them.
//!
//! # Architecture
//!
//! - [`CredentialStore`]: the single in-memory owner of a target's credential,
//!   backed by a [`CredentialPersistence`] (cookie file or database)
//! - [`Refresher`]: validity probe + refresh strategy per authentication mechanism
//! - [`CredentialService`]: serializes refreshes and handles persistence,
//!   failure tracking and alerting
//! - [`KeepaliveScheduler`]: periodic check/refresh on a fixed, daily or cron schedule

pub mod error;
pub mod keepalive;
pub mod platforms;
pub mod refresher;
pub mod service;
pub mod store;
pub mod tracker;
pub mod types;

pub use error::CredentialError;
pub use keepalive::{KeepaliveSchedule, KeepaliveScheduler, KeepaliveState};
pub use refresher::{ForcedRefresher, Refresher};
pub use service::{CredentialService, RefreshOutcome};
pub use store::{CredentialPersistence, CredentialStore, FileCredentialPersistence};
pub use tracker::RefreshFailureTracker;
pub use types::{Credential, ValidityState};
