//! cookie-warden keeps a cookie-authenticated session alive and turns a polled
//! content timeline into exactly-once-per-version notifications.

pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod credentials;
pub mod database;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
