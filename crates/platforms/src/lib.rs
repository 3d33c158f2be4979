//! Site bindings used by cookie-warden.
//!
//! Each platform module is a thin set of async functions over a shared
//! [`reqwest::Client`]. Hosts are carried in endpoint structs so callers can
//! point them at a mock server.

pub mod bilibili;
pub mod cookie_header;
pub mod weibo;

/// Browser-like user agent sent with every request.
pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
