//! # devtun Reverse Proxy
//!
//! Forwards every request verbatim to a single debug target with:
//! - `Host` rewritten to what the target accepts
//! - Per-path response rewrite rules
//! - Transparent protocol-upgrade (WebSocket) tunnelling

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod proxy;
pub mod rules;
pub mod upgrade;

pub use client::HttpClient;
pub use proxy::{ProxyBody, ProxyConfig, ReverseProxy};
pub use rules::{ProxyRule, RuleSet};
pub use upgrade::is_upgrade_request;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::HttpClient;
    pub use crate::proxy::{ProxyBody, ProxyConfig, ReverseProxy};
    pub use crate::rules::{ProxyRule, RuleSet};
}
