//! # devtun Runtime
//!
//! Wires the pieces into a running tunnel:
//! - Local HTTP server in front of the reverse proxy, optionally behind basic auth
//! - `DevToolsTunnel` create/close lifecycle
//! - Graceful shutdown with signal handling

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod handler;
pub mod orchestrator;
pub mod server;
pub mod shutdown;
pub mod subdomain;

pub use handler::RequestHandler;
pub use orchestrator::{DevToolsTunnel, DevToolsTunnelOptions};
pub use server::LocalServer;
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use subdomain::generate_subdomain;

use std::fmt;

/// Lifecycle state of a [`DevToolsTunnel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Constructed, `create()` not called yet
    Idle,
    /// `create()` in progress
    Creating,
    /// Tunnel is serving
    Active,
    /// Released; a new instance is needed to tunnel again
    Closed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Idle => write!(f, "idle"),
            TunnelState::Creating => write!(f, "creating"),
            TunnelState::Active => write!(f, "active"),
            TunnelState::Closed => write!(f, "closed"),
        }
    }
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::orchestrator::{DevToolsTunnel, DevToolsTunnelOptions};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::TunnelState;
}
