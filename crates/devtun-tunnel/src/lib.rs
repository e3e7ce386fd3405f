//! # devtun Tunnel
//!
//! Exposes a local TCP port under a public hostname through a
//! localtunnel-compatible server:
//! - Registration of a (possibly requested) subdomain
//! - A pool of connections pumping bytes between the server and the local port
//! - Close/error notifications over a broadcast channel

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod registration;
pub mod tunnel;

pub use registration::{Registration, TunnelInfo};
pub use tunnel::{Tunnel, TunnelEvent, TunnelOptions, DEFAULT_PROVIDER};
