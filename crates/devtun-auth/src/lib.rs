//! Basic authentication for devtun
//!
//! The gate decides synchronously whether a request may pass. Observers can
//! subscribe to [`AuthEvent`]s for logging; nothing in the gate waits on them.

#![warn(
    clippy::all,
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod basic;

pub use basic::{AuthEvent, AuthOutcome, BasicAuthGate, DEFAULT_REALM};
