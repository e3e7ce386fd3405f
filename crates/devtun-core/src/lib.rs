//! # devtun Core
//!
//! Core types and error handling shared by every devtun crate:
//! - Error taxonomy and `Result` alias
//! - Debug endpoint parsing (`ws://host:port/...` debugger URLs)
//! - Metadata client for `/json/version` and `/json/list`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod endpoint;
pub mod error;
pub mod metadata;

pub use endpoint::{DevToolsEndpoint, DevToolsLocal, DEFAULT_DEBUG_PORT};
pub use error::{Error, Result};
pub use metadata::{MetadataClient, PageInfo, VersionInfo};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::endpoint::{DevToolsEndpoint, DevToolsLocal};
    pub use crate::error::{Error, Result};
    pub use crate::metadata::{MetadataClient, PageInfo, VersionInfo};
}
