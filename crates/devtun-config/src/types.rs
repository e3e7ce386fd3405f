//! Configuration types

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Debug target
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Public tunnel
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Local server
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Debug target configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// WebSocket debugger URL, e.g. `ws://127.0.0.1:9222/devtools/browser/<id>`
    #[serde(default)]
    pub ws_url: Option<String>,
}

/// Tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelConfig {
    /// Prefix of generated subdomains
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Fixed subdomain; generated from `prefix` when unset
    #[serde(default)]
    pub subdomain: Option<String>,

    /// Basic-auth user; does not cover websocket upgrades
    #[serde(default)]
    pub user: Option<String>,

    /// Basic-auth password
    #[serde(default)]
    pub pass: Option<String>,

    /// Tunnel provider base URL
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Host the provider's connections are relayed to
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Registration timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub registration_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            subdomain: None,
            user: None,
            pass: None,
            provider: default_provider(),
            local_host: default_local_host(),
            registration_timeout: default_timeout(),
        }
    }
}

impl TunnelConfig {
    /// Credentials, when both user and password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

/// Local server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Preferred port; any free port is used when unset or taken
    #[serde(default)]
    pub port: Option<u16>,

    /// Timeout for the debug target's response head
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// `Host` header sent to the debug target
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
            request_timeout: default_timeout(),
            upstream_host: default_upstream_host(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

fn default_prefix() -> String {
    "devtools-tunnel".to_string()
}

fn default_provider() -> String {
    "https://localtunnel.me".to_string()
}

fn default_local_host() -> String {
    "localhost".to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upstream_host() -> String {
    "localhost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tunnel.prefix, "devtools-tunnel");
        assert_eq!(config.tunnel.provider, "https://localtunnel.me");
        assert_eq!(config.server.bind.to_string(), "127.0.0.1");
        assert_eq!(config.server.request_timeout, Duration::from_secs(30));
        assert_eq!(config.server.upstream_host, "localhost");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.endpoint.ws_url.is_none());
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let mut tunnel = TunnelConfig {
            user: Some("user".into()),
            ..Default::default()
        };
        assert_eq!(tunnel.credentials(), None);

        tunnel.pass = Some("secret".into());
        assert_eq!(tunnel.credentials(), Some(("user", "secret")));
    }
}
