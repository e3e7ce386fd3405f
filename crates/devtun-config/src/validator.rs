//! Configuration validation

use crate::Config;
use devtun_core::{Error, Result};
use url::Url;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_endpoint(config)?;
    validate_tunnel(config)?;
    validate_server(config)?;
    validate_logging(config)?;

    Ok(())
}

fn validate_endpoint(config: &Config) -> Result<()> {
    if let Some(ref ws_url) = config.endpoint.ws_url {
        if !ws_url.contains("ws://") {
            return Err(Error::Config(format!(
                "endpoint.ws_url must be a ws:// URL, got {ws_url:?}"
            )));
        }
    }
    Ok(())
}

fn validate_tunnel(config: &Config) -> Result<()> {
    let tunnel = &config.tunnel;

    if tunnel.prefix.is_empty() {
        return Err(Error::Config("tunnel.prefix cannot be empty".to_string()));
    }
    if !is_dns_label(&tunnel.prefix) {
        return Err(Error::Config(format!(
            "tunnel.prefix must be lowercase letters, digits and '-': {}",
            tunnel.prefix
        )));
    }

    if let Some(ref subdomain) = tunnel.subdomain {
        if !is_dns_label(subdomain) {
            return Err(Error::Config(format!(
                "tunnel.subdomain is not a valid DNS label: {subdomain}"
            )));
        }
    }

    if tunnel.user.is_some() != tunnel.pass.is_some() {
        return Err(Error::Config(
            "tunnel user and pass must be set together".to_string(),
        ));
    }

    let provider = Url::parse(&tunnel.provider)
        .map_err(|e| Error::Config(format!("Invalid tunnel.provider: {e}")))?;
    if !matches!(provider.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "tunnel.provider must be an http(s) URL: {}",
            tunnel.provider
        )));
    }

    if tunnel.local_host.is_empty() {
        return Err(Error::Config("tunnel.local_host cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    if config.server.request_timeout.is_zero() {
        return Err(Error::Config("request_timeout must be > 0".to_string()));
    }

    if config.server.request_timeout.as_secs() > 300 {
        tracing::warn!("request_timeout is very high (>5 minutes)");
    }

    if config.server.upstream_host.is_empty() {
        return Err(Error::Config("server.upstream_host cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        other => Err(Error::Config(format!("Invalid log level: {other}"))),
    }
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
