//! Tunnel registration against the provider's HTTP API

use devtun_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Registration response as sent by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TunnelInfo {
    /// Assigned tunnel id (the subdomain)
    #[serde(default)]
    pub id: Option<String>,
    /// Address to connect the pumping sockets to
    #[serde(default)]
    pub ip: Option<String>,
    /// Port to connect the pumping sockets to
    #[serde(default)]
    pub port: Option<u16>,
    /// Public URL
    #[serde(default)]
    pub url: Option<String>,
    /// Alternative public URL served from the provider's cache
    #[serde(default)]
    pub cached_url: Option<String>,
    /// How many pumping sockets the provider accepts
    #[serde(default)]
    pub max_conn_count: Option<usize>,
    /// Human readable message, set on failures
    #[serde(default)]
    pub message: Option<String>,
}

/// A successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Assigned tunnel id
    pub id: String,
    /// Public URL
    pub url: String,
    /// Public hostname, taken from `url`
    pub public_host: String,
    /// Alternative public URL
    pub cached_url: Option<String>,
    /// Host the pumping sockets connect to
    pub remote_host: String,
    /// Port the pumping sockets connect to
    pub remote_port: u16,
    /// Number of pumping sockets
    pub max_conn: usize,
}

impl TunnelInfo {
    /// Validate a registration response
    ///
    /// `provider` supplies the remote host when the response carries no `ip`.
    pub fn into_registration(self, provider: &Url) -> Result<Registration> {
        let failure = |what: &str| {
            Error::Tunnel(
                self.message
                    .clone()
                    .unwrap_or_else(|| format!("registration response is missing `{what}`")),
            )
        };

        let port = self.port.ok_or_else(|| failure("port"))?;
        let url = self.url.clone().ok_or_else(|| failure("url"))?;
        let public_host = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| Error::Tunnel(format!("tunnel URL has no host: {url}")))?;

        let remote_host = match self.ip {
            Some(ip) if !ip.is_empty() => ip,
            _ => provider
                .host_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Tunnel(format!("provider URL has no host: {provider}")))?,
        };

        Ok(Registration {
            id: self.id.unwrap_or_default(),
            url,
            public_host,
            cached_url: self.cached_url,
            remote_host,
            remote_port: port,
            max_conn: self.max_conn_count.unwrap_or(1).max(1),
        })
    }
}

/// URL the registration request is sent to
pub fn registration_url(provider: &Url, subdomain: Option<&str>) -> Result<Url> {
    let url = match subdomain {
        Some(subdomain) if !subdomain.is_empty() => provider.join(subdomain),
        _ => provider.join("?new"),
    };
    url.map_err(|e| Error::Tunnel(format!("invalid registration URL: {e}")))
}

/// Register a tunnel with the provider
pub async fn register(
    client: &reqwest::Client,
    provider: &Url,
    subdomain: Option<&str>,
    timeout: Duration,
) -> Result<Registration> {
    let url = registration_url(provider, subdomain)?;
    debug!(url = %url, "Registering tunnel");

    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Tunnel(format!("registration request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Tunnel(format!("failed to read registration response: {e}")))?;
    let info: TunnelInfo = serde_json::from_str(&body).unwrap_or_default();

    if !status.is_success() {
        let reason = info.message.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string()
        });
        return Err(Error::Tunnel(format!(
            "registration rejected ({}): {reason}",
            status.as_u16()
        )));
    }

    info.into_registration(provider)
}
