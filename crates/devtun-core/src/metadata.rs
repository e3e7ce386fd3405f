//! Metadata client for the debug target's `/json/*` endpoints

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Response of `/json/version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Browser product and version
    #[serde(rename = "Browser", default)]
    pub browser: Option<String>,

    /// DevTools protocol version
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: Option<String>,

    /// User agent string
    #[serde(rename = "User-Agent", default)]
    pub user_agent: Option<String>,

    /// V8 version
    #[serde(rename = "V8-Version", default)]
    pub v8_version: Option<String>,

    /// WebKit version
    #[serde(rename = "WebKit-Version", default)]
    pub webkit_version: Option<String>,

    /// Browser-level websocket debugger URL
    #[serde(rename = "webSocketDebuggerUrl", default)]
    pub web_socket_debugger_url: Option<String>,
}

/// One entry of `/json/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Target id
    pub id: String,

    /// Target type (`page`, `iframe`, `service_worker`, ...)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Page title
    #[serde(default)]
    pub title: Option<String>,

    /// Page URL
    #[serde(default)]
    pub url: Option<String>,

    /// Target description
    #[serde(default)]
    pub description: Option<String>,

    /// Frontend URL as reported by the target
    #[serde(default)]
    pub devtools_frontend_url: Option<String>,

    /// Page-level websocket debugger URL
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,

    /// Favicon URL
    #[serde(default)]
    pub favicon_url: Option<String>,
}

/// Thin HTTP client for the debug target's metadata endpoints
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    /// Create a client for `base_url` (`http://host:port`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Base URL requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `/json/version`
    pub async fn fetch_version(&self) -> Result<VersionInfo> {
        self.get_json("version", "/json/version").await
    }

    /// GET `/json/list`
    pub async fn fetch_list(&self) -> Result<Vec<PageInfo>> {
        self.get_json("list", "/json/list").await
    }

    async fn get_json<T: DeserializeOwned>(&self, call: &'static str, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching debug target metadata");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.as_str().to_string());
            return Err(Error::metadata(call, text));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
