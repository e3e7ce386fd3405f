//! Debug endpoint addressing
//!
//! A debug target is identified by the websocket debugger URL the browser
//! reports on startup (`ws://127.0.0.1:9222/devtools/browser/<id>`). Only the
//! host and port are kept; loopback literals are normalized to `localhost`
//! because many debug targets reject any other `Host`.

use crate::metadata::{MetadataClient, PageInfo, VersionInfo};
use crate::{Error, Result};
use url::Url;

/// Port used when the debugger URL carries none
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

const WS_SCHEME_MARKER: &str = "ws://";

/// Parsed debug endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevToolsEndpoint {
    ws_url: String,
    host: String,
    port: u16,
}

impl DevToolsEndpoint {
    /// Parse a websocket debugger URL
    ///
    /// Fails with [`Error::Validation`] before anything else happens when the
    /// URL is empty or does not contain `ws://`.
    pub fn new(ws_url: impl Into<String>) -> Result<Self> {
        let ws_url = ws_url.into();

        if ws_url.is_empty() {
            return Err(Error::Validation(
                "Expected webSocketDebuggerUrl to be a non-empty string".to_string(),
            ));
        }
        if !ws_url.contains(WS_SCHEME_MARKER) {
            return Err(Error::Validation(format!(
                "Expected webSocketDebuggerUrl to include `{WS_SCHEME_MARKER}`, got `{ws_url}`"
            )));
        }

        let parsed = Url::parse(&ws_url)
            .map_err(|e| Error::Validation(format!("Invalid webSocketDebuggerUrl: {e}")))?;

        let host = match parsed.host_str() {
            Some("127.0.0.1") | Some("[::1]") => "localhost".to_string(),
            Some(host) => host.to_string(),
            None => {
                return Err(Error::Validation(format!(
                    "webSocketDebuggerUrl has no host: `{ws_url}`"
                )))
            }
        };
        let port = parsed.port().unwrap_or(DEFAULT_DEBUG_PORT);

        Ok(Self { ws_url, host, port })
    }

    /// Parse an optional URL, treating `None` as a validation failure
    pub fn from_option(ws_url: Option<&str>) -> Result<Self> {
        match ws_url {
            Some(url) => Self::new(url),
            None => Err(Error::Validation(
                "Expected webSocketDebuggerUrl to be a string but received nothing".to_string(),
            )),
        }
    }

    /// The URL this endpoint was parsed from
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Normalized host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port of the debug target
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://{host}:{port}`
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Metadata client bound to this endpoint
    pub fn metadata(&self) -> MetadataClient {
        MetadataClient::new(self.http_base())
    }
}

/// Debug target reached directly, without a tunnel
#[derive(Debug, Clone)]
pub struct DevToolsLocal {
    endpoint: DevToolsEndpoint,
    metadata: MetadataClient,
}

impl DevToolsLocal {
    /// Create a local helper from a websocket debugger URL
    pub fn new(ws_url: impl Into<String>) -> Result<Self> {
        let endpoint = DevToolsEndpoint::new(ws_url)?;
        let metadata = endpoint.metadata();
        Ok(Self { endpoint, metadata })
    }

    /// Underlying endpoint
    pub fn endpoint(&self) -> &DevToolsEndpoint {
        &self.endpoint
    }

    /// Base URL of the debug target
    pub fn url(&self) -> String {
        self.endpoint.http_base()
    }

    /// Inspector URL for a page
    pub fn url_for_page_id(&self, page_id: &str) -> String {
        format!(
            "{}/devtools/inspector.html?ws={}:{}/devtools/page/{}",
            self.url(),
            self.endpoint.host(),
            self.endpoint.port(),
            page_id
        )
    }

    /// Fetch `/json/version`
    pub async fn fetch_version(&self) -> Result<VersionInfo> {
        self.metadata.fetch_version().await
    }

    /// Fetch `/json/list`
    pub async fn fetch_list(&self) -> Result<Vec<PageInfo>> {
        self.metadata.fetch_list().await
    }
}
