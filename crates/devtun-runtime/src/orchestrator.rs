//! Tunnel lifecycle: reverse proxy, local server and public tunnel
//!
//! [`DevToolsTunnel::create`] starts the pieces in order (proxy, local server,
//! tunnel) and [`DevToolsTunnel::close`] releases them in the reverse
//! dependency order (tunnel, server, proxy). Either may be called on a
//! partially started instance.

use crate::handler::RequestHandler;
use crate::server::LocalServer;
use crate::subdomain::generate_subdomain;
use crate::TunnelState;
use devtun_auth::{AuthEvent, BasicAuthGate};
use devtun_config::Config;
use devtun_core::{DevToolsEndpoint, Error, PageInfo, Result, VersionInfo};
use devtun_proxy::rules::{include_fetch_credentials, rewrite_json_hosts};
use devtun_proxy::{HttpClient, ProxyConfig, ProxyRule, ReverseProxy, RuleSet};
use devtun_tunnel::{Tunnel, TunnelEvent, TunnelOptions, DEFAULT_PROVIDER};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Options of a [`DevToolsTunnel`]
#[derive(Debug, Clone)]
pub struct DevToolsTunnelOptions {
    /// Prefix of the generated subdomain
    pub prefix: String,
    /// Fixed subdomain, wins over `prefix`
    pub subdomain: Option<String>,
    /// Basic-auth user
    ///
    /// Credentials gate plain HTTP requests only. WebSocket upgrades, and so
    /// the DevTools protocol channel itself, are forwarded without a check.
    pub user: Option<String>,
    /// Basic-auth password, see [`DevToolsTunnelOptions::user`]
    pub pass: Option<String>,
    /// Local server bind address
    pub bind: IpAddr,
    /// Preferred local server port
    pub port: Option<u16>,
    /// Timeout for the debug target's response head
    pub request_timeout: Duration,
    /// `Host` header sent to the debug target
    pub upstream_host: String,
    /// Tunnel provider base URL
    pub provider: String,
    /// Host the tunnel relays to
    pub local_host: String,
    /// Tunnel registration timeout
    pub registration_timeout: Duration,
}

impl Default for DevToolsTunnelOptions {
    fn default() -> Self {
        Self {
            prefix: "devtools-tunnel".to_string(),
            subdomain: None,
            user: None,
            pass: None,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: None,
            request_timeout: Duration::from_secs(30),
            upstream_host: "localhost".to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            local_host: "localhost".to_string(),
            registration_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for DevToolsTunnelOptions {
    fn from(config: &Config) -> Self {
        Self {
            prefix: config.tunnel.prefix.clone(),
            subdomain: config.tunnel.subdomain.clone(),
            user: config.tunnel.user.clone(),
            pass: config.tunnel.pass.clone(),
            bind: config.server.bind,
            port: config.server.port,
            request_timeout: config.server.request_timeout,
            upstream_host: config.server.upstream_host.clone(),
            provider: config.tunnel.provider.clone(),
            local_host: config.tunnel.local_host.clone(),
            registration_timeout: config.tunnel.registration_timeout,
        }
    }
}

/// A debug target exposed through a public tunnel
#[derive(Debug)]
pub struct DevToolsTunnel {
    endpoint: DevToolsEndpoint,
    options: DevToolsTunnelOptions,
    state: TunnelState,
    subdomain: Option<String>,
    tunnel_host: Arc<OnceLock<String>>,
    proxy: Option<ReverseProxy>,
    server: Option<LocalServer>,
    tunnel: Option<Tunnel>,
    monitor: Option<JoinHandle<()>>,
}

impl DevToolsTunnel {
    /// Create an idle tunnel for the debugger at `ws_url`
    ///
    /// Fails with [`Error::Validation`] for an empty or non-`ws://` URL.
    pub fn new(ws_url: impl Into<String>, options: DevToolsTunnelOptions) -> Result<Self> {
        Ok(Self::from_endpoint(DevToolsEndpoint::new(ws_url)?, options))
    }

    /// Create an idle tunnel for an already parsed endpoint
    pub fn from_endpoint(endpoint: DevToolsEndpoint, options: DevToolsTunnelOptions) -> Self {
        Self {
            endpoint,
            options,
            state: TunnelState::Idle,
            subdomain: None,
            tunnel_host: Arc::new(OnceLock::new()),
            proxy: None,
            server: None,
            tunnel: None,
            monitor: None,
        }
    }

    /// Debug target
    pub fn endpoint(&self) -> &DevToolsEndpoint {
        &self.endpoint
    }

    /// Options
    pub fn options(&self) -> &DevToolsTunnelOptions {
        &self.options
    }

    /// Lifecycle state
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Subdomain requested from the provider, once resolved
    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    /// Public URL, while active
    pub fn url(&self) -> Option<&str> {
        self.tunnel.as_ref().map(Tunnel::url)
    }

    /// Public hostname, once the tunnel reported it
    pub fn tunnel_host(&self) -> Option<&str> {
        self.tunnel_host.get().map(String::as_str)
    }

    /// Address of the local server, while it runs
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(LocalServer::local_addr)
    }

    /// Inspector URL for a page, served through the tunnel
    pub fn url_for_page_id(&self, page_id: &str) -> Option<String> {
        self.tunnel_host().map(|host| {
            format!("https://{host}/devtools/inspector.html?wss={host}/devtools/page/{page_id}")
        })
    }

    /// Fetch `/json/version` from the debug target
    pub async fn fetch_version(&self) -> Result<VersionInfo> {
        self.endpoint.metadata().fetch_version().await
    }

    /// Fetch `/json/list` from the debug target
    pub async fn fetch_list(&self) -> Result<Vec<PageInfo>> {
        self.endpoint.metadata().fetch_list().await
    }

    /// Start the proxy, the local server and the tunnel
    ///
    /// Resolves once the tunnel has reported its public URL. On failure
    /// everything started so far is released and the instance is left
    /// [`TunnelState::Closed`].
    pub async fn create(&mut self) -> Result<&Self> {
        if self.state != TunnelState::Idle {
            return Err(Error::Tunnel(format!(
                "cannot create a tunnel that is {}",
                self.state
            )));
        }
        self.state = TunnelState::Creating;

        if let Err(e) = self.start().await {
            error!(error = %e, "Failed to create tunnel");
            self.close().await;
            return Err(e);
        }

        self.state = TunnelState::Active;
        info!(
            local = %self.endpoint.http_base(),
            proxy = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            tunnel = self.url().unwrap_or_default(),
            "Tunnel created"
        );
        Ok(self)
    }

    async fn start(&mut self) -> Result<()> {
        let subdomain = self
            .options
            .subdomain
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| generate_subdomain(&self.options.prefix));
        self.subdomain = Some(subdomain.clone());

        let auth = match (&self.options.user, &self.options.pass) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some(BasicAuthGate::with_credentials(user.clone(), pass.clone()))
            }
            _ => None,
        };

        let proxy = ReverseProxy::new(
            self.endpoint.host(),
            self.endpoint.port(),
            HttpClient::with_timeout(self.options.request_timeout),
            ProxyConfig {
                host_header: self.options.upstream_host.clone(),
            },
        )
        .with_rules(self.rules());
        self.proxy = Some(proxy.clone());

        let mut handler = RequestHandler::new(proxy);
        if let Some(ref gate) = auth {
            handler = handler.with_auth(gate.clone());
        }
        let server = LocalServer::start(self.options.bind, self.options.port, handler).await?;
        let local_port = server.local_addr().port();
        self.server = Some(server);

        let tunnel = Tunnel::open(TunnelOptions {
            provider: self.options.provider.clone(),
            subdomain: Some(subdomain),
            local_host: self.options.local_host.clone(),
            local_port,
            registration_timeout: self.options.registration_timeout,
        })
        .await?;

        if self.tunnel_host.set(tunnel.host().to_string()).is_err() {
            return Err(Error::Internal("tunnel host already set".to_string()));
        }
        self.monitor = Some(tokio::spawn(log_events(
            tunnel.subscribe(),
            auth.as_ref().map(BasicAuthGate::subscribe),
        )));
        self.tunnel = Some(tunnel);

        Ok(())
    }

    /// Rewrite rules for the index page and the `/json` metadata
    fn rules(&self) -> RuleSet {
        let original_host = self.endpoint.host().to_string();
        let tunnel_host = Arc::clone(&self.tunnel_host);
        // Left unchanged until the tunnel has reported its host.
        let json = move |body: &str| {
            let tunnel_host = tunnel_host.get()?;
            rewrite_json_hosts(body, &original_host, tunnel_host)
        };

        RuleSet::new()
            .with_rule(ProxyRule::new("/", include_fetch_credentials))
            .with_rule(ProxyRule::new("/json/list", json.clone()))
            .with_rule(ProxyRule::new("/json/version", json))
    }

    /// Release the tunnel, then the local server, then the proxy
    ///
    /// Safe to call in any state, any number of times.
    pub async fn close(&mut self) -> &Self {
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
        if let Some(mut server) = self.server.take() {
            server.close().await;
        }
        if self.proxy.take().is_some() {
            debug!("Proxy released");
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }

        if self.state != TunnelState::Closed {
            self.state = TunnelState::Closed;
            info!("All closed");
        }
        self
    }
}

/// Log tunnel and auth notifications until the tunnel goes away
async fn log_events(
    mut tunnel: broadcast::Receiver<TunnelEvent>,
    mut auth: Option<broadcast::Receiver<AuthEvent>>,
) {
    loop {
        tokio::select! {
            event = tunnel.recv() => match event {
                Ok(TunnelEvent::Error(message)) => warn!(error = %message, "Tunnel error"),
                Ok(TunnelEvent::Closed) | Err(RecvError::Closed) => {
                    debug!("Tunnel closed");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Tunnel events dropped"),
            },
            Some(event) = next_auth_event(&mut auth) => match event {
                AuthEvent::Success { user } => debug!(user = %user, "User authenticated"),
                AuthEvent::Fail { user } => info!(user = %user, "User authentication failed"),
                AuthEvent::Error { message } => warn!(error = %message, "Authentication error"),
            },
        }
    }
}

async fn next_auth_event(rx: &mut Option<broadcast::Receiver<AuthEvent>>) -> Option<AuthEvent> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => {
                *rx = None;
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WS_URL: &str = "ws://127.0.0.1:9222/devtools/browser/ec78d039-2f19-4c6f-a08e-bcaf88e34b69";

    #[test]
    fn test_defaults() {
        let options = DevToolsTunnelOptions::default();
        assert_eq!(options.prefix, "devtools-tunnel");
        assert!(options.subdomain.is_none());
        assert!(options.user.is_none());
        assert!(options.pass.is_none());

        let from_config = DevToolsTunnelOptions::from(&Config::default());
        assert_eq!(from_config.prefix, options.prefix);
        assert_eq!(from_config.provider, options.provider);
        assert_eq!(from_config.bind, options.bind);
    }

    #[test]
    fn test_invalid_url() {
        let err = DevToolsTunnel::new("", DevToolsTunnelOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = DevToolsTunnel::new("http://localhost:9222", DevToolsTunnelOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_url_for_page_id() {
        let instance = DevToolsTunnel::new(WS_URL, DevToolsTunnelOptions::default()).unwrap();
        assert_eq!(instance.state(), TunnelState::Idle);
        assert_eq!(instance.url_for_page_id("foobar"), None);

        instance.tunnel_host.set("faketunnel.com".to_string()).unwrap();
        assert_eq!(
            instance.url_for_page_id("foobar").unwrap(),
            "https://faketunnel.com/devtools/inspector.html?wss=faketunnel.com/devtools/page/foobar"
        );
    }

    #[test]
    fn test_json_rules_wait_for_tunnel_host() {
        let instance = DevToolsTunnel::new(WS_URL, DevToolsTunnelOptions::default()).unwrap();
        let rules = instance.rules();
        let list = rules.find("/json/list").unwrap().callback();
        let body = r#"[{"webSocketDebuggerUrl":"ws://localhost:9222/devtools/page/A"}]"#;

        assert_eq!(list(body), None);

        instance.tunnel_host.set("faketunnel.com".to_string()).unwrap();
        assert_eq!(
            list(body).unwrap(),
            r#"[{"webSocketDebuggerUrl":"wss://faketunnel.com:9222/devtools/page/A"}]"#
        );
        assert!(rules.find("/json/version").is_some());
        assert!(rules.find("/").is_some());
        assert!(rules.find("/json").is_none());
    }

    #[tokio::test]
    async fn test_close_before_create_and_twice() {
        let mut instance = DevToolsTunnel::new(WS_URL, DevToolsTunnelOptions::default()).unwrap();

        instance.close().await;
        instance.close().await;
        assert_eq!(instance.state(), TunnelState::Closed);

        let err = instance.create().await.unwrap_err();
        assert!(matches!(err, Error::Tunnel(_)));
    }

    #[tokio::test]
    async fn test_failed_create_cleans_up() {
        let provider = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&provider)
            .await;

        let options = DevToolsTunnelOptions {
            provider: provider.uri(),
            prefix: "qa".to_string(),
            ..Default::default()
        };
        let mut instance = DevToolsTunnel::new(WS_URL, options).unwrap();

        let err = instance.create().await.unwrap_err();
        assert!(matches!(err, Error::Tunnel(_)));
        assert_eq!(instance.state(), TunnelState::Closed);
        assert!(instance.local_addr().is_none());
        assert!(instance.url().is_none());
        assert!(instance.subdomain().unwrap().starts_with("qa-"));
    }
}
