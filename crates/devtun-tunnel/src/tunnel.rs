//! Open tunnel and its pumping workers

use crate::registration::{self, Registration};
use devtun_core::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Default localtunnel-compatible provider
pub const DEFAULT_PROVIDER: &str = "https://localtunnel.me";

const EVENT_CAPACITY: usize = 64;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Notification emitted by an open tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// The tunnel was closed
    Closed,
    /// A pumping connection failed; the worker retries on its own
    Error(String),
}

/// Tunnel options
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Provider base URL
    pub provider: String,
    /// Requested subdomain; the provider picks one when unset
    pub subdomain: Option<String>,
    /// Host the local side of each pumping connection dials
    pub local_host: String,
    /// Port the local side of each pumping connection dials
    pub local_port: u16,
    /// Timeout of the registration request
    pub registration_timeout: Duration,
}

impl TunnelOptions {
    /// Options for exposing `local_port` through the default provider
    pub fn new(local_port: u16) -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            subdomain: None,
            local_host: "localhost".to_string(),
            local_port,
            registration_timeout: Duration::from_secs(30),
        }
    }
}

/// An open public tunnel
#[derive(Debug)]
pub struct Tunnel {
    registration: Registration,
    events: broadcast::Sender<TunnelEvent>,
    shutdown: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl Tunnel {
    /// Register with the provider and start pumping
    ///
    /// Resolves once the provider has reported the public URL.
    pub async fn open(options: TunnelOptions) -> Result<Self> {
        let provider = Url::parse(&options.provider)
            .map_err(|e| Error::Tunnel(format!("invalid provider URL {}: {e}", options.provider)))?;
        let client = reqwest::Client::new();

        let registration = registration::register(
            &client,
            &provider,
            options.subdomain.as_deref(),
            options.registration_timeout,
        )
        .await?;

        info!(
            url = %registration.url,
            remote = %format!("{}:{}", registration.remote_host, registration.remote_port),
            connections = registration.max_conn,
            "Tunnel registered"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);

        let workers = (0..registration.max_conn)
            .map(|id| {
                let worker = Worker {
                    id,
                    remote: (registration.remote_host.clone(), registration.remote_port),
                    local: (options.local_host.clone(), options.local_port),
                    events: events.clone(),
                };
                tokio::spawn(worker.run(shutdown.subscribe()))
            })
            .collect();

        Ok(Self {
            registration,
            events,
            shutdown,
            workers,
            closed: false,
        })
    }

    /// Public URL
    pub fn url(&self) -> &str {
        &self.registration.url
    }

    /// Public hostname
    pub fn host(&self) -> &str {
        &self.registration.public_host
    }

    /// Full registration details
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Subscribe to tunnel notifications
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }

    /// Whether [`Tunnel::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop every worker and emit [`TunnelEvent::Closed`]
    ///
    /// Subsequent calls do nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.shutdown.send(());
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "Tunnel worker panicked");
            }
        }

        info!(url = %self.registration.url, "Tunnel closed");
        let _ = self.events.send(TunnelEvent::Closed);
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.shutdown.send(());
        }
    }
}

/// One pumping connection, reopened whenever it ends
struct Worker {
    id: usize,
    remote: (String, u16),
    local: (String, u16),
    events: broadcast::Sender<TunnelEvent>,
}

impl Worker {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                keep_going = self.pump_once() => {
                    if !keep_going {
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
        debug!(worker = self.id, "Tunnel worker stopped");
    }

    /// Returns `false` when the next attempt should wait first
    async fn pump_once(&self) -> bool {
        let mut remote = match TcpStream::connect((self.remote.0.as_str(), self.remote.1)).await {
            Ok(stream) => stream,
            Err(e) => {
                self.error(format!(
                    "connection to tunnel server {}:{} failed: {e}",
                    self.remote.0, self.remote.1
                ));
                return false;
            }
        };
        // The server holds the socket open until a public request arrives.
        debug!(worker = self.id, "Connected to tunnel server");

        let mut local = match TcpStream::connect((self.local.0.as_str(), self.local.1)).await {
            Ok(stream) => stream,
            Err(e) => {
                self.error(format!(
                    "connection to local server {}:{} failed: {e}",
                    self.local.0, self.local.1
                ));
                return false;
            }
        };

        match tokio::io::copy_bidirectional(&mut remote, &mut local).await {
            Ok((up, down)) => {
                debug!(worker = self.id, up, down, "Tunnel connection finished");
                true
            }
            Err(e) => {
                self.error(format!("tunnel connection failed: {e}"));
                true
            }
        }
    }

    fn error(&self, message: String) {
        warn!(worker = self.id, error = %message, "Tunnel connection error");
        let _ = self.events.send(TunnelEvent::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Local service that echoes one message per connection
    async fn spawn_echo() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    let n = stream.read(&mut buf).await.unwrap();
                    stream.write_all(&buf[..n]).await.unwrap();
                });
            }
        });
        port
    }

    async fn mount_registration(server: &MockServer, route: &str, remote_port: u16) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "devtools-tunnel-abc",
                "ip": "127.0.0.1",
                "port": remote_port,
                "max_conn_count": 1,
                "url": "https://devtools-tunnel-abc.faketunnel.com"
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    fn options(server: &MockServer, local_port: u16) -> TunnelOptions {
        TunnelOptions {
            provider: server.uri(),
            subdomain: Some("devtools-tunnel-abc".to_string()),
            local_host: "127.0.0.1".to_string(),
            local_port,
            registration_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_options_defaults() {
        let options = TunnelOptions::new(9229);
        assert_eq!(options.provider, DEFAULT_PROVIDER);
        assert_eq!(options.local_host, "localhost");
        assert!(options.subdomain.is_none());
    }

    #[tokio::test]
    async fn test_open_pumps_bytes_to_local_port() {
        let server = MockServer::start().await;
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        mount_registration(&server, "/devtools-tunnel-abc", remote.local_addr().unwrap().port())
            .await;
        let local_port = spawn_echo().await;

        let mut tunnel = Tunnel::open(options(&server, local_port)).await.unwrap();
        assert_eq!(tunnel.url(), "https://devtools-tunnel-abc.faketunnel.com");
        assert_eq!(tunnel.host(), "devtools-tunnel-abc.faketunnel.com");

        let (mut public, _) = tokio::time::timeout(Duration::from_secs(5), remote.accept())
            .await
            .unwrap()
            .unwrap();
        public.write_all(b"GET / HTTP/1.1").await.unwrap();
        let mut buf = [0u8; 64];
        let n = public.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"GET / HTTP/1.1");

        let mut events = tunnel.subscribe();
        tunnel.close().await;
        assert_eq!(events.recv().await.unwrap(), TunnelEvent::Closed);

        tunnel.close().await;
        assert!(tunnel.is_closed());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_open_without_subdomain_requests_new() {
        let server = MockServer::start().await;
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("new", ""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "random",
                "port": remote.local_addr().unwrap().port(),
                "url": "http://random.faketunnel.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut opts = options(&server, spawn_echo().await);
        opts.subdomain = None;
        let mut tunnel = Tunnel::open(opts).await.unwrap();
        // No `ip`: workers dial the provider's own host.
        assert_eq!(tunnel.registration().remote_host, "127.0.0.1");
        tunnel.close().await;
    }

    #[tokio::test]
    async fn test_rejected_registration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({"message": "subdomain is taken"})),
            )
            .mount(&server)
            .await;

        let err = Tunnel::open(options(&server, 1)).await.unwrap_err();
        assert!(matches!(err, Error::Tunnel(_)));
        assert!(err.to_string().contains("subdomain is taken"));
    }

    #[tokio::test]
    async fn test_local_failure_emits_error() {
        let server = MockServer::start().await;
        let remote = TcpListener::bind("127.0.0.1:0").await.unwrap();
        mount_registration(&server, "/devtools-tunnel-abc", remote.local_addr().unwrap().port())
            .await;

        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead_port = closed.local_addr().unwrap().port();
        drop(closed);

        let mut tunnel = Tunnel::open(options(&server, dead_port)).await.unwrap();
        let mut events = tunnel.subscribe();
        let (_public, _) = remote.accept().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TunnelEvent::Error(msg) if msg.contains("local server")));
        tunnel.close().await;
    }
}
