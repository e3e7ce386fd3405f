//! Reverse proxy implementation

use crate::client::{Body, HttpClient};
use crate::rules::RuleSet;
use bytes::Bytes;
use devtun_core::{Error, Result};
use devtun_rewrite::{ResponseRewriter, ResponseSink};
use http::{header, HeaderValue, Request, Response, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Body of responses produced by the proxy
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Host header sent to the target regardless of the incoming one
    pub host_header: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host_header: "localhost".to_string(),
        }
    }
}

/// Reverse proxy pointed at one debug target
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target_host: String,
    target_port: u16,
    client: HttpClient,
    config: ProxyConfig,
    rules: Arc<RuleSet>,
}

impl ReverseProxy {
    /// Create a new reverse proxy
    pub fn new(
        target_host: impl Into<String>,
        target_port: u16,
        client: HttpClient,
        config: ProxyConfig,
    ) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            client,
            config,
            rules: Arc::new(RuleSet::new()),
        }
    }

    /// Install the response rewrite rules
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    /// `host:port` of the target
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    /// Installed rules
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Forward a request and return the (possibly rewritten) response
    pub async fn forward(&self, mut req: Request<Body>) -> Result<Response<ProxyBody>> {
        let path_and_query = path_and_query(req.uri()).to_string();
        debug!(method = %req.method(), path = %path_and_query, "Proxying request");

        self.prepare_request(&mut req)?;
        let response = self.client.send(req).await?;
        trace!(
            path = %path_and_query,
            status = response.status().as_u16(),
            "Upstream responded"
        );

        Ok(self.apply_rules(&path_and_query, response))
    }

    /// Point the request at the target and force the Host header
    pub(crate) fn prepare_request(&self, req: &mut Request<Body>) -> Result<()> {
        *req.uri_mut() = self.build_upstream_uri(req.uri())?;

        let host = HeaderValue::from_str(&self.config.host_header)
            .map_err(|e| Error::InvalidRequest(format!("Invalid host: {e}")))?;
        req.headers_mut().insert(header::HOST, host);

        Ok(())
    }

    /// Build the upstream URI
    fn build_upstream_uri(&self, uri: &Uri) -> Result<Uri> {
        let upstream_uri = format!(
            "http://{}:{}{}",
            self.target_host,
            self.target_port,
            path_and_query(uri)
        );

        upstream_uri
            .parse()
            .map_err(|e| Error::UpstreamConnection(format!("Invalid upstream URI: {e}")))
    }

    fn apply_rules(&self, path_and_query: &str, response: Response<Incoming>) -> Response<ProxyBody> {
        let Some(rule) = self.rules.find(path_and_query) else {
            return response.map(BodyExt::boxed_unsync);
        };

        let (mut parts, body) = response.into_parts();
        // The rewritten body has a different length.
        parts.headers.remove(header::CONTENT_LENGTH);

        let encoding = parts
            .headers
            .get(header::CONTENT_ENCODING)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

        let (sink, sink_body) = devtun_rewrite::channel();
        match ResponseRewriter::intercept(sink, encoding.as_deref(), rule.callback()) {
            Ok(rewriter) => {
                debug!(
                    path = %path_and_query,
                    codec = ?rewriter.codec(),
                    "Rewriting response"
                );
                tokio::spawn(pump(body, rewriter));
                let body = sink_body
                    .map_err(|never| -> hyper::Error { match never {} })
                    .boxed_unsync();
                Response::from_parts(parts, body)
            }
            Err(rejected) => {
                warn!(
                    path = %path_and_query,
                    error = %rejected.error,
                    "Skipping response rewrite"
                );
                Response::from_parts(parts, body.boxed_unsync())
            }
        }
    }
}

/// Drive an upstream body through a sink, then end it
pub(crate) async fn pump<B, S>(mut body: B, mut sink: S)
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
    S: ResponseSink,
{
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    sink.write(data);
                }
            }
            Err(e) => {
                warn!(error = %e, "Upstream body failed, ending response early");
                break;
            }
        }
    }
    sink.end(None);
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}
