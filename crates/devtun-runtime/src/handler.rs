//! HTTP request handler of the local server

use bytes::Bytes;
use devtun_auth::BasicAuthGate;
use devtun_core::{Error, Result};
use devtun_proxy::{is_upgrade_request, ProxyBody, ReverseProxy};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::sync::Arc;
use tracing::{debug, error};

/// Routes requests to the reverse proxy, gating plain requests behind auth
#[derive(Debug, Clone)]
pub struct RequestHandler {
    proxy: Arc<ReverseProxy>,
    auth: Option<BasicAuthGate>,
}

impl RequestHandler {
    /// Create a handler without authentication
    pub fn new(proxy: ReverseProxy) -> Self {
        Self {
            proxy: Arc::new(proxy),
            auth: None,
        }
    }

    /// Require basic auth for plain (non-upgrade) requests
    pub fn with_auth(mut self, gate: BasicAuthGate) -> Self {
        self.auth = Some(gate);
        self
    }

    /// Handle an incoming request
    pub async fn handle(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>> {
        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| Error::InvalidRequest(format!("Failed to read request body: {e}")))?
            .to_bytes();
        let req = Request::from_parts(parts, Full::new(body_bytes));

        // Upgrades are not gated: the websocket channel cannot answer a challenge.
        if is_upgrade_request(&req) {
            debug!(path = %req.uri().path(), "Upgrade request");
            return self.proxy.forward_upgrade(req).await;
        }

        if let Some(ref gate) = self.auth {
            if !gate.check(req.headers()).is_allowed() {
                return Ok(gate.challenge(full("401 Unauthorized")));
            }
        }

        self.proxy.forward(req).await
    }

    /// Handle a request, turning errors into status responses
    pub async fn serve(&self, req: Request<Incoming>) -> std::result::Result<Response<ProxyBody>, http::Error> {
        match self.handle(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Request handler error: {}", e);
                Response::builder()
                    .status(e.to_status_code())
                    .body(full(format!("Error: {e}")))
            }
        }
    }
}

/// Response body from a complete chunk
fn full(chunk: impl Into<Bytes>) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| -> hyper::Error { match never {} })
        .boxed_unsync()
}

