//! Protocol-upgrade (WebSocket) tunnelling
//!
//! The upgrade handshake is forwarded like any other request. Once the target
//! answers `101 Switching Protocols`, both connections are taken over and raw
//! bytes are copied between them until either side closes.

use crate::client::Body;
use crate::proxy::{ProxyBody, ReverseProxy};
use devtun_core::{Error, Result};
use http::{header, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tracing::{debug, info, warn};

/// Check if a request asks for a protocol upgrade
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    req.headers().contains_key(header::UPGRADE)
        && req
            .headers()
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| {
                v.split(',').any(|s| s.trim().eq_ignore_ascii_case("upgrade"))
            })
}

impl ReverseProxy {
    /// Forward an upgrade request and splice the two connections together
    ///
    /// `req` must come from a server connection served with upgrades enabled.
    /// Responses other than `101` are returned unchanged and nothing is
    /// spliced.
    pub async fn forward_upgrade(&self, mut req: Request<Body>) -> Result<Response<ProxyBody>> {
        if !is_upgrade_request(&req) {
            return Err(Error::InvalidRequest(
                "Not a protocol upgrade request".to_string(),
            ));
        }

        let path = req.uri().path().to_string();
        let client_upgrade = hyper::upgrade::on(&mut req);

        self.prepare_request(&mut req)?;
        let mut response = self.client().send(req).await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            debug!(
                path = %path,
                status = response.status().as_u16(),
                "Target declined upgrade"
            );
            return Ok(response.map(BodyExt::boxed_unsync));
        }

        let upstream_upgrade = hyper::upgrade::on(&mut response);
        info!(path = %path, target = %self.target(), "Upgraded connection established");
        tokio::spawn(splice(path, client_upgrade, upstream_upgrade));

        Ok(response.map(BodyExt::boxed_unsync))
    }
}

async fn splice(path: String, client: OnUpgrade, upstream: OnUpgrade) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(path = %path, error = %e, "Upgrade failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => {
            debug!(path = %path, sent, received, "Upgraded connection closed");
        }
        Err(e) => {
            debug!(path = %path, error = %e, "Upgraded connection ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpClient;
    use crate::proxy::ProxyConfig;
    use bytes::Bytes;
    use http_body_util::{Empty, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_is_upgrade_request() {
        let ws_req = Request::builder()
            .header("Upgrade", "websocket")
            .header("Connection", "keep-alive, Upgrade")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&ws_req));

        let http_req = Request::builder().body(()).unwrap();
        assert!(!is_upgrade_request(&http_req));

        let no_connection = Request::builder()
            .header("Upgrade", "websocket")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&no_connection));
    }

    /// Upstream that accepts every upgrade and echoes one message
    async fn spawn_echo_target() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let service = service_fn(|mut req: Request<Incoming>| async move {
                        let on_upgrade = hyper::upgrade::on(&mut req);
                        tokio::spawn(async move {
                            let mut io = TokioIo::new(on_upgrade.await.unwrap());
                            let mut buf = [0u8; 64];
                            let n = io.read(&mut buf).await.unwrap();
                            io.write_all(&buf[..n]).await.unwrap();
                        });
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(StatusCode::SWITCHING_PROTOCOLS)
                                .header(header::UPGRADE, "websocket")
                                .header(header::CONNECTION, "Upgrade")
                                .body(Empty::<Bytes>::new())
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades()
                        .await;
                });
            }
        });
        addr
    }

    /// Front server handing every request to `forward_upgrade`
    async fn spawn_front(proxy: ReverseProxy) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let proxy = proxy.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await?.to_bytes();
                            let req = Request::from_parts(parts, Full::new(body));
                            Ok::<_, hyper::Error>(proxy.forward_upgrade(req).await.unwrap())
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades()
                        .await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_upgrade_is_spliced() {
        let target = spawn_echo_target().await;
        let proxy = ReverseProxy::new(
            target.ip().to_string(),
            target.port(),
            HttpClient::with_timeout(Duration::from_secs(5)),
            ProxyConfig::default(),
        );
        let front = spawn_front(proxy).await;

        let stream = TcpStream::connect(front).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn.with_upgrades());

        let req = Request::builder()
            .uri("/devtools/page/A")
            .header(header::HOST, "abc.faketunnel.com")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = sender.send_request(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

        let mut io = TokioIo::new(hyper::upgrade::on(response).await.unwrap());
        io.write_all(b"Runtime.enable").await.unwrap();
        let mut buf = [0u8; 64];
        let n = io.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Runtime.enable");
    }

    #[tokio::test]
    async fn test_plain_request_is_rejected() {
        let proxy = ReverseProxy::new("localhost", 9222, HttpClient::new(), ProxyConfig::default());
        let req = Request::builder()
            .uri("/json/list")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let err = proxy.forward_upgrade(req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
