//! Local HTTP server fronting the reverse proxy

use crate::handler::RequestHandler;
use crate::shutdown::ShutdownSignal;
use devtun_core::{Error, Result};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A running local server
#[derive(Debug)]
pub struct LocalServer {
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: Option<JoinHandle<()>>,
}

impl LocalServer {
    /// Bind and start serving
    ///
    /// `preferred_port` is only a preference: when it is taken, any free
    /// port is used instead.
    pub async fn start(
        bind: IpAddr,
        preferred_port: Option<u16>,
        handler: RequestHandler,
    ) -> Result<Self> {
        let listener = bind_listener(bind, preferred_port).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::ServerStart(format!("Failed to read bound address: {e}")))?;

        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(accept_loop(listener, handler, shutdown.clone()));

        info!(addr = %local_addr, "Local server listening");
        Ok(Self {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether [`LocalServer::close`] has run
    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stop accepting, finish in-flight requests and release the port
    ///
    /// Subsequent calls do nothing.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        self.shutdown.trigger();
        if let Err(e) = task.await {
            warn!(error = %e, "Local server task panicked");
        }
        info!(addr = %self.local_addr, "Local server closed");
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn bind_listener(bind: IpAddr, preferred_port: Option<u16>) -> Result<TcpListener> {
    if let Some(port) = preferred_port.filter(|port| *port != 0) {
        match TcpListener::bind(SocketAddr::new(bind, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(port, error = %e, "Preferred port unavailable, using any free port");
            }
        }
    }

    TcpListener::bind(SocketAddr::new(bind, 0))
        .await
        .map_err(|e| Error::PortAllocation(format!("Failed to bind {bind}: {e}")))
}

async fn accept_loop(listener: TcpListener, handler: RequestHandler, shutdown: ShutdownSignal) {
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        trace!("Accepted connection from {}", addr);
                        tokio::spawn(serve_connection(stream, handler.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: RequestHandler, shutdown: ShutdownSignal) {
    let mut shutdown_rx = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }

    let service = hyper::service::service_fn(move |req| {
        let handler = handler.clone();
        async move { handler.serve(req).await }
    });

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(e) = result {
        debug!("HTTP connection error: {}", e);
    }
}
