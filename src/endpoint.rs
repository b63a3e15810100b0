//! Network endpoints
//!
//! A [`ServiceEndpoint`] owns one TCP listener and the task accepting on it.
//! What happens on each accepted connection is up to a [`ConnectionHandler`];
//! HTTP services implement [`HttpHandler`] and are wrapped in [`Http`].
//!
//! Endpoints are started at most once and never restarted. Stopping is
//! idempotent and also valid on an endpoint that never started.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::events::{Event, EventBus};

/// Which service an endpoint exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Swarm,
    Api,
    Gateway,
    StaticHttp,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointKind::Swarm => "swarm",
            EndpointKind::Api => "api",
            EndpointKind::Gateway => "gateway",
            EndpointKind::StaticHttp => "static-http",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Created,
    Running,
    Stopped,
}

/// Serves one accepted connection
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn serve_connection(&self, stream: TcpStream, remote: SocketAddr);
}

/// Answers one HTTP request
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>>;
}

/// Adapts an [`HttpHandler`] to serve HTTP/1 connections
pub struct Http<H>(pub Arc<H>);

#[async_trait]
impl<H: HttpHandler> ConnectionHandler for Http<H> {
    async fn serve_connection(&self, stream: TcpStream, remote: SocketAddr) {
        let io = TokioIo::new(stream);
        let handler = Arc::clone(&self.0);

        let service = service_fn(move |req| {
            let handler = Arc::clone(&handler);
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!(addr = %remote, error = %err, "Connection error");
        }
    }
}

/// One listening service
pub struct ServiceEndpoint {
    kind: EndpointKind,
    bind_addr: SocketAddr,
    state: EndpointState,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    events: EventBus,
}

impl ServiceEndpoint {
    pub fn new(kind: EndpointKind, bind_addr: SocketAddr, events: EventBus) -> Self {
        Self {
            kind,
            bind_addr,
            state: EndpointState::Created,
            local_addr: None,
            shutdown_tx: None,
            task: None,
            events,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and start accepting connections
    pub async fn start(
        &mut self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<SocketAddr, SessionError> {
        if self.state != EndpointState::Created {
            return Err(SessionError::EndpointStart {
                kind: self.kind,
                reason: format!("endpoint is {:?}, it can only be started once", self.state),
            });
        }

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| SessionError::EndpointStart {
                kind: self.kind,
                reason: format!("cannot bind {}: {}", self.bind_addr, e),
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let kind = self.kind;
        let task = tokio::spawn(accept_loop(kind, listener, handler, shutdown_rx));

        self.local_addr = Some(local_addr);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        self.state = EndpointState::Running;

        self.events.emit(Event::EndpointStarted {
            kind,
            addr: local_addr.to_string(),
        });
        Ok(local_addr)
    }

    /// Close the listener. Connections already accepted are not drained.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        match self.state {
            EndpointState::Stopped => return Ok(()),
            EndpointState::Created => {
                self.state = EndpointState::Stopped;
                return Ok(());
            }
            EndpointState::Running => {}
        }
        self.state = EndpointState::Stopped;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        let joined = match self.task.take() {
            Some(task) => task.await,
            None => Ok(()),
        };

        self.events.emit(Event::EndpointStopped { kind: self.kind });

        joined.map_err(|e| SessionError::Io(std::io::Error::other(format!(
            "{} accept loop ended abnormally: {}",
            self.kind, e
        ))))
    }
}

async fn accept_loop(
    kind: EndpointKind,
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        handler.serve_connection(stream, remote).await;
                    });
                }
                Err(e) => {
                    warn!(%kind, error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            // Fires on stop() and when the endpoint is dropped
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!(%kind, "Accept loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    struct Hello;

    #[async_trait]
    impl ConnectionHandler for Hello {
        async fn serve_connection(&self, mut stream: TcpStream, _remote: SocketAddr) {
            let _ = stream.write_all(b"hello").await;
        }
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_start_once_stop_idempotent() {
        let mut endpoint = ServiceEndpoint::new(EndpointKind::Gateway, loopback(), EventBus::new());
        assert_eq!(endpoint.state(), EndpointState::Created);

        let addr = endpoint.start(Arc::new(Hello)).await.unwrap();
        assert_eq!(endpoint.state(), EndpointState::Running);
        assert_ne!(addr.port(), 0);

        let again = endpoint.start(Arc::new(Hello)).await;
        assert!(matches!(again, Err(SessionError::EndpointStart { .. })));

        endpoint.stop().await.unwrap();
        endpoint.stop().await.unwrap();
        assert_eq!(endpoint.state(), EndpointState::Stopped);

        // Never restarted
        assert!(endpoint.start(Arc::new(Hello)).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let taken = TcpListener::bind(loopback()).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let mut endpoint = ServiceEndpoint::new(EndpointKind::Api, addr, EventBus::new());
        let err = endpoint.start(Arc::new(Hello)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::EndpointStart {
                kind: EndpointKind::Api,
                ..
            }
        ));
        assert_eq!(endpoint.state(), EndpointState::Created);
        endpoint.stop().await.unwrap();
        assert_eq!(endpoint.state(), EndpointState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let mut endpoint = ServiceEndpoint::new(EndpointKind::Swarm, loopback(), EventBus::new());
        let addr = endpoint.start(Arc::new(Hello)).await.unwrap();
        endpoint.stop().await.unwrap();

        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_emits_lifecycle_events() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut endpoint = ServiceEndpoint::new(EndpointKind::Gateway, loopback(), events);

        let addr = endpoint.start(Arc::new(Hello)).await.unwrap();
        endpoint.stop().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            Event::EndpointStarted {
                kind: EndpointKind::Gateway,
                addr: addr.to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::EndpointStopped {
                kind: EndpointKind::Gateway
            }
        );
    }
}
