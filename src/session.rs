//! `serve ipfs` session
//!
//! Brings up, in order: the content directory, the store node (with its
//! swarm listener), the gateway, the control API and finally the sync
//! engine. Teardown runs the other way round and keeps going past failures
//! so every child gets released.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::ApiHandler;
use crate::config::Config;
use crate::endpoint::{EndpointKind, EndpointState, Http, ServiceEndpoint};
use crate::error::SessionError;
use crate::events::{Event, EventBus};
use crate::gateway::GatewayHandler;
use crate::node::{ContentStore, NodePorts, StoreNode};
use crate::signal::ShutdownSignal;
use crate::sync::SyncEngine;

/// One content-store session rooted at `<root>/.local/ipfs`
pub struct IpfsSession {
    config: Config,
    events: EventBus,
    node: Option<Arc<StoreNode>>,
    gateway: ServiceEndpoint,
    api: ServiceEndpoint,
    engine: Option<SyncEngine>,
    started: bool,
    shut_down: bool,
}

impl IpfsSession {
    pub fn new(config: Config, events: EventBus) -> Self {
        let local = |port| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let gateway = ServiceEndpoint::new(
            EndpointKind::Gateway,
            local(config.ipfs.gateway_port),
            events.clone(),
        );
        let api = ServiceEndpoint::new(
            EndpointKind::Api,
            local(config.ipfs.api_port),
            events.clone(),
        );

        Self {
            config,
            events,
            node: None,
            gateway,
            api,
            engine: None,
            started: false,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn content_dir(&self) -> PathBuf {
        self.config.content_dir()
    }

    pub fn node(&self) -> Option<&Arc<StoreNode>> {
        self.node.as_ref()
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    pub fn gateway_state(&self) -> EndpointState {
        self.gateway.state()
    }

    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway.local_addr()
    }

    pub fn api_state(&self) -> EndpointState {
        self.api.state()
    }

    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.local_addr()
    }

    fn ports(&self) -> NodePorts {
        NodePorts {
            swarm: self.config.ipfs.swarm_port,
            api: self.config.ipfs.api_port,
            gateway: self.config.ipfs.gateway_port,
        }
    }

    /// Start every component in order. Nothing is torn down on failure;
    /// call [`shutdown`](Self::shutdown) to release what did start.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::Config(
                "a session can only be started once".to_string(),
            ));
        }
        self.started = true;

        let content_dir = self.config.content_dir();
        let repo_dir = self.config.repo_dir();
        tokio::fs::create_dir_all(&content_dir)
            .await
            .map_err(|e| SessionError::WatchInit {
                path: content_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::create_dir_all(&repo_dir).await.map_err(|e| {
            SessionError::StoreInit(format!("cannot create {}: {}", repo_dir.display(), e))
        })?;

        let node = StoreNode::start(&repo_dir, self.ports(), self.events.clone()).await?;
        self.node = Some(Arc::clone(&node));

        let gateway = Http(Arc::new(GatewayHandler::new(Arc::clone(&node))));
        self.gateway.start(Arc::new(gateway)).await?;

        let api = Http(Arc::new(ApiHandler::new(Arc::clone(&node))));
        self.api.start(Arc::new(api)).await?;

        let store: Arc<dyn ContentStore> = node;
        let engine = SyncEngine::start(
            &content_dir,
            store,
            self.events.clone(),
            &self.config.sync,
        )
        .await?;
        self.engine = Some(engine);

        self.events.emit(Event::SessionStarted);
        Ok(())
    }

    /// Stop the sync engine, the store, the API and the gateway, in that
    /// order. Every step runs even if an earlier one failed. Safe to call
    /// more than once.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let mut failures = Vec::new();

        let engine_stopped = match self.engine.as_mut() {
            Some(engine) => engine.stop().await,
            None => Ok(()),
        };
        if let Err(e) = engine_stopped {
            self.step_failed("sync", e, &mut failures);
        }
        if let Some(node) = &self.node {
            if let Err(e) = node.stop().await {
                self.step_failed("store", e, &mut failures);
            }
        }
        if let Err(e) = self.api.stop().await {
            self.step_failed("api", e, &mut failures);
        }
        if let Err(e) = self.gateway.stop().await {
            self.step_failed("gateway", e, &mut failures);
        }

        self.events.emit(Event::SessionStopped);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Shutdown(failures))
        }
    }

    fn step_failed(&self, step: &str, error: SessionError, failures: &mut Vec<String>) {
        self.events.emit(Event::ShutdownStepFailed {
            step: step.to_string(),
            error: error.to_string(),
        });
        failures.push(format!("{}: {}", step, error));
    }

    /// Start, wait for `signal` (or for the watch root to disappear), then
    /// shut down.
    pub async fn run(&mut self, signal: &dyn ShutdownSignal) -> Result<(), SessionError> {
        if let Err(e) = self.start().await {
            if let Err(shutdown_err) = self.shutdown().await {
                warn!(error = %shutdown_err, "Cleanup after failed start was incomplete");
            }
            return Err(e);
        }

        let settle_delay = self.config.ipfs.settle_delay();
        let wait_for_signal = async {
            tokio::time::sleep(settle_delay).await;
            info!(
                content = %self.config.content_dir().display(),
                gateway = ?self.gateway.local_addr(),
                api = ?self.api.local_addr(),
                swarm = ?self.node.as_ref().map(|n| n.swarm_addr()),
                "IPFS session ready"
            );
            signal.await_shutdown_signal().await;
        };

        let outcome = match &self.engine {
            Some(engine) => tokio::select! {
                _ = wait_for_signal => Ok(()),
                _ = engine.failure() => {
                    Err(SessionError::WatchLost(engine.root().display().to_string()))
                }
            },
            None => {
                wait_for_signal.await;
                Ok(())
            }
        };

        let shutdown = self.shutdown().await;
        outcome?;
        shutdown
    }
}
