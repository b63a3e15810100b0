//! Shutdown triggers
//!
//! A session runs until its [`ShutdownSignal`] resolves. The CLI waits for a
//! keypress on stdin or Ctrl+C; tests trigger a [`ManualShutdown`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Resolves once the operator wants the session to end
#[async_trait]
pub trait ShutdownSignal: Send + Sync {
    async fn await_shutdown_signal(&self);
}

/// Enter on stdin, or Ctrl+C
#[derive(Debug, Default, Clone, Copy)]
pub struct KeypressShutdown;

#[async_trait]
impl ShutdownSignal for KeypressShutdown {
    async fn await_shutdown_signal(&self) {
        info!("Press Enter or Ctrl+C to stop.");

        let keypress = async {
            let mut line = String::new();
            let mut stdin = BufReader::new(tokio::io::stdin());
            match stdin.read_line(&mut line).await {
                Ok(0) => {
                    // Detached stdin; only Ctrl+C can stop us now
                    std::future::pending::<()>().await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Cannot read stdin, waiting for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = keypress => info!("Key pressed, shutting down..."),
            _ = CtrlCShutdown.await_shutdown_signal() => {}
        }
    }
}

/// Ctrl+C only
#[derive(Debug, Default, Clone, Copy)]
pub struct CtrlCShutdown;

#[async_trait]
impl ShutdownSignal for CtrlCShutdown {
    async fn await_shutdown_signal(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down..."),
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Programmatic trigger; a trigger before anyone waits is not lost
#[derive(Debug, Default, Clone)]
pub struct ManualShutdown {
    notify: Arc<Notify>,
}

impl ManualShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl ShutdownSignal for ManualShutdown {
    async fn await_shutdown_signal(&self) {
        self.notify.notified().await;
    }
}
