//! Shutdown coordination for the daemon.
//!
//! Waits for ctrl+c or for the node to stop on its own (remote shutdown),
//! then stops the node and any auxiliary tasks and waits for them to drain.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::node::GossipNode;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShutdownManager {
    node: Arc<GossipNode>,
    /// Cancelled for auxiliary tasks once shutdown begins
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new(node: Arc<GossipNode>) -> Self {
        Self {
            node,
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
            timeout: SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Block until ctrl+c or until the node stops itself, then shut down.
    pub async fn wait_for_shutdown(self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("🛑 Shutdown signal received"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            },
            _ = self.node.stopped() => {
                tracing::warn!("🛑 Node stopped on its own, shutting down");
            }
        }
        self.shutdown().await;
    }

    /// Stop everything and wait up to the timeout for it to finish.
    /// Returns false when the timeout hit first.
    pub async fn shutdown(mut self) -> bool {
        self.cancel_token.cancel();
        self.node.stop();

        let node = self.node.clone();
        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let drain = async move {
            for handle in handles {
                let _ = handle.await;
            }
            node.join().await;
        };

        match tokio::time::timeout(self.timeout, drain).await {
            Ok(()) => {
                tracing::info!("✓ All tasks shut down gracefully");
                true
            }
            Err(_) => {
                tracing::warn!("⏱️  Shutdown timeout: some peers did not drain");
                false
            }
        }
    }
}
