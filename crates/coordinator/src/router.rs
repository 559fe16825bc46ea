//! Result routing
//!
//! Drains the worker's result channel and hands every result to the outbox of
//! the connection it is addressed to. Results for connections that are no
//! longer registered are dropped; nothing is requeued or retried.

use crate::registry::ConnectionRegistry;
use quill_common::METRICS;
use quill_proto::GenerationResponse;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Routes worker results to connections
pub struct ResultRouter {
    registry: ConnectionRegistry,
    results: UnboundedReceiver<GenerationResponse>,
}

impl ResultRouter {
    pub fn new(registry: ConnectionRegistry, results: UnboundedReceiver<GenerationResponse>) -> Self {
        Self { registry, results }
    }

    /// Run the router as a background task.
    ///
    /// The task ends once the result channel closes, i.e. when the worker is gone.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        while let Some(result) = self.results.recv().await {
            self.route(result);
        }
        info!("Result channel closed, router stopping");
    }

    /// Deliver one result; returns whether it reached a connection
    pub fn route(&self, result: GenerationResponse) -> bool {
        let GenerationResponse {
            connection_id,
            payload,
        } = result;

        if self.registry.deliver(&connection_id, payload) {
            METRICS.coordinator.results_delivered.inc();
            debug!("Result routed to {}", connection_id);
            true
        } else {
            METRICS.coordinator.results_dropped.inc();
            debug!("Dropping result for disconnected {}", connection_id);
            false
        }
    }
}
