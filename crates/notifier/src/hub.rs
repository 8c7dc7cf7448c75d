//! Push hub: fans each receipt out to every ready handler.
//!
//! Handlers are chosen from configuration when the hub is built; there is no
//! runtime registration.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::PushConfig;
use herald_common::types::Receipt;
use herald_engine::registry::DeviceRegistry;

use crate::gateway_handler::{GatewayHandler, wait_for};
use crate::handler::{PushError, PushHandler};
use crate::log_handler::LogHandler;

/// Set of push handlers owned by the host.
pub struct PushHub {
    handlers: Vec<Box<dyn PushHandler>>,
}

impl PushHub {
    /// An empty hub; every push is a no-op.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Build and start the handlers named in `config`.
    ///
    /// Disabled handlers are left out. A handler that fails to initialize
    /// fails the whole build.
    pub fn from_config(
        config: &PushConfig,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Result<Self, PushError> {
        let candidates: Vec<Box<dyn PushHandler>> = vec![
            Box::new(GatewayHandler::new(registry)),
            Box::new(LogHandler::new()),
        ];

        let mut hub = Self::new();
        for mut handler in candidates {
            handler.init(config)?;
            if handler.is_ready() {
                tracing::info!(handler = handler.name(), "Push handler ready");
                hub = hub.with_handler(handler);
            }
        }

        if hub.handlers.is_empty() {
            tracing::info!("No push handlers enabled");
        }
        Ok(hub)
    }

    /// Add an already initialized handler.
    pub fn with_handler(mut self, handler: Box<dyn PushHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.handlers.iter().any(|h| h.is_ready())
    }

    /// Names of the handlers that are currently ready.
    pub fn ready_handlers(&self) -> Vec<&'static str> {
        self.handlers
            .iter()
            .filter(|h| h.is_ready())
            .map(|h| h.name())
            .collect()
    }

    /// Offer `receipt` to every ready handler. Returns how many accepted it.
    pub fn push(&self, receipt: &Receipt) -> usize {
        let mut accepted = 0;
        for handler in self.handlers.iter().filter(|h| h.is_ready()) {
            match handler.push(receipt.clone()) {
                Ok(()) => accepted += 1,
                Err(e) => {
                    tracing::warn!(
                        handler = handler.name(),
                        topic = %receipt.payload.topic,
                        error = %e,
                        "Push dropped"
                    );
                }
            }
        }
        accepted
    }

    pub fn stop(&self) {
        for handler in &self.handlers {
            handler.stop();
        }
    }

    /// Wait up to `timeout` for in-flight work of all handlers.
    ///
    /// Only a stopped handler can finish draining; call [`PushHub::stop`]
    /// first. Draining while handlers still run returns `false` after
    /// `timeout` and does not stop them.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut drained = true;
        for tracker in self.handlers.iter().filter_map(|h| h.tracker()) {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            drained &= wait_for(&tracker, left).await;
        }
        drained
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}
