//! Shared application state for the Axum intake server.

use std::sync::Arc;

use herald_engine::registry::DeviceRegistry;
use herald_notifier::PushHub;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<PushHub>,
    pub registry: Arc<dyn DeviceRegistry>,
}

impl AppState {
    pub fn new(hub: Arc<PushHub>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { hub, registry }
    }
}
