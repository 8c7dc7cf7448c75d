//! Gateway push handler: the dispatch worker.
//!
//! Owns a bounded receipt queue and a stop token. A single loop drains the
//! queue and spawns one task per receipt, so a slow gateway call never holds
//! up intake. Stopping ends the loop only; spawned tasks run to completion
//! unless the host waits for them with [`GatewayHandler::drain`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use herald_common::config::PushConfig;
use herald_common::types::Receipt;
use herald_engine::registry::DeviceRegistry;

use crate::dispatcher::PushDispatcher;
use crate::gateway::GatewayClient;
use crate::handler::{HandlerState, PushError, PushHandler};

struct Running {
    input: mpsc::Sender<Receipt>,
    stop: CancellationToken,
    tracker: TaskTracker,
}

/// Push handler delivering through the HTTP push gateway.
pub struct GatewayHandler {
    registry: Arc<dyn DeviceRegistry>,
    running: Option<Running>,
}

impl GatewayHandler {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            registry,
            running: None,
        }
    }

    /// Wait for in-flight dispatches to finish, up to `timeout`.
    ///
    /// Returns `true` once the dispatch loop has exited and nothing is left
    /// running. The loop only exits after [`PushHandler::stop`], so draining a
    /// running handler waits out `timeout`, returns `false` and leaves the
    /// handler untouched.
    pub async fn drain(&self, timeout: Duration) -> bool {
        match &self.running {
            Some(running) => wait_for(&running.tracker, timeout).await,
            None => true,
        }
    }
}

impl PushHandler for GatewayHandler {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn init(&mut self, config: &PushConfig) -> Result<(), PushError> {
        if self.running.is_some() {
            return Err(PushError::Config("gateway handler already initialized".to_string()));
        }

        let config = &config.gateway;
        if !config.enabled {
            tracing::info!("Gateway push disabled");
            return Ok(());
        }

        let Some(address) = config.address() else {
            tracing::warn!("Gateway push enabled but no address configured, staying disabled");
            return Ok(());
        };

        let client = GatewayClient::new(address, config.timeout())
            .map_err(|e| PushError::Config(e.to_string()))?;
        let url = client.url().to_string();
        let dispatcher = Arc::new(PushDispatcher::new(client, self.registry.clone()));

        let (input, rx) = mpsc::channel(config.buffer_size());
        let stop = CancellationToken::new();
        let tracker = TaskTracker::new();

        tokio::spawn(dispatch_loop(rx, stop.clone(), tracker.clone(), dispatcher));

        tracing::info!(
            address = %url,
            buffer_size = config.buffer_size(),
            timeout_ms = config.timeout().as_millis() as u64,
            "Gateway push started"
        );

        self.running = Some(Running {
            input,
            stop,
            tracker,
        });
        Ok(())
    }

    fn state(&self) -> HandlerState {
        match &self.running {
            None => HandlerState::Uninitialized,
            Some(running) if running.stop.is_cancelled() => HandlerState::Stopped,
            Some(_) => HandlerState::Running,
        }
    }

    fn push(&self, receipt: Receipt) -> Result<(), PushError> {
        let running = self.running.as_ref().ok_or(PushError::NotReady)?;
        if running.stop.is_cancelled() {
            return Err(PushError::Stopped);
        }

        running.input.try_send(receipt).map_err(|e| match e {
            TrySendError::Full(_) => PushError::QueueFull,
            TrySendError::Closed(_) => PushError::Stopped,
        })
    }

    fn stop(&self) {
        if let Some(running) = &self.running {
            running.stop.cancel();
        }
    }

    fn tracker(&self) -> Option<TaskTracker> {
        self.running.as_ref().map(|r| r.tracker.clone())
    }
}

async fn dispatch_loop(
    mut input: mpsc::Receiver<Receipt>,
    stop: CancellationToken,
    tracker: TaskTracker,
    dispatcher: Arc<PushDispatcher>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = input.recv() => match received {
                Some(receipt) => {
                    let dispatcher = dispatcher.clone();
                    tracker.spawn(async move {
                        dispatcher.dispatch(receipt).await;
                    });
                }
                None => break,
            },
        }
    }

    tracker.close();
    tracing::info!(in_flight = tracker.len(), "Gateway push dispatch loop stopped");
}

/// The dispatch loop closes the tracker on exit, so this resolves only after
/// a stop.
pub(crate) async fn wait_for(tracker: &TaskTracker, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, tracker.wait()).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use herald_common::config::GatewayConfig;
    use herald_common::types::{Payload, PushWhat};
    use herald_engine::registry::InMemoryDeviceRegistry;
    use std::collections::HashMap;

    fn handler() -> GatewayHandler {
        GatewayHandler::new(Arc::new(InMemoryDeviceRegistry::new()))
    }

    fn config(enabled: bool, address: Option<&str>, buffer_size: Option<usize>) -> PushConfig {
        PushConfig {
            gateway: GatewayConfig {
                enabled,
                address: address.map(str::to_string),
                buffer_size,
                timeout_ms: Some(500),
            },
            ..Default::default()
        }
    }

    fn receipt() -> Receipt {
        Receipt {
            payload: Payload {
                what: PushWhat::Msg,
                silent: false,
                topic: "grpT".to_string(),
                from: "usrA".to_string(),
                ts: Utc::now(),
                seq: 1,
                mime: String::new(),
                content: serde_json::json!("x"),
            },
            to: HashMap::new(),
        }
    }

    #[test]
    fn test_uninitialized_rejects_push() {
        let h = handler();
        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert!(!h.is_ready());
        assert_eq!(h.push(receipt()), Err(PushError::NotReady));
        h.stop();
        assert_eq!(h.state(), HandlerState::Uninitialized);
    }

    #[tokio::test]
    async fn test_disabled_config_stays_uninitialized() {
        let mut h = handler();
        h.init(&config(false, Some("http://127.0.0.1:1/push"), None))
            .unwrap();
        assert_eq!(h.state(), HandlerState::Uninitialized);
        assert!(h.tracker().is_none());
    }

    #[tokio::test]
    async fn test_missing_address_stays_uninitialized() {
        let mut h = handler();
        h.init(&config(true, None, None)).unwrap();
        assert!(!h.is_ready());
    }

    #[tokio::test]
    async fn test_malformed_address_is_config_error() {
        let mut h = handler();
        let err = h.init(&config(true, Some("::not-a-url"), None)).unwrap_err();
        assert!(matches!(err, PushError::Config(_)));
        assert!(!h.is_ready());
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let mut h = handler();
        let cfg = config(true, Some("http://127.0.0.1:1/push"), None);
        h.init(&cfg).unwrap();
        assert!(matches!(h.init(&cfg), Err(PushError::Config(_))));
        h.stop();
    }

    #[tokio::test]
    async fn test_running_then_stopped() {
        let mut h = handler();
        h.init(&config(true, Some("http://127.0.0.1:1/push"), None))
            .unwrap();
        assert_eq!(h.state(), HandlerState::Running);
        // No recipients: the dispatch is a no-op and never hits the network.
        assert_eq!(h.push(receipt()), Ok(()));

        h.stop();
        assert_eq!(h.state(), HandlerState::Stopped);
        assert_eq!(h.push(receipt()), Err(PushError::Stopped));
        assert!(h.drain(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_drain_while_running_leaves_handler_running() {
        let mut h = handler();
        h.init(&config(true, Some("http://127.0.0.1:1/push"), None))
            .unwrap();

        assert!(!h.drain(Duration::from_millis(50)).await);
        assert_eq!(h.state(), HandlerState::Running);
        assert!(!h.tracker().unwrap().is_closed());
        assert_eq!(h.push(receipt()), Ok(()));

        h.stop();
        assert!(h.drain(Duration::from_secs(2)).await);
        assert!(h.tracker().unwrap().is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_receipt() {
        let mut h = handler();
        h.init(&config(true, Some("http://127.0.0.1:1/push"), Some(2)))
            .unwrap();

        // The loop cannot run until this task yields, so the queue fills up.
        assert_eq!(h.push(receipt()), Ok(()));
        assert_eq!(h.push(receipt()), Ok(()));
        assert_eq!(h.push(receipt()), Err(PushError::QueueFull));

        h.stop();
    }
}
