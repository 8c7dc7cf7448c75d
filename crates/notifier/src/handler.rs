use thiserror::Error;
use tokio_util::task::TaskTracker;

use herald_common::config::PushConfig;
use herald_common::types::Receipt;

/// Errors surfaced to producers and to the host at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("push handler is not initialized")]
    NotReady,

    #[error("push queue is full, receipt dropped")]
    QueueFull,

    #[error("push handler is stopped")]
    Stopped,

    #[error("push configuration error: {0}")]
    Config(String),
}

/// Lifecycle of a push handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Uninitialized,
    Running,
    Stopped,
}

/// A push backend the host hands receipts to.
///
/// `push` never blocks: a handler that cannot take a receipt right away
/// returns an error and the receipt is dropped.
pub trait PushHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Configure and start the handler. A disabled configuration is not an
    /// error; the handler just stays uninitialized.
    fn init(&mut self, config: &PushConfig) -> Result<(), PushError>;

    fn state(&self) -> HandlerState;

    fn is_ready(&self) -> bool {
        self.state() == HandlerState::Running
    }

    /// Enqueue a receipt, best effort.
    fn push(&self, receipt: Receipt) -> Result<(), PushError>;

    /// Stop taking receipts. Work already started is not cancelled.
    fn stop(&self);

    /// Tracker of in-flight work, for handlers that spawn tasks.
    fn tracker(&self) -> Option<TaskTracker> {
        None
    }
}
