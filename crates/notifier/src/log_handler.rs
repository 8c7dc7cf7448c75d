//! Push handler that only logs receipts. Useful for debugging a deployment
//! without a gateway.

use std::sync::atomic::{AtomicU8, Ordering};

use herald_common::config::PushConfig;
use herald_common::types::Receipt;

use crate::handler::{HandlerState, PushError, PushHandler};

const UNINITIALIZED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

pub struct LogHandler {
    state: AtomicU8,
}

impl LogHandler {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHandler for LogHandler {
    fn name(&self) -> &'static str {
        "log"
    }

    fn init(&mut self, config: &PushConfig) -> Result<(), PushError> {
        if config.log.enabled {
            self.state.store(RUNNING, Ordering::SeqCst);
        }
        Ok(())
    }

    fn state(&self) -> HandlerState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => HandlerState::Running,
            STOPPED => HandlerState::Stopped,
            _ => HandlerState::Uninitialized,
        }
    }

    fn push(&self, receipt: Receipt) -> Result<(), PushError> {
        match self.state() {
            HandlerState::Uninitialized => return Err(PushError::NotReady),
            HandlerState::Stopped => return Err(PushError::Stopped),
            HandlerState::Running => {}
        }

        let recipients: Vec<&str> = receipt.to.keys().map(|u| u.as_str()).collect();
        tracing::info!(
            what = %receipt.payload.what,
            topic = %receipt.payload.topic,
            from = %receipt.payload.from,
            seq = receipt.payload.seq,
            silent = receipt.payload.silent,
            recipients = ?recipients,
            "Push"
        );
        Ok(())
    }

    fn stop(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst);
    }
}
