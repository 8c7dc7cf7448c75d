//! One dispatch cycle: resolve → send → classify.
//!
//! Each cycle is independent and best effort. Every failure is logged here and
//! ends the cycle; nothing is retried or re-enqueued.

use std::sync::Arc;

use uuid::Uuid;

use herald_common::types::Receipt;
use herald_engine::classifier::{ClassifyOutcome, ResponseClassifier};
use herald_engine::registry::DeviceRegistry;
use herald_engine::resolver::DeviceResolver;

use crate::gateway::GatewayClient;

/// How a dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No device needed a push; the gateway was not called.
    NothingToSend,
    /// Device lookup failed.
    RegistryFailed,
    /// The request did not complete or the reply was unreadable.
    TransportFailed,
    /// HTTP status >= 300.
    Rejected { status: u16 },
    /// The gateway rejected the whole batch with an error code.
    BatchFailed { code: String },
    /// The gateway accepted the batch; per-target results were classified.
    Sent(ClassifyOutcome),
}

/// Runs dispatch cycles against one gateway and one registry.
pub struct PushDispatcher {
    client: GatewayClient,
    registry: Arc<dyn DeviceRegistry>,
    resolver: DeviceResolver,
    classifier: ResponseClassifier,
}

impl PushDispatcher {
    pub fn new(client: GatewayClient, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            client,
            registry,
            resolver: DeviceResolver::new(),
            classifier: ResponseClassifier::new(),
        }
    }

    /// Run one cycle for `receipt`.
    ///
    /// Reply handling is one ordered step: transport error, then HTTP status,
    /// then batch error code, then per-target results.
    pub async fn dispatch(&self, receipt: Receipt) -> DispatchOutcome {
        let dispatch_id = Uuid::new_v4();

        let (message, count) = match self.resolver.resolve(&receipt, self.registry.as_ref()).await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(
                    dispatch_id = %dispatch_id,
                    error = %e,
                    "Push device lookup failed, receipt dropped"
                );
                return DispatchOutcome::RegistryFailed;
            }
        };

        if count == 0 {
            tracing::debug!(
                dispatch_id = %dispatch_id,
                topic = %receipt.payload.topic,
                "Push: nothing to send"
            );
            return DispatchOutcome::NothingToSend;
        }

        let targets = message.ordered_targets();

        let reply = match self.client.send(&message).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    dispatch_id = %dispatch_id,
                    targets = count,
                    error = %e,
                    "Push request failed"
                );
                return DispatchOutcome::TransportFailed;
            }
        };

        if reply.rejected() {
            tracing::error!(
                dispatch_id = %dispatch_id,
                status = %reply.status,
                code = reply.batch.fatal_code().unwrap_or(""),
                message = reply.batch.errmsg.as_deref().unwrap_or(""),
                "Push rejected by gateway"
            );
            return DispatchOutcome::Rejected {
                status: reply.status.as_u16(),
            };
        }

        if let Some(code) = reply.batch.fatal_code() {
            tracing::error!(
                dispatch_id = %dispatch_id,
                code,
                message = reply.batch.errmsg.as_deref().unwrap_or(""),
                "Push batch failed"
            );
            return DispatchOutcome::BatchFailed {
                code: code.to_string(),
            };
        }

        let outcome = self
            .classifier
            .classify(&reply.batch, &targets, self.registry.as_ref())
            .await;

        tracing::info!(
            dispatch_id = %dispatch_id,
            targets = count,
            sent = reply.batch.sent_count,
            failed = reply.batch.fail_count,
            deleted = outcome.deleted,
            "Push batch sent"
        );

        DispatchOutcome::Sent(outcome)
    }
}
