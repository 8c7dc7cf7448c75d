//! Response classifier: acts on per-target gateway results.
//!
//! Results are walked in lockstep with the targets of the batch. A transient
//! or configuration error on any entry is taken as representative of the whole
//! batch: it is logged and the remaining entries are not examined. A
//! not-registered token removes that device from the registry.

use herald_common::types::{BatchResponse, Target};

use crate::registry::DeviceRegistry;

// Error codes reported by the push gateway.
pub const INTERNAL_ERROR: &str = "internal-error";
pub const INVALID_APNS_CREDENTIALS: &str = "invalid-apns-credentials";
pub const INVALID_ARGUMENT: &str = "invalid-argument";
pub const MESSAGE_RATE_EXCEEDED: &str = "message-rate-exceeded";
pub const MISMATCHED_CREDENTIAL: &str = "mismatched-credential";
pub const REGISTRATION_TOKEN_NOT_REGISTERED: &str = "registration-token-not-registered";
pub const SERVER_UNAVAILABLE: &str = "server-unavailable";
pub const TOO_MANY_TOPICS: &str = "too-many-topics";
pub const UNKNOWN_ERROR: &str = "unknown-error";

/// What a per-target error code means for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Delivered.
    Success,
    /// Expected to clear up without intervention.
    Transient,
    /// Credentials or request are wrong.
    Config,
    /// The device token is no longer valid.
    Unregistered,
    /// Anything else.
    Unclassified,
}

impl ErrorClass {
    pub fn from_code(code: &str) -> Self {
        match code {
            "" => ErrorClass::Success,
            MESSAGE_RATE_EXCEEDED | SERVER_UNAVAILABLE | INTERNAL_ERROR | UNKNOWN_ERROR => {
                ErrorClass::Transient
            }
            MISMATCHED_CREDENTIAL | INVALID_ARGUMENT => ErrorClass::Config,
            REGISTRATION_TOKEN_NOT_REGISTERED => ErrorClass::Unregistered,
            _ => ErrorClass::Unclassified,
        }
    }
}

/// Why classification ended before the last entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Transient,
    Config,
}

/// Summary of one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOutcome {
    /// Number of per-target results looked at.
    pub examined: usize,
    /// Devices removed from the registry.
    pub deleted: usize,
    /// Devices whose removal failed.
    pub delete_failures: usize,
    pub stopped: Option<StopReason>,
}

/// Classifies gateway results and corrects the registry.
pub struct ResponseClassifier;

impl ResponseClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Walk the per-target results of `batch`.
    ///
    /// `targets` must be in the order the batch was serialized in. Does
    /// nothing when the gateway reported no failures.
    pub async fn classify(
        &self,
        batch: &BatchResponse,
        targets: &[Target],
        registry: &dyn DeviceRegistry,
    ) -> ClassifyOutcome {
        let mut outcome = ClassifyOutcome::default();

        if batch.fail_count <= 0 {
            return outcome;
        }

        if batch.resp.len() > targets.len() {
            tracing::warn!(
                responses = batch.resp.len(),
                targets = targets.len(),
                "Gateway returned more results than targets, extra results ignored"
            );
        }

        for (resp, target) in batch.resp.iter().zip(targets) {
            outcome.examined += 1;

            match ErrorClass::from_code(resp.code()) {
                ErrorClass::Success => {}
                ErrorClass::Transient => {
                    tracing::warn!(
                        code = resp.code(),
                        message = resp.message(),
                        device_id = %target.device,
                        "Push transient failure, skipping rest of batch"
                    );
                    outcome.stopped = Some(StopReason::Transient);
                    return outcome;
                }
                ErrorClass::Config => {
                    tracing::error!(
                        code = resp.code(),
                        message = resp.message(),
                        "Push gateway reports invalid configuration, skipping rest of batch"
                    );
                    outcome.stopped = Some(StopReason::Config);
                    return outcome;
                }
                ErrorClass::Unregistered => {
                    tracing::info!(
                        user = %target.user,
                        device_id = %target.device,
                        message = resp.message(),
                        "Push token no longer registered, removing device"
                    );
                    match registry.delete(&target.user, &target.device).await {
                        Ok(()) => outcome.deleted += 1,
                        Err(e) => {
                            outcome.delete_failures += 1;
                            tracing::error!(
                                user = %target.user,
                                device_id = %target.device,
                                error = %e,
                                "Failed to delete invalid push token"
                            );
                        }
                    }
                }
                ErrorClass::Unclassified => {
                    tracing::warn!(
                        code = resp.code(),
                        message = resp.message(),
                        device_id = %target.device,
                        "Push gateway returned error"
                    );
                }
            }
        }

        outcome
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new()
    }
}
