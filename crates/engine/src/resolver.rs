//! Device resolver: decides which devices still need an out-of-band push.
//!
//! For an incoming receipt:
//! 1. Collect every recipient and load their devices in one registry lookup
//! 2. Drop every device of users that already got the message live
//! 3. Drop devices that were notified through an open session
//! 4. Build the outbound batch for what remains

use herald_common::error::AppError;
use herald_common::types::{OutboundMessage, Receipt, RecipientMeta, UserId};

use crate::registry::{DeviceRegistry, DevicesByUser};

/// Resolves receipts into gateway batches.
pub struct DeviceResolver;

impl DeviceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a receipt into an outbound batch and its number of targets.
    ///
    /// A receipt without recipients is valid and yields zero targets without
    /// touching the registry. Registry failures are returned as-is.
    pub async fn resolve(
        &self,
        receipt: &Receipt,
        registry: &dyn DeviceRegistry,
    ) -> Result<(OutboundMessage, usize), AppError> {
        if receipt.to.is_empty() {
            return Ok((OutboundMessage::new(receipt.payload.clone()), 0));
        }

        let mut users: Vec<UserId> = receipt.to.keys().cloned().collect();
        users.sort();

        let (devices, count) = registry.get_all(&users).await?;
        if count == 0 {
            tracing::debug!(users = users.len(), "No registered devices for recipients");
            return Ok((OutboundMessage::new(receipt.payload.clone()), 0));
        }

        let message = Self::build_batch(receipt, &devices);
        let targets = message.len();

        tracing::debug!(
            users = users.len(),
            devices = count,
            targets,
            topic = %receipt.payload.topic,
            "Resolved push targets"
        );

        Ok((message, targets))
    }

    /// Build the outbound batch from a registry snapshot.
    ///
    /// Users with `delivered > 0` are skipped entirely: they already saw the
    /// message in a live session, so none of their devices is notified.
    pub fn build_batch(receipt: &Receipt, devices: &DevicesByUser) -> OutboundMessage {
        let mut message = OutboundMessage::new(receipt.payload.clone());

        for (user, list) in devices {
            // Registry may return users that are not recipients.
            let Some(info) = receipt.to.get(user) else {
                continue;
            };

            if info.delivered > 0 {
                continue;
            }

            for device in list {
                if device.device_id.is_empty() || info.devices.contains(&device.device_id) {
                    continue;
                }
                message.add_target(
                    user.clone(),
                    device.device_id.clone(),
                    RecipientMeta {
                        delivered: info.delivered,
                        unread: info.unread,
                    },
                );
            }
        }

        message
    }
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use herald_common::types::{DeliveryInfo, DeviceDef, DeviceId, Payload, PushWhat};

    use crate::registry::InMemoryDeviceRegistry;

    /// Registry wrapper counting lookups.
    struct CountingRegistry {
        inner: InMemoryDeviceRegistry,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl DeviceRegistry for CountingRegistry {
        async fn get_all(&self, users: &[UserId]) -> Result<(DevicesByUser, usize), AppError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.get_all(users).await
        }

        async fn delete(&self, user: &UserId, device: &DeviceId) -> Result<(), AppError> {
            self.inner.delete(user, device).await
        }

        async fn upsert(&self, user: &UserId, device: DeviceDef) -> Result<(), AppError> {
            self.inner.upsert(user, device).await
        }
    }

    struct FailingRegistry;

    #[async_trait]
    impl DeviceRegistry for FailingRegistry {
        async fn get_all(&self, _users: &[UserId]) -> Result<(DevicesByUser, usize), AppError> {
            Err(AppError::Registry("store offline".to_string()))
        }

        async fn delete(&self, _user: &UserId, _device: &DeviceId) -> Result<(), AppError> {
            Err(AppError::Registry("store offline".to_string()))
        }

        async fn upsert(&self, _user: &UserId, _device: DeviceDef) -> Result<(), AppError> {
            Err(AppError::Registry("store offline".to_string()))
        }
    }

    fn device(id: &str) -> DeviceDef {
        DeviceDef {
            device_id: DeviceId::from(id),
            platform: "ios".to_string(),
            last_seen: Utc::now(),
            lang: "en".to_string(),
        }
    }

    fn receipt(to: Vec<(&str, DeliveryInfo)>) -> Receipt {
        Receipt {
            payload: Payload {
                what: PushWhat::Msg,
                silent: false,
                topic: "grpChat".to_string(),
                from: "usrSender".to_string(),
                ts: Utc::now(),
                seq: 100,
                mime: String::new(),
                content: serde_json::json!("hi"),
            },
            to: to
                .into_iter()
                .map(|(user, info)| (UserId::from(user), info))
                .collect(),
        }
    }

    fn info(delivered: u32, unread: u32, notified: &[&str]) -> DeliveryInfo {
        DeliveryInfo {
            delivered,
            unread,
            devices: notified.iter().map(|d| DeviceId::from(*d)).collect(),
        }
    }

    fn counting() -> CountingRegistry {
        CountingRegistry {
            inner: InMemoryDeviceRegistry::new(),
            lookups: AtomicUsize::new(0),
        }
    }

    fn keys(message: &OutboundMessage) -> HashSet<String> {
        message.to.keys().map(|d| d.0.clone()).collect()
    }

    #[tokio::test]
    async fn test_empty_receipt_skips_registry() {
        let registry = counting();
        let (message, count) = DeviceResolver::new()
            .resolve(&receipt(vec![]), &registry)
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(message.is_empty());
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_batched_lookup() {
        let registry = counting();
        for user in ["u1", "u2", "u3"] {
            registry
                .upsert(&UserId::from(user), device(&format!("{}-phone", user)))
                .await
                .unwrap();
        }

        let rcpt = receipt(vec![
            ("u1", info(0, 1, &[])),
            ("u2", info(0, 2, &[])),
            ("u3", info(0, 3, &[])),
        ]);
        let (_, count) = DeviceResolver::new().resolve(&rcpt, &registry).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_notified_device_excluded() {
        let registry = InMemoryDeviceRegistry::new();
        let u = UserId::from("usrU");
        registry.upsert(&u, device("A")).await.unwrap();
        registry.upsert(&u, device("B")).await.unwrap();

        let rcpt = receipt(vec![("usrU", info(0, 4, &["A"]))]);
        let (message, count) = DeviceResolver::new().resolve(&rcpt, &registry).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(keys(&message), HashSet::from(["B".to_string()]));
        assert_eq!(
            message.to[&DeviceId::from("B")],
            RecipientMeta {
                delivered: 0,
                unread: 4
            }
        );
    }

    #[tokio::test]
    async fn test_user_delivered_live_is_skipped() {
        let registry = InMemoryDeviceRegistry::new();
        registry
            .upsert(&UserId::from("live"), device("L1"))
            .await
            .unwrap();
        registry
            .upsert(&UserId::from("live"), device("L2"))
            .await
            .unwrap();
        registry
            .upsert(&UserId::from("away"), device("W1"))
            .await
            .unwrap();

        // "live" lists no notified devices, yet none of its devices is targeted.
        let rcpt = receipt(vec![("live", info(2, 0, &[])), ("away", info(0, 5, &[]))]);
        let (message, count) = DeviceResolver::new().resolve(&rcpt, &registry).await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(keys(&message), HashSet::from(["W1".to_string()]));
    }

    #[tokio::test]
    async fn test_empty_device_id_excluded() {
        let registry = InMemoryDeviceRegistry::new();
        registry
            .upsert(&UserId::from("u1"), device(""))
            .await
            .unwrap();

        let rcpt = receipt(vec![("u1", info(0, 1, &[]))]);
        let (message, count) = DeviceResolver::new().resolve(&rcpt, &registry).await.unwrap();

        assert_eq!(count, 0);
        assert!(message.is_empty());
    }

    #[tokio::test]
    async fn test_recipients_without_devices() {
        let registry = InMemoryDeviceRegistry::new();
        let rcpt = receipt(vec![("u1", info(0, 1, &[]))]);
        let (_, count) = DeviceResolver::new().resolve(&rcpt, &registry).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_registry_error_propagates() {
        let rcpt = receipt(vec![("u1", info(0, 1, &[]))]);
        let err = DeviceResolver::new()
            .resolve(&rcpt, &FailingRegistry)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Registry(msg) if msg == "store offline"));
    }

    #[test]
    fn test_build_batch_ignores_non_recipients() {
        let rcpt = receipt(vec![("u1", info(0, 1, &[]))]);
        let mut devices = HashMap::new();
        devices.insert(UserId::from("u1"), vec![device("d1")]);
        devices.insert(UserId::from("stranger"), vec![device("d2")]);

        let message = DeviceResolver::build_batch(&rcpt, &devices);
        assert_eq!(keys(&message), HashSet::from(["d1".to_string()]));
        assert_eq!(message.ordered_targets()[0].user, UserId::from("u1"));
    }

    #[test]
    fn test_build_batch_is_deterministic() {
        let rcpt = receipt(vec![("u1", info(0, 1, &[])), ("u2", info(0, 2, &[]))]);
        let mut devices = HashMap::new();
        devices.insert(UserId::from("u1"), vec![device("z"), device("m")]);
        devices.insert(UserId::from("u2"), vec![device("a")]);

        let first = DeviceResolver::build_batch(&rcpt, &devices).ordered_targets();
        let second = DeviceResolver::build_batch(&rcpt, &devices).ordered_targets();
        assert_eq!(first, second);
        let order: Vec<&str> = first.iter().map(|t| t.device.as_str()).collect();
        assert_eq!(order, vec!["a", "m", "z"]);
    }
}
