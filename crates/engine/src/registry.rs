//! Device registry: per-user device registrations the dispatcher reads from
//! and corrects on gateway feedback.
//!
//! The dispatcher only needs two operations: one batched lookup of every
//! device owned by a set of users, and point deletion of a stale device.
//! Deletion is idempotent: removing an absent device is not an error.
//!
//! Two implementations are provided:
//! - [`InMemoryDeviceRegistry`] for tests and single-process hosts
//! - [`RedisDeviceRegistry`] storing one hash per user (`devices:{uid}`)

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use herald_common::error::AppError;
use herald_common::types::{DeviceDef, DeviceId, UserId};

/// Devices grouped by owning user.
pub type DevicesByUser = HashMap<UserId, Vec<DeviceDef>>;

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Fetch all devices of the given users in one lookup.
    ///
    /// Returns the devices by user and the total number of devices found.
    /// Users without devices are absent from the map.
    async fn get_all(&self, users: &[UserId]) -> Result<(DevicesByUser, usize), AppError>;

    /// Remove one device registration. Succeeds if the device is already gone.
    async fn delete(&self, user: &UserId, device: &DeviceId) -> Result<(), AppError>;

    /// Register or replace a device for a user.
    async fn upsert(&self, user: &UserId, device: DeviceDef) -> Result<(), AppError>;
}

/// Process-local registry.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<UserId, Vec<DeviceDef>>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get_all(&self, users: &[UserId]) -> Result<(DevicesByUser, usize), AppError> {
        let devices = self.devices.read().await;
        let mut result = DevicesByUser::new();
        let mut count = 0;

        for user in users {
            if let Some(list) = devices.get(user)
                && !list.is_empty()
                && !result.contains_key(user)
            {
                count += list.len();
                result.insert(user.clone(), list.clone());
            }
        }

        Ok((result, count))
    }

    async fn delete(&self, user: &UserId, device: &DeviceId) -> Result<(), AppError> {
        let mut devices = self.devices.write().await;
        if let Some(list) = devices.get_mut(user) {
            list.retain(|d| &d.device_id != device);
            if list.is_empty() {
                devices.remove(user);
            }
        }
        Ok(())
    }

    async fn upsert(&self, user: &UserId, device: DeviceDef) -> Result<(), AppError> {
        let mut devices = self.devices.write().await;
        let list = devices.entry(user.clone()).or_default();
        match list.iter_mut().find(|d| d.device_id == device.device_id) {
            Some(existing) => *existing = device,
            None => list.push(device),
        }
        Ok(())
    }
}

/// Redis-backed registry.
///
/// Layout: `HSET devices:{uid} {device_id} {DeviceDef as JSON}`.
#[derive(Clone)]
pub struct RedisDeviceRegistry {
    redis: ConnectionManager,
}

impl RedisDeviceRegistry {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(user: &UserId) -> String {
        format!("devices:{}", user)
    }
}

#[async_trait]
impl DeviceRegistry for RedisDeviceRegistry {
    async fn get_all(&self, users: &[UserId]) -> Result<(DevicesByUser, usize), AppError> {
        if users.is_empty() {
            return Ok((DevicesByUser::new(), 0));
        }

        // One round trip: HGETALL for every user, pipelined.
        let mut pipe = redis::pipe();
        for user in users {
            pipe.hgetall(Self::key(user));
        }

        let mut conn = self.redis.clone();
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut result = DevicesByUser::new();
        let mut count = 0;

        for (user, hash) in users.iter().zip(hashes) {
            if hash.is_empty() || result.contains_key(user) {
                continue;
            }

            let mut list = Vec::with_capacity(hash.len());
            for (field, raw) in hash {
                match serde_json::from_str::<DeviceDef>(&raw) {
                    Ok(device) => list.push(device),
                    Err(e) => {
                        tracing::warn!(
                            user = %user,
                            device_id = %field,
                            error = %e,
                            "Skipping unreadable device record"
                        );
                    }
                }
            }
            list.sort_by(|a, b| a.device_id.cmp(&b.device_id));

            count += list.len();
            result.insert(user.clone(), list);
        }

        Ok((result, count))
    }

    async fn delete(&self, user: &UserId, device: &DeviceId) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        // HDEL returns 0 for an absent field.
        let removed: i64 = conn.hdel(Self::key(user), device.as_str()).await?;

        tracing::debug!(user = %user, device_id = %device, removed, "Device deleted");
        Ok(())
    }

    async fn upsert(&self, user: &UserId, device: DeviceDef) -> Result<(), AppError> {
        let raw = serde_json::to_string(&device)?;
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(Self::key(user), device.device_id.as_str(), raw)
            .await?;
        Ok(())
    }
}
