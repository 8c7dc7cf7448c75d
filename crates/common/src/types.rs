use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a user in the host messaging system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a registered device. For the push gateway this is also the
/// device's push token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kind of event a push describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushWhat {
    /// A new message was posted.
    #[default]
    Msg,
    /// The user was subscribed to a new topic.
    Sub,
    /// Messages were marked as read.
    Read,
}

impl std::fmt::Display for PushWhat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushWhat::Msg => write!(f, "msg"),
            PushWhat::Sub => write!(f, "sub"),
            PushWhat::Read => write!(f, "read"),
        }
    }
}

/// Message data carried by every push. Built once by the host and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub what: PushWhat,
    /// Deliver data but suppress the visible notification.
    #[serde(default)]
    pub silent: bool,
    pub topic: String,
    pub from: String,
    pub ts: DateTime<Utc>,
    /// Per-topic sequence number of the message.
    pub seq: i64,
    #[serde(default)]
    pub mime: String,
    /// Opaque message body.
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Per-user delivery state at the moment the receipt was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    /// Number of live sessions the message was delivered to.
    #[serde(default)]
    pub delivered: u32,
    /// Badge count.
    #[serde(default)]
    pub unread: u32,
    /// Devices that already received the message through an open session.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub devices: HashSet<DeviceId>,
}

/// A message-delivery event handed to the push subsystem.
///
/// Every key of `to` is a recipient of the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub payload: Payload,
    #[serde(default)]
    pub to: HashMap<UserId, DeliveryInfo>,
}

/// A device registration as stored in the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDef {
    pub device_id: DeviceId,
    #[serde(default)]
    pub platform: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub lang: String,
}

/// Delivery metadata attached to each target device of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientMeta {
    pub delivered: u32,
    pub unread: u32,
}

/// One device a batch is addressed to, together with its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user: UserId,
    pub device: DeviceId,
}

/// A batch addressed to the push gateway.
///
/// `to` is kept sorted by device id. The gateway answers positionally, so the
/// serialized key order of `to` is the order responses come back in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub payload: Payload,
    pub to: BTreeMap<DeviceId, RecipientMeta>,
    #[serde(skip)]
    owners: BTreeMap<DeviceId, UserId>,
}

impl OutboundMessage {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            to: BTreeMap::new(),
            owners: BTreeMap::new(),
        }
    }

    /// Add a target device. A device listed twice keeps its last owner.
    pub fn add_target(&mut self, user: UserId, device: DeviceId, meta: RecipientMeta) {
        self.owners.insert(device.clone(), user);
        self.to.insert(device, meta);
    }

    pub fn len(&self) -> usize {
        self.to.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
    }

    /// Targets in the same order as they are serialized on the wire.
    pub fn ordered_targets(&self) -> Vec<Target> {
        self.to
            .keys()
            .filter_map(|device| {
                self.owners.get(device).map(|user| Target {
                    user: user.clone(),
                    device: device.clone(),
                })
            })
            .collect()
    }
}

/// Gateway result for a single target of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
}

impl TargetResponse {
    /// Error code, with an empty string meaning success.
    pub fn code(&self) -> &str {
        self.errcode.as_deref().unwrap_or("")
    }

    pub fn message(&self) -> &str {
        self.errmsg.as_deref().unwrap_or("")
    }
}

/// Decoded gateway reply to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub sent_count: i64,
    #[serde(default)]
    pub fail_count: i64,
    /// Set when the whole batch was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
    /// Per-target results, in the order targets were serialized. Absent when
    /// the whole batch failed.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resp: Vec<TargetResponse>,
}

impl BatchResponse {
    /// Batch-level error code, if the gateway reported one.
    pub fn fatal_code(&self) -> Option<&str> {
        self.errcode.as_deref().filter(|c| !c.is_empty())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TargetResponse>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<TargetResponse>>::deserialize(deserializer)?.unwrap_or_default())
}
