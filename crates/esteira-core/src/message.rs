use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Queue message domain type: a typed payload plus mutable bookkeeping
/// attributes. `kind` and `body` together are the message's semantic
/// content; `attributes` never participate in identity hashing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub kind: String,
    pub body: serde_json::Value,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Message {
    pub fn new(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            body,
            attributes: Attributes::default(),
        }
    }
}

/// Mutable per-message bookkeeping. `attempts` is always serialized, so
/// every stored payload carries its delivery count from the first write.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attributes {
    /// Delivery count, incremented each time the message reaches a poller.
    #[serde(default)]
    pub attempts: u32,

    /// Delivery ceiling enforced at dispatch time. Unset means the global
    /// retry ceiling applies instead, enforced by the recovery sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Per-message lease length override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,

    /// Open-ended attributes carried alongside the well-known ones.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
