use serde::Deserialize;

/// Queue engine configuration, deserializable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Lease length granted on delivery when the message carries no
    /// override; an unacknowledged message becomes eligible for recovery
    /// once this elapses.
    pub ack_timeout_ms: u64,

    /// Lifetime of the poll-time lock entries. Must stay well below the
    /// ack timeout; it only needs to cover a single lease acquisition.
    pub lock_ttl_ms: u64,

    /// How many due entries a single poll examines when hunting for a
    /// lockable candidate. Larger windows tolerate more poller contention
    /// at the cost of scanning further past the head.
    pub ready_peek_count: usize,

    /// Redelivery ceiling for messages without an explicit `max_attempts`
    /// attribute; the sweep dead-letters once the counter reaches it.
    pub max_retries: u32,

    /// Attribute field consulted for a per-message lease override.
    pub ack_override_field: String,

    /// Cadence of the background recovery sweep.
    pub sweep_interval_ms: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 60_000,
            lock_ttl_ms: 10_000,
            ready_peek_count: 10,
            max_retries: 5,
            ack_override_field: "ack_timeout_ms".to_string(),
            sweep_interval_ms: 10_000,
        }
    }
}
