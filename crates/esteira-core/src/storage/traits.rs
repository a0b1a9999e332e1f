use crate::error::StorageResult;

/// One operation in an all-or-nothing batch.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Upsert into the ready structure; re-scores an existing entry.
    AddReady { fingerprint: String, score: u64 },
    RemoveReady { fingerprint: String },
    /// Upsert into the unacked structure; score is the lease expiry.
    AddUnacked { fingerprint: String, score: u64 },
    RemoveUnacked { fingerprint: String },
    PutPayload { fingerprint: String, payload: String },
    DeletePayload { fingerprint: String },
    IncrAttempts { fingerprint: String },
    DeleteAttempts { fingerprint: String },
    RemoveLock { fingerprint: String },
}

/// Parameters for a single lease acquisition pass.
#[derive(Debug, Clone)]
pub struct LeaseRequest<'a> {
    /// Current time; ready entries scored at or below this are due.
    pub now_ms: u64,
    /// Maximum number of due candidates to examine for a free lock.
    pub peek: usize,
    /// Lock lifetime. Only needs to outlive a single acquisition; a
    /// crashed poller strands its candidate for at most this long.
    pub lock_ttl_ms: u64,
    /// Lease length when the message carries no override.
    pub default_lease_ms: u64,
    /// Attribute field consulted for a per-message lease override.
    pub override_field: &'a str,
}

/// Result of a lease acquisition pass.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Leased(LeasedMessage),
    /// No entry is due. The normal idle outcome, not an error.
    NoReadyMessages,
    /// Due entries exist but every candidate in the peek window is locked
    /// by another poller. A tuning signal, not an error.
    Contended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeasedMessage {
    pub fingerprint: String,
    /// The ready score the entry held when leased, i.e. its scheduled
    /// delivery time.
    pub delivered_at: u64,
    pub lease_expiry: u64,
    /// Raw stored payload. `None` means the entry has no content; the
    /// engine resolves that by purging.
    pub payload: Option<String>,
}

/// Structure sizes reported by [`Store::counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCounts {
    /// Total ready entries.
    pub ready: u64,
    /// Ready entries already due.
    pub due: u64,
    /// Leased entries awaiting acknowledgement.
    pub unacked: u64,
    /// Stored payloads.
    pub payloads: u64,
}

/// Persistence contract for the queue engine. Implementations must be
/// thread-safe, and must execute [`Store::acquire_lease`] and
/// [`Store::apply`] as indivisible units: natively where the backend can
/// run multi-step routines atomically, otherwise by serializing them on an
/// internal lock. Everything is keyed by message fingerprint, so
/// operations on different fingerprints never conflict semantically.
pub trait Store: Send + Sync {
    /// (Re)register the backend's atomic lease routine. Embedded backends
    /// have nothing to register; networked backends reload their script
    /// cache here. The engine calls this after
    /// [`crate::error::StorageError::RoutineNotLoaded`] and retries once.
    fn prepare(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Atomically pick the first lockable due entry, lock it, and move it
    /// from ready to unacked with its lease expiry as the new score.
    fn acquire_lease(&self, req: &LeaseRequest<'_>) -> StorageResult<LeaseOutcome>;

    /// Create a lock entry if none exists. An expired lock counts as
    /// absent. Returns whether the lock was created.
    fn lock_if_absent(&self, fingerprint: &str, now_ms: u64, expiry_ms: u64)
        -> StorageResult<bool>;

    /// Delete a lock entry. Idempotent.
    fn remove_lock(&self, fingerprint: &str) -> StorageResult<()>;

    fn ready_contains(&self, fingerprint: &str) -> StorageResult<bool>;

    fn unacked_contains(&self, fingerprint: &str) -> StorageResult<bool>;

    /// Re-score a ready entry only if it is present. Returns whether it was.
    fn update_ready_score(&self, fingerprint: &str, score: u64) -> StorageResult<bool>;

    /// Unacked fingerprints whose lease expiry is at or below
    /// `up_to_score`, earliest first.
    fn expired_unacked(&self, up_to_score: u64) -> StorageResult<Vec<String>>;

    fn get_payload(&self, fingerprint: &str) -> StorageResult<Option<String>>;

    fn put_payload(&self, fingerprint: &str, payload: &str) -> StorageResult<()>;

    /// Current redelivery count for a fingerprint, 0 when untracked.
    fn attempts(&self, fingerprint: &str) -> StorageResult<u32>;

    /// Apply a batch of operations, all or nothing.
    fn apply(&self, ops: Vec<StoreOp>) -> StorageResult<()>;

    /// Structure sizes for state reporting. `due_score` bounds the due
    /// count.
    fn counts(&self, due_score: u64) -> StorageResult<StoreCounts>;

    /// Page through stored payloads in fingerprint order. Pass the
    /// returned cursor to resume; `None` means the scan is complete.
    fn scan_payloads(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StorageResult<(Option<String>, Vec<String>)>;
}

/// Read a per-message lease override out of a raw payload. The override
/// rides inside the serialized attributes, so it must be honored without
/// fully deserializing the message, since lease scoring happens inside the
/// atomic routine, before the engine ever sees the payload.
pub(crate) fn lease_override_ms(payload: Option<&str>, field: &str) -> Option<u64> {
    let raw = payload?;
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("attributes")?.get(field)?.as_u64()
}
