use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use crate::error::StorageResult;
use crate::storage::traits::{
    lease_override_ms, LeaseOutcome, LeaseRequest, LeasedMessage, Store, StoreCounts, StoreOp,
};

/// In-process reference backend. Ready and unacked entries live in
/// BTree-ordered `(score, fingerprint)` indexes, everything else in plain
/// maps, all behind one mutex, which trivially satisfies the atomicity
/// contract for `acquire_lease` and `apply`. Suitable for tests and
/// single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    ready: HashMap<String, u64>,
    ready_index: BTreeSet<(u64, String)>,
    unacked: HashMap<String, u64>,
    unacked_index: BTreeSet<(u64, String)>,
    payloads: BTreeMap<String, String>,
    attempts: HashMap<String, u32>,
    /// Fingerprint -> absolute lock expiry. Expiry is enforced at read
    /// time, standing in for a native TTL.
    locks: HashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn add_ready(&mut self, fingerprint: &str, score: u64) {
        if let Some(old) = self.ready.insert(fingerprint.to_string(), score) {
            self.ready_index.remove(&(old, fingerprint.to_string()));
        }
        self.ready_index.insert((score, fingerprint.to_string()));
    }

    fn remove_ready(&mut self, fingerprint: &str) {
        if let Some(old) = self.ready.remove(fingerprint) {
            self.ready_index.remove(&(old, fingerprint.to_string()));
        }
    }

    fn add_unacked(&mut self, fingerprint: &str, score: u64) {
        if let Some(old) = self.unacked.insert(fingerprint.to_string(), score) {
            self.unacked_index.remove(&(old, fingerprint.to_string()));
        }
        self.unacked_index.insert((score, fingerprint.to_string()));
    }

    fn remove_unacked(&mut self, fingerprint: &str) {
        if let Some(old) = self.unacked.remove(fingerprint) {
            self.unacked_index.remove(&(old, fingerprint.to_string()));
        }
    }

    fn lock_live(&self, fingerprint: &str, now_ms: u64) -> bool {
        self.locks
            .get(fingerprint)
            .is_some_and(|expiry| *expiry > now_ms)
    }

    fn apply_op(&mut self, op: StoreOp) {
        match op {
            StoreOp::AddReady { fingerprint, score } => self.add_ready(&fingerprint, score),
            StoreOp::RemoveReady { fingerprint } => self.remove_ready(&fingerprint),
            StoreOp::AddUnacked { fingerprint, score } => self.add_unacked(&fingerprint, score),
            StoreOp::RemoveUnacked { fingerprint } => self.remove_unacked(&fingerprint),
            StoreOp::PutPayload {
                fingerprint,
                payload,
            } => {
                self.payloads.insert(fingerprint, payload);
            }
            StoreOp::DeletePayload { fingerprint } => {
                self.payloads.remove(&fingerprint);
            }
            StoreOp::IncrAttempts { fingerprint } => {
                *self.attempts.entry(fingerprint).or_insert(0) += 1;
            }
            StoreOp::DeleteAttempts { fingerprint } => {
                self.attempts.remove(&fingerprint);
            }
            StoreOp::RemoveLock { fingerprint } => {
                self.locks.remove(&fingerprint);
            }
        }
    }
}

impl Store for MemoryStore {
    fn acquire_lease(&self, req: &LeaseRequest<'_>) -> StorageResult<LeaseOutcome> {
        let mut inner = self.inner.lock().expect("memory store poisoned");

        let candidates: Vec<(u64, String)> = inner
            .ready_index
            .iter()
            .take_while(|(score, _)| *score <= req.now_ms)
            .take(req.peek)
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Ok(LeaseOutcome::NoReadyMessages);
        }

        for (delivered_at, fingerprint) in candidates {
            if inner.lock_live(&fingerprint, req.now_ms) {
                continue;
            }
            inner
                .locks
                .insert(fingerprint.clone(), req.now_ms + req.lock_ttl_ms);

            let payload = inner.payloads.get(&fingerprint).cloned();
            let lease_ms = lease_override_ms(payload.as_deref(), req.override_field)
                .unwrap_or(req.default_lease_ms);
            let lease_expiry = req.now_ms + lease_ms;

            inner.remove_ready(&fingerprint);
            inner.add_unacked(&fingerprint, lease_expiry);

            return Ok(LeaseOutcome::Leased(LeasedMessage {
                fingerprint,
                delivered_at,
                lease_expiry,
                payload,
            }));
        }

        Ok(LeaseOutcome::Contended)
    }

    fn lock_if_absent(
        &self,
        fingerprint: &str,
        now_ms: u64,
        expiry_ms: u64,
    ) -> StorageResult<bool> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if inner.lock_live(fingerprint, now_ms) {
            return Ok(false);
        }
        inner.locks.insert(fingerprint.to_string(), expiry_ms);
        Ok(true)
    }

    fn remove_lock(&self, fingerprint: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.locks.remove(fingerprint);
        Ok(())
    }

    fn ready_contains(&self, fingerprint: &str) -> StorageResult<bool> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.ready.contains_key(fingerprint))
    }

    fn unacked_contains(&self, fingerprint: &str) -> StorageResult<bool> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.unacked.contains_key(fingerprint))
    }

    fn update_ready_score(&self, fingerprint: &str, score: u64) -> StorageResult<bool> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if !inner.ready.contains_key(fingerprint) {
            return Ok(false);
        }
        inner.add_ready(fingerprint, score);
        Ok(true)
    }

    fn expired_unacked(&self, up_to_score: u64) -> StorageResult<Vec<String>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .unacked_index
            .iter()
            .take_while(|(score, _)| *score <= up_to_score)
            .map(|(_, fingerprint)| fingerprint.clone())
            .collect())
    }

    fn get_payload(&self, fingerprint: &str) -> StorageResult<Option<String>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.payloads.get(fingerprint).cloned())
    }

    fn put_payload(&self, fingerprint: &str, payload: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .payloads
            .insert(fingerprint.to_string(), payload.to_string());
        Ok(())
    }

    fn attempts(&self, fingerprint: &str) -> StorageResult<u32> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.attempts.get(fingerprint).copied().unwrap_or(0))
    }

    fn apply(&self, ops: Vec<StoreOp>) -> StorageResult<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        for op in ops {
            inner.apply_op(op);
        }
        Ok(())
    }

    fn counts(&self, due_score: u64) -> StorageResult<StoreCounts> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let due = inner
            .ready_index
            .iter()
            .take_while(|(score, _)| *score <= due_score)
            .count() as u64;
        Ok(StoreCounts {
            ready: inner.ready.len() as u64,
            due,
            unacked: inner.unacked.len() as u64,
            payloads: inner.payloads.len() as u64,
        })
    }

    fn scan_payloads(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StorageResult<(Option<String>, Vec<String>)> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let lower = match start_after {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Unbounded,
        };
        let mut last = None;
        let page: Vec<String> = inner
            .payloads
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(fingerprint, payload)| {
                last = Some(fingerprint.clone());
                payload.clone()
            })
            .collect();
        let cursor = if page.len() == limit { last } else { None };
        Ok((cursor, page))
    }
}
