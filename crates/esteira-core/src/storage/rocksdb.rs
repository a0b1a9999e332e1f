use std::path::Path;
use std::sync::Mutex;

use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options,
    WriteBatch,
};

use crate::error::{StorageError, StorageResult};
use crate::storage::keys;
use crate::storage::traits::{
    lease_override_ms, LeaseOutcome, LeaseRequest, LeasedMessage, Store, StoreCounts, StoreOp,
};

const CF_READY: &str = "ready";
const CF_READY_INDEX: &str = "ready_index";
const CF_UNACKED: &str = "unacked";
const CF_UNACKED_INDEX: &str = "unacked_index";
const CF_PAYLOADS: &str = "payloads";
const CF_ATTEMPTS: &str = "attempts";
const CF_LOCKS: &str = "locks";

/// All column family names (excluding `default`, which RocksDB creates
/// automatically). The ready and unacked structures are stored twice: a
/// fingerprint-keyed CF holding the score, and a score-first index CF for
/// ascending iteration.
const COLUMN_FAMILIES: &[&str] = &[
    CF_READY,
    CF_READY_INDEX,
    CF_UNACKED,
    CF_UNACKED_INDEX,
    CF_PAYLOADS,
    CF_ATTEMPTS,
    CF_LOCKS,
];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed store for single-process durable deployments.
///
/// RocksDB write batches are atomic on disk, but the lock protocol also
/// needs read-check-write exclusivity, so `acquire_lease`, `apply`, and the
/// other read-modify-write operations serialize on an internal mutex.
pub struct RocksDbStore {
    db: DB,
    write_guard: Mutex<()>,
}

impl RocksDbStore {
    /// Open or create a database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            db,
            write_guard: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> StorageResult<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    /// Read the score a fingerprint holds in a fingerprint-keyed CF.
    fn score_of(&self, cf_name: &str, fingerprint: &str) -> StorageResult<Option<u64>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, fingerprint.as_bytes())? {
            Some(bytes) => keys::decode_score(&bytes)
                .map(Some)
                .ok_or_else(|| {
                    StorageError::CorruptData(format!(
                        "score for {fingerprint} in {cf_name} is not 8 bytes"
                    ))
                }),
            None => Ok(None),
        }
    }

    /// Stage an upsert of `(fingerprint, score)` into an entry CF and its
    /// index CF, removing any previous index entry.
    fn stage_entry_upsert(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        index_cf_name: &str,
        fingerprint: &str,
        score: u64,
    ) -> StorageResult<()> {
        if let Some(old) = self.score_of(cf_name, fingerprint)? {
            let index_cf = self.cf(index_cf_name)?;
            batch.delete_cf(&index_cf, keys::index_key(old, fingerprint));
        }
        let cf = self.cf(cf_name)?;
        let index_cf = self.cf(index_cf_name)?;
        batch.put_cf(&cf, fingerprint.as_bytes(), keys::encode_score(score));
        batch.put_cf(&index_cf, keys::index_key(score, fingerprint), b"");
        Ok(())
    }

    /// Stage removal of a fingerprint from an entry CF and its index CF.
    fn stage_entry_remove(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        index_cf_name: &str,
        fingerprint: &str,
    ) -> StorageResult<()> {
        if let Some(old) = self.score_of(cf_name, fingerprint)? {
            let index_cf = self.cf(index_cf_name)?;
            batch.delete_cf(&index_cf, keys::index_key(old, fingerprint));
        }
        let cf = self.cf(cf_name)?;
        batch.delete_cf(&cf, fingerprint.as_bytes());
        Ok(())
    }

    fn stage_op(&self, batch: &mut WriteBatch, op: StoreOp) -> StorageResult<()> {
        match op {
            StoreOp::AddReady { fingerprint, score } => {
                self.stage_entry_upsert(batch, CF_READY, CF_READY_INDEX, &fingerprint, score)?;
            }
            StoreOp::RemoveReady { fingerprint } => {
                self.stage_entry_remove(batch, CF_READY, CF_READY_INDEX, &fingerprint)?;
            }
            StoreOp::AddUnacked { fingerprint, score } => {
                self.stage_entry_upsert(batch, CF_UNACKED, CF_UNACKED_INDEX, &fingerprint, score)?;
            }
            StoreOp::RemoveUnacked { fingerprint } => {
                self.stage_entry_remove(batch, CF_UNACKED, CF_UNACKED_INDEX, &fingerprint)?;
            }
            StoreOp::PutPayload {
                fingerprint,
                payload,
            } => {
                let cf = self.cf(CF_PAYLOADS)?;
                batch.put_cf(&cf, fingerprint.as_bytes(), payload.as_bytes());
            }
            StoreOp::DeletePayload { fingerprint } => {
                let cf = self.cf(CF_PAYLOADS)?;
                batch.delete_cf(&cf, fingerprint.as_bytes());
            }
            StoreOp::IncrAttempts { fingerprint } => {
                let cf = self.cf(CF_ATTEMPTS)?;
                let current = match self.db.get_cf(&cf, fingerprint.as_bytes())? {
                    Some(bytes) => decode_attempts(&fingerprint, &bytes)?,
                    None => 0,
                };
                batch.put_cf(&cf, fingerprint.as_bytes(), (current + 1).to_be_bytes());
            }
            StoreOp::DeleteAttempts { fingerprint } => {
                let cf = self.cf(CF_ATTEMPTS)?;
                batch.delete_cf(&cf, fingerprint.as_bytes());
            }
            StoreOp::RemoveLock { fingerprint } => {
                let cf = self.cf(CF_LOCKS)?;
                batch.delete_cf(&cf, fingerprint.as_bytes());
            }
        }
        Ok(())
    }

    /// Due `(score, fingerprint)` pairs from an index CF, earliest first.
    fn scan_index(
        &self,
        index_cf_name: &str,
        up_to_score: u64,
        limit: usize,
    ) -> StorageResult<Vec<(u64, String)>> {
        let cf = self.cf(index_cf_name)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
        let mut results = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let Some((score, fingerprint)) = keys::parse_index_key(&key) else {
                return Err(StorageError::CorruptData(format!(
                    "unparseable index key in {index_cf_name}"
                )));
            };
            if score > up_to_score {
                break;
            }
            results.push((score, fingerprint));
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    fn count_cf(&self, cf_name: &str) -> StorageResult<u64> {
        let cf = self.cf(cf_name)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn lock_live(&self, fingerprint: &str, now_ms: u64) -> StorageResult<bool> {
        let cf = self.cf(CF_LOCKS)?;
        match self.db.get_cf(&cf, fingerprint.as_bytes())? {
            Some(bytes) => {
                let expiry = keys::decode_score(&bytes).ok_or_else(|| {
                    StorageError::CorruptData(format!("lock expiry for {fingerprint} is not 8 bytes"))
                })?;
                Ok(expiry > now_ms)
            }
            None => Ok(false),
        }
    }
}

fn decode_attempts(fingerprint: &str, bytes: &[u8]) -> StorageResult<u32> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| {
        StorageError::CorruptData(format!("attempt counter for {fingerprint} is not 4 bytes"))
    })?;
    Ok(u32::from_be_bytes(arr))
}

impl Store for RocksDbStore {
    fn acquire_lease(&self, req: &LeaseRequest<'_>) -> StorageResult<LeaseOutcome> {
        let _guard = self.write_guard.lock().expect("rocksdb store poisoned");

        let candidates = self.scan_index(CF_READY_INDEX, req.now_ms, req.peek)?;
        if candidates.is_empty() {
            return Ok(LeaseOutcome::NoReadyMessages);
        }

        for (delivered_at, fingerprint) in candidates {
            if self.lock_live(&fingerprint, req.now_ms)? {
                continue;
            }

            let payload = self.get_payload_inner(&fingerprint)?;
            let lease_ms = lease_override_ms(payload.as_deref(), req.override_field)
                .unwrap_or(req.default_lease_ms);
            let lease_expiry = req.now_ms + lease_ms;

            let mut batch = WriteBatch::default();
            let locks_cf = self.cf(CF_LOCKS)?;
            batch.put_cf(
                &locks_cf,
                fingerprint.as_bytes(),
                keys::encode_score(req.now_ms + req.lock_ttl_ms),
            );
            self.stage_entry_remove(&mut batch, CF_READY, CF_READY_INDEX, &fingerprint)?;
            self.stage_entry_upsert(
                &mut batch,
                CF_UNACKED,
                CF_UNACKED_INDEX,
                &fingerprint,
                lease_expiry,
            )?;
            self.db.write(batch)?;

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
        let _guard = self.write_guard.lock().expect("rocksdb store poisoned");
        if self.lock_live(fingerprint, now_ms)? {
            return Ok(false);
        }
        let cf = self.cf(CF_LOCKS)?;
        self.db
            .put_cf(&cf, fingerprint.as_bytes(), keys::encode_score(expiry_ms))?;
        Ok(true)
    }

    fn remove_lock(&self, fingerprint: &str) -> StorageResult<()> {
        let cf = self.cf(CF_LOCKS)?;
        self.db.delete_cf(&cf, fingerprint.as_bytes())?;
        Ok(())
    }

    fn ready_contains(&self, fingerprint: &str) -> StorageResult<bool> {
        Ok(self.score_of(CF_READY, fingerprint)?.is_some())
    }

    fn unacked_contains(&self, fingerprint: &str) -> StorageResult<bool> {
        Ok(self.score_of(CF_UNACKED, fingerprint)?.is_some())
    }

    fn update_ready_score(&self, fingerprint: &str, score: u64) -> StorageResult<bool> {
        let _guard = self.write_guard.lock().expect("rocksdb store poisoned");
        if self.score_of(CF_READY, fingerprint)?.is_none() {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.stage_entry_upsert(&mut batch, CF_READY, CF_READY_INDEX, fingerprint, score)?;
        self.db.write(batch)?;
        Ok(true)
    }

    fn expired_unacked(&self, up_to_score: u64) -> StorageResult<Vec<String>> {
        Ok(self
            .scan_index(CF_UNACKED_INDEX, up_to_score, usize::MAX)?
            .into_iter()
            .map(|(_, fingerprint)| fingerprint)
            .collect())
    }

    fn get_payload(&self, fingerprint: &str) -> StorageResult<Option<String>> {
        self.get_payload_inner(fingerprint)
    }

    fn put_payload(&self, fingerprint: &str, payload: &str) -> StorageResult<()> {
        let cf = self.cf(CF_PAYLOADS)?;
        self.db
            .put_cf(&cf, fingerprint.as_bytes(), payload.as_bytes())?;
        Ok(())
    }

    fn attempts(&self, fingerprint: &str) -> StorageResult<u32> {
        let cf = self.cf(CF_ATTEMPTS)?;
        match self.db.get_cf(&cf, fingerprint.as_bytes())? {
            Some(bytes) => decode_attempts(fingerprint, &bytes),
            None => Ok(0),
        }
    }

    fn apply(&self, ops: Vec<StoreOp>) -> StorageResult<()> {
        let _guard = self.write_guard.lock().expect("rocksdb store poisoned");
        let mut batch = WriteBatch::default();
        for op in ops {
            self.stage_op(&mut batch, op)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn counts(&self, due_score: u64) -> StorageResult<StoreCounts> {
        let due = self.scan_index(CF_READY_INDEX, due_score, usize::MAX)?.len() as u64;
        Ok(StoreCounts {
            ready: self.count_cf(CF_READY)?,
            due,
            unacked: self.count_cf(CF_UNACKED)?,
            payloads: self.count_cf(CF_PAYLOADS)?,
        })
    }

    fn scan_payloads(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StorageResult<(Option<String>, Vec<String>)> {
        let cf = self.cf(CF_PAYLOADS)?;
        // First key strictly after the cursor is the cursor plus a zero byte.
        let from_key = start_after.map(|cursor| {
            let mut from = cursor.as_bytes().to_vec();
            from.push(0);
            from
        });
        let iter = match &from_key {
            Some(from) => self
                .db
                .iterator_cf(&cf, IteratorMode::From(from.as_slice(), Direction::Forward)),
            None => self.db.iterator_cf(&cf, IteratorMode::Start),
        };
        let mut last = None;
        let mut page = Vec::new();
        for item in iter.take(limit) {
            let (key, value) = item?;
            last = Some(String::from_utf8_lossy(&key).into_owned());
            page.push(String::from_utf8_lossy(&value).into_owned());
        }
        let cursor = if page.len() == limit { last } else { None };
        Ok((cursor, page))
    }
}

impl RocksDbStore {
    fn get_payload_inner(&self, fingerprint: &str) -> StorageResult<Option<String>> {
        let cf = self.cf(CF_PAYLOADS)?;
        match self.db.get_cf(&cf, fingerprint.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|e| {
                StorageError::CorruptData(format!("payload for {fingerprint} is not UTF-8: {e}"))
            })?)),
            None => Ok(None),
        }
    }
}
