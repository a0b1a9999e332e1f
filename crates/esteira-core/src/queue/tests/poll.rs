use super::*;

#[test]
fn poll_delivers_with_incremented_attempts() {
    let t = test_setup();
    let message = test_message(1);
    t.queue.push(&message, Duration::ZERO).unwrap();

    let delivered = poll_expect(&t.queue);
    assert_eq!(delivered.kind, message.kind);
    assert_eq!(delivered.body, message.body);
    assert_eq!(delivered.attributes.attempts, 1);

    // The incremented count is persisted alongside the payload.
    let raw = t.store.get_payload(&latest_of(&message)).unwrap().unwrap();
    let stored: Message = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.attributes.attempts, 1);

    assert_eq!(t.sink.names(), vec!["pushed", "processing", "polled"]);
}

#[test]
fn poll_moves_the_entry_to_unacked() {
    let t = test_setup();
    t.queue.push(&test_message(1), Duration::ZERO).unwrap();
    poll_expect(&t.queue);

    let counts = t.store.counts(u64::MAX).unwrap();
    assert_eq!(counts.ready, 0);
    assert_eq!(counts.unacked, 1);

    // Leased: a second poll finds nothing.
    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
}

#[test]
fn poll_on_empty_queue_only_emits_polled() {
    let t = test_setup();
    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
    assert_eq!(t.sink.names(), vec!["polled"]);
}

#[test]
fn poll_is_not_due_before_the_delay_elapses() {
    let t = test_setup();
    t.queue
        .push(&test_message(1), Duration::from_secs(5))
        .unwrap();

    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);

    t.clock.advance(5_000);
    poll_expect(&t.queue);
}

#[test]
fn contended_candidates_emit_lock_failed() {
    let t = test_setup();
    let message = test_message(1);
    t.queue.push(&message, Duration::ZERO).unwrap();
    // Another poller holds the lock mid-acquisition.
    t.store
        .lock_if_absent(&latest_of(&message), T0, T0 + 60_000)
        .unwrap();

    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called, "handler must not run under contention");
    assert_eq!(t.sink.names(), vec!["pushed", "lock_failed", "polled"]);

    // The entry is untouched and delivers once the lock is gone.
    t.store.remove_lock(&latest_of(&message)).unwrap();
    poll_expect(&t.queue);
}

#[test]
fn missing_payload_is_purged_without_dispatch() {
    let t = test_setup();
    t.store
        .apply(vec![StoreOp::AddReady {
            fingerprint: "deadbeef".to_string(),
            score: T0,
        }])
        .unwrap();

    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
    assert_eq!(t.store.counts(u64::MAX).unwrap(), StoreCounts::default());
}

#[test]
fn corrupt_payload_is_purged_without_dispatch() {
    let t = test_setup();
    t.store
        .apply(vec![
            StoreOp::PutPayload {
                fingerprint: "deadbeef".to_string(),
                payload: "{not json".to_string(),
            },
            StoreOp::AddReady {
                fingerprint: "deadbeef".to_string(),
                score: T0,
            },
        ])
        .unwrap();

    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
    assert_eq!(t.store.counts(u64::MAX).unwrap(), StoreCounts::default());
    assert_eq!(t.dead.messages().len(), 0, "corrupt content is not dead-lettered");
}

#[test]
fn failed_migration_is_treated_as_corrupt() {
    struct RejectEverything;
    impl crate::migration::PayloadMigrator for RejectEverything {
        fn migrate(
            &self,
            _payload: serde_json::Value,
        ) -> Result<serde_json::Value, crate::migration::MigrationError> {
            Err(crate::migration::MigrationError("schema too old".to_string()))
        }
    }

    let t = test_setup();
    let queue = Queue::new(
        "migrating-queue",
        Arc::clone(&t.store) as Arc<dyn Store>,
        Arc::clone(&t.clock) as Arc<dyn crate::clock::Clock>,
        QueueOptions::default(),
        Arc::clone(&t.sink) as Arc<dyn EventSink>,
    )
    .with_migrator(Arc::new(RejectEverything));

    queue.push(&test_message(1), Duration::ZERO).unwrap();
    let mut called = false;
    queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
    assert_eq!(t.store.counts(u64::MAX).unwrap(), StoreCounts::default());
}

#[test]
fn migrator_rewrites_payload_before_dispatch() {
    struct RenameKind;
    impl crate::migration::PayloadMigrator for RenameKind {
        fn migrate(
            &self,
            mut payload: serde_json::Value,
        ) -> Result<serde_json::Value, crate::migration::MigrationError> {
            if payload.get("kind") == Some(&serde_json::json!("run_stage")) {
                payload["kind"] = serde_json::json!("run_stage_v2");
            }
            Ok(payload)
        }
    }

    let t = test_setup();
    let queue = Queue::new(
        "migrating-queue",
        Arc::clone(&t.store) as Arc<dyn Store>,
        Arc::clone(&t.clock) as Arc<dyn crate::clock::Clock>,
        QueueOptions::default(),
        Arc::clone(&t.sink) as Arc<dyn EventSink>,
    )
    .with_migrator(Arc::new(RenameKind));

    queue.push(&test_message(1), Duration::ZERO).unwrap();
    let delivered = poll_expect(&queue);
    assert_eq!(delivered.kind, "run_stage_v2");
}

#[test]
fn over_limit_message_is_dead_lettered_before_dispatch() {
    let t = test_setup();
    let mut message = test_message(1);
    message.attributes.attempts = 1;
    message.attributes.max_attempts = Some(1);
    t.queue.push(&message, Duration::ZERO).unwrap();

    // Delivery would be attempt 2, over the limit of 1: the handler must
    // never see it.
    let mut called = false;
    t.queue.poll(|_, _| called = true).unwrap();
    assert!(!called);
    assert_eq!(t.dead.messages().len(), 1);
    assert_eq!(t.dead.messages()[0].attributes.attempts, 2);
    assert_eq!(t.store.counts(u64::MAX).unwrap(), StoreCounts::default());
    assert_eq!(t.sink.names(), vec!["pushed", "dead", "polled"]);
}

#[test]
fn per_message_ack_timeout_override_sets_lease_expiry() {
    let t = test_setup();
    let mut message = test_message(1);
    message.attributes.ack_timeout_ms = Some(5_000);
    t.queue.push(&message, Duration::ZERO).unwrap();
    poll_expect(&t.queue);

    assert!(
        t.store.expired_unacked(T0 + 4_999).unwrap().is_empty(),
        "lease still live just before the override elapses"
    );
    assert_eq!(t.store.expired_unacked(T0 + 5_000).unwrap().len(), 1);
}

#[test]
fn default_ack_timeout_applies_without_override() {
    let t = test_setup();
    t.queue.push(&test_message(1), Duration::ZERO).unwrap();
    poll_expect(&t.queue);

    assert!(t.store.expired_unacked(T0 + 59_999).unwrap().is_empty());
    assert_eq!(t.store.expired_unacked(T0 + 60_000).unwrap().len(), 1);
}

/// Store wrapper whose lease routine "vanishes" for a configurable number
/// of calls, simulating a cleared script cache.
struct ForgetfulStore {
    inner: MemoryStore,
    failures: Mutex<u32>,
    prepares: Mutex<u32>,
}

impl ForgetfulStore {
    fn failing(times: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: Mutex::new(times),
            prepares: Mutex::new(0),
        }
    }
}

impl Store for ForgetfulStore {
    fn prepare(&self) -> StorageResult<()> {
        *self.prepares.lock().unwrap() += 1;
        Ok(())
    }

    fn acquire_lease(&self, req: &LeaseRequest<'_>) -> StorageResult<LeaseOutcome> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(StorageError::RoutineNotLoaded);
        }
        self.inner.acquire_lease(req)
    }

    fn lock_if_absent(&self, f: &str, now_ms: u64, expiry_ms: u64) -> StorageResult<bool> {
        self.inner.lock_if_absent(f, now_ms, expiry_ms)
    }

    fn remove_lock(&self, f: &str) -> StorageResult<()> {
        self.inner.remove_lock(f)
    }

    fn ready_contains(&self, f: &str) -> StorageResult<bool> {
        self.inner.ready_contains(f)
    }

    fn unacked_contains(&self, f: &str) -> StorageResult<bool> {
        self.inner.unacked_contains(f)
    }

    fn update_ready_score(&self, f: &str, score: u64) -> StorageResult<bool> {
        self.inner.update_ready_score(f, score)
    }

    fn expired_unacked(&self, up_to_score: u64) -> StorageResult<Vec<String>> {
        self.inner.expired_unacked(up_to_score)
    }

    fn get_payload(&self, f: &str) -> StorageResult<Option<String>> {
        self.inner.get_payload(f)
    }

    fn put_payload(&self, f: &str, payload: &str) -> StorageResult<()> {
        self.inner.put_payload(f, payload)
    }

    fn attempts(&self, f: &str) -> StorageResult<u32> {
        self.inner.attempts(f)
    }

    fn apply(&self, ops: Vec<StoreOp>) -> StorageResult<()> {
        self.inner.apply(ops)
    }

    fn counts(&self, due_score: u64) -> StorageResult<StoreCounts> {
        self.inner.counts(due_score)
    }

    fn scan_payloads(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StorageResult<(Option<String>, Vec<String>)> {
        self.inner.scan_payloads(start_after, limit)
    }
}

#[test]
fn missing_lease_routine_is_reloaded_and_retried_once() {
    let store = Arc::new(ForgetfulStore::failing(1));
    let clock = Arc::new(ManualClock::new(T0));
    let sink = Arc::new(RecordingSink::default());
    let queue = Queue::new(
        "reload-queue",
        Arc::clone(&store) as Arc<dyn Store>,
        clock as Arc<dyn crate::clock::Clock>,
        QueueOptions::default(),
        sink as Arc<dyn EventSink>,
    );

    queue.push(&test_message(1), Duration::ZERO).unwrap();
    let delivered = poll_expect(&queue);
    assert_eq!(delivered.attributes.attempts, 1);
    assert_eq!(*store.prepares.lock().unwrap(), 1);
}

#[test]
fn second_routine_failure_propagates() {
    let store = Arc::new(ForgetfulStore::failing(2));
    let clock = Arc::new(ManualClock::new(T0));
    let sink = Arc::new(RecordingSink::default());
    let queue = Queue::new(
        "reload-queue",
        Arc::clone(&store) as Arc<dyn Store>,
        clock as Arc<dyn crate::clock::Clock>,
        QueueOptions::default(),
        sink as Arc<dyn EventSink>,
    );

    queue.push(&test_message(1), Duration::ZERO).unwrap();
    let result = queue.poll(|_, _| {});
    assert!(result.is_err());
    assert_eq!(*store.prepares.lock().unwrap(), 1, "only one reload attempt");
}
