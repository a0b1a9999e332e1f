use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::QueueOptions;
use crate::dead_letter::DeadMessageHandler;
use crate::error::{QueueResult, StorageError};
use crate::event::{EventSink, QueueEvent};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::message::Message;
use crate::migration::PayloadMigrator;
use crate::storage::{Store, StoreOp};

mod poll;
mod sweep;

pub use poll::AckHandle;
pub use sweep::Sweeper;

/// Page size for [`Queue::contains_message`] scans.
const SCAN_PAGE: usize = 100;

/// Counts reported by [`Queue::read_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueState {
    /// Total entries awaiting delivery.
    pub depth: u64,
    /// Entries already due.
    pub ready: u64,
    /// Entries delivered but not yet acknowledged.
    pub unacked: u64,
    /// Stored payloads referenced by neither structure. Should hover near
    /// zero; sustained growth indicates a consistency bug.
    pub orphaned: i64,
}

/// The queue engine: fingerprint-deduplicated at-least-once delivery over a
/// pluggable [`Store`]. Producers call [`Queue::push`]/[`Queue::ensure`],
/// consumers loop on [`Queue::poll`], and a [`Sweeper`] reclaims expired
/// leases in the background.
pub struct Queue {
    name: String,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    options: QueueOptions,
    publisher: Arc<dyn EventSink>,
    dead_handlers: Vec<Arc<dyn DeadMessageHandler>>,
    migrator: Option<Arc<dyn PayloadMigrator>>,
}

impl Queue {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        options: QueueOptions,
        publisher: Arc<dyn EventSink>,
    ) -> Self {
        let name = name.into();
        info!(queue = %name, "configured queue");
        Self {
            name,
            store,
            clock,
            options,
            publisher,
            dead_handlers: Vec::new(),
            migrator: None,
        }
    }

    /// Register a sink invoked when a message exhausts its attempt budget.
    pub fn with_dead_letter_handler(mut self, handler: Arc<dyn DeadMessageHandler>) -> Self {
        self.dead_handlers.push(handler);
        self
    }

    /// Register a payload-rewriting hook applied on every stored-payload
    /// read before deserialization.
    pub fn with_migrator(mut self, migrator: Arc<dyn PayloadMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Insert a message for delivery after `delay`. If an identical message
    /// (under any hashing scheme) is already queued, the existing ready
    /// entry is moved to the new delivery time instead; an identical
    /// message currently leased is left alone.
    pub fn push(&self, message: &Message, delay: Duration) -> QueueResult<()> {
        let fp = fingerprint(message);
        let score = self.score(delay);
        if let Some(existing) = self.first_in_ready(&fp)? {
            info!(
                queue = %self,
                fingerprint = %existing,
                "an identical message is already queued, re-prioritizing"
            );
            self.store.update_ready_score(&existing, score)?;
            self.publish(QueueEvent::Duplicate {
                message: message.clone(),
            });
        } else if self.any_in_unacked(&fp)? {
            debug!(
                queue = %self,
                fingerprint = %fp.latest,
                "an identical message is in flight, leaving the leased copy alone"
            );
            self.publish(QueueEvent::Duplicate {
                message: message.clone(),
            });
        } else {
            self.queue_message(&fp.latest, message, score)?;
            self.publish(QueueEvent::Pushed {
                message: message.clone(),
            });
        }
        Ok(())
    }

    /// Push only if no identical message exists in ready or unacked. Used
    /// for idempotent scheduling.
    pub fn ensure(&self, message: &Message, delay: Duration) -> QueueResult<()> {
        let fp = fingerprint(message);
        if self.first_in_ready(&fp)?.is_none() && !self.any_in_unacked(&fp)? {
            debug!(
                queue = %self,
                fingerprint = %fp.latest,
                "message not present in ready or unacked, pushing"
            );
            self.push(message, delay)?;
        }
        Ok(())
    }

    /// Move an already-queued message to a new delivery time. Does nothing
    /// if the message is not currently in the ready structure.
    pub fn reschedule(&self, message: &Message, delay: Duration) -> QueueResult<()> {
        let fp = fingerprint(message).latest;
        debug!(queue = %self, fingerprint = %fp, ?delay, "re-scheduling message");
        if self.store.update_ready_score(&fp, self.score(delay))? {
            self.publish(QueueEvent::Rescheduled {
                message: message.clone(),
            });
        } else {
            self.publish(QueueEvent::NotFound {
                message: message.clone(),
            });
        }
        Ok(())
    }

    /// Acknowledge a delivered message. If an identical message was pushed
    /// while this one was leased, only the leased entry and its lock are
    /// dropped so the newer copy delivers normally; otherwise the message
    /// is fully purged.
    pub fn ack(&self, fingerprint: &str) -> QueueResult<()> {
        if self.store.ready_contains(fingerprint)? {
            self.store.apply(vec![
                StoreOp::RemoveUnacked {
                    fingerprint: fingerprint.to_string(),
                },
                StoreOp::RemoveLock {
                    fingerprint: fingerprint.to_string(),
                },
            ])?;
        } else {
            self.purge(fingerprint)?;
        }
        self.publish(QueueEvent::Acknowledged);
        Ok(())
    }

    /// Structure counts for monitoring.
    pub fn read_state(&self) -> QueueResult<QueueState> {
        let counts = self.store.counts(self.clock.now_ms())?;
        Ok(QueueState {
            depth: counts.ready,
            ready: counts.due,
            unacked: counts.unacked,
            orphaned: counts.payloads as i64 - (counts.ready + counts.unacked) as i64,
        })
    }

    /// Linear scan of every stored payload. Diagnostics only; pages
    /// through the payload store, so cost grows with queue size.
    pub fn contains_message(&self, predicate: impl Fn(&Message) -> bool) -> QueueResult<bool> {
        let mut cursor: Option<String> = None;
        loop {
            let (next, payloads) = self.store.scan_payloads(cursor.as_deref(), SCAN_PAGE)?;
            for raw in payloads {
                match serde_json::from_str::<Message>(&raw) {
                    Ok(message) => {
                        if predicate(&message) {
                            return Ok(true);
                        }
                    }
                    Err(e) => warn!(queue = %self, error = %e, "skipping unreadable payload in scan"),
                }
            }
            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(false),
            }
        }
    }

    fn score(&self, delay: Duration) -> u64 {
        self.clock.now_ms() + delay.as_millis() as u64
    }

    /// First fingerprint from `all` present in the ready structure. The
    /// entry may live under a retired scheme's hash; whichever is found is
    /// the key to operate on.
    fn first_in_ready(&self, fp: &Fingerprint) -> QueueResult<Option<String>> {
        for hash in &fp.all {
            if self.store.ready_contains(hash)? {
                return Ok(Some(hash.clone()));
            }
        }
        Ok(None)
    }

    fn any_in_unacked(&self, fp: &Fingerprint) -> QueueResult<bool> {
        for hash in &fp.all {
            if self.store.unacked_contains(hash)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn queue_message(&self, fingerprint: &str, message: &Message, score: u64) -> QueueResult<()> {
        // Attributes always serialize an attempts field, so the stored
        // payload carries its delivery count from the first write.
        let payload = serde_json::to_string(message).map_err(StorageError::from)?;
        self.store.apply(vec![
            StoreOp::PutPayload {
                fingerprint: fingerprint.to_string(),
                payload,
            },
            StoreOp::AddReady {
                fingerprint: fingerprint.to_string(),
                score,
            },
        ])?;
        Ok(())
    }

    /// Remove every trace of a fingerprint: both structures, payload, lock,
    /// and attempt counter.
    pub(crate) fn purge(&self, fingerprint: &str) -> QueueResult<()> {
        self.store.apply(vec![
            StoreOp::RemoveReady {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::RemoveUnacked {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::DeletePayload {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::RemoveLock {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::DeleteAttempts {
                fingerprint: fingerprint.to_string(),
            },
        ])?;
        Ok(())
    }

    /// Migrate and deserialize a stored payload. Returns `None` (after
    /// logging) when the content is corrupt beyond repair. Callers purge.
    pub(crate) fn decode_payload(&self, fingerprint: &str, raw: &str) -> Option<Message> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                error!(queue = %self, %fingerprint, error = %e, "payload is corrupt");
                return None;
            }
        };
        let value = match &self.migrator {
            Some(migrator) => match migrator.migrate(value) {
                Ok(value) => value,
                Err(e) => {
                    error!(queue = %self, %fingerprint, error = %e, "payload migration failed");
                    return None;
                }
            },
            None => value,
        };
        match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                error!(queue = %self, %fingerprint, error = %e, "payload does not deserialize");
                None
            }
        }
    }

    pub(crate) fn dead_letter(&self, message: &Message) {
        for handler in &self.dead_handlers {
            handler.handle(self, message);
        }
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        self.publisher.publish(&event);
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue[{}]", self.name)
    }
}

#[cfg(test)]
mod tests;
