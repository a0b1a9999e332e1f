use super::*;
use crate::storage::{LeaseOutcome, LeaseRequest, LeasedMessage};

/// Single-use acknowledgement token handed to the poll callback. Dropping
/// it without calling [`AckHandle::ack`] leaves the lease to expire, after
/// which the recovery sweep redelivers or dead-letters the message.
pub struct AckHandle<'a> {
    queue: &'a Queue,
    fingerprint: String,
}

impl AckHandle<'_> {
    /// The fingerprint this handle acknowledges.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn ack(self) -> QueueResult<()> {
        self.queue.ack(&self.fingerprint)
    }
}

impl Queue {
    /// Deliver at most one due message to `handler` under an exclusive
    /// lease. Handlers must tolerate redelivery: the same logical message
    /// may arrive again after a lease timeout even if earlier processing
    /// partially completed.
    pub fn poll<F>(&self, handler: F) -> QueueResult<()>
    where
        F: FnOnce(&Message, AckHandle<'_>),
    {
        match self.lease_next()? {
            LeaseOutcome::Leased(lease) => self.dispatch(lease, handler)?,
            LeaseOutcome::NoReadyMessages => {}
            LeaseOutcome::Contended => {
                // More due work than one peek window can lock: a signal to
                // tune the window or consumer concurrency, not an error.
                debug!(queue = %self, "all lease candidates were locked by other pollers");
                self.publish(QueueEvent::LockFailed);
            }
        }
        self.publish(QueueEvent::Polled);
        Ok(())
    }

    /// Run the lease routine, re-registering it once if the backend lost it.
    fn lease_next(&self) -> QueueResult<LeaseOutcome> {
        let req = LeaseRequest {
            now_ms: self.clock.now_ms(),
            peek: self.options.ready_peek_count,
            lock_ttl_ms: self.options.lock_ttl_ms,
            default_lease_ms: self.options.ack_timeout_ms,
            override_field: &self.options.ack_override_field,
        };
        match self.store.acquire_lease(&req) {
            Err(StorageError::RoutineNotLoaded) => {
                warn!(queue = %self, "lease routine missing from backend, re-registering");
                self.store.prepare()?;
                Ok(self.store.acquire_lease(&req)?)
            }
            other => Ok(other?),
        }
    }

    fn dispatch<F>(&self, lease: LeasedMessage, handler: F) -> QueueResult<()>
    where
        F: FnOnce(&Message, AckHandle<'_>),
    {
        let Some(raw) = lease.payload.as_deref() else {
            // Unrecoverable: nothing to deliver and nothing to retry.
            error!(queue = %self, fingerprint = %lease.fingerprint, "payload for leased message is missing");
            return self.purge(&lease.fingerprint);
        };
        let Some(mut message) = self.decode_payload(&lease.fingerprint, raw) else {
            return self.purge(&lease.fingerprint);
        };

        message.attributes.attempts += 1;
        let updated = serde_json::to_string(&message).map_err(StorageError::from)?;
        self.store.put_payload(&lease.fingerprint, &updated)?;

        if let Some(max) = message.attributes.max_attempts {
            if message.attributes.attempts > max {
                warn!(
                    queue = %self,
                    fingerprint = %lease.fingerprint,
                    attempts = message.attributes.attempts,
                    max_attempts = max,
                    "message exceeded its attempt limit"
                );
                self.dead_letter(&message);
                self.purge(&lease.fingerprint)?;
                self.publish(QueueEvent::Dead);
                return Ok(());
            }
        }

        let lag_ms = self.clock.now_ms().saturating_sub(lease.delivered_at);
        self.publish(QueueEvent::Processing {
            message: message.clone(),
            lag_ms,
        });
        let ack = AckHandle {
            queue: self,
            fingerprint: lease.fingerprint,
        };
        handler(&message, ack);
        Ok(())
    }
}
