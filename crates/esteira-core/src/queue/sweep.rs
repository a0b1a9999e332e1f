use std::thread;

use super::*;

impl Queue {
    /// Reclaim expired leases. For each unacked entry whose lease expiry
    /// has passed: drop its lock, then either dead-letter it (attempt
    /// budget exhausted), fold it into an identical ready copy, or return
    /// it to ready for redelivery. Returns the number of entries processed.
    ///
    /// Safe to run concurrently from several sweepers: every mutation is
    /// keyed by fingerprint and applied through conditional or batched
    /// store operations.
    pub fn retry(&self) -> QueueResult<u64> {
        let now = self.clock.now_ms();
        let expired = self.store.expired_unacked(now)?;

        // Drop locks up front; removal is idempotent, and a dangling lock
        // would block immediate redelivery of a requeued entry.
        for fingerprint in &expired {
            self.store.remove_lock(fingerprint)?;
        }

        let mut processed = 0u64;
        for fingerprint in &expired {
            self.recover_expired(fingerprint, now);
            processed += 1;
        }

        self.publish(QueueEvent::Swept);
        Ok(processed)
    }

    /// Handle a single expired lease. Failures are logged and skipped so
    /// one bad entry cannot stall the pass; the entry stays expired and
    /// the next sweep picks it up again.
    fn recover_expired(&self, fingerprint: &str, now: u64) {
        let attempts = match self.store.attempts(fingerprint) {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!(queue = %self, %fingerprint, error = %e, "failed to read attempt counter");
                return;
            }
        };

        let raw = match self.store.get_payload(fingerprint) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                // Unrecoverable: there is no content left to deliver.
                error!(queue = %self, %fingerprint, "payload for expired message is missing");
                if let Err(e) = self.purge(fingerprint) {
                    warn!(queue = %self, %fingerprint, error = %e, "failed to purge expired message");
                }
                return;
            }
            Err(e) => {
                // The content may be readable on a later pass; requeue
                // rather than drop.
                error!(queue = %self, %fingerprint, error = %e, "failed to read expired message, requeuing");
                if let Err(e) = self.bump_and_requeue(fingerprint, now) {
                    warn!(queue = %self, %fingerprint, error = %e, "failed to requeue expired message");
                }
                return;
            }
        };

        let Some(message) = self.decode_payload(fingerprint, &raw) else {
            if let Err(e) = self.purge(fingerprint) {
                warn!(queue = %self, %fingerprint, error = %e, "failed to purge corrupt message");
            }
            return;
        };

        let over_explicit_limit = message
            .attributes
            .max_attempts
            .is_some_and(|max| message.attributes.attempts > max);
        let over_default_ceiling =
            message.attributes.max_attempts.is_none() && attempts >= self.options.max_retries;

        if over_explicit_limit || over_default_ceiling {
            warn!(
                queue = %self,
                %fingerprint,
                attempts,
                delivery_attempts = message.attributes.attempts,
                "message exceeded its retry budget"
            );
            self.dead_letter(&message);
            if let Err(e) = self.purge(fingerprint) {
                warn!(queue = %self, %fingerprint, error = %e, "failed to purge dead message");
                return;
            }
            self.publish(QueueEvent::Dead);
            return;
        }

        match self.store.ready_contains(fingerprint) {
            Ok(true) => {
                // An identical message was pushed during the lease. Drop
                // the stale leased copy; the ready copy delivers normally.
                info!(
                    queue = %self,
                    %fingerprint,
                    "not retrying message, an identical one is already queued"
                );
                let requeued = self.store.apply(vec![
                    StoreOp::RemoveUnacked {
                        fingerprint: fingerprint.to_string(),
                    },
                    StoreOp::AddReady {
                        fingerprint: fingerprint.to_string(),
                        score: now,
                    },
                    StoreOp::IncrAttempts {
                        fingerprint: fingerprint.to_string(),
                    },
                ]);
                if let Err(e) = requeued {
                    warn!(queue = %self, %fingerprint, error = %e, "failed to fold duplicate lease");
                    return;
                }
                self.publish(QueueEvent::Duplicate { message });
            }
            Ok(false) => {
                warn!(queue = %self, %fingerprint, attempts, "retrying expired message");
                if let Err(e) = self.bump_and_requeue(fingerprint, now) {
                    warn!(queue = %self, %fingerprint, error = %e, "failed to requeue expired message");
                    return;
                }
                self.publish(QueueEvent::Retried);
            }
            Err(e) => {
                warn!(queue = %self, %fingerprint, error = %e, "failed to check ready membership");
            }
        }
    }

    fn bump_and_requeue(&self, fingerprint: &str, now: u64) -> QueueResult<()> {
        self.store.apply(vec![
            StoreOp::IncrAttempts {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::RemoveUnacked {
                fingerprint: fingerprint.to_string(),
            },
            StoreOp::AddReady {
                fingerprint: fingerprint.to_string(),
                score: now,
            },
        ])?;
        Ok(())
    }
}

/// Background recovery sweep: a named thread calling [`Queue::retry`] every
/// `sweep_interval_ms` until stopped or dropped. Sweeps are idempotent, so
/// one sweeper per process against a shared store is fine.
pub struct Sweeper {
    shutdown: crossbeam_channel::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(queue: Arc<Queue>) -> std::io::Result<Self> {
        let interval = Duration::from_millis(queue.options().sweep_interval_ms);
        let (shutdown, signal) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(format!("{}-sweeper", queue.name()))
            .spawn(move || {
                info!(queue = %queue, "sweeper started");
                loop {
                    match signal.recv_timeout(interval) {
                        Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                            match queue.retry() {
                                Ok(reclaimed) if reclaimed > 0 => {
                                    info!(queue = %queue, reclaimed, "sweep reclaimed expired leases");
                                }
                                Ok(_) => {}
                                Err(e) => warn!(queue = %queue, error = %e, "sweep pass failed"),
                            }
                        }
                    }
                }
                info!(queue = %queue, "sweeper stopped");
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the sweep thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
