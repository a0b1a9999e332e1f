use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::message::Message;
use crate::queue::Queue;

/// Sink invoked when a message exhausts its attempt budget. Handlers run
/// synchronously before the message is purged; the queue makes no
/// assumption about what they do.
pub trait DeadMessageHandler: Send + Sync {
    fn handle(&self, queue: &Queue, message: &Message);
}

/// Handler that re-pushes dead messages onto another queue so they can be
/// inspected and redriven. The target must be backed by its own store;
/// sharing the source queue's store would collide on fingerprints.
///
/// Attempt bookkeeping is reset on the way in; otherwise a message that
/// died on `max_attempts` would be dead again before its first delivery.
pub struct DeadLetterQueue {
    target: Arc<Queue>,
}

impl DeadLetterQueue {
    pub fn new(target: Arc<Queue>) -> Self {
        Self { target }
    }
}

impl DeadMessageHandler for DeadLetterQueue {
    fn handle(&self, queue: &Queue, message: &Message) {
        let mut message = message.clone();
        message.attributes.attempts = 0;
        warn!(
            source = %queue,
            target = %self.target,
            kind = %message.kind,
            "dead-lettering message"
        );
        if let Err(e) = self.target.push(&message, Duration::ZERO) {
            error!(
                source = %queue,
                target = %self.target,
                error = %e,
                "failed to move dead message to the dead-letter queue"
            );
        }
    }
}
