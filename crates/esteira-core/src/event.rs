use crate::message::Message;

/// Lifecycle events fired for every queue state transition. Consumed by
/// metrics/observability sinks; the engine makes no decisions based on them.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A new entry was inserted into the ready structure.
    Pushed { message: Message },
    /// A push or sweep found an identical message already present.
    Duplicate { message: Message },
    Acknowledged,
    /// A poll cycle completed, whatever its outcome.
    Polled,
    /// A message is about to reach a consumer. `lag_ms` is the time between
    /// its scheduled delivery and now.
    Processing { message: Message, lag_ms: u64 },
    /// An expired lease was returned to ready.
    Retried,
    /// A message exhausted its attempt budget and was dead-lettered.
    Dead,
    Rescheduled { message: Message },
    /// A reschedule targeted a message absent from the ready structure.
    NotFound { message: Message },
    /// A poll found due candidates but every lock attempt failed.
    LockFailed,
    /// A recovery sweep pass completed.
    Swept,
}

impl QueueEvent {
    /// Stable name used in logs and metric attributes.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Pushed { .. } => "pushed",
            QueueEvent::Duplicate { .. } => "duplicate",
            QueueEvent::Acknowledged => "acknowledged",
            QueueEvent::Polled => "polled",
            QueueEvent::Processing { .. } => "processing",
            QueueEvent::Retried => "retried",
            QueueEvent::Dead => "dead",
            QueueEvent::Rescheduled { .. } => "rescheduled",
            QueueEvent::NotFound { .. } => "not_found",
            QueueEvent::LockFailed => "lock_failed",
            QueueEvent::Swept => "swept",
        }
    }
}

/// Observer for queue lifecycle events. Implementations must be cheap and
/// non-blocking; events fire inline on the hot path.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &QueueEvent);
}
