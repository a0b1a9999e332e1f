use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::event::{EventSink, QueueEvent};
use crate::queue::QueueState;

/// OTel instruments for queue lifecycle events. Register as the queue's
/// event sink to get per-transition counters and a delivery-lag histogram;
/// call [`QueueMetrics::record_state`] with [`crate::Queue::read_state`]
/// output on whatever cadence the deployment samples gauges.
pub struct QueueMetrics {
    queue: String,
    pushed: Counter<u64>,
    duplicate: Counter<u64>,
    acknowledged: Counter<u64>,
    polled: Counter<u64>,
    retried: Counter<u64>,
    dead: Counter<u64>,
    rescheduled: Counter<u64>,
    not_found: Counter<u64>,
    lock_failed: Counter<u64>,
    swept: Counter<u64>,
    delivery_lag_ms: Histogram<f64>,
    depth: Gauge<u64>,
    ready: Gauge<u64>,
    unacked: Gauge<u64>,
    orphaned: Gauge<i64>,
}

impl QueueMetrics {
    /// Create metrics from the global meter provider. If no provider is
    /// configured the instruments are no-op.
    pub fn new(queue: &str) -> Self {
        let meter = opentelemetry::global::meter("esteira");
        Self::from_meter(&meter, queue)
    }

    /// Create metrics from a specific meter (used in tests with an
    /// in-memory exporter).
    pub fn from_meter(meter: &Meter, queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            pushed: meter
                .u64_counter("esteira.messages.pushed")
                .with_description("Messages inserted into the ready structure")
                .build(),
            duplicate: meter
                .u64_counter("esteira.messages.duplicate")
                .with_description("Pushes or sweeps that found an identical message")
                .build(),
            acknowledged: meter
                .u64_counter("esteira.messages.acknowledged")
                .with_description("Messages acknowledged by consumers")
                .build(),
            polled: meter
                .u64_counter("esteira.queue.polls")
                .with_description("Poll cycles, regardless of outcome")
                .build(),
            retried: meter
                .u64_counter("esteira.messages.retried")
                .with_description("Expired leases returned to ready")
                .build(),
            dead: meter
                .u64_counter("esteira.messages.dead")
                .with_description("Messages dead-lettered after exhausting attempts")
                .build(),
            rescheduled: meter
                .u64_counter("esteira.messages.rescheduled")
                .with_description("Ready entries moved to a new delivery time")
                .build(),
            not_found: meter
                .u64_counter("esteira.messages.not_found")
                .with_description("Reschedules that targeted an absent message")
                .build(),
            lock_failed: meter
                .u64_counter("esteira.queue.lock_failed")
                .with_description("Polls that found candidates but lost every lock race")
                .build(),
            swept: meter
                .u64_counter("esteira.queue.sweeps")
                .with_description("Recovery sweep passes completed")
                .build(),
            delivery_lag_ms: meter
                .f64_histogram("esteira.messages.delivery_lag_ms")
                .with_description("Time between scheduled delivery and dispatch")
                .build(),
            depth: meter
                .u64_gauge("esteira.queue.depth")
                .with_description("Entries awaiting delivery")
                .build(),
            ready: meter
                .u64_gauge("esteira.queue.ready")
                .with_description("Entries already due")
                .build(),
            unacked: meter
                .u64_gauge("esteira.queue.unacked")
                .with_description("Entries delivered but not yet acknowledged")
                .build(),
            orphaned: meter
                .i64_gauge("esteira.queue.orphaned")
                .with_description("Stored payloads referenced by neither structure")
                .build(),
        }
    }

    pub fn record_state(&self, state: &QueueState) {
        let attrs = self.attrs();
        self.depth.record(state.depth, &attrs);
        self.ready.record(state.ready, &attrs);
        self.unacked.record(state.unacked, &attrs);
        self.orphaned.record(state.orphaned, &attrs);
    }

    fn attrs(&self) -> [KeyValue; 1] {
        [KeyValue::new("queue", self.queue.clone())]
    }
}

impl EventSink for QueueMetrics {
    fn publish(&self, event: &QueueEvent) {
        let attrs = self.attrs();
        match event {
            QueueEvent::Pushed { .. } => self.pushed.add(1, &attrs),
            QueueEvent::Duplicate { .. } => self.duplicate.add(1, &attrs),
            QueueEvent::Acknowledged => self.acknowledged.add(1, &attrs),
            QueueEvent::Polled => self.polled.add(1, &attrs),
            QueueEvent::Processing { lag_ms, .. } => {
                self.delivery_lag_ms.record(*lag_ms as f64, &attrs);
            }
            QueueEvent::Retried => self.retried.add(1, &attrs),
            QueueEvent::Dead => self.dead.add(1, &attrs),
            QueueEvent::Rescheduled { .. } => self.rescheduled.add(1, &attrs),
            QueueEvent::NotFound { .. } => self.not_found.add(1, &attrs),
            QueueEvent::LockFailed => self.lock_failed.add(1, &attrs),
            QueueEvent::Swept => self.swept.add(1, &attrs),
        }
    }
}
