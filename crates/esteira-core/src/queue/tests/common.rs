use super::*;

/// Fixed test epoch, far enough from zero that clock arithmetic is obvious.
pub(super) const T0: u64 = 1_000_000;

/// Event sink that records everything it sees.
#[derive(Default)]
pub(super) struct RecordingSink {
    events: Mutex<Vec<QueueEvent>>,
}

impl RecordingSink {
    pub(super) fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name())
            .collect()
    }

    pub(super) fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &QueueEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Dead-letter handler that records the messages it receives.
#[derive(Default)]
pub(super) struct RecordingDeadHandler {
    messages: Mutex<Vec<Message>>,
}

impl RecordingDeadHandler {
    pub(super) fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

impl DeadMessageHandler for RecordingDeadHandler {
    fn handle(&self, _queue: &Queue, message: &Message) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

pub(super) struct TestQueue {
    pub(super) queue: Queue,
    pub(super) store: Arc<MemoryStore>,
    pub(super) clock: Arc<ManualClock>,
    pub(super) sink: Arc<RecordingSink>,
    pub(super) dead: Arc<RecordingDeadHandler>,
}

pub(super) fn test_setup() -> TestQueue {
    test_setup_with_options(QueueOptions::default())
}

pub(super) fn test_setup_with_options(options: QueueOptions) -> TestQueue {
    crate::telemetry::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(T0));
    let sink = Arc::new(RecordingSink::default());
    let dead = Arc::new(RecordingDeadHandler::default());
    let queue = Queue::new(
        "test-queue",
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&clock) as Arc<dyn crate::clock::Clock>,
        options,
        Arc::clone(&sink) as Arc<dyn EventSink>,
    )
    .with_dead_letter_handler(Arc::clone(&dead) as Arc<dyn DeadMessageHandler>);
    TestQueue {
        queue,
        store,
        clock,
        sink,
        dead,
    }
}

pub(super) fn test_message(stage: u32) -> Message {
    Message::new(
        "run_stage",
        serde_json::json!({"execution": "exec-1", "stage": stage}),
    )
}

/// The fingerprint a message is stored under when pushed fresh.
pub(super) fn latest_of(message: &Message) -> String {
    fingerprint(message).latest
}

/// Poll once expecting a delivery; returns the delivered message and leaves
/// the lease unacknowledged.
pub(super) fn poll_expect(queue: &Queue) -> Message {
    let mut delivered = None;
    queue
        .poll(|message, _ack| {
            delivered = Some(message.clone());
        })
        .unwrap();
    delivered.expect("poll should deliver a message")
}

/// Poll once expecting a delivery and acknowledge it.
pub(super) fn poll_and_ack(queue: &Queue) -> Message {
    let mut delivered = None;
    queue
        .poll(|message, ack| {
            delivered = Some(message.clone());
            ack.ack().unwrap();
        })
        .unwrap();
    delivered.expect("poll should deliver a message")
}
