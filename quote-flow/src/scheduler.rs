//! Message scheduler: paced, in-order delivery of transcript messages.
//!
//! Each session gets one worker task fed by an unbounded channel, so its
//! messages are delivered one at a time in enqueue order. Before a paced
//! message the worker raises the "typing" signal and sleeps; after delivery
//! it re-enables input once nothing is pending. Cancelling a session aborts
//! its worker, drops whatever was still queued and forgets the transcript.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FlowConfig;
use crate::message::{Message, Pace};

/// What the front end should show around the input box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignal {
    pub input_enabled: bool,
    /// A system message is being "typed".
    pub typing: bool,
}

impl InputSignal {
    pub const IDLE: InputSignal = InputSignal {
        input_enabled: true,
        typing: false,
    };
}

struct Envelope {
    generation: u64,
    message: Message,
}

/// State shared between a session's queue handle and its worker.
struct QueueShared {
    /// Queued messages plus outstanding holds. The signal is only published
    /// while this lock is held so it never disagrees with the count.
    pending: Mutex<usize>,
    transcript: Mutex<Vec<Message>>,
    signal: watch::Sender<InputSignal>,
}

impl QueueShared {
    fn new() -> Self {
        let (signal, _rx) = watch::channel(InputSignal::IDLE);
        Self {
            pending: Mutex::new(0),
            transcript: Mutex::new(Vec::new()),
            signal,
        }
    }

    fn pending(&self) -> usize {
        self.pending.lock().map(|p| *p).unwrap_or(0)
    }

    fn add_pending(&self, n: usize) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        *pending += n;
        let typing = self.signal.borrow().typing;
        self.signal.send_replace(InputSignal {
            input_enabled: false,
            typing,
        });
    }

    fn finish_one(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        *pending = pending.saturating_sub(1);
        self.signal.send_replace(InputSignal {
            input_enabled: *pending == 0,
            typing: false,
        });
    }

    fn set_typing(&self) {
        let Ok(_pending) = self.pending.lock() else {
            return;
        };
        self.signal.send_replace(InputSignal {
            input_enabled: false,
            typing: true,
        });
    }

    fn deliver(&self, mut message: Message) {
        message.timestamp = Utc::now();
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.push(message);
        }
    }
}

struct SessionQueue {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
    shared: Arc<QueueShared>,
    worker: JoinHandle<()>,
}

impl Drop for SessionQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Keeps a session's input disabled while alive, e.g. across a backend call.
pub struct HoldGuard {
    shared: Arc<QueueShared>,
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.shared.finish_one();
    }
}

pub struct MessageScheduler {
    typing_delay_ms: RangeInclusive<u64>,
    loading_delay: Duration,
    queues: DashMap<String, SessionQueue>,
}

impl MessageScheduler {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            typing_delay_ms: config.typing_delay_ms.clone(),
            loading_delay: config.loading_delay,
            queues: DashMap::new(),
        }
    }

    /// Opens a fresh queue for `session_id`, cancelling any previous one.
    pub fn open(&self, session_id: &str, generation: u64) {
        let shared = Arc::new(QueueShared::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            rx,
            shared.clone(),
            generation,
            self.typing_delay_ms.clone(),
            self.loading_delay,
        ));
        let queue = SessionQueue {
            generation,
            tx,
            shared,
            worker,
        };
        if let Some(previous) = self.queues.insert(session_id.to_string(), queue) {
            debug!(
                session_id = %session_id,
                generation = previous.generation,
                "Replaced message queue"
            );
        }
    }

    /// Opens a queue for `session_id` unless one is already open.
    pub fn ensure_open(&self, session_id: &str, generation: u64) {
        if !self.queues.contains_key(session_id) {
            self.open(session_id, generation);
        }
    }

    /// Number of sessions with an open queue.
    pub fn session_count(&self) -> usize {
        self.queues.len()
    }

    /// Drops the session's queue: pending messages are abandoned and the
    /// transcript is forgotten.
    pub fn cancel(&self, session_id: &str) {
        if let Some((_, queue)) = self.queues.remove(session_id) {
            let dropped = queue.shared.pending();
            info!(
                session_id = %session_id,
                generation = queue.generation,
                dropped,
                "Message queue cancelled"
            );
        }
    }

    /// Appends messages to the session's queue.
    ///
    /// Messages tagged with a generation other than the queue's belong to a
    /// superseded conversation and are dropped.
    pub fn enqueue(&self, session_id: &str, generation: u64, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        self.ensure_open(session_id, generation);
        let Some(queue) = self.queues.get(session_id) else {
            return;
        };
        if queue.generation != generation {
            warn!(
                session_id = %session_id,
                queue_generation = queue.generation,
                message_generation = generation,
                count = messages.len(),
                "Dropping messages for superseded conversation"
            );
            return;
        }

        queue.shared.add_pending(messages.len());
        for message in messages {
            if queue.tx.send(Envelope { generation, message }).is_err() {
                // worker is gone; keep the counter honest
                queue.shared.finish_one();
            }
        }
    }

    /// Disables input until the returned guard is dropped.
    pub fn hold(&self, session_id: &str) -> Option<HoldGuard> {
        let queue = self.queues.get(session_id)?;
        queue.shared.add_pending(1);
        Some(HoldGuard {
            shared: queue.shared.clone(),
        })
    }

    pub fn input_enabled(&self, session_id: &str) -> bool {
        self.queues
            .get(session_id)
            .map(|q| q.shared.pending() == 0)
            .unwrap_or(true)
    }

    /// Current input signal; idle for sessions without a queue.
    pub fn signal(&self, session_id: &str) -> InputSignal {
        self.queues
            .get(session_id)
            .map(|q| *q.shared.signal.borrow())
            .unwrap_or(InputSignal::IDLE)
    }

    pub fn subscribe(&self, session_id: &str) -> Option<watch::Receiver<InputSignal>> {
        self.queues
            .get(session_id)
            .map(|q| q.shared.signal.subscribe())
    }

    /// Messages delivered so far, oldest first.
    pub fn transcript(&self, session_id: &str) -> Vec<Message> {
        self.queues
            .get(session_id)
            .and_then(|q| q.shared.transcript.lock().ok().map(|t| t.clone()))
            .unwrap_or_default()
    }

    /// Resolves once the session's queue has drained and nothing holds it.
    pub async fn wait_idle(&self, session_id: &str) {
        let Some(mut rx) = self.subscribe(session_id) else {
            return;
        };
        // an Err means the queue was cancelled, which also ends the wait
        let _ = rx.wait_for(|signal| signal.input_enabled).await;
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<QueueShared>,
    generation: u64,
    typing_delay_ms: RangeInclusive<u64>,
    loading_delay: Duration,
) {
    while let Some(envelope) = rx.recv().await {
        if envelope.generation != generation {
            shared.finish_one();
            continue;
        }

        let delay = match envelope.message.pace {
            Pace::Immediate => Duration::ZERO,
            Pace::Typing => {
                Duration::from_millis(rand::rng().random_range(typing_delay_ms.clone()))
            }
            Pace::Loading => loading_delay,
        };
        if !delay.is_zero() {
            shared.set_typing();
            tokio::time::sleep(delay).await;
        }

        shared.deliver(envelope.message);
        shared.finish_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paced_config() -> FlowConfig {
        FlowConfig {
            typing_delay_ms: 600..=1200,
            loading_delay: Duration::from_millis(2500),
            ..FlowConfig::default()
        }
    }

    fn contents(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let scheduler = MessageScheduler::new(&FlowConfig::instant());
        scheduler.open("s1", 0);
        scheduler.enqueue(
            "s1",
            0,
            vec![
                Message::user("hi"),
                Message::system("one"),
                Message::system("two"),
            ],
        );
        scheduler.enqueue("s1", 0, vec![Message::system("three")]);
        scheduler.wait_idle("s1").await;

        assert_eq!(contents(&scheduler.transcript("s1")), ["hi", "one", "two", "three"]);
        assert!(scheduler.input_enabled("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn input_stays_disabled_until_queue_drains() {
        let scheduler = MessageScheduler::new(&paced_config());
        scheduler.open("s1", 0);
        let mut signal = scheduler.subscribe("s1").unwrap();

        scheduler.enqueue("s1", 0, vec![Message::system("one"), Message::system("two")]);
        assert!(!scheduler.input_enabled("s1"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.transcript("s1").is_empty());
        assert!(signal.borrow_and_update().typing);

        // two messages at most 1200ms each
        tokio::time::sleep(Duration::from_millis(2400)).await;
        assert_eq!(contents(&scheduler.transcript("s1")), ["one", "two"]);
        assert!(scheduler.input_enabled("s1"));
        assert_eq!(*signal.borrow(), InputSignal::IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_message_uses_fixed_delay() {
        let scheduler = MessageScheduler::new(&paced_config());
        scheduler.open("s1", 0);
        scheduler.enqueue("s1", 0, vec![Message::system("loading").paced(Pace::Loading)]);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(scheduler.transcript("s1").is_empty());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(contents(&scheduler.transcript("s1")), ["loading"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_abandons_pending_messages() {
        let scheduler = MessageScheduler::new(&paced_config());
        scheduler.open("s1", 0);
        scheduler.enqueue("s1", 0, vec![Message::system("old one"), Message::system("old two")]);

        scheduler.cancel("s1");
        scheduler.open("s1", 1);
        // a late message from the old conversation
        scheduler.enqueue("s1", 0, vec![Message::system("stale")]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(scheduler.transcript("s1").is_empty());
        assert!(scheduler.input_enabled("s1"));

        scheduler.enqueue("s1", 1, vec![Message::system("fresh")]);
        scheduler.wait_idle("s1").await;
        assert_eq!(contents(&scheduler.transcript("s1")), ["fresh"]);
    }

    #[tokio::test]
    async fn hold_keeps_input_disabled() {
        let scheduler = MessageScheduler::new(&FlowConfig::instant());
        scheduler.open("s1", 0);
        let guard = scheduler.hold("s1").unwrap();
        scheduler.enqueue("s1", 0, vec![Message::system("one")]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.transcript("s1").len(), 1);
        assert!(!scheduler.input_enabled("s1"));

        drop(guard);
        assert!(scheduler.input_enabled("s1"));
    }

    #[tokio::test]
    async fn unknown_session_reports_idle() {
        let scheduler = MessageScheduler::new(&FlowConfig::instant());
        assert!(scheduler.input_enabled("missing"));
        assert!(scheduler.transcript("missing").is_empty());
        assert!(scheduler.hold("missing").is_none());
        scheduler.wait_idle("missing").await;
    }
}
