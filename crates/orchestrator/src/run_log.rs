//! Per-run status/log stream.
//!
//! Events are stamped with a run-local sequence number, kept in a bounded
//! history and broadcast to live subscribers. Late observers call
//! [`RunLog::history_plus_stream`] to replay what they missed and then
//! follow the run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use events::{Event, EventBus, EventEnvelope};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

const HISTORY_LIMIT: usize = 4096;

pub struct RunLog {
    run_id: Uuid,
    sequence: AtomicU64,
    history: Mutex<VecDeque<EventEnvelope>>,
    bus: EventBus,
}

impl RunLog {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            sequence: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(64)),
            bus: EventBus::new(HISTORY_LIMIT),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record an event and broadcast it to subscribers.
    ///
    /// Sequence assignment and history append happen under one lock, so
    /// history order always matches sequence order.
    pub fn emit(&self, event: Event) -> EventEnvelope {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope::new(sequence, event);

        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(envelope.clone());
        self.bus.publish(envelope.clone());
        envelope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    pub fn history(&self) -> Vec<EventEnvelope> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Replay recorded events, then follow live ones.
    ///
    /// Events emitted between the snapshot and the subscription are not
    /// duplicated: the live half skips anything at or below the last
    /// replayed sequence. The stream ends after the run's terminal event.
    pub fn history_plus_stream(&self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let (history, rx) = {
            let guard = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let rx = self.bus.subscribe();
            (guard.iter().cloned().collect::<Vec<_>>(), rx)
        };
        let next_sequence = history.last().map(|e| e.sequence + 1).unwrap_or(0);

        let hist_stream = futures::stream::iter(history);
        let live_stream = BroadcastStream::new(rx).filter_map(move |res| async move {
            match res {
                Ok(envelope) => Some(envelope).filter(|e| e.sequence >= next_sequence),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Run log observer lagged, events dropped");
                    None
                }
            }
        });

        let merged = Box::pin(hist_stream.chain(live_stream));
        futures::stream::unfold((merged, false), |(mut inner, finished)| async move {
            if finished {
                return None;
            }
            let envelope = inner.next().await?;
            let finished = envelope.event.is_terminal();
            Some((envelope, (inner, finished)))
        })
    }

    /// Number of events emitted so far.
    pub fn len(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .field("events", &self.len())
            .finish()
    }
}
