//! In-process event bus between detection and remediation
//!
//! A multi-producer, single-consumer queue of [`AnomalyEvent`]s:
//! - FIFO per producer; clone the [`EventPublisher`] for additional producers
//! - Unbounded by default, or bounded with backpressure (publish waits)
//! - Never drops events; every wait can be cancelled by the shutdown signal

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::error::{PipelineError, Result};
use crate::models::AnomalyEvent;

#[derive(Debug, Clone)]
enum Sender {
    Bounded(mpsc::Sender<AnomalyEvent>),
    Unbounded(mpsc::UnboundedSender<AnomalyEvent>),
}

#[derive(Debug)]
enum Receiver {
    Bounded(mpsc::Receiver<AnomalyEvent>),
    Unbounded(mpsc::UnboundedReceiver<AnomalyEvent>),
}

/// Constructor for a connected publisher/consumer pair
pub struct EventBus;

impl EventBus {
    pub fn unbounded() -> (EventPublisher, EventConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::pair(Sender::Unbounded(tx), Receiver::Unbounded(rx), None)
    }

    /// Bounded bus; `capacity` must be at least 1
    pub fn bounded(capacity: usize) -> Result<(EventPublisher, EventConsumer)> {
        if capacity == 0 {
            return Err(PipelineError::config("bus capacity must be at least 1"));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self::pair(
            Sender::Bounded(tx),
            Receiver::Bounded(rx),
            Some(capacity),
        ))
    }

    /// Bounded when a capacity is given, unbounded otherwise
    pub fn with_capacity(capacity: Option<usize>) -> Result<(EventPublisher, EventConsumer)> {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Ok(Self::unbounded()),
        }
    }

    fn pair(
        tx: Sender,
        rx: Receiver,
        capacity: Option<usize>,
    ) -> (EventPublisher, EventConsumer) {
        let pending = Arc::new(AtomicUsize::new(0));
        (
            EventPublisher {
                tx,
                pending: pending.clone(),
                capacity,
            },
            EventConsumer { rx, pending },
        )
    }
}

/// Producer handle; cheap to clone
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Sender,
    pending: Arc<AtomicUsize>,
    capacity: Option<usize>,
}

impl EventPublisher {
    /// Publish an event, waiting for capacity on a bounded bus
    ///
    /// Fails with `Cancelled` if shutdown fires while waiting and with
    /// `BusClosed` once the consumer is gone.
    pub async fn publish(
        &self,
        event: AnomalyEvent,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        // Count before sending so the consumer never decrements first
        let mut guard = PendingGuard::new(&self.pending);

        match &self.tx {
            Sender::Unbounded(tx) => tx.send(event).map_err(|_| PipelineError::BusClosed)?,
            Sender::Bounded(tx) => {
                tokio::select! {
                    sent = tx.send(event) => sent.map_err(|_| PipelineError::BusClosed)?,
                    _ = shutdown.recv() => return Err(PipelineError::Cancelled),
                }
            }
        }

        guard.commit();
        Ok(())
    }

    /// Number of published events not yet consumed
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// `None` for an unbounded bus
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// A bounded bus with no free slot; the next publish would wait
    pub fn is_saturated(&self) -> bool {
        self.capacity
            .map_or(false, |capacity| self.pending() >= capacity)
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Sender::Bounded(tx) => tx.is_closed(),
            Sender::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Rolls back the pending count unless the send completed, including when
/// the publish future is dropped mid-wait
struct PendingGuard<'a> {
    pending: &'a AtomicUsize,
    committed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self {
            pending,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// The single consuming end, owned by the remediation task
#[derive(Debug)]
pub struct EventConsumer {
    rx: Receiver,
    pending: Arc<AtomicUsize>,
}

impl EventConsumer {
    /// Wait for the next event
    ///
    /// Fails with `Cancelled` when shutdown fires first and with `BusClosed`
    /// when every publisher is dropped and the queue is drained.
    pub async fn consume(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Result<AnomalyEvent> {
        let received = tokio::select! {
            // Drain queued events before honoring shutdown
            biased;
            event = self.recv() => event,
            _ = shutdown.recv() => return Err(PipelineError::Cancelled),
        };
        self.take(received)
    }

    /// Take an event if one is queued, without waiting
    pub fn try_consume(&mut self) -> Option<AnomalyEvent> {
        let event = match &mut self.rx {
            Receiver::Bounded(rx) => rx.try_recv().ok(),
            Receiver::Unbounded(rx) => rx.try_recv().ok(),
        };
        if event.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn recv(&mut self) -> Option<AnomalyEvent> {
        match &mut self.rx {
            Receiver::Bounded(rx) => rx.recv().await,
            Receiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn take(&self, received: Option<AnomalyEvent>) -> Result<AnomalyEvent> {
        let event = received.ok_or(PipelineError::BusClosed)?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Ok(event)
    }
}
