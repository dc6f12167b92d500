//! Bounded FIFO admission queue of task ids.
//!
//! Admission reserves a slot before the task record is written, so a full
//! queue rejects the request without leaving a record behind. Withdrawn
//! tasks keep their slot until a dispatcher pops them and skips them.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Permit};
use tokio::sync::Mutex;

use imagegen_core::types::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("admission queue is full")]
    Full,

    /// The consuming side has stopped.
    #[error("admission queue is closed")]
    Closed,
}

pub struct AdmissionQueue {
    tx: mpsc::Sender<TaskId>,
    rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
    capacity: usize,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity,
        }
    }

    /// Reserve one slot. The slot is released if the permit is dropped
    /// without sending.
    pub fn reserve(&self) -> Result<Permit<'_, TaskId>, AdmissionError> {
        self.tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => AdmissionError::Full,
            TrySendError::Closed(()) => AdmissionError::Closed,
        })
    }

    /// Hand the consuming side to the dispatcher loop. Only the first call
    /// gets it.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<TaskId>> {
        self.rx.lock().await.take()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids currently waiting, including withdrawn ones not yet popped.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
