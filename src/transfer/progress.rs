//! Transfer progress callbacks
//!
//! Handlers receive one [`TransferEvent::Started`] per file, zero or more
//! `Advanced` events as chunks land, and one `Finished` on completion.
//! Handlers must be cheap; they run inline with the transfer.

use std::sync::Mutex;
use std::sync::PoisonError;

/// Progress notification for one file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started {
        file_name: String,
        /// Unknown when the server sends no length
        total_bytes: Option<u64>,
    },
    Advanced {
        file_name: String,
        transferred_bytes: u64,
        total_bytes: Option<u64>,
    },
    Finished {
        file_name: String,
        transferred_bytes: u64,
    },
}

impl TransferEvent {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Started { file_name, .. }
            | Self::Advanced { file_name, .. }
            | Self::Finished { file_name, .. } => file_name,
        }
    }
}

/// Receives transfer events
pub trait ProgressHandler: Send + Sync {
    fn on_event(&self, event: TransferEvent);
}

/// Handler that discards everything
#[derive(Debug, Default)]
pub struct NoOpProgress;

impl ProgressHandler for NoOpProgress {
    fn on_event(&self, _event: TransferEvent) {}
}

/// Handler that records every event, for assertions in tests
#[derive(Debug, Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<TransferEvent>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressHandler for CollectingProgress {
    fn on_event(&self, event: TransferEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
