//! Best-effort audit trail.
//!
//! Events go onto a bounded queue drained by a detached writer task. Neither a
//! full queue nor a failing store ever reaches the caller: the event is
//! dropped and the loss is logged locally.

use std::time::Duration;

use log::{error, warn};
use rocket::tokio::{
    self,
    sync::mpsc::{self, error::TrySendError},
};

use crate::{
    model::db::AuditEvent,
    store::{within, StoreHandle},
};

#[derive(Clone)]
pub struct AuditLogger {
    queue: mpsc::Sender<AuditEvent>,
}

impl AuditLogger {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(store: StoreHandle, queue_size: usize, deadline: Duration) -> Self {
        let (queue, mut pending) = mpsc::channel::<AuditEvent>(queue_size.max(1));
        tokio::spawn(async move {
            while let Some(event) = pending.recv().await {
                if let Err(err) = within(deadline, store.insert_audit_event(&event)).await {
                    error!(
                        "Dropped audit event {:?} ({}): {err}",
                        event.event_type, event.id
                    );
                }
            }
        });
        Self { queue }
    }

    /// Queue an event for writing. Never blocks and never fails.
    pub fn record(&self, event: AuditEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Audit queue full, dropped {:?} ({})",
                    event.event_type, event.id
                );
            }
            Err(TrySendError::Closed(event)) => {
                warn!(
                    "Audit writer stopped, dropped {:?} ({})",
                    event.event_type, event.id
                );
            }
        }
    }
}
