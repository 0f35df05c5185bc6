//! Card presence detection.
//!
//! One long-running loop polls the reader and turns raw reads into
//! [`PresenceEvent`]s:
//!
//! - a UID different from the current one, while the machine is idle, claims
//!   the processing flag and produces `Arrived`;
//! - the same UID again produces nothing;
//! - an empty read after a card produces `Removed`.
//!
//! While an attempt is in flight the reader is not polled at all, so a second
//! card cannot start a second attempt.

use std::sync::Arc;
use std::time::Duration;

use ketl_core::{CardUid, KioskConfig};
use ketl_hardware::{AnyReader, HardwareError, ReaderBackend};
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{MachineState, ProcessingGuard};

/// Reader shared between the detector and attempt tasks.
pub type SharedReader = Arc<Mutex<AnyReader>>;

#[derive(Debug)]
pub enum PresenceEvent {
    /// New card; the receiver owns the processing flag through `guard`.
    Arrived {
        uid: CardUid,
        guard: ProcessingGuard,
    },
    Removed {
        uid: CardUid,
    },
}

pub struct PresenceDetector {
    reader: SharedReader,
    state: Arc<MachineState>,
    poll_interval: Duration,
    /// Bound for one `read_uid`; the poll interval.
    read_timeout: Duration,
    error_backoff: Duration,
}

impl PresenceDetector {
    pub fn new(reader: SharedReader, state: Arc<MachineState>, config: &KioskConfig) -> Self {
        Self {
            reader,
            state,
            poll_interval: config.poll_interval(),
            read_timeout: config.poll_interval(),
            error_backoff: config.error_backoff(),
        }
    }

    /// Run a single detection step.
    ///
    /// # Errors
    ///
    /// Passes through unexpected reader failures; the loop backs off on them.
    pub async fn poll_once(&self) -> Result<Option<PresenceEvent>, HardwareError> {
        if self.state.is_processing() {
            return Ok(None);
        }

        let read = self.reader.lock().await.read_uid(self.read_timeout).await?;

        match read {
            Some(uid) => {
                if self.state.current_uid().as_ref() == Some(&uid) {
                    return Ok(None);
                }
                let Some(guard) = self.state.try_claim() else {
                    return Ok(None);
                };
                if let Some(previous) = self.state.replace_current_uid(Some(uid.clone())) {
                    debug!(previous = %previous, "Card swapped without a gap");
                }
                info!(uid = %uid, "Card detected");
                Ok(Some(PresenceEvent::Arrived { uid, guard }))
            }
            None => Ok(self.state.replace_current_uid(None).map(|uid| {
                info!(uid = %uid, "Card removed");
                PresenceEvent::Removed { uid }
            })),
        }
    }

    /// Poll until cancelled or until `events` is closed.
    pub async fn run(self, events: mpsc::Sender<PresenceEvent>, cancel: CancellationToken) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Card presence detector started"
        );

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                step = self.poll_once() => step,
            };

            let delay = match step {
                Ok(Some(event)) => {
                    if events.send(event).await.is_err() {
                        debug!("Event receiver gone");
                        break;
                    }
                    self.poll_interval
                }
                Ok(None) => self.poll_interval,
                Err(e) => {
                    warn!(error = %e, backoff_ms = self.error_backoff.as_millis() as u64, "Card read failed");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        info!("Card presence detector stopped");
    }
}
