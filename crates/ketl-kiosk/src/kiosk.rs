//! Kiosk runtime: wires the detector, the attempt dispatcher and the
//! heartbeat together.
//!
//! # Lifecycle
//!
//! 1. Build a [`Kiosk`] from the configuration, an initialized reader, a
//!    ledger, the dispenser pin and a feedback sink
//! 2. [`Kiosk::start`] spawns the long-lived tasks and returns a [`KioskHandle`]
//! 3. Subscribe to [`AttemptReport`]s if needed
//! 4. [`KioskHandle::shutdown`] stops the loops and waits for the attempt in
//!    flight, if any
//!
//! # Examples
//!
//! ```no_run
//! use ketl_core::{KioskConfig, ReaderConfig};
//! use ketl_hardware::{AnyReader, ReaderBackend, SimulatedOutput, SimulatedReader};
//! use ketl_kiosk::{Kiosk, LogFeedback};
//! use ketl_network::mock::MockLedger;
//!
//! #[tokio::main]
//! async fn main() -> ketl_kiosk::Result<()> {
//!     let (mut reader, _card) = SimulatedReader::new();
//!     reader.initialize(&ReaderConfig::default()).await?;
//!     let (dispenser, _probe) = SimulatedOutput::new("dispenser");
//!
//!     let kiosk = Kiosk::new(
//!         KioskConfig::default(),
//!         AnyReader::Simulated(reader),
//!         MockLedger::new(),
//!         dispenser,
//!         LogFeedback,
//!     );
//!     let handle = kiosk.start();
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown().await
//! }
//! ```

use std::sync::Arc;

use embedded_hal::digital::OutputPin;
use ketl_core::KioskConfig;
use ketl_hardware::AnyReader;
use ketl_network::Ledger;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::dispenser::DispenseController;
use crate::feedback::FeedbackSink;
use crate::heartbeat::HeartbeatReporter;
use crate::orchestrator::{AttemptReport, AttemptSettings, AuthenticationOrchestrator};
use crate::presence::{PresenceDetector, PresenceEvent};
use crate::{KioskError, MachineState, Result};

const EVENT_CHANNEL_CAPACITY: usize = 8;
const REPORT_CHANNEL_CAPACITY: usize = 32;

pub struct Kiosk<L, P, F> {
    config: KioskConfig,
    reader: AnyReader,
    ledger: Arc<L>,
    dispenser: DispenseController<P>,
    feedback: F,
    state: Arc<MachineState>,
}

impl<L, P, F> Kiosk<L, P, F>
where
    L: Ledger,
    P: OutputPin + Send + 'static,
    F: FeedbackSink,
{
    /// `reader` must already be initialized.
    pub fn new(config: KioskConfig, reader: AnyReader, ledger: L, dispenser: P, feedback: F) -> Self {
        Self {
            config,
            reader,
            ledger: Arc::new(ledger),
            dispenser: DispenseController::new(dispenser),
            feedback,
            state: Arc::new(MachineState::new()),
        }
    }

    /// Shared machine state, for statistics and inspection.
    pub fn state(&self) -> Arc<MachineState> {
        Arc::clone(&self.state)
    }

    /// Spawn the detector, the dispatcher and the heartbeat.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mut self) -> KioskHandle {
        if let Err(e) = self.dispenser.park() {
            warn!(error = %e, "Could not park the dispenser relay");
        }

        let cancel = CancellationToken::new();
        let attempts = TaskTracker::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        let reader = Arc::new(Mutex::new(self.reader));
        let detector = PresenceDetector::new(Arc::clone(&reader), Arc::clone(&self.state), &self.config);
        let heartbeat =
            HeartbeatReporter::new(Arc::clone(&self.ledger), Arc::clone(&self.state), &self.config);
        let orchestrator = Arc::new(AuthenticationOrchestrator::new(
            AttemptSettings::from(&self.config),
            self.ledger,
            reader,
            self.dispenser,
            self.feedback,
            Arc::clone(&self.state),
        ));

        info!(
            machine_id = %self.config.machine_id,
            tea_type = %self.config.tea_type,
            price = self.config.tea_price,
            "Kiosk starting"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(detector.run(event_tx, cancel.clone()));
        tasks.spawn(heartbeat.run(cancel.clone()));
        tasks.spawn(dispatch(
            event_rx,
            orchestrator,
            attempts.clone(),
            report_tx.clone(),
            Arc::clone(&self.state),
        ));

        KioskHandle {
            cancel,
            tasks,
            attempts,
            reports: report_tx,
            state: self.state,
        }
    }
}

/// Turn presence events into attempt tasks.
///
/// Ends when the detector drops its sender.
async fn dispatch<L, P, F>(
    mut events: mpsc::Receiver<PresenceEvent>,
    orchestrator: Arc<AuthenticationOrchestrator<L, P, F>>,
    attempts: TaskTracker,
    reports: broadcast::Sender<AttemptReport>,
    state: Arc<MachineState>,
) where
    L: Ledger,
    P: OutputPin + Send + 'static,
    F: FeedbackSink,
{
    while let Some(event) = events.recv().await {
        match event {
            PresenceEvent::Arrived { uid, guard } => {
                state.record_attempt();
                let orchestrator = Arc::clone(&orchestrator);
                let reports = reports.clone();
                attempts.spawn(async move {
                    let report = orchestrator.run(uid, guard).await;
                    // No subscribers is fine.
                    let _ = reports.send(report);
                });
            }
            PresenceEvent::Removed { uid } => debug!(uid = %uid, "Card left the field"),
        }
    }
    debug!("Attempt dispatcher stopped");
}

/// Handle to a running kiosk.
pub struct KioskHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    attempts: TaskTracker,
    reports: broadcast::Sender<AttemptReport>,
    state: Arc<MachineState>,
}

impl KioskHandle {
    /// Receive reports of attempts finishing after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AttemptReport> {
        self.reports.subscribe()
    }

    pub fn state(&self) -> Arc<MachineState> {
        Arc::clone(&self.state)
    }

    /// Token that stops the kiosk when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling and heartbeats, then wait for the attempt in flight.
    ///
    /// # Errors
    ///
    /// Returns `KioskError::TaskPanicked` if a long-lived task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Kiosk shutting down");
        self.cancel.cancel();

        let mut panicked = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    error!(error = %e, "Kiosk task panicked");
                    panicked += 1;
                }
            }
        }

        self.attempts.close();
        if !self.attempts.is_empty() {
            info!("Waiting for the attempt in flight");
        }
        self.attempts.wait().await;

        let stats = self.state.statistics();
        info!(
            daily = stats.daily_dispensed,
            total = stats.total_dispensed,
            auth_failures = stats.auth_failures,
            attempts = stats.attempts,
            "Kiosk stopped"
        );

        if panicked > 0 {
            return Err(KioskError::TaskPanicked { count: panicked });
        }
        Ok(())
    }
}
