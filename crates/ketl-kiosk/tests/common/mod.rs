//! Shared helpers for the kiosk integration tests.
//!
//! Everything runs on simulated hardware and the scripted ledger:
//!
//! - [`start_kiosk`] brings up a full [`Kiosk`] and returns the probes needed
//!   to drive and observe it
//! - [`orchestrator`] builds a bare [`AuthenticationOrchestrator`] for
//!   step-by-step attempt tests
//! - [`RecordingFeedback`] remembers every feedback signal
//!
//! Tests are meant to run with `start_paused = true`; every wait is bounded by
//! [`REPORT_WAIT`] of virtual time.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ketl_core::{CardUid, Feedback, KioskConfig, ReaderConfig};
use ketl_hardware::{
    AnyReader, OutputProbe, ReaderBackend, SimulatedOutput, SimulatedReader, SimulatedReaderHandle,
};
use ketl_kiosk::{
    AttemptReport, AttemptSettings, AuthenticationOrchestrator, DispenseController, FeedbackSink,
    Kiosk, KioskHandle, MachineState,
};
use ketl_network::mock::MockLedger;
use tokio::sync::broadcast;

pub const CARD_A: &str = "04A1B2C3";
pub const CARD_B: &str = "04D4E5F6";
pub const SCENARIO_CHALLENGE: &str = "00112233445566778899AABBCCDDEEFF";

/// Longest a test waits for an attempt to finish.
pub const REPORT_WAIT: Duration = Duration::from_secs(60);

pub fn uid(hex: &str) -> CardUid {
    CardUid::from_hex(hex).unwrap()
}

/// Feedback sink that records what it was asked to show, and how many pours
/// had started at that moment when watching a relay.
#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    signals: Arc<Mutex<Vec<(Feedback, u32)>>>,
    relay: Arc<Mutex<Option<OutputProbe>>>,
}

impl RecordingFeedback {
    pub fn watch_relay(&self, relay: OutputProbe) {
        *self.relay.lock().unwrap() = Some(relay);
    }

    pub fn signals(&self) -> Vec<Feedback> {
        self.signals.lock().unwrap().iter().map(|(f, _)| *f).collect()
    }

    /// Relay activations seen when each signal was given.
    pub fn pours_at_signal(&self) -> Vec<u32> {
        self.signals.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }
}

impl FeedbackSink for RecordingFeedback {
    async fn signal(&self, feedback: Feedback) {
        let pours = self
            .relay
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, OutputProbe::activations);
        self.signals.lock().unwrap().push((feedback, pours));
    }
}

pub async fn simulated_reader() -> (AnyReader, SimulatedReaderHandle) {
    let (mut reader, handle) = SimulatedReader::new();
    reader.initialize(&ReaderConfig::default()).await.unwrap();
    (AnyReader::Simulated(reader), handle)
}

/// A running kiosk and everything needed to poke at it.
pub struct TestKiosk {
    pub handle: KioskHandle,
    pub card: SimulatedReaderHandle,
    pub ledger: MockLedger,
    pub dispenser: OutputProbe,
    pub feedback: RecordingFeedback,
    pub state: Arc<MachineState>,
    pub reports: broadcast::Receiver<AttemptReport>,
}

impl TestKiosk {
    /// Wait for the next finished attempt.
    pub async fn next_report(&mut self) -> AttemptReport {
        tokio::time::timeout(REPORT_WAIT, self.reports.recv())
            .await
            .expect("no attempt finished in time")
            .expect("report channel closed")
    }

    /// Assert that no attempt finishes within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        let outcome = tokio::time::timeout(window, self.reports.recv()).await;
        assert!(outcome.is_err(), "unexpected attempt: {outcome:?}");
    }
}

pub async fn start_kiosk(config: KioskConfig, ledger: MockLedger) -> TestKiosk {
    let (reader, card) = simulated_reader().await;
    start_kiosk_with_reader(config, ledger, reader, card)
}

pub fn start_kiosk_with_reader(
    config: KioskConfig,
    ledger: MockLedger,
    reader: AnyReader,
    card: SimulatedReaderHandle,
) -> TestKiosk {
    let (pin, dispenser) = SimulatedOutput::new("dispenser");
    let feedback = RecordingFeedback::default();
    feedback.watch_relay(dispenser.clone());

    let kiosk = Kiosk::new(config, reader, ledger.clone(), pin, feedback.clone());
    let state = kiosk.state();
    let handle = kiosk.start();
    let reports = handle.subscribe();

    TestKiosk {
        handle,
        card,
        ledger,
        dispenser,
        feedback,
        state,
        reports,
    }
}

/// Orchestrator over simulated hardware, without the polling loop.
pub struct TestOrchestrator {
    pub orchestrator: AuthenticationOrchestrator<MockLedger, SimulatedOutput, RecordingFeedback>,
    pub card: SimulatedReaderHandle,
    pub ledger: MockLedger,
    pub dispenser: OutputProbe,
    pub feedback: RecordingFeedback,
    pub state: Arc<MachineState>,
}

impl TestOrchestrator {
    /// Claim the machine and run one attempt for `hex`.
    pub async fn tap(&self, hex: &str) -> AttemptReport {
        self.card.present(uid(hex));
        let guard = self.state.try_claim().expect("machine busy");
        let report = self.orchestrator.run(uid(hex), guard).await;
        assert!(!self.state.is_processing(), "guard not released");
        report
    }
}

pub async fn orchestrator(config: &KioskConfig, ledger: MockLedger) -> TestOrchestrator {
    let (reader, card) = simulated_reader().await;
    let (pin, dispenser) = SimulatedOutput::new("dispenser");
    let feedback = RecordingFeedback::default();
    feedback.watch_relay(dispenser.clone());
    let state = Arc::new(MachineState::new());

    let orchestrator = AuthenticationOrchestrator::new(
        AttemptSettings::from(config),
        Arc::new(ledger.clone()),
        Arc::new(tokio::sync::Mutex::new(reader)),
        DispenseController::new(pin),
        feedback.clone(),
        Arc::clone(&state),
    );

    TestOrchestrator {
        orchestrator,
        card,
        ledger,
        dispenser,
        feedback,
        state,
    }
}
