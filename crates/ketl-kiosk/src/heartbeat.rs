//! Periodic liveness report to the ledger.
//!
//! The outcome of the last heartbeat is the machine's notion of being online.

use std::sync::Arc;
use std::time::Duration;

use ketl_core::KioskConfig;
use ketl_network::{HeartbeatReport, Ledger};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::MachineState;

pub struct HeartbeatReporter<L> {
    ledger: Arc<L>,
    state: Arc<MachineState>,
    machine_id: String,
    period: Duration,
    request_timeout: Duration,
}

impl<L: Ledger> HeartbeatReporter<L> {
    pub fn new(ledger: Arc<L>, state: Arc<MachineState>, config: &KioskConfig) -> Self {
        Self {
            ledger,
            state,
            machine_id: config.machine_id.clone(),
            period: config.heartbeat_period(),
            request_timeout: config.request_timeout(),
        }
    }

    /// Send one heartbeat and record whether the ledger answered.
    pub async fn beat_once(&self) -> bool {
        let stats = self.state.statistics();
        let report =
            HeartbeatReport::online(&self.machine_id, stats.daily_dispensed, stats.total_dispensed);

        let online = match timeout(self.request_timeout, self.ledger.heartbeat(&report)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Heartbeat produced no result");
                false
            }
            Err(_) => {
                debug!("Heartbeat timed out");
                false
            }
        };

        let was_online = self.state.set_online(online);
        match (was_online, online) {
            (false, true) => info!("Ledger reachable again"),
            (true, false) => warn!("Heartbeat failed, machine marked offline"),
            _ => debug!(online, "Heartbeat sent"),
        }
        online
    }

    /// Beat every period until cancelled. The first beat is immediate.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.beat_once().await;
                }
            }
        }
        debug!("Heartbeat reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_network::mock::{MockLedger, Scripted};

    fn reporter(ledger: &MockLedger, state: &Arc<MachineState>) -> HeartbeatReporter<MockLedger> {
        HeartbeatReporter::new(
            Arc::new(ledger.clone()),
            Arc::clone(state),
            &KioskConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marks_offline_and_recovers() {
        let ledger = MockLedger::new();
        let state = Arc::new(MachineState::new());
        let reporter = reporter(&ledger, &state);

        ledger.script_heartbeat(Scripted::NoResult);
        assert!(!reporter.beat_once().await);
        assert!(!state.is_online());

        assert!(reporter.beat_once().await);
        assert!(state.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_ledger_times_out() {
        let ledger = MockLedger::new();
        let state = Arc::new(MachineState::new());
        ledger.script_heartbeat(Scripted::Stall);

        assert!(!reporter(&ledger, &state).beat_once().await);
        assert!(!state.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_counters() {
        let ledger = MockLedger::new();
        let state = Arc::new(MachineState::new());
        state.record_dispense();
        state.record_dispense();

        reporter(&ledger, &state).beat_once().await;

        let sent = ledger.heartbeats();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].machine_id, "UK_0001");
        assert_eq!(sent[0].daily_dispensed, 2);
        assert_eq!(sent[0].total_dispensed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_beats_every_period() {
        let ledger = MockLedger::new();
        let state = Arc::new(MachineState::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter(&ledger, &state).run(cancel.clone()));

        // Immediate beat plus one per minute.
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(ledger.calls().heartbeat, 3);
    }
}
