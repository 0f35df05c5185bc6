//! Bench console for running without reader hardware.
//!
//! Reads one command per line from standard input:
//!
//! ```text
//! tap <hex uid>   present a card
//! remove          lift the card
//! stats           log the machine counters
//! quit            stop the kiosk
//! ```

use std::io::BufRead;
use std::sync::Arc;

use ketl_core::CardUid;
use ketl_hardware::SimulatedReaderHandle;
use ketl_kiosk::MachineState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LINE_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tap(CardUid),
    Remove,
    Stats,
    Quit,
}

impl Command {
    /// Parse one console line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match (verb.to_ascii_lowercase().as_str(), words.next()) {
            ("tap", Some(hex)) => {
                Command::Tap(CardUid::from_hex(hex).map_err(|e| e.to_string())?)
            }
            ("tap", None) => return Err("usage: tap <hex uid>".to_string()),
            ("remove", None) => Command::Remove,
            ("stats", None) => Command::Stats,
            ("quit" | "exit", None) => Command::Quit,
            _ => return Err(format!("unknown command '{}'", line.trim())),
        };

        if words.next().is_some() {
            return Err(format!("unexpected arguments in '{}'", line.trim()));
        }
        Ok(Some(command))
    }
}

/// Forward stdin lines from a dedicated thread.
///
/// The thread is detached: a pending read never holds up shutdown.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    let spawned = std::thread::Builder::new()
        .name("ketl-console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Console input unavailable");
    }
    rx
}

/// Execute console commands until input ends or the kiosk stops.
pub async fn run(
    mut lines: mpsc::Receiver<String>,
    card: SimulatedReaderHandle,
    state: Arc<MachineState>,
    stop: CancellationToken,
) {
    info!("Simulation console ready: tap <hex uid> | remove | stats | quit");

    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };

        match Command::parse(&line) {
            Ok(Some(Command::Tap(uid))) => {
                info!(uid = %uid, "Card placed on the simulated reader");
                card.present(uid);
            }
            Ok(Some(Command::Remove)) => {
                info!("Card lifted from the simulated reader");
                card.remove();
            }
            Ok(Some(Command::Stats)) => {
                let stats = state.statistics();
                info!(
                    daily = stats.daily_dispensed,
                    total = stats.total_dispensed,
                    auth_failures = stats.auth_failures,
                    attempts = stats.attempts,
                    online = state.is_online(),
                    "Machine statistics"
                );
            }
            Ok(Some(Command::Quit)) => {
                info!("Quit requested from the console");
                stop.cancel();
                break;
            }
            Ok(None) => {}
            Err(reason) => warn!(%reason, "Ignoring console input"),
        }
    }
}
