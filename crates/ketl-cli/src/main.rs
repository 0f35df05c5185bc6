//! `ketl-kiosk`: run one tea kiosk.
//!
//! ```text
//! ketl-kiosk [config.json]
//! ```
//!
//! The configuration file defaults to `machine_config.json` in the working
//! directory and is created with defaults when missing. Without reader
//! hardware the kiosk runs on the simulated reader, driven from stdin.

mod console;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ketl_core::{KioskConfig, constants::DEFAULT_CONFIG_FILE};
use ketl_hardware::{OutputSet, select_reader};
use ketl_kiosk::{IndicatorPins, Kiosk, PinFeedback};
use ketl_network::HttpLedger;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init(Path::new("."))?;
    info!(version = ketl_core::VERSION, "UrbanKetl tea kiosk");

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path);

    let selected = select_reader(&config.reader_config()).await;
    let outputs = open_outputs(&config, selected.is_simulated());
    let ledger = HttpLedger::new(config.api_base_url.clone(), config.request_timeout())
        .context("building the ledger client")?;
    let feedback = PinFeedback::new(IndicatorPins {
        led_green: outputs.led_green,
        led_red: outputs.led_red,
        buzzer: outputs.buzzer,
    });

    let kiosk = Kiosk::new(config, selected.reader, ledger, outputs.dispenser, feedback);
    let state = kiosk.state();
    let handle = kiosk.start();
    let stop = handle.cancellation_token();

    if let Some(card) = selected.simulator {
        tokio::spawn(console::run(console::stdin_lines(), card, state, stop.clone()));
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Cannot listen for Ctrl-C");
            }
            info!("Interrupt received");
        }
        _ = stop.cancelled() => {}
    }

    handle.shutdown().await?;
    Ok(())
}

/// Load and validate the configuration, falling back to defaults.
fn load_config(path: &Path) -> KioskConfig {
    let loaded = KioskConfig::load_or_create(path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match loaded {
        Ok(config) => {
            info!(
                path = %path.display(),
                machine_id = %config.machine_id,
                api = %config.api_base_url,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unusable configuration, using defaults");
            KioskConfig::default()
        }
    }
}

/// Physical outputs only make sense next to a physical reader.
fn open_outputs(config: &KioskConfig, simulated_reader: bool) -> OutputSet {
    if simulated_reader {
        return OutputSet::simulated(&config.gpio_pins);
    }
    gpio_outputs(config)
}

#[cfg(feature = "hardware-spi")]
fn gpio_outputs(config: &KioskConfig) -> OutputSet {
    match OutputSet::open_gpio(&config.gpio_chip, &config.gpio_pins) {
        Ok(outputs) => {
            info!(chip = %config.gpio_chip, "GPIO outputs ready");
            outputs
        }
        Err(e) => {
            warn!(chip = %config.gpio_chip, error = %e, "GPIO unavailable, simulating outputs");
            OutputSet::simulated(&config.gpio_pins)
        }
    }
}

#[cfg(not(feature = "hardware-spi"))]
fn gpio_outputs(config: &KioskConfig) -> OutputSet {
    warn!("Built without GPIO support, simulating outputs");
    OutputSet::simulated(&config.gpio_pins)
}
