//! Startup reader detection.
//!
//! Detection never fails the process: whatever goes wrong, the kiosk comes up
//! on the simulated backend and says so in the log.

use ketl_core::{ReaderConfig, ReaderSelection};
use tracing::{info, warn};

use crate::readers::AnyReader;
use crate::simulated::{SimulatedReader, SimulatedReaderHandle};
use crate::traits::ReaderBackend;
use crate::{HardwareError, Result};

/// Outcome of reader detection.
#[derive(Debug)]
pub struct SelectedReader {
    pub reader: AnyReader,
    /// Present only when the simulated backend was chosen.
    pub simulator: Option<SimulatedReaderHandle>,
}

impl SelectedReader {
    pub fn is_simulated(&self) -> bool {
        self.simulator.is_some()
    }
}

/// Bring up the reader named by `config.selection`.
///
/// `Auto` tries PC/SC, then SPI, then falls back to simulation. An explicit
/// hardware choice that fails also falls back to simulation.
pub async fn select_reader(config: &ReaderConfig) -> SelectedReader {
    let attempt = match config.selection {
        ReaderSelection::Auto => match try_pcsc(config).await {
            Ok(reader) => Ok(reader),
            Err(e) => {
                info!(error = %e, "No PC/SC reader, trying SPI");
                try_spi(config).await
            }
        },
        ReaderSelection::Acr122u => try_pcsc(config).await,
        ReaderSelection::Mcrn2 => try_spi(config).await,
        ReaderSelection::Simulated => return simulated(config).await,
    };

    match attempt {
        Ok(reader) => {
            info!(reader = reader.name(), kind = %reader.kind(), "Reader initialized");
            SelectedReader {
                reader,
                simulator: None,
            }
        }
        Err(e) => {
            warn!(error = %e, "No usable reader hardware, running in simulation mode");
            simulated(config).await
        }
    }
}

async fn simulated(config: &ReaderConfig) -> SelectedReader {
    let (reader, handle) = SimulatedReader::new();
    let mut reader = AnyReader::Simulated(reader);
    if let Err(e) = reader.initialize(config).await {
        warn!(error = %e, "Simulated reader failed to initialize");
    }
    SelectedReader {
        reader,
        simulator: Some(handle),
    }
}

#[cfg(feature = "hardware-pcsc")]
async fn try_pcsc(config: &ReaderConfig) -> Result<AnyReader> {
    let mut reader = AnyReader::Pcsc(crate::pcsc_reader::PcscReader::new());
    reader.initialize(config).await?;
    Ok(reader)
}

#[cfg(not(feature = "hardware-pcsc"))]
async fn try_pcsc(_config: &ReaderConfig) -> Result<AnyReader> {
    Err(HardwareError::unsupported("built without hardware-pcsc"))
}

#[cfg(feature = "hardware-spi")]
async fn try_spi(config: &ReaderConfig) -> Result<AnyReader> {
    let mut reader = AnyReader::SpiNfc(crate::spi_nfc::linux::open(config)?);
    reader.initialize(config).await?;
    Ok(reader)
}

#[cfg(not(feature = "hardware-spi"))]
async fn try_spi(_config: &ReaderConfig) -> Result<AnyReader> {
    Err(HardwareError::unsupported("built without hardware-spi"))
}
