//! PN532-over-SPI reader backend (MCRN2 board).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use ketl_core::{CardUid, ReaderConfig};
use tracing::{debug, info, warn};

use crate::pn532::{Pn532, Pn532Error};
use crate::traits::{ReaderBackend, ReaderKind};
use crate::{HardwareError, Result};

const NAME: &str = "PN532 (SPI)";

/// Status byte the PN532 puts in front of every `InDataExchange` reply.
const EXCHANGE_OK: u8 = 0x00;

impl From<Pn532Error> for HardwareError {
    fn from(err: Pn532Error) -> Self {
        match err {
            Pn532Error::Timeout(ms) => HardwareError::timeout(u64::from(ms)),
            other => HardwareError::communication(other.to_string()),
        }
    }
}

/// Reader backend driving a [`Pn532`] on a blocking worker thread.
pub struct SpiNfcReader<SPI, RST, D> {
    driver: Arc<Mutex<Pn532<SPI, RST, D>>>,
    initialized: bool,
}

impl<SPI, RST, D> SpiNfcReader<SPI, RST, D>
where
    SPI: SpiDevice + Send + 'static,
    RST: OutputPin + Send + 'static,
    D: DelayNs + Send + 'static,
{
    pub fn new(driver: Pn532<SPI, RST, D>) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            initialized: false,
        }
    }

    async fn with_driver<T, F>(&self, f: F) -> Result<std::result::Result<T, Pn532Error>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Pn532<SPI, RST, D>) -> std::result::Result<T, Pn532Error> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let outcome = tokio::task::spawn_blocking(move || -> Result<std::result::Result<T, Pn532Error>> {
            let mut guard = driver
                .lock()
                .map_err(|_| HardwareError::worker("PN532 driver lock poisoned"))?;
            Ok(f(&mut *guard))
        })
        .await?;
        outcome
    }
}

impl<SPI, RST, D> ReaderBackend for SpiNfcReader<SPI, RST, D>
where
    SPI: SpiDevice + Send + 'static,
    RST: OutputPin + Send + 'static,
    D: DelayNs + Send + 'static,
{
    async fn initialize(&mut self, config: &ReaderConfig) -> Result<()> {
        info!(device = %config.spi_device, reset_pin = config.spi_pins.reset, "Bringing up PN532");

        let version = self
            .with_driver(|pn| {
                pn.wakeup()?;
                let version = pn.firmware_version()?;
                pn.sam_configuration()?;
                Ok(version)
            })
            .await?
            .map_err(|e| HardwareError::initialization_failed(e.to_string()))?;

        info!(
            ic = version.ic,
            firmware = %format!("{}.{}", version.version, version.revision),
            "PN532 ready"
        );
        self.initialized = true;
        Ok(())
    }

    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<CardUid>> {
        if !self.initialized {
            return Err(HardwareError::not_initialized(NAME));
        }
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        match self.with_driver(move |pn| pn.read_passive_target(timeout_ms)).await? {
            Ok(Some(bytes)) => match CardUid::new(bytes) {
                Ok(uid) => Ok(Some(uid)),
                Err(e) => {
                    debug!(error = %e, "Ignoring target with unusable UID");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                debug!(error = %e, "Transient PN532 read failure");
                Ok(None)
            }
        }
    }

    async fn send_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        if !self.initialized {
            return Err(HardwareError::not_initialized(NAME));
        }
        let command = command.to_vec();
        let reply = self
            .with_driver(move |pn| pn.in_data_exchange(&command))
            .await??;

        strip_exchange_status(reply)
    }

    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> ReaderKind {
        ReaderKind::SpiNfc
    }
}

/// Drop the one leading PN532 status byte from an `InDataExchange` reply.
fn strip_exchange_status(mut reply: Vec<u8>) -> Result<Vec<u8>> {
    match reply.first() {
        Some(&EXCHANGE_OK) => {
            reply.remove(0);
            Ok(reply)
        }
        Some(&status) => {
            warn!(status = %format!("{status:02X}"), "PN532 exchange failed");
            Err(HardwareError::card(format!(
                "PN532 exchange status {status:#04X}"
            )))
        }
        None => Err(HardwareError::card("empty PN532 exchange reply")),
    }
}

#[cfg(feature = "hardware-spi")]
pub mod linux {
    //! Linux spidev and GPIO character-device bindings.

    use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
    use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};

    use super::{Pn532, SpiNfcReader};
    use crate::{HardwareError, Result};
    use ketl_core::ReaderConfig;

    const SPI_SPEED_HZ: u32 = 1_000_000;

    pub type LinuxSpiNfcReader = SpiNfcReader<SpidevDevice, CdevPin, Delay>;

    /// Open the spidev node and reset line named in `config`.
    ///
    /// # Errors
    ///
    /// Any failure opening or configuring the device nodes.
    pub fn open(config: &ReaderConfig) -> Result<LinuxSpiNfcReader> {
        let mut spi = SpidevDevice::open(&config.spi_device).map_err(|e| {
            HardwareError::initialization_failed(format!("{}: {e}", config.spi_device))
        })?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.0
            .configure(&options)
            .map_err(|e| HardwareError::initialization_failed(e.to_string()))?;

        let reset = open_output_line(&config.gpio_chip, config.spi_pins.reset, "ketl-pn532-reset")?;
        Ok(SpiNfcReader::new(Pn532::new(spi, reset, Delay)))
    }

    /// Request one GPIO line as an output, initially low.
    ///
    /// # Errors
    ///
    /// Any failure opening the chip or requesting the line.
    pub fn open_output_line(chip: &str, line: u32, label: &str) -> Result<CdevPin> {
        let mut chip = Chip::new(chip)
            .map_err(|e| HardwareError::initialization_failed(format!("{chip}: {e}")))?;
        let handle = chip
            .get_line(line)
            .and_then(|l| l.request(LineRequestFlags::OUTPUT, 0, label))
            .map_err(|e| HardwareError::initialization_failed(format!("line {line}: {e}")))?;
        CdevPin::new(handle).map_err(|e| HardwareError::initialization_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ok_status() {
        let reply = vec![0x00, 0x01, 0x02, 0x91, 0x00];
        assert_eq!(strip_exchange_status(reply).unwrap(), vec![0x01, 0x02, 0x91, 0x00]);
    }

    #[test]
    fn test_strip_only_one_byte() {
        // A data byte of 0x00 right after the status must survive.
        let reply = vec![0x00, 0x00, 0x91, 0x00];
        assert_eq!(strip_exchange_status(reply).unwrap(), vec![0x00, 0x91, 0x00]);
    }

    #[test]
    fn test_strip_error_status() {
        assert!(matches!(
            strip_exchange_status(vec![0x01]),
            Err(HardwareError::CardError { .. })
        ));
        assert!(strip_exchange_status(vec![]).is_err());
    }

    #[test]
    fn test_pn532_error_mapping() {
        let err: HardwareError = Pn532Error::Timeout(50).into();
        assert!(matches!(err, HardwareError::Timeout { duration_ms: 50 }));

        let err: HardwareError = Pn532Error::NoAck(0x4A).into();
        assert!(matches!(err, HardwareError::CommunicationError { .. }));
    }
}
