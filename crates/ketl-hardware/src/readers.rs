//! Enum dispatch over the concrete reader backends.
//!
//! `async fn` in [`ReaderBackend`] is not object-safe, so the runtime holds an
//! [`AnyReader`] instead of a `Box<dyn ReaderBackend>`. Hardware variants only
//! exist when their feature is enabled.

use std::time::Duration;

use ketl_core::{CardUid, ReaderConfig};

use crate::Result;
use crate::simulated::SimulatedReader;
use crate::traits::{ReaderBackend, ReaderKind};

#[cfg(feature = "hardware-pcsc")]
use crate::pcsc_reader::PcscReader;
#[cfg(feature = "hardware-spi")]
use crate::spi_nfc::linux::LinuxSpiNfcReader;

/// Any reader backend the kiosk can run on.
///
/// # Examples
///
/// ```
/// use ketl_hardware::{AnyReader, ReaderBackend, SimulatedReader};
///
/// let (reader, _handle) = SimulatedReader::new();
/// let reader = AnyReader::Simulated(reader);
/// assert!(reader.kind().is_simulated());
/// ```
#[non_exhaustive]
pub enum AnyReader {
    #[cfg(feature = "hardware-pcsc")]
    Pcsc(PcscReader),

    #[cfg(feature = "hardware-spi")]
    SpiNfc(LinuxSpiNfcReader),

    Simulated(SimulatedReader),
}

impl std::fmt::Debug for AnyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyReader")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl ReaderBackend for AnyReader {
    async fn initialize(&mut self, config: &ReaderConfig) -> Result<()> {
        match self {
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.initialize(config).await,
            #[cfg(feature = "hardware-spi")]
            Self::SpiNfc(reader) => reader.initialize(config).await,
            Self::Simulated(reader) => reader.initialize(config).await,
        }
    }

    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<CardUid>> {
        match self {
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.read_uid(timeout).await,
            #[cfg(feature = "hardware-spi")]
            Self::SpiNfc(reader) => reader.read_uid(timeout).await,
            Self::Simulated(reader) => reader.read_uid(timeout).await,
        }
    }

    async fn send_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.send_apdu(command).await,
            #[cfg(feature = "hardware-spi")]
            Self::SpiNfc(reader) => reader.send_apdu(command).await,
            Self::Simulated(reader) => reader.send_apdu(command).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.name(),
            #[cfg(feature = "hardware-spi")]
            Self::SpiNfc(reader) => reader.name(),
            Self::Simulated(reader) => reader.name(),
        }
    }

    fn kind(&self) -> ReaderKind {
        match self {
            #[cfg(feature = "hardware-pcsc")]
            Self::Pcsc(reader) => reader.kind(),
            #[cfg(feature = "hardware-spi")]
            Self::SpiNfc(reader) => reader.kind(),
            Self::Simulated(reader) => reader.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedReader;

    #[tokio::test]
    async fn test_dispatch_to_simulated() {
        let (reader, handle) = SimulatedReader::with_name("bench");
        let mut reader = AnyReader::Simulated(reader);
        reader.initialize(&ReaderConfig::default()).await.unwrap();

        assert_eq!(reader.name(), "bench");
        assert_eq!(reader.kind(), ReaderKind::Simulated);

        handle.present(CardUid::from_hex("04A1B2C3").unwrap());
        let uid = reader.read_uid(Duration::from_millis(10)).await.unwrap();
        assert_eq!(uid.unwrap().to_hex(), "04A1B2C3");
    }

    #[test]
    fn test_debug_output() {
        let (reader, _handle) = SimulatedReader::new();
        let debug = format!("{:?}", AnyReader::Simulated(reader));
        assert!(debug.contains("Simulated"));
    }
}
