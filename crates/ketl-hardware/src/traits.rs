//! Reader backend trait.
//!
//! Methods use native `async fn` (edition 2024), so the trait is not
//! object-safe; dispatch over concrete backends goes through
//! [`AnyReader`](crate::readers::AnyReader).

#![allow(async_fn_in_trait)]

use std::fmt;
use std::time::Duration;

use ketl_core::{CardUid, ReaderConfig};

use crate::Result;

/// Backend family, for diagnostics and the simulated-crypto decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderKind {
    /// PC/SC contactless reader (ACR122U and friends).
    Pcsc,
    /// PN532 on the SPI bus.
    SpiNfc,
    /// No hardware.
    Simulated,
}

impl ReaderKind {
    pub fn is_simulated(self) -> bool {
        self == ReaderKind::Simulated
    }
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReaderKind::Pcsc => "pcsc",
            ReaderKind::SpiNfc => "spi-nfc",
            ReaderKind::Simulated => "simulated",
        };
        f.write_str(name)
    }
}

/// A contactless card reader.
///
/// # Read semantics
///
/// `read_uid` returns `Ok(None)` both when no card is in the field and when
/// the transport hiccupped; the presence detector cannot tell the two apart
/// and simply polls again. `Err` is for failures the caller should back off
/// from (backend not initialized, worker thread died).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ketl_core::CardUid;
/// use ketl_hardware::{ReaderBackend, SimulatedReader};
///
/// #[tokio::main]
/// async fn main() -> ketl_hardware::Result<()> {
///     let (mut reader, handle) = SimulatedReader::new();
///     reader.initialize(&Default::default()).await?;
///
///     assert!(reader.read_uid(Duration::from_millis(50)).await?.is_none());
///
///     handle.present(CardUid::from_hex("04A1B2C3").unwrap());
///     let uid = reader.read_uid(Duration::from_millis(50)).await?;
///     assert_eq!(uid.unwrap().to_hex(), "04A1B2C3");
///     Ok(())
/// }
/// ```
pub trait ReaderBackend: Send {
    /// Open the transport.
    async fn initialize(&mut self, config: &ReaderConfig) -> Result<()>;

    /// Poll for a card, waiting at most `timeout`.
    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<CardUid>>;

    /// Send a raw command frame and return the raw reply, status bytes included.
    async fn send_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>>;

    fn name(&self) -> &str;

    fn kind(&self) -> ReaderKind;
}
