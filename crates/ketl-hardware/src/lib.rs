//! Hardware abstraction for the tea kiosk.
//!
//! Two concerns live here:
//!
//! - **Card readers** behind the [`ReaderBackend`] trait: a PC/SC backend for
//!   ACR122U-class USB readers (`hardware-pcsc`), a PN532-over-SPI backend for
//!   the MCRN2 board (`hardware-spi`), and a [`SimulatedReader`] that is always
//!   available.
//! - **Digital outputs** (dispenser relay, LEDs, buzzer) expressed as
//!   `embedded_hal::digital::OutputPin`.
//!
//! # Design
//!
//! - **Async-first**: reader methods are native `async fn` in traits. Blocking
//!   transports (PC/SC, spidev) run on tokio's blocking pool.
//! - **Enum dispatch**: the trait is not object-safe, so the runtime holds an
//!   [`AnyReader`]. Hardware variants are compiled in by feature.
//! - **Never fatal**: [`select::select_reader`] falls back to simulation when
//!   hardware is missing.
//!
//! # Example
//!
//! ```no_run
//! use ketl_core::ReaderConfig;
//! use ketl_hardware::{ReaderBackend, select::select_reader};
//!
//! #[tokio::main]
//! async fn main() {
//!     let selected = select_reader(&ReaderConfig::default()).await;
//!     println!("Using {} ({})", selected.reader.name(), selected.reader.kind());
//! }
//! ```

pub mod error;
pub mod output;
#[cfg(feature = "hardware-pcsc")]
pub mod pcsc_reader;
pub mod pn532;
pub mod readers;
pub mod select;
pub mod simulated;
pub mod spi_nfc;
pub mod traits;

pub use error::{HardwareError, Result};
pub use output::{AnyOutput, OutputProbe, OutputSet, SimulatedOutput};
pub use readers::AnyReader;
pub use select::{SelectedReader, select_reader};
pub use simulated::{SimulatedReader, SimulatedReaderHandle};
pub use traits::{ReaderBackend, ReaderKind};
