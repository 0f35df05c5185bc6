//! Core types shared by every crate of the tea kiosk controller.
//!
//! Holds the domain vocabulary (card identifiers, challenges, feedback codes),
//! the machine configuration document and the default timing constants.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{GpioPins, KioskConfig, ReaderConfig, ReaderSelection, SpiPins};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
