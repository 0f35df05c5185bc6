use ketl_hardware::HardwareError;
use ketl_network::LedgerError;
use ketl_protocol::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error(transparent)]
    Core(#[from] ketl_core::Error),

    // Card side
    #[error("Reader error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Card reply rejected: {0}")]
    Codec(#[from] CodecError),

    // Ledger side
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Outputs
    #[error("Dispenser output failed: {0}")]
    Dispense(String),

    // Runtime
    #[error("{count} kiosk task(s) panicked")]
    TaskPanicked { count: usize },
}

pub type Result<T> = std::result::Result<T, KioskError>;
