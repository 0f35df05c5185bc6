//! Default values and fixed limits for the kiosk controller.
//!
//! Timing defaults mirror the values shipped in the machine configuration
//! document that is auto-created on first run. Anything the operator can
//! override lives in [`KioskConfig`](crate::config::KioskConfig); the values
//! here only seed it.
//!
//! # Usage
//!
//! ```
//! use ketl_core::constants::*;
//! use std::time::Duration;
//!
//! let poll = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
//! assert_eq!(poll, Duration::from_millis(50));
//! assert_eq!(CHALLENGE_LENGTH, 16);
//! ```

// ============================================================================
// Card Identifiers
// ============================================================================

/// Minimum UID length in bytes (ISO 14443 single-size UID).
pub const MIN_UID_LENGTH: usize = 4;

/// Maximum UID length in bytes (ISO 14443 triple-size UID).
pub const MAX_UID_LENGTH: usize = 10;

/// Length of a server-issued challenge and of the card's reply, in bytes.
pub const CHALLENGE_LENGTH: usize = 16;

/// Minimum card number length accepted from the ledger.
pub const MIN_CARD_NUMBER_LENGTH: usize = 1;

/// Maximum card number length accepted from the ledger.
pub const MAX_CARD_NUMBER_LENGTH: usize = 64;

// ============================================================================
// Machine Identity
// ============================================================================

/// Machine identifier used when the configuration does not name one.
pub const DEFAULT_MACHINE_ID: &str = "UK_0001";

/// Ledger base URL written into a freshly created configuration file.
pub const DEFAULT_API_BASE_URL: &str = "https://your-domain.replit.app";

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "machine_config.json";

// ============================================================================
// Pricing
// ============================================================================

/// Price debited per cup.
pub const DEFAULT_TEA_PRICE: f64 = 5.0;

/// Product label sent with every debit.
pub const DEFAULT_TEA_TYPE: &str = "Regular Tea";

// ============================================================================
// Timing
// ============================================================================

/// Card presence poll cadence (milliseconds).
///
/// Also used as the per-read timeout handed to the reader backend, so a poll
/// never outlives its own tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Backoff after an unexpected polling failure (milliseconds).
///
/// Keeps a persistently failing backend from pegging the CPU.
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 1000;

/// Settle delay before accepting the next tap (milliseconds).
pub const DEFAULT_CARD_REMOVAL_DELAY_MS: u64 = 500;

/// How long the dispenser output is held active (milliseconds).
pub const DEFAULT_DISPENSE_TIME_MS: u64 = 3000;

/// Upper bound for every ledger request (seconds).
pub const DEFAULT_API_TIMEOUT_SECONDS: u64 = 5;

/// Heartbeat cadence (seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 60;

// ============================================================================
// Pin Assignments (BCM numbering)
// ============================================================================

/// Dispenser relay output.
pub const DEFAULT_DISPENSER_PIN: u32 = 18;

/// PN532 chip-select line (CE0).
pub const DEFAULT_SPI_CS_PIN: u32 = 8;

/// PN532 reset line.
pub const DEFAULT_SPI_RESET_PIN: u32 = 25;

/// SPI character device the PN532 is attached to.
pub const DEFAULT_SPI_DEVICE: &str = "/dev/spidev0.0";

/// GPIO character device used for reset, LED and buzzer lines.
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";
