//! Machine configuration document.
//!
//! The kiosk reads a single JSON file at startup. Keys that are missing take
//! their defaults, and a file holding every default is written on first run
//! so the operator has something to edit. The document is never modified
//! afterwards.
//!
//! ```no_run
//! use ketl_core::KioskConfig;
//!
//! # fn example() -> ketl_core::Result<()> {
//! let config = KioskConfig::load_or_create("machine_config.json")?;
//! config.validate()?;
//! println!("machine {} polls every {:?}", config.machine_id, config.poll_interval());
//! # Ok(())
//! # }
//! ```

use crate::constants::*;
use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which reader backend to bring up at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderSelection {
    /// Try PC/SC first, then SPI, then fall back to simulation.
    #[default]
    Auto,

    /// PC/SC contactless reader (ACR122U family).
    Acr122u,

    /// PN532 on the SPI bus (MCRN2 board).
    Mcrn2,

    /// No hardware; cards are presented programmatically.
    Simulated,
}

/// Digital output assignments (BCM numbering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioPins {
    pub dispenser: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_green: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_red: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buzzer: Option<u32>,
}

impl Default for GpioPins {
    fn default() -> Self {
        Self {
            dispenser: DEFAULT_DISPENSER_PIN,
            led_green: None,
            led_red: None,
            buzzer: None,
        }
    }
}

/// PN532 control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiPins {
    pub cs: u32,
    pub reset: u32,
}

impl Default for SpiPins {
    fn default() -> Self {
        Self {
            cs: DEFAULT_SPI_CS_PIN,
            reset: DEFAULT_SPI_RESET_PIN,
        }
    }
}

/// The subset of configuration a reader backend needs to open its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub selection: ReaderSelection,
    pub spi_device: String,
    pub spi_pins: SpiPins,
    pub gpio_chip: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        KioskConfig::default().reader_config()
    }
}

/// Full machine configuration.
///
/// Times are stored in seconds (fractional allowed) to stay compatible with
/// configuration files already deployed on machines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub machine_id: String,
    pub api_base_url: String,
    pub tea_price: f64,
    pub tea_type: String,
    pub dispense_time: f64,
    pub polling_interval: f64,
    pub card_removal_delay: f64,
    pub error_backoff: f64,
    pub api_timeout: f64,
    pub heartbeat_interval: f64,
    pub reader_type: ReaderSelection,

    /// Echo the challenge back when running without reader hardware.
    ///
    /// Only ever applies to the simulated backend; a real reader that fails
    /// is always a card error.
    pub simulate_card_crypto: bool,

    /// Keep accepting taps while the heartbeat reports the ledger unreachable.
    pub offline_mode: bool,

    pub gpio_pins: GpioPins,
    pub spi_pins: SpiPins,
    pub spi_device: String,
    pub gpio_chip: String,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            machine_id: DEFAULT_MACHINE_ID.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            tea_price: DEFAULT_TEA_PRICE,
            tea_type: DEFAULT_TEA_TYPE.to_string(),
            dispense_time: ms_to_secs(DEFAULT_DISPENSE_TIME_MS),
            polling_interval: ms_to_secs(DEFAULT_POLL_INTERVAL_MS),
            card_removal_delay: ms_to_secs(DEFAULT_CARD_REMOVAL_DELAY_MS),
            error_backoff: ms_to_secs(DEFAULT_ERROR_BACKOFF_MS),
            api_timeout: DEFAULT_API_TIMEOUT_SECONDS as f64,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECONDS as f64,
            reader_type: ReaderSelection::Auto,
            simulate_card_crypto: true,
            offline_mode: false,
            gpio_pins: GpioPins::default(),
            spi_pins: SpiPins::default(),
            spi_device: DEFAULT_SPI_DEVICE.to_string(),
            gpio_chip: DEFAULT_GPIO_CHIP.to_string(),
        }
    }
}

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

fn secs(value: f64, fallback_ms: u64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::from_millis(fallback_ms))
}

impl KioskConfig {
    /// Load the configuration file, creating it with defaults if absent.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or written, or is not
    /// valid JSON for this document.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            return Self::from_json(&raw);
        }

        let config = Self::default();
        let rendered = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, rendered)?;
        Ok(config)
    }

    /// Parse a configuration document, filling missing keys with defaults.
    ///
    /// # Errors
    /// Returns `Error::ConfigParse` on malformed JSON or mistyped values.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject values that would make the machine misbehave.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.machine_id.trim().is_empty() {
            return Err(Error::Config("machine_id must not be empty".to_string()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if !(self.tea_price.is_finite() && self.tea_price > 0.0) {
            return Err(Error::Config("tea_price must be positive".to_string()));
        }

        let positive = [
            ("dispense_time", self.dispense_time),
            ("polling_interval", self.polling_interval),
            ("error_backoff", self.error_backoff),
            ("api_timeout", self.api_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{key} must be positive, got {value}")));
            }
        }
        if !(self.card_removal_delay.is_finite() && self.card_removal_delay >= 0.0) {
            return Err(Error::Config(
                "card_removal_delay must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        secs(self.polling_interval, DEFAULT_POLL_INTERVAL_MS)
    }

    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        secs(self.error_backoff, DEFAULT_ERROR_BACKOFF_MS)
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        secs(self.card_removal_delay, DEFAULT_CARD_REMOVAL_DELAY_MS)
    }

    #[must_use]
    pub fn dispense_duration(&self) -> Duration {
        secs(self.dispense_time, DEFAULT_DISPENSE_TIME_MS)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        secs(self.api_timeout, DEFAULT_API_TIMEOUT_SECONDS * 1000)
    }

    #[must_use]
    pub fn heartbeat_period(&self) -> Duration {
        secs(
            self.heartbeat_interval,
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS * 1000,
        )
    }

    #[must_use]
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            selection: self.reader_type,
            spi_device: self.spi_device.clone(),
            spi_pins: self.spi_pins,
            gpio_chip: self.gpio_chip.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_match_constants() {
        let config = KioskConfig::default();
        assert_eq!(config.machine_id, "UK_0001");
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.dispense_duration(), Duration::from_secs(3));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.error_backoff(), Duration::from_secs(1));
        assert_eq!(config.gpio_pins.dispenser, 18);
        assert_eq!(config.spi_pins, SpiPins { cs: 8, reset: 25 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = KioskConfig::from_json(
            r#"{
                "machine_id": "UK_0042",
                "tea_price": 7.5,
                "reader_type": "mcrn2",
                "gpio_pins": { "dispenser": 23, "buzzer": 24 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.machine_id, "UK_0042");
        assert_eq!(config.tea_price, 7.5);
        assert_eq!(config.reader_type, ReaderSelection::Mcrn2);
        assert_eq!(config.gpio_pins.dispenser, 23);
        assert_eq!(config.gpio_pins.buzzer, Some(24));
        assert_eq!(config.gpio_pins.led_green, None);
        assert_eq!(config.api_timeout, 5.0);
        assert_eq!(config.spi_device, DEFAULT_SPI_DEVICE);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_config.json");

        let created = KioskConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, KioskConfig::default());

        let reloaded = KioskConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_config.json");
        std::fs::write(&path, r#"{"machine_id": "UK_0100", "offline_mode": true}"#).unwrap();

        let config = KioskConfig::load_or_create(&path).unwrap();
        assert_eq!(config.machine_id, "UK_0100");
        assert!(config.offline_mode);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = KioskConfig::load_or_create(&path);
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[rstest]
    #[case(r#"{"machine_id": "  "}"#)]
    #[case(r#"{"tea_price": 0}"#)]
    #[case(r#"{"polling_interval": -0.05}"#)]
    #[case(r#"{"api_timeout": 0}"#)]
    #[case(r#"{"api_base_url": "ftp://ledger"}"#)]
    #[case(r#"{"card_removal_delay": -1}"#)]
    fn test_validate_rejects(#[case] raw: &str) {
        let config = KioskConfig::from_json(raw).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_reader_selection_serde() {
        assert_eq!(
            serde_json::to_string(&ReaderSelection::Acr122u).unwrap(),
            "\"acr122u\""
        );
        let parsed: ReaderSelection = serde_json::from_str("\"simulated\"").unwrap();
        assert_eq!(parsed, ReaderSelection::Simulated);
    }
}
