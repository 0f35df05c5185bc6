//! Digital outputs: dispenser relay, status LEDs, buzzer.
//!
//! Everything downstream is written against `embedded_hal::digital::OutputPin`.
//! [`SimulatedOutput`] stands in when no GPIO chip is available and can be
//! told to fail, which is how dispense-failure paths are exercised.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::digital::{ErrorType, OutputPin};
use ketl_core::GpioPins;
use tracing::debug;

use crate::HardwareError;

#[derive(Debug, Default)]
struct PinState {
    high: AtomicBool,
    rising_edges: AtomicU32,
    faulty: AtomicBool,
    levels: Mutex<Vec<bool>>,
}

/// Output pin that only logs and records its level.
#[derive(Debug, Clone)]
pub struct SimulatedOutput {
    name: Arc<str>,
    state: Arc<PinState>,
}

impl SimulatedOutput {
    /// Create a pin and the probe used to observe it.
    pub fn new(name: &str) -> (Self, OutputProbe) {
        let state = Arc::new(PinState::default());
        let pin = Self {
            name: Arc::from(name),
            state: Arc::clone(&state),
        };
        (pin, OutputProbe { state })
    }

    fn drive(&mut self, high: bool) -> Result<(), HardwareError> {
        if self.state.faulty.load(Ordering::SeqCst) {
            return Err(HardwareError::output(&*self.name, "simulated fault"));
        }
        let was_high = self.state.high.swap(high, Ordering::SeqCst);
        if high && !was_high {
            self.state.rising_edges.fetch_add(1, Ordering::SeqCst);
        }
        if let Ok(mut levels) = self.state.levels.lock() {
            levels.push(high);
        }
        debug!(pin = %self.name, level = if high { "high" } else { "low" }, "Simulated output");
        Ok(())
    }
}

impl ErrorType for SimulatedOutput {
    type Error = HardwareError;
}

impl OutputPin for SimulatedOutput {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}

/// Observer side of a [`SimulatedOutput`].
#[derive(Debug, Clone)]
pub struct OutputProbe {
    state: Arc<PinState>,
}

impl OutputProbe {
    pub fn is_high(&self) -> bool {
        self.state.high.load(Ordering::SeqCst)
    }

    /// Number of low-to-high transitions seen so far.
    pub fn activations(&self) -> u32 {
        self.state.rising_edges.load(Ordering::SeqCst)
    }

    /// Every level written, in order.
    pub fn levels(&self) -> Vec<bool> {
        self.state
            .levels
            .lock()
            .map(|levels| levels.clone())
            .unwrap_or_default()
    }

    /// Make every subsequent write fail until cleared.
    pub fn set_faulty(&self, faulty: bool) {
        self.state.faulty.store(faulty, Ordering::SeqCst);
    }
}

/// Any output pin the kiosk can drive.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyOutput {
    Simulated(SimulatedOutput),

    #[cfg(feature = "hardware-spi")]
    Gpio(linux_embedded_hal::CdevPin),
}

impl ErrorType for AnyOutput {
    type Error = HardwareError;
}

impl OutputPin for AnyOutput {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Simulated(pin) => pin.set_low(),
            #[cfg(feature = "hardware-spi")]
            Self::Gpio(pin) => pin
                .set_low()
                .map_err(|e| HardwareError::output("gpio", format!("{e:?}"))),
        }
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Simulated(pin) => pin.set_high(),
            #[cfg(feature = "hardware-spi")]
            Self::Gpio(pin) => pin
                .set_high()
                .map_err(|e| HardwareError::output("gpio", format!("{e:?}"))),
        }
    }
}

/// The kiosk's full set of outputs. LEDs and buzzer are optional.
#[derive(Debug)]
pub struct OutputSet {
    pub dispenser: AnyOutput,
    pub led_green: Option<AnyOutput>,
    pub led_red: Option<AnyOutput>,
    pub buzzer: Option<AnyOutput>,
}

impl OutputSet {
    /// All-simulated outputs for the configured pins.
    pub fn simulated(pins: &GpioPins) -> Self {
        let sim = |name: &str| AnyOutput::Simulated(SimulatedOutput::new(name).0);
        Self {
            dispenser: sim("dispenser"),
            led_green: pins.led_green.map(|_| sim("led_green")),
            led_red: pins.led_red.map(|_| sim("led_red")),
            buzzer: pins.buzzer.map(|_| sim("buzzer")),
        }
    }

    /// Request the configured lines from a GPIO character device.
    ///
    /// # Errors
    ///
    /// Fails if the chip cannot be opened or any line is busy.
    #[cfg(feature = "hardware-spi")]
    pub fn open_gpio(chip: &str, pins: &GpioPins) -> crate::Result<Self> {
        use crate::spi_nfc::linux::open_output_line;

        let open = |line: u32, label: &str| -> crate::Result<AnyOutput> {
            open_output_line(chip, line, label).map(AnyOutput::Gpio)
        };
        Ok(Self {
            dispenser: open(pins.dispenser, "ketl-dispenser")?,
            led_green: pins.led_green.map(|l| open(l, "ketl-led-green")).transpose()?,
            led_red: pins.led_red.map(|l| open(l, "ketl-led-red")).transpose()?,
            buzzer: pins.buzzer.map(|l| open(l, "ketl-buzzer")).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_levels_and_edges() {
        let (mut pin, probe) = SimulatedOutput::new("dispenser");

        pin.set_high().unwrap();
        pin.set_high().unwrap();
        pin.set_low().unwrap();
        pin.set_high().unwrap();

        assert!(probe.is_high());
        assert_eq!(probe.activations(), 2);
        assert_eq!(probe.levels(), vec![true, true, false, true]);
    }

    #[test]
    fn test_fault_injection() {
        let (mut pin, probe) = SimulatedOutput::new("dispenser");
        probe.set_faulty(true);

        assert!(matches!(pin.set_high(), Err(HardwareError::OutputError { .. })));
        assert!(!probe.is_high());

        probe.set_faulty(false);
        assert!(pin.set_high().is_ok());
    }

    #[test]
    fn test_simulated_set_respects_optional_pins() {
        let pins = GpioPins {
            dispenser: 18,
            led_green: Some(23),
            led_red: None,
            buzzer: Some(24),
        };
        let set = OutputSet::simulated(&pins);
        assert!(set.led_green.is_some());
        assert!(set.led_red.is_none());
        assert!(set.buzzer.is_some());
    }

    #[test]
    fn test_any_output_dispatch() {
        let (pin, probe) = SimulatedOutput::new("buzzer");
        let mut any = AnyOutput::Simulated(pin);
        any.set_high().unwrap();
        assert!(probe.is_high());
        any.set_low().unwrap();
        assert!(!probe.is_high());
    }
}
