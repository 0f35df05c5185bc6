//! Dispenser relay control.

use std::time::Duration;

use embedded_hal::digital::OutputPin;
use tracing::{debug, error, info};

use crate::{KioskError, Result};

/// Drives the dispenser relay for one serving at a time.
#[derive(Debug)]
pub struct DispenseController<P> {
    pin: P,
}

impl<P> DispenseController<P>
where
    P: OutputPin + Send,
{
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Force the relay off. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns `KioskError::Dispense` if the pin refuses the level.
    pub fn park(&mut self) -> Result<()> {
        self.pin
            .set_low()
            .map_err(|e| KioskError::Dispense(format!("park: {e:?}")))
    }

    /// Hold the relay on for `duration`.
    ///
    /// The relay is driven low on every exit path: after the hold, after a
    /// failed switch-on, and when the future is dropped mid-hold.
    ///
    /// # Errors
    ///
    /// Returns `KioskError::Dispense` if either edge could not be driven.
    pub async fn dispense(&mut self, duration: Duration) -> Result<()> {
        let mut hold = RelayHold {
            pin: &mut self.pin,
            armed: true,
        };

        hold.pin
            .set_high()
            .map_err(|e| KioskError::Dispense(format!("switch on: {e:?}")))?;
        info!(duration_ms = duration.as_millis() as u64, "Dispensing");

        tokio::time::sleep(duration).await;

        hold.armed = false;
        hold.pin
            .set_low()
            .map_err(|e| KioskError::Dispense(format!("switch off: {e:?}")))?;
        debug!("Dispenser off");
        Ok(())
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

/// Drives the relay low on drop unless disarmed.
struct RelayHold<'a, P: OutputPin> {
    pin: &'a mut P,
    armed: bool,
}

impl<P: OutputPin> Drop for RelayHold<'_, P> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.pin.set_low()
        {
            error!(error = ?e, "Dispenser relay could not be switched off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_hardware::SimulatedOutput;

    #[tokio::test(start_paused = true)]
    async fn test_dispense_pulses_relay() {
        let (pin, probe) = SimulatedOutput::new("dispenser");
        let mut controller = DispenseController::new(pin);

        let started = tokio::time::Instant::now();
        controller.dispense(Duration::from_secs(3)).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(probe.levels(), vec![true, false]);
        assert!(!probe.is_high());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_switch_on_still_drives_low() {
        let (pin, probe) = SimulatedOutput::new("dispenser");
        probe.set_faulty(true);
        let mut controller = DispenseController::new(pin);

        let err = controller.dispense(Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, KioskError::Dispense(_)));
        assert_eq!(probe.activations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_hold_switches_off() {
        let (pin, probe) = SimulatedOutput::new("dispenser");
        let mut controller = DispenseController::new(pin);

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            controller.dispense(Duration::from_secs(3)),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(probe.levels(), vec![true, false]);
    }

    #[test]
    fn test_park() {
        let (pin, probe) = SimulatedOutput::new("dispenser");
        let mut controller = DispenseController::new(pin);
        controller.park().unwrap();
        assert_eq!(probe.levels(), vec![false]);
    }
}
