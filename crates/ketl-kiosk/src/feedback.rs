//! Customer-facing feedback: status LEDs and buzzer.
//!
//! Each authentication attempt shows its outcome once through
//! [`FeedbackSink::signal`]. An authorized attempt shows `Success` before the
//! pour; if the pour then fails, `DISPENSE_FAIL` follows.

use std::future::Future;
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use ketl_core::Feedback;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

const SUCCESS_BEEP: Duration = Duration::from_millis(200);
const SUCCESS_HOLD: Duration = Duration::from_millis(500);
const ERROR_BLINKS: usize = 3;
const ERROR_BLINK_HALF_PERIOD: Duration = Duration::from_millis(100);
const ERROR_BEEP: Duration = Duration::from_millis(100);
const ERROR_BEEP_GAP: Duration = Duration::from_millis(50);

/// Presents the outcome of an attempt.
pub trait FeedbackSink: Send + Sync + 'static {
    fn signal(&self, feedback: Feedback) -> impl Future<Output = ()> + Send;
}

fn log_feedback(feedback: Feedback) {
    match feedback {
        Feedback::Success => info!(feedback = %feedback, "Enjoy your tea"),
        Feedback::Error(code) => warn!(feedback = %code, "Attempt ended with an error"),
    }
}

/// Feedback through the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    async fn signal(&self, feedback: Feedback) {
        log_feedback(feedback);
    }
}

/// Optional indicator outputs.
#[derive(Debug)]
pub struct IndicatorPins<P> {
    pub led_green: Option<P>,
    pub led_red: Option<P>,
    pub buzzer: Option<P>,
}

impl<P> Default for IndicatorPins<P> {
    fn default() -> Self {
        Self {
            led_green: None,
            led_red: None,
            buzzer: None,
        }
    }
}

/// Feedback on LEDs and buzzer, plus the log.
///
/// Success: green LED on, one 200 ms beep, green off after 500 ms.
/// Error: red LED blinks three times, then a double beep.
///
/// Missing pins are skipped. Pin failures are logged and never escalate.
#[derive(Debug)]
pub struct PinFeedback<P> {
    pins: Mutex<IndicatorPins<P>>,
}

impl<P> PinFeedback<P>
where
    P: OutputPin + Send,
{
    pub fn new(pins: IndicatorPins<P>) -> Self {
        Self {
            pins: Mutex::new(pins),
        }
    }

    async fn show_success(pins: &mut IndicatorPins<P>) {
        drive(&mut pins.led_green, "led_green", true);
        beep(&mut pins.buzzer, SUCCESS_BEEP).await;
        sleep(SUCCESS_HOLD).await;
        drive(&mut pins.led_green, "led_green", false);
    }

    async fn show_error(pins: &mut IndicatorPins<P>) {
        if pins.led_red.is_some() {
            for _ in 0..ERROR_BLINKS {
                drive(&mut pins.led_red, "led_red", true);
                sleep(ERROR_BLINK_HALF_PERIOD).await;
                drive(&mut pins.led_red, "led_red", false);
                sleep(ERROR_BLINK_HALF_PERIOD).await;
            }
        }
        beep(&mut pins.buzzer, ERROR_BEEP).await;
        sleep(ERROR_BEEP_GAP).await;
        beep(&mut pins.buzzer, ERROR_BEEP).await;
        drive(&mut pins.led_red, "led_red", false);
    }
}

impl<P> FeedbackSink for PinFeedback<P>
where
    P: OutputPin + Send + 'static,
{
    async fn signal(&self, feedback: Feedback) {
        log_feedback(feedback);
        let mut pins = self.pins.lock().await;
        match feedback {
            Feedback::Success => Self::show_success(&mut pins).await,
            Feedback::Error(_) => Self::show_error(&mut pins).await,
        }
    }
}

fn drive<P: OutputPin>(pin: &mut Option<P>, name: &'static str, high: bool) {
    let Some(pin) = pin else {
        return;
    };
    let outcome = if high { pin.set_high() } else { pin.set_low() };
    if let Err(e) = outcome {
        warn!(pin = name, error = ?e, "Indicator output failed");
    }
}

async fn beep<P: OutputPin>(buzzer: &mut Option<P>, length: Duration) {
    if buzzer.is_none() {
        return;
    }
    drive(buzzer, "buzzer", true);
    sleep(length).await;
    drive(buzzer, "buzzer", false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_core::FeedbackCode;
    use ketl_hardware::{OutputProbe, SimulatedOutput};

    struct Probes {
        green: OutputProbe,
        red: OutputProbe,
        buzzer: OutputProbe,
    }

    fn feedback() -> (PinFeedback<SimulatedOutput>, Probes) {
        let (green, green_probe) = SimulatedOutput::new("led_green");
        let (red, red_probe) = SimulatedOutput::new("led_red");
        let (buzzer, buzzer_probe) = SimulatedOutput::new("buzzer");
        let sink = PinFeedback::new(IndicatorPins {
            led_green: Some(green),
            led_red: Some(red),
            buzzer: Some(buzzer),
        });
        (
            sink,
            Probes {
                green: green_probe,
                red: red_probe,
                buzzer: buzzer_probe,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_pattern() {
        let (sink, probes) = feedback();
        sink.signal(Feedback::Success).await;

        assert_eq!(probes.green.levels(), vec![true, false]);
        assert_eq!(probes.buzzer.activations(), 1);
        assert!(probes.red.levels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_pattern() {
        let (sink, probes) = feedback();
        sink.signal(Feedback::Error(FeedbackCode::LowBalance)).await;

        assert_eq!(probes.red.activations(), 3);
        assert!(!probes.red.is_high());
        assert_eq!(probes.buzzer.activations(), 2);
        assert!(probes.green.levels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_and_faulty_pins_are_tolerated() {
        let (buzzer, probe) = SimulatedOutput::new("buzzer");
        probe.set_faulty(true);
        let sink = PinFeedback::new(IndicatorPins {
            led_green: None,
            led_red: None,
            buzzer: Some(buzzer),
        });

        sink.signal(Feedback::Error(FeedbackCode::CardError)).await;
        sink.signal(Feedback::Success).await;
        assert_eq!(probe.activations(), 0);
    }

    #[tokio::test]
    async fn test_log_feedback_is_silent_on_pins() {
        LogFeedback.signal(Feedback::Success).await;
    }
}
