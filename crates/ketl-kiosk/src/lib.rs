//! Tea kiosk controller runtime.
//!
//! Ties the card reader, the ledger and the dispenser together:
//!
//! - [`presence`] polls the reader and debounces taps
//! - [`orchestrator`] runs the challenge-response authentication, the debit
//!   and the dispense for one card
//! - [`state_machine`] validates every step of an attempt
//! - [`heartbeat`] keeps the ledger informed and tracks whether it answers
//! - [`kiosk`] spawns and stops all of the above
//!
//! At most one attempt is in flight at any time; see [`MachineState`].

pub mod dispenser;
pub mod error;
pub mod feedback;
pub mod heartbeat;
pub mod kiosk;
pub mod machine_state;
pub mod orchestrator;
pub mod presence;
pub mod state_machine;

pub use dispenser::DispenseController;
pub use error::{KioskError, Result};
pub use feedback::{FeedbackSink, IndicatorPins, LogFeedback, PinFeedback};
pub use heartbeat::HeartbeatReporter;
pub use kiosk::{Kiosk, KioskHandle};
pub use machine_state::{MachineState, MachineStatistics, ProcessingGuard};
pub use orchestrator::{AttemptReport, AttemptSettings, AuthenticationOrchestrator};
pub use presence::{PresenceDetector, PresenceEvent, SharedReader};
pub use state_machine::{AuthState, AuthStateMachine, StateTransition};
