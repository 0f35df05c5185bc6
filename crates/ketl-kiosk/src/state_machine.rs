//! Per-attempt authentication state machine.
//!
//! Every card tap gets its own machine, starting in `Detected` and ending in
//! exactly one terminal state.
//!
//! # Valid Transitions
//!
//! - Detected → ChallengeRequested | Offline
//! - ChallengeRequested → CardExchanged | AuthFailed | CardError
//! - CardExchanged → ServerValidated | InvalidCard | AuthFailed | LowBalance | MachineDisabled
//! - ServerValidated → Authorized | DispenseFail
//! - Authorized → Dispensed | DispenseFail
//! - any non-terminal state → SystemError
//!
//! # Examples
//!
//! ```
//! use ketl_kiosk::{AuthState, AuthStateMachine};
//!
//! let mut machine = AuthStateMachine::new();
//! machine.transition_to(AuthState::ChallengeRequested).unwrap();
//! machine.transition_to(AuthState::CardExchanged).unwrap();
//!
//! // Cannot skip validation.
//! assert!(machine.transition_to(AuthState::Authorized).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use ketl_core::{Error, Feedback, FeedbackCode, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on recorded transitions. A complete attempt needs six.
const MAX_HISTORY_SIZE: usize = 16;

/// States of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// New card UID seen and the processing guard claimed.
    Detected,
    /// Challenge requested from the ledger; the card exchange follows.
    ChallengeRequested,
    /// Card produced a 16-byte response, awaiting validation.
    CardExchanged,
    /// Ledger accepted the response and identified the card.
    ServerValidated,
    /// Ledger debited the wallet; the dispenser may run.
    Authorized,
    /// Tea poured.
    Dispensed,

    AuthFailed,
    CardError,
    InvalidCard,
    LowBalance,
    MachineDisabled,
    Offline,
    DispenseFail,
    SystemError,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Detected => "Detected",
            AuthState::ChallengeRequested => "ChallengeRequested",
            AuthState::CardExchanged => "CardExchanged",
            AuthState::ServerValidated => "ServerValidated",
            AuthState::Authorized => "Authorized",
            AuthState::Dispensed => "Dispensed",
            AuthState::AuthFailed => "AuthFailed",
            AuthState::CardError => "CardError",
            AuthState::InvalidCard => "InvalidCard",
            AuthState::LowBalance => "LowBalance",
            AuthState::MachineDisabled => "MachineDisabled",
            AuthState::Offline => "Offline",
            AuthState::DispenseFail => "DispenseFail",
            AuthState::SystemError => "SystemError",
        };
        f.write_str(name)
    }
}

impl AuthState {
    /// Check if transition to `target` is allowed from this state.
    ///
    /// ```
    /// use ketl_kiosk::AuthState;
    ///
    /// assert!(AuthState::Detected.can_transition_to(&AuthState::Offline));
    /// assert!(!AuthState::Detected.can_transition_to(&AuthState::Dispensed));
    /// assert!(AuthState::Authorized.can_transition_to(&AuthState::SystemError));
    /// ```
    pub fn can_transition_to(&self, target: &AuthState) -> bool {
        if *target == AuthState::SystemError {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (AuthState::Detected, AuthState::ChallengeRequested | AuthState::Offline)
                | (
                    AuthState::ChallengeRequested,
                    AuthState::CardExchanged | AuthState::AuthFailed | AuthState::CardError
                )
                | (
                    AuthState::CardExchanged,
                    AuthState::ServerValidated
                        | AuthState::InvalidCard
                        | AuthState::AuthFailed
                        | AuthState::LowBalance
                        | AuthState::MachineDisabled
                )
                | (
                    AuthState::ServerValidated,
                    AuthState::Authorized | AuthState::DispenseFail
                )
                | (AuthState::Authorized, AuthState::Dispensed | AuthState::DispenseFail)
        )
    }

    /// `Dispensed` and every failure state.
    pub fn is_terminal(&self) -> bool {
        self.feedback().is_some()
    }

    /// Feedback signal for a terminal state; `None` while still in flight.
    pub fn feedback(&self) -> Option<Feedback> {
        let code = match self {
            AuthState::Detected
            | AuthState::ChallengeRequested
            | AuthState::CardExchanged
            | AuthState::ServerValidated
            | AuthState::Authorized => return None,
            AuthState::Dispensed => return Some(Feedback::Success),
            AuthState::AuthFailed => FeedbackCode::AuthFailed,
            AuthState::CardError => FeedbackCode::CardError,
            AuthState::InvalidCard => FeedbackCode::InvalidCard,
            AuthState::LowBalance => FeedbackCode::LowBalance,
            AuthState::MachineDisabled => FeedbackCode::MachineDisabled,
            AuthState::Offline => FeedbackCode::Offline,
            AuthState::DispenseFail => FeedbackCode::DispenseFail,
            AuthState::SystemError => FeedbackCode::SystemError,
        };
        Some(Feedback::Error(code))
    }

    /// Terminal state for a failure feedback code.
    pub fn from_failure(code: FeedbackCode) -> Self {
        match code {
            FeedbackCode::Offline => AuthState::Offline,
            FeedbackCode::InvalidCard => AuthState::InvalidCard,
            FeedbackCode::LowBalance => AuthState::LowBalance,
            FeedbackCode::MachineDisabled => AuthState::MachineDisabled,
            FeedbackCode::DispenseFail => AuthState::DispenseFail,
            FeedbackCode::AuthFailed => AuthState::AuthFailed,
            FeedbackCode::CardError => AuthState::CardError,
            FeedbackCode::SystemError => AuthState::SystemError,
        }
    }
}

/// A single recorded transition.
///
/// `timestamp` is process-local and is not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AuthState,
    pub to: AuthState,
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: AuthState, to: AuthState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// State machine for one authentication attempt.
///
/// Not thread-safe; each attempt task owns its machine.
#[derive(Debug)]
pub struct AuthStateMachine {
    current_state: AuthState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl AuthStateMachine {
    /// New machine in `Detected`.
    pub fn new() -> Self {
        Self {
            current_state: AuthState::Detected,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> AuthState {
        self.current_state
    }

    pub fn is_finished(&self) -> bool {
        self.current_state.is_terminal()
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recorded transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// States visited, starting with `Detected`.
    pub fn path(&self) -> Vec<AuthState> {
        std::iter::once(AuthState::Detected)
            .chain(self.history.iter().map(|t| t.to))
            .collect()
    }

    /// Move to `new_state` if the transition is allowed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` otherwise; the machine is left
    /// unchanged.
    pub fn transition_to(&mut self, new_state: AuthState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = Instant::now();

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        Ok(transition)
    }
}

impl Default for AuthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
