//! One authentication attempt, from card tap to feedback.
//!
//! ```text
//! Detected ─► ChallengeRequested ─► CardExchanged ─► ServerValidated ─► Authorized ─► Dispensed
//!    │               │                    │                 │               │
//!    ▼               ▼                    ▼                 ▼               ▼
//! Offline     AuthFailed/CardError   InvalidCard/       DispenseFail    DispenseFail
//!                                    LowBalance/...
//! ```
//!
//! The debit is requested at most once and the dispenser only runs after the
//! ledger confirmed it. Acceptance is shown as soon as the debit clears, before
//! the pour. A dispenser failure after a successful debit is not rolled back;
//! it is logged at error level for reconciliation and signalled as
//! `DISPENSE_FAIL` after the acceptance.
//!
//! Every ledger call and the card exchange are bounded by the request timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use ketl_core::{
    CardResponse, CardUid, Feedback, FeedbackCode, KioskConfig, ResponseOrigin,
    constants::CHALLENGE_LENGTH,
};
use ketl_hardware::ReaderBackend;
use ketl_network::{
    CHALLENGE_PATH, DISPENSE_PATH, DispenseRequest, Ledger, VALIDATE_PATH, ValidateRequest,
    Validation,
};
use ketl_protocol::{decode_authenticate, encode_authenticate};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::dispenser::DispenseController;
use crate::feedback::FeedbackSink;
use crate::presence::SharedReader;
use crate::state_machine::{AuthState, AuthStateMachine};
use crate::{MachineState, ProcessingGuard, Result};

/// Per-attempt parameters taken from the machine configuration.
#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub machine_id: String,
    pub tea_price: f64,
    pub tea_type: String,
    pub simulate_card_crypto: bool,
    pub offline_mode: bool,
    pub request_timeout: Duration,
    pub settle_delay: Duration,
    pub dispense_duration: Duration,
}

impl From<&KioskConfig> for AttemptSettings {
    fn from(config: &KioskConfig) -> Self {
        Self {
            machine_id: config.machine_id.clone(),
            tea_price: config.tea_price,
            tea_type: config.tea_type.clone(),
            simulate_card_crypto: config.simulate_card_crypto,
            offline_mode: config.offline_mode,
            request_timeout: config.request_timeout(),
            settle_delay: config.settle_delay(),
            dispense_duration: config.dispense_duration(),
        }
    }
}

/// What happened during one attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt_id: Uuid,
    pub uid: CardUid,
    pub final_state: AuthState,
    /// States visited, starting with `Detected`.
    pub transitions: Vec<AuthState>,
    pub response_origin: Option<ResponseOrigin>,
    pub debit_attempted: bool,
    pub dispensed: bool,
    pub remaining_balance: Option<f64>,
}

impl AttemptReport {
    pub fn feedback(&self) -> Feedback {
        self.final_state
            .feedback()
            .unwrap_or(Feedback::Error(FeedbackCode::SystemError))
    }
}

struct Attempt {
    id: Uuid,
    uid: CardUid,
    machine: AuthStateMachine,
    response_origin: Option<ResponseOrigin>,
    debit_attempted: bool,
    dispensed: bool,
    remaining_balance: Option<f64>,
    /// `Success` was already shown.
    accepted: bool,
}

impl Attempt {
    fn new(uid: CardUid) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid,
            machine: AuthStateMachine::new(),
            response_origin: None,
            debit_attempted: false,
            dispensed: false,
            remaining_balance: None,
            accepted: false,
        }
    }

    fn advance(&mut self, next: AuthState) {
        if let Err(e) = self.machine.transition_to(next) {
            error!(error = %e, "Attempt state machine refused transition");
            if self.machine.transition_to(AuthState::SystemError).is_err() {
                debug!("Attempt already terminal");
            }
        }
    }

    fn into_report(self) -> AttemptReport {
        AttemptReport {
            attempt_id: self.id,
            transitions: self.machine.path(),
            final_state: self.machine.current_state(),
            uid: self.uid,
            response_origin: self.response_origin,
            debit_attempted: self.debit_attempted,
            dispensed: self.dispensed,
            remaining_balance: self.remaining_balance,
        }
    }
}

/// Runs authentication attempts against the ledger, the reader and the
/// dispenser. Only one attempt runs at a time; the caller proves it holds the
/// machine by passing the [`ProcessingGuard`].
pub struct AuthenticationOrchestrator<L, P, F> {
    settings: AttemptSettings,
    ledger: Arc<L>,
    reader: SharedReader,
    dispenser: Mutex<DispenseController<P>>,
    feedback: F,
    state: Arc<MachineState>,
}

impl<L, P, F> AuthenticationOrchestrator<L, P, F>
where
    L: Ledger,
    P: OutputPin + Send,
    F: FeedbackSink,
{
    pub fn new(
        settings: AttemptSettings,
        ledger: Arc<L>,
        reader: SharedReader,
        dispenser: DispenseController<P>,
        feedback: F,
        state: Arc<MachineState>,
    ) -> Self {
        Self {
            settings,
            ledger,
            reader,
            dispenser: Mutex::new(dispenser),
            feedback,
            state,
        }
    }

    pub fn settings(&self) -> &AttemptSettings {
        &self.settings
    }

    /// Run one attempt to its terminal state.
    ///
    /// Shows the outcome once (a failed pour is shown after the acceptance),
    /// waits the settle delay and then releases `guard`.
    pub async fn run(&self, uid: CardUid, guard: ProcessingGuard) -> AttemptReport {
        let mut attempt = Attempt::new(uid);
        let span = info_span!("attempt", id = %attempt.id, uid = %attempt.uid);

        async move {
            info!("Authentication started");
            self.authenticate(&mut attempt).await;
            if !attempt.machine.is_finished() {
                attempt.advance(AuthState::SystemError);
            }

            let accepted = attempt.accepted;
            let report = attempt.into_report();
            let feedback = report.feedback();
            info!(state = %report.final_state, feedback = %feedback, "Attempt finished");

            if !(accepted && feedback == Feedback::Success) {
                self.feedback.signal(feedback).await;
            }
            sleep(self.settings.settle_delay).await;
            guard.release();
            report
        }
        .instrument(span)
        .await
    }

    async fn authenticate(&self, attempt: &mut Attempt) {
        if !self.settings.offline_mode && !self.state.is_online() {
            warn!("Ledger unreachable at last heartbeat, refusing card");
            attempt.advance(AuthState::Offline);
            return;
        }

        // Challenge
        attempt.advance(AuthState::ChallengeRequested);
        let Some(reply) = self
            .remote(
                CHALLENGE_PATH,
                self.ledger
                    .request_challenge(&self.settings.machine_id, &attempt.uid),
            )
            .await
        else {
            attempt.advance(AuthState::AuthFailed);
            return;
        };
        let challenge = match reply.into_challenge() {
            Ok(challenge) => challenge,
            Err(e) => {
                warn!(error = %e, "Ledger sent an unusable challenge");
                attempt.advance(AuthState::AuthFailed);
                return;
            }
        };
        let (challenge_id, challenge) = challenge.into_parts();
        debug!(challenge_id = %challenge_id, "Challenge received");

        // Card exchange
        let response = match timeout(self.settings.request_timeout, self.card_response(&challenge))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Card exchange failed");
                attempt.advance(AuthState::CardError);
                return;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.request_timeout.as_millis() as u64,
                    "Card did not answer in time"
                );
                attempt.advance(AuthState::CardError);
                return;
            }
        };
        attempt.response_origin = Some(response.origin());
        attempt.advance(AuthState::CardExchanged);

        // Validation
        let request = ValidateRequest {
            challenge_id,
            response: response.to_hex(),
            card_uid: attempt.uid.to_hex(),
        };
        let Some(verdict) = self
            .remote(VALIDATE_PATH, self.ledger.validate_response(&request))
            .await
        else {
            self.state.record_auth_failure();
            attempt.advance(AuthState::AuthFailed);
            return;
        };
        let (card_number, business_unit_id) = match verdict.into_validation() {
            Validation::Accepted {
                card_number,
                business_unit_id,
            } => (card_number, business_unit_id),
            Validation::Rejected { rejection, message } => {
                warn!(?rejection, message = message.as_deref().unwrap_or(""), "Card rejected");
                if rejection.counts_as_auth_failure() {
                    self.state.record_auth_failure();
                }
                attempt.advance(AuthState::from_failure(rejection.feedback_code()));
                return;
            }
        };
        info!(card = %card_number, business_unit = %business_unit_id, "Card validated");
        attempt.advance(AuthState::ServerValidated);

        // Debit, exactly once
        let request = DispenseRequest {
            machine_id: self.settings.machine_id.clone(),
            card_number,
            business_unit_id,
            amount: self.settings.tea_price,
            tea_type: self.settings.tea_type.clone(),
        };
        attempt.debit_attempted = true;
        let Some(debit) = self
            .remote(DISPENSE_PATH, self.ledger.authorize_dispense(&request))
            .await
        else {
            attempt.advance(AuthState::DispenseFail);
            return;
        };
        if !debit.success {
            let reason = debit.error.or(debit.message).unwrap_or_default();
            warn!(reason = %reason, "Ledger refused the debit");
            attempt.advance(AuthState::DispenseFail);
            return;
        }
        attempt.remaining_balance = debit.remaining();
        info!(remaining = ?attempt.remaining_balance, "Debit authorized");
        attempt.advance(AuthState::Authorized);
        self.feedback.signal(Feedback::Success).await;
        attempt.accepted = true;

        // Dispense
        let poured = self
            .dispenser
            .lock()
            .await
            .dispense(self.settings.dispense_duration)
            .await;
        match poured {
            Ok(()) => {
                self.state.record_dispense();
                attempt.dispensed = true;
                attempt.advance(AuthState::Dispensed);
            }
            Err(e) => {
                error!(
                    attempt_id = %attempt.id,
                    card = %request.card_number,
                    business_unit = %request.business_unit_id,
                    amount = request.amount,
                    error = %e,
                    "Dispense failed after a successful debit, needs reconciliation"
                );
                attempt.advance(AuthState::DispenseFail);
            }
        }
    }

    /// Obtain the card's answer to `challenge`.
    async fn card_response(&self, challenge: &[u8; CHALLENGE_LENGTH]) -> Result<CardResponse> {
        let mut reader = self.reader.lock().await;

        if reader.kind().is_simulated() && self.settings.simulate_card_crypto {
            warn!(reader = reader.name(), "No card crypto available, echoing the challenge");
            return Ok(CardResponse::simulated_echo(challenge));
        }

        let command = encode_authenticate(challenge);
        let reply = reader.send_apdu(&command).await?;
        let response = CardResponse::from_card(decode_authenticate(&reply)?);
        debug!(origin = %response.origin(), "Card answered");
        Ok(response)
    }

    /// Await a ledger call under the request timeout. `None` means no result.
    async fn remote<T>(
        &self,
        endpoint: &'static str,
        call: impl Future<Output = ketl_network::Result<T>>,
    ) -> Option<T> {
        match timeout(self.settings.request_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(endpoint, error = %e, "Ledger call produced no result");
                None
            }
            Err(_) => {
                warn!(
                    endpoint,
                    timeout_ms = self.settings.request_timeout.as_millis() as u64,
                    "Ledger call timed out"
                );
                None
            }
        }
    }
}
