//! Scripted in-memory ledger for tests and bench runs.
//!
//! Every endpoint has a queue of scripted outcomes; when the queue is empty a
//! happy-path default is used. Calls are recorded so tests can assert on what
//! the kiosk sent.
//!
//! ```
//! use ketl_core::CardUid;
//! use ketl_network::mock::{MockLedger, Scripted};
//! use ketl_network::{Ledger, ValidateReply};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = MockLedger::new();
//! ledger.script_validate(Scripted::Reply(ValidateReply {
//!     success: false,
//!     error_message: Some("Insufficient balance".into()),
//!     ..Default::default()
//! }));
//!
//! let uid = CardUid::from_hex("04A1B2C3").unwrap();
//! let challenge = ledger.request_challenge("UK_0001", &uid).await.unwrap();
//! assert_eq!(challenge.challenge.len(), 32);
//! assert_eq!(ledger.calls().challenge, 1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use ketl_core::{CardUid, ChallengeId};

use crate::ledger::{
    CHALLENGE_PATH, DISPENSE_PATH, HEARTBEAT_PATH, Ledger, LedgerError, Result, VALIDATE_PATH,
};
use crate::messages::{
    Balance, ChallengeReply, DispenseReply, DispenseRequest, HeartbeatReport, ValidateReply,
    ValidateRequest,
};

/// Challenge bytes handed out by default, as hex.
pub const DEFAULT_CHALLENGE_HEX: &str = "000102030405060708090A0B0C0D0E0F";
pub const DEFAULT_CARD_NUMBER: &str = "CARD-0001";
pub const DEFAULT_BUSINESS_UNIT: &str = "bu-1";
pub const DEFAULT_REMAINING_BALANCE: f64 = 95.0;

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Reply(T),
    /// Behave like a non-200 answer.
    NoResult,
    /// Never answer; the caller's timeout has to fire.
    Stall,
}

/// Number of calls per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub challenge: usize,
    pub validate: usize,
    pub dispense: usize,
    pub heartbeat: usize,
}

#[derive(Debug, Default)]
struct MockState {
    challenge: VecDeque<Scripted<ChallengeReply>>,
    validate: VecDeque<Scripted<ValidateReply>>,
    dispense: VecDeque<Scripted<DispenseReply>>,
    heartbeat: VecDeque<Scripted<()>>,
    calls: CallCounts,
    validate_requests: Vec<ValidateRequest>,
    dispense_requests: Vec<DispenseRequest>,
    heartbeats: Vec<HeartbeatReport>,
}

/// In-memory [`Ledger`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn script_challenge(&self, step: Scripted<ChallengeReply>) {
        self.lock().challenge.push_back(step);
    }

    pub fn script_validate(&self, step: Scripted<ValidateReply>) {
        self.lock().validate.push_back(step);
    }

    pub fn script_dispense(&self, step: Scripted<DispenseReply>) {
        self.lock().dispense.push_back(step);
    }

    pub fn script_heartbeat(&self, step: Scripted<()>) {
        self.lock().heartbeat.push_back(step);
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn validate_requests(&self) -> Vec<ValidateRequest> {
        self.lock().validate_requests.clone()
    }

    pub fn dispense_requests(&self) -> Vec<DispenseRequest> {
        self.lock().dispense_requests.clone()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatReport> {
        self.lock().heartbeats.clone()
    }
}

fn default_challenge(n: usize) -> ChallengeReply {
    ChallengeReply {
        challenge_id: ChallengeId::new(format!("ch-{n}")),
        challenge: DEFAULT_CHALLENGE_HEX.to_string(),
    }
}

fn default_validate() -> ValidateReply {
    ValidateReply {
        success: true,
        card_number: Some(DEFAULT_CARD_NUMBER.to_string()),
        business_unit_id: Some(DEFAULT_BUSINESS_UNIT.to_string()),
        ..Default::default()
    }
}

fn default_dispense() -> DispenseReply {
    DispenseReply {
        success: true,
        remaining_balance: Some(Balance::Number(DEFAULT_REMAINING_BALANCE)),
        message: Some("Tea dispensed successfully".to_string()),
        error: None,
    }
}

async fn play<T>(endpoint: &'static str, step: Scripted<T>) -> Result<T> {
    match step {
        Scripted::Reply(value) => Ok(value),
        Scripted::NoResult => Err(LedgerError::Status {
            endpoint,
            status: 500,
        }),
        Scripted::Stall => {
            std::future::pending::<()>().await;
            Err(LedgerError::Timeout { endpoint })
        }
    }
}

impl Ledger for MockLedger {
    async fn request_challenge(&self, _machine_id: &str, _uid: &CardUid) -> Result<ChallengeReply> {
        let step = {
            let mut state = self.lock();
            state.calls.challenge += 1;
            let n = state.calls.challenge;
            state
                .challenge
                .pop_front()
                .unwrap_or_else(|| Scripted::Reply(default_challenge(n)))
        };
        play(CHALLENGE_PATH, step).await
    }

    async fn validate_response(&self, request: &ValidateRequest) -> Result<ValidateReply> {
        let step = {
            let mut state = self.lock();
            state.calls.validate += 1;
            state.validate_requests.push(request.clone());
            state
                .validate
                .pop_front()
                .unwrap_or_else(|| Scripted::Reply(default_validate()))
        };
        play(VALIDATE_PATH, step).await
    }

    async fn authorize_dispense(&self, request: &DispenseRequest) -> Result<DispenseReply> {
        let step = {
            let mut state = self.lock();
            state.calls.dispense += 1;
            state.dispense_requests.push(request.clone());
            state
                .dispense
                .pop_front()
                .unwrap_or_else(|| Scripted::Reply(default_dispense()))
        };
        play(DISPENSE_PATH, step).await
    }

    async fn heartbeat(&self, report: &HeartbeatReport) -> Result<()> {
        let step = {
            let mut state = self.lock();
            state.calls.heartbeat += 1;
            state.heartbeats.push(report.clone());
            state.heartbeat.pop_front().unwrap_or(Scripted::Reply(()))
        };
        play(HEARTBEAT_PATH, step).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_core::CardNumber;

    fn uid() -> CardUid {
        CardUid::from_hex("04A1B2C3").unwrap()
    }

    #[tokio::test]
    async fn test_defaults_are_happy_path() {
        let ledger = MockLedger::new();

        let challenge = ledger.request_challenge("UK_0001", &uid()).await.unwrap();
        assert_eq!(challenge.challenge_id.as_str(), "ch-1");

        let validate = ledger
            .validate_response(&ValidateRequest {
                challenge_id: challenge.challenge_id,
                response: DEFAULT_CHALLENGE_HEX.to_string(),
                card_uid: uid().to_hex(),
            })
            .await
            .unwrap();
        assert!(validate.success);

        let dispense = ledger
            .authorize_dispense(&DispenseRequest {
                machine_id: "UK_0001".to_string(),
                card_number: CardNumber::new(DEFAULT_CARD_NUMBER).unwrap(),
                business_unit_id: DEFAULT_BUSINESS_UNIT.to_string(),
                amount: 5.0,
                tea_type: "Regular Tea".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(dispense.remaining(), Some(DEFAULT_REMAINING_BALANCE));

        assert_eq!(
            ledger.calls(),
            CallCounts {
                challenge: 1,
                validate: 1,
                dispense: 1,
                heartbeat: 0
            }
        );
    }

    #[tokio::test]
    async fn test_scripted_no_result() {
        let ledger = MockLedger::new();
        ledger.script_challenge(Scripted::NoResult);

        assert!(matches!(
            ledger.request_challenge("UK_0001", &uid()).await,
            Err(LedgerError::Status { status: 500, .. })
        ));
        // Queue drained, default again.
        assert!(ledger.request_challenge("UK_0001", &uid()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_needs_timeout() {
        let ledger = MockLedger::new();
        ledger.script_heartbeat(Scripted::Stall);

        let report = HeartbeatReport::online("UK_0001", 0, 0);
        let outcome =
            tokio::time::timeout(std::time::Duration::from_secs(5), ledger.heartbeat(&report))
                .await;
        assert!(outcome.is_err());
        assert_eq!(ledger.heartbeats().len(), 1);
    }
}
