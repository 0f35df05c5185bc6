//! The remote ledger seen from the kiosk.

use std::future::Future;

use ketl_core::CardUid;
use thiserror::Error;

use crate::messages::{
    ChallengeReply, DispenseReply, DispenseRequest, HeartbeatReport, ValidateReply,
    ValidateRequest,
};

pub const CHALLENGE_PATH: &str = "/api/machine/auth/challenge";
pub const VALIDATE_PATH: &str = "/api/machine/auth/validate";
pub const DISPENSE_PATH: &str = "/api/machine/auth/dispense";
pub const HEARTBEAT_PATH: &str = "/api/machine/heartbeat";

/// Result type alias for ledger calls.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Why a ledger call produced no result.
///
/// Callers treat every variant the same way; the distinction is for logs.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("Request to {endpoint} failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    /// Request did not complete within the configured timeout.
    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },

    /// Any status other than 200.
    #[error("{endpoint} answered HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    /// 200 with a body that does not match the expected shape.
    #[error("Could not decode {endpoint} reply: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    /// Client could not be built.
    #[error("Invalid ledger configuration: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            LedgerError::Transport { endpoint, .. }
            | LedgerError::Timeout { endpoint }
            | LedgerError::Status { endpoint, .. }
            | LedgerError::Decode { endpoint, .. } => Some(endpoint),
            LedgerError::Config(_) => None,
        }
    }
}

/// Operations the kiosk needs from the ledger service.
///
/// Methods return `Send` futures so authentication flows can be spawned onto
/// the runtime while generic over the ledger.
pub trait Ledger: Send + Sync + 'static {
    /// Ask for a fresh challenge for the card in the field.
    fn request_challenge(
        &self,
        machine_id: &str,
        uid: &CardUid,
    ) -> impl Future<Output = Result<ChallengeReply>> + Send;

    /// Submit the card's response for verification.
    fn validate_response(
        &self,
        request: &ValidateRequest,
    ) -> impl Future<Output = Result<ValidateReply>> + Send;

    /// Debit the business unit for one serving. Never retried.
    fn authorize_dispense(
        &self,
        request: &DispenseRequest,
    ) -> impl Future<Output = Result<DispenseReply>> + Send;

    /// Report liveness and counters.
    fn heartbeat(&self, report: &HeartbeatReport) -> impl Future<Output = Result<()>> + Send;
}
