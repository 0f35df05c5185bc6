use crate::{
    Result,
    constants::{
        CHALLENGE_LENGTH, MAX_CARD_NUMBER_LENGTH, MAX_UID_LENGTH, MIN_CARD_NUMBER_LENGTH,
        MIN_UID_LENGTH,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Card unique identifier read during anticollision (4-10 bytes).
///
/// Identifies a physical card only for as long as it stays on the reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardUid(Vec<u8>);

impl CardUid {
    /// Create a UID with length validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidCardUid` if the length is outside 4-10 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if !(MIN_UID_LENGTH..=MAX_UID_LENGTH).contains(&bytes.len()) {
            return Err(Error::InvalidCardUid(format!(
                "UID must be {MIN_UID_LENGTH}-{MAX_UID_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(CardUid(bytes))
    }

    /// Parse a UID from its hex rendering.
    ///
    /// # Errors
    /// Returns an error on malformed hex or an out-of-range length.
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::new(hex::decode(s.trim())?)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Upper-case hex, the form the ledger expects.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for CardUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CardUid::from_hex(s)
    }
}

/// Server-issued identifier of a single challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(String);

impl ChallengeId {
    pub fn new(id: impl Into<String>) -> Self {
        ChallengeId(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random challenge issued by the ledger for one authentication attempt.
///
/// Deliberately not `Clone`: a challenge is consumed by exactly one card
/// exchange.
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge {
    id: ChallengeId,
    bytes: [u8; CHALLENGE_LENGTH],
}

impl Challenge {
    pub fn new(id: ChallengeId, bytes: [u8; CHALLENGE_LENGTH]) -> Self {
        Self { id, bytes }
    }

    /// Build a challenge from the hex payload the ledger sends.
    ///
    /// # Errors
    /// Returns `Error::InvalidChallenge` unless the payload decodes to exactly
    /// 16 bytes.
    pub fn from_hex(id: ChallengeId, payload: &str) -> Result<Self> {
        let raw =
            hex::decode(payload.trim()).map_err(|e| Error::InvalidChallenge(e.to_string()))?;
        let bytes: [u8; CHALLENGE_LENGTH] = raw.try_into().map_err(|raw: Vec<u8>| {
            Error::InvalidChallenge(format!(
                "expected {CHALLENGE_LENGTH} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self { id, bytes })
    }

    #[must_use]
    pub fn id(&self) -> &ChallengeId {
        &self.id
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; CHALLENGE_LENGTH] {
        &self.bytes
    }

    /// Split into the identifier (needed for validation) and the raw bytes.
    #[must_use]
    pub fn into_parts(self) -> (ChallengeId, [u8; CHALLENGE_LENGTH]) {
        (self.id, self.bytes)
    }
}

/// Where a card response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    /// Decoded from a real card reply.
    Card,

    /// Challenge echoed back because no reader hardware is present.
    SimulatedEcho,
}

impl fmt::Display for ResponseOrigin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseOrigin::Card => write!(f, "card"),
            ResponseOrigin::SimulatedEcho => write!(f, "simulated-echo"),
        }
    }
}

/// Encrypted 16-byte response to a challenge, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardResponse {
    bytes: [u8; CHALLENGE_LENGTH],
    origin: ResponseOrigin,
}

impl CardResponse {
    /// Response decoded from the card.
    #[must_use]
    pub fn from_card(bytes: [u8; CHALLENGE_LENGTH]) -> Self {
        Self {
            bytes,
            origin: ResponseOrigin::Card,
        }
    }

    /// Simulated response: the challenge bytes echoed back unchanged.
    #[must_use]
    pub fn simulated_echo(challenge: &[u8; CHALLENGE_LENGTH]) -> Self {
        Self {
            bytes: *challenge,
            origin: ResponseOrigin::SimulatedEcho,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; CHALLENGE_LENGTH] {
        &self.bytes
    }

    #[must_use]
    pub fn origin(&self) -> ResponseOrigin {
        self.origin
    }

    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.origin == ResponseOrigin::SimulatedEcho
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

/// Card number as known to the ledger.
///
/// # Security
/// Comparison is constant-time so card numbers can be matched without
/// leaking prefix information through timing.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardNumber(String);

impl CardNumber {
    /// Create a card number, trimming surrounding whitespace.
    ///
    /// # Errors
    /// Returns `Error::InvalidCardNumber` if the trimmed value is empty, too
    /// long, or not ASCII.
    pub fn new(number: &str) -> Result<Self> {
        let number = number.trim();
        let len = number.len();
        if !(MIN_CARD_NUMBER_LENGTH..=MAX_CARD_NUMBER_LENGTH).contains(&len) {
            return Err(Error::InvalidCardNumber(format!(
                "Card number must be {MIN_CARD_NUMBER_LENGTH}-{MAX_CARD_NUMBER_LENGTH} chars, got {len}"
            )));
        }
        if !number.is_ascii() {
            return Err(Error::InvalidCardNumber(
                "Card number must be ASCII".to_string(),
            ));
        }
        Ok(CardNumber(number.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CardNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CardNumber::new(&value)
    }
}

impl From<CardNumber> for String {
    fn from(value: CardNumber) -> Self {
        value.0
    }
}

impl PartialEq for CardNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for CardNumber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// User-facing outcome codes, one per failure class.
///
/// The set is closed: every terminal failure of an authentication attempt
/// maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackCode {
    Offline,
    InvalidCard,
    LowBalance,
    MachineDisabled,
    DispenseFail,
    AuthFailed,
    CardError,
    SystemError,
}

impl FeedbackCode {
    /// Wire/log form of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackCode::Offline => "OFFLINE",
            FeedbackCode::InvalidCard => "INVALID_CARD",
            FeedbackCode::LowBalance => "LOW_BALANCE",
            FeedbackCode::MachineDisabled => "MACHINE_DISABLED",
            FeedbackCode::DispenseFail => "DISPENSE_FAIL",
            FeedbackCode::AuthFailed => "AUTH_FAILED",
            FeedbackCode::CardError => "CARD_ERROR",
            FeedbackCode::SystemError => "SYSTEM_ERROR",
        }
    }
}

impl fmt::Display for FeedbackCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal presented to the customer at the end of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feedback {
    Success,
    Error(FeedbackCode),
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Feedback::Success => write!(f, "SUCCESS"),
            Feedback::Error(code) => write!(f, "{code}"),
        }
    }
}

/// Why the ledger refused a card during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    InvalidCard,
    LowBalance,
    MachineDisabled,
    AuthenticationFailed,
}

impl Rejection {
    /// Classify a rejection from the ledger's structured code, falling back
    /// to the message strings the ledger has historically sent.
    #[must_use]
    pub fn classify(error_code: Option<&str>, message: Option<&str>) -> Self {
        if let Some(code) = error_code.and_then(Self::from_code) {
            return code;
        }

        let message = message.unwrap_or_default();
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("insufficient balance") {
            Rejection::LowBalance
        } else if lowered.contains("machine is disabled") {
            Rejection::MachineDisabled
        } else if lowered.contains("invalid card")
            || lowered.contains("not active")
            || lowered.contains("machine not found")
        {
            Rejection::InvalidCard
        } else {
            Rejection::AuthenticationFailed
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "INVALID_CARD" | "CARD_NOT_ACTIVE" => Some(Rejection::InvalidCard),
            "LOW_BALANCE" | "INSUFFICIENT_BALANCE" => Some(Rejection::LowBalance),
            "MACHINE_DISABLED" => Some(Rejection::MachineDisabled),
            "AUTH_FAILED" | "INVALID_RESPONSE" | "CHALLENGE_EXPIRED" => {
                Some(Rejection::AuthenticationFailed)
            }
            _ => None,
        }
    }

    /// Feedback code shown for this rejection.
    #[must_use]
    pub fn feedback_code(self) -> FeedbackCode {
        match self {
            Rejection::InvalidCard => FeedbackCode::InvalidCard,
            Rejection::LowBalance => FeedbackCode::LowBalance,
            Rejection::MachineDisabled => FeedbackCode::MachineDisabled,
            Rejection::AuthenticationFailed => FeedbackCode::AuthFailed,
        }
    }

    /// Whether the rejection counts against the card's authenticity.
    ///
    /// Balance and machine-state refusals are business outcomes, not
    /// authentication failures.
    #[must_use]
    pub fn counts_as_auth_failure(self) -> bool {
        matches!(
            self,
            Rejection::InvalidCard | Rejection::AuthenticationFailed
        )
    }
}
