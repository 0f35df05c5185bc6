//! JSON bodies exchanged with the ledger service.
//!
//! Field names follow the service's camelCase convention. Replies are
//! decoded leniently: unknown fields are ignored and optional fields default.

use chrono::{DateTime, Utc};
use ketl_core::{CardNumber, CardUid, Challenge, ChallengeId, Rejection};
use serde::{Deserialize, Serialize};

/// `POST /api/machine/auth/challenge` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub machine_id: String,
    pub card_uid: String,
}

impl ChallengeRequest {
    pub fn new(machine_id: &str, uid: &CardUid) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            card_uid: uid.to_hex(),
        }
    }
}

/// Challenge issued by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeReply {
    pub challenge_id: ChallengeId,
    /// 32 hex characters.
    pub challenge: String,
}

impl ChallengeReply {
    /// Decode the hex challenge.
    ///
    /// # Errors
    ///
    /// Returns `ketl_core::Error::InvalidChallenge` unless the challenge is
    /// exactly 16 bytes of hex.
    pub fn into_challenge(self) -> ketl_core::Result<Challenge> {
        Challenge::from_hex(self.challenge_id, &self.challenge)
    }
}

/// `POST /api/machine/auth/validate` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub challenge_id: ChallengeId,
    /// Card response, 32 upper-case hex characters.
    pub response: String,
    pub card_uid: String,
}

/// Validation verdict as sent by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateReply {
    pub success: bool,
    pub card_number: Option<String>,
    pub business_unit_id: Option<String>,
    #[serde(alias = "error")]
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

/// Interpreted validation verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Accepted {
        card_number: CardNumber,
        business_unit_id: String,
    },
    Rejected {
        rejection: Rejection,
        message: Option<String>,
    },
}

impl ValidateReply {
    /// Classify the reply.
    ///
    /// A `success: true` reply without a usable card number or business unit
    /// is treated as an authentication failure: there is nothing to charge.
    pub fn into_validation(self) -> Validation {
        if !self.success {
            let rejection =
                Rejection::classify(self.error_code.as_deref(), self.error_message.as_deref());
            return Validation::Rejected {
                rejection,
                message: self.error_message,
            };
        }

        let card_number = self.card_number.as_deref().map(CardNumber::new);
        match (card_number, self.business_unit_id) {
            (Some(Ok(card_number)), Some(business_unit_id)) if !business_unit_id.is_empty() => {
                Validation::Accepted {
                    card_number,
                    business_unit_id,
                }
            }
            _ => Validation::Rejected {
                rejection: Rejection::AuthenticationFailed,
                message: Some("accepted without card number or business unit".to_string()),
            },
        }
    }
}

/// `POST /api/machine/auth/dispense` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispenseRequest {
    pub machine_id: String,
    pub card_number: CardNumber,
    pub business_unit_id: String,
    pub amount: f64,
    pub tea_type: String,
}

/// Balance figure; the service has sent both numbers and decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Balance {
    Number(f64),
    Text(String),
}

impl Balance {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Balance::Number(n) => Some(*n),
            Balance::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Debit outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispenseReply {
    pub success: bool,
    #[serde(alias = "newBalance")]
    pub remaining_balance: Option<Balance>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl DispenseReply {
    pub fn remaining(&self) -> Option<f64> {
        self.remaining_balance.as_ref().and_then(Balance::as_f64)
    }
}

/// `POST /api/machine/heartbeat` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub machine_id: String,
    pub status: String,
    pub daily_dispensed: u64,
    pub total_dispensed: u64,
    pub timestamp: DateTime<Utc>,
}

impl HeartbeatReport {
    pub fn online(machine_id: &str, daily_dispensed: u64, total_dispensed: u64) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            status: "online".to_string(),
            daily_dispensed,
            total_dispensed,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_challenge_request_shape() {
        let uid = CardUid::from_hex("04A1B2C3").unwrap();
        let body = serde_json::to_value(ChallengeRequest::new("UK_0001", &uid)).unwrap();
        assert_eq!(body, json!({"machineId": "UK_0001", "cardUid": "04A1B2C3"}));
    }

    #[test]
    fn test_challenge_reply_ignores_extra_fields() {
        let reply: ChallengeReply = serde_json::from_value(json!({
            "success": true,
            "challengeId": "ch-1",
            "challenge": "00112233445566778899AABBCCDDEEFF",
            "timestamp": 1700000000000u64
        }))
        .unwrap();

        let challenge = reply.into_challenge().unwrap();
        assert_eq!(challenge.id().as_str(), "ch-1");
        assert_eq!(challenge.bytes()[15], 0xFF);
    }

    #[test]
    fn test_challenge_reply_wrong_length() {
        let reply = ChallengeReply {
            challenge_id: ChallengeId::new("ch-1"),
            challenge: "0011".to_string(),
        };
        assert!(reply.into_challenge().is_err());
    }

    #[test]
    fn test_validate_accepted() {
        let reply: ValidateReply = serde_json::from_value(json!({
            "success": true,
            "authenticated": true,
            "cardNumber": "CARD-0042",
            "businessUnitId": "bu-7"
        }))
        .unwrap();

        assert_eq!(
            reply.into_validation(),
            Validation::Accepted {
                card_number: CardNumber::new("CARD-0042").unwrap(),
                business_unit_id: "bu-7".to_string(),
            }
        );
    }

    #[rstest]
    #[case::message(json!({"success": false, "errorMessage": "Insufficient balance"}), Rejection::LowBalance)]
    #[case::error_alias(json!({"success": false, "error": "Machine is disabled"}), Rejection::MachineDisabled)]
    #[case::code(json!({"success": false, "errorCode": "INVALID_CARD", "error": "nope"}), Rejection::InvalidCard)]
    #[case::unknown(json!({"success": false}), Rejection::AuthenticationFailed)]
    fn test_validate_rejections(#[case] body: serde_json::Value, #[case] expected: Rejection) {
        let reply: ValidateReply = serde_json::from_value(body).unwrap();
        match reply.into_validation() {
            Validation::Rejected { rejection, .. } => assert_eq!(rejection, expected),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_success_without_card_number() {
        let reply: ValidateReply =
            serde_json::from_value(json!({"success": true, "businessUnitId": "bu-7"})).unwrap();
        assert!(matches!(
            reply.into_validation(),
            Validation::Rejected {
                rejection: Rejection::AuthenticationFailed,
                ..
            }
        ));
    }

    #[rstest]
    #[case::number(json!({"success": true, "remainingBalance": 95.5}), Some(95.5))]
    #[case::string(json!({"success": true, "newBalance": "120.00"}), Some(120.0))]
    #[case::garbage(json!({"success": true, "newBalance": "n/a"}), None)]
    #[case::missing(json!({"success": true}), None)]
    fn test_dispense_balance(#[case] body: serde_json::Value, #[case] expected: Option<f64>) {
        let reply: DispenseReply = serde_json::from_value(body).unwrap();
        assert!(reply.success);
        assert_eq!(reply.remaining(), expected);
    }

    #[test]
    fn test_dispense_request_shape() {
        let body = serde_json::to_value(DispenseRequest {
            machine_id: "UK_0001".to_string(),
            card_number: CardNumber::new("CARD-0042").unwrap(),
            business_unit_id: "bu-7".to_string(),
            amount: 5.0,
            tea_type: "Regular Tea".to_string(),
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "machineId": "UK_0001",
                "cardNumber": "CARD-0042",
                "businessUnitId": "bu-7",
                "amount": 5.0,
                "teaType": "Regular Tea"
            })
        );
    }

    #[test]
    fn test_heartbeat_shape() {
        let body = serde_json::to_value(HeartbeatReport::online("UK_0001", 3, 40)).unwrap();
        assert_eq!(body["status"], "online");
        assert_eq!(body["dailyDispensed"], 3);
        assert_eq!(body["totalDispensed"], 40);
        let ts = body["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
