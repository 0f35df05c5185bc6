//! HTTP client for the ledger service.
//!
//! ```text
//! AuthenticationOrchestrator ──┐
//!                              ├─> HttpLedger ──(HTTPS/JSON)──> ledger service
//! HeartbeatReporter ───────────┘
//! ```
//!
//! # Design
//!
//! - **No retries**: every call is one attempt; the caller decides what a
//!   missing result means.
//! - **One timeout**: the same bound applies to connect and the full exchange.
//! - **Status first**: anything but 200 is a failure, whatever the body says.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ketl_core::CardUid;
//! use ketl_network::{HttpLedger, Ledger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = HttpLedger::new("https://ledger.example.com", Duration::from_secs(5))?;
//! let uid = CardUid::from_hex("04A1B2C3D4E5F6")?;
//! let reply = ledger.request_challenge("UK_0001", &uid).await?;
//! println!("challenge {}", reply.challenge_id.as_str());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use ketl_core::CardUid;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::ledger::{
    CHALLENGE_PATH, DISPENSE_PATH, HEARTBEAT_PATH, Ledger, LedgerError, Result, VALIDATE_PATH,
};
use crate::messages::{
    ChallengeReply, ChallengeRequest, DispenseReply, DispenseRequest, HeartbeatReport,
    ValidateReply, ValidateRequest,
};

/// Ledger reached over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpLedger {
    /// Build a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] if the TLS backend cannot be set up.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("ketl-kiosk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn post<B, R>(&self, endpoint: &'static str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(endpoint, body).await?;
        response.json::<R>().await.map_err(|e| {
            warn!(endpoint, error = %e, "Undecodable ledger reply");
            LedgerError::Decode {
                endpoint,
                message: e.to_string(),
            }
        })
    }

    async fn send<B>(&self, endpoint: &'static str, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "POST");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(endpoint, status = status.as_u16(), "Ledger call rejected");
            return Err(LedgerError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport_error(endpoint: &'static str, err: &reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        warn!(endpoint, "Ledger call timed out");
        LedgerError::Timeout { endpoint }
    } else {
        warn!(endpoint, error = %err, "Ledger unreachable");
        LedgerError::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}

impl Ledger for HttpLedger {
    async fn request_challenge(&self, machine_id: &str, uid: &CardUid) -> Result<ChallengeReply> {
        let body = ChallengeRequest::new(machine_id, uid);
        self.post(CHALLENGE_PATH, &body).await
    }

    async fn validate_response(&self, request: &ValidateRequest) -> Result<ValidateReply> {
        self.post(VALIDATE_PATH, request).await
    }

    async fn authorize_dispense(&self, request: &DispenseRequest) -> Result<DispenseReply> {
        self.post(DISPENSE_PATH, request).await
    }

    async fn heartbeat(&self, report: &HeartbeatReport) -> Result<()> {
        // Body is an acknowledgement only.
        self.send(HEARTBEAT_PATH, report).await.map(|_| ())
    }
}
