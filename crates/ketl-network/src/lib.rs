//! Ledger client for the tea kiosk.
//!
//! The ledger service issues authentication challenges, validates card
//! responses, debits business-unit wallets and receives heartbeats. This
//! crate defines the [`Ledger`] trait the kiosk is written against, the
//! [`HttpLedger`] production client, and a scripted [`mock::MockLedger`].
//!
//! Every failure mode (transport, timeout, non-200, bad body) collapses into
//! [`LedgerError`], which the kiosk reads as "no result".

pub mod client;
pub mod ledger;
pub mod messages;
pub mod mock;

pub use client::HttpLedger;
pub use ledger::{
    CHALLENGE_PATH, DISPENSE_PATH, HEARTBEAT_PATH, Ledger, LedgerError, Result, VALIDATE_PATH,
};
pub use messages::{
    Balance, ChallengeReply, ChallengeRequest, DispenseReply, DispenseRequest, HeartbeatReport,
    ValidateReply, ValidateRequest, Validation,
};
