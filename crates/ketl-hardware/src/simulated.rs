//! Simulated reader for bench use and tests.
//!
//! The reader and its handle share one piece of state: the handle decides
//! which card is "in the field" and what the card answers, the reader reports
//! it back through [`ReaderBackend`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ketl_core::{CardUid, ReaderConfig};
use ketl_protocol::{AuthenticateCommand, StatusWord};
use tracing::{debug, info};

use crate::traits::{ReaderBackend, ReaderKind};
use crate::{HardwareError, Result};

const DEFAULT_NAME: &str = "Simulated Reader";

#[derive(Debug, Default)]
struct SimState {
    initialized: bool,
    card: Option<CardUid>,
    replies: VecDeque<Vec<u8>>,
    fail_next_read: bool,
    stall_next_exchange: bool,
    sent: Vec<Vec<u8>>,
    reads: u64,
    last_read_timeout: Option<Duration>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // State stays consistent even if a holder panicked mid-update.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reader half of the simulated backend.
#[derive(Debug)]
pub struct SimulatedReader {
    name: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedReader {
    /// Create a simulated reader and the handle that controls it.
    pub fn new() -> (Self, SimulatedReaderHandle) {
        Self::with_name(DEFAULT_NAME)
    }

    pub fn with_name(name: impl Into<String>) -> (Self, SimulatedReaderHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let reader = Self {
            name: name.into(),
            state: Arc::clone(&state),
        };
        (reader, SimulatedReaderHandle { state })
    }
}

impl ReaderBackend for SimulatedReader {
    async fn initialize(&mut self, _config: &ReaderConfig) -> Result<()> {
        lock(&self.state).initialized = true;
        info!(reader = %self.name, "Simulated reader ready");
        Ok(())
    }

    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<CardUid>> {
        let mut state = lock(&self.state);
        if !state.initialized {
            return Err(HardwareError::not_initialized(&self.name));
        }
        state.reads += 1;
        state.last_read_timeout = Some(timeout);
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(HardwareError::communication("injected read failure"));
        }
        Ok(state.card.clone())
    }

    async fn send_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let stalled = std::mem::take(&mut lock(&self.state).stall_next_exchange);
        if stalled {
            debug!("Simulated card withholding its reply");
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        if state.card.is_none() {
            return Err(HardwareError::card("no card in field"));
        }
        state.sent.push(command.to_vec());

        if let Err(err) = AuthenticateCommand::parse(command) {
            debug!(error = %err, "Simulated card refusing frame");
            let sw = StatusWord::ILLEGAL_COMMAND;
            return Ok(vec![sw.sw1, sw.sw2]);
        }

        state
            .replies
            .pop_front()
            .ok_or_else(|| HardwareError::unsupported("simulated card has no scripted reply"))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ReaderKind {
        ReaderKind::Simulated
    }
}

/// Control half of the simulated backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SimulatedReaderHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedReaderHandle {
    /// Place a card in the field. Replaces any card already there.
    pub fn present(&self, uid: CardUid) {
        debug!(uid = %uid, "Simulated card presented");
        lock(&self.state).card = Some(uid);
    }

    /// Lift the card.
    pub fn remove(&self) {
        debug!("Simulated card removed");
        lock(&self.state).card = None;
    }

    pub fn current(&self) -> Option<CardUid> {
        lock(&self.state).card.clone()
    }

    /// Queue the raw reply for the next authenticate frame.
    pub fn script_reply(&self, reply: impl Into<Vec<u8>>) {
        lock(&self.state).replies.push_back(reply.into());
    }

    /// Make the next `read_uid` return `Err`.
    pub fn fail_next_read(&self) {
        lock(&self.state).fail_next_read = true;
    }

    /// Make the next `send_apdu` never complete, like a wedged transmit.
    pub fn stall_next_exchange(&self) {
        lock(&self.state).stall_next_exchange = true;
    }

    /// Frames received by `send_apdu`, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    /// Number of `read_uid` calls on an initialized reader.
    pub fn read_count(&self) -> u64 {
        lock(&self.state).reads
    }

    pub fn last_read_timeout(&self) -> Option<Duration> {
        lock(&self.state).last_read_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ketl_protocol::encode_authenticate;

    const TIMEOUT: Duration = Duration::from_millis(10);

    async fn ready() -> (SimulatedReader, SimulatedReaderHandle) {
        let (mut reader, handle) = SimulatedReader::new();
        reader.initialize(&ReaderConfig::default()).await.unwrap();
        (reader, handle)
    }

    fn uid() -> CardUid {
        CardUid::from_hex("04A1B2C3D4E5F6").unwrap()
    }

    #[tokio::test]
    async fn test_read_before_initialize_fails() {
        let (mut reader, _handle) = SimulatedReader::new();
        assert!(matches!(
            reader.read_uid(TIMEOUT).await,
            Err(HardwareError::NotInitialized { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_field_reads_none() {
        let (mut reader, handle) = ready().await;
        for _ in 0..5 {
            assert_eq!(reader.read_uid(TIMEOUT).await.unwrap(), None);
        }
        assert_eq!(handle.read_count(), 5);
    }

    #[tokio::test]
    async fn test_present_and_remove() {
        let (mut reader, handle) = ready().await;

        handle.present(uid());
        assert_eq!(reader.read_uid(TIMEOUT).await.unwrap(), Some(uid()));
        assert_eq!(reader.read_uid(TIMEOUT).await.unwrap(), Some(uid()));

        handle.remove();
        assert_eq!(reader.read_uid(TIMEOUT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let (mut reader, handle) = ready().await;
        handle.fail_next_read();

        assert!(reader.read_uid(TIMEOUT).await.is_err());
        assert!(reader.read_uid(TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_reply() {
        let (mut reader, handle) = ready().await;
        handle.present(uid());
        handle.script_reply(vec![0xAB; 18]);

        let frame = encode_authenticate(&[0x01; 16]);
        let reply = reader.send_apdu(&frame).await.unwrap();

        assert_eq!(reply, vec![0xAB; 18]);
        assert_eq!(handle.sent_frames(), vec![frame.to_vec()]);
    }

    #[tokio::test]
    async fn test_unscripted_reply_is_unsupported() {
        let (mut reader, handle) = ready().await;
        handle.present(uid());

        let frame = encode_authenticate(&[0x01; 16]);
        assert!(matches!(
            reader.send_apdu(&frame).await,
            Err(HardwareError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_illegal_command() {
        let (mut reader, handle) = ready().await;
        handle.present(uid());

        let reply = reader.send_apdu(&[0x00, 0x01]).await.unwrap();
        assert_eq!(reply, vec![0x91, 0x1C]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_exchange_never_answers() {
        let (mut reader, handle) = ready().await;
        handle.present(uid());
        handle.stall_next_exchange();
        handle.script_reply(vec![0xAB; 18]);

        let frame = encode_authenticate(&[0x01; 16]);
        let stalled = tokio::time::timeout(Duration::from_secs(30), reader.send_apdu(&frame)).await;
        assert!(stalled.is_err());
        assert!(handle.sent_frames().is_empty());

        // One-shot: the next exchange gets the scripted reply.
        assert_eq!(reader.send_apdu(&frame).await.unwrap(), vec![0xAB; 18]);
    }

    #[tokio::test]
    async fn test_send_without_card() {
        let (mut reader, _handle) = ready().await;
        let frame = encode_authenticate(&[0x01; 16]);
        assert!(matches!(
            reader.send_apdu(&frame).await,
            Err(HardwareError::CardError { .. })
        ));
    }
}
