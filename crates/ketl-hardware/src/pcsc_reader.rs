//! PC/SC reader backend (ACR122U and other CCID contactless readers).
//!
//! The `pcsc` crate is blocking; every call runs on the blocking pool while
//! holding the shared connection state. A call whose caller gave up keeps the
//! state until the transmit returns; later calls fail fast with a busy error
//! instead of queueing behind it.

use std::ffi::CString;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use ::pcsc::{Card, Context, MAX_BUFFER_SIZE, Protocols, Scope, ShareMode};
use ketl_core::{CardUid, ReaderConfig};
use tracing::{debug, info, warn};

use crate::traits::{ReaderBackend, ReaderKind};
use crate::{HardwareError, Result};

/// Fixed pseudo-APDU asking the reader for the UID of the card in the field.
pub const GET_UID_APDU: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

const PREFERRED_READER_TAGS: [&str; 2] = ["ACR122", "ACS"];

struct Inner {
    context: Context,
    reader: CString,
    card: Option<Card>,
}

impl Inner {
    fn card(&mut self) -> std::result::Result<&mut Card, ::pcsc::Error> {
        if self.card.is_none() {
            let card = self
                .context
                .connect(&self.reader, ShareMode::Shared, Protocols::ANY)?;
            self.card = Some(card);
        }
        // Set just above.
        self.card.as_mut().ok_or(::pcsc::Error::NoSmartcard)
    }

    /// Transmit on the current connection, dropping it on any failure so
    /// the next call reconnects.
    fn transmit(&mut self, apdu: &[u8]) -> std::result::Result<Vec<u8>, ::pcsc::Error> {
        let result = self.card().and_then(|card| {
            let mut buf = [0u8; MAX_BUFFER_SIZE];
            card.transmit(apdu, &mut buf).map(<[u8]>::to_vec)
        });
        if result.is_err() {
            self.card = None;
        }
        result
    }
}

/// Pick the reader to use from the names PC/SC reports.
pub fn choose_reader(names: &[CString]) -> Option<&CString> {
    names
        .iter()
        .find(|name| {
            let name = name.to_string_lossy();
            PREFERRED_READER_TAGS.iter().any(|tag| name.contains(tag))
        })
        .or_else(|| names.first())
}

/// UID bytes from a `GET_UID_APDU` reply, when it ends in `90 00`.
pub fn uid_from_reply(reply: &[u8]) -> Option<&[u8]> {
    match reply {
        [uid @ .., 0x90, 0x00] if !uid.is_empty() => Some(uid),
        _ => None,
    }
}

/// PC/SC-backed reader.
pub struct PcscReader {
    name: String,
    inner: Option<Arc<Mutex<Inner>>>,
}

impl PcscReader {
    pub fn new() -> Self {
        Self {
            name: "PC/SC".to_string(),
            inner: None,
        }
    }

    async fn with_inner<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Inner) -> T + Send + 'static,
    {
        let inner = self
            .inner
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| HardwareError::not_initialized(&self.name))?;

        tokio::task::spawn_blocking(move || -> Result<T> {
            let mut guard = match inner.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => {
                    return Err(HardwareError::communication(
                        "PC/SC reader busy with an abandoned exchange",
                    ));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(HardwareError::worker("PC/SC state lock poisoned"));
                }
            };
            Ok(f(&mut *guard))
        })
        .await?
    }
}

impl Default for PcscReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderBackend for PcscReader {
    async fn initialize(&mut self, _config: &ReaderConfig) -> Result<()> {
        let (context, reader) = tokio::task::spawn_blocking(|| -> Result<(Context, CString)> {
            let context = Context::establish(Scope::User).map_err(|e| {
                HardwareError::initialization_failed(format!("PC/SC context: {e}"))
            })?;
            let names = context
                .list_readers_owned()
                .map_err(|e| HardwareError::initialization_failed(format!("PC/SC readers: {e}")))?;
            let reader = choose_reader(&names)
                .cloned()
                .ok_or_else(|| HardwareError::disconnected("no PC/SC readers"))?;
            Ok((context, reader))
        })
        .await??;

        self.name = reader.to_string_lossy().into_owned();
        info!(reader = %self.name, "PC/SC reader selected");
        self.inner = Some(Arc::new(Mutex::new(Inner {
            context,
            reader,
            card: None,
        })));
        Ok(())
    }

    async fn read_uid(&mut self, timeout: Duration) -> Result<Option<CardUid>> {
        let read = self.with_inner(|inner| inner.transmit(&GET_UID_APDU));
        let reply = match tokio::time::timeout(timeout, read).await {
            Ok(result) => result?,
            Err(_) => return Ok(None),
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(::pcsc::Error::NoSmartcard | ::pcsc::Error::RemovedCard) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "PC/SC UID read failed");
                return Ok(None);
            }
        };

        let Some(uid) = uid_from_reply(&reply) else {
            debug!(len = reply.len(), "UID read returned no success status");
            return Ok(None);
        };
        match CardUid::new(uid) {
            Ok(uid) => Ok(Some(uid)),
            Err(e) => {
                debug!(error = %e, "Ignoring card with unusable UID");
                Ok(None)
            }
        }
    }

    async fn send_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>> {
        let command = command.to_vec();
        self.with_inner(move |inner| inner.transmit(&command))
            .await?
            .map_err(|e| {
                warn!(error = %e, "PC/SC transmit failed");
                HardwareError::card(format!("PC/SC transmit: {e}"))
            })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ReaderKind {
        ReaderKind::Pcsc
    }
}
