//! Blocking PN532 driver over SPI.
//!
//! The PN532 talks LSB-first on SPI. Most SPI masters on Linux boards can
//! only do MSB-first, so every byte is bit-reversed in software on the way in
//! and out.
//!
//! Each SPI transaction starts with an operation byte:
//!
//! | op   | meaning      |
//! |------|--------------|
//! | 0x01 | data write   |
//! | 0x02 | status read  |
//! | 0x03 | data read    |
//!
//! Information frames:
//!
//! ```text
//! 00 00 FF LEN LCS TFI DATA... DCS 00
//! ```
//!
//! with `TFI = D4` host to PN532 and `D5` back, `LEN` counting TFI and data,
//! `LEN + LCS = 0` and `TFI + DATA + DCS = 0` (mod 256).

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

const OP_DATA_WRITE: u8 = 0x01;
const OP_STATUS_READ: u8 = 0x02;
const OP_DATA_READ: u8 = 0x03;
const STATUS_READY: u8 = 0x01;

const PREAMBLE: u8 = 0x00;
const START_CODE: [u8; 2] = [0x00, 0xFF];
const POSTAMBLE: u8 = 0x00;

const HOST_TO_PN532: u8 = 0xD4;
const PN532_TO_HOST: u8 = 0xD5;

const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
pub const CMD_SAM_CONFIGURATION: u8 = 0x14;
pub const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
pub const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

/// 106 kbps type A (ISO 14443-A).
const BAUD_ISO14443A: u8 = 0x00;

const ACK_TIMEOUT_MS: u32 = 100;
const COMMAND_TIMEOUT_MS: u32 = 1_000;
const READY_POLL_MS: u32 = 1;

/// Largest information frame payload.
const MAX_DATA_LEN: usize = 254;

/// Driver errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Pn532Error {
    #[error("SPI transfer failed: {0:?}")]
    Spi(embedded_hal::spi::ErrorKind),

    #[error("reset line failed: {0:?}")]
    Pin(embedded_hal::digital::ErrorKind),

    #[error("PN532 not ready after {0}ms")]
    Timeout(u32),

    #[error("PN532 did not acknowledge command {0:#04X}")]
    NoAck(u8),

    #[error("bad frame: {0}")]
    BadFrame(&'static str),

    #[error("unexpected response code {got:#04X}, expected {expected:#04X}")]
    UnexpectedResponse { expected: u8, got: u8 },

    #[error("command payload too long ({0} bytes)")]
    TooLong(usize),
}

/// Firmware identification returned by `GetFirmwareVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version: u8,
    pub revision: u8,
    pub support: u8,
}

/// Build an information frame carrying `command` (command code plus params).
///
/// # Errors
///
/// Returns [`Pn532Error::TooLong`] when the payload does not fit a normal frame.
pub fn build_frame(command: &[u8]) -> Result<Vec<u8>, Pn532Error> {
    if command.len() + 1 > MAX_DATA_LEN {
        return Err(Pn532Error::TooLong(command.len()));
    }
    let len = (command.len() + 1) as u8;

    let mut frame = Vec::with_capacity(command.len() + 8);
    frame.push(PREAMBLE);
    frame.extend_from_slice(&START_CODE);
    frame.push(len);
    frame.push(len.wrapping_neg());
    frame.push(HOST_TO_PN532);
    frame.extend_from_slice(command);

    let sum = command
        .iter()
        .fold(HOST_TO_PN532, |acc, &b| acc.wrapping_add(b));
    frame.push(sum.wrapping_neg());
    frame.push(POSTAMBLE);
    Ok(frame)
}

/// Whether `raw` (as read after the op byte) holds an ACK frame.
pub fn is_ack(raw: &[u8]) -> bool {
    raw.windows(ACK_FRAME.len()).any(|w| w == ACK_FRAME)
}

/// Parse a response frame to `command` and return its parameters.
///
/// Leading padding before the start code is skipped, which covers both the
/// preamble and the zero bytes some boards clock out first.
///
/// # Errors
///
/// [`Pn532Error::BadFrame`] on framing or checksum problems and
/// [`Pn532Error::UnexpectedResponse`] if the frame answers another command.
pub fn parse_response(raw: &[u8], command: u8) -> Result<Vec<u8>, Pn532Error> {
    let start = raw
        .windows(2)
        .position(|w| w == START_CODE)
        .ok_or(Pn532Error::BadFrame("no start code"))?;
    let rest = &raw[start + 2..];

    let [len, lcs, body @ ..] = rest else {
        return Err(Pn532Error::BadFrame("truncated header"));
    };
    if len.wrapping_add(*lcs) != 0 {
        return Err(Pn532Error::BadFrame("length checksum"));
    }

    let len = *len as usize;
    if len < 2 || body.len() < len + 1 {
        return Err(Pn532Error::BadFrame("truncated body"));
    }
    let data = &body[..len];
    let dcs = body[len];
    let sum = data.iter().fold(dcs, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(Pn532Error::BadFrame("data checksum"));
    }

    if data[0] != PN532_TO_HOST {
        return Err(Pn532Error::BadFrame("wrong direction byte"));
    }
    let expected = command.wrapping_add(1);
    if data[1] != expected {
        return Err(Pn532Error::UnexpectedResponse {
            expected,
            got: data[1],
        });
    }
    Ok(data[2..].to_vec())
}

/// Extract the UID from an `InListPassiveTarget` reply.
///
/// Reply layout: `NbTg Tg SENS_RES(2) SEL_RES NFCIDLength NFCID...`.
/// Returns `None` when no target was found.
///
/// # Errors
///
/// [`Pn532Error::BadFrame`] when the reply claims a target but is truncated.
pub fn parse_passive_target(params: &[u8]) -> Result<Option<Vec<u8>>, Pn532Error> {
    match params {
        [] | [0, ..] => Ok(None),
        [_, _tg, _sens_hi, _sens_lo, _sel, uid_len, uid @ ..] => {
            let uid_len = *uid_len as usize;
            if uid.len() < uid_len {
                return Err(Pn532Error::BadFrame("truncated UID"));
            }
            Ok(Some(uid[..uid_len].to_vec()))
        }
        _ => Err(Pn532Error::BadFrame("truncated target data")),
    }
}

fn to_wire(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = b.reverse_bits();
    }
}

/// PN532 attached over SPI with a hardware reset line.
pub struct Pn532<SPI, RST, D> {
    spi: SPI,
    reset: RST,
    delay: D,
}

impl<SPI, RST, D> Pn532<SPI, RST, D>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, reset: RST, delay: D) -> Self {
        Self { spi, reset, delay }
    }

    /// Pulse the reset line and give the chip time to boot.
    ///
    /// # Errors
    ///
    /// Fails only if the reset pin cannot be driven.
    pub fn wakeup(&mut self) -> Result<(), Pn532Error> {
        self.reset.set_high().map_err(pin_err)?;
        self.delay.delay_ms(10);
        self.reset.set_low().map_err(pin_err)?;
        self.delay.delay_ms(100);
        self.reset.set_high().map_err(pin_err)?;
        self.delay.delay_ms(500);
        Ok(())
    }

    /// Read the firmware version, used as a presence probe.
    ///
    /// # Errors
    ///
    /// Any transport or framing error.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, Pn532Error> {
        let params = self.call(&[CMD_GET_FIRMWARE_VERSION], COMMAND_TIMEOUT_MS)?;
        match params.as_slice() {
            [ic, version, revision, support, ..] => Ok(FirmwareVersion {
                ic: *ic,
                version: *version,
                revision: *revision,
                support: *support,
            }),
            _ => Err(Pn532Error::BadFrame("short firmware reply")),
        }
    }

    /// Normal mode, no SAM, IRQ pin used.
    ///
    /// # Errors
    ///
    /// Any transport or framing error.
    pub fn sam_configuration(&mut self) -> Result<(), Pn532Error> {
        self.call(&[CMD_SAM_CONFIGURATION, 0x01, 0x14, 0x01], COMMAND_TIMEOUT_MS)?;
        Ok(())
    }

    /// Look for one ISO 14443-A target, waiting up to `timeout_ms`.
    ///
    /// # Errors
    ///
    /// Transport or framing errors. A timeout is `Ok(None)`.
    pub fn read_passive_target(&mut self, timeout_ms: u32) -> Result<Option<Vec<u8>>, Pn532Error> {
        match self.call(&[CMD_IN_LIST_PASSIVE_TARGET, 0x01, BAUD_ISO14443A], timeout_ms) {
            Ok(params) => parse_passive_target(&params),
            Err(Pn532Error::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Exchange data with target 1. The reply starts with the PN532 status byte.
    ///
    /// # Errors
    ///
    /// Any transport or framing error.
    pub fn in_data_exchange(&mut self, data: &[u8]) -> Result<Vec<u8>, Pn532Error> {
        let mut command = Vec::with_capacity(data.len() + 2);
        command.push(CMD_IN_DATA_EXCHANGE);
        command.push(0x01);
        command.extend_from_slice(data);
        self.call(&command, COMMAND_TIMEOUT_MS)
    }

    fn call(&mut self, command: &[u8], timeout_ms: u32) -> Result<Vec<u8>, Pn532Error> {
        let code = command[0];
        self.write_frame(command)?;

        self.wait_ready(ACK_TIMEOUT_MS)?;
        let ack = self.read_data(ACK_FRAME.len() + 1)?;
        if !is_ack(&ack) {
            return Err(Pn532Error::NoAck(code));
        }

        self.wait_ready(timeout_ms)?;
        let raw = self.read_data(MAX_DATA_LEN + 8)?;
        parse_response(&raw, code)
    }

    fn write_frame(&mut self, command: &[u8]) -> Result<(), Pn532Error> {
        let frame = build_frame(command)?;
        let mut buf = Vec::with_capacity(frame.len() + 1);
        buf.push(OP_DATA_WRITE);
        buf.extend_from_slice(&frame);
        to_wire(&mut buf);
        self.spi.write(&buf).map_err(spi_err)
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), Pn532Error> {
        let mut waited = 0;
        loop {
            let mut buf = [OP_STATUS_READ, 0x00];
            to_wire(&mut buf);
            self.spi.transfer_in_place(&mut buf).map_err(spi_err)?;
            if buf[1].reverse_bits() == STATUS_READY {
                return Ok(());
            }
            if waited >= timeout_ms {
                return Err(Pn532Error::Timeout(timeout_ms));
            }
            self.delay.delay_ms(READY_POLL_MS);
            waited += READY_POLL_MS;
        }
    }

    fn read_data(&mut self, len: usize) -> Result<Vec<u8>, Pn532Error> {
        let mut buf = vec![0u8; len + 1];
        buf[0] = OP_DATA_READ;
        to_wire(&mut buf);
        self.spi.transfer_in_place(&mut buf).map_err(spi_err)?;
        to_wire(&mut buf);
        buf.remove(0);
        Ok(buf)
    }
}

fn spi_err<E: embedded_hal::spi::Error>(e: E) -> Pn532Error {
    Pn532Error::Spi(e.kind())
}

fn pin_err<E: embedded_hal::digital::Error>(e: E) -> Pn532Error {
    Pn532Error::Pin(e.kind())
}
