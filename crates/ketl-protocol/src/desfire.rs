//! Authenticate command encoding and reply decoding.
//!
//! Command layout (22 bytes):
//!
//! ```text
//! +------+------+----+----+----+------------------+----+
//! | CLA  | INS  | P1 | P2 | Lc | challenge (16)   | Le |
//! | 0x90 | 0xAA | 00 | 00 | 10 | ...              | 00 |
//! +------+------+----+----+----+------------------+----+
//! ```
//!
//! Accepted replies:
//!
//! - exactly 16 bytes: legacy readers that strip the status word
//! - `data || 91 00` or `data || 91 AF` with at least 16 data bytes:
//!   the first 16 data bytes are the response

use bytes::{BufMut, Bytes, BytesMut};
use ketl_core::constants::CHALLENGE_LENGTH;

use crate::error::{CodecError, Result};
use crate::status::StatusWord;

/// Class byte for native DESFire commands wrapped in ISO 7816 APDUs.
pub const DESFIRE_CLA: u8 = 0x90;

/// AuthenticateEV2First instruction.
pub const INS_AUTHENTICATE_EV2_FIRST: u8 = 0xAA;

/// Legacy AES authenticate instruction, accepted when parsing.
pub const INS_AUTHENTICATE_AES: u8 = 0x1A;

const HEADER_LEN: usize = 5;

/// Full length of an encoded authenticate command.
pub const AUTHENTICATE_COMMAND_LEN: usize = HEADER_LEN + CHALLENGE_LENGTH + 1;

/// Build the authenticate command carrying `challenge`.
#[must_use]
pub fn encode_authenticate(challenge: &[u8; CHALLENGE_LENGTH]) -> Bytes {
    let mut buf = BytesMut::with_capacity(AUTHENTICATE_COMMAND_LEN);
    buf.put_u8(DESFIRE_CLA);
    buf.put_u8(INS_AUTHENTICATE_EV2_FIRST);
    buf.put_u8(0x00); // P1
    buf.put_u8(0x00); // P2
    buf.put_u8(CHALLENGE_LENGTH as u8);
    buf.put_slice(challenge);
    buf.put_u8(0x00); // Le
    buf.freeze()
}

/// Extract the 16-byte card response from a reply.
///
/// # Errors
///
/// See [`CodecError`] for the rejected shapes. A reply of exactly 16 bytes is
/// always treated as a legacy raw response, even if it happens to end in a
/// status-like pair.
pub fn decode_authenticate(reply: &[u8]) -> Result<[u8; CHALLENGE_LENGTH]> {
    if reply.len() == CHALLENGE_LENGTH {
        return Ok(first_block(reply));
    }

    let Some(status) = StatusWord::from_tail(reply) else {
        return Err(CodecError::Malformed { len: reply.len() });
    };
    let data = &reply[..reply.len() - 2];

    if !status.is_authenticate_success() {
        return Err(CodecError::Status { status });
    }

    if data.len() >= CHALLENGE_LENGTH {
        return Ok(first_block(data));
    }

    if status == StatusWord::ADDITIONAL_FRAME {
        Err(CodecError::MultiFrameUnsupported {
            data_len: data.len(),
        })
    } else {
        Err(CodecError::ShortResponse {
            data_len: data.len(),
            status,
        })
    }
}

fn first_block(data: &[u8]) -> [u8; CHALLENGE_LENGTH] {
    let mut out = [0u8; CHALLENGE_LENGTH];
    out.copy_from_slice(&data[..CHALLENGE_LENGTH]);
    out
}

/// A parsed authenticate command.
///
/// Used by the simulated reader to check that what it was sent is a
/// well-formed authenticate frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateCommand {
    pub instruction: u8,
    pub challenge: [u8; CHALLENGE_LENGTH],
}

impl AuthenticateCommand {
    /// Parse a command frame produced by [`encode_authenticate`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotAuthenticate`] for any frame that is not a
    /// 22-byte authenticate command.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() != AUTHENTICATE_COMMAND_LEN {
            return Err(CodecError::NotAuthenticate {
                reason: format!(
                    "expected {AUTHENTICATE_COMMAND_LEN} bytes, got {}",
                    frame.len()
                ),
            });
        }

        let (header, rest) = frame.split_at(HEADER_LEN);
        if header[0] != DESFIRE_CLA {
            return Err(CodecError::NotAuthenticate {
                reason: format!("class byte {:02X}", header[0]),
            });
        }

        let instruction = header[1];
        if instruction != INS_AUTHENTICATE_EV2_FIRST && instruction != INS_AUTHENTICATE_AES {
            return Err(CodecError::NotAuthenticate {
                reason: format!("instruction {instruction:02X}"),
            });
        }

        if header[4] as usize != CHALLENGE_LENGTH {
            return Err(CodecError::NotAuthenticate {
                reason: format!("Lc {:02X}", header[4]),
            });
        }

        Ok(Self {
            instruction,
            challenge: first_block(rest),
        })
    }

    /// Re-encode the command.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut frame = BytesMut::from(&encode_authenticate(&self.challenge)[..]);
        frame[1] = self.instruction;
        frame.freeze()
    }
}
