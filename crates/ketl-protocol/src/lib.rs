//! DESFire command encoding for the kiosk's challenge-response exchange.
//!
//! This crate is pure: it builds the binary authenticate command sent to the
//! card and interprets the card's reply, without touching any transport.
//! Reader backends hand it whatever bytes they received; the codec decides
//! whether that reply is a usable 16-byte response.
//!
//! # Example
//!
//! ```
//! use ketl_protocol::{encode_authenticate, decode_authenticate};
//!
//! let challenge = [0x42; 16];
//! let frame = encode_authenticate(&challenge);
//! assert_eq!(&frame[..5], &[0x90, 0xAA, 0x00, 0x00, 0x10]);
//!
//! // A card reply: 16 data bytes followed by the 91 00 status word.
//! let mut reply = vec![0x17; 16];
//! reply.extend_from_slice(&[0x91, 0x00]);
//! assert_eq!(decode_authenticate(&reply).unwrap(), [0x17; 16]);
//! ```

pub mod desfire;
pub mod error;
pub mod status;

pub use desfire::{
    AUTHENTICATE_COMMAND_LEN, AuthenticateCommand, DESFIRE_CLA, INS_AUTHENTICATE_AES,
    INS_AUTHENTICATE_EV2_FIRST, decode_authenticate, encode_authenticate,
};
pub use error::{CodecError, Result};
pub use status::StatusWord;
