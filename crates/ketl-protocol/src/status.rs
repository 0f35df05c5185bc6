//! DESFire status words.
//!
//! Native DESFire commands wrapped in ISO 7816 APDUs report their outcome in
//! SW2 with SW1 fixed at `0x91`. Plain ISO replies (`90 00`) come from the
//! reader itself rather than the card application.

use std::fmt;

/// Two trailing status bytes of a card reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    /// SW1 value used by every native DESFire status.
    pub const DESFIRE_SW1: u8 = 0x91;

    pub const OPERATION_OK: StatusWord = StatusWord::new(0x91, 0x00);
    pub const ADDITIONAL_FRAME: StatusWord = StatusWord::new(0x91, 0xAF);
    pub const AUTHENTICATION_ERROR: StatusWord = StatusWord::new(0x91, 0xAE);
    pub const ILLEGAL_COMMAND: StatusWord = StatusWord::new(0x91, 0x1C);
    pub const LENGTH_ERROR: StatusWord = StatusWord::new(0x91, 0x7E);
    pub const PERMISSION_DENIED: StatusWord = StatusWord::new(0x91, 0x9D);
    pub const NO_SUCH_KEY: StatusWord = StatusWord::new(0x91, 0x40);
    pub const APPLICATION_NOT_FOUND: StatusWord = StatusWord::new(0x91, 0xA0);
    pub const ISO_OK: StatusWord = StatusWord::new(0x90, 0x00);

    #[must_use]
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Read the status word from the last two bytes of a reply.
    #[must_use]
    pub fn from_tail(reply: &[u8]) -> Option<Self> {
        match reply {
            [.., sw1, sw2] => Some(Self::new(*sw1, *sw2)),
            _ => None,
        }
    }

    /// `91 00` or `91 AF`: the card accepted the authenticate command.
    #[must_use]
    pub fn is_authenticate_success(&self) -> bool {
        *self == Self::OPERATION_OK || *self == Self::ADDITIONAL_FRAME
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x91, 0x00) => "operation ok",
            (0x91, 0xAF) => "additional frame expected",
            (0x91, 0xAE) => "authentication error",
            (0x91, 0x1C) => "illegal command code",
            (0x91, 0x7E) => "length error",
            (0x91, 0x9D) => "permission denied",
            (0x91, 0x40) => "no such key",
            (0x91, 0xA0) => "application not found",
            (0x90, 0x00) => "iso success",
            _ => "unknown status",
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SW={:02X}{:02X} ({})", self.sw1, self.sw2, self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tail() {
        assert_eq!(
            StatusWord::from_tail(&[0x01, 0x02, 0x91, 0xAF]),
            Some(StatusWord::ADDITIONAL_FRAME)
        );
        assert_eq!(StatusWord::from_tail(&[0x91]), None);
        assert_eq!(StatusWord::from_tail(&[]), None);
    }

    #[test]
    fn test_success_set() {
        assert!(StatusWord::OPERATION_OK.is_authenticate_success());
        assert!(StatusWord::ADDITIONAL_FRAME.is_authenticate_success());
        assert!(!StatusWord::AUTHENTICATION_ERROR.is_authenticate_success());
        assert!(!StatusWord::ISO_OK.is_authenticate_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StatusWord::AUTHENTICATION_ERROR.to_string(),
            "SW=91AE (authentication error)"
        );
        assert_eq!(StatusWord::new(0x6A, 0x82).to_string(), "SW=6A82 (unknown status)");
    }
}
