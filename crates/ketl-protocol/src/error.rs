//! Errors produced while interpreting a card reply.

use crate::status::StatusWord;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Reasons a card reply cannot be turned into a 16-byte response.
///
/// Every variant is terminal for the current card: the customer has to lift
/// the card and tap again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The card answered with a non-success status word.
    #[error("Card rejected command: {status}")]
    Status { status: StatusWord },

    /// The card asked for a continuation frame before sending a full response.
    #[error("Multi-frame continuation is not supported ({data_len} data bytes before 91 AF)")]
    MultiFrameUnsupported { data_len: usize },

    /// Success status but fewer than 16 bytes of data.
    #[error("Response too short: {data_len} data bytes with {status}")]
    ShortResponse { data_len: usize, status: StatusWord },

    /// Reply too short to carry a status word and not a legacy raw response.
    #[error("Malformed reply of {len} bytes")]
    Malformed { len: usize },

    /// Frame is not an authenticate command.
    #[error("Not an authenticate command: {reason}")]
    NotAuthenticate { reason: String },
}

impl CodecError {
    /// Status word carried by the error, for diagnostics.
    #[must_use]
    pub fn status(&self) -> Option<StatusWord> {
        match self {
            CodecError::Status { status } | CodecError::ShortResponse { status, .. } => {
                Some(*status)
            }
            CodecError::MultiFrameUnsupported { .. } => Some(StatusWord::ADDITIONAL_FRAME),
            CodecError::Malformed { .. } | CodecError::NotAuthenticate { .. } => None,
        }
    }
}
