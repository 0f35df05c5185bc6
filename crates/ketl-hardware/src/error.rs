//! Error types for reader and output operations.

/// Result of a reader or output call.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Reader and output failures.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// No reader found or the reader went away.
    #[error("Reader {device} disconnected")]
    Disconnected { device: String },

    /// No answer within the allowed time.
    #[error("Reader did not answer within {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation is not supported by this backend.
    #[error("Not supported: {operation}")]
    Unsupported { operation: String },

    /// Transport-level failure (PC/SC call, SPI transfer, frame checksum).
    #[error("Reader transport failed: {message}")]
    CommunicationError { message: String },

    /// Backend could not be brought up.
    #[error("Reader setup failed: {message}")]
    InitializationFailed { message: String },

    /// Backend used before `initialize` succeeded.
    #[error("Reader not initialized: {device}")]
    NotInitialized { device: String },

    /// Card exchange failed.
    #[error("Card error: {message}")]
    CardError { message: String },

    /// Digital output could not be driven.
    #[error("Output error on {pin}: {message}")]
    OutputError { pin: String, message: String },

    /// Blocking worker thread panicked or was cancelled.
    #[error("Worker failed: {0}")]
    Worker(String),

    /// Device node access.
    #[error("Device I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    pub fn not_initialized(device: impl Into<String>) -> Self {
        Self::NotInitialized {
            device: device.into(),
        }
    }

    pub fn card(message: impl Into<String>) -> Self {
        Self::CardError {
            message: message.into(),
        }
    }

    pub fn output(pin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputError {
            pin: pin.into(),
            message: message.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }
}

impl From<tokio::task::JoinError> for HardwareError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}

impl embedded_hal::digital::Error for HardwareError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}
