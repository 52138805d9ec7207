use thiserror::Error;

/// Fatal startup failures. Any of these aborts the process before workers start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("handshake with MCU failed: {0}")]
    HandshakeFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Recoverable errors observed by a single worker. These never cross a queue boundary;
/// each worker logs and continues.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("frame invalid: {0}")]
    FrameInvalid(String),

    #[error("queue full, dropped oldest ({0} drops so far)")]
    QueueFull(u64),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("viewer send failed: {0}")]
    ViewerSendFailed(String),
}
