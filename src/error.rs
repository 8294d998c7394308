//! Error types for the journey engine.

/// Top-level error type for the voice-journey client engine.
///
/// Every failure is contained at the component that detected it and
/// converted into a state transition plus a user-visible notice; none of
/// these variants is fatal to the host.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Network failure or non-success status on an outbound call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed audio chunk or unparseable packet payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Microphone access denied or capture device unavailable.
    #[error("permission error: {0}")]
    Permission(String),

    /// Packet of unrecognized shape on a transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Recording hard-timeout or transcription poll exhaustion.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// Audio output device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Recording session in an invalid state for the requested operation.
    #[error("recording error: {0}")]
    Recording(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error between engine stages.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
