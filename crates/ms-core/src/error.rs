use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeetscribeError {
    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Correction agent error: {0}")]
    Agent(String),

    /// Transport-level failure reaching an external collaborator.
    /// Callers treat this as transient and revert-and-retry instead of
    /// failing the meeting.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MeetscribeError {
    /// Whether this error came from a transport failure (refused, reset,
    /// timed out) rather than from the collaborator itself.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, MeetscribeError>;
