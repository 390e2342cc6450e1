#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("seed {0} is outside the shareable range")]
    InvalidSeed(u64),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no game is running")]
    NotStarted,
}
