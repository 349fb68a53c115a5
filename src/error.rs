use tokio_tungstenite::tungstenite;

#[derive(thiserror::Error, Debug)]
pub enum SubtestError {
    #[error("Subtest deadline exceeded")]
    Deadline(#[from] tokio::time::error::Elapsed),
    #[error("Networking error - {0:?}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error - {0:?}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Measurement serialization failed - {0:?}")]
    Serialize(#[from] serde_json::Error),
}
