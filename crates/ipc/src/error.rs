#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The peer shut down its endpoint. Reported distinctly from I/O
    /// failures so the owner can treat an expected close differently
    /// from stream corruption.
    #[error("peer closed the channel")]
    Closed,

    #[error("frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("failed to encode message payload: {0}")]
    Payload(#[from] bincode::Error),
}
