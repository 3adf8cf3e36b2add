use thiserror::Error;

#[derive(Debug, Error)]
pub enum SonicLinkError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("corrupt compressed stream: {0}")]
    CorruptCompression(String),

    #[error("Reed-Solomon block exceeds correction budget")]
    UncorrectableFec,

    #[error("authentication failed")]
    AuthFailed,

    #[error("CRC-32 mismatch")]
    BadCrc,

    #[error("malformed frame: {0}")]
    InvalidFrame(String),

    #[error("no preamble detected")]
    NoPreamble,

    #[error("symbol synchronization lost")]
    SyncLost,

    #[error("operation cancelled")]
    Cancelled,

    #[error("audio source exhausted before frame completion")]
    IoExhausted,

    #[error("key material required: {0}")]
    KeyRequired(&'static str),

    #[error("crypto primitive failure: {0}")]
    CryptoFailure(String),

    #[error("audio I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, SonicLinkError>;
