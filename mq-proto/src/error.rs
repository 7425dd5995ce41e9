use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Time point precedes the Unix epoch by {0:?}")]
    BeforeEpoch(std::time::Duration),

    #[error("Duration out of range: {0:?}")]
    DurationOutOfRange(std::time::Duration),

    #[error("Invalid nanos field: {0}")]
    InvalidNanos(i32),

    #[error("Unknown status code: {0}")]
    UnknownCode(i32),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
