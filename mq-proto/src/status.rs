//! Business status carried inside otherwise successful responses.

use std::fmt;

use crate::error::ProtoError;

/// Application-level status codes returned by the broker.
///
/// Numbering follows the canonical RPC status codes so a transport can pass
/// the raw value through untouched.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Codes a caller may reasonably retry after a delay.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::ResourceExhausted | Self::Unavailable | Self::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl TryFrom<i32> for Code {
    type Error = ProtoError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            other => return Err(ProtoError::UnknownCode(other)),
        };
        Ok(code)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw status as received. The code is kept as `i32` so values this client
/// does not know about survive into error reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok as i32
    }

    /// Known code, or `Code::Unknown` for values outside the table.
    pub fn code(&self) -> Code {
        Code::try_from(self.code).unwrap_or(Code::Unknown)
    }
}

/// Envelope shared by every response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseCommon {
    pub status: Status,
}

impl ResponseCommon {
    pub fn with_status(status: Status) -> Self {
        Self { status }
    }
}
