//! Status values handed to fetcher callbacks: a numeric error code compatible
//! with the server's error code space plus a human readable reason.

use mongodb::bson::{Bson, Document};
use std::fmt;

/// Error codes produced or observed by the fetcher. Codes reported by a remote
/// peer that have no named variant are preserved through [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    HostUnreachable,
    UnknownError,
    FailedToParse,
    IllegalOperation,
    ExceededTimeLimit,
    NetworkTimeout,
    CallbackCanceled,
    ShutdownInProgress,
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ErrorCode::InternalError,
            2 => ErrorCode::BadValue,
            6 => ErrorCode::HostUnreachable,
            8 => ErrorCode::UnknownError,
            9 => ErrorCode::FailedToParse,
            20 => ErrorCode::IllegalOperation,
            50 => ErrorCode::ExceededTimeLimit,
            89 => ErrorCode::NetworkTimeout,
            90 => ErrorCode::CallbackCanceled,
            91 => ErrorCode::ShutdownInProgress,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::HostUnreachable => 6,
            ErrorCode::UnknownError => 8,
            ErrorCode::FailedToParse => 9,
            ErrorCode::IllegalOperation => 20,
            ErrorCode::ExceededTimeLimit => 50,
            ErrorCode::NetworkTimeout => 89,
            ErrorCode::CallbackCanceled => 90,
            ErrorCode::ShutdownInProgress => 91,
            ErrorCode::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::HostUnreachable => "HostUnreachable",
            ErrorCode::UnknownError => "UnknownError",
            ErrorCode::FailedToParse => "FailedToParse",
            ErrorCode::IllegalOperation => "IllegalOperation",
            ErrorCode::ExceededTimeLimit => "ExceededTimeLimit",
            ErrorCode::NetworkTimeout => "NetworkTimeout",
            ErrorCode::CallbackCanceled => "CallbackCanceled",
            ErrorCode::ShutdownInProgress => "ShutdownInProgress",
            ErrorCode::Other(_) => "Location",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "Location{code}"),
            named => f.write_str(named.name()),
        }
    }
}

/// Terminal status delivered to a fetcher callback or returned from `schedule()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    code: ErrorCode,
    reason: String,
}

impl FetchError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn failed_to_parse(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedToParse, reason)
    }

    pub fn bad_value(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadValue, reason)
    }

    pub fn illegal_operation(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalOperation, reason)
    }

    pub fn callback_canceled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::CallbackCanceled, reason)
    }

    pub fn shutdown_in_progress(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ShutdownInProgress, reason)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// True for the lifecycle statuses produced by cancellation or executor shutdown.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::CallbackCanceled | ErrorCode::ShutdownInProgress
        )
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

impl std::error::Error for FetchError {}

/// Extracts the command-level status carried by a reply document.
///
/// A reply whose `ok` field is present and falsy is a remote failure; its
/// `code` and `errmsg` are returned unchanged. Replies without `ok` are left
/// for the cursor parser to judge.
pub fn command_status(reply: &Document) -> Result<(), FetchError> {
    let ok = match reply.get("ok") {
        None => return Ok(()),
        Some(value) => is_truthy(value),
    };
    if ok {
        return Ok(());
    }

    let code = match reply.get("code") {
        Some(Bson::Int32(code)) => ErrorCode::from_code(*code),
        Some(Bson::Int64(code)) => narrow_code(*code),
        Some(Bson::Double(code))
            if code.fract() == 0.0 && *code >= i64::MIN as f64 && *code < i64::MAX as f64 =>
        {
            narrow_code(*code as i64)
        }
        _ => ErrorCode::UnknownError,
    };
    let reason = reply
        .get_str("errmsg")
        .map(str::to_owned)
        .unwrap_or_else(|_| "command failed".to_owned());

    Err(FetchError::new(code, reason))
}

fn narrow_code(code: i64) -> ErrorCode {
    i32::try_from(code)
        .map(ErrorCode::from_code)
        .unwrap_or(ErrorCode::UnknownError)
}

/// Only booleans and numbers can report success; any other `ok` value is a failure.
fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0 && !n.is_nan(),
        _ => false,
    }
}
