use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::envelope::ApiErrorObject;

pub type Result<T, E = AscError> = std::result::Result<T, E>;

/// Flat classification used by callers and for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Credential,
    InvalidArgument,
    Network,
    Protocol,
    Auth,
    RateLimited,
    Server,
    Client,
    Canceled,
    Upload,
    Security,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadPhase {
    Prepare,
    Reserve,
    Transfer,
    Commit,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Reserve => "reserve",
            Self::Transfer => "transfer",
            Self::Commit => "commit",
        })
    }
}

#[derive(Debug, Error)]
pub enum AscError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("network error: {message}")]
    Network { message: String, timeout: bool },

    #[error("protocol error ({kind}): {message}")]
    Protocol {
        kind: &'static str,
        message: String,
        body: Option<String>,
    },

    #[error("authentication failed (HTTP {status}){}", describe(.errors))]
    Auth {
        status: u16,
        errors: Vec<ApiErrorObject>,
    },

    #[error("rate limited by App Store Connect{}{}", retry_hint(.retry_after), describe(.errors))]
    RateLimited {
        retry_after: Option<Duration>,
        errors: Vec<ApiErrorObject>,
    },

    #[error("server error (HTTP {status}){}", describe(.errors))]
    Server {
        status: u16,
        errors: Vec<ApiErrorObject>,
    },

    #[error("request rejected (HTTP {status}){}", describe(.errors))]
    Client {
        status: u16,
        errors: Vec<ApiErrorObject>,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("upload {phase} failed{}: {source}", offset_hint(.chunk_offset))]
    Upload {
        phase: UploadPhase,
        chunk_offset: Option<u64>,
        #[source]
        source: Box<AscError>,
    },

    #[error("page {page}: {source}")]
    Paginate {
        page: usize,
        #[source]
        source: Box<AscError>,
    },

    #[error("security error ({kind}): {message}")]
    Security { kind: &'static str, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(errors: &[ApiErrorObject]) -> String {
    match errors {
        [] => String::new(),
        [only] => format!(": {only}"),
        [first, rest @ ..] => format!(": {first} (+{} more)", rest.len()),
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}s)", d.as_secs()))
        .unwrap_or_default()
}

fn offset_hint(offset: &Option<u64>) -> String {
    offset
        .map(|o| format!(" at offset {o}"))
        .unwrap_or_default()
}

impl AscError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Credential(_) => ErrorKind::Credential,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Network { .. } => ErrorKind::Network,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Server { .. } => ErrorKind::Server,
            Self::Client { .. } => ErrorKind::Client,
            Self::Canceled => ErrorKind::Canceled,
            Self::Upload { .. } => ErrorKind::Upload,
            Self::Paginate { source, .. } => source.kind(),
            Self::Security { .. } => ErrorKind::Security,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Innermost error beneath upload/pagination context.
    pub fn root(&self) -> &AscError {
        match self {
            Self::Upload { source, .. } | Self::Paginate { source, .. } => source.root(),
            other => other,
        }
    }

    /// Server error objects, verbatim, when the failure carried any.
    pub fn api_errors(&self) -> &[ApiErrorObject] {
        match self.root() {
            Self::Auth { errors, .. }
            | Self::RateLimited { errors, .. }
            | Self::Server { errors, .. }
            | Self::Client { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Self::Config(_) | Self::InvalidArgument(_) | Self::Client { .. } => 2,
            Self::Credential(_) | Self::Auth { .. } => 3,
            Self::RateLimited { .. } => 4,
            Self::Server { .. } => 5,
            Self::Network { .. } => 6,
            Self::Canceled => 130,
            _ => 1,
        }
    }

    pub fn in_phase(self, phase: UploadPhase) -> Self {
        self.in_phase_at(phase, None)
    }

    pub fn in_phase_at(self, phase: UploadPhase, chunk_offset: Option<u64>) -> Self {
        match self {
            already @ Self::Upload { .. } => already,
            source => Self::Upload {
                phase,
                chunk_offset,
                source: Box::new(source),
            },
        }
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            timeout: false,
        }
    }

    pub(crate) fn protocol(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            kind,
            message: message.into(),
            body: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forbidden() -> ApiErrorObject {
        ApiErrorObject {
            status: Some("403".into()),
            code: Some("FORBIDDEN_ERROR".into()),
            title: Some("Forbidden".into()),
            detail: Some("Nope".into()),
            ..ApiErrorObject::default()
        }
    }

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(AscError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            AscError::Auth {
                status: 401,
                errors: vec![]
            }
            .exit_code(),
            3
        );
        assert_eq!(
            AscError::RateLimited {
                retry_after: None,
                errors: vec![]
            }
            .exit_code(),
            4
        );
        assert_eq!(
            AscError::Server {
                status: 503,
                errors: vec![]
            }
            .exit_code(),
            5
        );
        assert_eq!(AscError::network("reset").exit_code(), 6);
        assert_eq!(AscError::Canceled.exit_code(), 130);
        assert_eq!(AscError::protocol("decode", "bad").exit_code(), 1);
    }

    #[test]
    fn upload_wrapper_keeps_inner_exit_code_and_errors() {
        let err = AscError::Client {
            status: 409,
            errors: vec![forbidden()],
        }
        .in_phase(UploadPhase::Commit);
        assert_eq!(err.kind(), ErrorKind::Upload);
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.api_errors().len(), 1);
        assert_eq!(
            err.to_string(),
            "upload commit failed: request rejected (HTTP 409): Forbidden: Nope"
        );
    }

    #[test]
    fn phase_is_not_relabelled() {
        let err = AscError::Canceled
            .in_phase_at(UploadPhase::Transfer, Some(512))
            .in_phase(UploadPhase::Commit);
        assert!(matches!(
            err,
            AscError::Upload {
                phase: UploadPhase::Transfer,
                chunk_offset: Some(512),
                ..
            }
        ));
    }

    #[test]
    fn paginate_wrapper_is_transparent_for_kind() {
        let err = AscError::Paginate {
            page: 3,
            source: Box::new(AscError::network("eof")),
        };
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.to_string(), "page 3: network error: eof");
    }
}
