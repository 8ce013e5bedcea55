//! Error taxonomy and the versioned error-code table.
//!
//! Callers branch on [`Error::code`], never on rendered text. The Display
//! text of every variant is exactly its table template rendered with the
//! variant's parameters (see `test_display_matches_table_template`).

use hyper::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Bumped whenever an entry of [`ERROR_CODES`] changes meaning.
pub const ERROR_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub id: u16,
    pub name: &'static str,
    pub template: &'static str,
}

impl ErrorCode {
    /// Render the template, substituting `{name}` placeholders. Unknown
    /// placeholders render empty.
    pub fn render(&self, params: &[(&str, String)]) -> String {
        let mut out = String::with_capacity(self.template.len() + 32);
        let mut rest = self.template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    if let Some((_, value)) = params.iter().find(|(name, _)| *name == key) {
                        out.push_str(value);
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

pub mod codes {
    use super::ErrorCode;

    pub const INVALID_CONFIGURATION: ErrorCode = ErrorCode {
        id: 1001,
        name: "INVALID_CONFIGURATION",
        template: "Invalid configuration: {reason}",
    };
    pub const INVALID_MAPPING: ErrorCode = ErrorCode {
        id: 1002,
        name: "INVALID_MAPPING",
        template: "Mapping #{index} is invalid: {reason}",
    };
    pub const INVALID_PATTERN: ErrorCode = ErrorCode {
        id: 1003,
        name: "INVALID_PATTERN",
        template: "Mapping #{index} has an invalid match pattern '{pattern}': {reason}",
    };
    pub const NORMALIZATION_FAILED: ErrorCode = ErrorCode {
        id: 2001,
        name: "NORMALIZATION_FAILED",
        template: "Unable to normalize url '{url}'",
    };
    pub const NOT_FOUND: ErrorCode = ErrorCode {
        id: 2002,
        name: "NOT_FOUND",
        template: "No mapping resolved {method} {url}",
    };
    pub const FILE_NOT_FOUND: ErrorCode = ErrorCode {
        id: 2003,
        name: "FILE_NOT_FOUND",
        template: "File not found: {path}",
    };
    pub const UPSTREAM_FAILED: ErrorCode = ErrorCode {
        id: 2004,
        name: "UPSTREAM_FAILED",
        template: "Upstream request to {url} failed: {reason}",
    };
    pub const UPSTREAM_CERTIFICATE: ErrorCode = ErrorCode {
        id: 2005,
        name: "UPSTREAM_CERTIFICATE",
        template: "Certificate of {url} could not be verified: {reason}",
    };
    pub const TOO_MANY_REDIRECTS: ErrorCode = ErrorCode {
        id: 2006,
        name: "TOO_MANY_REDIRECTS",
        template: "Too many redirects while resolving {url} (limit {max})",
    };
    pub const HANDLER_FAILED: ErrorCode = ErrorCode {
        id: 2007,
        name: "HANDLER_FAILED",
        template: "Handler of mapping #{index} failed: {reason}",
    };
    pub const STREAM_ABORTED: ErrorCode = ErrorCode {
        id: 2008,
        name: "STREAM_ABORTED",
        template: "Response stream for {url} aborted: {reason}",
    };
}

pub static ERROR_CODES: &[ErrorCode] = &[
    codes::INVALID_CONFIGURATION,
    codes::INVALID_MAPPING,
    codes::INVALID_PATTERN,
    codes::NORMALIZATION_FAILED,
    codes::NOT_FOUND,
    codes::FILE_NOT_FOUND,
    codes::UPSTREAM_FAILED,
    codes::UPSTREAM_CERTIFICATE,
    codes::TOO_MANY_REDIRECTS,
    codes::HANDLER_FAILED,
    codes::STREAM_ABORTED,
];

pub fn lookup(id: u16) -> Option<&'static ErrorCode> {
    ERROR_CODES.iter().find(|code| code.id == id)
}

/// The original failure raised by user code, kept intact.
#[derive(Clone)]
pub struct HandlerPayload(Arc<dyn std::error::Error + Send + Sync>);

impl HandlerPayload {
    pub fn new(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self(Arc::from(error))
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(message.into())
    }

    /// Access the original error, e.g. to downcast it.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for HandlerPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for HandlerPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for HandlerPayload {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Mapping #{index} is invalid: {reason}")]
    InvalidMapping { index: usize, reason: String },

    #[error("Mapping #{index} has an invalid match pattern '{pattern}': {reason}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("Unable to normalize url '{url}'")]
    Normalization { url: String },

    #[error("No mapping resolved {method} {url}")]
    NotFound { method: String, url: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Upstream request to {url} failed: {reason}")]
    Upstream { url: String, reason: String },

    #[error("Certificate of {url} could not be verified: {reason}")]
    UpstreamCertificate { url: String, reason: String },

    #[error("Too many redirects while resolving {url} (limit {max})")]
    TooManyRedirects { url: String, max: u32 },

    #[error("Handler of mapping #{index} failed: {reason}")]
    Handler {
        index: usize,
        #[source]
        reason: HandlerPayload,
    },

    #[error("Response stream for {url} aborted: {reason}")]
    StreamAborted { url: String, reason: String },
}

impl Error {
    pub fn handler(index: usize, error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Handler {
            index,
            reason: HandlerPayload::new(error),
        }
    }

    pub fn code(&self) -> &'static ErrorCode {
        match self {
            Error::InvalidConfiguration { .. } => &codes::INVALID_CONFIGURATION,
            Error::InvalidMapping { .. } => &codes::INVALID_MAPPING,
            Error::InvalidPattern { .. } => &codes::INVALID_PATTERN,
            Error::Normalization { .. } => &codes::NORMALIZATION_FAILED,
            Error::NotFound { .. } => &codes::NOT_FOUND,
            Error::FileNotFound { .. } => &codes::FILE_NOT_FOUND,
            Error::Upstream { .. } => &codes::UPSTREAM_FAILED,
            Error::UpstreamCertificate { .. } => &codes::UPSTREAM_CERTIFICATE,
            Error::TooManyRedirects { .. } => &codes::TOO_MANY_REDIRECTS,
            Error::Handler { .. } => &codes::HANDLER_FAILED,
            Error::StreamAborted { .. } => &codes::STREAM_ABORTED,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Normalization { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } | Error::FileNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Upstream { .. } | Error::UpstreamCertificate { .. } => StatusCode::BAD_GATEWAY,
            Error::TooManyRedirects { .. } => StatusCode::LOOP_DETECTED,
            Error::InvalidConfiguration { .. }
            | Error::InvalidMapping { .. }
            | Error::InvalidPattern { .. }
            | Error::Handler { .. }
            | Error::StreamAborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures that `ignore-if-not-found` turns into a continuation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::FileNotFound { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration { .. }
                | Error::InvalidMapping { .. }
                | Error::InvalidPattern { .. }
        )
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            Error::InvalidConfiguration { reason } => vec![("reason", reason.clone())],
            Error::InvalidMapping { index, reason } => {
                vec![("index", index.to_string()), ("reason", reason.clone())]
            }
            Error::InvalidPattern {
                index,
                pattern,
                reason,
            } => vec![
                ("index", index.to_string()),
                ("pattern", pattern.clone()),
                ("reason", reason.clone()),
            ],
            Error::Normalization { url } => vec![("url", url.clone())],
            Error::NotFound { method, url } => {
                vec![("method", method.clone()), ("url", url.clone())]
            }
            Error::FileNotFound { path } => vec![("path", path.clone())],
            Error::Upstream { url, reason } | Error::UpstreamCertificate { url, reason } => {
                vec![("url", url.clone()), ("reason", reason.clone())]
            }
            Error::TooManyRedirects { url, max } => {
                vec![("url", url.clone()), ("max", max.to_string())]
            }
            Error::Handler { index, reason } => {
                vec![("index", index.to_string()), ("reason", reason.to_string())]
            }
            Error::StreamAborted { url, reason } => {
                vec![("url", url.clone()), ("reason", reason.clone())]
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
