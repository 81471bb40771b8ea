use crate::http::types::StatusCode;
use std::{io, path::PathBuf};

/// Failures that can end a request cycle.
///
/// Parser variants surface as read failures (the session logs them and
/// closes), `Io` is a transport failure, and the remaining variants are
/// internal faults that the session funnels into a `500`.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("malformed header line")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("transfer-encoding is not supported")]
    UnsupportedTransferEncoding,
    #[error("body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("connection closed in the middle of a request")]
    IncompleteMessage,

    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("handler dropped the response without replying")]
    HandlerDropped,
    #[error("handler replied with invalid status code {0}")]
    InvalidStatus(u16),
    #[error("handler replied with a body for status {0}")]
    BodyNotAllowed(u16),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ErrorKind {
    /// Whether this error came out of the request parser.
    #[inline]
    pub(crate) const fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMethod
                | Self::InvalidRequestLine
                | Self::UnsupportedVersion
                | Self::InvalidHeader
                | Self::TooManyHeaders
                | Self::HeadersTooLarge(_)
                | Self::InvalidContentLength
                | Self::UnsupportedTransferEncoding
                | Self::BodyTooLarge { .. }
                | Self::InvalidEncoding
                | Self::IncompleteMessage
        )
    }
}

/// Failures while loading a TLS certificate chain and key.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),
}

/// Why a request was not handed to (or not answered by) a handler.
///
/// Only used to pick the status code and body of the response funnel. A
/// disallowed `Host` is not a rejection: it gets no response at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TooManyBytes(u64),
    TooManyRequests(i64),
    BadTarget,
    NotFound(String),
    Internal(String),
}

impl Rejection {
    #[inline]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::TooManyBytes(_) | Self::TooManyRequests(_) => StatusCode::TooManyRequests,
            Self::BadTarget => StatusCode::BadRequest,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Internal(_) => StatusCode::InternalServerError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::TooManyBytes(n) => format!("Too many bytes in flight: {n}. Try again later."),
            Self::TooManyRequests(n) => {
                format!("Too many requests in flight: {n}. Try again later.")
            }
            Self::BadTarget => "Illegal request-target".to_owned(),
            Self::NotFound(target) => format!("The resource '{target}' was not found."),
            Self::Internal(diagnostic) => diagnostic.clone(),
        }
    }
}
