//! Server configuration limits and timeouts
//!
//! # Backpressure
//!
//! Two live counters are shared by every session:
//!
//! - **bytes in flight**: request and response payload bytes that belong to
//!   requests which have been dispatched but whose response is not yet written
//! - **requests in flight**: open sessions
//!
//! ```text
//!  accept ──> [ requests in flight > max? ] ── yes ──> close, nothing read
//!                          │ no
//!                          V
//!  read request ──> [ bytes in flight > max? ] ── yes ──> 429
//!                          │ no
//!                          V
//!                       handler
//! ```
//!
//! Both checks are advisory: a burst of sessions may observe the same counter
//! value before any of them updates it.
//!
//! # Examples
//!
//! ```no_run
//! use flight_http::{limits::{ConnLimits, ServerLimits}, SharedState};
//! use std::time::Duration;
//!
//! let state = SharedState::builder()
//!     .server_limits(ServerLimits {
//!         max_bytes_in_flight: 64 * 1024 * 1024,
//!         max_requests_in_flight: 2_000,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         read_timeout: Some(Duration::from_secs(30)),
//!         ..ConnLimits::default()
//!     })
//!     .build();
//! ```

use std::time::Duration;

/// Process-wide admission limits.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum request body size in bytes (default: `2 MiB`)
    ///
    /// Larger bodies fail the read and close the connection.
    pub max_body_size: usize,

    /// Ceiling for bytes in flight across all sessions (default: `500 MiB`)
    ///
    /// A request that arrives while the counter is above this value is
    /// answered with `429 Too Many Requests`.
    pub max_bytes_in_flight: u64,

    /// Ceiling for open sessions (default: `-1`, unlimited)
    ///
    /// Checked once when a session starts. Any negative value disables the check.
    pub max_requests_in_flight: i64,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024,
            max_bytes_in_flight: 500 * 1024 * 1024,
            max_requests_in_flight: -1,
        }
    }
}

/// Connection-level behaviour and timeouts
///
/// Timeouts are disabled (`None`) unless configured. An expired timeout is
/// handled like any other transport error: the session is torn down.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Reuse connections for further requests (default: `true`)
    ///
    /// When `false`, every response carries `connection: close`.
    pub keep_alive: bool,

    /// Maximum time to wait for a read to make progress (default: `None`)
    pub read_timeout: Option<Duration>,

    /// Maximum time for writing one full response (default: `None`)
    pub write_timeout: Option<Duration>,

    /// Maximum time for the TLS handshake (default: `None`)
    pub handshake_timeout: Option<Duration>,
}

impl Default for ConnLimits {
    #[inline]
    fn default() -> Self {
        Self {
            keep_alive: true,
            read_timeout: None,
            write_timeout: None,
            handshake_timeout: None,
        }
    }
}

/// Bounds for the request parser.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum size of request line plus headers, in bytes (default: `16 KiB`)
    pub header_block_size: usize,

    /// Maximum number of headers per request (default: `64`)
    pub header_count: usize,

    /// Size of a single transport read (default: `8 KiB`)
    pub read_chunk: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            header_block_size: 16 * 1024,
            header_count: 64,
            read_chunk: 8 * 1024,
        }
    }
}

/// CORS response headers.
///
/// Each header is only emitted when its value is non-empty
/// (`allow_credentials` when `true`).
#[derive(Debug, Clone, Default)]
pub struct Cors {
    /// `Access-Control-Allow-Origin`
    pub allow_origin: String,
    /// `Access-Control-Allow-Headers`
    pub allow_headers: String,
    /// `Access-Control-Max-Age`
    pub max_age: String,
    /// `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
}

impl Cors {
    /// Headers to attach to every response that passed host validation.
    pub(crate) fn headers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("access-control-allow-origin", self.allow_origin.as_str()),
            ("access-control-allow-headers", self.allow_headers.as_str()),
            ("access-control-max-age", self.max_age.as_str()),
            (
                "access-control-allow-credentials",
                if self.allow_credentials { "true" } else { "" },
            ),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_only_emits_configured_values() {
        let cors = Cors::default();
        assert_eq!(cors.headers().count(), 0);

        let cors = Cors {
            allow_origin: "*".into(),
            allow_credentials: true,
            ..Cors::default()
        };
        let headers: Vec<_> = cors.headers().collect();
        assert_eq!(
            headers,
            [
                ("access-control-allow-origin", "*"),
                ("access-control-allow-credentials", "true"),
            ]
        );
    }

    #[test]
    fn defaults() {
        let server = ServerLimits::default();
        assert_eq!(server.max_requests_in_flight, -1);
        assert_eq!(server.max_body_size, 2 * 1024 * 1024);

        let conn = ConnLimits::default();
        assert!(conn.keep_alive);
        assert!(conn.read_timeout.is_none());
    }
}
