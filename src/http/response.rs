//! Per-cycle response assembly.
//!
//! A session owns one [`Response`] and reuses it across requests. Headers are
//! collected while the request is being admitted (CORS, content type), then
//! [`Response::finish`] fixes the status and body and serializes everything
//! into the write buffer.
//!
//! Message framing follows HTTP/1.1:
//!
//! | Response              | `content-length` | Body bytes |
//! |-----------------------|------------------|------------|
//! | `1xx`, `204`, `304`   | omitted          | never      |
//! | reply to `HEAD`       | would-be body    | never      |
//! | everything else       | body             | body       |

use crate::http::types::{reason_phrase, Method, Version};

pub(crate) const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub(crate) const SERVER_NAME: &str = concat!("flight_http/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub(crate) struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    head: bool,
    status: u16,
    headers: Vec<(&'static str, String)>,
    state: ResponseState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            version: Version::Http11,
            keep_alive: true,
            head: false,
            status: 0,
            headers: Vec::with_capacity(8),
            state: ResponseState::Clean,
        }
    }

    /// Clears everything written by the previous cycle.
    #[inline]
    pub(crate) fn reset(&mut self, max_capacity: usize) {
        if self.buffer.capacity() > max_capacity {
            self.buffer = Vec::with_capacity(1024);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.head = false;
        self.status = 0;
        self.headers.clear();
        self.state = ResponseState::Clean;
    }

    /// Starts a response that mirrors the request's method, version and
    /// keep-alive.
    #[inline]
    #[track_caller]
    pub(crate) fn prepare(&mut self, method: Method, version: Version, keep_alive: bool) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be called once per cycle"
        );

        self.head = method == Method::Head;
        self.version = version;
        self.keep_alive = keep_alive;
        self.header("content-type", DEFAULT_CONTENT_TYPE);
        self.header("server", SERVER_NAME);
        self.state = ResponseState::Headers;
        self
    }

    /// Sets a header, replacing a previous value with the same name.
    #[inline]
    #[track_caller]
    pub(crate) fn header(&mut self, name: &'static str, value: &str) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before finish()"
        );

        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, v)) => {
                v.clear();
                v.push_str(value);
            }
            None => self.headers.push((name, value.to_owned())),
        }
        self
    }

    /// Forces the connection to close after this response.
    #[inline]
    pub(crate) fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    /// Writes status line, headers and body into the buffer.
    ///
    /// `connection` and `content-length` are always derived here and never
    /// taken from the header list. The body is dropped where the framing
    /// rules above forbid it.
    #[track_caller]
    pub(crate) fn finish(&mut self, status: u16, body: &str) -> &[u8] {
        debug_assert!(
            self.state != ResponseState::Complete,
            "A response is finished only once per cycle"
        );
        debug_assert!(
            !forbids_body(status) || body.is_empty(),
            "Status {status} cannot carry a body"
        );

        self.status = status;
        self.buffer.clear();

        self.buffer.extend_from_slice(self.version.as_bytes());
        self.buffer.push(b' ');
        write_number(&mut self.buffer, status as u64);
        self.buffer.push(b' ');
        self.buffer.extend_from_slice(reason_phrase(status).as_bytes());
        self.buffer.extend_from_slice(b"\r\n");

        for (name, value) in &self.headers {
            self.buffer.extend_from_slice(name.as_bytes());
            self.buffer.extend_from_slice(b": ");
            self.buffer.extend_from_slice(value.as_bytes());
            self.buffer.extend_from_slice(b"\r\n");
        }

        if let Some(value) = self.connection_header() {
            self.buffer.extend_from_slice(b"connection: ");
            self.buffer.extend_from_slice(value);
            self.buffer.extend_from_slice(b"\r\n");
        }

        if !forbids_body(status) {
            self.buffer.extend_from_slice(b"content-length: ");
            write_number(&mut self.buffer, body.len() as u64);
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.buffer.extend_from_slice(b"\r\n");

        if !self.head && !forbids_body(status) {
            self.buffer.extend_from_slice(body.as_bytes());
        }

        self.state = ResponseState::Complete;
        &self.buffer
    }

    #[inline(always)]
    pub(crate) const fn is_complete(&self) -> bool {
        matches!(self.state, ResponseState::Complete)
    }

    #[inline(always)]
    pub(crate) const fn status(&self) -> u16 {
        self.status
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => None,
        }
    }
}

/// Statuses whose responses end with the head.
#[inline(always)]
pub(crate) const fn forbids_body(status: u16) -> bool {
    matches!(status, 100..=199 | 204 | 304)
}

#[inline]
fn write_number(buffer: &mut Vec<u8>, mut n: u64) {
    let mut digits = [b'0'; 20];
    let mut i = digits.len();

    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    buffer.extend_from_slice(&digits[i..]);
}
