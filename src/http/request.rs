use crate::{
    errors::ErrorKind,
    http::types::{self, Method, Version},
    limits::ReqLimits,
    server::transport::{with_timeout, Transport},
};
use memchr::{memchr, memchr_iter, memmem, memrchr};
use std::time::Duration;

/// A parsed HTTP/1.x request.
///
/// # Wire format
///
/// - Request line: `[METHOD] SP [TARGET] SP "HTTP/1." ("0" | "1") CRLF`.
///   The target may be empty or relative; the session, not the parser,
///   decides whether it is acceptable.
/// - Headers: `[NAME] ":" OWS [VALUE] OWS CRLF`, names are case-insensitive,
///   surrounding whitespace of values is trimmed.
/// - Body: only with an explicit `Content-Length`. `Transfer-Encoding` is
///   rejected.
///
/// The request line and headers must be valid `UTF-8`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    target: String,
    version: Version,

    headers: Vec<Header>,
    content_length: Option<usize>,
    keep_alive: bool,

    body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) name: String,
    pub(crate) value: String,
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The raw request target as sent, e.g. `/v1/chain/get_info`.
    #[inline(always)]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the header value with case-insensitive name matching.
    /// When a header is repeated, the last value wins.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// The `Host` header, or an empty string when absent.
    #[inline]
    pub fn host(&self) -> &str {
        self.header("host").unwrap_or("")
    }

    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Whether the client asked to keep the connection open, after applying
    /// the version default and the `Connection` header.
    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}

//

/// Incremental request parser.
///
/// Bytes read from the transport accumulate in `buffer` until a full head
/// (`\r\n\r\n`) and the announced body are present. Bytes that belong to a
/// following request stay in the buffer for the next cycle.
#[derive(Debug)]
pub(crate) struct Parser {
    buffer: Vec<u8>,
    scanned: usize,
    pending: Option<Pending>,

    limits: ReqLimits,
    max_body_size: usize,
}

#[derive(Debug)]
struct Pending {
    request: Request,
    body_start: usize,
    body_len: usize,
}

impl Parser {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits, max_body_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.read_chunk),
            scanned: 0,
            pending: None,

            limits: limits.clone(),
            max_body_size,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, max_body_size: usize, value: V) -> Self {
        let mut parser = Self::new(limits, max_body_size);
        parser.buffer.extend_from_slice(value.as_ref());
        parser
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// No byte of a following request has arrived yet.
    #[inline(always)]
    pub(crate) fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Gives back memory grown by a large request. Pipelined bytes stay.
    #[inline]
    pub(crate) fn shrink(&mut self, max_capacity: usize) {
        if self.buffer.capacity() > max_capacity {
            self.buffer.shrink_to(self.limits.read_chunk);
        }
    }
}

// Work with the transport
impl Parser {
    /// Reads until one complete request is available.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between requests.
    pub(crate) async fn read_request<T: Transport>(
        &mut self,
        transport: &mut T,
        read_timeout: Option<Duration>,
    ) -> Result<Option<Request>, ErrorKind> {
        loop {
            if let Some(request) = self.try_parse()? {
                return Ok(Some(request));
            }

            if self.fill(transport, read_timeout).await? == 0 {
                return match self.buffer.is_empty() {
                    true => Ok(None),
                    false => Err(ErrorKind::IncompleteMessage),
                };
            }
        }
    }

    async fn fill<T: Transport>(
        &mut self,
        transport: &mut T,
        read_timeout: Option<Duration>,
    ) -> Result<usize, ErrorKind> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.limits.read_chunk.max(1), 0);

        let result = with_timeout(
            read_timeout,
            transport.read(&mut self.buffer[start..]),
            "read timeout",
        )
        .await;

        let n = match result {
            Ok(n) => n,
            Err(err) => {
                self.buffer.truncate(start);
                return Err(err.into());
            }
        };

        self.buffer.truncate(start + n);
        Ok(n)
    }
}

// Parsing
impl Parser {
    /// Tries to complete a request from the bytes buffered so far.
    pub(crate) fn try_parse(&mut self) -> Result<Option<Request>, ErrorKind> {
        if self.pending.is_none() {
            let Some(head_end) = self.find_head_end()? else {
                return Ok(None);
            };

            let request = self.parse_head(head_end)?;
            let body_len = request.content_length.unwrap_or(0);
            if body_len > self.max_body_size {
                return Err(ErrorKind::BodyTooLarge {
                    size: body_len,
                    limit: self.max_body_size,
                });
            }

            self.pending = Some(Pending {
                request,
                body_start: head_end,
                body_len,
            });
        }

        let Some(pending) = &self.pending else {
            return Ok(None);
        };
        let end = pending.body_start + pending.body_len;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let Some(Pending {
            mut request,
            body_start,
            ..
        }) = self.pending.take()
        else {
            return Ok(None);
        };
        request.body = self.buffer[body_start..end].to_vec();

        self.buffer.drain(..end);
        self.scanned = 0;

        Ok(Some(request))
    }

    // Index just past the blank line that ends the head
    #[inline]
    fn find_head_end(&mut self) -> Result<Option<usize>, ErrorKind> {
        let from = self.scanned.saturating_sub(3);
        let found = memmem::find(&self.buffer[from..], b"\r\n\r\n").map(|i| from + i + 4);

        match found {
            Some(end) if end > self.limits.header_block_size => {
                Err(ErrorKind::HeadersTooLarge(self.limits.header_block_size))
            }
            Some(end) => Ok(Some(end)),
            None if self.buffer.len() > self.limits.header_block_size => {
                Err(ErrorKind::HeadersTooLarge(self.limits.header_block_size))
            }
            None => {
                self.scanned = self.buffer.len();
                Ok(None)
            }
        }
    }

    fn parse_head(&self, head_end: usize) -> Result<Request, ErrorKind> {
        // Without the final CRLF
        let head = &self.buffer[..head_end - 2];
        let head = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::InvalidEncoding)?;
        let bytes = head.as_bytes();

        let mut lines = memchr_iter(b'\n', bytes);
        let first_end = lines.next().ok_or(ErrorKind::InvalidRequestLine)?;
        let mut request = Self::parse_request_line(line(head, 0, first_end)?)?;

        let mut start = first_end + 1;
        for end in lines {
            if request.headers.len() >= self.limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            let header = line(head, start, end).map_err(|_| ErrorKind::InvalidHeader)?;
            request.apply_header(header)?;
            start = end + 1;
        }

        Ok(request)
    }

    fn parse_request_line(first_line: &str) -> Result<Request, ErrorKind> {
        let bytes = first_line.as_bytes();

        let method_end = memchr(b' ', bytes).ok_or(ErrorKind::InvalidRequestLine)?;
        let version_start = memrchr(b' ', bytes).ok_or(ErrorKind::InvalidRequestLine)?;
        if method_end == version_start {
            return Err(ErrorKind::InvalidRequestLine);
        }

        let method = Method::from_bytes(&bytes[..method_end])?;
        let target = &first_line[method_end + 1..version_start];
        if target.bytes().any(|b| b == b' ' || b.is_ascii_control()) {
            return Err(ErrorKind::InvalidRequestLine);
        }
        let (version, keep_alive) = Version::from_bytes(&bytes[version_start + 1..])?;

        Ok(Request {
            method,
            target: target.to_owned(),
            version,

            headers: Vec::new(),
            content_length: None,
            keep_alive,

            body: Vec::new(),
        })
    }
}

// `start..end` where `end` is the index of `\n`; the line must end in CRLF
#[inline]
fn line(head: &str, start: usize, end: usize) -> Result<&str, ErrorKind> {
    match head.as_bytes().get(end.wrapping_sub(1)) {
        Some(b'\r') if end > start => Ok(&head[start..end - 1]),
        _ => Err(ErrorKind::InvalidRequestLine),
    }
}

// Parse headers
impl Request {
    fn apply_header(&mut self, line: &str) -> Result<(), ErrorKind> {
        let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');

        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
        {
            return Err(ErrorKind::InvalidHeader);
        }

        if name.eq_ignore_ascii_case("content-length") {
            let len = types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;
            if self.content_length.is_some_and(|prev| prev != len) {
                return Err(ErrorKind::InvalidContentLength);
            }
            self.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ErrorKind::UnsupportedTransferEncoding);
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    self.keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
        }

        self.headers.push(Header {
            name: name.to_owned(),
            value: value.to_owned(),
        });
        Ok(())
    }
}
