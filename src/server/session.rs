//! Per-connection request/response cycle.
//!
//! ```text
//!            run()
//!              │  requests in flight over limit ──────────────────┐
//!              V                                                  │
//!   ┌──────> Reading ── end of stream / read failure ───────────┐ │
//!   │          │                                                │ │
//!   │          V                                                │ │
//!   │        Parsed ── bad target ──────────────> 400 ──┐       │ │
//!   │          │                                        │       │ │
//!   │          V                                        │       │ │
//!   │      Admitting ── host rejected ──────────────────────────┤ │
//!   │          │   ├─── OPTIONS ────────────────> 200 ──┤       │ │
//!   │          │   └─── bytes in flight ────────> 429 ──┤       │ │
//!   │          V                                        │       │ │
//!   │     Dispatching ── no handler ────────────> 404 ──┤       │ │
//!   │          │   └──── panic / dropped ───────> 500 ──┤       │ │
//!   │          V                                        V       V V
//!   └──────  Writing <──────────────────────────────────┘    Closing ──> Closed
//!         (keep-alive)            (close) ──────────────────────^
//! ```
//!
//! Every response leaves through one funnel (`respond`); a session never has
//! more than one request in flight.

use crate::{
    errors::{ErrorKind, Rejection},
    http::{
        request::{Parser, Request},
        response::{forbids_body, Response},
        types::{Method, StatusCode},
    },
    server::{
        handler::{Responder, SessionHandle, UrlHandler},
        state::{BytesGuard, RequestGuard, SharedState},
        transport::{with_timeout, Transport},
    },
};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

/// Upper bounds for the buffers kept between requests.
const MAX_RETAINED_RESPONSE: usize = 64 * 1024;
const MAX_RETAINED_REQUEST: usize = 64 * 1024;

/// Where a session currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Reading,
    Parsed,
    Admitting,
    Dispatching,
    Writing,
    Closing,
    Closed,
}

/// One accepted connection.
///
/// Construct with [`Session::new`] and drive with [`Session::run`], usually
/// inside its own task:
///
/// ```no_run
/// use flight_http::{PlainTransport, Session, SharedState};
/// use tokio::net::TcpListener;
///
/// # async fn serve() -> std::io::Result<()> {
/// let state = SharedState::builder().build();
/// let listener = TcpListener::bind("127.0.0.1:8888").await?;
///
/// loop {
///     let (stream, _) = listener.accept().await?;
///     let session = Session::new(PlainTransport::new(stream), state.clone());
///     tokio::spawn(session.run());
/// }
/// # }
/// ```
pub struct Session<T: Transport> {
    transport: T,
    state: Arc<SharedState>,
    handle: SessionHandle,

    parser: Parser,
    response: Response,
    cycle: Cycle,
    phase: Phase,
    timers: Timers,

    _in_flight: RequestGuard,
}

// Per request cycle, cleared by `reset_cycle`
#[derive(Debug, Default)]
struct Cycle {
    error: Option<String>,
    bytes: Vec<BytesGuard>,
}

#[derive(Debug)]
struct Timers {
    created: Instant,
    read: Duration,
    handle: Duration,
    write: Duration,
    requests: u64,
}

// Outcome of handling one parsed request
#[derive(Debug)]
enum Flow {
    Reply { body: Option<String>, status: u16 },
    Reject(Rejection),
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    KeepAlive,
    Close,
}

impl<T: Transport> Session<T> {
    /// Binds a transport to the shared state. The session counts as a
    /// request in flight from here until it is dropped.
    pub fn new(transport: T, state: Arc<SharedState>) -> Self {
        let handle = SessionHandle::new(
            transport.name(),
            transport.is_secure(),
            transport.local_endpoint(),
            transport.peer(),
        );

        Self {
            parser: Parser::new(&state.req_limits, state.server_limits.max_body_size),
            response: Response::new(),
            cycle: Cycle::default(),
            phase: Phase::Idle,
            timers: Timers {
                created: Instant::now(),
                read: Duration::ZERO,
                handle: Duration::ZERO,
                write: Duration::ZERO,
                requests: 0,
            },

            _in_flight: state.in_flight().track_request(),
            transport,
            state,
            handle,
        }
    }

    #[inline(always)]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    #[inline(always)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Serves requests until the peer closes, an error occurs or a response
    /// closes the connection.
    pub async fn run(mut self) {
        if let Err(rejection) = self.state.check_requests_in_flight() {
            debug!(
                session = %self.handle,
                requests_in_flight = self.state.in_flight().requests(),
                reason = %rejection.message(),
                "rejecting session before the first read"
            );
            self.close().await;
            return;
        }

        let limit = self.state.conn_limits.handshake_timeout;
        if let Err(err) = with_timeout(limit, self.transport.establish(), "handshake timeout").await {
            self.fail(&err.into(), "handshake");
            self.enter(Phase::Closed);
            return;
        }

        while self.cycle().await == Disposition::KeepAlive {
            self.enter(Phase::Idle);
        }

        self.close().await;
    }

    async fn cycle(&mut self) -> Disposition {
        self.reset_cycle();
        self.enter(Phase::Reading);

        let started = Instant::now();
        let read_timeout = self.state.conn_limits.read_timeout;
        let read = self.parser.read_request(&mut self.transport, read_timeout).await;
        self.timers.read += started.elapsed();

        let request = match read {
            Ok(Some(request)) => request,
            Ok(None) => return Disposition::Close,
            // Peers commonly skip `close_notify` after a complete message
            Err(ErrorKind::Io(err))
                if self.transport.is_secure()
                    && err.kind() == io::ErrorKind::UnexpectedEof
                    && self.parser.is_idle() =>
            {
                trace!(session = %self.handle, "peer closed without close_notify");
                return Disposition::Close;
            }
            Err(err) => {
                self.fail(&err, "read");
                return Disposition::Close;
            }
        };
        self.enter(Phase::Parsed);
        self.timers.requests += 1;

        let started = Instant::now();
        let flow = self.handle_request(request).await;
        self.timers.handle += started.elapsed();

        match flow {
            Ok(Flow::Reply { body, status }) => self.respond(body, status).await,
            Ok(Flow::Reject(rejection)) => {
                self.respond(Some(rejection.message()), rejection.status().as_u16())
                    .await
            }
            Ok(Flow::Silent) => Disposition::Close,
            Err(err) => self.handle_exception(err).await,
        }
    }

    async fn handle_request(&mut self, request: Request) -> Result<Flow, ErrorKind> {
        self.response
            .prepare(request.method(), request.version(), request.is_keep_alive());

        if !is_legal_target(request.target()) {
            debug!(session = %self.handle, target = request.target(), "illegal request-target");
            return Ok(Flow::Reject(Rejection::BadTarget));
        }

        self.enter(Phase::Admitting);
        if !self.transport.validate_host(&request, self.state.host_validator()) {
            debug!(session = %self.handle, host = request.host(), "host not allowed");
            return Ok(Flow::Silent);
        }

        for (name, value) in self.state.cors.headers() {
            self.response.header(name, value);
        }

        if request.method() == Method::Options {
            return Ok(Flow::Reply {
                body: None,
                status: StatusCode::Ok.as_u16(),
            });
        }

        if let Err(rejection) = self.state.check_bytes_in_flight() {
            debug!(
                session = %self.handle,
                bytes_in_flight = self.state.in_flight().bytes(),
                "too many bytes in flight"
            );
            return Ok(Flow::Reject(rejection));
        }

        let Some(handler) = self.state.handler(request.target()).cloned() else {
            debug!(session = %self.handle, target = request.target(), "no handler registered");
            return Ok(Flow::Reject(Rejection::NotFound(request.target().to_owned())));
        };

        self.dispatch(handler, request).await
    }

    async fn dispatch(
        &mut self,
        handler: Arc<dyn UrlHandler>,
        mut request: Request,
    ) -> Result<Flow, ErrorKind> {
        self.enter(Phase::Dispatching);

        let body = request.take_body();
        let tracked = self.state.in_flight().track_bytes(body.len() as u64);
        self.cycle.bytes.push(tracked);

        let (responder, reply) = Responder::channel();
        let session = self.handle.clone();
        let path = request.target().to_owned();

        panic::catch_unwind(AssertUnwindSafe(|| {
            handler.call(session, path, body, responder)
        }))
        .map_err(|payload| ErrorKind::HandlerPanicked(panic_message(payload.as_ref())))?;

        let reply = reply.await.map_err(|_| ErrorKind::HandlerDropped)?;
        // Interim statuses cannot end a cycle
        if !(200..=999).contains(&reply.status) {
            return Err(ErrorKind::InvalidStatus(reply.status));
        }
        if forbids_body(reply.status) && reply.body.as_ref().is_some_and(|b| !b.is_empty()) {
            return Err(ErrorKind::BodyNotAllowed(reply.status));
        }

        let len = reply.body.as_ref().map_or(0, String::len);
        let tracked = self.state.in_flight().track_bytes(len as u64);
        self.cycle.bytes.push(tracked);

        Ok(Flow::Reply {
            body: reply.body,
            status: reply.status,
        })
    }

    /// Last-resort path for internal failures: `500`, plain text, and the
    /// connection is closed afterwards.
    async fn handle_exception(&mut self, err: ErrorKind) -> Disposition {
        error!(session = %self.handle, error = %err, "request failed");

        let diagnostic = err.to_string();
        self.cycle.error = Some(diagnostic.clone());

        self.response.header("content-type", "text/plain").close();
        let rejection = Rejection::Internal(diagnostic);
        self.respond(Some(rejection.message()), rejection.status().as_u16())
            .await
    }

    /// The response funnel. Serializes and writes exactly one response for
    /// the current cycle and decides whether the connection stays open.
    async fn respond(&mut self, body: Option<String>, status: u16) -> Disposition {
        debug_assert!(!self.response.is_complete(), "response already sent in this cycle");
        if self.response.is_complete() {
            return Disposition::Close;
        }
        self.enter(Phase::Writing);

        if !self.state.conn_limits.keep_alive {
            self.response.close();
        }
        let keep_alive = self.response.keep_alive;

        let started = Instant::now();
        let write_timeout = self.state.conn_limits.write_timeout;
        let bytes = self.response.finish(status, body.as_deref().unwrap_or(""));
        let written = with_timeout(write_timeout, self.transport.write_all(bytes), "write timeout").await;
        self.timers.write += started.elapsed();

        // The response has left, release its accounting
        self.cycle.bytes.clear();

        if let Err(err) = written {
            self.fail(&err.into(), "write");
            return Disposition::Close;
        }
        trace!(session = %self.handle, status = self.response.status(), keep_alive, "response written");

        match keep_alive {
            true => Disposition::KeepAlive,
            false => Disposition::Close,
        }
    }

    async fn close(&mut self) {
        self.enter(Phase::Closing);
        match self.transport.half_close().await {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => {
                self.fail(&err.into(), "shutdown")
            }
            _ => {}
        }
        self.enter(Phase::Closed);
    }

    fn reset_cycle(&mut self) {
        self.cycle.error = None;
        self.cycle.bytes.clear();
        self.response.reset(MAX_RETAINED_RESPONSE);
        self.parser.shrink(MAX_RETAINED_REQUEST);
    }

    fn fail(&mut self, err: &ErrorKind, what: &'static str) {
        match err.is_parse_error() {
            true => warn!(session = %self.handle, error = %err, "malformed request"),
            false => error!(session = %self.handle, phase = ?self.phase, error = %err, "{what} failed"),
        }
        self.cycle.error = Some(format!("{what}: {err}"));
    }

    #[inline]
    fn enter(&mut self, phase: Phase) {
        trace!(session = %self.handle, from = ?self.phase, to = ?phase, "session transition");
        self.phase = phase;
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        trace!(
            session = %self.handle,
            requests = self.timers.requests,
            total_us = self.timers.created.elapsed().as_micros() as u64,
            read_us = self.timers.read.as_micros() as u64,
            handle_us = self.timers.handle.as_micros() as u64,
            write_us = self.timers.write.as_micros() as u64,
            last_error = self.cycle.error.as_deref(),
            "session finished"
        );
    }
}

/// A target must be non-empty, absolute and free of `..`.
#[inline]
fn is_legal_target(target: &str) -> bool {
    target.starts_with('/') && !target.contains("..")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::{ConnLimits, Cors, ServerLimits},
        server::transport::testing::MemoryTransport,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const HOST: &str = "Host: 127.0.0.1:8888\r\n";

    fn get(target: &str) -> String {
        format!("GET {target} HTTP/1.1\r\n{HOST}\r\n")
    }

    fn info(_: SessionHandle, _: String, _: Vec<u8>, resp: Responder) {
        resp.respond(Some(r#"{"ok":true}"#.into()), 200);
    }

    fn state(limits: ServerLimits) -> Arc<SharedState> {
        SharedState::builder()
            .server_limits(limits)
            .handler("/v1/chain/info", info)
            .build()
    }

    fn default_state() -> Arc<SharedState> {
        state(ServerLimits {
            max_bytes_in_flight: 1000,
            ..ServerLimits::default()
        })
    }

    // Reads a status line and headers, nothing after the blank line
    async fn read_head(client: &mut DuplexStream) -> (u16, String) {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];

        while !raw.ends_with(b"\r\n\r\n") {
            assert_eq!(client.read(&mut byte).await.unwrap(), 1, "connection closed early");
            raw.push(byte[0]);
        }

        let head = String::from_utf8(raw).unwrap();
        (head[9..12].parse().unwrap(), head)
    }

    // Reads exactly one response off the client side
    async fn read_response(client: &mut DuplexStream) -> (u16, String, String) {
        let (status, head) = read_head(client).await;
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length: "))
            .unwrap()
            .parse()
            .unwrap();

        let mut body = vec![0; len];
        client.read_exact(&mut body).await.unwrap();
        (status, head, String::from_utf8(body).unwrap())
    }

    async fn assert_closed(client: &mut DuplexStream) {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected bytes: {:?}", String::from_utf8_lossy(&rest));
    }

    fn spawn(state: Arc<SharedState>) -> (tokio::task::JoinHandle<()>, DuplexStream) {
        let (transport, client) = MemoryTransport::pair();
        let session = Session::new(transport, state);
        (tokio::spawn(session.run()), client)
    }

    #[tokio::test]
    async fn serves_registered_handler_and_keeps_alive() {
        let (task, mut client) = spawn(default_state());

        client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
        let (status, head, body) = read_response(&mut client).await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"ok":true}"#);
        assert!(head.contains("content-type: application/json\r\n"));
        assert!(head.contains("server: flight_http/"));
        assert!(!head.contains("connection:"));

        // Same connection
        client.write_all(get("/unknown").as_bytes()).await.unwrap();
        let (status, _, body) = read_response(&mut client).await;
        assert_eq!(status, 404);
        assert_eq!(body, "The resource '/unknown' was not found.");

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_illegal_targets_and_continues() {
        let (task, mut client) = spawn(default_state());

        for target in ["/../etc/passwd", "relative", "/a/..", "*"] {
            client.write_all(get(target).as_bytes()).await.unwrap();
            let (status, _, body) = read_response(&mut client).await;
            assert_eq!((status, body.as_str()), (400, "Illegal request-target"), "{target}");
        }

        client.write_all(b"GET  HTTP/1.1\r\n\r\n").await.unwrap();
        let (status, _, _) = read_response(&mut client).await;
        assert_eq!(status, 400);

        client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
        assert_eq!(read_response(&mut client).await.0, 200);

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn too_many_bytes_in_flight() {
        let state = default_state();
        let _pressure = state.in_flight().track_bytes(2000);
        let (task, mut client) = spawn(state.clone());

        client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
        let (status, _, body) = read_response(&mut client).await;
        assert_eq!(status, 429);
        assert_eq!(body, "Too many bytes in flight: 2000. Try again later.");

        // Unregistered paths are rejected before the lookup
        client.write_all(get("/unknown").as_bytes()).await.unwrap();
        assert_eq!(read_response(&mut client).await.0, 429);

        drop(client);
        task.await.unwrap();
        assert_eq!(state.in_flight().bytes(), 2000);
    }

    #[tokio::test]
    async fn too_many_requests_closes_without_reading() {
        let state = state(ServerLimits {
            max_requests_in_flight: 0,
            ..ServerLimits::default()
        });
        let (task, mut client) = spawn(state.clone());

        task.await.unwrap();
        assert_closed(&mut client).await;
        assert_eq!(state.in_flight().requests(), 0);
    }

    #[tokio::test]
    async fn options_preflight_with_cors() {
        let state = SharedState::builder()
            .cors(Cors {
                allow_origin: "*".into(),
                max_age: "600".into(),
                ..Cors::default()
            })
            .build();
        let (task, mut client) = spawn(state);

        for _ in 0..3 {
            client
                .write_all(format!("OPTIONS /anything HTTP/1.1\r\n{HOST}\r\n").as_bytes())
                .await
                .unwrap();
            let (status, head, body) = read_response(&mut client).await;
            assert_eq!(status, 200);
            assert!(body.is_empty());
            assert!(head.contains("access-control-allow-origin: *\r\n"));
            assert!(head.contains("access-control-max-age: 600\r\n"));
            assert!(!head.contains("access-control-allow-headers"));
            assert!(head.contains("content-length: 0\r\n"));
        }

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn host_rejection_is_silent() {
        let (task, mut client) = spawn(default_state());

        client
            .write_all(b"GET /v1/chain/info HTTP/1.1\r\nHost: evil.com\r\n\r\n")
            .await
            .unwrap();
        task.await.unwrap();
        assert_closed(&mut client).await;

        // Missing host behaves the same
        let (task, mut client) = spawn(default_state());
        client.write_all(b"GET /v1/chain/info HTTP/1.1\r\n\r\n").await.unwrap();
        task.await.unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn keep_alive_disabled_closes_after_each_response() {
        let state = SharedState::builder()
            .connection_limits(ConnLimits {
                keep_alive: false,
                ..ConnLimits::default()
            })
            .handler("/v1/chain/info", info)
            .build();
        let (task, mut client) = spawn(state);

        client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
        let (status, head, _) = read_response(&mut client).await;
        assert_eq!(status, 200);
        assert!(head.contains("connection: close\r\n"));

        task.await.unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn client_requested_close() {
        let (task, mut client) = spawn(default_state());

        client
            .write_all(format!("GET /v1/chain/info HTTP/1.0\r\n{HOST}\r\n").as_bytes())
            .await
            .unwrap();
        let (status, head, _) = read_response(&mut client).await;
        assert_eq!(status, 200);
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));

        task.await.unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn internal_errors_answer_500_and_close() {
        #[rustfmt::skip]
        let cases: [(&str, fn(SessionHandle, String, Vec<u8>, Responder), &str); 6] = [
            ("/panic",    |_, _, _, _| panic!("handler exploded"),               "handler panicked: handler exploded"),
            ("/dropped",  |_, _, _, resp| drop(resp),                            "handler dropped the response without replying"),
            ("/status",   |_, _, _, resp| resp.respond(None, 42),                "handler replied with invalid status code 42"),
            ("/interim",  |_, _, _, resp| resp.respond(None, 101),               "handler replied with invalid status code 101"),
            ("/empty",    |_, _, _, resp| resp.respond(Some("x".into()), 204),   "handler replied with a body for status 204"),
            ("/modified", |_, _, _, resp| resp.respond(Some("{}".into()), 304),  "handler replied with a body for status 304"),
        ];

        for (path, handler, diagnostic) in cases {
            let state = SharedState::builder().handler(path, handler).build();
            let (task, mut client) = spawn(state.clone());

            client.write_all(get(path).as_bytes()).await.unwrap();
            let (status, head, body) = read_response(&mut client).await;
            assert_eq!(status, 500, "{path}");
            assert_eq!(body, diagnostic);
            assert!(head.contains("content-type: text/plain\r\n"));
            assert!(head.contains("connection: close\r\n"));

            task.await.unwrap();
            assert_closed(&mut client).await;
            assert_eq!(state.in_flight().bytes(), 0);
        }
    }

    #[tokio::test]
    async fn deferred_reply_and_bytes_accounting() {
        let (seen_tx, seen_rx) = std::sync::mpsc::channel();
        let state = SharedState::builder()
            .handler(
                "/v1/echo",
                move |session: SessionHandle, path: String, body: Vec<u8>, resp: Responder| {
                    seen_tx.send((session.transport_name(), path)).unwrap();
                    tokio::spawn(async move {
                        tokio::task::yield_now().await;
                        resp.respond(Some(String::from_utf8(body).unwrap()), 201);
                    });
                },
            )
            .build();
        let (task, mut client) = spawn(state.clone());

        client
            .write_all(format!("POST /v1/echo HTTP/1.1\r\n{HOST}Content-Length: 5\r\n\r\nhello").as_bytes())
            .await
            .unwrap();
        let (status, _, body) = read_response(&mut client).await;
        assert_eq!((status, body.as_str()), (201, "hello"));
        assert_eq!(seen_rx.recv().unwrap(), ("memory_session", "/v1/echo".to_owned()));

        drop(client);
        task.await.unwrap();
        assert_eq!(state.in_flight().bytes(), 0);
        assert_eq!(state.in_flight().requests(), 0);
    }

    #[tokio::test]
    async fn head_requests_get_headers_only() {
        let (task, mut client) = spawn(default_state());

        client
            .write_all(format!("HEAD /v1/chain/info HTTP/1.1\r\n{HOST}\r\n").as_bytes())
            .await
            .unwrap();
        let (status, head) = read_head(&mut client).await;
        assert_eq!(status, 200);
        assert!(head.contains("content-length: 11\r\n"), "{head}");

        // The next bytes on the wire start the next response
        client.write_all(get("/unknown").as_bytes()).await.unwrap();
        let (status, _, body) = read_response(&mut client).await;
        assert_eq!(status, 404);
        assert_eq!(body, "The resource '/unknown' was not found.");

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn bodiless_statuses_keep_the_connection_in_sync() {
        let state = SharedState::builder()
            .handler("/empty", |_: SessionHandle, _: String, _: Vec<u8>, resp: Responder| {
                resp.respond(None, 204)
            })
            .handler("/cached", |_: SessionHandle, _: String, _: Vec<u8>, resp: Responder| {
                resp.respond(Some(String::new()), 304)
            })
            .handler("/v1/chain/info", info)
            .build();
        let (task, mut client) = spawn(state);

        #[rustfmt::skip]
        let cases = [
            ("/empty",  204, "HTTP/1.1 204 No Content\r\n"),
            ("/cached", 304, "HTTP/1.1 304 Not Modified\r\n"),
        ];

        for (target, expected, status_line) in cases {
            client.write_all(get(target).as_bytes()).await.unwrap();
            let (status, head) = read_head(&mut client).await;
            assert_eq!(status, expected);
            assert!(head.starts_with(status_line), "{head}");
            assert!(!head.contains("content-length"), "{head}");

            client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
            let (status, _, body) = read_response(&mut client).await;
            assert_eq!((status, body.as_str()), (200, r#"{"ok":true}"#));
        }

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn missing_close_notify_between_requests_is_not_an_error() {
        let (mut transport, mut client) = MemoryTransport::pair();
        transport.secure = true;
        transport.truncating = true;
        let mut session = Session::new(transport, default_state());

        client.write_all(get("/v1/chain/info").as_bytes()).await.unwrap();
        assert_eq!(session.cycle().await, Disposition::KeepAlive);
        assert_eq!(read_response(&mut client).await.0, 200);

        drop(client);
        assert_eq!(session.cycle().await, Disposition::Close);
        assert!(session.cycle.error.is_none(), "{:?}", session.cycle.error);
    }

    #[tokio::test]
    async fn truncation_inside_a_request_is_an_error() {
        let (mut transport, mut client) = MemoryTransport::pair();
        transport.secure = true;
        transport.truncating = true;
        let mut session = Session::new(transport, default_state());

        client.write_all(b"GET /v1/chain/info HTTP/1.1\r\nHost: 127.0").await.unwrap();
        drop(client);

        assert_eq!(session.cycle().await, Disposition::Close);
        let error = session.cycle.error.as_deref().unwrap_or_default();
        assert!(error.starts_with("read: "), "{error:?}");
    }

    #[tokio::test]
    async fn idle_session_gives_back_request_memory() {
        let state = SharedState::builder()
            .handler("/upload", |_: SessionHandle, _: String, _: Vec<u8>, resp: Responder| {
                resp.respond(None, 200)
            })
            .build();
        let (transport, mut client) = MemoryTransport::pair();
        let mut session = Session::new(transport, state);

        let len = 512 * 1024;
        let head = format!("POST /upload HTTP/1.1\r\n{HOST}Content-Length: {len}\r\n\r\n");
        let writer = tokio::spawn(async move {
            client.write_all(head.as_bytes()).await.unwrap();
            client.write_all(&vec![b'x'; len]).await.unwrap();
            let (status, _, _) = read_response(&mut client).await;
            assert_eq!(status, 200);
            client
        });

        assert_eq!(session.cycle().await, Disposition::KeepAlive);
        assert!(session.parser.capacity() > MAX_RETAINED_REQUEST);
        let client = writer.await.unwrap();

        session.reset_cycle();
        assert!(session.parser.capacity() <= MAX_RETAINED_REQUEST);
        drop(client);
    }

    #[tokio::test]
    async fn malformed_request_closes_without_response() {
        let (task, mut client) = spawn(default_state());

        client.write_all(b"BREW /pot HTTP/1.1\r\n\r\n").await.unwrap();
        task.await.unwrap();
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let (task, mut client) = spawn(default_state());

        let both = get("/v1/chain/info") + &get("/nope");
        client.write_all(both.as_bytes()).await.unwrap();

        assert_eq!(read_response(&mut client).await.0, 200);
        assert_eq!(read_response(&mut client).await.0, 404);

        drop(client);
        task.await.unwrap();
    }

    #[test]
    fn legal_targets() {
        #[rustfmt::skip]
        let cases = [
            ("/",                  true),
            ("/v1/chain/info",     true),
            ("/a.b/c",             true),
            ("",                   false),
            ("v1/chain",           false),
            ("/../etc/passwd",     false),
            ("/v1/..",             false),
        ];

        for (target, legal) in cases {
            assert_eq!(is_legal_target(target), legal, "{target:?}");
        }
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
