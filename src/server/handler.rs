//! Handler table entries and the one-shot reply channel.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;

/// A request handler registered for an exact target.
///
/// The handler receives the target and the request body, and must reply
/// through the [`Responder`] exactly once. The call itself is synchronous;
/// handlers with asynchronous work move the responder into a spawned task.
/// The session waits for the reply before reading the next request.
///
/// # Examples
///
/// ```
/// use flight_http::{Responder, SessionHandle, SharedState};
///
/// let state = SharedState::builder()
///     .handler("/v1/echo", |_: SessionHandle, _: String, body: Vec<u8>, resp: Responder| {
///         resp.respond(Some(String::from_utf8_lossy(&body).into_owned()), 200);
///     })
///     .handler("/v1/slow", |_: SessionHandle, _: String, _: Vec<u8>, resp: Responder| {
///         tokio::spawn(async move {
///             resp.respond(Some(r#"{"done":true}"#.into()), 200);
///         });
///     })
///     .build();
/// ```
///
/// A panic inside `call` or a responder dropped without replying is answered
/// with `500 Internal Server Error`.
pub trait UrlHandler: Send + Sync + 'static {
    fn call(&self, session: SessionHandle, path: String, body: Vec<u8>, responder: Responder);
}

impl<F> UrlHandler for F
where
    F: Fn(SessionHandle, String, Vec<u8>, Responder) + Send + Sync + 'static,
{
    #[inline]
    fn call(&self, session: SessionHandle, path: String, body: Vec<u8>, responder: Responder) {
        self(session, path, body, responder)
    }
}

//

#[derive(Debug)]
pub(crate) struct Reply {
    pub(crate) body: Option<String>,
    pub(crate) status: u16,
}

/// Completes the current request. Consumed by [`Responder::respond`], so a
/// request is answered at most once.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Reply>,
}

impl Responder {
    #[inline]
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Sends the response. `None` is written as an empty body.
    ///
    /// Replying after the session is gone is a no-op.
    #[inline]
    pub fn respond(self, body: Option<String>, status: u16) {
        let _ = self.tx.send(Reply { body, status });
    }

    /// Whether the session is still waiting for this reply.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        !self.tx.is_closed()
    }
}

//

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    #[inline]
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Read-only description of the session a request arrived on.
///
/// Cheap to clone. Holding it does not keep the connection open.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<SessionInfo>);

#[derive(Debug)]
struct SessionInfo {
    id: SessionId,
    transport: &'static str,
    secure: bool,
    local_endpoint: Option<String>,
    peer: Option<String>,
}

impl SessionHandle {
    #[inline]
    pub(crate) fn new(
        transport: &'static str,
        secure: bool,
        local_endpoint: Option<String>,
        peer: Option<String>,
    ) -> Self {
        Self(Arc::new(SessionInfo {
            id: SessionId::next(),
            transport,
            secure,
            local_endpoint,
            peer,
        }))
    }

    #[inline(always)]
    pub fn id(&self) -> SessionId {
        self.0.id
    }

    /// `"plain_session"`, `"tls_session"` or `"unix_socket_session"`.
    #[inline(always)]
    pub fn transport_name(&self) -> &'static str {
        self.0.transport
    }

    #[inline(always)]
    pub fn is_secure(&self) -> bool {
        self.0.secure
    }

    #[inline]
    pub fn local_endpoint(&self) -> Option<&str> {
        self.0.local_endpoint.as_deref()
    }

    #[inline]
    pub fn peer(&self) -> Option<&str> {
        self.0.peer.as_deref()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0.transport, self.0.id)?;
        if let Some(peer) = &self.0.peer {
            write!(f, " ({peer})")?;
        }
        Ok(())
    }
}
