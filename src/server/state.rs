use crate::{
    limits::{ConnLimits, Cors, ReqLimits, ServerLimits},
    server::{
        handler::UrlHandler,
        host::{AllowList, HostValidator},
    },
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

/// Configuration and counters shared by every session of a server.
///
/// Built once with [`SharedState::builder`] and handed to sessions as
/// `Arc<SharedState>`. The handler table is frozen at `build()`; only the
/// in-flight counters change afterwards.
pub struct SharedState {
    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) cors: Cors,

    in_flight: Arc<InFlight>,
    handlers: HashMap<String, Arc<dyn UrlHandler>>,
    host_validator: Arc<dyn HostValidator>,
}

impl SharedState {
    #[inline]
    pub fn builder() -> SharedStateBuilder {
        SharedStateBuilder {
            server_limits: None,
            conn_limits: None,
            req_limits: None,
            cors: None,
            handlers: HashMap::new(),
            host_validator: None,
        }
    }

    #[inline(always)]
    pub fn server_limits(&self) -> &ServerLimits {
        &self.server_limits
    }

    #[inline(always)]
    pub fn connection_limits(&self) -> &ConnLimits {
        &self.conn_limits
    }

    #[inline(always)]
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Exact-match lookup of a request target.
    #[inline]
    pub fn handler(&self, target: &str) -> Option<&Arc<dyn UrlHandler>> {
        self.handlers.get(target)
    }

    #[inline(always)]
    pub(crate) fn host_validator(&self) -> &dyn HostValidator {
        self.host_validator.as_ref()
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.handlers.keys().collect();
        paths.sort();

        f.debug_struct("SharedState")
            .field("server_limits", &self.server_limits)
            .field("conn_limits", &self.conn_limits)
            .field("req_limits", &self.req_limits)
            .field("cors", &self.cors)
            .field("in_flight", &self.in_flight)
            .field("handlers", &paths)
            .finish_non_exhaustive()
    }
}

//

/// Builder for [`SharedState`].
pub struct SharedStateBuilder {
    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
    cors: Option<Cors>,
    handlers: HashMap<String, Arc<dyn UrlHandler>>,
    host_validator: Option<Arc<dyn HostValidator>>,
}

impl SharedStateBuilder {
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    #[inline(always)]
    pub fn cors(mut self, cors: Cors) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Replaces the default host validator (an [`AllowList`] that only
    /// accepts the local endpoint).
    #[inline(always)]
    pub fn host_validator<V: HostValidator>(mut self, validator: V) -> Self {
        self.host_validator = Some(Arc::new(validator));
        self
    }

    /// Registers a handler for an exact request target.
    ///
    /// Registering the same path twice keeps the last handler.
    #[inline]
    pub fn handler<P: Into<String>, H: UrlHandler>(mut self, path: P, handler: H) -> Self {
        self.handlers.insert(path.into(), Arc::new(handler));
        self
    }

    #[inline]
    pub fn build(self) -> Arc<SharedState> {
        Arc::new(SharedState {
            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.conn_limits.unwrap_or_default(),
            req_limits: self.req_limits.unwrap_or_default(),
            cors: self.cors.unwrap_or_default(),

            in_flight: Arc::new(InFlight::default()),
            handlers: self.handlers,
            host_validator: self
                .host_validator
                .unwrap_or_else(|| Arc::new(AllowList::default())),
        })
    }
}

//

/// Live admission counters.
#[derive(Debug, Default)]
pub struct InFlight {
    bytes: AtomicU64,
    requests: AtomicI64,
}

impl InFlight {
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    #[inline]
    pub fn requests(&self) -> i64 {
        self.requests.load(Ordering::Acquire)
    }

    /// Accounts `amount` bytes until the returned guard is dropped.
    #[inline]
    pub fn track_bytes(self: &Arc<Self>, amount: u64) -> BytesGuard {
        self.bytes.fetch_add(amount, Ordering::AcqRel);
        BytesGuard {
            in_flight: Arc::clone(self),
            amount,
        }
    }

    /// Accounts one open session until the returned guard is dropped.
    #[inline]
    pub fn track_request(self: &Arc<Self>) -> RequestGuard {
        self.requests.fetch_add(1, Ordering::AcqRel);
        RequestGuard {
            in_flight: Arc::clone(self),
        }
    }
}

/// Releases tracked bytes on drop.
#[derive(Debug)]
pub struct BytesGuard {
    in_flight: Arc<InFlight>,
    amount: u64,
}

impl BytesGuard {
    #[inline(always)]
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for BytesGuard {
    fn drop(&mut self) {
        self.in_flight.bytes.fetch_sub(self.amount, Ordering::AcqRel);
    }
}

/// Releases one open session on drop.
#[derive(Debug)]
pub struct RequestGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.requests.fetch_sub(1, Ordering::AcqRel);
    }
}
