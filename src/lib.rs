//! flight_http - HTTP/1.1 session layer with in-flight admission control
//!
//! Runs one request/response cycle at a time per connection over plain TCP,
//! TLS or Unix domain sockets, and sheds load before any handler runs.
//!
//! # Request cycle
//!
//! 1. **Read** one request (HTTP/1.0 or HTTP/1.1, `content-length` bodies)
//! 2. **Validate** the target (absolute, no `..`) and the `Host` header
//! 3. **Admit** against the bytes in flight, answering `OPTIONS` preflights
//!    directly with the configured CORS headers
//! 4. **Dispatch** by exact path to a registered [`UrlHandler`]
//! 5. **Write** the single response and keep the connection or close it
//!
//! Every response, including `400`, `404`, `429` and `500`, goes through the
//! same funnel, so CORS, `server`, `content-length` and keep-alive handling
//! are uniform.
//!
//! # Backpressure
//!
//! - Open sessions above [`ServerLimits::max_requests_in_flight`](limits::ServerLimits)
//!   are closed before anything is read.
//! - Requests arriving while the bytes in flight are above
//!   [`ServerLimits::max_bytes_in_flight`](limits::ServerLimits) get `429`.
//!
//! # Examples
//!
//! ```no_run
//! use flight_http::{bind_tcp, Responder, Server, SessionHandle, SharedState};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let state = SharedState::builder()
//!         .handler("/v1/chain/info", |_: SessionHandle, _: String, _: Vec<u8>, resp: Responder| {
//!             resp.respond(Some(r#"{"ok":true}"#.into()), 200);
//!         })
//!         .build();
//!
//!     Server::builder(state)
//!         .listener(bind_tcp("127.0.0.1:8888".parse().unwrap(), 1024)?)
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! With a configuration file:
//! ```no_run
//! use flight_http::{config::load_config, Server};
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(Path::new("flight_http.toml"))?;
//! let state = config.state_builder().build();
//!
//! Server::builder(state)
//!     .unix_listener(flight_http::bind_unix(Path::new("/tmp/flight_http.sock"))?)
//!     .build()
//!     .launch()
//!     .await;
//! # Ok(())
//! # }
//! ```

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod admission;
    pub(crate) mod handler;
    pub(crate) mod host;
    #[allow(clippy::module_inception)]
    pub(crate) mod server;
    pub(crate) mod session;
    pub(crate) mod state;
    pub(crate) mod transport;
}
pub mod config;
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{ErrorKind, Rejection, TlsError},
    http::{
        request::Request,
        types::{Method, StatusCode, Version},
    },
    server::{
        handler::{Responder, SessionHandle, SessionId, UrlHandler},
        host::{AllowList, HostValidator},
        server::{bind_tcp, bind_unix, serve_tcp, serve_tls, serve_unix, Server, ServerBuilder},
        session::{Phase, Session},
        state::{BytesGuard, InFlight, RequestGuard, SharedState, SharedStateBuilder},
        transport::{load_tls_acceptor, PlainTransport, TlsTransport, Transport, UnixTransport},
    },
};
pub use tokio_rustls::TlsAcceptor;
