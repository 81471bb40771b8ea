use crate::server::{
    session::Session,
    state::SharedState,
    transport::{PlainTransport, TlsTransport, Transport, UnixTransport},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr, path::Path, sync::Arc};
use tokio::{
    net::{TcpListener, UnixListener},
    task::JoinSet,
};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

/// Accepts connections and runs one [`Session`] task per connection.
///
/// # Examples
///
/// ```no_run
/// use flight_http::{bind_tcp, Responder, Server, SessionHandle, SharedState};
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let state = SharedState::builder()
///         .handler("/v1/chain/info", |_: SessionHandle, _: String, _: Vec<u8>, r: Responder| {
///             r.respond(Some(r#"{"ok":true}"#.into()), 200)
///         })
///         .build();
///
///     Server::builder(state)
///         .listener(bind_tcp("127.0.0.1:8888".parse().unwrap(), 1024)?)
///         .build()
///         .launch()
///         .await;
///     Ok(())
/// }
/// ```
pub struct Server {
    state: Arc<SharedState>,
    tcp: Vec<TcpListener>,
    tls: Vec<(TcpListener, TlsAcceptor)>,
    unix: Vec<UnixListener>,
}

impl Server {
    #[inline]
    pub fn builder(state: Arc<SharedState>) -> ServerBuilder {
        ServerBuilder {
            server: Server {
                state,
                tcp: Vec::new(),
                tls: Vec::new(),
                unix: Vec::new(),
            },
        }
    }

    #[inline(always)]
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Serves every configured listener until all accept loops end.
    ///
    /// Accept loops only end when the runtime shuts down.
    pub async fn launch(self) {
        let mut loops = JoinSet::new();

        for listener in self.tcp {
            loops.spawn(serve_tcp(listener, self.state.clone()));
        }
        for (listener, acceptor) in self.tls {
            loops.spawn(serve_tls(listener, acceptor, self.state.clone()));
        }
        for listener in self.unix {
            loops.spawn(serve_unix(listener, self.state.clone()));
        }

        while loops.join_next().await.is_some() {}
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    server: Server,
}

impl ServerBuilder {
    /// Adds a plain TCP listener.
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.server.tcp.push(listener);
        self
    }

    /// Adds a TCP listener whose connections start with a TLS handshake.
    #[inline(always)]
    pub fn tls_listener(mut self, listener: TcpListener, acceptor: TlsAcceptor) -> Self {
        self.server.tls.push((listener, acceptor));
        self
    }

    #[inline(always)]
    pub fn unix_listener(mut self, listener: UnixListener) -> Self {
        self.server.unix.push(listener);
        self
    }

    #[inline(always)]
    pub fn build(self) -> Server {
        self.server
    }
}

//

#[inline]
fn spawn_session<T: Transport>(transport: T, state: &Arc<SharedState>) {
    tokio::spawn(Session::new(transport, state.clone()).run());
}

/// Accept loop for plain TCP.
pub async fn serve_tcp(listener: TcpListener, state: Arc<SharedState>) {
    info!(addr = ?listener.local_addr().ok(), "serving http");
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let _ = stream.set_nodelay(true);
                spawn_session(PlainTransport::new(stream), &state);
            }
            Err(err) => error!(error = %err, "accept failed"),
        }
    }
}

/// Accept loop for TLS over TCP. The handshake runs inside each session.
pub async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, state: Arc<SharedState>) {
    info!(addr = ?listener.local_addr().ok(), "serving https");
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let _ = stream.set_nodelay(true);
                spawn_session(TlsTransport::new(stream, acceptor.clone()), &state);
            }
            Err(err) => error!(error = %err, "accept failed"),
        }
    }
}

/// Accept loop for a Unix domain socket.
pub async fn serve_unix(listener: UnixListener, state: Arc<SharedState>) {
    info!(path = ?listener.local_addr().ok(), "serving http over unix socket");
    loop {
        match listener.accept().await {
            Ok((stream, _)) => spawn_session(UnixTransport::new(stream), &state),
            Err(err) => error!(error = %err, "accept failed"),
        }
    }
}

//

/// Binds a TCP listener with address reuse and the given accept backlog.
///
/// Must be called from within a tokio runtime.
pub fn bind_tcp(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}

/// Binds a Unix listener, replacing a stale socket file at `path`.
///
/// Must be called from within a tokio runtime.
pub fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    UnixListener::bind(path)
}
