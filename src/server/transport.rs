//! Byte transports a session can run over.
//!
//! | Transport         | `is_secure` | Host validation        | Half-close              |
//! |-------------------|-------------|------------------------|-------------------------|
//! | [`PlainTransport`] | `false`     | validator, local addr  | TCP write shutdown      |
//! | [`TlsTransport`]   | `true`      | validator, local addr  | `close_notify` + shutdown |
//! | [`UnixTransport`]  | `false`     | always accepted        | write shutdown          |

use crate::{errors::TlsError, http::request::Request, server::host::HostValidator};
use std::{
    fs::File,
    future::Future,
    io::{self, BufReader},
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    time::timeout,
};
use tokio_rustls::{rustls, server::TlsStream, TlsAcceptor};

/// The operations a [`Session`](crate::Session) needs from a connection.
pub trait Transport: Send + 'static {
    /// Runs connection setup that must finish before the first read.
    fn establish(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }

    /// Reads some bytes; `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Writes the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Signals the peer that no more data will be sent.
    fn half_close(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    fn is_secure(&self) -> bool;

    /// Checks the request's `Host` header for this transport.
    fn validate_host(&self, request: &Request, validator: &dyn HostValidator) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Local endpoint as `address:port`, or the socket path.
    fn local_endpoint(&self) -> Option<String>;

    fn peer(&self) -> Option<String>;
}

/// Runs `op`, failing with `TimedOut` when `limit` elapses first.
pub(crate) async fn with_timeout<F, T>(
    limit: Option<Duration>,
    op: F,
    what: &'static str,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => timeout(limit, op)
            .await
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, what))),
        None => op.await,
    }
}

#[inline]
fn validate_socket_host(
    request: &Request,
    local: Option<SocketAddr>,
    is_secure: bool,
    validator: &dyn HostValidator,
) -> bool {
    let host = request.host();
    match local {
        Some(local) if !host.is_empty() => {
            validator.validate_host(host, &local.to_string(), is_secure)
        }
        _ => false,
    }
}

// PLAIN

/// Unencrypted TCP.
#[derive(Debug)]
pub struct PlainTransport {
    stream: TcpStream,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl PlainTransport {
    #[inline]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            local: stream.local_addr().ok(),
            peer: stream.peer_addr().ok(),
            stream,
        }
    }
}

impl Transport for PlainTransport {
    #[inline]
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    #[inline]
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    #[inline]
    async fn half_close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    #[inline(always)]
    fn is_secure(&self) -> bool {
        false
    }

    #[inline]
    fn validate_host(&self, request: &Request, validator: &dyn HostValidator) -> bool {
        validate_socket_host(request, self.local, false, validator)
    }

    #[inline(always)]
    fn name(&self) -> &'static str {
        "plain_session"
    }

    fn local_endpoint(&self) -> Option<String> {
        self.local.map(|addr| addr.to_string())
    }

    fn peer(&self) -> Option<String> {
        self.peer.map(|addr| addr.to_string())
    }
}

// TLS

/// TLS over TCP. The handshake runs in [`Transport::establish`].
pub struct TlsTransport {
    state: TlsState,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

enum TlsState {
    Handshake {
        stream: TcpStream,
        acceptor: TlsAcceptor,
    },
    Established(Box<TlsStream<TcpStream>>),
    Failed,
}

impl TlsTransport {
    #[inline]
    pub fn new(stream: TcpStream, acceptor: TlsAcceptor) -> Self {
        Self {
            local: stream.local_addr().ok(),
            peer: stream.peer_addr().ok(),
            state: TlsState::Handshake { stream, acceptor },
        }
    }

    #[inline]
    fn established(&mut self) -> io::Result<&mut TlsStream<TcpStream>> {
        match &mut self.state {
            TlsState::Established(stream) => Ok(stream),
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS handshake not completed",
            )),
        }
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            TlsState::Handshake { .. } => "handshake",
            TlsState::Established(_) => "established",
            TlsState::Failed => "failed",
        };
        f.debug_struct("TlsTransport")
            .field("state", &state)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .finish()
    }
}

impl Transport for TlsTransport {
    async fn establish(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, TlsState::Failed) {
            TlsState::Handshake { stream, acceptor } => {
                let stream = acceptor.accept(stream).await?;
                self.state = TlsState::Established(Box::new(stream));
                Ok(())
            }
            state @ TlsState::Established(_) => {
                self.state = state;
                Ok(())
            }
            TlsState::Failed => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS handshake already failed",
            )),
        }
    }

    #[inline]
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.established()?.read(buf).await
    }

    #[inline]
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.established()?.write_all(buf).await
    }

    async fn half_close(&mut self) -> io::Result<()> {
        match &mut self.state {
            TlsState::Established(stream) => stream.shutdown().await,
            TlsState::Handshake { stream, .. } => stream.shutdown().await,
            TlsState::Failed => Ok(()),
        }
    }

    #[inline(always)]
    fn is_secure(&self) -> bool {
        true
    }

    #[inline]
    fn validate_host(&self, request: &Request, validator: &dyn HostValidator) -> bool {
        validate_socket_host(request, self.local, true, validator)
    }

    #[inline(always)]
    fn name(&self) -> &'static str {
        "tls_session"
    }

    fn local_endpoint(&self) -> Option<String> {
        self.local.map(|addr| addr.to_string())
    }

    fn peer(&self) -> Option<String> {
        self.peer.map(|addr| addr.to_string())
    }
}

/// Builds a [`TlsAcceptor`] from PEM files.
///
/// The certificate file may hold a full chain; the key file must hold one
/// PKCS#1, PKCS#8 or SEC1 private key.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|source| TlsError::Io {
                path: path.to_path_buf(),
                source,
            })
    };

    let certs = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// UNIX

/// Local Unix domain socket.
#[derive(Debug)]
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    #[inline]
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }
}

impl Transport for UnixTransport {
    #[inline]
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    #[inline]
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    #[inline]
    async fn half_close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    #[inline(always)]
    fn is_secure(&self) -> bool {
        false
    }

    // Filesystem permissions guard the socket
    #[inline(always)]
    fn validate_host(&self, _: &Request, _: &dyn HostValidator) -> bool {
        true
    }

    #[inline(always)]
    fn name(&self) -> &'static str {
        "unix_socket_session"
    }

    fn local_endpoint(&self) -> Option<String> {
        let addr = self.stream.local_addr().ok()?;
        addr.as_pathname().map(|path| path.display().to_string())
    }

    fn peer(&self) -> Option<String> {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::TlsError, server::host::AllowList};
    use std::io::Write;

    fn request(raw: &str) -> Request {
        crate::http::request::Parser::from(&Default::default(), 0, raw)
            .try_parse()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn socket_host_validation() {
        let local = Some(SocketAddr::from(([127, 0, 0, 1], 8888)));
        let list = AllowList::default();

        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\nHost: 127.0.0.1:8888\r\n\r\n", local, true),
            ("GET / HTTP/1.1\r\nHost: evil.com\r\n\r\n",       local, false),
            ("GET / HTTP/1.1\r\n\r\n",                         local, false),
            ("GET / HTTP/1.1\r\nHost: 127.0.0.1:8888\r\n\r\n", None,  false),
        ];

        for (raw, local, expected) in cases {
            assert_eq!(validate_socket_host(&request(raw), local, false, &list), expected, "{raw:?}");
        }

        // The validator is never consulted for an empty host
        let permissive = |_: &str, _: &str, _: bool| true;
        assert!(!validate_socket_host(&request("GET / HTTP/1.1\r\n\r\n"), local, false, &permissive));
    }

    #[tokio::test]
    async fn unix_transport_skips_host_validation() {
        let (a, _b) = UnixStream::pair().unwrap();
        let transport = UnixTransport::new(a);
        let deny = |_: &str, _: &str, _: bool| false;

        assert!(transport.validate_host(&request("GET / HTTP/1.1\r\n\r\n"), &deny));
        assert!(!transport.is_secure());
        assert_eq!(transport.name(), "unix_socket_session");
    }

    #[test]
    fn tls_loader_errors() {
        let dir = std::env::temp_dir().join(format!("flight_http_tls_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let empty = dir.join("empty.pem");
        File::create(&empty).unwrap().write_all(b"").unwrap();

        let missing = dir.join("missing.pem");
        assert!(matches!(
            load_tls_acceptor(&missing, &missing),
            Err(TlsError::Io { .. })
        ));
        assert!(matches!(
            load_tls_acceptor(&empty, &empty),
            Err(TlsError::NoCertificates(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }
}
