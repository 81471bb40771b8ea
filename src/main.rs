//! Development server exposing `/v1/chain/info`.

use clap::Parser;
use flight_http::{
    bind_tcp, bind_unix, config::load_config, config::HttpConfig, load_tls_acceptor, Responder,
    Server, SessionHandle,
};
use std::{net::SocketAddr, path::PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "flight_http", version, about = "HTTP session layer development server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP address to listen on (overrides the configuration file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Unix socket path to listen on (overrides the configuration file)
    #[arg(long)]
    unix: Option<PathBuf>,

    /// PEM certificate chain; enables TLS on the TCP listener
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

fn chain_info(session: SessionHandle, _: String, _: Vec<u8>, resp: Responder) {
    let body = format!(
        r#"{{"server_version":"{}","transport":"{}","session":{}}}"#,
        env!("CARGO_PKG_VERSION"),
        session.transport_name(),
        session.id().as_u64(),
    );
    resp.respond(Some(body), 200);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HttpConfig::default(),
    };

    let state = config
        .state_builder()
        .handler("/v1/chain/info", chain_info)
        .build();

    tracing::info!(
        max_bytes_in_flight = state.server_limits().max_bytes_in_flight,
        max_requests_in_flight = state.server_limits().max_requests_in_flight,
        keep_alive = state.connection_limits().keep_alive,
        "configuration loaded"
    );

    let mut server = Server::builder(state);

    let address = match (cli.listen, &config.listen.address) {
        (Some(addr), _) => Some(addr),
        (None, Some(addr)) => Some(addr.parse()?),
        (None, None) => None,
    };
    let tls_cert = cli.tls_cert.or(config.listen.tls_cert);
    let tls_key = cli.tls_key.or(config.listen.tls_key);
    let unix = cli.unix.or(config.listen.unix_socket);

    let address = match (address, &unix) {
        (None, None) => Some(SocketAddr::from(([127, 0, 0, 1], 8888))),
        (address, _) => address,
    };

    if let Some(addr) = address {
        let listener = bind_tcp(addr, config.listen.backlog)?;
        server = match (tls_cert, tls_key) {
            (Some(cert), Some(key)) => {
                server.tls_listener(listener, load_tls_acceptor(&cert, &key)?)
            }
            _ => server.listener(listener),
        };
    }
    if let Some(path) = unix {
        server = server.unix_listener(bind_unix(&path)?);
    }

    server.build().launch().await;
    Ok(())
}
