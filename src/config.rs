//! TOML configuration file.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults in [`limits`](crate::limits).
//!
//! ```toml
//! [listen]
//! address = "127.0.0.1:8888"
//! unix_socket = "/tmp/flight_http.sock"
//! backlog = 1024
//!
//! [limits]
//! max_body_size = 1048576
//! max_bytes_in_flight = 524288000
//! max_requests_in_flight = -1
//!
//! [connection]
//! keep_alive = true
//! read_timeout_ms = 30000
//!
//! [cors]
//! allow_origin = "*"
//!
//! [hosts]
//! validate_host = true
//! valid_hosts = ["localhost:8888"]
//! ```

use crate::{
    limits::{ConnLimits, Cors, ReqLimits, ServerLimits},
    server::{host::AllowList, state::SharedStateBuilder},
    SharedState,
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads and parses a TOML configuration file.
pub fn load_config(path: &Path) -> Result<HttpConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    HttpConfig::from_toml(&content)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub listen: ListenConfig,
    pub limits: LimitsConfig,
    pub connection: ConnectionConfig,
    pub cors: CorsConfig,
    pub hosts: HostsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    pub address: Option<String>,
    pub unix_socket: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub backlog: i32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: None,
            unix_socket: None,
            tls_cert: None,
            tls_key: None,
            backlog: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_body_size: usize,
    pub max_bytes_in_flight: u64,
    pub max_requests_in_flight: i64,
    pub header_block_size: usize,
    pub header_count: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let server = ServerLimits::default();
        let request = ReqLimits::default();
        Self {
            max_body_size: server.max_body_size,
            max_bytes_in_flight: server.max_bytes_in_flight,
            max_requests_in_flight: server.max_requests_in_flight,
            header_block_size: request.header_block_size,
            header_count: request.header_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub keep_alive: bool,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            read_timeout_ms: None,
            write_timeout_ms: None,
            handshake_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allow_origin: String,
    pub allow_headers: String,
    pub max_age: String,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostsConfig {
    pub validate_host: bool,
    pub valid_hosts: Vec<String>,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            validate_host: true,
            valid_hosts: Vec::new(),
        }
    }
}

impl HttpConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn server_limits(&self) -> ServerLimits {
        ServerLimits {
            max_body_size: self.limits.max_body_size,
            max_bytes_in_flight: self.limits.max_bytes_in_flight,
            max_requests_in_flight: self.limits.max_requests_in_flight,
        }
    }

    pub fn connection_limits(&self) -> ConnLimits {
        let millis = |ms: Option<u64>| ms.map(Duration::from_millis);
        ConnLimits {
            keep_alive: self.connection.keep_alive,
            read_timeout: millis(self.connection.read_timeout_ms),
            write_timeout: millis(self.connection.write_timeout_ms),
            handshake_timeout: millis(self.connection.handshake_timeout_ms),
        }
    }

    pub fn request_limits(&self) -> ReqLimits {
        ReqLimits {
            header_block_size: self.limits.header_block_size,
            header_count: self.limits.header_count,
            ..ReqLimits::default()
        }
    }

    pub fn cors(&self) -> Cors {
        Cors {
            allow_origin: self.cors.allow_origin.clone(),
            allow_headers: self.cors.allow_headers.clone(),
            max_age: self.cors.max_age.clone(),
            allow_credentials: self.cors.allow_credentials,
        }
    }

    pub fn allow_list(&self) -> AllowList {
        match self.hosts.validate_host {
            true => AllowList::new(&self.hosts.valid_hosts),
            false => AllowList::disabled(),
        }
    }

    /// A [`SharedState`] builder carrying every configured value; handlers
    /// are registered on the result.
    pub fn state_builder(&self) -> SharedStateBuilder {
        SharedState::builder()
            .server_limits(self.server_limits())
            .connection_limits(self.connection_limits())
            .request_limits(self.request_limits())
            .cors(self.cors())
            .host_validator(self.allow_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::host::HostValidator;

    #[test]
    fn empty_file_uses_defaults() {
        let config = HttpConfig::from_toml("").unwrap();

        assert_eq!(config.server_limits().max_body_size, 2 * 1024 * 1024);
        assert_eq!(config.server_limits().max_requests_in_flight, -1);
        assert!(config.connection_limits().keep_alive);
        assert!(config.connection_limits().read_timeout.is_none());
        assert_eq!(config.listen.backlog, 1024);
        assert!(config.allow_list().is_enabled());
        assert_eq!(config.cors().headers().count(), 0);
    }

    #[test]
    fn full_file() {
        let config = HttpConfig::from_toml(
            r#"
            [listen]
            address = "0.0.0.0:8888"
            backlog = 64

            [limits]
            max_bytes_in_flight = 1000
            max_requests_in_flight = 10

            [connection]
            keep_alive = false
            read_timeout_ms = 1500

            [cors]
            allow_origin = "*"
            allow_credentials = true

            [hosts]
            valid_hosts = ["api.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.address.as_deref(), Some("0.0.0.0:8888"));
        assert_eq!(config.listen.backlog, 64);
        assert_eq!(config.server_limits().max_bytes_in_flight, 1000);
        assert_eq!(config.server_limits().max_requests_in_flight, 10);

        let conn = config.connection_limits();
        assert!(!conn.keep_alive);
        assert_eq!(conn.read_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(conn.write_timeout, None);

        assert_eq!(config.cors().headers().count(), 2);
        assert!(config
            .allow_list()
            .validate_host("api.example.com", "10.0.0.1:8888", false));
    }

    #[test]
    fn invalid_files() {
        #[rustfmt::skip]
        let cases = [
            "[limits]\nmax_body_size = \"big\"",
            "[unknown]\nkey = 1",
            "[hosts]\nvalidate = true",
            "not toml at all",
        ];

        for input in cases {
            assert!(matches!(HttpConfig::from_toml(input), Err(ConfigError::Parse(_))), "{input}");
        }
    }

    #[test]
    fn host_validation_can_be_disabled() {
        let config = HttpConfig::from_toml("[hosts]\nvalidate_host = false").unwrap();
        assert!(config.allow_list().validate_host("anything", "127.0.0.1:1", false));
    }

    #[test]
    fn missing_file() {
        let err = load_config(Path::new("/nonexistent/flight_http.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
