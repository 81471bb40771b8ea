//! `Host` header validation.

use std::collections::HashSet;

/// Decides whether a request's `Host` header is acceptable.
///
/// `local_endpoint` is the socket's local address formatted as
/// `address:port` (`[addr]:port` for IPv6). Unix-socket sessions never
/// consult the validator.
pub trait HostValidator: Send + Sync + 'static {
    fn validate_host(&self, host: &str, local_endpoint: &str, is_secure: bool) -> bool;
}

impl<F> HostValidator for F
where
    F: Fn(&str, &str, bool) -> bool + Send + Sync + 'static,
{
    #[inline]
    fn validate_host(&self, host: &str, local_endpoint: &str, is_secure: bool) -> bool {
        self(host, local_endpoint, is_secure)
    }
}

/// Allow-list validator.
///
/// A host is accepted when, after adding the scheme's default port
/// (`80` or `443`) if it carries none, it equals the local endpoint or one
/// of the configured hosts. Comparison is case-insensitive.
#[derive(Debug, Clone)]
pub struct AllowList {
    enabled: bool,
    hosts: Vec<String>,
}

impl Default for AllowList {
    /// Validation enabled, only the local endpoint is accepted.
    fn default() -> Self {
        Self {
            enabled: true,
            hosts: Vec::new(),
        }
    }
}

impl AllowList {
    /// Accepts every host.
    #[inline]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
        }
    }

    /// Validation enabled with extra accepted hosts. Entries without a port
    /// are matched against both default ports.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty() && seen.insert(h.clone()))
            .collect();

        Self {
            enabled: true,
            hosts,
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl HostValidator for AllowList {
    fn validate_host(&self, host: &str, local_endpoint: &str, is_secure: bool) -> bool {
        if !self.enabled {
            return true;
        }
        if host.is_empty() {
            return false;
        }

        let default_port = if is_secure { "443" } else { "80" };
        let host = normalize(host, default_port);

        host == local_endpoint.to_ascii_lowercase()
            || self.hosts.iter().any(|h| normalize(h, default_port) == host)
    }
}

// Lowercased `host:port`, with the default port added when missing
fn normalize(host: &str, default_port: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match has_port(&host) {
        true => host,
        false => format!("{host}:{default_port}"),
    }
}

#[inline]
fn has_port(host: &str) -> bool {
    match host.rfind(']') {
        Some(bracket) => host[bracket..].starts_with("]:"),
        None => host.contains(':'),
    }
}
