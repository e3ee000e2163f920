//! Declarative proxy configuration and per-request proxy resolution.
//!
//! A [`ProxyConfig`] names at most one proxy per target scheme plus an
//! exclusion list. [`ProxyConfig::resolver`] turns it into a
//! [`ProxyResolver`], a pure function from a request's target URL to the
//! proxy URL (credentials embedded as userinfo) that should carry it.
//!
//! ```
//! use vaultlink::proxy::{ProxyConfig, ProxyServerConfig};
//! use url::Url;
//!
//! let config = ProxyConfig {
//!     https: Some(ProxyServerConfig::new("http://proxy.internal:3128")),
//!     no_proxy: vec![".svc.cluster.local".to_string()],
//!     ..Default::default()
//! };
//! let resolver = config.resolver()?;
//!
//! let target = Url::parse("https://kv.vault.azure.net/secrets/x")?;
//! assert_eq!(resolver.resolve(&target).unwrap().as_str(), "http://proxy.internal:3128/");
//!
//! let internal = Url::parse("https://api.default.svc.cluster.local/")?;
//! assert!(resolver.resolve(&internal).is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::ConfigSource;
use crate::secret::SecretString;
use crate::{Result, VaultlinkError};
use serde::Deserialize;
use std::net::IpAddr;
use url::{Host, Url};

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// One proxy server with optional credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyServerConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`
    pub url: String,
    /// Username embedded as userinfo
    pub username: String,
    /// Password embedded as userinfo
    pub password: SecretString,
}

impl ProxyServerConfig {
    /// Creates a proxy server entry without credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Checks that the URL parses with a supported scheme and that a
    /// password is never given without a username.
    pub fn validate(&self) -> Result<()> {
        self.proxy_url().map(|_| ())
    }

    /// Parses the URL and embeds the credentials as userinfo.
    fn proxy_url(&self) -> Result<Url> {
        if self.url.is_empty() {
            return Err(VaultlinkError::config("proxy url is not set"));
        }

        let mut url = Url::parse(&self.url).map_err(|e| {
            VaultlinkError::config(format!("failed to parse proxy url {:?}: {}", self.url, e))
        })?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(VaultlinkError::config(format!(
                "unsupported proxy scheme {:?} (expected one of {})",
                url.scheme(),
                SUPPORTED_SCHEMES.join(", ")
            )));
        }

        if self.username.is_empty() && !self.password.is_empty() {
            return Err(VaultlinkError::config(
                "proxy password is set without a username",
            ));
        }

        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| VaultlinkError::config("proxy url cannot carry credentials"))?;
            if !self.password.is_empty() {
                url.set_password(Some(self.password.expose()))
                    .map_err(|_| VaultlinkError::config("proxy url cannot carry credentials"))?;
            }
        }

        Ok(url)
    }
}

/// Per-scheme proxy servers and an exclusion list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy for `http://` targets
    pub http: Option<ProxyServerConfig>,
    /// Proxy for `https://` targets
    pub https: Option<ProxyServerConfig>,
    /// Hosts, domains, IPs or CIDR blocks that bypass the proxy
    #[serde(rename = "noProxy")]
    pub no_proxy: Vec<String>,
}

impl ProxyConfig {
    /// Reads proxy settings from `<prefix>HTTP_PROXY_URL`,
    /// `<prefix>HTTP_PROXY_USERNAME`, `<prefix>HTTP_PROXY_PASSWORD`, the
    /// same three for `HTTPS`, and a comma-separated `<prefix>NO_PROXY`.
    ///
    /// Returns `None` when none of these variables is set.
    pub fn from_source(source: &dyn ConfigSource, prefix: &str) -> Option<Self> {
        let server = |scheme: &str| {
            let url = source.get(&format!("{prefix}{scheme}_PROXY_URL"));
            let username = source.get(&format!("{prefix}{scheme}_PROXY_USERNAME"));
            let password = source.get(&format!("{prefix}{scheme}_PROXY_PASSWORD"));
            if url.is_none() && username.is_none() && password.is_none() {
                return None;
            }
            Some(ProxyServerConfig {
                url: url.unwrap_or_default(),
                username: username.unwrap_or_default(),
                password: password.unwrap_or_default().into(),
            })
        };

        let http = server("HTTP");
        let https = server("HTTPS");
        let no_proxy: Vec<String> = source
            .get(&format!("{prefix}NO_PROXY"))
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if http.is_none() && https.is_none() && no_proxy.is_empty() {
            return None;
        }

        Some(Self {
            http,
            https,
            no_proxy,
        })
    }

    /// Validates each declared proxy server.
    pub fn validate(&self) -> Result<()> {
        if let Some(http) = &self.http {
            http.validate().map_err(|e| e.context("http"))?;
        }
        if let Some(https) = &self.https {
            https.validate().map_err(|e| e.context("https"))?;
        }
        Ok(())
    }

    /// Builds the per-request resolver.
    ///
    /// # Errors
    ///
    /// A malformed URL for either scheme is a configuration error; no
    /// scheme is skipped silently.
    pub fn resolver(&self) -> Result<ProxyResolver> {
        let http = self
            .http
            .as_ref()
            .map(|s| s.proxy_url().map_err(|e| e.context("http")))
            .transpose()?;
        let https = self
            .https
            .as_ref()
            .map(|s| s.proxy_url().map_err(|e| e.context("https")))
            .transpose()?;

        Ok(ProxyResolver {
            http,
            https,
            no_proxy: NoProxy::parse(&self.no_proxy.join(",")),
        })
    }
}

/// Chooses the proxy for an outgoing request. Performs no I/O.
#[derive(Debug, Clone)]
pub struct ProxyResolver {
    http: Option<Url>,
    https: Option<Url>,
    no_proxy: NoProxy,
}

impl ProxyResolver {
    /// Returns the proxy URL for `target`, or `None` to connect directly.
    pub fn resolve(&self, target: &Url) -> Option<Url> {
        let proxy = match target.scheme() {
            "http" => self.http.as_ref(),
            "https" => self.https.as_ref(),
            _ => None,
        }?;

        let host = target.host()?;
        let port = target.port_or_known_default();
        if is_loopback(&host) || self.no_proxy.matches(&host, port) {
            return None;
        }

        Some(proxy.clone())
    }
}

fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxyRule {
    Ip { addr: IpAddr, port: Option<u16> },
    Cidr { network: IpAddr, prefix: u8 },
    Domain {
        name: String,
        subdomains_only: bool,
        port: Option<u16>,
    },
}

#[derive(Debug, Clone, Default)]
struct NoProxy {
    all: bool,
    rules: Vec<NoProxyRule>,
}

impl NoProxy {
    fn parse(list: &str) -> Self {
        let mut no_proxy = Self::default();

        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let entry = entry.to_ascii_lowercase();
            if entry == "*" {
                no_proxy.all = true;
                continue;
            }
            if let Some(rule) = parse_rule(&entry) {
                no_proxy.rules.push(rule);
            }
        }

        no_proxy
    }

    fn matches(&self, host: &Host<&str>, port: Option<u16>) -> bool {
        if self.all {
            return true;
        }

        let ip = match host {
            Host::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Host::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Host::Domain(_) => None,
        };

        self.rules.iter().any(|rule| match (rule, host) {
            (NoProxyRule::Ip { addr, port: p }, _) => {
                ip == Some(*addr) && (p.is_none() || *p == port)
            }
            (NoProxyRule::Cidr { network, prefix }, _) => {
                ip.is_some_and(|ip| cidr_contains(*network, *prefix, ip))
            }
            (
                NoProxyRule::Domain {
                    name,
                    subdomains_only,
                    port: p,
                },
                Host::Domain(domain),
            ) => {
                if p.is_some() && *p != port {
                    return false;
                }
                let domain = domain.to_ascii_lowercase();
                let is_subdomain = domain
                    .strip_suffix(name.as_str())
                    .is_some_and(|rest| rest.ends_with('.'));
                is_subdomain || (!subdomains_only && domain == *name)
            }
            _ => false,
        })
    }
}

fn parse_rule(entry: &str) -> Option<NoProxyRule> {
    if let Some((addr, prefix)) = entry.split_once('/') {
        let network: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        return (prefix <= max).then_some(NoProxyRule::Cidr { network, prefix });
    }

    if let Ok(addr) = entry.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Some(NoProxyRule::Ip { addr, port: None });
    }

    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port.parse::<u16>().ok()?)),
        None => (entry, None),
    };

    if let Ok(addr) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Some(NoProxyRule::Ip { addr, port });
    }

    let host = host.strip_prefix('*').unwrap_or(host);
    let (name, subdomains_only) = match host.strip_prefix('.') {
        Some(name) => (name, true),
        None => (host, false),
    };
    if name.is_empty() {
        return None;
    }

    Some(NoProxyRule::Domain {
        name: name.to_string(),
        subdomains_only,
        port,
    })
}

fn cidr_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}
