//! Proxy parsing, validation and per-session resolution
//!
//! Proxies arrive as loosely formatted strings from profile data. This
//! module turns them into structured specs, health-checks them against an
//! IP-echo endpoint, and packages credentialed proxies into a browser
//! extension bundle (Chrome has no command-line flag for proxy auth).

mod checker;
mod extension;

pub use checker::health_check;
pub use extension::write_auth_bundle;

use std::path::PathBuf;
use std::time::Duration;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::error::FleetError;

/// A parsed proxy endpoint, optionally with credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub ip: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl ProxySpec {
    /// Parse one of three fixed layouts, first match wins:
    /// `user:pass@ip:port`, `ip:port@user:pass`, bare `ip:port`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match text.split_once('@') {
            Some((left, right)) => {
                // user:pass@ip:port
                if let (Some((user, pass)), Some((ip, port))) =
                    (split_credentials(left), split_address(right))
                {
                    return Some(Self {
                        ip,
                        port,
                        user: Some(user),
                        pass: Some(pass),
                    });
                }
                // ip:port@user:pass
                if let (Some((ip, port)), Some((user, pass))) =
                    (split_address(left), split_credentials(right))
                {
                    return Some(Self {
                        ip,
                        port,
                        user: Some(user),
                        pass: Some(pass),
                    });
                }
                None
            }
            None => {
                let (ip, port) = split_address(text)?;
                Some(Self { ip, port, user: None, pass: None })
            }
        }
    }

    /// `ip:port` form used in browser flags and reqwest URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn has_auth(&self) -> bool {
        self.user.is_some() && self.pass.is_some()
    }
}

impl std::fmt::Display for ProxySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials.
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// `ip:port` where ip is digits-and-dots and port is a valid u16.
fn split_address(text: &str) -> Option<(String, u16)> {
    let (ip, port) = text.split_once(':')?;
    if ip.is_empty() || !ip.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((ip.to_string(), port))
}

/// `user:pass` where neither side contains a separator character.
fn split_credentials(text: &str) -> Option<(String, String)> {
    let (user, pass) = text.split_once(':')?;
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    if user.contains('@') || pass.contains('@') || pass.contains(':') {
        return None;
    }
    // A digits-and-dots "user" is an address, not a credential.
    if user.chars().all(|c| c.is_ascii_digit() || c == '.') && pass.parse::<u16>().is_ok() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}

/// How a resolved proxy is handed to the browser launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyChoice {
    /// No proxy configured for this session.
    Direct,
    /// Plain endpoint, expressed as a `--proxy-server` flag value.
    Flag(String),
    /// Credentialed proxy packaged as an unpacked extension directory.
    Bundle(PathBuf),
}

/// Resolves the proxy to use for each session launch.
///
/// Holds an optional shared pool of fallback proxies (validated once at
/// init) and a cache of health-check outcomes keyed by the raw proxy
/// string, so repeated launches of the same profile do not re-probe.
#[derive(Debug)]
pub struct ProxyResolver {
    shared: Vec<ProxySpec>,
    cache: DashMap<String, bool>,
    timeout: Duration,
    extensions_dir: PathBuf,
}

impl ProxyResolver {
    /// Validate the shared pool and keep only proxies that parse and pass
    /// the health check. A completely unusable pool is not an error; it
    /// just means there is no fallback tier.
    pub async fn init(
        shared_pool: &[String],
        timeout: Duration,
        extensions_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut shared = Vec::new();
        for raw in shared_pool {
            let Some(spec) = ProxySpec::parse(raw) else {
                warn!("shared proxy {:?} does not parse, dropping", raw);
                continue;
            };
            if health_check(&spec, timeout).await {
                shared.push(spec);
            } else {
                warn!("shared proxy {} failed health check, dropping", spec);
            }
        }
        info!("proxy resolver ready with {} shared fallback proxies", shared.len());
        Self {
            shared,
            cache: DashMap::new(),
            timeout,
            extensions_dir: extensions_dir.into(),
        }
    }

    /// Resolver with no fallback pool, for direct-only runs and tests.
    pub fn direct_only(extensions_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Vec::new(),
            cache: DashMap::new(),
            timeout: Duration::from_secs(5),
            extensions_dir: extensions_dir.into(),
        }
    }

    /// Resolve the proxy for one session.
    ///
    /// Ladder: per-profile proxy if it parses and health-checks; otherwise
    /// a random validated shared proxy; otherwise no proxy. Proxy trouble
    /// never fails a launch.
    pub async fn resolve(
        &self,
        profile_name: &str,
        proxy_info: Option<&str>,
    ) -> Result<ProxyChoice, FleetError> {
        if let Some(raw) = proxy_info {
            match ProxySpec::parse(raw) {
                Some(spec) => {
                    if self.check_cached(raw, &spec).await {
                        return self.package(profile_name, &spec);
                    }
                    warn!("[{}] proxy {} failed health check", profile_name, spec);
                }
                None => warn!("[{}] proxy string {:?} does not parse", profile_name, raw),
            }
        }

        if let Some(spec) = self.shared.choose(&mut rand::thread_rng()) {
            info!("[{}] using fallback proxy {}", profile_name, spec);
            return self.package(profile_name, spec);
        }

        if proxy_info.is_some() {
            warn!("[{}] continuing unproxied", profile_name);
        }
        Ok(ProxyChoice::Direct)
    }

    async fn check_cached(&self, raw: &str, spec: &ProxySpec) -> bool {
        if let Some(cached) = self.cache.get(raw) {
            return *cached;
        }
        let ok = health_check(spec, self.timeout).await;
        self.cache.insert(raw.to_string(), ok);
        ok
    }

    fn package(&self, profile_name: &str, spec: &ProxySpec) -> Result<ProxyChoice, FleetError> {
        if spec.has_auth() {
            let dir = write_auth_bundle(&self.extensions_dir, profile_name, spec)?;
            Ok(ProxyChoice::Bundle(dir))
        } else {
            Ok(ProxyChoice::Flag(format!("http://{}", spec.address())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_address() {
        let spec = ProxySpec::parse("1.2.3.4:8080").unwrap();
        assert_eq!(spec.ip, "1.2.3.4");
        assert_eq!(spec.port, 8080);
        assert_eq!(spec.user, None);
        assert_eq!(spec.pass, None);
    }

    #[test]
    fn parses_credentials_first() {
        let spec = ProxySpec::parse("u:p@1.2.3.4:8080").unwrap();
        assert_eq!(spec.address(), "1.2.3.4:8080");
        assert_eq!(spec.user.as_deref(), Some("u"));
        assert_eq!(spec.pass.as_deref(), Some("p"));
    }

    #[test]
    fn parses_address_first() {
        let spec = ProxySpec::parse("1.2.3.4:8080@u:p").unwrap();
        assert_eq!(spec.address(), "1.2.3.4:8080");
        assert_eq!(spec.user.as_deref(), Some("u"));
        assert_eq!(spec.pass.as_deref(), Some("p"));
        assert!(spec.has_auth());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "hello", "1.2.3.4", "1.2.3.4:notaport", "u:p@v:q@1.2.3.4:80", "host.example:80"] {
            assert_eq!(ProxySpec::parse(bad), None, "{bad:?} should not parse");
        }
    }

    #[test]
    fn display_hides_credentials() {
        let spec = ProxySpec::parse("u:secret@1.2.3.4:8080").unwrap();
        assert_eq!(spec.to_string(), "1.2.3.4:8080");
    }

    #[tokio::test]
    async fn unparseable_proxy_falls_back_to_direct() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProxyResolver::direct_only(dir.path());
        let choice = resolver.resolve("alpha", Some("not-a-proxy")).await.unwrap();
        assert_eq!(choice, ProxyChoice::Direct);
    }

    #[tokio::test]
    async fn no_proxy_info_is_direct() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProxyResolver::direct_only(dir.path());
        assert_eq!(resolver.resolve("alpha", None).await.unwrap(), ProxyChoice::Direct);
    }
}
