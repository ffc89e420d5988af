//! Proxy health check against an IP-echo endpoint.

use std::time::Duration;

use tracing::debug;

use super::ProxySpec;

const ECHO_ENDPOINT: &str = "http://ip-api.com/json";

/// Issue one request through the candidate proxy. Healthy means any 2xx
/// response within the timeout; everything else (connect error, auth
/// rejection, timeout) is unhealthy.
pub async fn health_check(spec: &ProxySpec, timeout: Duration) -> bool {
    let mut proxy = match reqwest::Proxy::all(format!("http://{}", spec.address())) {
        Ok(p) => p,
        Err(e) => {
            debug!("proxy {} rejected by client: {}", spec, e);
            return false;
        }
    };
    if let (Some(user), Some(pass)) = (&spec.user, &spec.pass) {
        proxy = proxy.basic_auth(user, pass);
    }

    let client = match reqwest::Client::builder().proxy(proxy).timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => {
            debug!("could not build client for proxy {}: {}", spec, e);
            return false;
        }
    };

    match client.get(ECHO_ENDPOINT).send().await {
        Ok(resp) => {
            let ok = resp.status().is_success();
            debug!("proxy {} health check: {}", spec, resp.status());
            ok
        }
        Err(e) => {
            debug!("proxy {} health check failed: {}", spec, e);
            false
        }
    }
}
