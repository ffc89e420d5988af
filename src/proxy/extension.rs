//! Proxy auth extension bundle
//!
//! Chrome accepts `--proxy-server` but has no flag for proxy credentials;
//! the auth challenge pops a dialog that kills automation. The workaround
//! is a tiny unpacked extension that pins the proxy via `fixed_servers`
//! and answers `onAuthRequired` with the stored credentials.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::FleetError;
use crate::lock::sanitize;

use super::ProxySpec;

const MANIFEST: &str = r#"{
    "version": "1.0.0",
    "manifest_version": 2,
    "name": "Proxy Auth Helper",
    "permissions": [
        "proxy",
        "tabs",
        "unlimitedStorage",
        "storage",
        "<all_urls>",
        "webRequest",
        "webRequestBlocking"
    ],
    "background": {
        "scripts": ["background.js"]
    },
    "minimum_chrome_version": "22.0.0"
}
"#;

/// Write (or refresh) the unpacked extension for one profile's proxy.
/// Returns the directory to pass via `--load-extension`.
pub fn write_auth_bundle(
    extensions_dir: &Path,
    profile_name: &str,
    spec: &ProxySpec,
) -> Result<PathBuf, FleetError> {
    let (user, pass) = match (&spec.user, &spec.pass) {
        (Some(u), Some(p)) => (u.as_str(), p.as_str()),
        _ => {
            return Err(FleetError::LaunchFailure(
                "auth bundle requires proxy credentials".into(),
            ))
        }
    };

    let dir = extensions_dir.join(format!("proxy_{}", sanitize(profile_name)));
    std::fs::create_dir_all(&dir)?;

    std::fs::write(dir.join("manifest.json"), MANIFEST)?;
    std::fs::write(dir.join("background.js"), background_script(spec, user, pass))?;

    debug!("[{}] proxy auth bundle at {}", profile_name, dir.display());
    Ok(dir)
}

fn background_script(spec: &ProxySpec, user: &str, pass: &str) -> String {
    format!(
        r#"var config = {{
    mode: "fixed_servers",
    rules: {{
        singleProxy: {{
            scheme: "http",
            host: "{ip}",
            port: parseInt({port})
        }},
        bypassList: ["localhost"]
    }}
}};

chrome.proxy.settings.set({{ value: config, scope: "regular" }}, function() {{}});

function callbackFn(details) {{
    return {{
        authCredentials: {{
            username: "{user}",
            password: "{pass}"
        }}
    }};
}}

chrome.webRequest.onAuthRequired.addListener(
    callbackFn,
    {{ urls: ["<all_urls>"] }},
    ["blocking"]
);
"#,
        ip = spec.ip,
        port = spec.port,
        user = js_escape(user),
        pass = js_escape(pass),
    )
}

/// Make a credential safe inside a double-quoted JS string literal.
/// Backslashes must go first or the quote escape gets re-escaped.
fn js_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
