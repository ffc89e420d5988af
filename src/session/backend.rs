//! Browser backend contract
//!
//! The core needs exactly four things from a browser-automation driver:
//! start with a launch configuration, report the OS process id, terminate,
//! and take a screenshot. Everything DOM-level belongs to caller logic and
//! never crosses this boundary.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::FleetError;
use crate::matrix::WindowRect;
use crate::proxy::ProxyChoice;

/// Everything the backend needs to start one browser.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub profile_name: String,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub disable_gpu: bool,
    pub proxy: ProxyChoice,
    /// Unpacked extension directories beyond any proxy bundle.
    pub extensions: Vec<PathBuf>,
    pub window: WindowRect,
}

impl LaunchSpec {
    /// Render the spec as Chromium command-line flags.
    pub fn chrome_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--user-data-dir={}", self.user_data_dir.display()),
            format!("--window-position={},{}", self.window.x, self.window.y),
            format!("--window-size={},{}", self.window.width, self.window.height),
            format!("--force-device-scale-factor={}", self.window.scale),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-session-crashed-bubble".to_string(),
            "--disable-infobars".to_string(),
        ];

        if self.headless {
            args.push("--headless=new".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }

        let mut extensions: Vec<&PathBuf> = self.extensions.iter().collect();
        match &self.proxy {
            ProxyChoice::Direct => {}
            ProxyChoice::Flag(server) => args.push(format!("--proxy-server={server}")),
            ProxyChoice::Bundle(dir) => extensions.push(dir),
        }
        if !extensions.is_empty() {
            let joined = extensions
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(",");
            args.push(format!("--load-extension={joined}"));
        }

        args
    }
}

/// Handle to one running browser session.
#[async_trait]
pub trait BrowserHandle: Send {
    /// OS process id of the launched controller process, when known.
    fn driver_pid(&self) -> Option<u32>;

    /// Ask the browser to shut down gracefully.
    async fn terminate(&mut self) -> Result<(), FleetError>;

    /// Capture the current visible state as PNG bytes.
    async fn screenshot(&mut self) -> Result<Vec<u8>, FleetError>;
}

/// Starts browser sessions. One implementation per driver stack.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserHandle>, FleetError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{ScreenSize, WindowRect};

    fn base_spec() -> LaunchSpec {
        LaunchSpec {
            profile_name: "alpha".into(),
            user_data_dir: "/tmp/profiles/alpha".into(),
            headless: false,
            disable_gpu: false,
            proxy: ProxyChoice::Direct,
            extensions: Vec::new(),
            window: WindowRect::fullscreen(ScreenSize::default()),
        }
    }

    #[test]
    fn args_include_geometry() {
        let args = base_spec().chrome_args();
        assert!(args.contains(&"--window-position=0,0".to_string()));
        assert!(args.contains(&"--window-size=1920,1080".to_string()));
        assert!(args.contains(&"--force-device-scale-factor=1".to_string()));
    }

    #[test]
    fn proxy_flag_and_bundle_render_differently() {
        let mut spec = base_spec();
        spec.proxy = ProxyChoice::Flag("http://1.2.3.4:8080".into());
        assert!(spec
            .chrome_args()
            .contains(&"--proxy-server=http://1.2.3.4:8080".to_string()));

        spec.proxy = ProxyChoice::Bundle("/tmp/ext/proxy_alpha".into());
        let args = spec.chrome_args();
        assert!(args.iter().any(|a| a.starts_with("--load-extension=") && a.contains("proxy_alpha")));
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server=")));
    }

    #[test]
    fn headless_uses_new_mode() {
        let mut spec = base_spec();
        spec.headless = true;
        assert!(spec.chrome_args().contains(&"--headless=new".to_string()));
    }
}
