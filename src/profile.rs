//! Browser profile records
//!
//! A profile is a named, isolated browser identity with its own persistent
//! user-data directory. Profiles are supplied by an external loader and are
//! immutable for the duration of a run.

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Unique profile name. Doubles as the user-data directory name after
    /// sanitization.
    pub name: String,
    /// Optional per-profile proxy string in one of the supported layouts
    /// (`ip:port`, `ip:port@user:pass`, `user:pass@ip:port`).
    #[serde(default)]
    pub proxy_info: Option<String>,
    /// Arbitrary extra fields the caller's automation logic may consume
    /// (credentials, seed phrases, whatever the loader provides).
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy_info: None,
            extra: Vec::new(),
        }
    }

    pub fn with_proxy(mut self, proxy_info: impl Into<String>) -> Self {
        self.proxy_info = Some(proxy_info.into());
        self
    }

    /// Generate `count` numbered profiles ("1", "2", ...) for demos and tests.
    pub fn numbered(count: usize) -> Vec<Profile> {
        (1..=count).map(|i| Profile::new(i.to_string())).collect()
    }
}
