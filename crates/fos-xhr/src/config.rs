//! Fetch Configuration
//!
//! Defaults applied to every request a `Fetcher` dispatches.

use serde::{Deserialize, Serialize};

/// Default user agent string
pub const DEFAULT_USER_AGENT: &str = "fOS-Engine/0.1";

/// Maximum number of redirects followed before failing
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Fetch pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent for requests that don't carry their own
    pub user_agent: String,
    /// Value of the injected `Accept-Language` header
    pub accept_language: String,
    /// Value of the injected `Accept-Encoding` header
    pub accept_encoding: String,
    /// Max redirects to follow; the next one is a redirect loop
    pub max_redirects: u32,
    /// Verify TLS certificates
    pub strict_tls: bool,
    /// Proxy URL used when a request has none
    pub proxy: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.into(),
            accept_language: "en".into(),
            accept_encoding: "gzip,deflate".into(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            strict_tls: true,
            proxy: None,
        }
    }
}

impl FetchConfig {
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }
}

/// Fetch configuration builder
#[derive(Debug, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: &str) -> Self {
        self.config.user_agent = ua.to_string();
        self
    }

    pub fn accept_language(mut self, language: &str) -> Self {
        self.config.accept_language = language.to_string();
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    pub fn strict_tls(mut self, strict: bool) -> Self {
        self.config.strict_tls = strict;
        self
    }

    pub fn proxy(mut self, proxy: &str) -> Self {
        self.config.proxy = Some(proxy.to_string());
        self
    }

    pub fn build(self) -> FetchConfig {
        self.config
    }
}
