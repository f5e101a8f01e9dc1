//! Transport configuration.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

const DEFAULT_USER_AGENT: &str = concat!("quiver-engine/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the bundled HTTP transport.
///
/// There is deliberately no per-attempt timeout here: that comes from the
/// request's retry policy on every attempt. Redirect following is likewise
/// not configurable, since the engine records and follows redirects itself.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed to establish the initial connection.
    pub connect_timeout: Duration,

    /// User agent string.
    pub user_agent: String,

    /// Headers sent on every request.
    pub headers: HeaderMap,

    /// Whether to honor system proxy settings.
    pub use_system_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: TransportConfig::default_headers(),
            use_system_proxy: true,
        }
    }
}

impl TransportConfig {
    pub fn builder() -> crate::builder::TransportConfigBuilder {
        crate::builder::TransportConfigBuilder::new()
    }

    pub fn default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}
