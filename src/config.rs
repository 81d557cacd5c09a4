//! Server and client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "/";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Path of the single endpoint serving both stream halves.
    pub endpoint: String,
    /// Answer POSTs whose client id has no open GET session with 404 instead
    /// of treating them as send-only clients.
    pub reject_orphan_posts: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { endpoint: DEFAULT_ENDPOINT.to_owned(), reject_orphan_posts: false }
    }
}

impl ServerConfig {
    /// Build server config from environment variables.
    ///
    /// Optional:
    /// - `BIHTTP_ENDPOINT`: default `/`
    /// - `BIHTTP_REJECT_ORPHAN_POSTS`: `true`/`1` to enable, default off
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let endpoint = lookup("BIHTTP_ENDPOINT")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| DEFAULT_ENDPOINT.to_owned(), |v| normalize_endpoint(&v));
        let reject_orphan_posts = lookup("BIHTTP_REJECT_ORPHAN_POSTS").is_some_and(|v| parse_flag(&v));

        Self { endpoint, reject_orphan_posts }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// TCP connect timeout for both streams. No total request timeout is
    /// applied; both streams stay open for the whole session.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS) }
    }
}

impl ClientConfig {
    /// Build client config from environment variables.
    ///
    /// Optional:
    /// - `BIHTTP_CONNECT_TIMEOUT_SECS`: default 10
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = lookup("BIHTTP_CONNECT_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Self { connect_timeout: Duration::from_secs(secs) }
    }
}

fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('/') { trimmed.to_owned() } else { format!("/{trimmed}") }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
