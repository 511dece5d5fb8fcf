use std::path::PathBuf;
use std::time::Duration;

use crate::upstream::{DEFAULT_ENDPOINT, DEFAULT_PAGE_SIZE, MAX_PAGES};

pub const TIMEOUT_SECS_DEFAULT: u64 = 30;

/// Environment variables searched, in order, for a server-side API token.
pub const TOKEN_VARS: [&str; 3] = ["ISSUEMAP_API_KEY", "ANOTHER_LINEAR_API_KEY", "LINEAR_API_KEY"];

/// A token the server holds on behalf of its clients.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    /// Where the token came from, reported by `/api/token-status`.
    pub source: &'static str,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub upstream_url: String,
    pub token: Option<CachedToken>,
    pub page_size: usize,
    pub max_pages: usize,
    pub timeout: Duration,
    pub web_dist: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AppConfig {
    /// Builds the configuration from any key/value source; `Default` reads
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let token = TOKEN_VARS.iter().find_map(|key| {
            non_empty(key).map(|value| CachedToken {
                value: value.trim().to_string(),
                source: "environment",
            })
        });

        Self {
            upstream_url: non_empty("ISSUEMAP_UPSTREAM_URL")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            token,
            page_size: non_empty("ISSUEMAP_PAGE_SIZE")
                .and_then(|value| value.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
            max_pages: non_empty("ISSUEMAP_MAX_PAGES")
                .and_then(|value| value.parse().ok())
                .filter(|pages| *pages > 0)
                .unwrap_or(MAX_PAGES),
            timeout: Duration::from_secs(
                non_empty("ISSUEMAP_TIMEOUT_SECS")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(TIMEOUT_SECS_DEFAULT),
            ),
            web_dist: non_empty("ISSUEMAP_WEB_DIST").map(PathBuf::from),
        }
    }

    /// Replaces the cached token with one given on the command line.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let value = token.into();
        self.token = (!value.trim().is_empty()).then(|| CachedToken {
            value: value.trim().to_string(),
            source: "command line",
        });
        self
    }

    pub fn token_value(&self) -> Option<&str> {
        self.token.as_ref().map(|token| token.value.as_str())
    }

    /// An HTTP client with the configured request timeout.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().timeout(self.timeout).build()
    }

    /// A tracker client authenticated with `token`, or with the cached token
    /// when `token` is `None`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn client(
        &self,
        token: Option<&str>,
    ) -> Result<crate::upstream::GraphQlClient, crate::error::UpstreamError> {
        let token = token.or(self.token_value()).unwrap_or_default();
        Ok(
            crate::upstream::GraphQlClient::new(self.upstream_url.clone(), token)?
                .with_http(self.http_client()?)
                .with_page_size(self.page_size),
        )
    }
}
