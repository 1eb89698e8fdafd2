//! Adapter configuration shared by every getter.

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Tunables for query execution.
///
/// Deserializable so hosts can embed it in their own settings file:
///
/// ```toml
/// default_page_size = 25
/// max_page_size = 200
/// request_timeout = 5000 # ms
/// case_sensitive_matching = false
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub default_page_size: u64,
    pub max_page_size: Option<u64>,
    /// Deadline applied to every storage call
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub request_timeout: Option<Duration>,
    /// Case sensitivity of `*x*`, `x*` and `*x` filters. Free-text search is
    /// always case-insensitive.
    pub case_sensitive_matching: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: None,
            request_timeout: None,
            case_sensitive_matching: false,
        }
    }
}

impl AdapterConfig {
    #[must_use]
    pub fn with_default_page_size(mut self, size: u64) -> Self {
        self.default_page_size = size;
        self
    }

    #[must_use]
    pub fn with_max_page_size(mut self, size: u64) -> Self {
        self.max_page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_case_sensitive_matching(mut self, enabled: bool) -> Self {
        self.case_sensitive_matching = enabled;
        self
    }
}
