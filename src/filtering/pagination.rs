use axum::http::header::HeaderMap;
use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::config::AdapterConfig;
use crate::errors::QueryError;

/// `page[number]` / `page[size]`, as numbers or numeric strings
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageParams {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub number: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub size: Option<u64>,
}

/// Row window of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// Page number defaults to 1, size to the configured default and is
    /// capped by the configured maximum.
    pub fn resolve(params: &PageParams, config: &AdapterConfig) -> Result<Self, QueryError> {
        let number = params.number.unwrap_or(1);
        let mut size = params.size.unwrap_or(config.default_page_size);
        if number == 0 || size == 0 {
            return Err(QueryError::invalid_request(format!(
                "Page number and size must be at least 1 (got number {number}, size {size})"
            )));
        }
        if let Some(max) = config.max_page_size {
            size = size.min(max);
        }
        let offset = (number - 1).checked_mul(size).ok_or_else(|| {
            QueryError::invalid_request(format!("Page {number} is out of range"))
        })?;
        Ok(Self {
            offset,
            limit: size,
        })
    }
}

/// Sanitize resource name by removing control characters for HTTP headers
fn sanitize_resource_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect()
}

/// `Content-Range` header for a page of `collection`, for hosts that expose
/// list results over HTTP.
#[must_use]
pub fn content_range(pagination: Pagination, total_count: u64, collection: &str) -> HeaderMap {
    let last = (pagination.offset + pagination.limit)
        .saturating_sub(1)
        .min(total_count.saturating_sub(1));
    let range = format!(
        "{} {}-{last}/{total_count}",
        sanitize_resource_name(collection),
        pagination.offset
    );

    let mut headers = HeaderMap::new();
    match range.parse() {
        Ok(value) => {
            headers.insert("Content-Range", value);
        }
        Err(_) => tracing::warn!(collection, "Could not build Content-Range header"),
    }
    headers
}
