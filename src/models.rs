use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::filtering::pagination::PageParams;

/// Top-level combinator of the filter entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    #[default]
    And,
    Or,
}

/// Value of one `filter` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Condition string such as `>101` or `*Richa*`
    Raw(String),
    /// Members AND-ed together; sibling groups are OR-ed
    Group(BTreeMap<String, String>),
}

/// Filters and free-text search of a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Field or `association.field` → condition, or a named group
    #[serde(default)]
    pub filter: BTreeMap<String, FilterValue>,
    #[serde(default)]
    pub filter_type: Aggregator,
    #[serde(default)]
    pub search: Option<String>,
    /// Also search the fields of to-one associations
    #[serde(default, deserialize_with = "flexible_bool")]
    pub search_extended: bool,
}

/// Query parameters of a list request.
///
/// ```json
/// {
///   "fields": {"user": "id,email"},
///   "filter": {"id": ">101", "address.country": "$present"},
///   "filterType": "and",
///   "search": "SF",
///   "searchExtended": 1,
///   "sort": "-user.id",
///   "page": {"number": "1", "size": "10"},
///   "timezone": "Europe/Paris"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    /// Collection name → comma separated field names to return
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(flatten)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub page: PageParams,
    /// IANA timezone for relative dates, UTC when absent
    #[serde(default)]
    pub timezone: Option<String>,
}

impl QueryParams {
    /// Requested field names for a collection, `None` when not restricted
    #[must_use]
    pub fn fields_for(&self, collection: &str) -> Option<Vec<&str>> {
        self.fields.get(collection).map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        })
    }
}

/// Accepts `true`/`false`, `0`/`1` and their string forms
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Number(i64),
        Text(String),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Bool(value) => value,
        Flexible::Number(value) => value != 0,
        Flexible::Text(value) => matches!(value.trim(), "1" | "true"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StatKind {
    Pie,
    Line,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Aggregate {
    #[default]
    Count,
    Sum,
}

/// Bucket width of a Line stat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

/// One `{field, value}` entry of a stat request's filters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatFilter {
    pub field: String,
    pub value: String,
}

/// Aggregation request.
///
/// ```json
/// {
///   "collection": "user",
///   "type": "Line",
///   "group_by_date_field": "createdAt",
///   "aggregate": "Count",
///   "time_range": "Week",
///   "filters": [{"field": "address.country", "value": "France"}],
///   "filterType": "and",
///   "timezone": "Europe/Paris"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatRequest {
    pub collection: String,
    #[serde(rename = "type")]
    pub kind: StatKind,
    #[serde(default)]
    pub group_by_field: Option<String>,
    #[serde(default)]
    pub group_by_date_field: Option<String>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub aggregate_field: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub filters: Vec<StatFilter>,
    #[serde(default, rename = "filterType")]
    pub filter_type: Aggregator,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl StatRequest {
    /// Filters as a [`FilterSpec`]. Repeated fields keep their last value.
    #[must_use]
    pub fn filter_spec(&self) -> FilterSpec {
        FilterSpec {
            filter: self
                .filters
                .iter()
                .map(|f| (f.field.clone(), FilterValue::Raw(f.value.clone())))
                .collect(),
            filter_type: self.filter_type,
            search: None,
            search_extended: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PieEntry {
    #[schema(value_type = Object)]
    pub key: JsonValue,
    #[schema(value_type = Object)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LineEntry {
    pub label: String,
    #[schema(value_type = Object)]
    pub value: JsonValue,
}

/// Result of a stat request: `{"value": [...]}`
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatResult<T> {
    pub value: Vec<T>,
}
