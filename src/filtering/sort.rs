use sea_orm::sea_query::Order;

use super::predicates::{PredicateCompiler, ResolvedField};
use crate::errors::QueryError;

/// Parsed `sort` parameter: `field`, `-field` or `association.field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub path: String,
    pub descending: bool,
}

impl SortSpec {
    /// `None` for an absent or blank parameter
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
        let (path, descending) = match raw.strip_prefix('-') {
            Some(path) => (path, true),
            None => (raw, false),
        };
        Some(Self {
            path: path.to_string(),
            descending,
        })
    }

    #[must_use]
    pub fn order(&self) -> Order {
        if self.descending { Order::Desc } else { Order::Asc }
    }
}

/// Resolve the sort column, rejecting fields that cannot be ordered
pub fn resolve_sort<'r>(
    compiler: &PredicateCompiler<'r>,
    spec: &SortSpec,
) -> Result<ResolvedField<'r>, QueryError> {
    let field = compiler.resolve(&spec.path)?;
    if !field.semantic_type().is_sortable() {
        return Err(QueryError::invalid_request(format!(
            "Cannot sort on {} field '{}'",
            field.semantic_type(),
            spec.path
        )));
    }
    Ok(field)
}
