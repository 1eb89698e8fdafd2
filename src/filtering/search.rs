//! Free-text search clause.

use super::conditions::{Condition, Operand, Operator};
use uuid::Uuid;

use super::predicates::{
    CompiledPredicate, MatchKind, PredicateCompiler, ResolvedField, numeric_operand,
};
use super::tree::PredicateTree;
use crate::errors::QueryError;
use crate::schema::SemanticType;

// Basic safety limit
const MAX_SEARCH_LENGTH: usize = 1_000;

/// Build the OR group of a free-text search.
///
/// Strings match by case-insensitive substring and enums by substring of
/// their text form. UUIDs and numbers only take part when the whole text
/// parses as one, and then match exactly. When `extended`, fields of every
/// to-one association are searched too.
pub fn build_search_group(
    compiler: &PredicateCompiler<'_>,
    text: &str,
    extended: bool,
) -> Result<PredicateTree, QueryError> {
    if text.len() > MAX_SEARCH_LENGTH {
        return Err(QueryError::invalid_request(format!(
            "Search text is longer than {MAX_SEARCH_LENGTH} characters"
        )));
    }

    let collection = compiler.collection();
    let mut leaves = Vec::new();
    for field in collection.search_candidates() {
        let resolved = compiler.resolve(&field.name)?;
        leaves.extend(search_leaf(compiler, &resolved, text));
    }

    if extended {
        for association in collection.associations.iter().filter(|a| a.is_to_one()) {
            let target = compiler.registry().get(&association.target)?;
            for field in target.search_candidates() {
                let resolved = compiler.resolve(&format!("{}.{}", association.name, field.name))?;
                leaves.extend(search_leaf(compiler, &resolved, text));
            }
        }
    }

    if leaves.is_empty() {
        tracing::debug!(
            collection = %collection.name,
            "No field can match the search text"
        );
    }
    Ok(PredicateTree::Or(leaves))
}

fn search_leaf(
    compiler: &PredicateCompiler<'_>,
    field: &ResolvedField<'_>,
    text: &str,
) -> Option<PredicateTree> {
    let (operator, operand, expr) = match field.semantic_type() {
        SemanticType::String | SemanticType::Enum => (
            Operator::Contains,
            Operand::Text(text.to_string()),
            compiler.matching(field, text, MatchKind::Contains, false),
        ),
        SemanticType::Uuid => {
            let uuid = Uuid::parse_str(text).ok()?;
            (Operator::Equals, Operand::Uuid(uuid), field.column().eq(uuid))
        }
        SemanticType::Number => {
            let operand = numeric_operand(text)?;
            let expr = match operand {
                Operand::Integer(integer) => field.column().eq(integer),
                Operand::Float(float) => field.column().eq(float),
                _ => return None,
            };
            (Operator::Equals, operand, expr)
        }
        _ => return None,
    };

    Some(PredicateTree::Leaf(CompiledPredicate {
        path: field.path.clone(),
        association: field.association_name(),
        condition: Condition {
            field: field.path.clone(),
            raw: text.to_string(),
            operator,
            operand,
        },
        expr,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::test_support::{compiler, registry, render_condition};
    use sea_orm::DatabaseBackend;

    fn search_sql(collection: &str, text: &str, extended: bool) -> (usize, String) {
        let registry = registry();
        let compiler = compiler(&registry, collection, DatabaseBackend::Sqlite);
        let tree = build_search_group(&compiler, text, extended).unwrap();
        (
            tree.len(),
            render_condition(DatabaseBackend::Sqlite, tree.to_condition()),
        )
    }

    #[test]
    fn test_text_search_skips_numbers() {
        // firstName, lastName, email, status
        let (leaves, sql) = search_sql("user", "rich", false);
        assert_eq!(leaves, 4, "{sql}");
        assert!(!sql.contains(r#""users"."id""#), "{sql}");
        assert!(!sql.contains("is_active"), "{sql}");
    }

    #[test]
    fn test_numeric_text_matches_numbers_exactly() {
        let (leaves, sql) = search_sql("user", "100", false);
        // four text fields plus id, score and team_id
        assert_eq!(leaves, 7, "{sql}");
        assert!(sql.contains(r#""users"."id" = 100"#), "{sql}");
        assert!(sql.contains(r#""users"."score" = 100"#), "{sql}");
    }

    #[test]
    fn test_uuid_search_is_exact() {
        let (_, sql) = search_sql("team", "7d4f9f6e", false);
        assert!(!sql.contains("code"), "{sql}");
        let (_, sql) = search_sql("team", "7d4f9f6e-3f4b-4c7e-9e1a-2b4a5c6d7e8f", false);
        assert!(sql.contains(r#""teams"."code" ="#), "{sql}");
    }

    #[test]
    fn test_declared_search_fields_only() {
        let (leaves, sql) = search_sql("post", "rust", false);
        assert_eq!(leaves, 1, "{sql}");
        assert!(sql.contains(r#"UPPER("posts"."title")"#), "{sql}");
    }

    #[test]
    fn test_extended_search_reaches_to_one_associations() {
        let (plain, _) = search_sql("user", "SF", false);
        let (extended, sql) = search_sql("user", "SF", true);
        assert!(extended > plain);
        assert!(sql.contains(r#"UPPER("address"."city")"#), "{sql}");
        assert!(sql.contains(r#"UPPER("team"."name")"#), "{sql}");
        // has-many associations are never joined for search
        assert!(!sql.contains(r#""posts"."#), "{sql}");
    }

    #[test]
    fn test_no_eligible_field_matches_nothing() {
        let (leaves, sql) = search_sql("tag", "anything", false);
        assert_eq!(leaves, 0);
        assert!(sql.contains("1 = 0"), "{sql}");
    }

    #[test]
    fn test_search_text_length_is_bounded() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let err = build_search_group(&compiler, &"x".repeat(MAX_SEARCH_LENGTH + 1), false).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest { .. }));
    }
}
