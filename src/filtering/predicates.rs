//! # Predicate Compiler
//!
//! Turns a parsed [`Condition`] on a field path into a dialect-aware
//! [`SimpleExpr`]. Field paths are either a base field (`email`) or a field of
//! a to-one association (`user.email`); deeper paths are rejected.
//!
//! Columns are always qualified: base fields with the collection's table name,
//! association fields with the association name, which is also the alias the
//! query assembler gives the joined table.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, LikeExpr, SimpleExpr};
use sea_orm::{DatabaseBackend, Value};
use std::fmt::Write;

use super::conditions::{self, Condition, Operand, Operator};
use super::dates::{RelativeDirection, resolve_in};
use crate::errors::QueryError;
use crate::schema::{Association, Collection, CollectionRegistry, FieldDescriptor, SemanticType};

/// Per-request compilation settings
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub backend: DatabaseBackend,
    pub timezone: Tz,
    /// Reference instant for relative-date filters
    pub now: DateTime<Utc>,
    /// Case sensitivity of the wildcard operators. Free-text search ignores it.
    pub case_sensitive: bool,
}

impl CompileContext {
    #[must_use]
    pub fn new(backend: DatabaseBackend, timezone: Tz, now: DateTime<Utc>) -> Self {
        Self {
            backend,
            timezone,
            now,
            case_sensitive: false,
        }
    }

    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// A field path split into at most one association hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath<'a> {
    pub association: Option<&'a str>,
    pub field: &'a str,
}

impl<'a> FieldPath<'a> {
    pub fn parse(path: &'a str) -> Result<Self, QueryError> {
        let mut parts = path.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(field), None, _) => Ok(Self {
                association: None,
                field,
            }),
            (Some(association), Some(field), None) => Ok(Self {
                association: Some(association),
                field,
            }),
            _ => Err(QueryError::UnsupportedDepth {
                path: path.to_string(),
            }),
        }
    }
}

/// A field path bound to its descriptor and table alias
#[derive(Debug, Clone)]
pub struct ResolvedField<'r> {
    pub path: String,
    pub table_alias: String,
    pub association: Option<&'r Association>,
    pub descriptor: &'r FieldDescriptor,
}

impl ResolvedField<'_> {
    #[must_use]
    pub fn semantic_type(&self) -> SemanticType {
        self.descriptor.semantic_type
    }

    /// Qualified column reference
    #[must_use]
    pub fn column(&self) -> Expr {
        Expr::col((
            Alias::new(&self.table_alias),
            Alias::new(&self.descriptor.column_name),
        ))
    }

    /// Column as text. Postgres will not `LIKE` or compare non-text columns
    /// against strings without an explicit cast.
    #[must_use]
    pub fn text_column(&self, backend: DatabaseBackend) -> SimpleExpr {
        let needs_cast = matches!(self.semantic_type(), SemanticType::Enum | SemanticType::Uuid);
        match backend {
            DatabaseBackend::Postgres if needs_cast => {
                self.column().cast_as(Alias::new("TEXT"))
            }
            _ => self.column().into(),
        }
    }

    #[must_use]
    pub fn association_name(&self) -> Option<String> {
        self.association.map(|a| a.name.clone())
    }
}

/// One compiled leaf of a predicate tree
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    pub path: String,
    /// Association that must be joined for `expr` to be valid
    pub association: Option<String>,
    pub condition: Condition,
    pub expr: SimpleExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

impl MatchKind {
    fn like_pattern(self, text: &str) -> String {
        let escaped = escape_like_wildcards(text);
        match self {
            Self::Contains => format!("%{escaped}%"),
            Self::StartsWith => format!("{escaped}%"),
            Self::EndsWith => format!("%{escaped}"),
        }
    }

    fn glob_pattern(self, text: &str) -> String {
        let escaped = escape_glob_wildcards(text);
        match self {
            Self::Contains => format!("*{escaped}*"),
            Self::StartsWith => format!("{escaped}*"),
            Self::EndsWith => format!("*{escaped}"),
        }
    }
}

/// Escape character of every generated `LIKE`; a backslash would need
/// per-dialect quoting
const LIKE_ESCAPE: char = '!';

/// Escape LIKE wildcards so user input only ever matches literally
fn escape_like_wildcards(input: &str) -> String {
    input
        .replace(LIKE_ESCAPE, "!!")
        .replace('%', "!%")
        .replace('_', "!_")
}

fn escape_glob_wildcards(input: &str) -> String {
    input
        .replace('[', "[[]")
        .replace('*', "[*]")
        .replace('?', "[?]")
}

pub struct PredicateCompiler<'r> {
    registry: &'r CollectionRegistry,
    collection: &'r Collection,
    ctx: CompileContext,
}

impl<'r> PredicateCompiler<'r> {
    #[must_use]
    pub fn new(
        registry: &'r CollectionRegistry,
        collection: &'r Collection,
        ctx: CompileContext,
    ) -> Self {
        Self {
            registry,
            collection,
            ctx,
        }
    }

    #[must_use]
    pub fn collection(&self) -> &'r Collection {
        self.collection
    }

    #[must_use]
    pub fn registry(&self) -> &'r CollectionRegistry {
        self.registry
    }

    #[must_use]
    pub fn context(&self) -> &CompileContext {
        &self.ctx
    }

    /// Bind a field path to the base collection or one to-one association
    pub fn resolve(&self, path: &str) -> Result<ResolvedField<'r>, QueryError> {
        let parsed = FieldPath::parse(path)?;
        let Some(name) = parsed.association else {
            return Ok(ResolvedField {
                path: path.to_string(),
                table_alias: self.collection.table.clone(),
                association: None,
                descriptor: self.collection.lookup_field(parsed.field)?,
            });
        };

        let association = self.collection.association(name)?;
        if !association.is_to_one() {
            return Err(QueryError::invalid_request(format!(
                "Association '{name}' of '{}' is has-many and cannot appear in a field path",
                self.collection.name
            )));
        }
        let target = self.registry.get(&association.target)?;
        Ok(ResolvedField {
            path: path.to_string(),
            table_alias: association.name.clone(),
            association: Some(association),
            descriptor: target.lookup_field(parsed.field)?,
        })
    }

    /// Parse a raw filter value for `path` and compile it
    pub fn compile_raw(&self, path: &str, raw: &str) -> Result<CompiledPredicate, QueryError> {
        let field = self.resolve(path)?;
        let condition = conditions::parse(path, raw, field.semantic_type())?;
        self.compile_resolved(&field, condition)
    }

    /// Compile an already parsed condition on `path`
    pub fn compile(&self, path: &str, condition: Condition) -> Result<CompiledPredicate, QueryError> {
        let field = self.resolve(path)?;
        self.compile_resolved(&field, condition)
    }

    pub(crate) fn compile_resolved(
        &self,
        field: &ResolvedField<'_>,
        condition: Condition,
    ) -> Result<CompiledPredicate, QueryError> {
        let field_type = field.semantic_type();
        if !condition.operator.supports(field_type) {
            return Err(QueryError::unsupported_operator(
                &field.path,
                &condition.raw,
                condition.operator,
                field_type,
            ));
        }
        let expr = self.build(field, &condition)?;
        Ok(CompiledPredicate {
            path: field.path.clone(),
            association: field.association_name(),
            condition,
            expr,
        })
    }

    fn build(&self, field: &ResolvedField<'_>, condition: &Condition) -> Result<SimpleExpr, QueryError> {
        let field_type = field.semantic_type();
        let mismatch = || QueryError::type_mismatch(&field.path, &condition.raw, field_type);
        let column = || field.column();

        let expr = match condition.operator {
            Operator::Equals | Operator::NotEquals => {
                let value = operand_value(&condition.operand).ok_or_else(mismatch)?;
                let lhs = if field_type == SemanticType::Enum {
                    if !is_enum_member(field.descriptor, &condition.operand) {
                        return Err(mismatch());
                    }
                    field.text_column(self.ctx.backend)
                } else {
                    column().into()
                };
                if condition.operator == Operator::Equals {
                    Expr::expr(lhs).eq(value)
                } else {
                    Expr::expr(lhs).ne(value)
                }
            }
            Operator::GreaterThan => column().gt(operand_value(&condition.operand).ok_or_else(mismatch)?),
            Operator::LessThan => column().lt(operand_value(&condition.operand).ok_or_else(mismatch)?),
            Operator::Contains | Operator::NotContains | Operator::StartsWith | Operator::EndsWith => {
                let Operand::Text(text) = &condition.operand else {
                    return Err(mismatch());
                };
                let kind = match condition.operator {
                    Operator::StartsWith => MatchKind::StartsWith,
                    Operator::EndsWith => MatchKind::EndsWith,
                    _ => MatchKind::Contains,
                };
                let matched = self.matching(field, text, kind, self.ctx.case_sensitive);
                if condition.operator == Operator::NotContains {
                    // NULL never matches, so it belongs to the complement
                    matched.not().or(column().is_null())
                } else {
                    matched
                }
            }
            Operator::IsNull => column().is_null(),
            Operator::IsNotNull => column().is_not_null(),
            Operator::IsTrue => column().eq(true),
            Operator::IsFalse => column().eq(false),
            Operator::IsNotTrue => column().ne(true),
            Operator::IsNotFalse => column().ne(false),
            Operator::IsPresent => column().is_not_null().and(column().ne("")),
            Operator::IsBlank => column().is_null().or(column().eq("")),
            Operator::RelativeDateBefore | Operator::RelativeDateAfter => {
                let Operand::Hours(hours) = condition.operand else {
                    return Err(mismatch());
                };
                let direction = if condition.operator == Operator::RelativeDateBefore {
                    RelativeDirection::Before
                } else {
                    RelativeDirection::After
                };
                let boundary = resolve_in(hours, direction, self.ctx.timezone, self.ctx.now)
                    .ok_or_else(|| {
                        QueryError::invalid_request(format!(
                            "Relative offset in '{}' is out of range",
                            condition.raw
                        ))
                    })?;
                let value: Value = if field_type == SemanticType::Dateonly {
                    boundary.instant.date_naive().into()
                } else {
                    boundary.instant.with_timezone(&Utc).into()
                };
                match boundary.direction {
                    RelativeDirection::Before => column().lt(value),
                    RelativeDirection::After => column().gt(value),
                }
            }
        };
        Ok(expr)
    }

    /// Wildcard match of a text column
    pub(crate) fn matching(
        &self,
        field: &ResolvedField<'_>,
        text: &str,
        kind: MatchKind,
        case_sensitive: bool,
    ) -> SimpleExpr {
        let target = field.text_column(self.ctx.backend);
        let pattern = kind.like_pattern(text);
        if !case_sensitive {
            // UPPER on both sides: SQLite only folds ASCII
            return custom_expr(
                self.ctx.backend,
                "? LIKE UPPER(?) ESCAPE '!'",
                [SimpleExpr::from(Func::upper(target)), Expr::val(pattern).into()],
            );
        }
        match self.ctx.backend {
            // SQLite's LIKE ignores ASCII case
            DatabaseBackend::Sqlite => custom_expr(
                DatabaseBackend::Sqlite,
                "? GLOB ?",
                [target, Expr::val(kind.glob_pattern(text)).into()],
            ),
            // MySQL's default collations ignore case
            DatabaseBackend::MySql => custom_expr(
                DatabaseBackend::MySql,
                "? LIKE BINARY ? ESCAPE '!'",
                [target, Expr::val(pattern).into()],
            ),
            _ => Expr::expr(target).like(LikeExpr::new(pattern).escape(LIKE_ESCAPE)),
        }
    }
}

/// Custom SQL with `?` standing for each expression in turn.
///
/// Postgres numbers its placeholders, so `?` becomes `$1`, `$2`...
/// Templates must not use `?` for anything else.
pub(crate) fn custom_expr<I>(backend: DatabaseBackend, template: &str, exprs: I) -> SimpleExpr
where
    I: IntoIterator<Item = SimpleExpr>,
{
    if backend != DatabaseBackend::Postgres {
        return Expr::cust_with_exprs(template, exprs);
    }
    let mut numbered = String::with_capacity(template.len() + 4);
    for (position, part) in template.split('?').enumerate() {
        if position > 0 {
            let _ = write!(numbered, "${position}");
        }
        numbered.push_str(part);
    }
    Expr::cust_with_exprs(numbered, exprs)
}

/// Storage value of a coerced operand
fn operand_value(operand: &Operand) -> Option<Value> {
    match operand {
        Operand::Integer(integer) => Some((*integer).into()),
        Operand::Float(float) => Some((*float).into()),
        Operand::Text(text) => Some(text.clone().into()),
        Operand::Timestamp(timestamp) => Some((*timestamp).into()),
        Operand::Day(day) => Some((*day).into()),
        Operand::Uuid(uuid) => Some((*uuid).into()),
        Operand::None | Operand::Hours(_) => None,
    }
}

fn is_enum_member(descriptor: &FieldDescriptor, operand: &Operand) -> bool {
    let Operand::Text(text) = operand else {
        return false;
    };
    descriptor
        .enum_values
        .as_ref()
        .is_some_and(|values| values.iter().any(|value| value == text))
}

/// Parse text as an exact numeric search operand
pub(crate) fn numeric_operand(text: &str) -> Option<Operand> {
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Operand::Integer(integer));
    }
    text.parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .map(Operand::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::test_support::{compiler, context, registry, render};

    fn sql(backend: DatabaseBackend, path: &str, raw: &str) -> String {
        let registry = registry();
        let compiler = compiler(&registry, "user", backend);
        let predicate = compiler.compile_raw(path, raw).unwrap();
        render(backend, predicate.expr)
    }

    #[test]
    fn test_field_path_depth() {
        assert_eq!(
            FieldPath::parse("email").unwrap(),
            FieldPath {
                association: None,
                field: "email"
            }
        );
        assert_eq!(
            FieldPath::parse("address.country").unwrap().association,
            Some("address")
        );
        assert!(matches!(
            FieldPath::parse("a.b.c"),
            Err(QueryError::UnsupportedDepth { path }) if path == "a.b.c"
        ));
    }

    #[test]
    fn test_numeric_comparison() {
        let query = sql(DatabaseBackend::Sqlite, "id", ">101");
        assert!(query.contains(r#""users"."id" > 101"#), "{query}");
        let query = sql(DatabaseBackend::Sqlite, "id", "!100");
        assert!(query.contains(r#""users"."id" <> 100"#), "{query}");
    }

    #[test]
    fn test_case_insensitive_contains() {
        let query = sql(DatabaseBackend::Sqlite, "firstName", "*Richa*");
        assert!(
            query.contains(r#"UPPER("users"."first_name") LIKE UPPER('%Richa%') ESCAPE '!'"#),
            "{query}"
        );
    }

    #[test]
    fn test_non_ascii_pattern_is_folded_in_sql() {
        for backend in [DatabaseBackend::Sqlite, DatabaseBackend::MySql, DatabaseBackend::Postgres] {
            let query = sql(backend, "firstName", "*café*");
            assert!(query.contains("UPPER('%café%')"), "{backend:?}: {query}");
            assert!(!query.contains("CAFÉ"), "{backend:?}: {query}");
        }
    }

    #[test]
    fn test_wildcards_in_input_are_escaped() {
        assert_eq!(escape_like_wildcards("50%_off"), "50!%!_off");
        assert_eq!(escape_like_wildcards("wow!"), "wow!!");
        assert_eq!(escape_like_wildcards(r"a\b"), r"a\b");
        assert_eq!(escape_glob_wildcards("a*b?[c]"), "a[*]b[?][[]c]");
        assert_eq!(MatchKind::StartsWith.like_pattern("x%"), "x!%%");
    }

    #[test]
    fn test_starts_and_ends_with() {
        let query = sql(DatabaseBackend::Postgres, "email", "dinesh@*");
        assert!(query.contains("UPPER('dinesh@%')"), "{query}");
        let query = sql(DatabaseBackend::Postgres, "email", "*@piedpiper.com");
        assert!(query.contains("UPPER('%@piedpiper.com')"), "{query}");
    }

    #[test]
    fn test_not_contains_keeps_nulls() {
        let query = sql(DatabaseBackend::Postgres, "firstName", "!*Richa*");
        assert!(query.contains("NOT"), "{query}");
        assert!(query.contains(r#""users"."first_name" IS NULL"#), "{query}");
    }

    #[test]
    fn test_case_sensitive_matching_per_dialect() {
        let registry = registry();
        for (backend, expected) in [
            (DatabaseBackend::Sqlite, r#""users"."first_name" GLOB '*Ri[*]cha*'"#),
            (
                DatabaseBackend::MySql,
                "`users`.`first_name` LIKE BINARY '%Ri*cha%' ESCAPE '!'",
            ),
            (DatabaseBackend::Postgres, r#""users"."first_name" LIKE '%Ri*cha%' ESCAPE '!'"#),
        ] {
            let compiler = PredicateCompiler::new(
                &registry,
                registry.get("user").unwrap(),
                context(backend).case_sensitive(true),
            );
            let predicate = compiler.compile_raw("firstName", "*Ri*cha*").unwrap();
            let query = render(backend, predicate.expr);
            assert!(query.contains(expected), "{backend:?}: {query}");
            assert!(!query.contains("UPPER"), "{backend:?}: {query}");
        }
    }

    #[test]
    fn test_custom_expr_placeholders_per_backend() {
        for backend in [DatabaseBackend::Sqlite, DatabaseBackend::MySql, DatabaseBackend::Postgres] {
            let expr = custom_expr(
                backend,
                "? < UPPER(?)",
                [SimpleExpr::from(Expr::val(1)), Expr::val("b").into()],
            );
            let query = render(backend, expr);
            assert!(query.contains("1 < UPPER('b')"), "{backend:?}: {query}");
            assert!(!query.contains('$'), "{backend:?}: {query}");
            assert!(!query.contains('?'), "{backend:?}: {query}");
        }
    }

    #[test]
    fn test_present_and_blank() {
        let query = sql(DatabaseBackend::Sqlite, "address.country", "$present");
        assert!(query.contains(r#""address"."country" IS NOT NULL"#), "{query}");
        assert!(query.contains(r#""address"."country" <> ''"#), "{query}");
        let query = sql(DatabaseBackend::Sqlite, "address.country", "$blank");
        assert!(query.contains(r#""address"."country" IS NULL"#), "{query}");
        assert!(query.contains(r#""address"."country" = ''"#), "{query}");
    }

    #[test]
    fn test_enum_equality_is_cast_on_postgres() {
        let query = sql(DatabaseBackend::Postgres, "status", "active");
        assert!(query.contains(r#"CAST("users"."status" AS TEXT) = 'active'"#), "{query}");
        let query = sql(DatabaseBackend::Sqlite, "status", "active");
        assert!(query.contains(r#""users"."status" = 'active'"#), "{query}");
    }

    #[test]
    fn test_enum_equality_requires_member() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let err = compiler.compile_raw("status", "retired").unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn test_relative_date_boundary() {
        // test_support pins now to 2024-03-10T12:00:00Z
        let query = sql(DatabaseBackend::Postgres, "createdAt", "$24HoursBefore");
        assert!(query.contains(r#""users"."created_at" <"#), "{query}");
        assert!(query.contains("2024-03-09 12:00:00"), "{query}");

        let query = sql(DatabaseBackend::Postgres, "createdAt", "$2HoursAfter");
        assert!(query.contains(r#""users"."created_at" >"#), "{query}");
        assert!(query.contains("2024-03-10 10:00:00"), "{query}");
    }

    #[test]
    fn test_association_path_must_be_to_one() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let err = compiler.compile_raw("posts.title", "x").unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest { .. }), "{err:?}");
        let err = compiler.compile_raw("ghost.title", "x").unwrap_err();
        assert!(matches!(err, QueryError::UnknownAssociation { .. }), "{err:?}");
    }

    #[test]
    fn test_association_predicate_records_join() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let predicate = compiler.compile_raw("address.country", "France").unwrap();
        assert_eq!(predicate.association.as_deref(), Some("address"));
        assert_eq!(predicate.path, "address.country");
        assert!(compiler.compile_raw("id", "1").unwrap().association.is_none());
    }

    #[test]
    fn test_unsupported_field_is_rejected() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let err = compiler.compile_raw("avatar", "x").unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFieldType { .. }), "{err:?}");
    }

    #[test]
    fn test_compile_checks_operator_legality() {
        let registry = registry();
        let compiler = compiler(&registry, "user", DatabaseBackend::Sqlite);
        let condition = Condition {
            field: "firstName".into(),
            raw: "$2HoursBefore".into(),
            operator: Operator::RelativeDateBefore,
            operand: Operand::Hours(2),
        };
        let err = compiler.compile("firstName", condition).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator { .. }), "{err:?}");
    }

    #[test]
    fn test_boolean_negations_exclude_null() {
        let query = sql(DatabaseBackend::Sqlite, "isActive", "!true");
        assert!(query.contains(r#""users"."is_active" <>"#), "{query}");
        assert!(!query.contains("IS NULL"), "{query}");
    }
}
