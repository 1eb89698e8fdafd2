//! Native column metadata.
//!
//! [`ColumnMeta`] is what the storage layer knows about a column before any
//! semantic interpretation: native type, nullability, key flags, default value
//! and declared validation constraints. Entity metadata is read straight from
//! Sea-ORM; defaults and constraints are declared alongside since the entity
//! definition does not carry them in a queryable shape.

use sea_orm::sea_query::Iden;
use sea_orm::{
    ColumnTrait, ColumnType, EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn,
    PrimaryKeyTrait,
};
use serde_json::Value as JsonValue;

/// Default value declared on a native column
#[derive(Debug, Clone, PartialEq)]
pub enum NativeDefault {
    /// Evaluated by the database on insert (`now()`, `gen_random_uuid()`, a sequence)
    Function(String),
    Literal(JsonValue),
}

/// A declared constraint argument, optionally with the message shown when it fails
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint<T> {
    pub args: T,
    pub msg: Option<String>,
}

impl<T> Constraint<T> {
    pub fn new(args: T) -> Self {
        Self { args, msg: None }
    }

    #[must_use]
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Min(u64),
    Range(u64, u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Single(String),
    Any(Vec<String>),
}

/// Validation constraints declared on a column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min: Option<Constraint<JsonValue>>,
    pub max: Option<Constraint<JsonValue>>,
    pub is_before: Option<Constraint<JsonValue>>,
    pub is_after: Option<Constraint<JsonValue>>,
    pub len: Option<Constraint<Length>>,
    pub contains: Option<Constraint<String>>,
    pub pattern: Option<Constraint<Pattern>>,
}

impl Constraints {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Storage-level description of one column
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// Name exposed to clients
    pub field: String,
    /// Name in the database
    pub column: String,
    pub column_type: ColumnType,
    pub allow_null: bool,
    pub primary_key: bool,
    /// Value assigned by the database (auto-increment key)
    pub auto_generated: bool,
    pub default: Option<NativeDefault>,
    pub constraints: Constraints,
}

impl ColumnMeta {
    /// Nullable, non-key column named the same in the API and the database
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            field: name,
            column_type,
            allow_null: true,
            primary_key: false,
            auto_generated: false,
            default: None,
            constraints: Constraints::default(),
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    #[must_use]
    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }

    #[must_use]
    pub fn column_name(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(NativeDefault::Literal(value));
        self
    }

    #[must_use]
    pub fn default_fn(mut self, function: impl Into<String>) -> Self {
        self.default = Some(NativeDefault::Function(function.into()));
        self
    }

    #[must_use]
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Variant labels of an enum column, `None` for every other type
    #[must_use]
    pub fn enum_values(&self) -> Option<Vec<String>> {
        match &self.column_type {
            ColumnType::Enum { variants, .. } => {
                Some(variants.iter().map(|variant| variant.to_string()).collect())
            }
            _ => None,
        }
    }
}

/// Read the column metadata of a Sea-ORM entity.
///
/// Primary keys are flagged from `E::PrimaryKey`; a single auto-increment key
/// is marked as auto generated.
#[must_use]
pub fn entity_columns<E: EntityTrait>() -> Vec<ColumnMeta> {
    let primary_keys: Vec<String> = E::PrimaryKey::iter()
        .map(|key| key.into_column().as_str().to_string())
        .collect();
    let auto_increment =
        primary_keys.len() == 1 && <E::PrimaryKey as PrimaryKeyTrait>::auto_increment();

    E::Column::iter()
        .map(|column| {
            let def = column.def();
            let name = column.as_str().to_string();
            let is_key = primary_keys.contains(&name);
            let mut meta = ColumnMeta::new(name, def.get_column_type().clone());
            meta.allow_null = def.is_null() && !is_key;
            meta.primary_key = is_key;
            meta.auto_generated = is_key && auto_increment;
            meta
        })
        .collect()
}
