use sea_orm::ColumnType;
use sea_orm::sea_query::Iden;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Semantic kind of a field, independent of the storage engine's native types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum SemanticType {
    Number,
    String,
    Boolean,
    Date,
    Dateonly,
    Enum,
    Json,
    Uuid,
    /// Native type with no semantic counterpart. Never emitted in a schema.
    Unsupported,
}

impl SemanticType {
    /// Types that have a meaningful `<` / `>` ordering for filters
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Number | Self::Date | Self::Dateonly)
    }

    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(self, Self::Date | Self::Dateonly)
    }

    /// Whether a free-text search may ever consider this field
    #[must_use]
    pub const fn is_searchable(self) -> bool {
        matches!(self, Self::String | Self::Enum | Self::Uuid | Self::Number)
    }

    /// Whether rows can be ordered by this field
    #[must_use]
    pub const fn is_sortable(self) -> bool {
        !matches!(self, Self::Json | Self::Unsupported)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Number => "Number",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::Dateonly => "Dateonly",
            Self::Enum => "Enum",
            Self::Json => "Json",
            Self::Uuid => "Uuid",
            Self::Unsupported => "Unsupported",
        };
        f.write_str(name)
    }
}

/// Map a native column type onto its semantic type.
///
/// Unknown or exotic native types degrade to [`SemanticType::Unsupported`]
/// instead of failing, so one odd column never prevents a collection from
/// being exposed.
#[must_use]
pub fn detect(column_type: &ColumnType) -> SemanticType {
    match column_type {
        ColumnType::Enum { .. } => SemanticType::Enum,
        ColumnType::Boolean => SemanticType::Boolean,
        ColumnType::TinyInteger
        | ColumnType::SmallInteger
        | ColumnType::Integer
        | ColumnType::BigInteger
        | ColumnType::TinyUnsigned
        | ColumnType::SmallUnsigned
        | ColumnType::Unsigned
        | ColumnType::BigUnsigned
        | ColumnType::Float
        | ColumnType::Double
        | ColumnType::Decimal(_)
        | ColumnType::Money(_) => SemanticType::Number,
        ColumnType::Char(_) | ColumnType::String(_) | ColumnType::Text => SemanticType::String,
        ColumnType::DateTime | ColumnType::Timestamp | ColumnType::TimestampWithTimeZone => {
            SemanticType::Date
        }
        ColumnType::Date => SemanticType::Dateonly,
        ColumnType::Uuid => SemanticType::Uuid,
        ColumnType::Json | ColumnType::JsonBinary => SemanticType::Json,
        _ => SemanticType::Unsupported,
    }
}

/// Human readable name of a native type, used in diagnostics
#[must_use]
pub fn native_type_name(column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Enum { .. } => "Enum".to_string(),
        ColumnType::Custom(name) => format!("Custom({})", name.to_string()),
        other => {
            let debug = format!("{other:?}");
            debug
                .split(['(', ' ', '{'])
                .next()
                .unwrap_or("Unknown")
                .to_string()
        }
    }
}
