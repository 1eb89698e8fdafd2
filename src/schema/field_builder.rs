//! # Field Descriptors
//!
//! Turns one [`ColumnMeta`] into the [`FieldDescriptor`] the admin UI
//! consumes: semantic type, required flag, enum values, default value and the
//! validation rules derived from the column's declared constraints.

use serde::Serialize;
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use super::field_type::{SemanticType, detect};
use super::introspection::{ColumnMeta, Length, NativeDefault, Pattern};

/// How a field obtains its value when a record is created without one
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValueKind {
    /// Fixed value, surfaced in the schema
    Static(JsonValue),
    /// Supplied by the database at write time. Never surfaced and makes the
    /// field optional.
    Dynamic,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum ValidationKind {
    #[serde(rename = "is present")]
    IsPresent,
    #[serde(rename = "is greater than")]
    IsGreaterThan,
    #[serde(rename = "is less than")]
    IsLessThan,
    #[serde(rename = "is before")]
    IsBefore,
    #[serde(rename = "is after")]
    IsAfter,
    #[serde(rename = "is longer than")]
    IsLongerThan,
    #[serde(rename = "is shorter than")]
    IsShorterThan,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "is like")]
    IsLike,
}

/// One validation rule of a field
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Validation {
    #[serde(rename = "type")]
    pub kind: ValidationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Validation {
    fn new(kind: ValidationKind, value: Option<JsonValue>, message: Option<&String>) -> Self {
        Self {
            kind,
            value,
            message: message.cloned(),
        }
    }
}

/// Semantic description of one supported field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column_name: String,
    pub semantic_type: SemanticType,
    pub is_required: bool,
    pub is_primary_key: bool,
    /// Present iff `semantic_type` is [`SemanticType::Enum`]
    pub enum_values: Option<Vec<String>>,
    pub default_value: DefaultValueKind,
    pub validations: Vec<Validation>,
}

/// Build the descriptor of a column.
///
/// Returns `None` when the native type is unsupported; such columns are
/// tracked by the collection but never described.
#[must_use]
pub fn build(meta: &ColumnMeta) -> Option<FieldDescriptor> {
    let semantic_type = detect(&meta.column_type);
    if semantic_type == SemanticType::Unsupported {
        return None;
    }

    let default_value = default_kind(meta, semantic_type);
    let dynamic = default_value == DefaultValueKind::Dynamic;
    let is_required = !meta.auto_generated && !meta.allow_null && !dynamic;
    let validations = if dynamic || meta.auto_generated {
        Vec::new()
    } else {
        validations(meta)
    };
    let enum_values = if semantic_type == SemanticType::Enum {
        Some(meta.enum_values().unwrap_or_default())
    } else {
        None
    };

    Some(FieldDescriptor {
        name: meta.field.clone(),
        column_name: meta.column.clone(),
        semantic_type,
        is_required,
        is_primary_key: meta.primary_key,
        enum_values,
        default_value,
        validations,
    })
}

fn default_kind(meta: &ColumnMeta, semantic_type: SemanticType) -> DefaultValueKind {
    let can_be_dynamic = semantic_type.is_temporal() || semantic_type == SemanticType::Uuid;
    match &meta.default {
        None | Some(NativeDefault::Literal(JsonValue::Null)) => DefaultValueKind::None,
        Some(NativeDefault::Function(_)) => DefaultValueKind::Dynamic,
        Some(NativeDefault::Literal(JsonValue::Object(_))) if can_be_dynamic => {
            DefaultValueKind::Dynamic
        }
        // Generated identifiers must not leak as a static default
        Some(NativeDefault::Literal(_)) if meta.primary_key => DefaultValueKind::None,
        Some(NativeDefault::Literal(value)) => DefaultValueKind::Static(value.clone()),
    }
}

fn validations(meta: &ColumnMeta) -> Vec<Validation> {
    let mut rules = Vec::new();
    if !meta.allow_null {
        rules.push(Validation::new(ValidationKind::IsPresent, None, None));
    }

    let constraints = &meta.constraints;
    let bounds = [
        (&constraints.min, ValidationKind::IsGreaterThan),
        (&constraints.max, ValidationKind::IsLessThan),
        (&constraints.is_before, ValidationKind::IsBefore),
        (&constraints.is_after, ValidationKind::IsAfter),
    ];
    for (constraint, kind) in bounds {
        if let Some(bound) = constraint {
            rules.push(Validation::new(
                kind,
                Some(bound.args.clone()),
                bound.msg.as_ref(),
            ));
        }
    }

    if let Some(len) = &constraints.len {
        match len.args {
            Length::Min(min) => rules.push(Validation::new(
                ValidationKind::IsLongerThan,
                Some(min.into()),
                len.msg.as_ref(),
            )),
            Length::Range(min, max) => {
                rules.push(Validation::new(
                    ValidationKind::IsLongerThan,
                    Some(min.into()),
                    len.msg.as_ref(),
                ));
                rules.push(Validation::new(
                    ValidationKind::IsShorterThan,
                    Some(max.into()),
                    len.msg.as_ref(),
                ));
            }
        }
    }

    if let Some(contains) = &constraints.contains {
        rules.push(Validation::new(
            ValidationKind::Contains,
            Some(contains.args.clone().into()),
            contains.msg.as_ref(),
        ));
    }

    // A list of alternative patterns has no single-rule equivalent
    if let Some(pattern) = &constraints.pattern {
        if let Pattern::Single(regex) = &pattern.args {
            rules.push(Validation::new(
                ValidationKind::IsLike,
                Some(regex.clone().into()),
                pattern.msg.as_ref(),
            ));
        }
    }

    rules
}
