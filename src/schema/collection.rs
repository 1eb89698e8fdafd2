//! Collections and their one-hop associations.

use sea_orm::{EntityTrait, Identity, RelationDef, RelationType};
use serde::Serialize;
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use super::field_builder::{DefaultValueKind, FieldDescriptor, Validation, build};
use super::field_type::{SemanticType, native_type_name};
use super::introspection::{ColumnMeta, entity_columns};
use super::registry::CollectionRegistry;
use crate::errors::QueryError;

/// `idField` reported for collections keyed by more than one column
pub const COMPOSITE_ID_FIELD: &str = "compositeId";

/// Separator joining the key parts of a composite record id
pub const COMPOSITE_ID_SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Foreign key lives on this collection
    BelongsTo,
    /// Foreign key lives on the target collection, at most one target row
    HasOne,
    /// Foreign key lives on the target collection
    HasMany,
}

/// Named one-hop link to another collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub name: String,
    pub target: String,
    pub kind: AssociationKind,
    /// Database column holding the reference
    pub foreign_key: String,
}

impl Association {
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, target, AssociationKind::BelongsTo, foreign_key)
    }

    pub fn has_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, target, AssociationKind::HasOne, foreign_key)
    }

    pub fn has_many(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(name, target, AssociationKind::HasMany, foreign_key)
    }

    fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        kind: AssociationKind,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind,
            foreign_key: foreign_key.into(),
        }
    }

    /// Derive an association from a Sea-ORM relation definition
    /// (`Entity::belongs_to`, `has_one` or `has_many`).
    pub fn from_relation(
        name: impl Into<String>,
        target: impl Into<String>,
        relation: &RelationDef,
    ) -> Result<Self, QueryError> {
        let name = name.into();
        let identity = if relation.is_owner {
            &relation.to_col
        } else {
            &relation.from_col
        };
        let foreign_key = match identity {
            Identity::Unary(column) => column.to_string(),
            _ => {
                return Err(QueryError::invalid_registry(format!(
                    "association '{name}' uses a composite foreign key"
                )));
            }
        };
        let kind = match (relation.is_owner, &relation.rel_type) {
            (false, _) => AssociationKind::BelongsTo,
            (true, &RelationType::HasOne) => AssociationKind::HasOne,
            (true, &RelationType::HasMany) => AssociationKind::HasMany,
        };
        Ok(Self::new(name, target, kind, foreign_key))
    }

    /// Joinable without multiplying base rows
    #[must_use]
    pub fn is_to_one(&self) -> bool {
        self.kind != AssociationKind::HasMany
    }
}

/// Declaration of a collection, validated by the registry builder
#[derive(Debug, Clone)]
pub struct CollectionDef {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) columns: Vec<ColumnMeta>,
    pub(crate) search_fields: Option<Vec<String>>,
    pub(crate) associations: Vec<Association>,
    pub(crate) undeclared: Vec<String>,
}

impl CollectionDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            search_fields: None,
            associations: Vec::new(),
            undeclared: Vec::new(),
        }
    }

    /// Collection over a Sea-ORM entity, columns read from its definition
    pub fn from_entity<E: EntityTrait>(name: impl Into<String>) -> Self {
        let mut def = Self::new(name, E::default().table_name());
        def.columns = entity_columns::<E>();
        def
    }

    /// Add a column, replacing any column exposed under the same field name
    #[must_use]
    pub fn column(mut self, meta: ColumnMeta) -> Self {
        match self.columns.iter_mut().find(|c| c.field == meta.field) {
            Some(existing) => *existing = meta,
            None => self.columns.push(meta),
        }
        self
    }

    /// Adjust an already declared column (defaults, constraints, API name).
    /// Unknown names are reported when the registry is built.
    #[must_use]
    pub fn configure(mut self, field: &str, update: impl FnOnce(&mut ColumnMeta)) -> Self {
        match self.columns.iter_mut().find(|c| c.field == field) {
            Some(meta) => update(meta),
            None => self.undeclared.push(field.to_string()),
        }
        self
    }

    #[must_use]
    pub fn search_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }
}

/// A validated, immutable collection
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
    /// Columns left out of the schema, with their native type name
    pub unsupported: Vec<(String, String)>,
    pub primary_keys: Vec<String>,
    pub search_fields: Option<Vec<String>>,
    pub associations: Vec<Association>,
}

impl Collection {
    pub(crate) fn from_def(def: CollectionDef) -> Self {
        let mut fields = Vec::new();
        let mut unsupported = Vec::new();
        let mut primary_keys = Vec::new();
        for meta in &def.columns {
            if meta.primary_key {
                primary_keys.push(meta.field.clone());
            }
            match build(meta) {
                Some(field) => fields.push(field),
                None => {
                    tracing::warn!(
                        collection = %def.name,
                        field = %meta.field,
                        "Skipping column with unsupported type"
                    );
                    unsupported.push((meta.field.clone(), native_type_name(&meta.column_type)));
                }
            }
        }
        Self {
            name: def.name,
            table: def.table,
            fields,
            unsupported,
            primary_keys,
            search_fields: def.search_fields,
            associations: def.associations,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.column_name == column)
    }

    /// Field usable in a query, telling unsupported columns apart from unknown names
    pub fn lookup_field(&self, name: &str) -> Result<&FieldDescriptor, QueryError> {
        if let Some(field) = self.field(name) {
            return Ok(field);
        }
        match self.unsupported.iter().find(|(field, _)| field == name) {
            Some((field, native_type)) => Err(QueryError::UnsupportedFieldType {
                collection: self.name.clone(),
                field: field.clone(),
                native_type: native_type.clone(),
            }),
            None => Err(QueryError::unknown_field(&self.name, name)),
        }
    }

    pub fn association(&self, name: &str) -> Result<&Association, QueryError> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| QueryError::UnknownAssociation {
                collection: self.name.clone(),
                association: name.to_string(),
            })
    }

    #[must_use]
    pub fn is_composite_primary(&self) -> bool {
        self.primary_keys.len() > 1
    }

    #[must_use]
    pub fn id_field(&self) -> &str {
        match self.primary_keys.as_slice() {
            [single] => single,
            _ => COMPOSITE_ID_FIELD,
        }
    }

    /// Descriptors of the primary key fields, in declaration order
    #[must_use]
    pub fn primary_key_fields(&self) -> Vec<&FieldDescriptor> {
        self.primary_keys
            .iter()
            .filter_map(|name| self.field(name))
            .collect()
    }

    /// Fields a free-text search runs against: the declared search fields,
    /// else every search-eligible field
    #[must_use]
    pub fn search_candidates(&self) -> Vec<&FieldDescriptor> {
        match &self.search_fields {
            Some(names) => names.iter().filter_map(|name| self.field(name)).collect(),
            None => self
                .fields
                .iter()
                .filter(|f| f.semantic_type.is_searchable())
                .collect(),
        }
    }

    /// Client-facing schema of the collection. Association fields carry the
    /// type of the target's key.
    #[must_use]
    pub fn schema(&self, registry: &CollectionRegistry) -> CollectionSchema {
        let mut fields: Vec<FieldSchema> = self.fields.iter().map(FieldSchema::from).collect();
        for association in &self.associations {
            let target = registry.get(&association.target).ok();
            let key_type = target
                .and_then(|t| t.primary_key_fields().first().map(|f| f.semantic_type))
                .unwrap_or(SemanticType::Number);
            let (field_type, reference) = match association.kind {
                AssociationKind::HasMany => (FieldTypeRepr::List(vec![key_type]), None),
                AssociationKind::BelongsTo | AssociationKind::HasOne => {
                    let id_field = target.map_or("id", Collection::id_field);
                    (
                        FieldTypeRepr::Scalar(key_type),
                        Some(format!("{}.{id_field}", association.target)),
                    )
                }
            };
            fields.push(FieldSchema {
                field: association.name.clone(),
                field_type,
                references: reference,
                ..FieldSchema::default()
            });
        }
        CollectionSchema {
            name: self.name.clone(),
            id_field: self.id_field().to_string(),
            primary_keys: self.primary_keys.clone(),
            is_composite_primary: self.is_composite_primary(),
            search_fields: self.search_fields.clone(),
            fields,
        }
    }
}

/// Type of a schema field: scalar, or a list for has-many references
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum FieldTypeRepr {
    Scalar(SemanticType),
    List(Vec<SemanticType>),
}

impl Default for FieldTypeRepr {
    fn default() -> Self {
        Self::Scalar(SemanticType::String)
    }
}

/// Field entry of a collection schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldTypeRepr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enums: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub default_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validations: Option<Vec<Validation>>,
}

impl From<&FieldDescriptor> for FieldSchema {
    fn from(field: &FieldDescriptor) -> Self {
        Self {
            field: field.name.clone(),
            field_type: FieldTypeRepr::Scalar(field.semantic_type),
            column_name: (field.column_name != field.name).then(|| field.column_name.clone()),
            primary_key: field.is_primary_key,
            enums: field.enum_values.clone(),
            is_required: field.is_required.then_some(true),
            default_value: match &field.default_value {
                DefaultValueKind::Static(value) => Some(value.clone()),
                DefaultValueKind::Dynamic | DefaultValueKind::None => None,
            },
            references: None,
            validations: (!field.validations.is_empty()).then(|| field.validations.clone()),
        }
    }
}

/// Schema of one collection as consumed by the admin UI
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: String,
    pub id_field: String,
    pub primary_keys: Vec<String>,
    pub is_composite_primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<Vec<String>>,
    pub fields: Vec<FieldSchema>,
}
