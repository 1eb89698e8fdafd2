//! # Collection Schemas
//!
//! Introspection of storage columns into semantic field descriptors, grouped
//! into collections held by a read-only [`CollectionRegistry`].

pub mod collection;
pub mod field_builder;
pub mod field_type;
pub mod introspection;
pub mod registry;

pub use collection::{
    Association, AssociationKind, COMPOSITE_ID_FIELD, Collection, CollectionDef,
    CollectionSchema, FieldSchema,
};
pub use field_builder::{DefaultValueKind, FieldDescriptor, Validation, ValidationKind};
pub use field_type::{SemanticType, detect};
pub use introspection::{ColumnMeta, Constraint, Constraints, Length, NativeDefault, Pattern};
pub use registry::{CollectionRegistry, RegistryBuilder};
