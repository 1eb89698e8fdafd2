//! Process-wide collection registry.
//!
//! Built once at startup, validated, then shared read-only behind an [`Arc`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::collection::{AssociationKind, Collection, CollectionDef, CollectionSchema};
use crate::errors::QueryError;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    defs: Vec<CollectionDef>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn collection(mut self, def: CollectionDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Validate every declaration and freeze the registry.
    ///
    /// # Errors
    ///
    /// [`QueryError::InvalidRegistry`] when a collection is declared twice, has
    /// no primary key, configures an undeclared column, declares a search
    /// field that is missing or not search-eligible, or has an association
    /// whose target or foreign key cannot be resolved.
    pub fn build(self) -> Result<Arc<CollectionRegistry>, QueryError> {
        let mut collections = BTreeMap::new();
        for def in self.defs {
            if let Some(field) = def.undeclared.first() {
                return Err(QueryError::invalid_registry(format!(
                    "collection '{}' configures undeclared column '{field}'",
                    def.name
                )));
            }
            let collection = Collection::from_def(def);
            if collection.primary_keys.is_empty() {
                return Err(QueryError::invalid_registry(format!(
                    "collection '{}' has no primary key",
                    collection.name
                )));
            }
            validate_search_fields(&collection)?;
            if collections.contains_key(&collection.name) {
                return Err(QueryError::invalid_registry(format!(
                    "collection '{}' is declared twice",
                    collection.name
                )));
            }
            collections.insert(collection.name.clone(), collection);
        }

        let registry = CollectionRegistry { collections };
        for collection in registry.collections.values() {
            registry.validate_associations(collection)?;
        }
        tracing::info!(
            collections = registry.collections.len(),
            "Collection registry ready"
        );
        Ok(Arc::new(registry))
    }
}

fn validate_search_fields(collection: &Collection) -> Result<(), QueryError> {
    let Some(names) = &collection.search_fields else {
        return Ok(());
    };
    for name in names {
        let field = collection.field(name).ok_or_else(|| {
            QueryError::invalid_registry(format!(
                "search field '{name}' is not a supported field of '{}'",
                collection.name
            ))
        })?;
        if !field.semantic_type.is_searchable() {
            return Err(QueryError::invalid_registry(format!(
                "search field '{}.{name}' has type {} which cannot be searched",
                collection.name, field.semantic_type
            )));
        }
    }
    Ok(())
}

/// Read-only set of collections shared by every request
#[derive(Debug)]
pub struct CollectionRegistry {
    collections: BTreeMap<String, Collection>,
}

impl CollectionRegistry {
    pub fn get(&self, name: &str) -> Result<&Collection, QueryError> {
        self.collections
            .get(name)
            .ok_or_else(|| QueryError::UnknownCollection {
                collection: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    /// Schemas of every collection, ordered by name
    #[must_use]
    pub fn schemas(&self) -> Vec<CollectionSchema> {
        self.iter().map(|c| c.schema(self)).collect()
    }

    fn validate_associations(&self, collection: &Collection) -> Result<(), QueryError> {
        for association in &collection.associations {
            let target = self.get(&association.target).map_err(|_| {
                QueryError::invalid_registry(format!(
                    "association '{}.{}' targets unknown collection '{}'",
                    collection.name, association.name, association.target
                ))
            })?;
            // The key joined against must be a single column
            let (owner, referenced) = match association.kind {
                AssociationKind::BelongsTo => (collection, target),
                AssociationKind::HasOne | AssociationKind::HasMany => (target, collection),
            };
            if referenced.is_composite_primary() {
                return Err(QueryError::invalid_registry(format!(
                    "association '{}.{}' references composite key of '{}'",
                    collection.name, association.name, referenced.name
                )));
            }
            if owner.field_by_column(&association.foreign_key).is_none() {
                return Err(QueryError::invalid_registry(format!(
                    "association '{}.{}' uses unknown foreign key '{}.{}'",
                    collection.name, association.name, owner.name, association.foreign_key
                )));
            }
        }
        Ok(())
    }
}
