pub mod config;
pub mod errors;
pub mod filtering;
pub mod models;
pub mod operations;
pub mod schema;

pub use config::AdapterConfig;
pub use errors::QueryError;
pub use models::{FilterSpec, QueryParams, StatRequest};
pub use operations::{
    HasManyGetter, LineStatGetter, PieStatGetter, ResourceGetter, ResourcesGetter,
    StorageExecutor,
};
pub use schema::{CollectionDef, CollectionRegistry, ColumnMeta, RegistryBuilder};
pub use serde_with;
