//! Live table schemas and storage types for the AQB broker tier.
//!
//! Architecture role:
//! - models the metastore's view of tables (columns, enum dictionaries,
//!   HLL configuration, soft deletes)
//! - hosts the lock-guarded [`SchemaRegistry`] that query compilation reads
//!   through the [`SchemaReader`] / [`SchemaSnapshot`] seam
//! - parses geo-point literal text
//!
//! Key modules:
//! - [`types`]
//! - [`schema`]
//! - [`geo`]

pub mod geo;
pub mod schema;
pub mod types;

pub use geo::geo_point_from_string;
pub use schema::{
    Column, EnumDict, HllConfig, SchemaReader, SchemaRegistry, SchemaSnapshot, SharedSchema,
    TableSchema,
};
pub use types::DataType;
