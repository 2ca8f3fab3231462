use std::collections::HashMap;
use std::sync::Arc;

use aqb_common::{CompileError, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// HyperLogLog configuration for a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HllConfig {
    /// Whether the column stores pre-built HLL sketch values.
    #[serde(default, rename = "isHLLColumn")]
    pub is_hll_column: bool,
}

/// One column of a table as recorded by the metastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Soft-deleted columns stay in the schema for id stability but cannot
    /// be referenced by new queries.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, rename = "hllConfig")]
    pub hll_config: HllConfig,
}

impl Column {
    /// A live (non-deleted, non-HLL) column of the given type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            deleted: false,
            hll_config: HllConfig::default(),
        }
    }

    /// Marks the column deleted.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Marks the column as an HLL sketch column.
    pub fn hll(mut self) -> Self {
        self.hll_config.is_hll_column = true;
        self
    }
}

/// Bidirectional enum dictionary for a string-dictionary column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumDict {
    /// Case value to stored integer.
    pub dict: HashMap<String, i64>,
    /// Stored integer (as index) back to case value.
    pub reverse_dict: Vec<String>,
}

impl EnumDict {
    /// Builds a dictionary from cases in storage order.
    pub fn from_cases<S: AsRef<str>>(cases: &[S]) -> Self {
        let reverse_dict: Vec<String> = cases.iter().map(|c| c.as_ref().to_string()).collect();
        let dict = reverse_dict
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as i64))
            .collect();
        Self { dict, reverse_dict }
    }
}

/// In-memory schema of one table, as seen by the broker.
///
/// `column_ids` is derived from the column list; ids are positional and
/// stable because deleted columns are kept in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub column_ids: HashMap<String, usize>,
    pub enum_dicts: HashMap<String, Arc<EnumDict>>,
}

impl TableSchema {
    /// Builds a schema, deriving the name-to-id map from `columns`.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let column_ids = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            name: name.into(),
            columns,
            column_ids,
            enum_dicts: HashMap::new(),
        }
    }

    /// Attaches an enum dictionary to a column.
    pub fn with_enum_dict(mut self, column: impl Into<String>, dict: EnumDict) -> Self {
        self.enum_dicts.insert(column.into(), Arc::new(dict));
        self
    }

    /// Storage type of a column by id.
    pub fn value_type(&self, column_id: usize) -> Option<&DataType> {
        self.columns.get(column_id).map(|c| &c.data_type)
    }
}

/// Shared, lock-guarded handle to one live table schema.
pub type SharedSchema = Arc<RwLock<TableSchema>>;

/// A consistent read view over the schema registry, held for the duration
/// of binding. Dropping it releases the registry lock.
pub trait SchemaSnapshot {
    /// Looks up the shared handle for a table by name.
    fn get_schema(&self, name: &str) -> Result<SharedSchema>;
}

/// Read access to live table schemas.
///
/// The binder acquires one snapshot per compilation, resolves every table
/// through it, and drops it when binding completes.
pub trait SchemaReader: Send + Sync {
    /// Opens a read view over the current table set.
    fn snapshot(&self) -> Box<dyn SchemaSnapshot + '_>;
}

/// The live schema store: table name to shared schema handle.
///
/// Schema mutation (by the metastore listener) takes the registry write
/// lock to add or drop tables and each schema's own write lock to alter it;
/// query compilation only ever takes the read sides.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<HashMap<String, SharedSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a table schema.
    pub fn register_table(&self, schema: TableSchema) {
        self.tables
            .write()
            .insert(schema.name.clone(), Arc::new(RwLock::new(schema)));
    }

    /// Removes a table, returning whether it was present.
    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.write().remove(name).is_some()
    }

    /// Shared handle for a table, outside of any snapshot.
    pub fn get(&self, name: &str) -> Result<SharedSchema> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownTable(name.to_string()))
    }
}

struct RegistrySnapshot<'a> {
    tables: RwLockReadGuard<'a, HashMap<String, SharedSchema>>,
}

impl SchemaSnapshot for RegistrySnapshot<'_> {
    fn get_schema(&self, name: &str) -> Result<SharedSchema> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownTable(name.to_string()))
    }
}

impl SchemaReader for SchemaRegistry {
    fn snapshot(&self) -> Box<dyn SchemaSnapshot + '_> {
        Box::new(RegistrySnapshot {
            tables: self.tables.read(),
        })
    }
}
