use serde::{Deserialize, Serialize};

/// Storage-level column type as recorded by the metastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Float32,
    Uuid,
    GeoPoint,
    GeoShape,
    /// Variable-length array of a fixed element type.
    ArrayOf(Box<DataType>),
}

impl DataType {
    /// Width of one stored value in bytes.
    ///
    /// Booleans occupy a full byte at the dimension layer. Geo shapes are
    /// variable-length and report zero. Arrays report their element width.
    pub fn bytes(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::GeoPoint => 8,
            DataType::Uuid => 16,
            DataType::GeoShape => 0,
            DataType::ArrayOf(elem) => elem.bytes(),
        }
    }

    /// Whether this is an array column type.
    pub fn is_array(&self) -> bool {
        matches!(self, DataType::ArrayOf(_))
    }
}
