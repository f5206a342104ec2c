//! Result-set column descriptors.

use crate::protocol::backend::ColumnMetaMsg;

/// Column type codes as reported in result-set metadata.
pub mod column_type {
    pub const SINT: u16 = 1;
    pub const UINT: u16 = 2;
    pub const DOUBLE: u16 = 5;
    pub const FLOAT: u16 = 6;
    pub const BYTES: u16 = 7;
    pub const TIME: u16 = 10;
    pub const DATETIME: u16 = 12;
    pub const SET: u16 = 15;
    pub const ENUM: u16 = 16;
    pub const BIT: u16 = 17;
    pub const DECIMAL: u16 = 18;
}

/// Metadata for one column of a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub type_code: u16,
    pub name: String,
    pub original_name: String,
    pub table: String,
    pub original_table: String,
    pub schema: String,
    pub catalog: String,
    pub collation: Option<u64>,
    pub fractional_digits: u16,
    pub length: u32,
    pub flags: u32,
    pub content_type: Option<u16>,
}

impl Column {
    /// Display name, falling back to the underlying column name.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.original_name
        } else {
            &self.name
        }
    }
}

impl From<ColumnMetaMsg> for Column {
    fn from(meta: ColumnMetaMsg) -> Self {
        Self {
            type_code: meta.type_code,
            name: meta.name,
            original_name: meta.original_name.unwrap_or_default(),
            table: meta.table.unwrap_or_default(),
            original_table: meta.original_table.unwrap_or_default(),
            schema: meta.schema.unwrap_or_default(),
            catalog: meta.catalog.unwrap_or_default(),
            collation: meta.collation,
            fractional_digits: meta.fractional_digits.unwrap_or(0),
            length: meta.length.unwrap_or(0),
            flags: meta.flags.unwrap_or(0),
            content_type: meta.content_type,
        }
    }
}
