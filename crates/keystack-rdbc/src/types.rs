//! Value, row and table model
//!
//! Statement arguments and result cells share one [`Value`] type covering the
//! coercions the connector owns: strings, integers, floating point, decimals,
//! byte blobs and NULL.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A statement argument or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean, stored as an integer where the engine has no boolean type
    Bool(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit float
    Float64(f64),
    /// Exact decimal
    Decimal(Decimal),
    /// Text
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether the value is SQL NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Exact integer view of the value
    ///
    /// Decimals, floats and numeric strings convert only when they hold a
    /// whole number inside the `i64` range, so a fractional counter is never
    /// silently truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Decimal(d) => whole_decimal(*d),
            Self::Float64(f) => Decimal::from_f64_retain(*f).and_then(whole_decimal),
            Self::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<Decimal>().ok().and_then(whole_decimal)),
            Self::Null | Self::Bytes(_) => None,
        }
    }

    /// Borrow the text of a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "boolean",
            Self::Int64(_) => "integer",
            Self::Float64(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

fn whole_decimal(d: Decimal) -> Option<i64> {
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    i64 => Int64,
    f64 => Float64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Bytes,
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One result row, cells in select order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Pair column names with their cells
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Number of cells
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no cells
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell by column name, case-insensitive
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Integer cell, `None` when missing, NULL or not a whole number
    pub fn i64_by_name(&self, name: &str) -> Option<i64> {
        self.get_by_name(name).and_then(Value::as_i64)
    }

    /// Text cell, `None` when missing or not a string
    pub fn str_by_name(&self, name: &str) -> Option<&str> {
        self.get_by_name(name).and_then(Value::as_str)
    }

    /// Integer cell that must be present
    ///
    /// A missing column is a schema error; NULL or a non-integral value is a
    /// type conversion error.
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| Error::schema(format!("result has no column '{}'", name)))?;
        value.as_i64().ok_or_else(|| {
            Error::type_conversion(format!(
                "column '{}' holds a {} that is not a 64-bit integer",
                name,
                value.kind()
            ))
        })
    }
}

/// Logical column type, mapped to a native type by each dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean flag
    Boolean,
    /// 64-bit integer
    BigInt,
    /// Double-precision float
    Double,
    /// Exact decimal with `precision` digits, `scale` of them fractional
    Decimal {
        /// Total digits
        precision: u32,
        /// Fractional digits
        scale: u32,
    },
    /// Bounded string
    Varchar(u32),
    /// Unbounded string
    Text,
    /// Binary data
    Blob,
}

/// Column definition used for DDL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// Logical type
    pub column_type: ColumnType,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Auto-increment surrogate primary key
    pub auto_increment_key: bool,
}

impl ColumnMetadata {
    /// Nullable column of `column_type`
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            auto_increment_key: false,
        }
    }

    /// Auto-increment surrogate primary key
    pub fn auto_increment_key(name: impl Into<String>) -> Self {
        Self {
            nullable: false,
            auto_increment_key: true,
            ..Self::new(name, ColumnType::BigInt)
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Table definition used for DDL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    /// Schema (database on MySQL)
    pub schema: Option<String>,
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Table with no columns yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Place the table in `schema`
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a column
    pub fn with_column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Column by name, case-insensitive
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}
