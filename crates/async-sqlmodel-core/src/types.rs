//! SQL column types.

/// SQL column type for field metadata and DDL-ish introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// Boolean
    Boolean,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// 32-bit float
    Real,
    /// 64-bit float
    Double,
    /// Text string
    Text,
    /// Binary data
    Blob,
    /// JSON document
    Json,
}

impl SqlType {
    /// The SQL spelling of this type.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Json => "JSON",
        }
    }
}
