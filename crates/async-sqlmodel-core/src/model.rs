//! Model trait for ORM-style struct mapping.
//!
//! The `Model` trait defines the contract for structs that map to database
//! tables. It is typically derived with `#[derive(Model)]` from
//! `async-sqlmodel-macros`.

use crate::Result;
use crate::field::FieldInfo;
use crate::relationship::RelationshipInfo;
use crate::row::Row;
use crate::value::Value;

/// Model-level configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Whether this model maps to a database table.
    pub table: bool,
}

impl ModelConfig {
    /// Create a new ModelConfig with all defaults.
    pub const fn new() -> Self {
        Self { table: false }
    }

    /// Create a config for a database table model.
    pub const fn table() -> Self {
        Self { table: true }
    }
}

/// Trait for types that can be mapped to database tables.
///
/// This trait provides metadata about the table structure and methods for
/// converting between Rust structs and database rows.
///
/// # Example
///
/// ```ignore
/// use async_sqlmodel::Model;
///
/// #[derive(Model)]
/// #[sqlmodel(table = "heroes")]
/// struct Hero {
///     #[sqlmodel(primary_key)]
///     id: Option<i64>,
///     name: String,
///     secret_name: String,
/// }
/// ```
pub trait Model: Sized + Send + Sync {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Relationship metadata for this model.
    ///
    /// The derive macro populates this for relationship fields; models with
    /// no relationships rely on the default empty slice.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Get field metadata for all columns.
    fn fields() -> &'static [FieldInfo];

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value>;

    /// Check if this is a new record (primary key is None/default).
    fn is_new(&self) -> bool;

    /// Get the model configuration.
    fn model_config() -> ModelConfig {
        ModelConfig::new()
    }
}
