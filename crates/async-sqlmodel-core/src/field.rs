//! Field and column metadata.

use crate::types::SqlType;

/// Metadata about a model field/column.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is a primary key
    pub primary_key: bool,
    /// Whether this field has a unique constraint
    pub unique: bool,
    /// Foreign key reference (table.column)
    pub foreign_key: Option<&'static str>,
    /// Minimum string length constraint
    pub min_length: Option<usize>,
    /// Maximum string length constraint
    pub max_length: Option<usize>,
    /// Regex pattern constraint
    pub pattern: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            unique: false,
            foreign_key: None,
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }

    /// Mark the field as nullable.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Mark the field as (part of) the primary key.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Mark the field as unique.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set a foreign key reference ("table.column").
    pub const fn foreign_key(mut self, target: &'static str) -> Self {
        self.foreign_key = Some(target);
        self
    }

    /// Set a minimum string length constraint.
    pub const fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Set a maximum string length constraint.
    pub const fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set a regex pattern constraint.
    pub const fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Whether any validation constraint is set on this field.
    pub const fn has_constraints(&self) -> bool {
        self.min_length.is_some() || self.max_length.is_some() || self.pattern.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_builder() {
        const FIELD: FieldInfo = FieldInfo::new("team_id", "team_id", SqlType::BigInt)
            .nullable(true)
            .foreign_key("teams.id");

        assert_eq!(FIELD.name, "team_id");
        assert!(FIELD.nullable);
        assert_eq!(FIELD.foreign_key, Some("teams.id"));
        assert!(!FIELD.has_constraints());
    }

    #[test]
    fn constraints_flag() {
        const FIELD: FieldInfo =
            FieldInfo::new("name", "name", SqlType::Text).min_length(1).max_length(64);
        assert!(FIELD.has_constraints());
    }
}
