//! Relationship metadata.
//!
//! Relationships are defined at compile time (via the derive macro) and
//! represented as static metadata on each `Model`. Higher layers (the
//! session's lazy loader, the awaitable accessors) use this metadata to
//! generate correct SQL and assemble related objects without runtime
//! reflection.

use crate::model::Model;
use crate::row::Row;
use crate::{Error, Result};

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Many-to-one: many `Hero`s belong to one `Team`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Team` has many `Hero`s.
    OneToMany,
}

/// Metadata about a relationship between models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship field.
    pub name: &'static str,

    /// The related model's table name.
    pub related_table: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Local foreign key column (for ManyToOne).
    /// e.g., `"team_id"` on `Hero`.
    pub local_key: Option<&'static str>,

    /// Remote foreign key column (for OneToMany).
    /// e.g., `"team_id"` on `Hero` when accessed from `Team`.
    pub remote_key: Option<&'static str>,

    /// The field on the related model that points back.
    pub back_populates: Option<&'static str>,
}

impl RelationshipInfo {
    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            kind,
            local_key: None,
            remote_key: None,
            back_populates: None,
        }
    }

    /// Set the local foreign key column.
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Set the remote foreign key column.
    #[must_use]
    pub const fn remote_key(mut self, key: &'static str) -> Self {
        self.remote_key = Some(key);
        self
    }

    /// Set the back-populating field on the related model.
    #[must_use]
    pub const fn back_populates(mut self, field: &'static str) -> Self {
        self.back_populates = Some(field);
        self
    }
}

/// Find a relationship on `M` by field name.
pub fn find_relationship<M: Model>(field_name: &str) -> Option<&'static RelationshipInfo> {
    M::RELATIONSHIPS.iter().find(|r| r.name == field_name)
}

/// Assemble a relationship value from loaded target objects.
///
/// `Option<T>` takes the first object (many-to-one); `Vec<T>` takes them
/// all (one-to-many). This is the seam the awaitable accessors use so the
/// declared field type drives the assembly.
pub trait FromRelated: Sized + Send {
    /// The related model type. The session registers loaded targets in its
    /// identity map, hence the tracking bounds.
    type Target: Model + Clone + Send + Sync + serde::Serialize + 'static;

    /// Build the relationship value from loaded objects.
    fn from_objects(objects: Vec<Self::Target>) -> Self;

    /// Hydrate target objects from raw rows.
    #[allow(clippy::result_large_err)]
    fn targets_from_rows(rows: &[Row]) -> Result<Vec<Self::Target>> {
        rows.iter()
            .map(Self::Target::from_row)
            .collect::<std::result::Result<Vec<_>, Error>>()
    }
}

impl<T: Model + Clone + Send + Sync + serde::Serialize + 'static> FromRelated for Option<T> {
    type Target = T;

    fn from_objects(objects: Vec<T>) -> Self {
        objects.into_iter().next()
    }
}

impl<T: Model + Clone + Send + Sync + serde::Serialize + 'static> FromRelated for Vec<T> {
    type Target = T;

    fn from_objects(objects: Vec<T>) -> Self {
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldInfo, SqlType, Value};

    #[derive(Debug, Clone, PartialEq, serde::Serialize)]
    struct Team {
        id: Option<i64>,
        name: String,
    }

    impl Model for Team {
        const TABLE_NAME: &'static str = "teams";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("name", "name", SqlType::Text),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::from(self.id)),
                ("name", Value::from(self.name.clone())),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
            })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![Value::from(self.id)]
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[derive(Debug)]
    struct Hero;

    impl Model for Hero {
        const TABLE_NAME: &'static str = "heroes";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const RELATIONSHIPS: &'static [RelationshipInfo] =
            &[RelationshipInfo::new("team", "teams", RelationshipKind::ManyToOne)
                .local_key("team_id")
                .back_populates("heroes")];

        fn fields() -> &'static [FieldInfo] {
            &[]
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![]
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Self)
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![Value::Null]
        }

        fn is_new(&self) -> bool {
            true
        }
    }

    #[test]
    fn find_relationship_by_name() {
        let rel = find_relationship::<Hero>("team").expect("relationship");
        assert_eq!(rel.related_table, "teams");
        assert_eq!(rel.local_key, Some("team_id"));
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert!(find_relationship::<Hero>("nope").is_none());
    }

    #[test]
    fn option_assembly_takes_first() {
        let rows = vec![Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::BigInt(1), Value::Text("Preventers".into())],
        )];
        let targets = <Option<Team>>::targets_from_rows(&rows).unwrap();
        let team = <Option<Team>>::from_objects(targets);
        assert_eq!(team.unwrap().name, "Preventers");

        assert_eq!(<Option<Team>>::from_objects(vec![]), None);
    }

    #[test]
    fn vec_assembly_takes_all() {
        let rows = vec![
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::BigInt(1), Value::Text("a".into())],
            ),
            Row::new(
                vec!["id".into(), "name".into()],
                vec![Value::BigInt(2), Value::Text("b".into())],
            ),
        ];
        let targets = <Vec<Team>>::targets_from_rows(&rows).unwrap();
        let teams = <Vec<Team>>::from_objects(targets);
        assert_eq!(teams.len(), 2);
    }
}
