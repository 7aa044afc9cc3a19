//! Field constraint validation.

use crate::error::ValidationError;
use crate::model::Model;
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;

/// Check a model instance against the constraints declared on its fields.
///
/// Accumulates every violation instead of stopping at the first one.
pub fn validate_model<M: Model>(model: &M) -> std::result::Result<(), ValidationError> {
    let mut errors = ValidationError::new();
    let values: HashMap<&'static str, Value> = model.to_row().into_iter().collect();

    for field in M::fields() {
        let value = values.get(field.name);
        let is_null = matches!(value, None | Some(Value::Null));

        if is_null {
            if !field.nullable && !field.primary_key {
                errors.add_required(field.name);
            }
            continue;
        }

        if let Some(Value::Text(text)) = value {
            let len = text.chars().count();
            if let Some(min) = field.min_length {
                if len < min {
                    errors.add_min_length(field.name, min, len);
                }
            }
            if let Some(max) = field.max_length {
                if len > max {
                    errors.add_max_length(field.name, max, len);
                }
            }
            if let Some(pattern) = field.pattern {
                if let Ok(re) = Regex::new(pattern) {
                    if !re.is_match(text) {
                        errors.add_pattern(field.name, pattern);
                    }
                }
            }
        }
    }

    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::field::FieldInfo;
    use crate::row::Row;
    use crate::types::SqlType;

    #[derive(Debug, Clone)]
    struct User {
        id: Option<i64>,
        username: String,
        email: Option<String>,
    }

    impl Model for User {
        const TABLE_NAME: &'static str = "users";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];

        fn fields() -> &'static [FieldInfo] {
            const FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", SqlType::BigInt)
                    .primary_key(true)
                    .nullable(true),
                FieldInfo::new("username", "username", SqlType::Text)
                    .min_length(3)
                    .max_length(20),
                FieldInfo::new("email", "email", SqlType::Text)
                    .nullable(true)
                    .pattern(r"^[^@\s]+@[^@\s]+$"),
            ];
            FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.into()),
                ("username", self.username.clone().into()),
                ("email", self.email.clone().into()),
            ]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                username: row.get_named("username")?,
                email: row.get_named("email")?,
            })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![self.id.into()]
        }

        fn is_new(&self) -> bool {
            self.id.is_none()
        }
    }

    #[test]
    fn valid_model_passes() {
        let user = User {
            id: None,
            username: "deadpond".to_string(),
            email: Some("dp@example.com".to_string()),
        };
        assert!(validate_model(&user).is_ok());
    }

    #[test]
    fn violations_accumulate() {
        let user = User {
            id: None,
            username: "dp".to_string(),
            email: Some("not-an-email".to_string()),
        };
        let err = validate_model(&user).unwrap_err();
        assert_eq!(err.errors.len(), 2);
    }

    #[test]
    fn null_non_nullable_field_is_required() {
        #[derive(Debug, Clone)]
        struct Optionalish {
            id: Option<i64>,
            name: Option<String>,
        }

        impl Model for Optionalish {
            const TABLE_NAME: &'static str = "optionalish";
            const PRIMARY_KEY: &'static [&'static str] = &["id"];

            fn fields() -> &'static [FieldInfo] {
                const FIELDS: &[FieldInfo] = &[
                    FieldInfo::new("id", "id", SqlType::BigInt)
                        .primary_key(true)
                        .nullable(true),
                    FieldInfo::new("name", "name", SqlType::Text),
                ];
                FIELDS
            }

            fn to_row(&self) -> Vec<(&'static str, Value)> {
                vec![("id", self.id.into()), ("name", self.name.clone().into())]
            }

            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self {
                    id: row.get_named("id")?,
                    name: row.get_named("name")?,
                })
            }

            fn primary_key_value(&self) -> Vec<Value> {
                vec![self.id.into()]
            }

            fn is_new(&self) -> bool {
                self.id.is_none()
            }
        }

        let obj = Optionalish { id: None, name: None };
        match validate_model(&obj) {
            Err(e) => assert_eq!(e.errors.len(), 1),
            Ok(()) => panic!("expected a required-field violation"),
        }
    }
}
