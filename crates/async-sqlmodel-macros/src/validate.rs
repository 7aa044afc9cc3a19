//! Compile-time validation for the Model derive and `#[async_model]`.
//!
//! Validations report multiple problems at once rather than failing on the
//! first. Note that awaitable targets are deliberately NOT resolved here:
//! a marker pointing at a nonexistent attribute compiles fine and fails at
//! the first await with an attribute-lookup error.

use std::collections::HashSet;

use proc_macro2::Span;
use syn::Error;

use crate::parse::{AsyncModelDef, FieldDef, ModelDef, RelationshipKindAttr};

/// Validate a parsed model definition.
pub fn validate_model(model: &ModelDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    validate_has_fields(model, &mut errors);
    validate_table_name(&model.table_name, model.name.span(), &mut errors);
    validate_no_duplicate_columns(model, &mut errors);

    for field in &model.fields {
        validate_field(field, &mut errors);
    }

    combine(errors)
}

/// Validate the awaitable declarations of an `#[async_model]` struct.
pub fn validate_async_model(def: &AsyncModelDef) -> Result<(), Error> {
    let mut errors = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for awaitable in &def.awaitables {
        let name = awaitable.method.to_string();
        if !seen.insert(name.clone()) {
            errors.push(Error::new(
                awaitable.method.span(),
                format!("duplicate awaitable accessor '{name}'"),
            ));
        }
        if def.remaining_field_names.iter().any(|f| *f == name) {
            errors.push(Error::new(
                awaitable.method.span(),
                format!("awaitable accessor '{name}' collides with a field of the same name"),
            ));
        }
    }

    combine(errors)
}

fn combine(mut errors: Vec<Error>) -> Result<(), Error> {
    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

/// Validate that the struct has at least one field.
fn validate_has_fields(model: &ModelDef, errors: &mut Vec<Error>) {
    if model.fields.is_empty() {
        errors.push(Error::new(
            model.name.span(),
            "Model struct must have at least one field",
        ));
    }
}

/// Validate that the table name doesn't contain SQL injection characters.
fn validate_table_name(table_name: &str, span: Span, errors: &mut Vec<Error>) {
    const DANGEROUS_CHARS: &[char] = &[';', '\'', '"', '`', '-', '/', '*', '\\', '\0', '\n', '\r'];

    for ch in table_name.chars() {
        if DANGEROUS_CHARS.contains(&ch) {
            errors.push(Error::new(
                span,
                format!(
                    "table name contains invalid character '{ch}'; \
                     table names should only contain alphanumeric characters and underscores"
                ),
            ));
            return;
        }
    }

    if table_name.trim().is_empty() {
        errors.push(Error::new(span, "table name cannot be empty or whitespace"));
    }

    if let Some(first) = table_name.chars().next() {
        if !first.is_alphabetic() && first != '_' {
            errors.push(Error::new(
                span,
                format!("table name must start with a letter or underscore, got '{first}'"),
            ));
        }
    }
}

/// Validate that no two non-skipped fields map to the same column name.
fn validate_no_duplicate_columns(model: &ModelDef, errors: &mut Vec<Error>) {
    let mut seen_columns: HashSet<&str> = HashSet::new();

    for field in &model.fields {
        if field.skip || field.relationship.is_some() {
            continue;
        }
        if !seen_columns.insert(field.column_name.as_str()) {
            errors.push(Error::new(
                field.name.span(),
                format!("duplicate column name '{}'", field.column_name),
            ));
        }
    }
}

/// Field-level validations.
fn validate_field(field: &FieldDef, errors: &mut Vec<Error>) {
    if field.skip && field.primary_key {
        errors.push(Error::new(
            field.name.span(),
            "a skipped field cannot be the primary key",
        ));
    }

    if let (Some(min), Some(max)) = (field.min_length, field.max_length) {
        if min > max {
            errors.push(Error::new(
                field.name.span(),
                format!("min_length ({min}) is greater than max_length ({max})"),
            ));
        }
    }

    if let Some(rel) = &field.relationship {
        match rel.kind {
            RelationshipKindAttr::ManyToOne => {
                if rel.foreign_key.is_none() {
                    errors.push(Error::new(
                        field.name.span(),
                        "many-to-one relationship requires foreign_key = \"local_column\"",
                    ));
                }
            }
            RelationshipKindAttr::OneToMany => {
                if rel.remote_key.is_none() {
                    errors.push(Error::new(
                        field.name.span(),
                        "one-to-many relationship requires remote_key = \"remote_column\"",
                    ));
                }
            }
        }
        if field.primary_key {
            errors.push(Error::new(
                field.name.span(),
                "a relationship field cannot be the primary key",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_async_model, parse_model};
    use syn::parse_quote;

    #[test]
    fn duplicate_columns_are_rejected() {
        let input: syn::DeriveInput = parse_quote! {
            struct Bad {
                #[sqlmodel(column = "name")]
                a: String,
                name: String,
            }
        };
        let model = parse_model(&input).unwrap();
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn accessor_collision_with_field_is_rejected() {
        let item: syn::ItemStruct = parse_quote! {
            struct Hero {
                id: Option<i64>,
                name: String,
                #[awaitable(field = "secret_name")]
                name_marker: Awaitable<String>,
            }
        };
        let mut def = parse_async_model(&item).unwrap();
        // Simulate a marker whose accessor shadows an ordinary field.
        def.awaitables[0].method = syn::Ident::new("name", proc_macro2::Span::call_site());
        assert!(validate_async_model(&def).is_err());
    }

    #[test]
    fn one_to_many_requires_remote_key() {
        let input: syn::DeriveInput = parse_quote! {
            struct Team {
                id: Option<i64>,
                #[sqlmodel(skip, relationship(model = "heroes"))]
                heroes: Vec<Hero>,
            }
        };
        let model = parse_model(&input).unwrap();
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn unresolved_awaitable_target_is_accepted() {
        let item: syn::ItemStruct = parse_quote! {
            struct Hero {
                id: Option<i64>,
                name: String,
                #[awaitable(field = "no_such_field")]
                awaitable_ghost: Awaitable<String>,
            }
        };
        let def = parse_async_model(&item).unwrap();
        assert!(validate_async_model(&def).is_ok());
    }
}
