//! Procedural macros for async-sqlmodel.
//!
//! `async-sqlmodel-macros` is the **compile-time codegen layer**. It turns Rust
//! structs into fully described SQL models with awaitable attribute accessors.
//!
//! # Role In The Architecture
//!
//! - **Model metadata**: `#[derive(Model)]` produces a `Model` implementation
//!   with table/column metadata consumed by the session layer.
//! - **Awaitable accessors**: `#[async_model]` strips `Awaitable<T>` marker
//!   fields before the derive sees them, records them in the model's awaitable
//!   registry, and generates one accessor method per marker.
//!
//! These macros are used by application crates via the `async-sqlmodel` facade.

use proc_macro::TokenStream;
use syn::ext::IdentExt;

mod infer;
mod parse;
mod validate;

use parse::{ModelDef, RelationshipKindAttr, parse_model};

/// Derive macro for the `Model` trait.
///
/// This macro generates implementations for:
/// - Table name and primary key metadata
/// - Field information (including validation constraints)
/// - Row conversion (to_row, from_row)
/// - Primary key access
///
/// # Attributes
///
/// - `#[sqlmodel(table)]` / `#[sqlmodel(table = "name")]` - Table model; the
///   name defaults to the pluralized snake_case struct name
/// - `#[sqlmodel(primary_key)]` - Mark field as primary key
/// - `#[sqlmodel(column = "name")]` - Override column name
/// - `#[sqlmodel(nullable)]` - Mark field as nullable
/// - `#[sqlmodel(unique)]` - Add unique constraint
/// - `#[sqlmodel(foreign_key = "table.column")]` - Add foreign key reference
/// - `#[sqlmodel(min_length = N)]` / `#[sqlmodel(max_length = N)]` /
///   `#[sqlmodel(pattern = "regex")]` - Validation constraints
/// - `#[sqlmodel(skip)]` - Skip this field in database operations
/// - `#[sqlmodel(relationship(model = "Model", foreign_key = "col"))]` -
///   Declare a relationship field by its target model name (use
///   `remote_key` for one-to-many)
///
/// # Example
///
/// ```ignore
/// use async_sqlmodel::Model;
///
/// #[derive(Model, Debug, Clone)]
/// #[sqlmodel(table = "heroes")]
/// struct Hero {
///     #[sqlmodel(primary_key)]
///     id: Option<i64>,
///
///     #[sqlmodel(unique)]
///     name: String,
///
///     secret_name: String,
///
///     #[sqlmodel(nullable)]
///     age: Option<i32>,
///
///     #[sqlmodel(foreign_key = "teams.id")]
///     team_id: Option<i64>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(sqlmodel))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_model(&model) {
        return e.to_compile_error().into();
    }

    generate_model_impl(&model).into()
}

/// Attribute macro that turns `Awaitable<T>` marker fields into awaitable
/// accessor methods.
///
/// Apply it **above** `#[derive(Model)]`. Every field typed `Awaitable<T>`
/// and tagged `#[awaitable(field = "target")]` is removed from the struct
/// before the derive runs, so markers never become columns. For each marker
/// the macro generates:
///
/// - an entry in the model's awaitable registry (`AsyncModel::AWAITABLE_FIELDS`)
/// - an accessor `fn <marker_name><S>(&self, cx, session: &S) -> BridgeFuture<T>`
///   that reads `target` through the session's execution bridge
///
/// If `target` names a field with `#[sqlmodel(relationship(...))]`, the
/// accessor loads the related objects; otherwise it reads the column
/// attribute, refreshing the object first when it is expired. A target that
/// names nothing compiles fine and fails at the first await.
///
/// # Example
///
/// ```ignore
/// use async_sqlmodel::{Awaitable, Model, async_model};
///
/// #[async_model]
/// #[derive(Model, Debug, Clone)]
/// #[sqlmodel(table = "heroes")]
/// struct Hero {
///     #[sqlmodel(primary_key)]
///     id: Option<i64>,
///     name: String,
///
///     #[awaitable(field = "name")]
///     awaitable_name: Awaitable<String>,
/// }
///
/// // hero.awaitable_name(&cx, &session).await? == hero's current name,
/// // even after commit expired the instance.
/// ```
#[proc_macro_attribute]
pub fn async_model(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "async_model takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let input = syn::parse_macro_input!(item as syn::ItemStruct);

    let def = match parse::parse_async_model(&input) {
        Ok(d) => d,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_async_model(&def) {
        return e.to_compile_error().into();
    }

    generate_async_model(&def).into()
}

/// Generate the stripped struct plus the AsyncModel impl and accessor
/// methods.
fn generate_async_model(def: &parse::AsyncModelDef) -> proc_macro2::TokenStream {
    let stripped = &def.stripped;
    let name = &stripped.ident;
    let (impl_generics, ty_generics, where_clause) = stripped.generics.split_for_impl();

    let registry_entries: Vec<_> = def
        .awaitables
        .iter()
        .map(|a| {
            let method = a.method.to_string();
            let target = &a.target;
            quote::quote! {
                async_sqlmodel_core::AwaitableFieldInfo::new(#method, #target)
            }
        })
        .collect();

    // One method per marker, each with its own target literal baked in.
    let accessors: Vec<_> = def
        .awaitables
        .iter()
        .map(|a| {
            let method = &a.method;
            let target = &a.target;
            let inner_ty = &a.inner_ty;
            let doc = format!(
                "Awaitable read of `{target}`. Resolves through the session's \
                 execution bridge, refreshing this object from the database if needed."
            );
            let body = if a.is_relationship {
                quote::quote! {
                    session.read_related::<#inner_ty>(
                        cx,
                        async_sqlmodel_core::Model::primary_key_value(self),
                        #target,
                    )
                }
            } else {
                quote::quote! {
                    session.read_attribute::<#inner_ty>(
                        cx,
                        async_sqlmodel_core::Model::primary_key_value(self),
                        #target,
                    )
                }
            };
            quote::quote! {
                #[doc = #doc]
                pub fn #method<S>(
                    &self,
                    cx: &async_sqlmodel_core::Cx,
                    session: &S,
                ) -> async_sqlmodel_core::BridgeFuture<#inner_ty>
                where
                    S: async_sqlmodel_core::AwaitableRead<Self>,
                {
                    #body
                }
            }
        })
        .collect();

    quote::quote! {
        #stripped

        impl #impl_generics async_sqlmodel_core::AsyncModel for #name #ty_generics #where_clause {
            const AWAITABLE_FIELDS: &'static [async_sqlmodel_core::AwaitableFieldInfo] = &[
                #(#registry_entries),*
            ];
        }

        impl #impl_generics #name #ty_generics #where_clause {
            #(#accessors)*
        }
    }
}

/// Generate the Model trait implementation from a parsed model definition.
fn generate_model_impl(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let table_name = &model.table_name;
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    // Collect primary key column names; default to "id" if such a field exists.
    let pk_columns: Vec<&str> = model
        .primary_key_fields()
        .iter()
        .map(|f| f.column_name.as_str())
        .collect();
    let pk_slice = if pk_columns.is_empty() {
        let has_id_field = model.fields.iter().any(|f| f.name == "id" && !f.skip);
        if has_id_field {
            quote::quote! { &["id"] }
        } else {
            quote::quote! { &[] }
        }
    } else {
        quote::quote! { &[#(#pk_columns),*] }
    };

    let field_infos = generate_field_infos(model);
    let relationships = generate_relationships(model);
    let to_row_body = generate_to_row(model);
    let from_row_body = generate_from_row(model);
    let pk_value_body = generate_primary_key_value(model);
    let is_new_body = generate_is_new(model);
    let model_config_body = generate_model_config(model);

    quote::quote! {
        impl #impl_generics async_sqlmodel_core::Model for #name #ty_generics #where_clause {
            const TABLE_NAME: &'static str = #table_name;
            const PRIMARY_KEY: &'static [&'static str] = #pk_slice;
            const RELATIONSHIPS: &'static [async_sqlmodel_core::RelationshipInfo] = #relationships;

            fn fields() -> &'static [async_sqlmodel_core::FieldInfo] {
                static FIELDS: &[async_sqlmodel_core::FieldInfo] = &[
                    #field_infos
                ];
                FIELDS
            }

            fn to_row(&self) -> Vec<(&'static str, async_sqlmodel_core::Value)> {
                #to_row_body
            }

            fn from_row(row: &async_sqlmodel_core::Row) -> async_sqlmodel_core::Result<Self> {
                #from_row_body
            }

            fn primary_key_value(&self) -> Vec<async_sqlmodel_core::Value> {
                #pk_value_body
            }

            fn is_new(&self) -> bool {
                #is_new_body
            }

            fn model_config() -> async_sqlmodel_core::ModelConfig {
                #model_config_body
            }
        }
    }
}

/// Generate the static FieldInfo array contents.
fn generate_field_infos(model: &ModelDef) -> proc_macro2::TokenStream {
    let mut field_ts = Vec::new();

    for field in model.select_fields() {
        let field_ident = field.name.unraw();
        let column_name = &field.column_name;
        let nullable = field.nullable;
        let primary_key = field.primary_key;
        let unique = field.unique;

        let sql_type_ts = infer::infer_sql_type(&field.ty);

        let fk_call = if let Some(fk) = &field.foreign_key {
            quote::quote! { .foreign_key(#fk) }
        } else {
            quote::quote! {}
        };

        let min_length_call = if let Some(min) = field.min_length {
            quote::quote! { .min_length(#min) }
        } else {
            quote::quote! {}
        };

        let max_length_call = if let Some(max) = field.max_length {
            quote::quote! { .max_length(#max) }
        } else {
            quote::quote! {}
        };

        let pattern_call = if let Some(pattern) = &field.pattern {
            quote::quote! { .pattern(#pattern) }
        } else {
            quote::quote! {}
        };

        field_ts.push(quote::quote! {
            async_sqlmodel_core::FieldInfo::new(stringify!(#field_ident), #column_name, #sql_type_ts)
                .nullable(#nullable)
                .primary_key(#primary_key)
                .unique(#unique)
                #fk_call
                #min_length_call
                #max_length_call
                #pattern_call
        });
    }

    quote::quote! { #(#field_ts),* }
}

/// Generate the RELATIONSHIPS constant.
fn generate_relationships(model: &ModelDef) -> proc_macro2::TokenStream {
    let relationship_fields = model.relationship_fields();

    if relationship_fields.is_empty() {
        return quote::quote! { &[] };
    }

    let mut relationship_ts = Vec::new();

    for field in relationship_fields {
        let Some(rel) = field.relationship.as_ref() else {
            continue;
        };
        let field_name = field.name.to_string();
        // `model` names the related struct; its table name follows the same
        // derivation as the target's own default.
        let related_table = parse::derive_table_name(&rel.model);

        let kind_ts = match rel.kind {
            RelationshipKindAttr::ManyToOne => {
                quote::quote! { async_sqlmodel_core::RelationshipKind::ManyToOne }
            }
            RelationshipKindAttr::OneToMany => {
                quote::quote! { async_sqlmodel_core::RelationshipKind::OneToMany }
            }
        };

        let local_key_call = if let Some(fk) = &rel.foreign_key {
            quote::quote! { .local_key(#fk) }
        } else {
            quote::quote! {}
        };

        let remote_key_call = if let Some(rk) = &rel.remote_key {
            quote::quote! { .remote_key(#rk) }
        } else {
            quote::quote! {}
        };

        let back_populates_call = if let Some(bp) = &rel.back_populates {
            quote::quote! { .back_populates(#bp) }
        } else {
            quote::quote! {}
        };

        relationship_ts.push(quote::quote! {
            async_sqlmodel_core::RelationshipInfo::new(#field_name, #related_table, #kind_ts)
                #local_key_call
                #remote_key_call
                #back_populates_call
        });
    }

    quote::quote! { &[#(#relationship_ts),*] }
}

/// Generate the to_row method body.
fn generate_to_row(model: &ModelDef) -> proc_macro2::TokenStream {
    let mut conversions = Vec::new();

    for field in model.select_fields() {
        let field_name = &field.name;
        let column_name = &field.column_name;

        if parse::is_option_type(&field.ty) {
            conversions.push(quote::quote! {
                (#column_name, match &self.#field_name {
                    Some(v) => async_sqlmodel_core::Value::from(v.clone()),
                    None => async_sqlmodel_core::Value::Null,
                })
            });
        } else {
            conversions.push(quote::quote! {
                (#column_name, async_sqlmodel_core::Value::from(self.#field_name.clone()))
            });
        }
    }

    quote::quote! {
        vec![#(#conversions),*]
    }
}

/// Generate the from_row method body.
fn generate_from_row(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let mut field_extractions = Vec::new();

    for field in model.select_fields() {
        let field_name = &field.name;
        let column_name = &field.column_name;

        if parse::is_option_type(&field.ty) {
            // For Option<T> fields, handle NULL and missing columns gracefully
            field_extractions.push(quote::quote! {
                #field_name: row.get_named(#column_name).ok()
            });
        } else {
            // For required fields, propagate errors
            field_extractions.push(quote::quote! {
                #field_name: row.get_named(#column_name)?
            });
        }
    }

    // Skipped and relationship fields are not in the DB row
    let defaulted_fields: Vec<_> = model
        .fields
        .iter()
        .filter(|f| f.skip || f.relationship.is_some())
        .map(|f| {
            let field_name = &f.name;
            quote::quote! { #field_name: Default::default() }
        })
        .collect();

    quote::quote! {
        Ok(#name {
            #(#field_extractions,)*
            #(#defaulted_fields,)*
        })
    }
}

/// Generate the primary_key_value method body.
fn generate_primary_key_value(model: &ModelDef) -> proc_macro2::TokenStream {
    let mut pk_fields = model.primary_key_fields();

    if pk_fields.is_empty() {
        // Fall back to an "id" field if one exists
        if let Some(id_field) = model.fields.iter().find(|f| f.name == "id" && !f.skip) {
            pk_fields.push(id_field);
        } else {
            return quote::quote! { vec![] };
        }
    }

    let mut value_exprs = Vec::new();
    for field in pk_fields {
        let field_name = &field.name;
        if parse::is_option_type(&field.ty) {
            value_exprs.push(quote::quote! {
                match &self.#field_name {
                    Some(v) => async_sqlmodel_core::Value::from(v.clone()),
                    None => async_sqlmodel_core::Value::Null,
                }
            });
        } else {
            value_exprs.push(quote::quote! {
                async_sqlmodel_core::Value::from(self.#field_name.clone())
            });
        }
    }

    quote::quote! {
        vec![#(#value_exprs),*]
    }
}

/// Generate the is_new method body.
fn generate_is_new(model: &ModelDef) -> proc_macro2::TokenStream {
    // An Option<T> primary key that is None means not yet persisted.
    for field in model.primary_key_fields() {
        if parse::is_option_type(&field.ty) {
            let field_name = &field.name;
            return quote::quote! {
                self.#field_name.is_none()
            };
        }
    }

    if let Some(id_field) = model.fields.iter().find(|f| f.name == "id") {
        if parse::is_option_type(&id_field.ty) {
            return quote::quote! {
                self.id.is_none()
            };
        }
    }

    // Cannot determine; treat as new.
    quote::quote! { true }
}

/// Generate the model_config method body.
fn generate_model_config(model: &ModelDef) -> proc_macro2::TokenStream {
    if model.config.table {
        quote::quote! { async_sqlmodel_core::ModelConfig::table() }
    } else {
        quote::quote! { async_sqlmodel_core::ModelConfig::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn relationship_table_derives_from_model_name() {
        let input: syn::DeriveInput = parse_quote! {
            struct Hero {
                #[sqlmodel(primary_key)]
                id: Option<i64>,
                name: String,
                team_id: Option<i64>,
                #[sqlmodel(skip, relationship(model = "Team", foreign_key = "team_id"))]
                team: Option<Team>,
            }
        };
        let model = parse_model(&input).unwrap();

        let tokens = generate_relationships(&model).to_string();
        assert!(tokens.contains("\"teams\""));
        assert!(!tokens.contains("\"Team\""));
    }
}
