//! Parsing logic for the Model derive and the `#[async_model]` attribute.
//!
//! Extracts struct-level and field-level attributes from the input to build
//! `ModelDef`, `FieldDef`, and `AwaitableDef` structures used for code
//! generation.

use proc_macro2::Span;
use syn::spanned::Spanned;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, Generics, Ident, ItemStruct, Lit, Result,
    Type,
};

/// Model-level configuration parsed from attributes.
#[derive(Debug, Clone, Default)]
pub struct ModelConfigParsed {
    /// Whether this model maps to a database table.
    pub table: bool,
}

/// Parsed model definition from a struct with `#[derive(Model)]`.
#[derive(Debug)]
pub struct ModelDef {
    /// The struct name (e.g., `Hero`).
    pub name: Ident,
    /// The SQL table name (e.g., `"heroes"`).
    pub table_name: String,
    /// Parsed field definitions.
    pub fields: Vec<FieldDef>,
    /// Generic parameters from the struct.
    pub generics: Generics,
    /// Model-level configuration.
    pub config: ModelConfigParsed,
}

/// Parsed field definition from a struct field.
#[derive(Debug)]
pub struct FieldDef {
    /// The Rust field name (e.g., `secret_name`).
    pub name: Ident,
    /// The SQL column name (defaults to the field name).
    pub column_name: String,
    /// The Rust type of the field.
    pub ty: Type,
    /// Whether the field allows NULL values.
    pub nullable: bool,
    /// Whether this field is (part of) the primary key.
    pub primary_key: bool,
    /// Whether the field has a UNIQUE constraint.
    pub unique: bool,
    /// Foreign key reference (e.g., `"teams.id"`).
    pub foreign_key: Option<String>,
    /// Minimum string length constraint.
    pub min_length: Option<usize>,
    /// Maximum string length constraint.
    pub max_length: Option<usize>,
    /// Regex pattern constraint.
    pub pattern: Option<String>,
    /// Skip this field entirely in database operations.
    pub skip: bool,
    /// Relationship definition (if this is a relationship field).
    pub relationship: Option<RelationshipAttr>,
}

/// Parsed relationship attribute from `#[sqlmodel(relationship(...))]`.
#[derive(Debug, Clone)]
pub struct RelationshipAttr {
    /// Related model's struct name (e.g., "Team").
    pub model: String,
    /// Local FK column (for ManyToOne).
    pub foreign_key: Option<String>,
    /// Remote FK column (for OneToMany).
    pub remote_key: Option<String>,
    /// The field on the related model that points back.
    pub back_populates: Option<String>,
    /// Inferred relationship kind from the field type.
    pub kind: RelationshipKindAttr,
}

/// Relationship kind as detected from field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKindAttr {
    /// Many-to-one (foreign key on this model; field type `Option<T>` or `T`).
    ManyToOne,
    /// One-to-many (foreign key on related model; field type `Vec<T>`).
    OneToMany,
}

impl ModelDef {
    /// Returns the fields that are part of the primary key.
    pub fn primary_key_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    /// Returns fields that map to database columns (SELECT).
    /// Excludes skipped fields and relationship fields.
    pub fn select_fields(&self) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .filter(|f| !f.skip && f.relationship.is_none())
            .collect()
    }

    /// Returns fields that are relationships.
    pub fn relationship_fields(&self) -> Vec<&FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.relationship.is_some())
            .collect()
    }
}

/// Parse a `DeriveInput` into a `ModelDef`.
///
/// # Errors
///
/// Returns an error if:
/// - The input is not a struct with named fields
/// - Unknown attributes are present
/// - Attribute values are invalid
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let generics = input.generics.clone();

    let StructAttrs { table_name, config } = parse_struct_sqlmodel_attrs(&input.attrs, &name)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    Ok(ModelDef {
        name,
        table_name,
        fields,
        generics,
        config,
    })
}

/// Parsed struct-level attributes result.
struct StructAttrs {
    table_name: String,
    config: ModelConfigParsed,
}

/// Parse struct-level `#[sqlmodel(...)]` attributes.
///
/// Supported keys:
/// - `table` (flag: this model maps to a database table)
/// - `table = "name"` (overrides derived table name)
fn parse_struct_sqlmodel_attrs(attrs: &[Attribute], struct_name: &Ident) -> Result<StructAttrs> {
    let mut table_name: Option<String> = None;
    let mut config = ModelConfigParsed::default();

    for attr in attrs {
        if !attr.path().is_ident("sqlmodel") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if meta.input.peek(syn::Token![=]) {
                    let value: Lit = meta.value()?.parse()?;
                    if let Lit::Str(lit_str) = value {
                        if table_name.is_some() {
                            return Err(Error::new_spanned(
                                meta.path,
                                "duplicate sqlmodel attribute: table",
                            ));
                        }
                        table_name = Some(lit_str.value());
                        config.table = true;
                    } else {
                        return Err(Error::new_spanned(
                            value,
                            "expected string literal for table name",
                        ));
                    }
                } else {
                    // Flag form: #[sqlmodel(table)]
                    config.table = true;
                }
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown sqlmodel struct attribute (supported: table)",
                ))
            }
        })?;
    }

    let table_name = table_name.unwrap_or_else(|| derive_table_name(&struct_name.to_string()));
    Ok(StructAttrs { table_name, config })
}

/// Derive table name from struct name: convert to snake_case and pluralize.
///
/// Examples:
/// - `Hero` -> `heroes`
/// - `TeamMember` -> `team_members`
/// - `Category` -> `categories`
pub(crate) fn derive_table_name(struct_name: &str) -> String {
    let snake = to_snake_case(struct_name);
    pluralize(&snake)
}

/// Convert PascalCase to snake_case, keeping acronym runs together
/// (`HTTPServer` -> `http_server`).
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let should_underscore = prev.is_lowercase()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization.
///
/// Rules:
/// - Words ending in 's', 'x', 'z', 'ch', 'sh' -> add 'es'
/// - Words ending in 'y' preceded by consonant -> change 'y' to 'ies'
/// - Words ending in 'o' preceded by consonant -> add 'es'
/// - Special cases: person -> people, child -> children
/// - Default: add 's'
fn pluralize(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return word.to_string();
    }

    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    if let Some(stripped) = word.strip_suffix('y') {
        if let Some(second_last) = stripped.chars().last() {
            if !"aeiou".contains(second_last) {
                return format!("{stripped}ies");
            }
        }
        return format!("{word}s");
    }

    if word.ends_with('o') {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() >= 2 && !"aeiou".contains(chars[chars.len() - 2]) {
            return format!("{word}es");
        }
    }

    format!("{word}s")
}

/// Parse all fields from a struct.
fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a unit struct",
        )),
    }
}

/// Parse a single field and its `#[sqlmodel(...)]` attributes.
fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected a named field"))?;

    let mut def = FieldDef {
        column_name: name.to_string(),
        name,
        ty: field.ty.clone(),
        nullable: is_option_type(&field.ty),
        primary_key: false,
        unique: false,
        foreign_key: None,
        min_length: None,
        max_length: None,
        pattern: None,
        skip: false,
        relationship: None,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("sqlmodel") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("primary_key") {
                def.primary_key = true;
                Ok(())
            } else if meta.path.is_ident("nullable") {
                def.nullable = true;
                Ok(())
            } else if meta.path.is_ident("unique") {
                def.unique = true;
                Ok(())
            } else if meta.path.is_ident("skip") {
                def.skip = true;
                Ok(())
            } else if meta.path.is_ident("column") {
                def.column_name = parse_str_value(&meta, "column")?;
                Ok(())
            } else if meta.path.is_ident("foreign_key") {
                def.foreign_key = Some(parse_str_value(&meta, "foreign_key")?);
                Ok(())
            } else if meta.path.is_ident("min_length") {
                def.min_length = Some(parse_usize_value(&meta, "min_length")?);
                Ok(())
            } else if meta.path.is_ident("max_length") {
                def.max_length = Some(parse_usize_value(&meta, "max_length")?);
                Ok(())
            } else if meta.path.is_ident("pattern") {
                def.pattern = Some(parse_str_value(&meta, "pattern")?);
                Ok(())
            } else if meta.path.is_ident("relationship") {
                def.relationship = Some(parse_relationship(&meta, &field.ty)?);
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown sqlmodel field attribute (supported: primary_key, nullable, unique, \
                     skip, column, foreign_key, min_length, max_length, pattern, relationship)",
                ))
            }
        })?;
    }

    Ok(def)
}

/// Parse `#[sqlmodel(relationship(model = "...", foreign_key = "..." | remote_key = "...",
/// back_populates = "..."))]`. The kind is inferred from the field type:
/// `Vec<T>` is one-to-many, anything else is many-to-one.
fn parse_relationship(
    meta: &syn::meta::ParseNestedMeta<'_>,
    field_ty: &Type,
) -> Result<RelationshipAttr> {
    let mut model: Option<String> = None;
    let mut foreign_key: Option<String> = None;
    let mut remote_key: Option<String> = None;
    let mut back_populates: Option<String> = None;

    meta.parse_nested_meta(|nested| {
        if nested.path.is_ident("model") {
            model = Some(parse_str_value(&nested, "model")?);
            Ok(())
        } else if nested.path.is_ident("foreign_key") {
            foreign_key = Some(parse_str_value(&nested, "foreign_key")?);
            Ok(())
        } else if nested.path.is_ident("remote_key") {
            remote_key = Some(parse_str_value(&nested, "remote_key")?);
            Ok(())
        } else if nested.path.is_ident("back_populates") {
            back_populates = Some(parse_str_value(&nested, "back_populates")?);
            Ok(())
        } else {
            Err(Error::new_spanned(
                nested.path,
                "unknown relationship attribute (supported: model, foreign_key, remote_key, \
                 back_populates)",
            ))
        }
    })?;

    let model = model.ok_or_else(|| {
        Error::new(
            meta.path.span(),
            "relationship requires model = \"table_name\"",
        )
    })?;

    let kind = if is_vec_type(field_ty) {
        RelationshipKindAttr::OneToMany
    } else {
        RelationshipKindAttr::ManyToOne
    };

    Ok(RelationshipAttr {
        model,
        foreign_key,
        remote_key,
        back_populates,
        kind,
    })
}

fn parse_str_value(meta: &syn::meta::ParseNestedMeta<'_>, key: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    if let Lit::Str(lit_str) = value {
        Ok(lit_str.value())
    } else {
        Err(Error::new_spanned(
            value,
            format!("expected string literal for {key}"),
        ))
    }
}

fn parse_usize_value(meta: &syn::meta::ParseNestedMeta<'_>, key: &str) -> Result<usize> {
    let value: Lit = meta.value()?.parse()?;
    if let Lit::Int(lit_int) = value {
        lit_int.base10_parse()
    } else {
        Err(Error::new_spanned(
            value,
            format!("expected integer literal for {key}"),
        ))
    }
}

/// One awaitable accessor declaration stripped by `#[async_model]`.
#[derive(Debug)]
pub struct AwaitableDef {
    /// Name of the generated accessor method (the marker field's name).
    pub method: Ident,
    /// Target attribute or relationship name from `field = "..."`.
    pub target: String,
    /// The `T` in `Awaitable<T>`: the accessor's resolved value type.
    pub inner_ty: Type,
    /// Whether the target names a relationship field on the same struct.
    pub is_relationship: bool,
}

/// Result of splitting an `#[async_model]` struct into its schema part and
/// its awaitable declarations.
#[derive(Debug)]
pub struct AsyncModelDef {
    /// The struct with all marker fields removed.
    pub stripped: ItemStruct,
    /// Awaitable declarations, in declaration order.
    pub awaitables: Vec<AwaitableDef>,
    /// Names of the ordinary (non-marker) fields that survive stripping.
    pub remaining_field_names: Vec<String>,
}

/// Split an `#[async_model]` struct: remove every field typed `Awaitable<T>`
/// and record its declaration, leaving the rest of the struct untouched for
/// the derives below to process.
pub fn parse_async_model(input: &ItemStruct) -> Result<AsyncModelDef> {
    let Fields::Named(named) = &input.fields else {
        return Err(Error::new_spanned(
            input,
            "async_model requires a struct with named fields",
        ));
    };

    // Targets that name a relationship field resolve through the related
    // loader; everything else is treated as a column attribute. A target
    // that matches neither is deliberately not rejected here: it fails at
    // the first await with an attribute-lookup error.
    let relationship_names: Vec<String> = named
        .named
        .iter()
        .filter(|f| has_relationship_attr(f))
        .filter_map(|f| f.ident.as_ref().map(ToString::to_string))
        .collect();

    let mut awaitables = Vec::new();
    let mut kept = Vec::new();
    let mut remaining_field_names = Vec::new();

    for field in &named.named {
        let Some(ident) = field.ident.clone() else {
            return Err(Error::new_spanned(field, "expected a named field"));
        };

        let marker_target = parse_awaitable_attr(field)?;

        if let Some(inner_ty) = awaitable_inner_type(&field.ty) {
            let Some(target) = marker_target else {
                return Err(Error::new_spanned(
                    field,
                    "Awaitable field requires #[awaitable(field = \"target\")]",
                ));
            };
            let is_relationship = relationship_names.iter().any(|r| r == &target);
            awaitables.push(AwaitableDef {
                method: ident,
                target,
                inner_ty,
                is_relationship,
            });
        } else {
            if marker_target.is_some() {
                return Err(Error::new_spanned(
                    field,
                    "#[awaitable] is only allowed on fields typed Awaitable<T>",
                ));
            }
            remaining_field_names.push(ident.to_string());
            kept.push(field.clone());
        }
    }

    let mut stripped = input.clone();
    if let Fields::Named(named) = &mut stripped.fields {
        named.named = kept.into_iter().collect();
    }

    Ok(AsyncModelDef {
        stripped,
        awaitables,
        remaining_field_names,
    })
}

/// Parse `#[awaitable(field = "...")]` on a field, if present.
fn parse_awaitable_attr(field: &Field) -> Result<Option<String>> {
    let mut target: Option<String> = None;

    for attr in &field.attrs {
        if !attr.path().is_ident("awaitable") {
            continue;
        }
        if target.is_some() {
            return Err(Error::new_spanned(attr, "duplicate #[awaitable] attribute"));
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("field") {
                let value = parse_str_value(&meta, "field")?;
                if value.is_empty() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "awaitable field target must not be empty",
                    ));
                }
                target = Some(value);
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown awaitable attribute (supported: field)",
                ))
            }
        })?;

        if target.is_none() {
            return Err(Error::new_spanned(
                attr,
                "#[awaitable] requires field = \"target\"",
            ));
        }
    }

    Ok(target)
}

/// If `ty` is `Awaitable<T>` (any path prefix), return `T`.
pub fn awaitable_inner_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Awaitable" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(t) => Some(t.clone()),
        _ => None,
    })
}

fn has_relationship_attr(field: &Field) -> bool {
    field.attrs.iter().any(|attr| {
        if !attr.path().is_ident("sqlmodel") {
            return false;
        }
        let mut found = false;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("relationship") {
                found = true;
                // Consume the nested tokens so parsing can continue.
                let _ = meta.parse_nested_meta(|nested| {
                    if nested.input.peek(syn::Token![=]) {
                        let _: Lit = nested.value()?.parse()?;
                    }
                    Ok(())
                });
            } else if meta.input.peek(syn::Token![=]) {
                let _: Lit = meta.value()?.parse()?;
            }
            Ok(())
        });
        found
    })
}

/// Is this type `Option<T>`?
pub fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

/// Is this type `Vec<T>`?
pub fn is_vec_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Vec";
        }
    }
    false
}
