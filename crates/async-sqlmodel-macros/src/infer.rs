//! SQL type inference from Rust types.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{GenericArgument, PathArguments, Type};

/// Infer the SQL type from a Rust type, returning a TokenStream that
/// constructs the appropriate SqlType variant.
///
/// This handles:
/// - Primitive types (i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool)
/// - String types (String, &str)
/// - Binary types (Vec<u8>)
/// - Option<T> (unwraps to inner type)
/// - serde_json::Value
pub fn infer_sql_type(ty: &Type) -> TokenStream {
    let inner_ty = unwrap_option_type(ty);
    let type_str = type_to_string(inner_ty);

    match type_str.as_str() {
        "bool" => quote! { async_sqlmodel_core::SqlType::Boolean },

        "i8" | "i16" | "i32" | "u8" | "u16" => {
            quote! { async_sqlmodel_core::SqlType::Integer }
        }
        // Unsigned 32-bit widens to BIGINT to avoid overflow.
        "i64" | "u32" | "u64" => quote! { async_sqlmodel_core::SqlType::BigInt },

        "f32" => quote! { async_sqlmodel_core::SqlType::Real },
        "f64" => quote! { async_sqlmodel_core::SqlType::Double },

        "String" | "&str" | "str" => quote! { async_sqlmodel_core::SqlType::Text },

        "Vec<u8>" | "&[u8]" | "[u8]" => quote! { async_sqlmodel_core::SqlType::Blob },

        "serde_json::Value" | "Value" => quote! { async_sqlmodel_core::SqlType::Json },

        // Default: Text (most permissive fallback)
        _ => quote! { async_sqlmodel_core::SqlType::Text },
    }
}

/// Unwrap Option<T> to get the inner type, or return the original type.
fn unwrap_option_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

/// Convert a Type to a simplified string representation for matching.
fn type_to_string(ty: &Type) -> String {
    use quote::ToTokens;
    ty.to_token_stream().to_string().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_infer_primitives() {
        let ty: Type = parse_quote!(i32);
        assert!(infer_sql_type(&ty).to_string().contains("Integer"));

        let ty: Type = parse_quote!(i64);
        assert!(infer_sql_type(&ty).to_string().contains("BigInt"));

        let ty: Type = parse_quote!(bool);
        assert!(infer_sql_type(&ty).to_string().contains("Boolean"));
    }

    #[test]
    fn test_infer_string() {
        let ty: Type = parse_quote!(String);
        assert!(infer_sql_type(&ty).to_string().contains("Text"));
    }

    #[test]
    fn test_infer_option() {
        let ty: Type = parse_quote!(Option<i32>);
        assert!(infer_sql_type(&ty).to_string().contains("Integer"));
    }

    #[test]
    fn test_infer_blob() {
        let ty: Type = parse_quote!(Vec<u8>);
        assert!(infer_sql_type(&ty).to_string().contains("Blob"));
    }
}
