use proc_macro2::TokenStream;
use convert_case::{Case, Casing};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::token::Comma;
use syn::ext::IdentExt;
use syn::{Field, Type};

use crate::{FieldAttrs, FieldRole, parse_field_attrs};

type Fields = Punctuated<Field, Comma>;

/// Generates the `descriptor()` method implementation.
pub fn generate_descriptor(type_name: &str, fields: &Fields) -> syn::Result<TokenStream> {
    let mut members = Vec::new();

    for field in fields {
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            continue;
        }
        let name = record_name(field, &attrs);
        let with_key = attrs.key.as_ref().map(|key| quote! { .with_key(#key) });

        match &attrs.role {
            FieldRole::Id => {}
            FieldRole::Attribute => {
                let codec = codec_for(field, &attrs)?;
                members.push(quote! {
                    .attribute(::ketone_core::Attribute::new(#name, #codec) #with_key)
                });
            }
            FieldRole::BelongsTo(target) | FieldRole::HasMany(target) => {
                let constructor = match &attrs.role {
                    FieldRole::BelongsTo(_) => quote! { belongs_to },
                    _ => quote! { has_many },
                };
                let polymorphic = attrs.polymorphic.then(|| quote! { .polymorphic() });
                members.push(quote! {
                    .relationship(
                        ::ketone_core::Relationship::#constructor(#name, #target)
                            #polymorphic
                            #with_key
                    )
                });
            }
        }
    }

    Ok(quote! {
        fn descriptor() -> ::ketone_core::TypeDescriptor {
            ::ketone_core::TypeDescriptor::new(#type_name)
                #(#members)*
        }
    })
}

/// Generates the `from_record()` method implementation.
pub fn generate_from_record(type_name: &str, fields: &Fields) -> syn::Result<TokenStream> {
    let mut initializers = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let attrs = parse_field_attrs(field)?;
        if attrs.skip {
            initializers.push(quote! { #ident: ::std::default::Default::default() });
            continue;
        }
        let name = record_name(field, &attrs);
        let ty = &field.ty;
        let optional = option_inner(ty).is_some();

        let value = match &attrs.role {
            FieldRole::Attribute => quote! { record.decode::<#ty>(#name)? },
            FieldRole::Id if optional => quote! { record.id() },
            FieldRole::Id => quote! {
                record
                    .id()
                    .ok_or_else(|| ::ketone_core::StoreError::MissingId(#type_name.to_string()))?
            },
            FieldRole::BelongsTo(_) if optional => quote! { record.belongs_to_id(#name)? },
            FieldRole::BelongsTo(_) => quote! {
                record.belongs_to_id(#name)?.ok_or_else(|| ::ketone_core::StoreError::Decode {
                    field: #name.to_string(),
                    message: "relationship is empty".to_string(),
                })?
            },
            FieldRole::HasMany(_) => quote! {
                ::std::iter::FromIterator::from_iter(record.has_many_ids(#name)?)
            },
        };
        initializers.push(quote! { #ident: #value });
    }

    Ok(quote! {
        fn from_record(
            record: &::ketone_core::Record,
        ) -> ::std::result::Result<Self, ::ketone_core::StoreError> {
            ::std::result::Result::Ok(Self {
                #(#initializers),*
            })
        }
    })
}

fn record_name(field: &Field, attrs: &FieldAttrs) -> String {
    attrs.rename.clone().unwrap_or_else(|| {
        field
            .ident
            .as_ref()
            .map(|ident| ident.unraw().to_string().to_case(Case::Camel))
            .unwrap_or_default()
    })
}

fn codec_for(field: &Field, attrs: &FieldAttrs) -> syn::Result<TokenStream> {
    if let Some(codec) = &attrs.codec {
        return match codec.value().as_str() {
            "string" => Ok(quote! { ::ketone_core::Codec::String }),
            "number" => Ok(quote! { ::ketone_core::Codec::Number }),
            "boolean" => Ok(quote! { ::ketone_core::Codec::Boolean }),
            "date" => Ok(quote! { ::ketone_core::Codec::Date }),
            "raw" => Ok(quote! { ::ketone_core::Codec::Raw }),
            _ => Err(syn::Error::new_spanned(
                codec,
                "codec must be one of string, number, boolean, date, raw",
            )),
        };
    }
    Ok(infer_codec(&field.ty))
}

/// Picks a codec from the field type, looking through `Option`.
fn infer_codec(ty: &Type) -> TokenStream {
    let ty = option_inner(ty).unwrap_or(ty);
    let Type::Path(type_path) = ty else {
        return quote! { ::ketone_core::Codec::Raw };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { ::ketone_core::Codec::Raw };
    };
    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { ::ketone_core::Codec::String },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize"
        | "f32" | "f64" => quote! { ::ketone_core::Codec::Number },
        "bool" => quote! { ::ketone_core::Codec::Boolean },
        "DateTime" | "NaiveDateTime" => quote! { ::ketone_core::Codec::Date },
        _ => quote! { ::ketone_core::Codec::Raw },
    }
}

/// The `T` of an `Option<T>` field type.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    match &segment.arguments {
        syn::PathArguments::AngleBracketed(angle) if angle.args.len() == 1 => {
            match &angle.args[0] {
                syn::GenericArgument::Type(inner) => Some(inner),
                _ => None,
            }
        }
        _ => None,
    }
}
