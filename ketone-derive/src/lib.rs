use proc_macro::TokenStream;
use convert_case::{Case, Casing};
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

mod descriptor;

/// Derive macro for the Model trait.
///
/// Generates `descriptor()` from the struct's fields and `from_record()`
/// decoding each field through the record.
///
/// # Example
///
/// ```ignore
/// use ketone_core::{Model, RecordId};
///
/// #[derive(Model)]
/// struct Person {
///     #[model(id)]
///     id: Option<RecordId>,
///     name: String,
///     last_name: Option<String>,
///     #[model(belongs_to = "group")]
///     group: Option<RecordId>,
/// }
/// ```
///
/// # Attributes
///
/// On the struct:
/// - `#[model(name = "person")]` - Record type name (default: the struct name, underscored)
///
/// On fields:
/// - `#[model(id)]` - Receives the record id (`RecordId` or `Option<RecordId>`)
/// - `#[model(rename = "name")]` - Record-space name (default: the field name, camelized)
/// - `#[model(key = "name")]` - Wire key, overriding the naming convention
/// - `#[model(codec = "date")]` - One of `string`, `number`, `boolean`, `date`, `raw`
///   (default: inferred from the field type)
/// - `#[model(belongs_to = "type")]` - Belongs-to relationship; the field holds the target id
/// - `#[model(has_many = "type")]` - Has-many relationship; the field holds the target ids
/// - `#[model(polymorphic)]` - The relationship target type varies per record
/// - `#[model(skip)]` - Not part of the record (field must impl Default)
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_model_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_model_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        syn::Data::Struct(syn::DataStruct {
            fields: syn::Fields::Named(named),
            ..
        }) => &named.named,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Model can only be derived for structs with named fields",
            ));
        }
    };

    let type_name = parse_type_attrs(&input.attrs)?
        .name
        .unwrap_or_else(|| name.to_string().to_case(Case::Snake));

    let descriptor_impl = descriptor::generate_descriptor(&type_name, fields)?;
    let from_record_impl = descriptor::generate_from_record(&type_name, fields)?;

    Ok(quote! {
        impl #impl_generics ::ketone_core::Model for #name #ty_generics #where_clause {
            #descriptor_impl
            #from_record_impl
        }
    })
}

#[derive(Default)]
struct TypeAttrs {
    name: Option<String>,
}

fn parse_type_attrs(attrs: &[syn::Attribute]) -> syn::Result<TypeAttrs> {
    let mut result = TypeAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.name = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported model attribute"))
            }
        })?;
    }

    Ok(result)
}

/// How a field maps onto the record.
#[derive(Clone)]
pub(crate) enum FieldRole {
    Attribute,
    Id,
    BelongsTo(String),
    HasMany(String),
}

pub(crate) struct FieldAttrs {
    pub role: FieldRole,
    pub skip: bool,
    pub rename: Option<String>,
    pub key: Option<String>,
    pub codec: Option<syn::LitStr>,
    pub polymorphic: bool,
}

impl Default for FieldAttrs {
    fn default() -> Self {
        FieldAttrs {
            role: FieldRole::Attribute,
            skip: false,
            rename: None,
            key: None,
            codec: None,
            polymorphic: false,
        }
    }
}

pub(crate) fn parse_field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in &field.attrs {
        if !attr.path().is_ident("model") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                result.skip = true;
            } else if meta.path.is_ident("id") {
                result.role = FieldRole::Id;
            } else if meta.path.is_ident("polymorphic") {
                result.polymorphic = true;
            } else if meta.path.is_ident("rename") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.rename = Some(value.value());
            } else if meta.path.is_ident("key") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.key = Some(value.value());
            } else if meta.path.is_ident("codec") {
                result.codec = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("belongs_to") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.role = FieldRole::BelongsTo(value.value());
            } else if meta.path.is_ident("has_many") {
                let value: syn::LitStr = meta.value()?.parse()?;
                result.role = FieldRole::HasMany(value.value());
            } else {
                return Err(meta.error("unsupported model attribute"));
            }
            Ok(())
        })?;
    }

    if result.polymorphic && matches!(result.role, FieldRole::Attribute | FieldRole::Id) {
        return Err(syn::Error::new_spanned(
            field,
            "`polymorphic` only applies to relationships",
        ));
    }

    Ok(result)
}
