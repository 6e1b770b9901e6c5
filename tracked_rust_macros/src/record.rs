use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::ext::IdentExt;
use syn::meta::ParseNestedMeta;
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Token};

pub fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;
    let type_attrs = type_attrs(input)?;
    let rename_all = serde_rename_all(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Record derive: only structs with named fields are supported",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Record derive: only structs are supported",
            ))
        }
    };

    let mut key = None;
    let mut fallback_key = None;
    let mut persisted = Vec::new();

    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let attrs = field_attrs(&field.attrs)?;

        if attrs.key {
            if key.is_some() {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Record derive: more than one field marked #[record(key)]",
                ));
            }
            key = Some(field);
            continue;
        }
        if ident == "id" {
            fallback_key = Some(field);
        }

        let serde = serde_field_attrs(&field.attrs)?;
        if serde.skip {
            continue;
        }

        let field_name = ident.unraw().to_string();
        let column = match (serde.rename, &rename_all) {
            (Some(rename), _) => rename,
            (None, Some((rule, span))) => apply_rename_rule(rule, &field_name, *span)?,
            (None, None) => field_name.clone(),
        };

        persisted.push(PersistedField {
            ident: ident.clone(),
            name: field_name,
            column,
            updatable: attrs.updatable,
            ignore_on_update: attrs.ignore_on_update,
        });
    }

    let key = key.or(fallback_key).ok_or_else(|| {
        syn::Error::new_spanned(
            name,
            "Record derive: no field marked with #[record(key)] and no field named `id`",
        )
    })?;
    let key_ident = &key.ident;
    let key_ty = &key.ty;

    // A fallback `id` key must not also be listed as a persisted field.
    persisted.retain(|field| Some(&field.ident) != key.ident.as_ref());

    let collection = type_attrs
        .collection
        .unwrap_or_else(|| format!("{}s", to_snake_case(&name.unraw().to_string())));
    let fully_updatable = type_attrs.fully_updatable;

    let descriptors = persisted.iter().map(|field| {
        let name = &field.name;
        let column = &field.column;
        let updatable = field.updatable;
        let ignore_on_update = field.ignore_on_update;
        quote! {
            ::tracked_rust::Field {
                name: #name,
                column: #column,
                updatable: #updatable,
                ignore_on_update: #ignore_on_update,
            }
        }
    });

    let copy_arms = persisted.iter().map(|field| {
        let name = &field.name;
        let ident = &field.ident;
        quote! {
            #name => {
                self.#ident = ::core::clone::Clone::clone(&source.#ident);
                true
            }
        }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::tracked_rust::Record for #name #ty_generics #where_clause {
            type Key = #key_ty;

            const COLLECTION: &'static str = #collection;

            const FULLY_UPDATABLE: bool = #fully_updatable;

            const FIELDS: &'static [::tracked_rust::Field] = &[
                #(#descriptors),*
            ];

            fn key(&self) -> &Self::Key {
                &self.#key_ident
            }

            fn set_key(&mut self, key: Self::Key) {
                self.#key_ident = key;
            }

            #[allow(unused_variables)]
            fn copy_field(&mut self, source: &Self, field: &str) -> bool {
                match field {
                    #(#copy_arms)*
                    _ => false,
                }
            }
        }
    })
}

struct PersistedField {
    ident: Ident,
    name: String,
    column: String,
    updatable: bool,
    ignore_on_update: bool,
}

#[derive(Default)]
struct TypeAttrs {
    collection: Option<String>,
    fully_updatable: bool,
}

fn type_attrs(input: &DeriveInput) -> syn::Result<TypeAttrs> {
    let mut attrs = TypeAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.collection = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("updatable") {
                attrs.fully_updatable = true;
                Ok(())
            } else {
                Err(meta.error("expected `collection = \"...\"` or `updatable`"))
            }
        })?;
    }
    Ok(attrs)
}

#[derive(Default)]
struct FieldAttrs {
    key: bool,
    updatable: bool,
    ignore_on_update: bool,
}

fn field_attrs(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut parsed = FieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("record") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("key") {
                parsed.key = true;
            } else if meta.path.is_ident("updatable") {
                parsed.updatable = true;
            } else if meta.path.is_ident("ignore_on_update") {
                parsed.ignore_on_update = true;
            } else {
                return Err(meta.error("expected `key`, `updatable` or `ignore_on_update`"));
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

#[derive(Default)]
struct SerdeFieldAttrs {
    skip: bool,
    rename: Option<String>,
}

fn serde_field_attrs(attrs: &[Attribute]) -> syn::Result<SerdeFieldAttrs> {
    let mut serde = SerdeFieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                serde.skip = true;
            } else if meta.path.is_ident("flatten") {
                return Err(meta.error("Record derive: #[serde(flatten)] fields have no column"));
            } else if meta.path.is_ident("rename") {
                if let Some(rename) = serialize_name(&meta)? {
                    serde.rename = Some(rename);
                }
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }
    Ok(serde)
}

fn serde_rename_all(attrs: &[Attribute]) -> syn::Result<Option<(String, Span)>> {
    let mut rule = None;
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                let span = meta.path.get_ident().map_or_else(Span::call_site, Ident::span);
                if let Some(name) = serialize_name(&meta)? {
                    rule = Some((name, span));
                }
            } else {
                skip_meta_value(&meta)?;
            }
            Ok(())
        })?;
    }
    Ok(rule)
}

/// Reads `name = "..."` or the `serialize` half of `name(serialize = "...", ..)`.
fn serialize_name(meta: &ParseNestedMeta) -> syn::Result<Option<String>> {
    if meta.input.peek(Token![=]) {
        let value: LitStr = meta.value()?.parse()?;
        return Ok(Some(value.value()));
    }

    let mut name = None;
    meta.parse_nested_meta(|inner| {
        let value: LitStr = inner.value()?.parse()?;
        if inner.path.is_ident("serialize") {
            name = Some(value.value());
        }
        Ok(())
    })?;
    Ok(name)
}

/// Consumes the value of a serde option this derive does not care about.
fn skip_meta_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream = content.parse()?;
    }
    Ok(())
}

/// Applies a serde `rename_all` rule to a snake_case field name.
fn apply_rename_rule(rule: &str, field: &str, span: Span) -> syn::Result<String> {
    let pascal = || {
        field
            .split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<String>()
    };

    let renamed = match rule {
        "lowercase" | "snake_case" => field.to_string(),
        "UPPERCASE" | "SCREAMING_SNAKE_CASE" => field.to_ascii_uppercase(),
        "PascalCase" => pascal(),
        "camelCase" => {
            let pascal = pascal();
            let mut chars = pascal.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        "kebab-case" => field.replace('_', "-"),
        "SCREAMING-KEBAB-CASE" => field.to_ascii_uppercase().replace('_', "-"),
        other => {
            return Err(syn::Error::new(
                span,
                format!("Record derive: unknown rename_all rule `{}`", other),
            ))
        }
    };
    Ok(renamed)
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
