use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives `FieldValue` and `FormModel` for a struct with named fields.
///
/// Each field becomes one key of the form's value map. A `<Name>Fields`
/// struct is generated whose methods return the field path names, so
/// callers can write `Profile::fields().email()` instead of `"email"`.
#[proc_macro_derive(FormModel)]
pub fn derive_form_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            input.ident,
            "FormModel derive currently supports only non-generic structs",
        )
        .to_compile_error()
        .into();
    }

    let model_ident = input.ident;
    let fields_struct_ident = format_ident!("{model_ident}Fields");

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new_spanned(
                    &model_ident,
                    "FormModel derive requires a struct with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new_spanned(
                &model_ident,
                "FormModel derive is only supported on structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let calmform = calmform_path();
    let mut fields_methods = Vec::new();
    let mut to_entries = Vec::new();
    let mut from_fields = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_ty = field.ty;
        let field_name = field_ident.to_string();

        fields_methods.push(quote! {
            pub const fn #field_ident(&self) -> &'static str {
                #field_name
            }
        });

        to_entries.push(quote! {
            map.insert(
                #field_name.to_string(),
                #calmform::form::FieldValue::to_value(&self.#field_ident),
            );
        });

        from_fields.push(quote! {
            #field_ident: <#field_ty as #calmform::form::FieldValue>::from_value(
                map.get(#field_name).unwrap_or(&null),
                &#calmform::form::child_path(path, #field_name),
            )?,
        });
    }

    quote! {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct #fields_struct_ident;

        impl #fields_struct_ident {
            #(#fields_methods)*
        }

        impl #calmform::form::FieldValue for #model_ident {
            fn to_value(&self) -> #calmform::form::Value {
                let mut map = ::std::collections::BTreeMap::new();
                #(#to_entries)*
                #calmform::form::Value::Map(map)
            }

            fn from_value(
                value: &#calmform::form::Value,
                path: &str,
            ) -> ::std::result::Result<Self, #calmform::form::ValueError> {
                let map = #calmform::form::field_of(value, path)?;
                let null = #calmform::form::Value::Null;
                Ok(Self {
                    #(#from_fields)*
                })
            }
        }

        impl #calmform::form::FormModel for #model_ident {
            type Fields = #fields_struct_ident;

            fn fields() -> Self::Fields {
                #fields_struct_ident
            }
        }
    }
    .into()
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::calmform),
    }
}
