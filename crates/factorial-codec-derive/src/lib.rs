//! `#[derive(Serializable)]` for `factorial-codec`.
//!
//! Generates, for a non-generic struct with named fields:
//!
//! - an `impl Reflect` with a `'static` member table and accessor dispatch,
//! - an `impl Serializable` that formats the struct as a node.
//!
//! Container attributes (`#[codec(...)]` on the struct):
//!
//! - `value_type` -- copy with `Clone` instead of a round trip. Requires
//!   `Clone`.
//! - `unconventional` -- only permissive policies may serialize the type.
//!
//! Field attributes:
//!
//! - `base` -- the field embeds the base type; its members are walked
//!   first. At most one, and it must itself derive `Serializable`.
//! - `serialize` -- opt in explicitly (needed for private fields under the
//!   conventional policy and for every field under the strict one).
//! - `skip` -- opt out.
//! - `property` -- describe the member as a property instead of a field.
//! - `former_name = "..."` -- an older name to accept when reading;
//!   repeatable.
//!
//! The struct must implement `Default`; every non-base field must
//! implement `Serializable`, including skipped ones, since permissive
//! policies still visit them.

use proc_macro::TokenStream;
use proc_macro2::{Literal, TokenStream as TokenStream2};
use quote::quote;
use syn::ext::IdentExt;
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input};

#[proc_macro_derive(Serializable, attributes(codec))]
pub fn derive_serializable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct ContainerAttrs {
    value_type: bool,
    unconventional: bool,
}

#[derive(Default)]
struct FieldAttrs {
    base: bool,
    serialize: bool,
    skip: bool,
    property: bool,
    former_names: Vec<LitStr>,
}

fn codec_attrs(attrs: &[Attribute]) -> impl Iterator<Item = &Attribute> {
    attrs.iter().filter(|attr| attr.path().is_ident("codec"))
}

fn parse_container_attrs(attrs: &[Attribute]) -> syn::Result<ContainerAttrs> {
    let mut out = ContainerAttrs::default();
    for attr in codec_attrs(attrs) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("value_type") {
                out.value_type = true;
            } else if meta.path.is_ident("unconventional") {
                out.unconventional = true;
            } else {
                return Err(meta.error("expected `value_type` or `unconventional`"));
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn parse_field_attrs(attrs: &[Attribute]) -> syn::Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in codec_attrs(attrs) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("base") {
                out.base = true;
            } else if meta.path.is_ident("serialize") {
                out.serialize = true;
            } else if meta.path.is_ident("skip") {
                out.skip = true;
            } else if meta.path.is_ident("property") {
                out.property = true;
            } else if meta.path.is_ident("former_name") {
                out.former_names.push(meta.value()?.parse()?);
            } else {
                return Err(meta.error(
                    "expected `base`, `serialize`, `skip`, `property` or `former_name = \"...\"`",
                ));
            }
            Ok(())
        })?;
    }
    Ok(out)
}

struct Member<'a> {
    ident: &'a Ident,
    ty: &'a Type,
    public: bool,
    attrs: FieldAttrs,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Serializable cannot be derived for generic types",
        ));
    }
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Serializable can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &data.fields,
            "Serializable requires named fields",
        ));
    };

    let container = parse_container_attrs(&input.attrs)?;
    let mut base: Option<(&Ident, &Type)> = None;
    let mut members = Vec::new();
    for field in &fields.named {
        let attrs = parse_field_attrs(&field.attrs)?;
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        if attrs.base {
            if base.is_some() {
                return Err(syn::Error::new_spanned(ident, "only one field may be `base`"));
            }
            base = Some((ident, &field.ty));
            continue;
        }
        members.push(Member {
            ident,
            ty: &field.ty,
            public: matches!(field.vis, syn::Visibility::Public(_)),
            attrs,
        });
    }

    let name = &input.ident;
    let type_name = name.unraw().to_string();
    let conventional = !container.unconventional;

    let infos = members.iter().map(|member| {
        let field_name = member.ident.unraw().to_string();
        let ty = member.ty;
        let value_type = quote!(#ty).to_string().replace(' ', "");
        let kind = if member.attrs.property {
            quote!(::factorial_codec::member::MemberKind::Property)
        } else {
            quote!(::factorial_codec::member::MemberKind::Field)
        };
        let visibility = if member.public {
            quote!(::factorial_codec::member::Visibility::Public)
        } else {
            quote!(::factorial_codec::member::Visibility::Private)
        };
        let serialize = member.attrs.serialize;
        let skip = member.attrs.skip;
        let former_names = &member.attrs.former_names;
        quote! {
            ::factorial_codec::member::MemberInfo {
                name: #field_name,
                declaring_type: #type_name,
                kind: #kind,
                visibility: #visibility,
                value_type: #value_type,
                serialize: #serialize,
                skip: #skip,
                former_names: &[#(#former_names),*],
            }
        }
    });
    let count = members.len();

    let base_info = match base {
        Some((_, ty)) => quote! {
            ::core::option::Option::Some(
                <#ty as ::factorial_codec::member::Reflect>::type_info
                    as fn() -> &'static ::factorial_codec::member::TypeInfo
            )
        },
        None => quote!(::core::option::Option::None),
    };

    let indices: Vec<Literal> = (0..count).map(Literal::usize_unsuffixed).collect();
    let idents: Vec<&Ident> = members.iter().map(|member| member.ident).collect();

    let (write_fallback, read_fallback) = match base {
        Some((field, ty)) => (
            quote! {
                <#ty as ::factorial_codec::member::Reflect>::write_member(
                    &self.#field, member, name, writer,
                )
            },
            quote! {
                <#ty as ::factorial_codec::member::Reflect>::read_member(
                    &mut self.#field, member, reader,
                )
            },
        ),
        None => {
            let unknown = quote! {
                ::core::result::Result::Err(::factorial_codec::error::CodecError::UnknownMember {
                    type_name: #type_name,
                    member: ::std::string::ToString::to_string(member.name),
                })
            };
            (unknown.clone(), unknown)
        }
    };

    let copy_by_value = if container.value_type {
        quote! {
            fn copy_by_value(&self) -> ::core::option::Option<Self> {
                ::core::option::Option::Some(::core::clone::Clone::clone(self))
            }
        }
    } else {
        TokenStream2::new()
    };

    Ok(quote! {
        impl ::factorial_codec::member::Reflect for #name {
            fn type_info() -> &'static ::factorial_codec::member::TypeInfo {
                static MEMBERS: [::factorial_codec::member::MemberInfo; #count] = [#(#infos),*];
                static INFO: ::factorial_codec::member::TypeInfo =
                    ::factorial_codec::member::TypeInfo {
                        name: #type_name,
                        base: #base_info,
                        members: &MEMBERS,
                        conventional: #conventional,
                    };
                &INFO
            }

            #[allow(unused_variables)]
            fn write_member(
                &self,
                member: &::factorial_codec::member::MemberInfo,
                name: &str,
                writer: &mut dyn ::factorial_codec::data::DataWriter,
            ) -> ::core::result::Result<(), ::factorial_codec::error::CodecError> {
                match <Self as ::factorial_codec::member::Reflect>::type_info().own_member_index(member) {
                    #(
                        ::core::option::Option::Some(#indices) =>
                            ::factorial_codec::serializable::Serializable::write_value(
                                &self.#idents,
                                ::core::option::Option::Some(name),
                                writer,
                            ),
                    )*
                    _ => #write_fallback,
                }
            }

            #[allow(unused_variables)]
            fn read_member(
                &mut self,
                member: &::factorial_codec::member::MemberInfo,
                reader: &mut dyn ::factorial_codec::data::DataReader,
            ) -> ::core::result::Result<(), ::factorial_codec::error::CodecError> {
                match <Self as ::factorial_codec::member::Reflect>::type_info().own_member_index(member) {
                    #(
                        ::core::option::Option::Some(#indices) => {
                            self.#idents =
                                ::factorial_codec::serializable::Serializable::read_value(reader)?;
                            ::core::result::Result::Ok(())
                        }
                    )*
                    _ => #read_fallback,
                }
            }
        }

        impl ::factorial_codec::serializable::Serializable for #name {
            fn write_value(
                &self,
                name: ::core::option::Option<&str>,
                writer: &mut dyn ::factorial_codec::data::DataWriter,
            ) -> ::core::result::Result<(), ::factorial_codec::error::CodecError> {
                ::factorial_codec::formatter::write_struct(self, name, writer)
            }

            fn read_value(
                reader: &mut dyn ::factorial_codec::data::DataReader,
            ) -> ::core::result::Result<Self, ::factorial_codec::error::CodecError> {
                ::factorial_codec::formatter::read_struct(reader)
            }

            #copy_by_value
        }
    })
}
