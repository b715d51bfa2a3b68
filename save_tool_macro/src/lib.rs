use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use syn::spanned::Spanned;

/// On-disk layout of a single field.
enum FieldLayout {
    Skip,
    /// One flagged length byte followed by ASCII text.
    PString,
    /// bit6 packed integer.
    Packed,
    Plain,
}

fn last_ident_is(ty: &syn::Type, name: &str) -> bool {
    if let syn::Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == name;
        }
    }
    false
}

fn field_layout(field: &syn::Field, skip_attr: &str) -> syn::Result<FieldLayout> {
    let mut skipped = false;
    let mut pstring = false;
    let mut packed = false;
    for attr in &field.attrs {
        let path = attr.path();
        if path.is_ident(skip_attr) {
            skipped = true;
        } else if path.is_ident("pstring") {
            pstring = true;
        } else if path.is_ident("packed") {
            packed = true;
        }
    }
    if skipped {
        return Ok(FieldLayout::Skip);
    }
    if pstring && packed {
        return Err(syn::Error::new(
            field.span(),
            "`pstring` and `packed` can not be combined",
        ));
    }
    if pstring {
        if !last_ident_is(&field.ty, "String") {
            return Err(syn::Error::new(
                field.ty.span(),
                "`pstring` can only be used on String fields",
            ));
        }
        return Ok(FieldLayout::PString);
    }
    if packed {
        if !last_ident_is(&field.ty, "i32") {
            return Err(syn::Error::new(
                field.ty.span(),
                "`packed` can only be used on i32 fields",
            ));
        }
        return Ok(FieldLayout::Packed);
    }
    Ok(FieldLayout::Plain)
}

fn struct_fields(input: &syn::DeriveInput) -> syn::Result<&syn::Fields> {
    match &input.data {
        syn::Data::Struct(data) => Ok(&data.fields),
        _ => Err(syn::Error::new(
            input.ident.span(),
            "expected a struct, enums and unions are not supported",
        )),
    }
}

#[proc_macro]
pub fn struct_unpack_impl_for_num(item: TokenStream) -> TokenStream {
    let i = syn::parse_macro_input!(item as syn::Ident);
    let output = quote::quote! {
        impl StructUnpack for #i {
            fn unpack<R: std::io::Read + std::io::Seek>(mut reader: R) -> anyhow::Result<Self> {
                let mut buf = [0u8; std::mem::size_of::<#i>()];
                reader.read_exact(&mut buf)?;
                Ok(#i::from_le_bytes(buf))
            }
        }

        impl StructPack for #i {
            fn pack<W: std::io::Write>(&self, writer: &mut W) -> anyhow::Result<()> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(())
            }
        }
    };
    output.into()
}

/// Derive `StructPack` for structs.
///
/// Fields are written in declaration order, little-endian.
///
/// * `skip_pack` skips the field.
/// * `pstring` writes a `String` field as a flagged one-byte-length ASCII string.
/// * `packed` writes an `i32` field as a bit6 packed integer.
#[proc_macro_derive(StructPack, attributes(skip_pack, pstring, packed))]
pub fn struct_pack_derive(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    match expand_pack(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_pack(input: &syn::DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let fields = struct_fields(input)?;
    let mut stmts = Vec::new();
    for (idx, field) in fields.iter().enumerate() {
        let access = match &field.ident {
            Some(ident) => quote::quote! { #ident },
            None => {
                let index = syn::Index::from(idx);
                quote::quote! { #index }
            }
        };
        let stmt = match field_layout(field, "skip_pack")? {
            FieldLayout::Skip => continue,
            FieldLayout::PString => quote::quote! {
                crate::ext::io::WriteExt::write_pstring(&mut *writer, &self.#access)?;
            },
            FieldLayout::Packed => quote::quote! {
                crate::ext::io::WriteExt::write_packed_i32(&mut *writer, self.#access)?;
            },
            FieldLayout::Plain => quote::quote! {
                crate::utils::struct_pack::StructPack::pack(&self.#access, &mut *writer)?;
            },
        };
        stmts.push(stmt);
    }
    Ok(quote::quote! {
        impl #impl_generics crate::utils::struct_pack::StructPack for #name #ty_generics #where_clause {
            fn pack<W: std::io::Write>(&self, writer: &mut W) -> anyhow::Result<()> {
                #(#stmts)*
                Ok(())
            }
        }
    })
}

/// Derive `StructUnpack` for structs.
///
/// * `skip_unpack` fills the field with `Default::default()`.
/// * `pstring` reads a flagged one-byte-length ASCII string.
/// * `packed` reads a bit6 packed integer.
#[proc_macro_derive(StructUnpack, attributes(skip_unpack, pstring, packed))]
pub fn struct_unpack_derive(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    match expand_unpack(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_unpack(input: &syn::DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let fields = struct_fields(input)?;
    let is_tuple = matches!(fields, syn::Fields::Unnamed(_));
    let mut names = Vec::new();
    let mut stmts = Vec::new();
    for (idx, field) in fields.iter().enumerate() {
        let local = match &field.ident {
            Some(ident) => ident.clone(),
            None => syn::Ident::new(&format!("index_{}", idx), field.span()),
        };
        let ty = &field.ty;
        let stmt = match field_layout(field, "skip_unpack")? {
            FieldLayout::Skip => quote::quote! {
                let #local = Default::default();
            },
            FieldLayout::PString => quote::quote! {
                let #local = crate::ext::io::ReadExt::read_pstring(&mut reader)?;
            },
            FieldLayout::Packed => quote::quote! {
                let #local = crate::ext::io::ReadExt::read_packed_i32(&mut reader)?;
            },
            FieldLayout::Plain => quote::quote! {
                let #local = <#ty as crate::utils::struct_pack::StructUnpack>::unpack(&mut reader)?;
            },
        };
        stmts.push(stmt);
        names.push(local);
    }
    let construct = if is_tuple {
        quote::quote! { Self(#(#names),*) }
    } else {
        quote::quote! { Self { #(#names),* } }
    };
    Ok(quote::quote! {
        impl #impl_generics crate::utils::struct_pack::StructUnpack for #name #ty_generics #where_clause {
            fn unpack<R: std::io::Read + std::io::Seek>(mut reader: R) -> anyhow::Result<Self> {
                #(#stmts)*
                Ok(#construct)
            }
        }
    })
}
