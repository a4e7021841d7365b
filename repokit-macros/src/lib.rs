//! Procedural macros for repokit
//!
//! - `#[derive(Entity)]` - Generate the entity descriptor from an annotated struct

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Data, DeriveInput, Fields, GenericArgument, Ident, LitStr, Path, PathArguments, Type,
    parse_macro_input, spanned::Spanned,
};

/// Implement `repokit::Entity` for a struct with named fields.
///
/// # Usage
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[entity(table = "products", owner = "user_id", default_sort = "price", default_order = "desc")]
/// pub struct Product {
///     pub id: Option<i64>,
///     #[filterable]
///     #[sortable]
///     #[searchable]
///     pub name: String,
///     #[filterable]
///     #[sortable]
///     pub price: f64,
///     #[json_field]
///     pub tags: Vec<String>,
///     pub user_id: Option<String>,
///     #[relation(kind = "many_to_one", target = User, local = "user_id")]
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     pub owner: Option<User>,
/// }
/// ```
///
/// Column types follow the Rust type (`Option` is unwrapped): strings and
/// uuids are text, integers are integer, floats are real, `bool` is boolean,
/// everything else is stored as JSON. `#[json_field]` forces JSON.
///
/// `#[entity(...)]` keys: `table` (default: snake-case name plus `s`), `id`
/// (default `id`), `owner`, `default_sort`, `default_order` (`asc`/`desc`).
///
/// `#[relation(...)]` marks a field that is loaded, not stored. Keys: `kind`
/// (`one_to_one`, `one_to_many`, `many_to_one`, `many_to_many`), `target`
/// (entity type), `name` (default: the field name), `local`, `foreign`,
/// `include_by_default`, and for many-to-many `join_table`, `join_local`,
/// `join_foreign`.
#[proc_macro_derive(
    Entity,
    attributes(entity, filterable, sortable, searchable, json_field, relation)
)]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let entity_name = struct_name.to_string();
    let snake_name = entity_name.to_case(Case::Snake);

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "Entity can only be derived for structs",
            ));
        }
    };

    let options = EntityOptions::parse(&input, &snake_name)?;

    let mut columns = Vec::new();
    let mut relations = Vec::new();
    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        if let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("relation")) {
            relations.push(RelationInput::parse(attr, ident, &snake_name)?.to_tokens()?);
        } else {
            columns.push(column_tokens(field, ident));
        }
    }

    let table = &options.table;
    let id_field = options.id.as_ref().map(|id| quote! { .id_field(#id) });
    let owner_field = options.owner.as_ref().map(|owner| quote! { .owner_field(#owner) });
    let default_sort = options.default_sort.as_ref().map(|sort| {
        let direction = &options.default_order;
        quote! { .default_sort(#sort, ::repokit::orm::SortDirection::#direction) }
    });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::repokit::orm::Entity for #struct_name #ty_generics #where_clause {
            fn descriptor() -> ::repokit::Result<::repokit::orm::EntityDescriptor> {
                ::repokit::orm::EntityDescriptor::builder(#entity_name, #table)
                    #(#columns)*
                    #id_field
                    #owner_field
                    #default_sort
                    #(#relations)*
                    .build()
            }
        }
    })
}

/// Values of the struct-level `#[entity(...)]` attribute
struct EntityOptions {
    table: String,
    id: Option<String>,
    owner: Option<String>,
    default_sort: Option<String>,
    default_order: Ident,
}

impl EntityOptions {
    fn parse(input: &DeriveInput, snake_name: &str) -> syn::Result<Self> {
        let mut options = EntityOptions {
            table: format!("{snake_name}s"),
            id: None,
            owner: None,
            default_sort: None,
            default_order: format_ident!("Asc"),
        };

        for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
            attr.parse_nested_meta(|meta| {
                let value: LitStr = meta.value()?.parse()?;
                if meta.path.is_ident("table") {
                    options.table = value.value();
                } else if meta.path.is_ident("id") {
                    options.id = Some(value.value());
                } else if meta.path.is_ident("owner") {
                    options.owner = Some(value.value());
                } else if meta.path.is_ident("default_sort") {
                    options.default_sort = Some(value.value());
                } else if meta.path.is_ident("default_order") {
                    options.default_order = match value.value().to_ascii_lowercase().as_str() {
                        "asc" | "ascend" => format_ident!("Asc"),
                        "desc" | "descend" => format_ident!("Desc"),
                        _ => return Err(meta.error("default_order must be \"asc\" or \"desc\"")),
                    };
                } else {
                    return Err(meta.error("unknown entity attribute"));
                }
                Ok(())
            })?;
        }

        Ok(options)
    }
}

/// `.field(FieldDef::new(..)...)` for one stored field
fn column_tokens(field: &syn::Field, ident: &Ident) -> TokenStream2 {
    let name = ident.to_string();
    let has = |flag: &str| field.attrs.iter().any(|a| a.path().is_ident(flag));

    let field_type = if has("json_field") {
        format_ident!("Json")
    } else {
        infer_field_type(&field.ty)
    };

    let filterable = has("filterable").then(|| quote! { .filterable() });
    let sortable = has("sortable").then(|| quote! { .sortable() });
    let searchable = has("searchable").then(|| quote! { .searchable() });

    quote! {
        .field(
            ::repokit::orm::FieldDef::new(#name, ::repokit::orm::FieldType::#field_type)
                #filterable
                #sortable
                #searchable
        )
    }
}

/// Storage type for a Rust type, looking through `Option<T>`
fn infer_field_type(ty: &Type) -> Ident {
    let ty = unwrap_option(ty);
    let Type::Path(path) = ty else {
        return match ty {
            Type::Reference(r) if is_str(&r.elem) => format_ident!("Text"),
            _ => format_ident!("Json"),
        };
    };
    let Some(last) = path.path.segments.last() else {
        return format_ident!("Json");
    };

    match last.ident.to_string().as_str() {
        "String" | "str" | "char" | "Uuid" => format_ident!("Text"),
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            format_ident!("Integer")
        }
        "f32" | "f64" => format_ident!("Real"),
        "bool" => format_ident!("Boolean"),
        _ => format_ident!("Json"),
    }
}

fn is_str(ty: &Type) -> bool {
    matches!(ty, Type::Path(p) if p.path.is_ident("str"))
}

fn unwrap_option(ty: &Type) -> &Type {
    let Type::Path(path) = ty else {
        return ty;
    };
    let Some(last) = path.path.segments.last() else {
        return ty;
    };
    if last.ident != "Option" {
        return ty;
    }
    match &last.arguments {
        PathArguments::AngleBracketed(args) => match args.args.first() {
            Some(GenericArgument::Type(inner)) => inner,
            _ => ty,
        },
        _ => ty,
    }
}

/// Parsed `#[relation(...)]` attribute
struct RelationInput {
    span: proc_macro2::Span,
    name: String,
    kind: Ident,
    target: Path,
    local: String,
    foreign: String,
    include_by_default: bool,
    join: Option<(String, String, String)>,
}

impl RelationInput {
    fn parse(attr: &syn::Attribute, ident: &Ident, snake_name: &str) -> syn::Result<Self> {
        let mut name = ident.to_string();
        let mut kind: Option<String> = None;
        let mut target: Option<Path> = None;
        let mut local: Option<String> = None;
        let mut foreign: Option<String> = None;
        let mut include_by_default = false;
        let mut join_table: Option<String> = None;
        let mut join_local: Option<String> = None;
        let mut join_foreign: Option<String> = None;

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("include_by_default") {
                include_by_default = true;
                return Ok(());
            }
            if meta.path.is_ident("target") {
                target = Some(meta.value()?.parse()?);
                return Ok(());
            }

            let value: LitStr = meta.value()?.parse()?;
            let slot = if meta.path.is_ident("name") {
                name = value.value();
                return Ok(());
            } else if meta.path.is_ident("kind") {
                &mut kind
            } else if meta.path.is_ident("local") {
                &mut local
            } else if meta.path.is_ident("foreign") {
                &mut foreign
            } else if meta.path.is_ident("join_table") {
                &mut join_table
            } else if meta.path.is_ident("join_local") {
                &mut join_local
            } else if meta.path.is_ident("join_foreign") {
                &mut join_foreign
            } else {
                return Err(meta.error("unknown relation attribute"));
            };
            *slot = Some(value.value());
            Ok(())
        })?;

        let span = attr.span();
        let kind = kind.ok_or_else(|| syn::Error::new(span, "relation needs `kind = \"...\"`"))?;
        let kind = kind.to_case(Case::Pascal);
        if !["OneToOne", "OneToMany", "ManyToOne", "ManyToMany"].contains(&kind.as_str()) {
            return Err(syn::Error::new(
                span,
                "relation kind must be one_to_one, one_to_many, many_to_one or many_to_many",
            ));
        }
        let target = target.ok_or_else(|| syn::Error::new(span, "relation needs `target = Type`"))?;

        let owning_side = kind == "ManyToOne" || kind == "OneToOne";
        let local = local.unwrap_or_else(|| {
            if owning_side {
                format!("{name}_id")
            } else {
                "id".to_string()
            }
        });
        let foreign = foreign.unwrap_or_else(|| {
            if kind == "OneToMany" {
                format!("{snake_name}_id")
            } else {
                "id".to_string()
            }
        });

        let join = match (join_table, join_local, join_foreign) {
            (Some(table), Some(local_key), Some(foreign_key)) => Some((table, local_key, foreign_key)),
            (None, None, None) => None,
            _ => {
                return Err(syn::Error::new(
                    span,
                    "join_table, join_local and join_foreign go together",
                ));
            }
        };

        Ok(RelationInput {
            span,
            name,
            kind: format_ident!("{}", kind),
            target,
            local,
            foreign,
            include_by_default,
            join,
        })
    }

    fn to_tokens(&self) -> syn::Result<TokenStream2> {
        if self.kind == "ManyToMany" && self.join.is_none() {
            return Err(syn::Error::new(
                self.span,
                "many_to_many relations need join_table, join_local and join_foreign",
            ));
        }

        let RelationInput {
            name,
            kind,
            target,
            local,
            foreign,
            ..
        } = self;
        let include = self
            .include_by_default
            .then(|| quote! { .include_by_default() });
        let through = self.join.as_ref().map(|(table, local_key, foreign_key)| {
            quote! { .through(#table, #local_key, #foreign_key) }
        });

        Ok(quote! {
            .relation(
                ::repokit::orm::RelationDef::new(
                    #name,
                    ::repokit::orm::RelationKind::#kind,
                    ::repokit::orm::descriptor_of::<#target>,
                    #local,
                    #foreign,
                )
                #include
                #through
            )
        })
    }
}
