// Unit assembler: one generated source unit per entity.
//
// Each fragment generator is a pure function from descriptor to token
// value; `assemble` runs them in a fixed order and merges the results
// into the final unit. Fragment order affects layout only, never
// semantics.

use proc_macro2::{Ident, Literal, TokenStream};
use prost_types::{DescriptorProto, EnumDescriptorProto, FieldDescriptorProto,
    ServiceDescriptorProto};
use quote::{format_ident, quote};

use crate::error::{Error, Result};
use crate::fields::{FieldCodec, FieldKind, GenContext};
use crate::names::{sanitize_field_name, to_pascal_case, to_snake_case};
use crate::registry::{Entity, EntityId, EntityPayload};

/// Generate the full source text for one entity.
pub fn assemble(ctx: &GenContext<'_>, id: EntityId) -> Result<String> {
    let entity = ctx.registry.entity(id);
    let tokens = match &entity.payload {
        EntityPayload::Message(message) => message_unit(ctx, id, message)?,
        EntityPayload::Enum(desc) => enum_unit(ctx, id, desc)?,
        EntityPayload::Service(service) => service_unit(ctx, entity, service)?,
        EntityPayload::Extensions(extensions) => extensions_unit(ctx, entity, extensions)?,
    };
    render(entity, tokens)
}

/// Parse and pretty-print the assembled tokens, prepending the
/// metadata header.
fn render(entity: &Entity, tokens: TokenStream) -> Result<String> {
    let file: syn::File = syn::parse2(tokens).map_err(|source| Error::Render {
        entity: entity.fqn.clone(),
        source,
    })?;
    Ok(format!(
        "// Generated by protoc-gen-protopress from {}. Do not edit.\n\n{}",
        entity.file,
        prettyplease::unparse(&file)
    ))
}

// ----- message units ------------------------------------------------------

fn message_unit(
    ctx: &GenContext<'_>,
    id: EntityId,
    message: &DescriptorProto,
) -> Result<TokenStream> {
    let entity = ctx.registry.entity(id);
    let name = format_ident!("{}", ctx.registry.class_name_of(id));
    let rt = &ctx.rt;
    let has_ranges = !message.extension_range.is_empty();

    let codecs: Vec<FieldCodec<'_>> = message
        .field
        .iter()
        .map(|field| FieldCodec::new(ctx, &entity.fqn, field))
        .collect::<Result<_>>()?;

    let storage = storage_fragment(ctx, &name, &codecs, has_ranges);
    let constructor = constructor_fragment(ctx, &codecs, has_ranges)?;
    let accessors = codecs
        .iter()
        .map(|codec| accessor_fragment(codec))
        .collect::<Result<Vec<_>>>()?;
    let ext_accessors = has_ranges.then(|| extension_accessor_fragment(ctx));
    let descriptor = descriptor_fragment(ctx, &entity.fqn, &codecs);
    let clear = clear_fragment(&codecs, has_ranges)?;
    let merge = merge_fragment(&codecs, has_ranges);
    let from_map = from_map_fragment(ctx, &codecs);
    let codec_entry_points = codec_fragment(ctx, &entity.fqn, &codecs, has_ranges)?;
    let stream_helpers = stream_fragment(ctx);
    let fqn = &entity.fqn;

    Ok(quote! {
        #storage

        impl #name {
            /// Fully qualified protobuf type name.
            pub const FULL_NAME: &'static str = #fqn;

            #constructor
            #(#accessors)*
            #ext_accessors
            #descriptor
            #clear
            #merge
            #from_map
            #codec_entry_points
            #stream_helpers
        }

        impl ::std::default::Default for #name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl #rt::WireMessage for #name {
            fn read_from(
                &mut self,
                input: &mut #rt::CodedReader<'_>,
            ) -> ::std::result::Result<(), #rt::WireError> {
                #name::read_from(self, input)
            }

            fn write_to(
                &self,
                output: &mut #rt::CodedWriter,
            ) -> ::std::result::Result<(), #rt::WireError> {
                #name::write_to(self, output)
            }

            fn serialized_size(&self) -> usize {
                #name::serialized_size(self)
            }

            fn clone_box(&self) -> ::std::boxed::Box<dyn #rt::WireMessage> {
                ::std::boxed::Box::new(self.clone())
            }
        }
    })
}

fn storage_fragment(
    ctx: &GenContext<'_>,
    name: &Ident,
    codecs: &[FieldCodec<'_>],
    has_ranges: bool,
) -> TokenStream {
    let rt = &ctx.rt;
    let fields = codecs.iter().map(|codec| {
        let ident = codec.ident();
        let storage = codec.storage_tokens();
        quote! { #ident: #storage, }
    });
    let extensions = has_ranges.then(|| quote! { extensions: #rt::ExtensionSet, });
    quote! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct #name {
            #(#fields)*
            #extensions
            unknown_fields: #rt::UnknownFieldSet,
        }
    }
}

fn constructor_fragment(
    ctx: &GenContext<'_>,
    codecs: &[FieldCodec<'_>],
    has_ranges: bool,
) -> Result<TokenStream> {
    let rt = &ctx.rt;
    let inits = codecs
        .iter()
        .map(|codec| {
            let ident = codec.ident();
            let init = field_init(codec)?;
            Ok(quote! { #ident: #init, })
        })
        .collect::<Result<Vec<_>>>()?;
    let extensions = has_ranges.then(|| quote! { extensions: #rt::ExtensionSet::new(), });
    Ok(quote! {
        /// A fresh value with every declared default applied.
        pub fn new() -> Self {
            Self {
                #(#inits)*
                #extensions
                unknown_fields: #rt::UnknownFieldSet::new(),
            }
        }
    })
}

/// Initial value: declared default when present, absent otherwise.
fn field_init(codec: &FieldCodec<'_>) -> Result<TokenStream> {
    if codec.is_repeated() {
        return Ok(quote! { ::std::vec::Vec::new() });
    }
    Ok(match codec.stored_default()? {
        Some(default) => default,
        None => quote! { ::std::option::Option::None },
    })
}

fn accessor_fragment(codec: &FieldCodec<'_>) -> Result<TokenStream> {
    let ident = codec.ident();
    let element = codec.element_tokens();
    let set = format_ident!("set_{}", codec.name());

    if codec.is_repeated() {
        let add = format_ident!("add_{}", codec.name());
        return Ok(quote! {
            pub fn #ident(&self) -> &[#element] {
                &self.#ident
            }

            pub fn #set(&mut self, values: ::std::vec::Vec<#element>) {
                self.#ident = values;
            }

            pub fn #add(&mut self, value: #element) {
                self.#ident.push(value);
            }
        });
    }

    let has = format_ident!("has_{}", codec.name());
    let body = match codec.kind() {
        FieldKind::Message => quote! {
            pub fn #ident(&self) -> ::std::option::Option<&#element> {
                self.#ident.as_deref()
            }

            pub fn #set(&mut self, value: #element) {
                self.#ident = ::std::option::Option::Some(::std::boxed::Box::new(value));
            }
        },
        FieldKind::String => {
            let default = codec.getter_default()?;
            quote! {
                pub fn #ident(&self) -> &str {
                    match &self.#ident {
                        ::std::option::Option::Some(value) => value,
                        ::std::option::Option::None => #default,
                    }
                }

                pub fn #set(&mut self, value: ::std::string::String) {
                    self.#ident = ::std::option::Option::Some(value);
                }
            }
        }
        FieldKind::Bytes => {
            let default = codec.getter_default()?;
            quote! {
                pub fn #ident(&self) -> &[u8] {
                    match &self.#ident {
                        ::std::option::Option::Some(value) => value,
                        ::std::option::Option::None => #default,
                    }
                }

                pub fn #set(&mut self, value: ::std::vec::Vec<u8>) {
                    self.#ident = ::std::option::Option::Some(value);
                }
            }
        }
        _ => {
            let default = codec.getter_default()?;
            quote! {
                pub fn #ident(&self) -> #element {
                    self.#ident.unwrap_or(#default)
                }

                pub fn #set(&mut self, value: #element) {
                    self.#ident = ::std::option::Option::Some(value);
                }
            }
        }
    };

    Ok(quote! {
        #body

        pub fn #has(&self) -> bool {
            self.#ident.is_some()
        }
    })
}

fn extension_accessor_fragment(ctx: &GenContext<'_>) -> TokenStream {
    let rt = &ctx.rt;
    quote! {
        pub fn get_extension(
            &self,
            extension: &#rt::Extension,
        ) -> &[#rt::ExtensionValue] {
            self.extensions.get(extension.number)
        }

        pub fn set_extension(&mut self, extension: &#rt::Extension, value: #rt::ExtensionValue) {
            self.extensions.set(extension.number, value);
        }

        pub fn clear_extension(&mut self, extension: &#rt::Extension) {
            self.extensions.remove(extension.number);
        }
    }
}

/// Re-emits a literal field table mirroring the input descriptor, for
/// runtime reflection.
fn descriptor_fragment(
    ctx: &GenContext<'_>,
    fqn: &str,
    codecs: &[FieldCodec<'_>],
) -> TokenStream {
    let rt = &ctx.rt;
    let entries = codecs.iter().map(|codec| {
        let name = codec.name();
        let number = Literal::u32_unsuffixed(codec.number());
        let kind = format_ident!("{}", format!("{:?}", codec.kind()));
        let label = if codec.is_repeated() {
            format_ident!("Repeated")
        } else if codec.is_required() {
            format_ident!("Required")
        } else {
            format_ident!("Optional")
        };
        let packed = codec.is_packed();
        let (type_name, default_value) = codec.descriptor_parts();
        quote! {
            #rt::FieldDescriptor {
                name: #name,
                number: #number,
                kind: #rt::FieldKind::#kind,
                label: #rt::Label::#label,
                packed: #packed,
                type_name: #type_name,
                default_value: #default_value,
            }
        }
    });
    quote! {
        /// Field table mirroring the source descriptor.
        pub fn descriptor() -> #rt::MessageDescriptor {
            #rt::MessageDescriptor {
                full_name: #fqn,
                fields: &[#(#entries),*],
            }
        }
    }
}

fn clear_fragment(codecs: &[FieldCodec<'_>], has_ranges: bool) -> Result<TokenStream> {
    let stmts = codecs
        .iter()
        .map(|codec| {
            let ident = codec.ident();
            if codec.is_repeated() {
                return Ok(quote! { self.#ident.clear(); });
            }
            let init = field_init(codec)?;
            Ok(quote! { self.#ident = #init; })
        })
        .collect::<Result<Vec<_>>>()?;
    let extensions = has_ranges.then(|| quote! { self.extensions.clear(); });
    Ok(quote! {
        /// Reset every field to its declared default, not to absent.
        pub fn clear(&mut self) {
            #(#stmts)*
            #extensions
            self.unknown_fields.clear();
        }
    })
}

fn merge_fragment(codecs: &[FieldCodec<'_>], has_ranges: bool) -> TokenStream {
    let stmts = codecs.iter().map(|codec| codec.merge_stmts());
    let extensions = has_ranges.then(|| quote! { self.extensions.merge_from(&other.extensions); });
    quote! {
        /// Field-wise merge: a truthy value on `other` overrides the
        /// receiver; zero/false/empty incoming values are kept out.
        pub fn merge_from(&mut self, other: &Self) {
            #(#stmts)*
            #extensions
            self.unknown_fields.merge_from(&other.unknown_fields);
        }
    }
}

fn from_map_fragment(ctx: &GenContext<'_>, codecs: &[FieldCodec<'_>]) -> TokenStream {
    let rt = &ctx.rt;

    // Required keys are validated before any defaults are constructed.
    let required_checks = codecs.iter().filter(|c| c.is_required()).map(|codec| {
        let name = codec.name();
        let number = Literal::u32_unsuffixed(codec.number());
        quote! {
            if !map.contains(#name) {
                return ::std::result::Result::Err(#rt::FieldError::missing(#name, #number));
            }
        }
    });

    let singular = codecs.iter().filter(|c| !c.is_repeated()).map(|codec| {
        let ident = codec.ident();
        let name = codec.name();
        let conversion = codec.map_conversion();
        let assign = if codec.kind() == FieldKind::Message {
            quote! {
                message.#ident = ::std::option::Option::Some(::std::boxed::Box::new(#conversion));
            }
        } else {
            quote! {
                message.#ident = ::std::option::Option::Some(#conversion);
            }
        };
        quote! {
            if let ::std::option::Option::Some(value) = map.get(#name) {
                #assign
            }
        }
    });

    let repeated = codecs.iter().filter(|c| c.is_repeated()).map(|codec| {
        let ident = codec.ident();
        let name = codec.name();
        let full_name = codec.full_name().to_string();
        let number = Literal::u32_unsuffixed(codec.number());
        let conversion = codec.map_conversion();
        quote! {
            if let ::std::option::Option::Some(values) = map.get(#name) {
                let values = values
                    .as_list()
                    .ok_or_else(|| #rt::FieldError::wrong_kind(#full_name, #number))?;
                for value in values {
                    message.#ident.push(#conversion);
                }
            }
        }
    });

    quote! {
        /// Build a value from a name-keyed map, validating required
        /// keys up front and applying declared defaults to the rest.
        pub fn from_map(map: &#rt::Map) -> ::std::result::Result<Self, #rt::FieldError> {
            #(#required_checks)*
            let mut message = Self::new();
            #(#singular)*
            #(#repeated)*
            ::std::result::Result::Ok(message)
        }
    }
}

/// The codec entry points: read_from / write_to / serialized_size.
fn codec_fragment(
    ctx: &GenContext<'_>,
    fqn: &str,
    codecs: &[FieldCodec<'_>],
    has_ranges: bool,
) -> Result<TokenStream> {
    let rt = &ctx.rt;

    let read_arms = codecs
        .iter()
        .map(|codec| codec.read_arm())
        .collect::<Result<Vec<_>>>()?;
    let write_stmts = codecs
        .iter()
        .map(|codec| codec.write_stmts())
        .collect::<Result<Vec<_>>>()?;
    let size_stmts = codecs
        .iter()
        .map(|codec| codec.size_stmts())
        .collect::<Result<Vec<_>>>()?;

    // Unmatched tags go to the extension registry first (when this
    // message can carry extensions), then to verbatim unknown capture.
    let fallthrough = if has_ranges {
        quote! {
            number => {
                if let ::std::option::Option::Some(extension) =
                    input.find_extension(#fqn, number)
                {
                    let value = (extension.read)(input, wire_type)?;
                    self.extensions.add(number, value);
                } else {
                    self.unknown_fields.read_field(number, wire_type, input)?;
                }
            }
        }
    } else {
        quote! {
            number => {
                self.unknown_fields.read_field(number, wire_type, input)?;
            }
        }
    };

    let ext_write = has_ranges.then(|| quote! { self.extensions.write_to(output)?; });
    let ext_size = has_ranges.then(|| quote! { size += self.extensions.serialized_size(); });

    Ok(quote! {
        /// Decode from the reader until its current limit.
        pub fn read_from(
            &mut self,
            input: &mut #rt::CodedReader<'_>,
        ) -> ::std::result::Result<(), #rt::WireError> {
            while let ::std::option::Option::Some((field_number, wire_type)) = input.read_tag()? {
                match field_number {
                    #(#read_arms)*
                    #fallthrough
                }
            }
            ::std::result::Result::Ok(())
        }

        /// Encode to the writer; fails on a missing required field
        /// before any of that field's bytes are emitted.
        pub fn write_to(
            &self,
            output: &mut #rt::CodedWriter,
        ) -> ::std::result::Result<(), #rt::WireError> {
            #(#write_stmts)*
            #ext_write
            self.unknown_fields.write_to(output)?;
            ::std::result::Result::Ok(())
        }

        /// Exact byte count `write_to` will produce.
        pub fn serialized_size(&self) -> usize {
            let mut size = 0usize;
            #(#size_stmts)*
            #ext_size
            size += self.unknown_fields.serialized_size();
            size
        }
    })
}

/// Convenience wrappers binding a configuration object to fresh
/// read/write contexts.
fn stream_fragment(ctx: &GenContext<'_>) -> TokenStream {
    let rt = &ctx.rt;
    quote! {
        pub fn parse_from_bytes(
            data: &[u8],
            config: &#rt::Config,
        ) -> ::std::result::Result<Self, #rt::WireError> {
            let mut message = Self::new();
            let mut input = config.reader(data);
            message.read_from(&mut input)?;
            ::std::result::Result::Ok(message)
        }

        pub fn write_to_bytes(
            &self,
            config: &#rt::Config,
        ) -> ::std::result::Result<::std::vec::Vec<u8>, #rt::WireError> {
            let mut output = config.writer();
            self.write_to(&mut output)?;
            ::std::result::Result::Ok(output.into_bytes())
        }
    }
}

// ----- enum units ---------------------------------------------------------

fn enum_unit(
    ctx: &GenContext<'_>,
    id: EntityId,
    desc: &EnumDescriptorProto,
) -> Result<TokenStream> {
    let entity = ctx.registry.entity(id);
    let rt = &ctx.rt;
    let name = format_ident!("{}", ctx.registry.class_name_of(id));
    let fqn = &entity.fqn;

    if desc.value.is_empty() {
        return Err(Error::malformed(format!("enum '{}' has no values", fqn)));
    }

    let variants: Vec<Ident> = desc
        .value
        .iter()
        .map(|value| format_ident!("{}", to_pascal_case(value.name())))
        .collect();
    let numbers: Vec<Literal> = desc
        .value
        .iter()
        .map(|value| Literal::i32_unsuffixed(value.number()))
        .collect();
    let names: Vec<&str> = desc.value.iter().map(|value| value.name()).collect();
    let first = &variants[0];

    // Alias values (allow_alias) share a number; only the first
    // declaration decodes.
    let mut seen = ::std::collections::HashSet::new();
    let from_arms = desc
        .value
        .iter()
        .zip(&variants)
        .filter(|(value, _)| seen.insert(value.number()))
        .map(|(value, variant)| {
            let number = Literal::i32_unsuffixed(value.number());
            quote! { #number => ::std::option::Option::Some(Self::#variant), }
        });

    Ok(quote! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum #name {
            #(#variants,)*
        }

        impl #name {
            /// Fully qualified protobuf type name.
            pub const FULL_NAME: &'static str = #fqn;

            /// Wire number of this value.
            pub fn number(self) -> i32 {
                match self {
                    #(Self::#variants => #numbers,)*
                }
            }

            /// Look up a value by wire number; unrecognized numbers
            /// yield `None`.
            pub fn from_number(number: i32) -> ::std::option::Option<Self> {
                match number {
                    #(#from_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            /// Value table mirroring the source descriptor.
            pub fn descriptor() -> #rt::EnumDescriptor {
                #rt::EnumDescriptor {
                    full_name: #fqn,
                    values: &[#((#names, #numbers)),*],
                }
            }
        }

        impl ::std::default::Default for #name {
            fn default() -> Self {
                Self::#first
            }
        }
    })
}

// ----- service units ------------------------------------------------------

fn service_unit(
    ctx: &GenContext<'_>,
    entity: &Entity,
    service: &ServiceDescriptorProto,
) -> Result<TokenStream> {
    let rt = &ctx.rt;
    let name = format_ident!("{}", entity.local_name);
    let fqn = &entity.fqn;

    let mut methods = Vec::new();
    let mut table = Vec::new();
    for method in &service.method {
        let referrer = format!("{}.{}", fqn, method.name());
        let input = ctx.registry.resolve(method.input_type(), &referrer)?;
        let output = ctx.registry.resolve(method.output_type(), &referrer)?;
        let input_ty = ctx.registry.type_tokens_of(input);
        let output_ty = ctx.registry.type_tokens_of(output);
        let method_name = format_ident!(
            "{}",
            sanitize_field_name(&to_snake_case(method.name()))
        );
        methods.push(quote! {
            fn #method_name(
                &self,
                request: #input_ty,
            ) -> ::std::result::Result<#output_ty, #rt::ServiceError>;
        });
        let rpc_name = method.name();
        let input_fqn = &ctx.registry.entity(input).fqn;
        let output_fqn = &ctx.registry.entity(output).fqn;
        table.push(quote! { (#rpc_name, #input_fqn, #output_fqn) });
    }

    Ok(quote! {
        pub trait #name {
            #(#methods)*
        }

        /// Method table mirroring the source descriptor.
        pub fn descriptor() -> #rt::ServiceDescriptor {
            #rt::ServiceDescriptor {
                full_name: #fqn,
                methods: &[#(#table),*],
            }
        }
    })
}

// ----- extension container units -----------------------------------------

fn extensions_unit(
    ctx: &GenContext<'_>,
    entity: &Entity,
    extensions: &[FieldDescriptorProto],
) -> Result<TokenStream> {
    let rt = &ctx.rt;
    let mut blocks = Vec::new();
    let mut registrations = Vec::new();

    for field in extensions {
        let codec = FieldCodec::new(ctx, &entity.fqn, field)?;
        let base = sanitize_field_name(field.name());
        let ext_fn = format_ident!("{}", base);
        let read_fn = format_ident!("read_{}", field.name());
        let write_fn = format_ident!("write_{}", field.name());
        let size_fn = format_ident!("size_{}", field.name());

        let handlers = codec.ext_handlers(&read_fn, &write_fn, &size_fn)?;
        let host = ctx
            .registry
            .resolve(field.extendee(), codec.full_name())?;
        let extendee = &ctx.registry.entity(host).fqn;
        let full_name = codec.full_name().to_string();
        let number = Literal::u32_unsuffixed(codec.number());

        blocks.push(quote! {
            pub fn #ext_fn() -> #rt::Extension {
                #rt::Extension {
                    extendee: #extendee,
                    full_name: #full_name,
                    number: #number,
                    read: #read_fn,
                    write: #write_fn,
                    size: #size_fn,
                }
            }

            #handlers
        });
        registrations.push(quote! { registry.register(#ext_fn()); });
    }

    Ok(quote! {
        #(#blocks)*

        /// Register every extension this file declares.
        pub fn register_all(registry: &mut #rt::ExtensionRegistry) {
            #(#registrations)*
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_entities;
    use crate::options::Options;
    use prost_types::compiler::CodeGeneratorRequest;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{EnumValueDescriptorProto, FileDescriptorProto, MethodDescriptorProto};

    fn field(
        name: &str,
        number: i32,
        r#type: Type,
        label: Label,
        type_name: &str,
    ) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label as i32),
            r#type: Some(r#type as i32),
            type_name: (!type_name.is_empty()).then(|| type_name.to_string()),
            ..Default::default()
        }
    }

    fn sample_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("sample.proto".to_string()),
            package: Some("acme".to_string()),
            message_type: vec![
                DescriptorProto {
                    name: Some("Person".to_string()),
                    field: vec![
                        field("count", 1, Type::Int32, Label::Required, ""),
                        field("lines", 2, Type::String, Label::Repeated, ""),
                        FieldDescriptorProto {
                            default_value: Some("HOME".to_string()),
                            ..field("kind", 3, Type::Enum, Label::Optional, ".acme.Kind")
                        },
                    ],
                    extension_range: vec![prost_types::descriptor_proto::ExtensionRange {
                        start: Some(100),
                        end: Some(200),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("Kind".to_string()),
                value: vec![
                    EnumValueDescriptorProto {
                        name: Some("HOME".to_string()),
                        number: Some(0),
                        ..Default::default()
                    },
                    EnumValueDescriptorProto {
                        name: Some("WORK".to_string()),
                        number: Some(1),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("Directory".to_string()),
                method: vec![MethodDescriptorProto {
                    name: Some("LookupPerson".to_string()),
                    input_type: Some(".acme.Person".to_string()),
                    output_type: Some(".acme.Person".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            extension: vec![FieldDescriptorProto {
                extendee: Some(".acme.Person".to_string()),
                ..field("nickname", 150, Type::String, Label::Optional, "")
            }],
            ..Default::default()
        }
    }

    fn generate(fqn: &str) -> String {
        let request = CodeGeneratorRequest {
            file_to_generate: vec!["sample.proto".to_string()],
            proto_file: vec![sample_file()],
            ..Default::default()
        };
        let options = Options::parse("").unwrap();
        let registry = build_entities(&request, &options).unwrap();
        let ctx = GenContext::new(&registry, &options);
        let id = registry.resolve(fqn, "test").unwrap();
        assemble(&ctx, id).unwrap()
    }

    #[test]
    fn message_unit_has_all_fragments_in_order() {
        let unit = generate("acme.Person");
        let positions: Vec<usize> = [
            "pub struct Person",
            "pub fn new",
            "pub fn set_count",
            "pub fn get_extension",
            "pub fn descriptor",
            "pub fn clear(",
            "pub fn merge_from",
            "pub fn from_map",
            "pub fn read_from",
            "pub fn write_to",
            "pub fn serialized_size",
            "pub fn parse_from_bytes",
            "impl ::protopress_rt::WireMessage for Person",
        ]
        .iter()
        .map(|needle| unit.find(needle).unwrap_or_else(|| panic!("missing {needle}: {unit}")))
        .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted, "fragments out of order");
    }

    #[test]
    fn message_unit_starts_with_header() {
        let unit = generate("acme.Person");
        assert!(unit.starts_with(
            "// Generated by protoc-gen-protopress from sample.proto. Do not edit."
        ));
    }

    #[test]
    fn required_field_guard_comes_first_in_write() {
        let unit = generate("acme.Person");
        let write_pos = unit.find("pub fn write_to").unwrap();
        let missing_pos = unit.find("missing_required").unwrap();
        assert!(missing_pos > write_pos);
        // Extension and unknown pass-through close the write.
        let unknown_pos = unit.rfind("self.unknown_fields.write_to").unwrap();
        assert!(unknown_pos > missing_pos);
    }

    #[test]
    fn enum_default_round_trips_through_clear() {
        let unit = generate("acme.Person");
        // new() and clear() both pin the declared default, not absent.
        assert_eq!(
            unit.matches("Some(crate::acme::Kind::Home)").count(),
            2,
            "{unit}"
        );
    }

    #[test]
    fn from_map_checks_required_before_defaults() {
        let unit = generate("acme.Person");
        let from_map = unit.find("pub fn from_map").unwrap();
        let check = unit[from_map..].find("FieldError::missing(\"count\", 1)").unwrap();
        let defaults = unit[from_map..].find("Self::new()").unwrap();
        assert!(check < defaults, "{unit}");
    }

    #[test]
    fn descriptor_table_names_field_kinds() {
        let unit = generate("acme.Person");
        assert!(
            unit.contains("kind: ::protopress_rt::FieldKind::Int32"),
            "{unit}"
        );
        assert!(
            unit.contains("kind: ::protopress_rt::FieldKind::String"),
            "{unit}"
        );
        assert!(
            unit.contains("kind: ::protopress_rt::FieldKind::Enum"),
            "{unit}"
        );
    }

    #[test]
    fn enum_unit_maps_numbers_both_ways() {
        let unit = generate("acme.Kind");
        assert!(unit.contains("pub enum Kind"), "{unit}");
        assert!(unit.contains("Home"), "{unit}");
        assert!(unit.contains("pub fn from_number"), "{unit}");
        assert!(unit.contains("(\"HOME\", 0)"), "{unit}");
        assert!(unit.contains("_ => ::std::option::Option::None"), "{unit}");
    }

    #[test]
    fn service_unit_is_a_trait() {
        let unit = generate("acme.Directory");
        assert!(unit.contains("pub trait Directory"), "{unit}");
        assert!(unit.contains("fn lookup_person"), "{unit}");
        assert!(unit.contains("crate::acme::Person"), "{unit}");
    }

    #[test]
    fn extension_unit_registers_named_handlers() {
        let unit = generate("acme.SampleExtensions");
        assert!(unit.contains("pub fn nickname()"), "{unit}");
        assert!(unit.contains("fn read_nickname"), "{unit}");
        assert!(unit.contains("fn write_nickname"), "{unit}");
        assert!(unit.contains("fn size_nickname"), "{unit}");
        assert!(unit.contains("pub fn register_all"), "{unit}");
        assert!(unit.contains("extendee: \"acme.Person\""), "{unit}");
    }

    #[test]
    fn host_message_dispatches_to_extensions_then_unknown() {
        let unit = generate("acme.Person");
        let find_ext = unit.find("find_extension").unwrap();
        let unknown = unit.find("read_field(number, wire_type, input)").unwrap();
        assert!(find_ext < unknown, "{unit}");
    }
}
