// Field codec statement generator.
//
// Given one field descriptor and its declaring entity, produces the
// read, write and size statement fragments implementing the wire-format
// rules: varint/zigzag/fixed encodings, packed vs unpacked repetition,
// length-delimited nesting, last-wins singular reads and
// required-presence validation. Tag keys and tag lengths are
// precomputed here so the emitted write and size passes cannot
// disagree.
//
// The fragments are plain token values; the unit assembler splices them
// into the codec entry points without further interpretation.

use proc_macro2::{Ident, Literal, TokenStream};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::FieldDescriptorProto;
use quote::{format_ident, quote};

use crate::error::{Error, Result};
use crate::names::{runtime_path_tokens, sanitize_field_name, to_pascal_case};
use crate::options::Options;
use crate::registry::{EntityId, EntityPayload, Registry};
use crate::wire::{make_tag, varint_len, WireType};

/// Everything the statement generators need, passed explicitly through
/// the call graph. One per compile invocation.
pub struct GenContext<'a> {
    pub registry: &'a Registry,
    pub options: &'a Options,
    /// Token path of the runtime support crate, e.g. `::protopress_rt`.
    pub rt: TokenStream,
}

impl<'a> GenContext<'a> {
    pub fn new(registry: &'a Registry, options: &'a Options) -> Self {
        Self {
            registry,
            options,
            rt: runtime_path_tokens(&options.runtime_crate),
        }
    }
}

/// Scalar/enum/message classification driving the codec table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    SFixed32,
    Float,
    Fixed64,
    SFixed64,
    Double,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
}

impl FieldKind {
    /// Classify a descriptor type; anything outside the table (groups)
    /// is a fatal `UnsupportedFieldKind`.
    pub fn classify(field: &FieldDescriptorProto, referrer: &str) -> Result<Self> {
        Ok(match field.r#type() {
            Type::Int32 => FieldKind::Int32,
            Type::Int64 => FieldKind::Int64,
            Type::Uint32 => FieldKind::UInt32,
            Type::Uint64 => FieldKind::UInt64,
            Type::Sint32 => FieldKind::SInt32,
            Type::Sint64 => FieldKind::SInt64,
            Type::Fixed32 => FieldKind::Fixed32,
            Type::Sfixed32 => FieldKind::SFixed32,
            Type::Float => FieldKind::Float,
            Type::Fixed64 => FieldKind::Fixed64,
            Type::Sfixed64 => FieldKind::SFixed64,
            Type::Double => FieldKind::Double,
            Type::Bool => FieldKind::Bool,
            Type::String => FieldKind::String,
            Type::Bytes => FieldKind::Bytes,
            Type::Enum => FieldKind::Enum,
            Type::Message => FieldKind::Message,
            Type::Group => {
                return Err(Error::UnsupportedFieldKind {
                    kind: field.r#type.unwrap_or(0),
                    field: referrer.to_string(),
                })
            }
        })
    }

    pub fn wire_type(self) -> WireType {
        match self {
            FieldKind::Fixed32 | FieldKind::SFixed32 | FieldKind::Float => WireType::Fixed32,
            FieldKind::Fixed64 | FieldKind::SFixed64 | FieldKind::Double => WireType::Fixed64,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message => {
                WireType::LengthDelimited
            }
            _ => WireType::Varint,
        }
    }

    /// Constant payload size, where the table gives one.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            FieldKind::Fixed32 | FieldKind::SFixed32 | FieldKind::Float => Some(4),
            FieldKind::Fixed64 | FieldKind::SFixed64 | FieldKind::Double => Some(8),
            FieldKind::Bool => Some(1),
            _ => None,
        }
    }

    /// Packable: the packed flag is honored only for these; it is
    /// ignored for message/string/bytes regardless of the descriptor.
    pub fn is_packable(self) -> bool {
        !matches!(self, FieldKind::String | FieldKind::Bytes | FieldKind::Message)
    }

    /// Reader method on the runtime `CodedReader`.
    fn read_method(self) -> Ident {
        format_ident!("read_{}", self.suffix())
    }

    /// Writer method on the runtime `CodedWriter`.
    fn write_method(self) -> Ident {
        format_ident!("write_{}", self.suffix())
    }

    fn suffix(self) -> &'static str {
        match self {
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::UInt32 => "uint32",
            FieldKind::UInt64 => "uint64",
            FieldKind::SInt32 => "sint32",
            FieldKind::SInt64 => "sint64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::SFixed32 => "sfixed32",
            FieldKind::Float => "float",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::SFixed64 => "sfixed64",
            FieldKind::Double => "double",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            // Enums travel as int32 varints.
            FieldKind::Enum => "int32",
            FieldKind::Message => unreachable!("message fields have no scalar accessor"),
        }
    }

    /// Runtime `ExtensionValue` variant carrying one occurrence.
    pub fn extension_variant(self) -> Ident {
        let name = match self {
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 | FieldKind::Enum => {
                "Int32"
            }
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => "Int64",
            FieldKind::UInt32 | FieldKind::Fixed32 => "UInt32",
            FieldKind::UInt64 | FieldKind::Fixed64 => "UInt64",
            FieldKind::Float => "Float",
            FieldKind::Double => "Double",
            FieldKind::Bool => "Bool",
            FieldKind::String => "String",
            FieldKind::Bytes => "Bytes",
            FieldKind::Message => "Message",
        };
        format_ident!("{name}")
    }
}

/// Per-field code generator bound to its declaring entity.
pub struct FieldCodec<'a> {
    ctx: &'a GenContext<'a>,
    field: &'a FieldDescriptorProto,
    /// `Declaring.full_name.field_name`, for diagnostics and emitted
    /// validation errors.
    full_name: String,
    kind: FieldKind,
    /// Resolved handle for enum/message typed fields.
    type_ref: Option<EntityId>,
}

impl<'a> FieldCodec<'a> {
    pub fn new(
        ctx: &'a GenContext<'a>,
        declaring_fqn: &str,
        field: &'a FieldDescriptorProto,
    ) -> Result<Self> {
        let full_name = format!("{}.{}", declaring_fqn, field.name());
        let kind = FieldKind::classify(field, &full_name)?;
        let type_ref = match kind {
            FieldKind::Enum | FieldKind::Message => {
                Some(ctx.registry.resolve(field.type_name(), &full_name)?)
            }
            _ => None,
        };
        Ok(Self {
            ctx,
            field,
            full_name,
            kind,
            type_ref,
        })
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Raw descriptor field name, unsanitized.
    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// Raw descriptor bits mirrored into the reconstruction fragment.
    pub fn descriptor_parts(&self) -> (&str, &str) {
        (
            self.field.type_name(),
            self.field.default_value.as_deref().unwrap_or(""),
        )
    }

    pub fn number(&self) -> u32 {
        self.field.number() as u32
    }

    pub fn ident(&self) -> Ident {
        format_ident!("{}", sanitize_field_name(self.field.name()))
    }

    pub fn is_repeated(&self) -> bool {
        self.field.label() == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.field.label() == Label::Required
    }

    /// Packed is an explicit flag and only meaningful on repeated
    /// packable scalars.
    pub fn is_packed(&self) -> bool {
        self.is_repeated()
            && self.kind.is_packable()
            && self
                .field
                .options
                .as_ref()
                .map(|o| o.packed())
                .unwrap_or(false)
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    fn rt(&self) -> &TokenStream {
        &self.ctx.rt
    }

    /// Tag key for the field's natural wire type.
    fn tag(&self) -> u32 {
        make_tag(self.number(), self.kind.wire_type())
    }

    /// Tag key used by the packed representation.
    fn packed_tag(&self) -> u32 {
        make_tag(self.number(), WireType::LengthDelimited)
    }

    fn tag_literal(&self) -> Literal {
        Literal::u32_unsuffixed(self.tag())
    }

    fn tag_len_literal(&self) -> Literal {
        Literal::usize_unsuffixed(varint_len(self.tag() as u64))
    }

    /// Rust path of a resolved enum/message type.
    fn type_tokens(&self) -> TokenStream {
        self.ctx
            .registry
            .type_tokens_of(self.type_ref.expect("scalar field has no type reference"))
    }

    /// Element type as stored (i32, String, crate::ns::Type, ...).
    pub fn element_tokens(&self) -> TokenStream {
        match self.kind {
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => quote! { i32 },
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => quote! { i64 },
            FieldKind::UInt32 | FieldKind::Fixed32 => quote! { u32 },
            FieldKind::UInt64 | FieldKind::Fixed64 => quote! { u64 },
            FieldKind::Float => quote! { f32 },
            FieldKind::Double => quote! { f64 },
            FieldKind::Bool => quote! { bool },
            FieldKind::String => quote! { ::std::string::String },
            FieldKind::Bytes => quote! { ::std::vec::Vec<u8> },
            FieldKind::Enum | FieldKind::Message => self.type_tokens(),
        }
    }

    /// Declared storage: `Option<T>` for singular (boxed for messages,
    /// recursion-safe), `Vec<T>` for repeated. Vec does not allocate
    /// until the first element lands, which gives the lazy backing
    /// collection for free.
    pub fn storage_tokens(&self) -> TokenStream {
        let element = self.element_tokens();
        if self.is_repeated() {
            quote! { ::std::vec::Vec<#element> }
        } else if self.kind == FieldKind::Message {
            quote! { ::std::option::Option<::std::boxed::Box<#element>> }
        } else {
            quote! { ::std::option::Option<#element> }
        }
    }

    /// Copy kinds bind loop/match variables by value.
    fn is_copy(&self) -> bool {
        !matches!(
            self.kind,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message
        )
    }

    // ----- read ---------------------------------------------------------

    /// Expression decoding one payload of this kind from `input`.
    /// Message fields are handled structurally and never come here.
    fn read_value_expr(&self) -> TokenStream {
        let method = self.kind.read_method();
        quote! { input.#method()? }
    }

    /// One `match field_number` arm for the read dispatch loop.
    pub fn read_arm(&self) -> Result<TokenStream> {
        let number = Literal::u32_unsuffixed(self.number());
        let ident = self.ident();

        let arm = if self.is_repeated() {
            match self.kind {
                FieldKind::Message => {
                    let ty = self.type_tokens();
                    quote! {
                        #number => {
                            let len = input.read_length()?;
                            let limit = input.push_limit(len)?;
                            let mut element = #ty::new();
                            element.read_from(input)?;
                            input.pop_limit(limit);
                            self.#ident.push(element);
                        }
                    }
                }
                FieldKind::String | FieldKind::Bytes => {
                    let value = self.read_value_expr();
                    quote! {
                        #number => {
                            self.#ident.push(#value);
                        }
                    }
                }
                FieldKind::Enum => {
                    let ty = self.type_tokens();
                    let rt = self.rt();
                    // Packed runs are accepted on read even when the
                    // field is declared unpacked, and vice versa.
                    quote! {
                        #number => {
                            if wire_type == #rt::WireType::LengthDelimited {
                                let len = input.read_length()?;
                                let limit = input.push_limit(len)?;
                                while !input.at_limit() {
                                    if let Some(value) = #ty::from_number(input.read_int32()?) {
                                        self.#ident.push(value);
                                    }
                                }
                                input.pop_limit(limit);
                            } else if let Some(value) = #ty::from_number(input.read_int32()?) {
                                self.#ident.push(value);
                            }
                        }
                    }
                }
                _ => {
                    let value = self.read_value_expr();
                    let rt = self.rt();
                    quote! {
                        #number => {
                            if wire_type == #rt::WireType::LengthDelimited {
                                let len = input.read_length()?;
                                let limit = input.push_limit(len)?;
                                while !input.at_limit() {
                                    self.#ident.push(#value);
                                }
                                input.pop_limit(limit);
                            } else {
                                self.#ident.push(#value);
                            }
                        }
                    }
                }
            }
        } else {
            // Singular: a later occurrence overwrites the previous one.
            match self.kind {
                FieldKind::Message => {
                    let ty = self.type_tokens();
                    // A fresh value replaces the previous occurrence
                    // wholesale; occurrences are not merged.
                    quote! {
                        #number => {
                            let len = input.read_length()?;
                            let limit = input.push_limit(len)?;
                            let mut element = #ty::new();
                            element.read_from(input)?;
                            input.pop_limit(limit);
                            self.#ident = ::std::option::Option::Some(
                                ::std::boxed::Box::new(element),
                            );
                        }
                    }
                }
                FieldKind::Enum => {
                    let ty = self.type_tokens();
                    // An unrecognized number leaves the field absent;
                    // see the forward-compatibility note in DESIGN.md.
                    quote! {
                        #number => {
                            self.#ident = #ty::from_number(input.read_int32()?);
                        }
                    }
                }
                _ => {
                    let value = self.read_value_expr();
                    quote! {
                        #number => {
                            self.#ident = ::std::option::Option::Some(#value);
                        }
                    }
                }
            }
        };

        Ok(arm)
    }

    // ----- write --------------------------------------------------------

    /// Statements writing one payload for the bound expression, tag not
    /// included.
    fn write_value_stmts(&self, value: TokenStream) -> TokenStream {
        match self.kind {
            FieldKind::Message => quote! {
                output.write_length(#value.serialized_size())?;
                #value.write_to(output)?;
            },
            FieldKind::Enum => quote! {
                output.write_int32(#value.number())?;
            },
            _ => {
                let method = self.kind.write_method();
                quote! {
                    output.#method(#value)?;
                }
            }
        }
    }

    /// Presence-guarded write statements for this field.
    pub fn write_stmts(&self) -> Result<TokenStream> {
        let ident = self.ident();
        let tag = self.tag_literal();

        if self.is_repeated() {
            if self.is_packed() {
                return Ok(self.packed_write_stmts());
            }
            // Unpacked: one tag + one payload per element, insertion
            // order.
            let binding = if self.is_copy() {
                quote! { &value }
            } else {
                quote! { value }
            };
            let payload = self.write_value_stmts(quote! { value });
            return Ok(quote! {
                for #binding in &self.#ident {
                    output.write_tag(#tag)?;
                    #payload
                }
            });
        }

        let payload = self.write_value_stmts(quote! { value });
        let guard = if self.is_copy() {
            quote! { let ::std::option::Option::Some(value) = self.#ident }
        } else {
            quote! { let ::std::option::Option::Some(value) = &self.#ident }
        };

        if self.is_required() {
            // Presence is validated immediately before this field's
            // bytes; the whole write aborts when absent.
            let rt = self.rt();
            let full_name = &self.full_name;
            let number = Literal::u32_unsuffixed(self.number());
            Ok(quote! {
                {
                    #guard else {
                        return ::std::result::Result::Err(
                            #rt::WireError::missing_required(#full_name, #number),
                        );
                    };
                    output.write_tag(#tag)?;
                    #payload
                }
            })
        } else {
            Ok(quote! {
                if #guard {
                    output.write_tag(#tag)?;
                    #payload
                }
            })
        }
    }

    fn packed_write_stmts(&self) -> TokenStream {
        let ident = self.ident();
        let packed_tag = Literal::u32_unsuffixed(self.packed_tag());
        let payload = self.write_value_stmts(quote! { value });

        // Inner size pre-pass; fixed-width kinds collapse to a multiply.
        if let Some(width) = self.kind.fixed_size() {
            let width = Literal::usize_unsuffixed(width);
            quote! {
                if !self.#ident.is_empty() {
                    output.write_tag(#packed_tag)?;
                    output.write_length(self.#ident.len() * #width)?;
                    for &value in &self.#ident {
                        #payload
                    }
                }
            }
        } else {
            let element_size = self.size_value_expr(quote! { value });
            quote! {
                if !self.#ident.is_empty() {
                    output.write_tag(#packed_tag)?;
                    let mut inner = 0usize;
                    for &value in &self.#ident {
                        inner += #element_size;
                    }
                    output.write_length(inner)?;
                    for &value in &self.#ident {
                        #payload
                    }
                }
            }
        }
    }

    // ----- size ---------------------------------------------------------

    /// Payload byte count for the bound expression, tag not included.
    /// Shares the canonical varint length with the write pass.
    fn size_value_expr(&self, value: TokenStream) -> TokenStream {
        self.size_value_expr_for(self.kind, value)
    }

    fn size_value_expr_for(&self, kind: FieldKind, value: TokenStream) -> TokenStream {
        let rt = self.rt();
        if let Some(width) = kind.fixed_size() {
            let width = Literal::usize_unsuffixed(width);
            return quote! { #width };
        }
        match kind {
            FieldKind::Int32 | FieldKind::Enum => {
                let value = if kind == FieldKind::Enum {
                    quote! { #value.number() }
                } else {
                    value
                };
                // Negative int32 sign-extends to ten bytes.
                quote! { #rt::varint_len(#value as i64 as u64) }
            }
            FieldKind::Int64 => quote! { #rt::varint_len(#value as u64) },
            FieldKind::UInt32 => quote! { #rt::varint_len(#value as u64) },
            FieldKind::UInt64 => quote! { #rt::varint_len(#value) },
            FieldKind::SInt32 => quote! { #rt::varint_len(#rt::zigzag32(#value) as u64) },
            FieldKind::SInt64 => quote! { #rt::varint_len(#rt::zigzag64(#value)) },
            FieldKind::String | FieldKind::Bytes => quote! {
                #rt::varint_len(#value.len() as u64) + #value.len()
            },
            FieldKind::Message => quote! {
                {
                    let inner = #value.serialized_size();
                    #rt::varint_len(inner as u64) + inner
                }
            },
            _ => unreachable!("fixed kinds handled above"),
        }
    }

    /// Presence-guarded size statements accumulating into `size`.
    pub fn size_stmts(&self) -> Result<TokenStream> {
        let ident = self.ident();
        let tag_len = self.tag_len_literal();
        let rt = self.rt();

        if self.is_repeated() {
            if self.is_packed() {
                let packed_tag_len =
                    Literal::usize_unsuffixed(varint_len(self.packed_tag() as u64));
                if let Some(width) = self.kind.fixed_size() {
                    let width = Literal::usize_unsuffixed(width);
                    return Ok(quote! {
                        if !self.#ident.is_empty() {
                            let inner = self.#ident.len() * #width;
                            size += #packed_tag_len + #rt::varint_len(inner as u64) + inner;
                        }
                    });
                }
                let element_size = self.size_value_expr(quote! { value });
                return Ok(quote! {
                    if !self.#ident.is_empty() {
                        let mut inner = 0usize;
                        for &value in &self.#ident {
                            inner += #element_size;
                        }
                        size += #packed_tag_len + #rt::varint_len(inner as u64) + inner;
                    }
                });
            }
            if let Some(width) = self.kind.fixed_size() {
                let width = Literal::usize_unsuffixed(width);
                return Ok(quote! {
                    size += self.#ident.len() * (#tag_len + #width);
                });
            }
            let binding = if self.is_copy() {
                quote! { &value }
            } else {
                quote! { value }
            };
            let element_size = self.size_value_expr(quote! { value });
            return Ok(quote! {
                for #binding in &self.#ident {
                    size += #tag_len + #element_size;
                }
            });
        }

        let guard = if self.is_copy() {
            quote! { if let ::std::option::Option::Some(value) = self.#ident }
        } else {
            quote! { if let ::std::option::Option::Some(value) = &self.#ident }
        };
        let payload_size = self.size_value_expr(quote! { value });
        Ok(quote! {
            #guard {
                size += #tag_len + #payload_size;
            }
        })
    }

    // ----- defaults and accessors --------------------------------------

    /// Tokens for the declared default value, when the descriptor
    /// carries one.
    pub fn declared_default(&self) -> Result<Option<TokenStream>> {
        let Some(raw) = self.field.default_value.as_deref() else {
            return Ok(None);
        };
        let tokens = self.parse_default(raw)?;
        Ok(Some(tokens))
    }

    /// Getter fallback: the declared default, else the kind's zero
    /// value (first enum value for enums).
    pub fn getter_default(&self) -> Result<TokenStream> {
        if let Some(default) = self.declared_default()? {
            return Ok(default);
        }
        Ok(match self.kind {
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => quote! { 0i32 },
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => quote! { 0i64 },
            FieldKind::UInt32 | FieldKind::Fixed32 => quote! { 0u32 },
            FieldKind::UInt64 | FieldKind::Fixed64 => quote! { 0u64 },
            FieldKind::Float => quote! { 0.0f32 },
            FieldKind::Double => quote! { 0.0f64 },
            FieldKind::Bool => quote! { false },
            FieldKind::String => quote! { "" },
            FieldKind::Bytes => quote! { b"" },
            FieldKind::Enum => {
                let ty = self.type_tokens();
                let first = self.first_enum_value()?;
                quote! { #ty::#first }
            }
            FieldKind::Message => unreachable!("message getters return Option"),
        })
    }

    fn parse_default(&self, raw: &str) -> Result<TokenStream> {
        let bad = |what: &str| {
            Error::malformed(format!(
                "bad {what} default '{raw}' on field '{}'",
                self.full_name
            ))
        };
        Ok(match self.kind {
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
                let v: i32 = raw.parse().map_err(|_| bad("int32"))?;
                let lit = Literal::i32_suffixed(v);
                quote! { #lit }
            }
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => {
                let v: i64 = raw.parse().map_err(|_| bad("int64"))?;
                let lit = Literal::i64_suffixed(v);
                quote! { #lit }
            }
            FieldKind::UInt32 | FieldKind::Fixed32 => {
                let v: u32 = raw.parse().map_err(|_| bad("uint32"))?;
                let lit = Literal::u32_suffixed(v);
                quote! { #lit }
            }
            FieldKind::UInt64 | FieldKind::Fixed64 => {
                let v: u64 = raw.parse().map_err(|_| bad("uint64"))?;
                let lit = Literal::u64_suffixed(v);
                quote! { #lit }
            }
            FieldKind::Float => float_default_tokens(raw, true).ok_or_else(|| bad("float"))?,
            FieldKind::Double => float_default_tokens(raw, false).ok_or_else(|| bad("double"))?,
            FieldKind::Bool => match raw {
                "true" => quote! { true },
                "false" => quote! { false },
                _ => return Err(bad("bool")),
            },
            FieldKind::String => {
                let lit = Literal::string(raw);
                quote! { #lit }
            }
            FieldKind::Bytes => {
                let bytes = unescape_bytes_default(raw).ok_or_else(|| bad("bytes"))?;
                let lit = Literal::byte_string(&bytes);
                quote! { #lit }
            }
            FieldKind::Enum => {
                let ty = self.type_tokens();
                let value = self.enum_value_ident(raw)?;
                quote! { #ty::#value }
            }
            FieldKind::Message => return Err(bad("message")),
        })
    }

    fn enum_entity(&self) -> &EntityPayload {
        &self
            .ctx
            .registry
            .entity(self.type_ref.expect("enum field resolved at construction"))
            .payload
    }

    fn first_enum_value(&self) -> Result<Ident> {
        let EntityPayload::Enum(desc) = self.enum_entity() else {
            return Err(Error::malformed(format!(
                "'{}' references a non-enum type as enum",
                self.full_name
            )));
        };
        let first = desc.value.first().ok_or_else(|| {
            Error::malformed(format!("empty enum referenced by '{}'", self.full_name))
        })?;
        Ok(format_ident!("{}", to_pascal_case(first.name())))
    }

    fn enum_value_ident(&self, name: &str) -> Result<Ident> {
        let EntityPayload::Enum(desc) = self.enum_entity() else {
            return Err(Error::malformed(format!(
                "'{}' references a non-enum type as enum",
                self.full_name
            )));
        };
        if !desc.value.iter().any(|v| v.name() == name) {
            return Err(Error::malformed(format!(
                "default '{}' is not a value of the enum referenced by '{}'",
                name, self.full_name
            )));
        }
        Ok(format_ident!("{}", to_pascal_case(name)))
    }

    /// Default expression for the stored representation, when the
    /// descriptor declares one: `Some(5i32)`, `Some("x".to_string())`.
    /// Used by the constructor and `clear()` so "has a default" stays
    /// distinguishable from "optional with no default".
    pub fn stored_default(&self) -> Result<Option<TokenStream>> {
        if self.is_repeated() {
            return Ok(None);
        }
        let Some(default) = self.declared_default()? else {
            return Ok(None);
        };
        let owned = match self.kind {
            FieldKind::String => quote! { #default.to_string() },
            FieldKind::Bytes => quote! { #default.to_vec() },
            _ => default,
        };
        Ok(Some(quote! { ::std::option::Option::Some(#owned) }))
    }

    // ----- extension handlers ------------------------------------------

    /// Effective kind for extension-set storage: enums travel and stay
    /// as their raw number so unrecognized values survive.
    fn ext_kind(&self) -> FieldKind {
        if self.kind == FieldKind::Enum {
            FieldKind::Int32
        } else {
            self.kind
        }
    }

    /// The three named handler functions for one extension field:
    /// read one occurrence into an `ExtensionValue`, write it back,
    /// size it. Ordinary functions referenced by pointer from the
    /// `Extension` value, never compiled at runtime.
    pub fn ext_handlers(
        &self,
        read_fn: &Ident,
        write_fn: &Ident,
        size_fn: &Ident,
    ) -> Result<TokenStream> {
        let rt = self.rt().clone();
        let kind = self.ext_kind();
        let variant = kind.extension_variant();
        let full_name = &self.full_name;
        let number = Literal::u32_unsuffixed(self.number());
        let tag = self.tag_literal();
        let tag_len = self.tag_len_literal();

        let read_body = match kind {
            FieldKind::Message => {
                let ty = self.type_tokens();
                quote! {
                    let len = input.read_length()?;
                    let limit = input.push_limit(len)?;
                    let mut element = #ty::new();
                    element.read_from(input)?;
                    input.pop_limit(limit);
                    ::std::result::Result::Ok(#rt::ExtensionValue::Message(
                        ::std::boxed::Box::new(element),
                    ))
                }
            }
            _ => {
                let method = kind.read_method();
                quote! {
                    ::std::result::Result::Ok(#rt::ExtensionValue::#variant(input.#method()?))
                }
            }
        };

        let (write_guard, write_payload, size_guard, size_payload) = match kind {
            FieldKind::Message => (
                quote! { let #rt::ExtensionValue::Message(value) = value },
                quote! {
                    output.write_length(value.serialized_size())?;
                    value.write_to(output)?;
                },
                quote! { let #rt::ExtensionValue::Message(value) = value },
                quote! {
                    let inner = value.serialized_size();
                    #tag_len + #rt::varint_len(inner as u64) + inner
                },
            ),
            FieldKind::String | FieldKind::Bytes => {
                let method = kind.write_method();
                (
                    quote! { let #rt::ExtensionValue::#variant(value) = value },
                    quote! { output.#method(value)?; },
                    quote! { let #rt::ExtensionValue::#variant(value) = value },
                    quote! { #tag_len + #rt::varint_len(value.len() as u64) + value.len() },
                )
            }
            _ => {
                let method = kind.write_method();
                let payload_size = self.size_value_expr_for(kind, quote! { value });
                (
                    quote! { let &#rt::ExtensionValue::#variant(value) = value },
                    quote! { output.#method(value)?; },
                    quote! { let &#rt::ExtensionValue::#variant(value) = value },
                    quote! { #tag_len + #payload_size },
                )
            }
        };

        Ok(quote! {
            fn #read_fn(
                input: &mut #rt::CodedReader<'_>,
                _wire_type: #rt::WireType,
            ) -> ::std::result::Result<#rt::ExtensionValue, #rt::WireError> {
                #read_body
            }

            fn #write_fn(
                value: &#rt::ExtensionValue,
                output: &mut #rt::CodedWriter,
            ) -> ::std::result::Result<(), #rt::WireError> {
                #write_guard else {
                    return ::std::result::Result::Err(
                        #rt::WireError::extension_kind_mismatch(#full_name, #number),
                    );
                };
                output.write_tag(#tag)?;
                #write_payload
                ::std::result::Result::Ok(())
            }

            fn #size_fn(value: &#rt::ExtensionValue) -> usize {
                #size_guard else { return 0 };
                #size_payload
            }
        })
    }

    /// Truthiness test used by the generated merge: a zero/false/empty
    /// incoming value keeps the receiver's value. Preserved observed
    /// behavior; see DESIGN.md before changing.
    pub fn merge_stmts(&self) -> TokenStream {
        let ident = self.ident();
        if self.is_repeated() {
            return quote! {
                if !other.#ident.is_empty() {
                    self.#ident = other.#ident.clone();
                }
            };
        }
        match self.kind {
            FieldKind::Message => quote! {
                if other.#ident.is_some() {
                    self.#ident = other.#ident.clone();
                }
            },
            FieldKind::String | FieldKind::Bytes => quote! {
                if other.#ident.as_ref().is_some_and(|value| !value.is_empty()) {
                    self.#ident = other.#ident.clone();
                }
            },
            FieldKind::Bool => quote! {
                if other.#ident == ::std::option::Option::Some(true) {
                    self.#ident = other.#ident;
                }
            },
            FieldKind::Float | FieldKind::Double => quote! {
                if other.#ident.is_some_and(|value| value != 0.0) {
                    self.#ident = other.#ident;
                }
            },
            FieldKind::Enum => quote! {
                if other.#ident.is_some_and(|value| value.number() != 0) {
                    self.#ident = other.#ident;
                }
            },
            _ => quote! {
                if other.#ident.is_some_and(|value| value != 0) {
                    self.#ident = other.#ident;
                }
            },
        }
    }

    /// Conversion from a runtime `Value` (from_map input) to the stored
    /// element, as an expression over `value`.
    pub fn map_conversion(&self) -> TokenStream {
        let rt = self.rt();
        let full_name = &self.full_name;
        let number = Literal::u32_unsuffixed(self.number());
        let wrong = quote! {
            .ok_or_else(|| #rt::FieldError::wrong_kind(#full_name, #number))?
        };
        match self.kind {
            FieldKind::Int32 | FieldKind::SInt32 | FieldKind::SFixed32 => {
                quote! { value.as_i32() #wrong }
            }
            FieldKind::Int64 | FieldKind::SInt64 | FieldKind::SFixed64 => {
                quote! { value.as_i64() #wrong }
            }
            FieldKind::UInt32 | FieldKind::Fixed32 => quote! { value.as_u32() #wrong },
            FieldKind::UInt64 | FieldKind::Fixed64 => quote! { value.as_u64() #wrong },
            FieldKind::Float => quote! { value.as_f32() #wrong },
            FieldKind::Double => quote! { value.as_f64() #wrong },
            FieldKind::Bool => quote! { value.as_bool() #wrong },
            FieldKind::String => quote! { value.as_str() #wrong .to_string() },
            FieldKind::Bytes => quote! { value.as_bytes() #wrong .to_vec() },
            FieldKind::Enum => {
                let ty = self.type_tokens();
                quote! {
                    #ty::from_number(value.as_i32() #wrong) #wrong
                }
            }
            FieldKind::Message => {
                let ty = self.type_tokens();
                quote! { #ty::from_map(value.as_map() #wrong)? }
            }
        }
    }
}

fn float_default_tokens(raw: &str, single: bool) -> Option<TokenStream> {
    let special = match raw {
        "inf" => Some(quote! { INFINITY }),
        "-inf" => Some(quote! { NEG_INFINITY }),
        "nan" => Some(quote! { NAN }),
        _ => None,
    };
    if let Some(constant) = special {
        return Some(if single {
            quote! { f32::#constant }
        } else {
            quote! { f64::#constant }
        });
    }
    if single {
        let v: f32 = raw.parse().ok()?;
        let lit = Literal::f32_suffixed(v);
        Some(quote! { #lit })
    } else {
        let v: f64 = raw.parse().ok()?;
        let lit = Literal::f64_suffixed(v);
        Some(quote! { #lit })
    }
}

/// Bytes defaults arrive C-escaped in the descriptor.
fn unescape_bytes_default(raw: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.bytes().peekable();
    while let Some(byte) = chars.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match chars.next()? {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'x' => {
                let hi = (chars.next()? as char).to_digit(16)?;
                let lo = (chars.next()? as char).to_digit(16)?;
                out.push((hi * 16 + lo) as u8);
            }
            digit @ b'0'..=b'7' => {
                let mut value = (digit - b'0') as u32;
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&next @ b'0'..=b'7') => {
                            value = value * 8 + (next - b'0') as u32;
                            chars.next();
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_entities;
    use prost_types::compiler::CodeGeneratorRequest;
    use prost_types::{DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto,
        FieldOptions, FileDescriptorProto};

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

    fn test_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("test.proto".to_string()),
            package: Some("acme".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Item".to_string()),
                field: vec![
                    field("count", 1, Type::Int32, Label::Required, ""),
                    field("lines", 2, Type::String, Label::Repeated, ""),
                    field("child", 3, Type::Message, Label::Optional, ".acme.Item"),
                    field("kind", 4, Type::Enum, Label::Optional, ".acme.Kind"),
                    FieldDescriptorProto {
                        options: Some(FieldOptions {
                            packed: Some(true),
                            ..Default::default()
                        }),
                        ..field("nums", 5, Type::Sint64, Label::Repeated, "")
                    },
                ],
                ..Default::default()
            }],
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
            ..Default::default()
        }
    }

    fn with_codec(field_index: usize, check: impl FnOnce(&FieldCodec<'_>)) {
        let request = CodeGeneratorRequest {
            file_to_generate: vec!["test.proto".to_string()],
            proto_file: vec![test_file()],
            ..Default::default()
        };
        let options = Options::parse("").unwrap();
        let registry = build_entities(&request, &options).unwrap();
        let ctx = GenContext::new(&registry, &options);
        let id = registry.resolve("acme.Item", "test").unwrap();
        let entity = registry.entity(id);
        let message = entity.message().unwrap().clone();
        let codec = FieldCodec::new(&ctx, &entity.fqn, &message.field[field_index]).unwrap();
        check(&codec);
    }

    #[test]
    fn classify_rejects_groups() {
        let group = field("g", 1, Type::Group, Label::Optional, ".acme.G");
        let err = FieldKind::classify(&group, "acme.Item.g").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFieldKind { kind: 10, .. }));
    }

    #[test]
    fn worked_example_tags_are_precomputed() {
        with_codec(0, |codec| {
            assert_eq!(codec.tag(), 0x08);
            let write = codec.write_stmts().unwrap().to_string();
            assert!(write.contains("write_tag (8"), "{write}");
            assert!(write.contains("missing_required"), "{write}");
            let size = codec.size_stmts().unwrap().to_string();
            assert!(size.contains("size += 1"), "{size}");
        });
        with_codec(1, |codec| {
            assert_eq!(codec.tag(), 0x12);
            assert!(!codec.is_packed(), "packed is ignored for strings");
        });
    }

    #[test]
    fn required_write_validates_before_tag_bytes() {
        with_codec(0, |codec| {
            let write = codec.write_stmts().unwrap().to_string();
            let err_pos = write.find("missing_required").unwrap();
            let tag_pos = write.find("write_tag").unwrap();
            assert!(err_pos < tag_pos, "{write}");
        });
    }

    #[test]
    fn unpacked_repeated_writes_tag_per_element() {
        with_codec(1, |codec| {
            let write = codec.write_stmts().unwrap().to_string();
            assert!(write.contains("for value in & self . lines"), "{write}");
            assert!(write.contains("write_tag (18"), "{write}");
            assert!(!write.contains("write_length (inner"), "{write}");
        });
    }

    #[test]
    fn packed_repeated_single_tag_and_inner_size() {
        with_codec(4, |codec| {
            assert!(codec.is_packed());
            let write = codec.write_stmts().unwrap().to_string();
            // Tag 5, wire type 2 -> 0x2A = 42.
            assert!(write.contains("write_tag (42"), "{write}");
            assert!(write.contains("inner += "), "{write}");
            assert!(write.contains("zigzag64"), "{write}");
            let size = codec.size_stmts().unwrap().to_string();
            assert!(size.contains("varint_len (inner as u64) + inner"), "{size}");
        });
    }

    #[test]
    fn message_field_pushes_and_pops_limit() {
        with_codec(2, |codec| {
            let read = codec.read_arm().unwrap().to_string();
            assert!(read.contains("push_limit"), "{read}");
            assert!(read.contains("pop_limit"), "{read}");
            let write = codec.write_stmts().unwrap().to_string();
            assert!(write.contains("serialized_size"), "{write}");
            assert_eq!(
                codec.storage_tokens().to_string(),
                ":: std :: option :: Option < :: std :: boxed :: Box < crate :: acme :: Item >>"
            );
        });
    }

    #[test]
    fn singular_message_read_replaces_previous_value() {
        with_codec(2, |codec| {
            let read = codec.read_arm().unwrap().to_string();
            assert!(
                read.contains("Some (:: std :: boxed :: Box :: new (element)"),
                "{read}"
            );
            assert!(!read.contains("get_or_insert_with"), "{read}");
        });
    }

    #[test]
    fn enum_read_drops_unknown_numbers() {
        with_codec(3, |codec| {
            let read = codec.read_arm().unwrap().to_string();
            assert!(read.contains("from_number"), "{read}");
            let getter = codec.getter_default().unwrap().to_string();
            assert!(getter.ends_with(":: Home"), "{getter}");
        });
    }

    #[test]
    fn singular_read_is_last_wins() {
        with_codec(0, |codec| {
            let read = codec.read_arm().unwrap().to_string();
            assert!(read.contains("self . count = :: std :: option :: Option :: Some"), "{read}");
        });
    }

    #[test]
    fn merge_keeps_receiver_on_falsy_incoming() {
        with_codec(0, |codec| {
            let merge = codec.merge_stmts().to_string();
            assert!(merge.contains("value != 0"), "{merge}");
        });
        with_codec(1, |codec| {
            let merge = codec.merge_stmts().to_string();
            assert!(merge.contains("is_empty"), "{merge}");
        });
    }

    #[test]
    fn bytes_default_unescapes_c_style() {
        assert_eq!(
            unescape_bytes_default(r"a\x01\n\377b").unwrap(),
            vec![b'a', 1, b'\n', 0xFF, b'b']
        );
        assert!(unescape_bytes_default(r"\q").is_none());
    }
}
