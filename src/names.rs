// Identifier mapping between descriptor names and emitted Rust names.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where",
    "while", "async", "await", "dyn",
];

pub fn sanitize_field_name(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        // Use rust r# syntax for keywords
        format!("r#{}", name)
    } else {
        name.to_string()
    }
}

/// Sanitize a namespace segment; r# is not usable in module paths so
/// keywords get a trailing underscore instead.
pub fn sanitize_module_name(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        format!("{}_", name)
    } else {
        name.to_string()
    }
}

/// Convert snake_case or SCREAMING_SNAKE to PascalCase (enum values,
/// extension container names).
pub fn to_pascal_case(name: &str) -> String {
    name.split('_')
        .map(|part| {
            let lowered = part.to_lowercase();
            let mut chars = lowered.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

/// Convert PascalCase or camelCase to snake_case (rpc method names).
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Build the `crate::ns::Name` token path for a class name whose
/// namespace segments are dot-joined.
pub fn class_path_tokens(namespace: &str, class_name: &str) -> TokenStream {
    let segments: Vec<_> = namespace
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| format_ident!("{}", sanitize_module_name(s)))
        .collect();
    let name = format_ident!("{}", class_name);
    quote! { crate::#(#segments::)* #name }
}

/// Token path of the runtime support crate the generated code targets.
pub fn runtime_path_tokens(runtime_crate: &str) -> TokenStream {
    let segments: Vec<_> = runtime_crate
        .split("::")
        .filter(|s| !s.is_empty())
        .map(|s| format_ident!("{}", s))
        .collect();
    quote! { ::#(#segments)::* }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_get_raw_prefix() {
        assert_eq!(sanitize_field_name("type"), "r#type");
        assert_eq!(sanitize_field_name("count"), "count");
        assert_eq!(sanitize_module_name("mod"), "mod_");
    }

    #[test]
    fn pascal_case_handles_screaming_snake() {
        assert_eq!(to_pascal_case("PHONE_TYPE_HOME"), "PhoneTypeHome");
        assert_eq!(to_pascal_case("addressbook"), "Addressbook");
        assert_eq!(to_pascal_case("my_file"), "MyFile");
    }

    #[test]
    fn snake_case_handles_camel_and_pascal() {
        assert_eq!(to_snake_case("LookupPerson"), "lookup_person");
        assert_eq!(to_snake_case("getHTTPStatus"), "get_httpstatus");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn class_path_joins_namespace() {
        let tokens = class_path_tokens("acme.api", "Person");
        assert_eq!(tokens.to_string(), "crate :: acme :: api :: Person");
        let tokens = class_path_tokens("", "Person");
        assert_eq!(tokens.to_string(), "crate :: Person");
    }

    #[test]
    fn runtime_path_is_absolute() {
        assert_eq!(
            runtime_path_tokens("protopress_rt").to_string(),
            ":: protopress_rt"
        );
    }
}
