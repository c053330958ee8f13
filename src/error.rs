//! Error types for the protopress generator.
//!
//! Every variant is fatal for the whole compile invocation: the
//! orchestrator never recovers per file or per entity, it surfaces the
//! first failure with enough context to name the offending
//! file/type/field. `MissingRequired` style validation errors are
//! *emitted into* generated code and never raised here.

use thiserror::Error;

/// Result type alias for generator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal generator errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A type or extendee name did not resolve in the registry.
    #[error("unresolved type reference '{name}' (referenced from {referrer})")]
    UnresolvedReference {
        /// The fully qualified name that failed to resolve
        name: String,
        /// The entity or field holding the dangling reference
        referrer: String,
    },

    /// A field carried a type kind outside the classification table.
    #[error("unsupported field kind {kind} on field '{field}'")]
    UnsupportedFieldKind {
        /// Raw descriptor type number
        kind: i32,
        /// Fully qualified field name
        field: String,
    },

    /// A descriptor violated a structural invariant.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// The request parameter string did not parse.
    #[error("invalid option parameter '{0}'")]
    InvalidOption(String),

    /// The generation request bytes did not decode.
    #[error("failed to decode generation request: {0}")]
    RequestDecode(#[from] prost::DecodeError),

    /// An assembled unit failed to parse as Rust source.
    #[error("generated unit for '{entity}' does not parse: {source}")]
    Render {
        /// Fully qualified name of the entity being rendered
        entity: String,
        /// Parse error from syn
        source: syn::Error,
    },
}

impl Error {
    pub(crate) fn unresolved(name: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            name: name.into(),
            referrer: referrer.into(),
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDescriptor(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_reference() {
        let err = Error::unresolved(".foo.Missing", "foo.Holder.field");
        let text = err.to_string();
        assert!(text.contains(".foo.Missing"));
        assert!(text.contains("foo.Holder.field"));
    }
}
