//! Descriptor-driven protobuf source generator.
//!
//! Consumes a resolved `CodeGeneratorRequest`, interns every message,
//! enum, service and per-file extension container it carries, and
//! emits one Rust source unit per entity: wire-format read/write/size
//! passes, accessors, declared defaults, merge, map construction and
//! extension dispatch. Generated code targets a runtime support crate
//! whose path is configurable through the `runtime` option.

pub mod builder;
pub mod compiler;
pub mod error;
pub mod fields;
pub mod names;
pub mod options;
pub mod registry;
pub mod units;
pub mod wire;

pub use compiler::{compile, compile_bytes};
pub use error::{Error, Result};
pub use options::Options;
