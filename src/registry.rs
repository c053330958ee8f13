// Entity registry shared by the whole compile invocation.
//
// Every message, enum, service and extension container across the
// request (dependencies included) is interned here before any
// statement generation starts, so message-type fields can reference
// siblings declared later or in another file. Lookups hand out stable
// `EntityId` handles into an index-addressed arena; generators only
// ever carry handles, never repeated name lookups.

use std::collections::HashMap;

use proc_macro2::TokenStream;
use prost_types::{DescriptorProto, EnumDescriptorProto, FieldDescriptorProto,
    ServiceDescriptorProto};

use crate::error::{Error, Result};
use crate::names;
use crate::options::Options;

/// Stable handle to an interned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

/// Generation unit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Message,
    Enum,
    Service,
    Extensions,
}

/// Descriptor payload owned by an entity.
#[derive(Debug, Clone)]
pub enum EntityPayload {
    Message(DescriptorProto),
    Enum(EnumDescriptorProto),
    Service(ServiceDescriptorProto),
    /// All extension fields declared by one file, in declaration order.
    Extensions(Vec<FieldDescriptorProto>),
}

/// One generation unit: a descriptor plus its resolved identity.
/// Immutable once interned; generated content is collected separately
/// by the orchestrator.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Fully qualified proto name, dotted, without leading dot.
    pub fqn: String,
    /// Unqualified name within the declaring scope.
    pub local_name: String,
    /// Mapped namespace (after package overrides).
    pub namespace: String,
    /// Declaring file name.
    pub file: String,
    /// Enclosing message entity, for nested types.
    pub parent: Option<EntityId>,
    /// True iff the declaring file was explicitly requested.
    pub generate: bool,
    pub payload: EntityPayload,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self.payload {
            EntityPayload::Message(_) => EntityKind::Message,
            EntityPayload::Enum(_) => EntityKind::Enum,
            EntityPayload::Service(_) => EntityKind::Service,
            EntityPayload::Extensions(_) => EntityKind::Extensions,
        }
    }

    pub fn message(&self) -> Option<&DescriptorProto> {
        match &self.payload {
            EntityPayload::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn enum_desc(&self) -> Option<&EnumDescriptorProto> {
        match &self.payload {
            EntityPayload::Enum(e) => Some(e),
            _ => None,
        }
    }
}

/// FQN -> entity arena, built once per compile call.
#[derive(Debug, Default)]
pub struct Registry {
    entities: Vec<Entity>,
    by_fqn: HashMap<String, EntityId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an entity. Duplicate fully qualified names indicate a
    /// malformed request.
    pub fn insert(&mut self, entity: Entity) -> Result<EntityId> {
        let id = EntityId(self.entities.len() as u32);
        if self.by_fqn.insert(entity.fqn.clone(), id).is_some() {
            return Err(Error::malformed(format!(
                "duplicate type name '{}' in request",
                entity.fqn
            )));
        }
        self.entities.push(entity);
        Ok(id)
    }

    /// Resolve a type reference such as `.acme.api.Person`. Failure is
    /// fatal for the whole compile.
    pub fn resolve(&self, name: &str, referrer: &str) -> Result<EntityId> {
        self.by_fqn
            .get(name.trim_start_matches('.'))
            .copied()
            .ok_or_else(|| Error::unresolved(name, referrer))
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities in interning order (deterministic: request order).
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityId(i as u32), e))
    }

    /// Flat class name: nested-parent chain joined with underscores,
    /// e.g. `Person_PhoneNumber`.
    pub fn class_name_of(&self, id: EntityId) -> String {
        let entity = self.entity(id);
        match entity.parent {
            Some(parent) => format!("{}_{}", self.class_name_of(parent), entity.local_name),
            None => entity.local_name.clone(),
        }
    }

    /// Slash-joined class path used for output placement:
    /// `acme/api/Person_PhoneNumber`.
    pub fn class_path_of(&self, id: EntityId) -> String {
        let entity = self.entity(id);
        let class_name = self.class_name_of(id);
        if entity.namespace.is_empty() {
            class_name
        } else {
            format!("{}/{}", entity.namespace.replace('.', "/"), class_name)
        }
    }

    /// Relative output path for a unit, after prefix mapping.
    pub fn output_path_of(&self, id: EntityId, options: &Options) -> String {
        format!("{}.rs", options.map_path(&self.class_path_of(id)))
    }

    /// Rust path tokens for referencing this entity from another unit.
    pub fn type_tokens_of(&self, id: EntityId) -> TokenStream {
        let entity = self.entity(id);
        names::class_path_tokens(&entity.namespace, &self.class_name_of(id))
    }
}
