// Entity builder: walks the descriptor tree of the whole request and
// interns one entity per message, enum, service and per-file extension
// container. Runs before any generation so cross-file references
// resolve regardless of declaration order.

use std::collections::HashMap;

use prost_types::compiler::CodeGeneratorRequest;
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

use crate::error::{Error, Result};
use crate::names::to_pascal_case;
use crate::options::Options;
use crate::registry::{Entity, EntityId, EntityPayload, Registry};

/// Build the registry over the entire request, then verify every
/// type/extendee reference and the field-number invariant.
pub fn build_entities(request: &CodeGeneratorRequest, options: &Options) -> Result<Registry> {
    let mut registry = Registry::new();

    for file in &request.proto_file {
        let generate = request
            .file_to_generate
            .iter()
            .any(|name| name == file.name());
        build_file(&mut registry, file, options, generate)?;
    }

    verify_references(&registry)?;
    Ok(registry)
}

fn build_file(
    registry: &mut Registry,
    file: &FileDescriptorProto,
    options: &Options,
    generate: bool,
) -> Result<()> {
    let namespace = options.namespace_for(file.name(), file.package());
    let scope = FileScope {
        file: file.name().to_string(),
        namespace,
        generate,
    };

    for message in &file.message_type {
        build_message(registry, &scope, message, None, file.package())?;
    }
    for enum_desc in &file.enum_type {
        let fqn = scope.qualify(file.package(), enum_desc.name());
        registry.insert(scope.entity(fqn, enum_desc.name(), None,
            EntityPayload::Enum(enum_desc.clone())))?;
    }
    for service in &file.service {
        let fqn = scope.qualify(file.package(), service.name());
        registry.insert(scope.entity(fqn, service.name(), None,
            EntityPayload::Service(service.clone())))?;
    }

    if has_extensions(file) {
        let extensions = collect_extensions(file);
        let local_name = extension_container_name(file.name());
        let fqn = scope.qualify(file.package(), &local_name);
        registry.insert(scope.entity(fqn, &local_name, None,
            EntityPayload::Extensions(extensions)))?;
    }

    Ok(())
}

fn build_message(
    registry: &mut Registry,
    scope: &FileScope,
    message: &DescriptorProto,
    parent: Option<EntityId>,
    parent_fqn: &str,
) -> Result<()> {
    let fqn = scope.qualify(parent_fqn, message.name());
    let id = registry.insert(scope.entity(
        fqn.clone(),
        message.name(),
        parent,
        EntityPayload::Message(message.clone()),
    ))?;

    for nested in &message.nested_type {
        build_message(registry, scope, nested, Some(id), &fqn)?;
    }
    for enum_desc in &message.enum_type {
        let enum_fqn = scope.qualify(&fqn, enum_desc.name());
        registry.insert(scope.entity(enum_fqn, enum_desc.name(), Some(id),
            EntityPayload::Enum(enum_desc.clone())))?;
    }

    Ok(())
}

/// True if the file or any message within it owns a non-empty
/// extension list.
pub fn has_extensions(file: &FileDescriptorProto) -> bool {
    !file.extension.is_empty() || file.message_type.iter().any(message_has_extensions)
}

fn message_has_extensions(message: &DescriptorProto) -> bool {
    !message.extension.is_empty() || message.nested_type.iter().any(message_has_extensions)
}

/// All extension fields declared by a file, top-level first, then
/// per-message in declaration order.
fn collect_extensions(file: &FileDescriptorProto) -> Vec<FieldDescriptorProto> {
    let mut extensions = file.extension.clone();
    for message in &file.message_type {
        collect_message_extensions(message, &mut extensions);
    }
    extensions
}

fn collect_message_extensions(message: &DescriptorProto, out: &mut Vec<FieldDescriptorProto>) {
    out.extend(message.extension.iter().cloned());
    for nested in &message.nested_type {
        collect_message_extensions(nested, out);
    }
}

/// `dir/my_file.proto` -> `MyFileExtensions`.
fn extension_container_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit('/')
        .next()
        .unwrap_or(file_name)
        .trim_end_matches(".proto");
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}Extensions", to_pascal_case(&sanitized))
}

struct FileScope {
    file: String,
    namespace: String,
    generate: bool,
}

impl FileScope {
    fn qualify(&self, parent: &str, name: &str) -> String {
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}.{name}")
        }
    }

    fn entity(
        &self,
        fqn: String,
        local_name: &str,
        parent: Option<EntityId>,
        payload: EntityPayload,
    ) -> Entity {
        Entity {
            fqn,
            local_name: local_name.to_string(),
            namespace: self.namespace.clone(),
            file: self.file.clone(),
            parent,
            generate: self.generate,
            payload,
        }
    }
}

/// Post-build link pass: every message/enum type reference and every
/// extendee must resolve, and field numbers must stay disjoint within
/// each message once extensions are folded in. Fatal on first failure.
fn verify_references(registry: &Registry) -> Result<()> {
    // Extension numbers claimed per extendee, for the uniqueness check.
    let mut claimed: HashMap<EntityId, HashMap<i32, String>> = HashMap::new();

    for (_, entity) in registry.iter() {
        match &entity.payload {
            EntityPayload::Message(message) => {
                let mut numbers: HashMap<i32, &str> = HashMap::new();
                for field in &message.field {
                    let referrer = format!("{}.{}", entity.fqn, field.name());
                    if !field.type_name().is_empty() {
                        registry.resolve(field.type_name(), &referrer)?;
                    }
                    if let Some(previous) = numbers.insert(field.number(), field.name()) {
                        return Err(Error::malformed(format!(
                            "field number {} reused by '{}.{}' (already held by '{}')",
                            field.number(),
                            entity.fqn,
                            field.name(),
                            previous
                        )));
                    }
                }
            }
            EntityPayload::Extensions(extensions) => {
                for field in extensions {
                    let referrer = format!("{}.{}", entity.fqn, field.name());
                    let host = registry.resolve(field.extendee(), &referrer)?;
                    if !field.type_name().is_empty() {
                        registry.resolve(field.type_name(), &referrer)?;
                    }
                    let host_entity = registry.entity(host);
                    let host_fields = host_entity
                        .message()
                        .ok_or_else(|| {
                            Error::malformed(format!(
                                "extendee '{}' of '{}' is not a message",
                                field.extendee(),
                                referrer
                            ))
                        })?;
                    let in_range = host_fields.extension_range.iter().any(|range| {
                        field.number() >= range.start() && field.number() < range.end()
                    });
                    if !in_range {
                        return Err(Error::malformed(format!(
                            "extension '{}' number {} is outside the extension ranges of '{}'",
                            referrer,
                            field.number(),
                            host_entity.fqn
                        )));
                    }
                    let taken = host_fields
                        .field
                        .iter()
                        .any(|f| f.number() == field.number());
                    let slot = claimed.entry(host).or_default();
                    if taken || slot.contains_key(&field.number()) {
                        return Err(Error::malformed(format!(
                            "extension '{}' reuses field number {} of '{}'",
                            referrer,
                            field.number(),
                            host_entity.fqn
                        )));
                    }
                    slot.insert(field.number(), referrer);
                }
            }
            EntityPayload::Service(service) => {
                for method in &service.method {
                    let referrer = format!("{}.{}", entity.fqn, method.name());
                    registry.resolve(method.input_type(), &referrer)?;
                    registry.resolve(method.output_type(), &referrer)?;
                }
            }
            EntityPayload::Enum(_) => {}
        }
    }

    Ok(())
}
