// Compile orchestrator: request in, response out.
//
// Option parsing, entity interning, reference verification and unit
// assembly run in that order; any failure aborts the whole invocation
// with no partial output. Units are emitted in interning order, which
// follows the request, so identical requests produce byte-identical
// responses.

use prost::Message;
use prost_types::compiler::{code_generator_response, CodeGeneratorRequest, CodeGeneratorResponse};
use tracing::{debug, info};

use crate::builder::build_entities;
use crate::error::Result;
use crate::fields::GenContext;
use crate::options::{Options, Verbosity};
use crate::units;

/// Run the full pipeline over a decoded request.
pub fn compile(request: &CodeGeneratorRequest) -> Result<CodeGeneratorResponse> {
    let options = Options::parse(request.parameter())?;
    let registry = build_entities(request, &options)?;
    let ctx = GenContext::new(&registry, &options);

    let mut response = CodeGeneratorResponse::default();
    for (id, entity) in registry.iter() {
        if !entity.generate && !options.generate_imported {
            if options.verbosity != Verbosity::Quiet {
                info!(entity = %entity.fqn, file = %entity.file, "skipping imported type");
            }
            continue;
        }
        let path = registry.output_path_of(id, &options);
        let content = units::assemble(&ctx, id)?;
        debug!(entity = %entity.fqn, path = %path, bytes = content.len(), "assembled unit");
        response.file.push(code_generator_response::File {
            name: Some(path),
            content: Some(content),
            ..Default::default()
        });
    }

    if options.verbosity != Verbosity::Quiet {
        info!(units = response.file.len(), "generation complete");
    }
    Ok(response)
}

/// Plugin wire entry point: decode the request from protobuf bytes and
/// encode the response back.
pub fn compile_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let request = CodeGeneratorRequest::decode(data)?;
    let response = compile(&request)?;
    Ok(response.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto};

    fn request() -> CodeGeneratorRequest {
        let dep = FileDescriptorProto {
            name: Some("common.proto".to_string()),
            package: Some("common".to_string()),
            message_type: vec![DescriptorProto {
                name: Some("Timestamp".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let main = FileDescriptorProto {
            name: Some("event.proto".to_string()),
            package: Some("acme".to_string()),
            dependency: vec!["common.proto".to_string()],
            message_type: vec![DescriptorProto {
                name: Some("Event".to_string()),
                field: vec![FieldDescriptorProto {
                    name: Some("at".to_string()),
                    number: Some(1),
                    label: Some(Label::Optional as i32),
                    r#type: Some(Type::Message as i32),
                    type_name: Some(".common.Timestamp".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        CodeGeneratorRequest {
            file_to_generate: vec!["event.proto".to_string()],
            proto_file: vec![dep, main],
            ..Default::default()
        }
    }

    #[test]
    fn only_requested_files_are_emitted() {
        let response = compile(&request()).unwrap();
        let names: Vec<_> = response.file.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["acme/Event.rs"]);
    }

    #[test]
    fn generate_imported_adds_dependency_units() {
        let mut req = request();
        req.parameter = Some("generate_imported".to_string());
        let response = compile(&req).unwrap();
        let names: Vec<_> = response.file.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["common/Timestamp.rs", "acme/Event.rs"]);
    }

    #[test]
    fn identical_requests_produce_identical_bytes() {
        let req = request();
        let bytes = req.encode_to_vec();
        let first = compile_bytes(&bytes).unwrap();
        let second = compile_bytes(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn skipped_imports_are_noticed_at_default_verbosity() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);

        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            compile(&request()).unwrap();
        });
        let logs = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("skipping imported type"), "{logs}");
        assert!(logs.contains("common.proto"), "{logs}");
    }

    #[test]
    fn unresolved_reference_fails_whole_compile() {
        let mut req = request();
        req.proto_file.remove(0);
        let err = compile(&req).unwrap_err();
        assert!(err.to_string().contains(".common.Timestamp"), "{err}");
    }

    #[test]
    fn cross_unit_reference_uses_crate_path() {
        let mut req = request();
        req.parameter = Some("generate_imported".to_string());
        let response = compile(&req).unwrap();
        let event = response
            .file
            .iter()
            .find(|f| f.name() == "acme/Event.rs")
            .unwrap();
        assert!(
            event.content().contains("crate::common::Timestamp"),
            "{}",
            event.content()
        );
    }
}
