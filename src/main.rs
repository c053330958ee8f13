use std::io::{Read, Write};
use std::{env, fs};

use anyhow::Context;
use prost::Message;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use tracing_subscriber::EnvFilter;

use protopress::compiler;

fn main() -> anyhow::Result<()> {
    // stdout carries the response, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // protoc drives the plugin over stdin/stdout; a file argument is
    // accepted for replaying a captured request by hand.
    let bytes = match env::args().nth(1) {
        Some(path) if path != "-" => {
            fs::read(&path).with_context(|| format!("reading request from {path}"))?
        }
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .lock()
                .read_to_end(&mut buf)
                .context("reading CodeGeneratorRequest from stdin")?;
            buf
        }
    };

    let request = CodeGeneratorRequest::decode(bytes.as_slice())
        .context("decoding CodeGeneratorRequest; run this as a protoc plugin")?;

    // Generation failures are reported through the response error
    // field so protoc can attribute them to the plugin.
    let response = match compiler::compile(&request) {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(%err, "generation failed");
            CodeGeneratorResponse {
                error: Some(err.to_string()),
                ..Default::default()
            }
        }
    };

    std::io::stdout()
        .lock()
        .write_all(&response.encode_to_vec())
        .context("writing CodeGeneratorResponse to stdout")?;
    Ok(())
}
