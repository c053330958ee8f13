// Generation options parsed from the request parameter string.
//
// protoc passes plugin options as a single comma-separated string of
// key=value pairs; values may be percent-encoded so paths and dots
// survive the trip through the command line.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Parsed generation configuration, built once per compile call.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Global namespace override applied to every file without a
    /// per-file entry.
    pub package_override: Option<String>,
    /// Per-file namespace overrides, keyed by descriptor file name.
    pub file_packages: BTreeMap<String, String>,
    /// PSR-style output path prefix mappings: namespace prefix -> path
    /// prefix replacing it.
    pub path_prefixes: Vec<(String, String)>,
    /// Also emit units for files that are only imported, not requested.
    pub generate_imported: bool,
    /// Crate path the generated code uses for runtime support types.
    pub runtime_crate: String,
    /// Log chattiness requested through the parameter string.
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

pub const DEFAULT_RUNTIME_CRATE: &str = "protopress_rt";

impl Options {
    /// Parse the free-form parameter string from the request.
    ///
    /// An empty or absent parameter yields the defaults. Unknown keys
    /// are rejected so typos do not silently change output.
    pub fn parse(parameter: &str) -> Result<Self> {
        let mut options = Options {
            runtime_crate: DEFAULT_RUNTIME_CRATE.to_string(),
            ..Options::default()
        };

        for pair in parameter.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k.trim(), percent_decode(v)?),
                None => (pair.trim(), String::new()),
            };
            match key {
                "package" => match value.split_once(':') {
                    Some((file, ns)) => {
                        options
                            .file_packages
                            .insert(file.to_string(), ns.to_string());
                    }
                    None => options.package_override = Some(value),
                },
                "prefix" => {
                    let (ns, path) = value
                        .split_once(':')
                        .ok_or_else(|| Error::InvalidOption(pair.to_string()))?;
                    options
                        .path_prefixes
                        .push((ns.to_string(), path.trim_end_matches('/').to_string()));
                }
                "runtime" => {
                    if value.is_empty() {
                        return Err(Error::InvalidOption(pair.to_string()));
                    }
                    options.runtime_crate = value;
                }
                "generate_imported" => {
                    options.generate_imported = parse_bool(&value, pair)?;
                }
                "verbose" => options.verbosity = Verbosity::Verbose,
                "quiet" => options.verbosity = Verbosity::Quiet,
                _ => return Err(Error::InvalidOption(pair.to_string())),
            }
        }

        // Longest namespace prefix must win during path mapping.
        options
            .path_prefixes
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Ok(options)
    }

    /// Namespace for a file: per-file override, then the global
    /// override, then the file's own package.
    pub fn namespace_for(&self, file_name: &str, package: &str) -> String {
        if let Some(ns) = self.file_packages.get(file_name) {
            return ns.clone();
        }
        if let Some(ns) = &self.package_override {
            return ns.clone();
        }
        package.to_string()
    }

    /// Apply the longest matching namespace prefix mapping to a
    /// slash-joined class path.
    pub fn map_path(&self, class_path: &str) -> String {
        for (ns, path_prefix) in &self.path_prefixes {
            let ns_path = ns.replace('.', "/");
            if let Some(rest) = class_path.strip_prefix(&ns_path) {
                if rest.is_empty() {
                    return path_prefix.clone();
                }
                if let Some(rest) = rest.strip_prefix('/') {
                    if path_prefix.is_empty() {
                        return rest.to_string();
                    }
                    return format!("{path_prefix}/{rest}");
                }
            }
        }
        class_path.to_string()
    }
}

fn parse_bool(value: &str, pair: &str) -> Result<bool> {
    match value {
        "" | "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Error::InvalidOption(pair.to_string())),
    }
}

/// Decode %XX escapes; '+' is left alone since protoc does not apply
/// form encoding to plugin parameters.
fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::InvalidOption(value.to_string()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidOption(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parameter_gives_defaults() {
        let options = Options::parse("").unwrap();
        assert!(options.package_override.is_none());
        assert!(!options.generate_imported);
        assert_eq!(options.runtime_crate, DEFAULT_RUNTIME_CRATE);
        assert_eq!(options.verbosity, Verbosity::Normal);
    }

    #[test]
    fn parses_full_parameter() {
        let options = Options::parse(
            "package=acme.api,prefix=acme.api:gen%2Fapi,generate_imported=1,runtime=my_rt,verbose",
        )
        .unwrap();
        assert_eq!(options.package_override.as_deref(), Some("acme.api"));
        assert_eq!(
            options.path_prefixes,
            vec![("acme.api".to_string(), "gen/api".to_string())]
        );
        assert!(options.generate_imported);
        assert_eq!(options.runtime_crate, "my_rt");
        assert_eq!(options.verbosity, Verbosity::Verbose);
    }

    #[test]
    fn per_file_package_override_wins() {
        let options = Options::parse("package=global,package=a.proto:special").unwrap();
        assert_eq!(options.namespace_for("a.proto", "pkg"), "special");
        assert_eq!(options.namespace_for("b.proto", "pkg"), "global");
    }

    #[test]
    fn file_package_used_without_overrides() {
        let options = Options::parse("").unwrap();
        assert_eq!(options.namespace_for("a.proto", "foo.bar"), "foo.bar");
    }

    #[test]
    fn path_mapping_strips_longest_prefix() {
        let options = Options::parse("prefix=acme:out,prefix=acme.api:api_out").unwrap();
        assert_eq!(options.map_path("acme/api/Thing"), "api_out/Thing");
        assert_eq!(options.map_path("acme/other/Thing"), "out/other/Thing");
        assert_eq!(options.map_path("elsewhere/Thing"), "elsewhere/Thing");
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Options::parse("bogus=1").is_err());
    }

    #[test]
    fn bad_percent_escape_is_rejected() {
        assert!(Options::parse("prefix=a:b%zz").is_err());
    }
}
