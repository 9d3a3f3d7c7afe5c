//! The `pulumi import --file` manifest: model, construction from exported
//! state plus intercepted captures, skeleton merging, and filtering.

pub mod deployment;
pub mod merge;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stackferry_core::PLACEHOLDER_ID;

#[derive(Debug, Error)]
pub enum ImportFileError {
    #[error("reading import file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("writing import file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("decoding import file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decoding exported deployment: {0}")]
    Deployment(#[source] serde_json::Error),
}

/// The file shape expected by `pulumi import --file`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFile {
    /// In-language variable names to URNs, used for parent and provider
    /// references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub name_table: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: Vec<ImportResource>,
}

/// A single import entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResource {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub name: String,

    /// Provider-determined import ID. Required unless `component` is set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// The logical name used in state; `name` is then only for codegen.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logical_name: String,

    /// Properties to include in generated code; all when unspecified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,

    /// Import as an empty component resource (no `id`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub component: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Parent resource name; must be present in the name table.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,

    /// Provider resource name; must be present in the name table.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

impl ImportResource {
    pub fn has_placeholder_id(&self) -> bool {
        self.id.eq_ignore_ascii_case(PLACEHOLDER_ID)
    }
}

/// Stable ordering for emitted files: by type, then name.
pub fn sort_resources(resources: &mut [ImportResource]) {
    resources.sort_by(|a, b| {
        a.resource_type
            .cmp(&b.resource_type)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Classify CloudFormation stack entries that can never become Pulumi
/// import entries. Returns the skip reason, or `None` for importable types.
pub fn unsupported_stack_resource(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "" => Some("missing resource type"),
        "AWS::CDK::Metadata" => Some("CDK metadata"),
        "AWS::CloudFormation::Stack" => Some("nested CloudFormation stack"),
        _ if resource_type.starts_with("Custom::") => Some("custom resource"),
        _ => None,
    }
}

/// Keep only resources whose ID is still the unresolved placeholder. The
/// name table is preserved so parent and provider references stay valid.
pub fn filter_placeholder_resources(file: &ImportFile) -> ImportFile {
    ImportFile {
        name_table: file.name_table.clone(),
        resources: file
            .resources
            .iter()
            .filter(|r| r.has_placeholder_id())
            .cloned()
            .collect(),
    }
}

/// Read a manifest from disk.
pub fn read_file(path: &Path) -> Result<ImportFile, ImportFileError> {
    let bytes = fs::read(path).map_err(|source| ImportFileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ImportFileError::Decode {
        path: path.display().to_string(),
        source,
    })
}

/// Write a manifest as pretty-printed JSON, creating parent directories.
pub fn write_file(path: &Path, file: &ImportFile) -> Result<(), ImportFileError> {
    let to_io = |source| ImportFileError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(to_io)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(file).expect("import file serializes");
    fs::write(path, bytes).map_err(to_io)
}
