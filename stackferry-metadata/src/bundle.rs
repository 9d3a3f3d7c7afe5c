//! Serde model for the embedded metadata bundles.
//!
//! Both bundles share one shape: a `resources` map keyed by Pulumi token and
//! an optional `types` map for nested object schemas referenced from
//! resource inputs.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Bundle {
    pub resources: HashMap<String, ResourceSpec>,
    #[serde(default)]
    pub types: HashMap<String, TypeSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub cf_type: String,

    /// Ordered property keys forming the CFN primary identifier.
    #[serde(default)]
    pub primary_identifier: Vec<String>,

    /// Properties Cloud Control never returns on a read.
    #[serde(default)]
    pub write_only: Vec<String>,

    /// Input-property schema, keyed by the Pulumi (SDK) name. Properties
    /// absent from this map fall back to mechanical case conversion.
    #[serde(default)]
    pub inputs: HashMap<String, PropertySpec>,

    /// Identifier format string like `{apiId}/{id}`, used to infer the
    /// composite-ID separator.
    #[serde(default)]
    pub id_format: Option<String>,

    #[serde(default)]
    pub list_handler_schema: Option<ListHandlerSchema>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    /// Explicit CloudFormation property name when mechanical conversion
    /// would get it wrong (acronyms, vendor spellings).
    #[serde(default)]
    pub cf_name: Option<String>,

    /// Reference to an entry in the bundle's `types` map for nested
    /// objects.
    #[serde(default, rename = "ref")]
    pub type_ref: Option<String>,

    /// Element schema for array-typed properties.
    #[serde(default)]
    pub items: Option<Box<PropertySpec>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypeSpec {
    #[serde(default)]
    pub properties: HashMap<String, PropertySpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListHandlerSchema {
    #[serde(default)]
    pub required: Vec<String>,
}

impl Bundle {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Infer the composite-ID separator from an identifier format string by
/// taking the literal text between the first two `{...}` placeholders.
/// Falls back to `/` when the format has fewer than two parts.
pub fn infer_separator(id_format: &str) -> String {
    let close = match id_format.find('}') {
        Some(i) => i,
        None => return "/".to_string(),
    };
    let rest = &id_format[close + 1..];
    let open = match rest.find('{') {
        Some(i) => i,
        None => return "/".to_string(),
    };
    let sep = &rest[..open];
    if sep.is_empty() {
        "/".to_string()
    } else {
        sep.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_separator() {
        assert_eq!(infer_separator("{apiId}/{id}"), "/");
        assert_eq!(infer_separator("{role}:{name}"), ":");
        assert_eq!(infer_separator("{bucketName}"), "/");
        assert_eq!(infer_separator(""), "/");
    }

    #[test]
    fn test_infer_separator_idempotent_on_single_part() {
        // A format with touching placeholders has no literal text between
        // them; default applies.
        assert_eq!(infer_separator("{a}{b}"), "/");
    }

    #[test]
    fn test_parse_minimal_bundle() {
        let bundle = Bundle::parse(
            r#"{
                "resources": {
                    "aws-native:s3:Bucket": {
                        "cfType": "AWS::S3::Bucket",
                        "primaryIdentifier": ["BucketName"]
                    }
                }
            }"#,
        )
        .unwrap();
        let spec = &bundle.resources["aws-native:s3:Bucket"];
        assert_eq!(spec.cf_type, "AWS::S3::Bucket");
        assert_eq!(spec.primary_identifier, vec!["BucketName"]);
        assert!(spec.inputs.is_empty());
    }
}
