//! Metadata registry mapping Pulumi resource tokens to CloudFormation
//! resource types.
//!
//! Two independent sources back the registry: the native source covers the
//! `aws-native:` (Cloud Control) family from an embedded schema bundle, and
//! the classic source covers the `aws:` family from a smaller embedded index
//! plus hand-curated overrides. Both are parsed once per process.

pub mod bundle;
pub mod classic;
pub mod naming;
pub mod native;

use stackferry_core::{PulumiToken, ResourceType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unknown resource token: {0}")]
    UnknownToken(PulumiToken),

    #[error("no primary identifier recorded for token: {0}")]
    UnknownPrimaryIdentifier(PulumiToken),

    #[error("failed to convert inputs for {token}: {message}")]
    Conversion { token: PulumiToken, message: String },
}

/// How to resolve a single-property primary identifier when the default
/// heuristics are wrong for a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Use the CloudFormation physical ID verbatim.
    PhysicalId,
    /// Resolve through a Cloud Control `ListResources` lookup.
    Lookup,
}

/// Lookup surface shared by the native and classic sources.
pub trait MetadataSource: Send + Sync {
    /// CloudFormation type for a Pulumi token.
    fn resource_type(&self, token: &PulumiToken) -> Option<ResourceType>;

    /// Inverse of [`MetadataSource::resource_type`].
    fn resource_token(&self, resource_type: &ResourceType) -> Option<PulumiToken>;

    /// Ordered property keys forming the primary identifier.
    fn primary_identifier(&self, token: &PulumiToken) -> Option<Vec<String>>;

    /// Separator joining composite import IDs. Defaults to `/`.
    fn separator(&self, token: &PulumiToken) -> String {
        let _ = token;
        "/".to_string()
    }
}

pub use classic::classic_source;
pub use native::native_source;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_and_classic_disagree_on_families() {
        let native = native_source();
        let classic = classic_source();

        assert!(native
            .resource_type(&PulumiToken::new("aws-native:s3:Bucket"))
            .is_some());
        assert!(native
            .resource_type(&PulumiToken::new("aws:iam/policy:Policy"))
            .is_none());

        assert!(classic
            .resource_type(&PulumiToken::new("aws:iam/policy:Policy"))
            .is_some());
        assert!(classic
            .resource_type(&PulumiToken::new("aws-native:s3:Bucket"))
            .is_none());
    }
}
