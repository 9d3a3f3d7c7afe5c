//! Newtype wrappers for the identifier vocabulary shared across the
//! workspace. Keeping these distinct prevents mixing up the four kinds of
//! resource IDs that flow through the resolver.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel written into import files when no real ID could be resolved.
/// Matched case-insensitively wherever IDs are compared.
pub const PLACEHOLDER_ID: &str = "<PLACEHOLDER>";

macro_rules! string_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype! {
    /// CloudFormation stack name, e.g. `my-cdk-app-dev`.
    StackName
}

string_newtype! {
    /// CloudFormation resource type, e.g. `AWS::S3::Bucket`.
    ResourceType
}

string_newtype! {
    /// Pulumi resource token, e.g. `aws-native:s3:Bucket` or
    /// `aws:iam/rolePolicy:RolePolicy`.
    PulumiToken
}

string_newtype! {
    /// CloudFormation logical ID, e.g. `MyBucket1EAC1B2B`.
    LogicalResourceId
}

string_newtype! {
    /// CloudFormation physical ID, e.g. a bucket name, an ARN, or a
    /// composite like `rtb-1234|0.0.0.0/0`.
    PhysicalResourceId
}

string_newtype! {
    /// The ID a Pulumi provider accepts on a Read/import call.
    PrimaryResourceId
}

impl PrimaryResourceId {
    /// Returns the placeholder sentinel used when no ID could be resolved.
    pub fn placeholder() -> Self {
        Self::new(PLACEHOLDER_ID)
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.eq_ignore_ascii_case(PLACEHOLDER_ID)
    }
}

impl PulumiToken {
    /// The provider segment of the token (`aws` in `aws:iam/policy:Policy`).
    pub fn provider(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_case_insensitive() {
        assert!(PrimaryResourceId::new("<placeholder>").is_placeholder());
        assert!(PrimaryResourceId::placeholder().is_placeholder());
        assert!(!PrimaryResourceId::new("my-bucket").is_placeholder());
    }

    #[test]
    fn test_token_provider() {
        assert_eq!(PulumiToken::new("aws-native:s3:Bucket").provider(), "aws-native");
        assert_eq!(PulumiToken::new("aws:iam/policy:Policy").provider(), "aws");
    }

    #[test]
    fn test_serde_transparent() {
        let ty: ResourceType = serde_json::from_str("\"AWS::S3::Bucket\"").unwrap();
        assert_eq!(ty, ResourceType::new("AWS::S3::Bucket"));
        assert_eq!(serde_json::to_string(&ty).unwrap(), "\"AWS::S3::Bucket\"");
    }
}
