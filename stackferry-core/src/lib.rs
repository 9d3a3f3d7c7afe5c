//! Shared identifier types for correlating CloudFormation resources with
//! Pulumi resources.

pub mod types;
pub mod urn;

pub use types::{
    LogicalResourceId, PhysicalResourceId, PrimaryResourceId, PulumiToken, ResourceType,
    StackName, PLACEHOLDER_ID,
};
pub use urn::{Urn, UrnError};
