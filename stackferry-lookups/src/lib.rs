//! Identifier resolution: correlating Pulumi URNs with CloudFormation
//! logical IDs and resolving provider-specific import IDs.
//!
//! Two resolver families share one skeleton. The classic family
//! (`aws:` tokens) works entirely from the stack snapshot plus deterministic
//! ARN synthesis; the native family (`aws-native:` tokens) additionally
//! probes the Cloud Control API when the physical ID alone is not a usable
//! import ID.

pub mod aws;
pub mod ccapi;
pub mod classic;
pub mod native;
pub mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use stackferry_core::{LogicalResourceId, PulumiToken, ResourceType, StackName, Urn};
use stackferry_metadata::{classic_source, native_source, MetadataSource};

pub use ccapi::{CcApiError, CcApiProbe, CloudControlApi, ListResourcesPage, ResourceIdentifier, RetryPolicy};
pub use native::EventsApi;
pub use snapshot::{
    CloudFormationApi, StackResource, StackResourcePage, StackResourceSummary, StackSnapshot,
};

/// Opaque failure from a cloud client behind one of the seams.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CloudApiError(pub String);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("unknown resource token: {0}")]
    UnknownToken(PulumiToken),

    #[error("no primary identifier recorded for token: {0}")]
    NoPrimaryIdentifier(PulumiToken),

    #[error("resource type {resource_type} with logical ID {logical_id} has no primary identifier properties")]
    EmptyPrimaryIdentifier {
        resource_type: ResourceType,
        logical_id: LogicalResourceId,
    },

    #[error("no matching CloudFormation resource for URN {urn}")]
    NoLogicalMatch { urn: String },

    #[error("multiple CloudFormation resources match URN {urn}: {}", candidates.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", "))]
    AmbiguousLogicalMatch {
        urn: String,
        candidates: Vec<LogicalResourceId>,
    },

    #[error("expected id property {property:?} to be a string; got {value}")]
    NonStringIdProperty { property: String, value: Value },

    #[error("resource with logical ID {logical_id} is not in the stack snapshot")]
    MissingStackResource { logical_id: LogicalResourceId },

    #[error("missing identifier segments {properties:?} for {resource_type}; only one segment may fall back to the physical ID")]
    MissingIdSegments {
        resource_type: ResourceType,
        properties: Vec<String>,
    },

    #[error("ARN synthesis for resource type {0} is not supported")]
    ArnSynthesisUnsupported(ResourceType),

    #[error("cloud control rejected the list request for {resource_type} with an unrecognized message: {message}")]
    UnparseableListError {
        resource_type: ResourceType,
        message: String,
    },

    #[error("no value for list-handler property {property} of {resource_type} in the captured inputs")]
    MissingListProperty {
        resource_type: ResourceType,
        property: String,
    },

    #[error("no cloud control identifier for {resource_type} matches suffix {suffix:?} ({candidates} candidates)")]
    NoIdentifierMatch {
        resource_type: ResourceType,
        suffix: String,
        candidates: usize,
    },

    #[error("listing {resource_type} resources failed: {source}")]
    Probe {
        resource_type: ResourceType,
        source: CcApiError,
    },

    #[error(transparent)]
    Cloud(#[from] CloudApiError),
}

/// Which provider family a token belongs to. Selects the metadata source
/// used for correlation and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Classic,
    Native,
}

impl ProviderFamily {
    pub fn metadata(self) -> &'static dyn MetadataSource {
        match self {
            ProviderFamily::Classic => classic_source(),
            ProviderFamily::Native => native_source(),
        }
    }
}

/// Per-type resolver overrides for the native family. Attached by CFN type;
/// each variant pre-empts the single-identifier decision order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomResolver {
    /// EventBridge rule ARNs embed an optional event-bus segment that the
    /// generic suffix probe cannot reconstruct.
    EventsRule,
}

/// Run-scoped resolution state: cloud clients, the stack snapshot, and the
/// Cloud Control probe cache. Nothing here outlives a run.
pub struct Lookups {
    region: String,
    account: String,
    cfn: Arc<dyn CloudFormationApi>,
    events: Arc<dyn EventsApi>,
    snapshot: StackSnapshot,
    probe: CcApiProbe,
    custom_resolvers: HashMap<ResourceType, CustomResolver>,
}

impl Lookups {
    pub fn new(
        region: impl Into<String>,
        account: impl Into<String>,
        cfn: Arc<dyn CloudFormationApi>,
        ccapi: Arc<dyn CloudControlApi>,
        events: Arc<dyn EventsApi>,
    ) -> Self {
        let mut custom_resolvers = HashMap::new();
        custom_resolvers.insert(
            ResourceType::new("AWS::Events::Rule"),
            CustomResolver::EventsRule,
        );
        Self {
            region: region.into(),
            account: account.into(),
            cfn,
            events,
            snapshot: StackSnapshot::new(),
            probe: CcApiProbe::new(ccapi),
            custom_resolvers,
        }
    }

    /// Replace the probe's retry policy; used by tests to shrink delays.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.probe = CcApiProbe::with_retry(self.probe_client(), policy);
    }

    fn probe_client(&self) -> Arc<dyn CloudControlApi> {
        self.probe.client()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn snapshot(&self) -> &StackSnapshot {
        &self.snapshot
    }

    /// Load one CloudFormation stack into the snapshot. May be called once
    /// per stack ref; failure is fatal to the run.
    pub async fn load_stack(&self, stack_name: &StackName) -> Result<(), CloudApiError> {
        self.snapshot.load(self.cfn.as_ref(), stack_name).await
    }

    /// Correlate a Pulumi URN with a CFN logical ID: same CFN type, and the
    /// lowercased logical ID contains the lowercased URN name. Exactly one
    /// match is required; the resolver never guesses between candidates.
    pub fn find_logical_resource_id(
        &self,
        family: ProviderFamily,
        urn: &Urn,
    ) -> Result<LogicalResourceId, LookupError> {
        let token = urn.token();
        let resource_type = family
            .metadata()
            .resource_type(&token)
            .ok_or_else(|| LookupError::UnknownToken(token.clone()))?;
        let matches = self
            .snapshot
            .correlate(&resource_type, &urn.name().to_lowercase());
        match matches.len() {
            0 => Err(LookupError::NoLogicalMatch {
                urn: urn.to_string(),
            }),
            1 => Ok(matches[0].logical_id.clone()),
            _ => Err(LookupError::AmbiguousLogicalMatch {
                urn: urn.to_string(),
                candidates: matches.into_iter().map(|m| m.logical_id).collect(),
            }),
        }
    }
}

/// Resolve a token to its CFN type and primary-identifier key list.
pub(crate) fn primary_identifiers(
    metadata: &dyn MetadataSource,
    token: &PulumiToken,
) -> Result<(ResourceType, Vec<String>), LookupError> {
    let resource_type = metadata
        .resource_type(token)
        .ok_or_else(|| LookupError::UnknownToken(token.clone()))?;
    let id_parts = metadata
        .primary_identifier(token)
        .ok_or_else(|| LookupError::NoPrimaryIdentifier(token.clone()))?;
    Ok((resource_type, id_parts))
}

/// Build the list-handler resource model from the identifier parts and the
/// supplied input properties. Each part is looked up first under the CFN
/// name casing the registry expects, then under its original casing. A
/// present but non-string value is an error; absent parts are reported back
/// for the caller's missing-segment policy.
pub(crate) fn render_resource_model(
    id_parts: &[String],
    props: &Map<String, Value>,
    resource_key: impl Fn(&str) -> String,
) -> Result<(BTreeMap<String, String>, Vec<String>), LookupError> {
    let mut model = BTreeMap::new();
    let mut missing = Vec::new();
    for part in id_parts {
        let cfn_name = resource_key(part);
        let value = props.get(&cfn_name).or_else(|| props.get(part));
        match value {
            Some(Value::String(s)) => {
                model.insert(cfn_name, s.clone());
            }
            Some(other) => {
                return Err(LookupError::NonStringIdProperty {
                    property: cfn_name,
                    value: other.clone(),
                });
            }
            None => missing.push(cfn_name),
        }
    }
    Ok((model, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_resource_model_prefers_cfn_casing() {
        let props = json!({"RouteTableId": "rtb-cfn", "routeTableId": "rtb-sdk"});
        let (model, missing) = render_resource_model(
            &["RouteTableId".to_string()],
            props.as_object().unwrap(),
            |s| s.to_string(),
        )
        .unwrap();
        assert_eq!(model["RouteTableId"], "rtb-cfn");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_render_resource_model_falls_back_to_original_case() {
        let props = json!({"routeTableId": "rtb-1234"});
        let (model, _) = render_resource_model(
            &["routeTableId".to_string()],
            props.as_object().unwrap(),
            |s| stackferry_metadata::naming::to_cfn_name(s),
        )
        .unwrap();
        assert_eq!(model["RouteTableId"], "rtb-1234");
    }

    #[test]
    fn test_render_resource_model_rejects_non_string() {
        let props = json!({"RouteTableId": ["rtb-1234"]});
        let err = render_resource_model(
            &["RouteTableId".to_string()],
            props.as_object().unwrap(),
            |s| s.to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, LookupError::NonStringIdProperty { .. }));
        assert!(err.to_string().contains("RouteTableId"));
    }

    #[test]
    fn test_render_resource_model_reports_missing() {
        let props = json!({"RouteTableId": "rtb-1234"});
        let (model, missing) = render_resource_model(
            &["RouteTableId".to_string(), "CidrBlock".to_string()],
            props.as_object().unwrap(),
            |s| s.to_string(),
        )
        .unwrap();
        assert_eq!(model.len(), 1);
        assert_eq!(missing, vec!["CidrBlock"]);
    }
}
