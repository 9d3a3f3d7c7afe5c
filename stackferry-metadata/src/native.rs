//! Metadata source for the `aws-native:` (Cloud Control) provider family,
//! backed by an embedded schema bundle.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use stackferry_core::{PulumiToken, ResourceType};

use crate::bundle::{Bundle, ResourceSpec};
use crate::naming;
use crate::{IdStrategy, MetadataError, MetadataSource};

static NATIVE_METADATA: &str = include_str!("../assets/aws-native-metadata.json");
static NATIVE_SOURCE: OnceLock<NativeSource> = OnceLock::new();

/// The process-wide native metadata source.
pub fn native_source() -> &'static NativeSource {
    NATIVE_SOURCE.get_or_init(|| {
        let bundle = Bundle::parse(NATIVE_METADATA)
            .expect("embedded aws-native metadata bundle must parse");
        NativeSource::from_bundle(bundle)
    })
}

pub struct NativeSource {
    bundle: Bundle,
    reverse: HashMap<ResourceType, PulumiToken>,

    /// Corrections for upstream metadata that records the wrong primary
    /// identifier. Applied after the schema pass.
    primary_identifier_overrides: HashMap<&'static str, Vec<&'static str>>,

    /// Per-type, per-property overrides for resources where neither the
    /// physical-ID nor the ARN heuristic resolves a usable import ID.
    /// Keys are the CFN type and the lowercased property name.
    id_property_strategies: HashMap<&'static str, HashMap<&'static str, IdStrategy>>,

    list_handler_required: HashMap<ResourceType, Vec<String>>,
}

impl NativeSource {
    fn from_bundle(bundle: Bundle) -> Self {
        // Reverse index, CFN type -> token. When several tokens share one
        // CFN type, prefer the token whose module has the fewest siblings
        // in the bundle; ties break lexicographically for determinism.
        let mut module_counts: HashMap<&str, usize> = HashMap::new();
        for token in bundle.resources.keys() {
            *module_counts.entry(token_module(token)).or_default() += 1;
        }
        let mut reverse: HashMap<ResourceType, PulumiToken> = HashMap::new();
        let mut tokens: Vec<&String> = bundle.resources.keys().collect();
        tokens.sort();
        for token in tokens {
            let spec = &bundle.resources[token];
            let cf_type = ResourceType::new(spec.cf_type.clone());
            let candidate_count = module_counts[token_module(token)];
            let keep_existing = reverse
                .get(&cf_type)
                .is_some_and(|existing| {
                    module_counts[token_module(existing.as_str())] <= candidate_count
                });
            if !keep_existing {
                reverse.insert(cf_type, PulumiToken::new(token.clone()));
            }
        }

        let list_handler_required = bundle
            .resources
            .values()
            .filter_map(|spec| {
                let schema = spec.list_handler_schema.as_ref()?;
                if schema.required.is_empty() {
                    return None;
                }
                Some((
                    ResourceType::new(spec.cf_type.clone()),
                    schema.required.clone(),
                ))
            })
            .collect();

        let mut id_property_strategies: HashMap<&'static str, HashMap<&'static str, IdStrategy>> =
            HashMap::new();
        // The BucketPolicy identifier property is `Bucket`, which defeats
        // the suffix heuristics; its physical ID is the bucket name.
        id_property_strategies.insert(
            "AWS::S3::BucketPolicy",
            HashMap::from([("bucket", IdStrategy::PhysicalId)]),
        );
        id_property_strategies.insert(
            "AWS::EC2::SecurityGroup",
            HashMap::from([("groupid", IdStrategy::PhysicalId)]),
        );

        Self {
            bundle,
            reverse,
            primary_identifier_overrides: HashMap::new(),
            id_property_strategies,
            list_handler_required,
        }
    }

    pub fn resource(&self, token: &PulumiToken) -> Result<&ResourceSpec, MetadataError> {
        self.bundle
            .resources
            .get(token.as_str())
            .ok_or_else(|| MetadataError::UnknownToken(token.clone()))
    }

    /// Properties Cloud Control never returns on a read. The interceptor
    /// re-injects these from the create request.
    pub fn write_only(&self, token: &PulumiToken) -> &[String] {
        self.bundle
            .resources
            .get(token.as_str())
            .map(|spec| spec.write_only.as_slice())
            .unwrap_or(&[])
    }

    /// Properties the CCAPI list handler requires in its resource model.
    pub fn list_handler_required(&self, resource_type: &ResourceType) -> &[String] {
        self.list_handler_required
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn id_strategy(
        &self,
        resource_type: &ResourceType,
        property_name_lower: &str,
    ) -> Option<IdStrategy> {
        self.id_property_strategies
            .get(resource_type.as_str())
            .and_then(|per_prop| per_prop.get(property_name_lower))
            .copied()
    }

    /// Convert SDK-shaped inputs into the CFN-shaped property map Cloud
    /// Control understands.
    pub fn cfn_properties(
        &self,
        token: &PulumiToken,
        inputs: &Map<String, Value>,
    ) -> Result<Map<String, Value>, MetadataError> {
        let spec = self.resource(token)?;
        Ok(naming::sdk_to_cfn(&self.bundle, &spec.inputs, inputs))
    }
}

impl MetadataSource for NativeSource {
    fn resource_type(&self, token: &PulumiToken) -> Option<ResourceType> {
        self.bundle
            .resources
            .get(token.as_str())
            .map(|spec| ResourceType::new(spec.cf_type.clone()))
    }

    fn resource_token(&self, resource_type: &ResourceType) -> Option<PulumiToken> {
        self.reverse.get(resource_type).cloned()
    }

    fn primary_identifier(&self, token: &PulumiToken) -> Option<Vec<String>> {
        if let Some(props) = self.primary_identifier_overrides.get(token.as_str()) {
            return Some(props.iter().map(|p| p.to_string()).collect());
        }
        let spec = self.bundle.resources.get(token.as_str())?;
        if spec.primary_identifier.is_empty() {
            return None;
        }
        Some(spec.primary_identifier.clone())
    }
}

fn token_module(token: &str) -> &str {
    token.split(':').nth(1).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bucket_round_trip() {
        let src = native_source();
        let token = PulumiToken::new("aws-native:s3:Bucket");
        let ty = src.resource_type(&token).unwrap();
        assert_eq!(ty, ResourceType::new("AWS::S3::Bucket"));
        assert_eq!(src.resource_token(&ty), Some(token.clone()));
        assert_eq!(src.primary_identifier(&token).unwrap(), vec!["BucketName"]);
    }

    #[test]
    fn test_route_is_composite() {
        let src = native_source();
        let parts = src
            .primary_identifier(&PulumiToken::new("aws-native:ec2:Route"))
            .unwrap();
        assert_eq!(parts, vec!["RouteTableId", "CidrBlock"]);
    }

    #[test]
    fn test_bucket_policy_strategy() {
        let src = native_source();
        assert_eq!(
            src.id_strategy(&ResourceType::new("AWS::S3::BucketPolicy"), "bucket"),
            Some(IdStrategy::PhysicalId)
        );
        assert_eq!(
            src.id_strategy(&ResourceType::new("AWS::S3::Bucket"), "bucketname"),
            None
        );
    }

    #[test]
    fn test_list_handler_required() {
        let src = native_source();
        assert_eq!(
            src.list_handler_required(&ResourceType::new("AWS::ECS::Service")),
            &["Cluster".to_string()]
        );
        assert!(src
            .list_handler_required(&ResourceType::new("AWS::S3::Bucket"))
            .is_empty());
    }

    #[test]
    fn test_cfn_properties_uses_schema() {
        let src = native_source();
        let inputs = json!({
            "routeTableId": "rtb-1234",
            "destinationCidrBlock": "0.0.0.0/0"
        });
        let props = src
            .cfn_properties(
                &PulumiToken::new("aws-native:ec2:Route"),
                inputs.as_object().unwrap(),
            )
            .unwrap();
        assert_eq!(props["RouteTableId"], json!("rtb-1234"));
        assert_eq!(props["DestinationCidrBlock"], json!("0.0.0.0/0"));
    }

    #[test]
    fn test_unknown_token() {
        let src = native_source();
        assert!(src
            .resource_type(&PulumiToken::new("aws-native:foo:Bar"))
            .is_none());
        assert!(src.resource(&PulumiToken::new("aws-native:foo:Bar")).is_err());
    }
}
