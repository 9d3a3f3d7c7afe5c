//! Primary-ID resolution for the `aws-native:` (Cloud Control) family.
//!
//! Where the classic family can compute IDs locally, native imports often
//! need a Cloud Control list to discover the identifier that matches the
//! CloudFormation physical ID.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use stackferry_core::{LogicalResourceId, PrimaryResourceId, PulumiToken, ResourceType};
use stackferry_metadata::{native_source, naming, IdStrategy};

use crate::{
    primary_identifiers, render_resource_model, CloudApiError, CustomResolver, LookupError,
    Lookups,
};

/// Seam over the EventBridge client, used by the rule custom resolver.
#[async_trait]
pub trait EventsApi: Send + Sync {
    async fn describe_rule_arn(
        &self,
        name: &str,
        event_bus_name: Option<&str>,
    ) -> Result<String, CloudApiError>;
}

impl Lookups {
    /// Resolve the import ID for a native-family resource. `props` is the
    /// CFN-shaped input map produced by the metadata registry.
    pub async fn find_primary_resource_id_native(
        &self,
        token: &PulumiToken,
        logical_id: &LogicalResourceId,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let (resource_type, id_parts) = primary_identifiers(native_source(), token)?;
        self.snapshot().record_props(logical_id, props);
        match id_parts.len() {
            0 => Err(LookupError::EmptyPrimaryIdentifier {
                resource_type,
                logical_id: logical_id.clone(),
            }),
            1 => {
                self.native_single_id(&resource_type, logical_id, &id_parts[0], props)
                    .await
            }
            _ => {
                self.native_composite_id(&resource_type, logical_id, &id_parts, props)
                    .await
            }
        }
    }

    async fn native_single_id(
        &self,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        id_property: &str,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        if let Some(resolver) = self.custom_resolvers.get(resource_type) {
            return self
                .run_custom_resolver(*resolver, resource_type, logical_id, props)
                .await;
        }

        // A caller-supplied identifier value always wins.
        if let Some(Value::String(supplied)) = props.get(id_property) {
            return Ok(PrimaryResourceId::new(supplied.clone()));
        }

        let resource = self
            .snapshot()
            .get(logical_id)
            .ok_or_else(|| LookupError::MissingStackResource {
                logical_id: logical_id.clone(),
            })?;
        let physical = resource.physical_id.as_str();
        let id_property_lower = id_property.to_lowercase();

        match native_source().id_strategy(resource_type, &id_property_lower) {
            Some(IdStrategy::PhysicalId) => {
                return Ok(PrimaryResourceId::new(physical));
            }
            Some(IdStrategy::Lookup) => {
                return self
                    .probe
                    .find_identifier(resource_type, physical, &BTreeMap::new(), Some(props))
                    .await;
            }
            None => {}
        }

        if id_property_lower.ends_with("arn") {
            if physical.starts_with("arn:") {
                return Ok(PrimaryResourceId::new(physical));
            }
            return self
                .probe
                .find_identifier(resource_type, physical, &BTreeMap::new(), Some(props))
                .await;
        }

        Ok(PrimaryResourceId::new(physical))
    }

    async fn native_composite_id(
        &self,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        id_parts: &[String],
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let (model, missing) =
            render_resource_model(id_parts, props, |part| naming::to_cfn_name(part))?;
        if missing.len() > 1 {
            return Err(LookupError::MissingIdSegments {
                resource_type: resource_type.clone(),
                properties: missing,
            });
        }
        let resource = self
            .snapshot()
            .get(logical_id)
            .ok_or_else(|| LookupError::MissingStackResource {
                logical_id: logical_id.clone(),
            })?;
        self.probe
            .find_identifier(
                resource_type,
                resource.physical_id.as_str(),
                &model,
                Some(props),
            )
            .await
    }

    async fn run_custom_resolver(
        &self,
        resolver: CustomResolver,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        match resolver {
            CustomResolver::EventsRule => {
                self.resolve_events_rule(resource_type, logical_id, props)
                    .await
            }
        }
    }

    /// EventBridge rules on a non-default bus have a composite physical ID
    /// `bus|rule` and an ARN with an extra bus segment. Ask EventBridge for
    /// the real ARN; plain physical IDs fall back to the generic probe.
    async fn resolve_events_rule(
        &self,
        resource_type: &ResourceType,
        logical_id: &LogicalResourceId,
        props: &Map<String, Value>,
    ) -> Result<PrimaryResourceId, LookupError> {
        let resource = self
            .snapshot()
            .get(logical_id)
            .ok_or_else(|| LookupError::MissingStackResource {
                logical_id: logical_id.clone(),
            })?;
        let physical = resource.physical_id.as_str();
        if let Some((bus, rule)) = physical.split_once('|') {
            let arn = self
                .events
                .describe_rule_arn(rule, Some(bus))
                .await?;
            return Ok(PrimaryResourceId::new(arn));
        }
        self.probe
            .find_identifier(resource_type, physical, &BTreeMap::new(), Some(props))
            .await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use stackferry_core::{PhysicalResourceId, StackName};

    use super::tests_support::{identifier, NullEvents, ScriptedCcApi};
    use super::*;
    use crate::ccapi::{CcApiError, CloudControlApi, RetryPolicy};
    use crate::snapshot::StackResource;
    use crate::{CloudApiError, CloudFormationApi, StackResourcePage};

    struct NullCfn;

    #[async_trait]
    impl CloudFormationApi for NullCfn {
        async fn list_stack_resources_page(
            &self,
            _stack_name: &StackName,
            _next_token: Option<String>,
        ) -> Result<StackResourcePage, CloudApiError> {
            Ok(StackResourcePage::default())
        }
    }

    struct FixedEvents {
        arn: String,
        seen: std::sync::Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl EventsApi for FixedEvents {
        async fn describe_rule_arn(
            &self,
            name: &str,
            event_bus_name: Option<&str>,
        ) -> Result<String, CloudApiError> {
            self.seen
                .lock()
                .unwrap()
                .push((name.to_string(), event_bus_name.map(str::to_string)));
            Ok(self.arn.clone())
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn lookups(
        ccapi: Arc<dyn CloudControlApi>,
        events: Arc<dyn EventsApi>,
        resources: Vec<StackResource>,
    ) -> Lookups {
        let mut lookups = Lookups::new(
            "us-west-2",
            "123456789012",
            Arc::new(NullCfn),
            ccapi,
            events,
        );
        lookups.set_retry_policy(fast_retry(3));
        for resource in resources {
            lookups.snapshot().insert(resource);
        }
        lookups
    }

    fn stack_resource(ty: &str, logical: &str, physical: &str) -> StackResource {
        StackResource {
            resource_type: ResourceType::new(ty),
            logical_id: LogicalResourceId::new(logical),
            physical_id: PhysicalResourceId::new(physical),
            props: None,
        }
    }

    #[tokio::test]
    async fn test_simple_bucket_uses_physical_id() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::S3::Bucket", "bucket", "bucket-name")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:s3:Bucket"),
                &LogicalResourceId::new("bucket"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new("bucket-name"));
        assert!(ccapi.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_composite_route_matches_physical_suffix() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![
            identifier("rtb-1234|0.0.0.0/0"),
            identifier("rtb-1234|10.0.0.0/16"),
        ])]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![
                stack_resource("AWS::EC2::Route", "route1", "rtb-1234|0.0.0.0/0"),
                stack_resource("AWS::EC2::Route", "route2", "rtb-1234|10.0.0.0/16"),
            ],
        );
        let props = json!({"RouteTableId": "rtb-1234"});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:ec2:Route"),
                &LogicalResourceId::new("route1"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new("rtb-1234|0.0.0.0/0"));

        // The inputs the resolver saw are recorded on the snapshot for the
        // probe's error-driven retry.
        let recorded = lookups
            .snapshot()
            .get(&LogicalResourceId::new("route1"))
            .unwrap()
            .props;
        assert_eq!(recorded, Some(props.as_object().unwrap().clone()));
    }

    #[tokio::test]
    async fn test_arn_property_skips_probe_when_physical_is_arn() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource(
                "AWS::SNS::Topic",
                "Topic",
                "arn:aws:sns:us-west-2:123456789012:my-topic",
            )],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            id,
            PrimaryResourceId::new("arn:aws:sns:us-west-2:123456789012:my-topic")
        );
        assert!(ccapi.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_arn_property_probes_when_physical_is_not_arn() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![identifier(
            "arn:aws:sns:us-west-2:123456789012:my-topic",
        )])]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::SNS::Topic", "Topic", "my-topic")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            id,
            PrimaryResourceId::new("arn:aws:sns:us-west-2:123456789012:my-topic")
        );
        assert_eq!(ccapi.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bucket_policy_uses_physical_id_strategy() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::S3::BucketPolicy", "BucketPolicy", "my-bucket")],
        );
        let props = json!({"Bucket": "my-bucket", "PolicyDocument": {"Statement": []}});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:s3:BucketPolicy"),
                &LogicalResourceId::new("BucketPolicy"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new("my-bucket"));
        assert!(ccapi.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_property_recovers_from_inputs() {
        // The physical ID is the trailing listener path, not a full ARN, so
        // the ARN heuristic has to fall through to the probe.
        let physical = "listener/app/my-load-balancer/50dc6c495c0c9188/0467ef3c8400ae65";
        let listener_arn = "arn:aws:elasticloadbalancing:us-west-2:123456789012:listener/app/my-load-balancer/50dc6c495c0c9188/0467ef3c8400ae65";
        let lb_arn = "arn:aws:elasticloadbalancing:us-west-2:123456789012:loadbalancer/app/my-load-balancer/50dc6c495c0c9188";
        let ccapi = Arc::new(ScriptedCcApi::new(vec![
            Err(CcApiError::InvalidRequest {
                message: "Missing or Invalid ResourceModel...Required property: [LoadBalancerArn]"
                    .to_string(),
            }),
            Ok(vec![identifier(listener_arn)]),
        ]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource(
                "AWS::ElasticLoadBalancingV2::Listener",
                "Listener",
                physical,
            )],
        );
        let props = json!({"LoadBalancerArn": lb_arn});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:elasticloadbalancingv2:Listener"),
                &LogicalResourceId::new("Listener"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new(listener_arn));

        let calls = ccapi.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, None);
        let retry_model: serde_json::Value =
            serde_json::from_str(calls[1].1.as_deref().unwrap()).unwrap();
        assert_eq!(retry_model, json!({"LoadBalancerArn": lb_arn}));
    }

    #[tokio::test]
    async fn test_scaling_policy_derives_service_namespace() {
        let policy_arn = "arn:aws:autoscaling:us-west-2:123456789012:scalingPolicy:uuid:policyName/MyPolicy|ecs:service:DesiredCount";
        let ccapi = Arc::new(ScriptedCcApi::new(vec![
            Err(CcApiError::InvalidRequest {
                message:
                    "Missing or invalid ResourceModel property... Required property: (#: required key [ServiceNamespace] not found)"
                        .to_string(),
            }),
            Ok(vec![identifier(policy_arn)]),
        ]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource(
                "AWS::ApplicationAutoScaling::ScalingPolicy",
                "ScalingPolicy",
                policy_arn,
            )],
        );
        let props = json!({
            "PolicyName": "MyPolicy",
            "ResourceId": "service/myCluster/myService",
            "ScalableDimension": "ecs:service:DesiredCount"
        });
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:applicationautoscaling:ScalingPolicy"),
                &LogicalResourceId::new("ScalingPolicy"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new(policy_arn));

        let calls = ccapi.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let retry_model: serde_json::Value =
            serde_json::from_str(calls[1].1.as_deref().unwrap()).unwrap();
        assert_eq!(retry_model, json!({"ServiceNamespace": "ecs"}));
    }

    #[tokio::test]
    async fn test_unsupported_action_yields_placeholder() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Err(
            CcApiError::UnsupportedAction {
                message: "list not supported".to_string(),
            },
        )]));
        let lookups = lookups(
            ccapi,
            Arc::new(NullEvents),
            vec![stack_resource("AWS::SNS::Topic", "Topic", "my-topic")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert!(id.is_placeholder());
    }

    #[tokio::test]
    async fn test_events_rule_custom_bus() {
        let events = Arc::new(FixedEvents {
            arn: "arn:aws:events:us-west-2:123456789012:rule/orders/match-order".to_string(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let lookups = lookups(
            Arc::new(ScriptedCcApi::new(vec![])),
            events.clone(),
            vec![stack_resource("AWS::Events::Rule", "Rule", "orders|match-order")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:events:Rule"),
                &LogicalResourceId::new("Rule"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            id,
            PrimaryResourceId::new("arn:aws:events:us-west-2:123456789012:rule/orders/match-order")
        );
        assert_eq!(
            events.seen.lock().unwrap().as_slice(),
            &[("match-order".to_string(), Some("orders".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_events_rule_plain_physical_falls_back_to_probe() {
        let rule_arn = "arn:aws:events:us-west-2:123456789012:rule/my-rule";
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![identifier(rule_arn)])]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::Events::Rule", "Rule", "my-rule")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:events:Rule"),
                &LogicalResourceId::new("Rule"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new(rule_arn));
        assert_eq!(ccapi.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_throttling_retries_until_success() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![
            Err(CcApiError::Throttling {
                message: "slow down".to_string(),
            }),
            Ok(vec![identifier("arn:aws:sns:us-west-2:123456789012:my-topic")]),
        ]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::SNS::Topic", "Topic", "my-topic")],
        );
        let props = json!({});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            id,
            PrimaryResourceId::new("arn:aws:sns:us-west-2:123456789012:my-topic")
        );
        assert_eq!(ccapi.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_throttling_stops_after_max_attempts() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![
            Err(CcApiError::Throttling {
                message: "slow down".to_string(),
            }),
            Err(CcApiError::Throttling {
                message: "still slow".to_string(),
            }),
        ]));
        let mut lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::SNS::Topic", "Topic", "my-topic")],
        );
        lookups.set_retry_policy(fast_retry(2));
        let props = json!({});
        let err = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Probe { .. }));
        assert_eq!(ccapi.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_results_are_cached_per_model() {
        let topic_arn = "arn:aws:sns:us-west-2:123456789012:my-topic";
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![identifier(topic_arn)])]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![
                stack_resource("AWS::SNS::Topic", "TopicA", "my-topic"),
            ],
        );
        let props = json!({});
        for _ in 0..2 {
            let id = lookups
                .find_primary_resource_id_native(
                    &PulumiToken::new("aws-native:sns:Topic"),
                    &LogicalResourceId::new("TopicA"),
                    props.as_object().unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(id, PrimaryResourceId::new(topic_arn));
        }
        assert_eq!(ccapi.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_is_an_error() {
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![])]));
        let lookups = lookups(
            ccapi,
            Arc::new(NullEvents),
            vec![stack_resource("AWS::SNS::Topic", "Topic", "my-topic")],
        );
        let props = json!({});
        let err = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:sns:Topic"),
                &LogicalResourceId::new("Topic"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::NoIdentifierMatch { .. }));
    }

    #[tokio::test]
    async fn test_ecs_service_model_augmented_from_registry() {
        let service_arn =
            "arn:aws:ecs:us-west-2:123456789012:service/myCluster/myService";
        let ccapi = Arc::new(ScriptedCcApi::new(vec![Ok(vec![identifier(service_arn)])]));
        let lookups = lookups(
            ccapi.clone(),
            Arc::new(NullEvents),
            vec![stack_resource("AWS::ECS::Service", "Service", service_arn)],
        );
        let props = json!({"Cluster": "myCluster"});
        let id = lookups
            .find_primary_resource_id_native(
                &PulumiToken::new("aws-native:ecs:Service"),
                &LogicalResourceId::new("Service"),
                props.as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(id, PrimaryResourceId::new(service_arn));

        let calls = ccapi.calls.lock().unwrap();
        let model: serde_json::Value =
            serde_json::from_str(calls[0].1.as_deref().unwrap()).unwrap();
        assert_eq!(model["Cluster"], json!("myCluster"));
    }
}
