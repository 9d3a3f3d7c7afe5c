//! Real AWS SDK implementations of the cloud client seams, plus the
//! production constructor that wires them into [`Lookups`].

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_sdk_cloudcontrol::error::ProvideErrorMetadata;
use stackferry_core::StackName;

use crate::ccapi::{CcApiError, CloudControlApi, ListResourcesPage, ResourceIdentifier};
use crate::native::EventsApi;
use crate::snapshot::{CloudFormationApi, StackResourcePage, StackResourceSummary};
use crate::{CloudApiError, Lookups};

#[async_trait]
impl CloudFormationApi for aws_sdk_cloudformation::Client {
    async fn list_stack_resources_page(
        &self,
        stack_name: &StackName,
        next_token: Option<String>,
    ) -> Result<StackResourcePage, CloudApiError> {
        let output = self
            .list_stack_resources()
            .stack_name(stack_name.as_str())
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|err| CloudApiError(format!("listing stack resources: {err}")))?;
        let summaries = output
            .stack_resource_summaries()
            .iter()
            .map(|s| StackResourceSummary {
                resource_type: s.resource_type().map(str::to_string),
                logical_id: s.logical_resource_id().map(str::to_string),
                physical_id: s.physical_resource_id().map(str::to_string),
            })
            .collect();
        Ok(StackResourcePage {
            summaries,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

#[async_trait]
impl CloudControlApi for aws_sdk_cloudcontrol::Client {
    async fn list_resources_page(
        &self,
        type_name: &str,
        resource_model: Option<&str>,
        next_token: Option<String>,
    ) -> Result<ListResourcesPage, CcApiError> {
        let output = self
            .list_resources()
            .type_name(type_name)
            .set_resource_model(resource_model.map(str::to_string))
            .set_next_token(next_token)
            .send()
            .await
            .map_err(classify_list_error)?;
        let identifiers = output
            .resource_descriptions()
            .iter()
            .map(|d| ResourceIdentifier {
                identifier: d.identifier().map(str::to_string),
                properties: d.properties().map(str::to_string),
            })
            .collect();
        Ok(ListResourcesPage {
            identifiers,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

fn classify_list_error<E, R>(err: aws_sdk_cloudcontrol::error::SdkError<E, R>) -> CcApiError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{err:?}"));
    match code.as_deref() {
        Some("InvalidRequestException") => CcApiError::InvalidRequest { message },
        Some("UnsupportedActionException") => CcApiError::UnsupportedAction { message },
        Some("ThrottlingException") => CcApiError::Throttling { message },
        _ => CcApiError::Other { code, message },
    }
}

#[async_trait]
impl EventsApi for aws_sdk_eventbridge::Client {
    async fn describe_rule_arn(
        &self,
        name: &str,
        event_bus_name: Option<&str>,
    ) -> Result<String, CloudApiError> {
        let output = self
            .describe_rule()
            .name(name)
            .set_event_bus_name(event_bus_name.map(str::to_string))
            .send()
            .await
            .map_err(|err| CloudApiError(format!("describing rule {name}: {err}")))?;
        output
            .arn()
            .map(str::to_string)
            .ok_or_else(|| CloudApiError(format!("rule {name} has no ARN")))
    }
}

impl Lookups {
    /// Build a run-scoped `Lookups` against the real cloud: default AWS
    /// config, plus one `GetCallerIdentity` call to learn the account used
    /// by ARN synthesis.
    pub async fn connect() -> Result<Self, CloudApiError> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| CloudApiError("no AWS region configured".to_string()))?;

        let sts = aws_sdk_sts::Client::new(&config);
        let identity = sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|err| CloudApiError(format!("resolving caller identity: {err}")))?;
        let account = identity
            .account()
            .ok_or_else(|| CloudApiError("caller identity has no account".to_string()))?
            .to_string();

        // The probe owns throttling retries; the SDK's own retry layer
        // would double up on top of it.
        let ccapi_config = aws_sdk_cloudcontrol::config::Builder::from(&config)
            .retry_config(RetryConfig::disabled())
            .build();

        Ok(Lookups::new(
            region,
            account,
            Arc::new(aws_sdk_cloudformation::Client::new(&config)),
            Arc::new(aws_sdk_cloudcontrol::Client::from_conf(ccapi_config)),
            Arc::new(aws_sdk_eventbridge::Client::new(&config)),
        ))
    }
}
