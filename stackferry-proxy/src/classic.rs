//! Create interception for the classic `aws:` provider.
//!
//! A handful of classic types exist only as synthesizer artifacts and can
//! never be correlated with a CloudFormation resource; those short-circuit
//! before resolution. Everything else resolves to an import ID and becomes
//! an upstream Read.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Status;

use stackferry_core::Urn;
use stackferry_lookups::{Lookups, ProviderFamily};
use stackferry_proto::pb::struct_to_json;
use stackferry_proto::pulumirpc;
use stackferry_proto::pulumirpc::resource_provider_client::ResourceProviderClient;
use tracing::debug;

use crate::capture::{Capture, CaptureCollector, SkippedCapture};
use crate::server::CreateInterceptor;
use crate::RunMode;

/// Types the synthesizer maps to classic resources that have no
/// CloudFormation counterpart. Bucket objects are CDK assets; the V2 shims
/// and inline policy attachments only exist on the Pulumi side.
const SKIP_TYPES: &[&str] = &[
    "aws:s3/bucketObjectv2:BucketObjectv2",
    "aws:s3/bucketV2:BucketV2",
    "aws:s3/bucketLifecycleConfigurationV2:BucketLifecycleConfigurationV2",
    "aws:s3/bucketServerSideEncryptionConfigurationV2:BucketServerSideEncryptionConfigurationV2",
    "aws:s3/bucketPolicy:BucketPolicy",
    "aws:s3/bucketVersioningV2:BucketVersioningV2",
    "aws:ecr/repository:Repository",
    "aws:ecr/lifecyclePolicy:LifecyclePolicy",
];

pub struct ClassicCreateInterceptor {
    lookups: Arc<Lookups>,
    mode: RunMode,
    skip_create: bool,
    collector: Arc<CaptureCollector>,
}

impl ClassicCreateInterceptor {
    pub fn new(
        lookups: Arc<Lookups>,
        mode: RunMode,
        skip_create: bool,
        collector: Arc<CaptureCollector>,
    ) -> Self {
        Self {
            lookups,
            mode,
            skip_create,
            collector,
        }
    }

    /// Handle a skip-listed type according to the run mode: pass the Create
    /// through in direct-apply mode, stub it out under --skip-create, and
    /// refuse it in capture mode.
    async fn handle_skip_type(
        &self,
        urn: &Urn,
        request: pulumirpc::CreateRequest,
        mut upstream: ResourceProviderClient<Channel>,
    ) -> Result<pulumirpc::CreateResponse, Status> {
        let token = urn.token();
        if self.skip_create {
            self.collector.skip(SkippedCapture {
                resource_type: token.as_str().to_string(),
                logical_name: urn.name().to_string(),
                reason: "synthesizer-only resource, create stubbed".to_string(),
            });
            return Ok(pulumirpc::CreateResponse {
                id: format!("skip-{}", urn.name()),
                properties: request.properties,
            });
        }
        if self.mode == RunMode::RunPulumi {
            debug!(token = token.as_str(), "forwarding create for synthesizer-only resource");
            return Ok(upstream.create(request).await?.into_inner());
        }
        self.collector.skip(SkippedCapture {
            resource_type: token.as_str().to_string(),
            logical_name: urn.name().to_string(),
            reason: "resource type not supported for capture".to_string(),
        });
        Err(Status::failed_precondition(format!(
            "{token} cannot be captured; re-run with --skip-create"
        )))
    }
}

#[async_trait]
impl CreateInterceptor for ClassicCreateInterceptor {
    async fn create(
        &self,
        request: pulumirpc::CreateRequest,
        mut upstream: ResourceProviderClient<Channel>,
    ) -> Result<pulumirpc::CreateResponse, Status> {
        let urn = Urn::parse(&request.urn)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;
        let token = urn.token();

        if SKIP_TYPES.contains(&token.as_str()) {
            return self.handle_skip_type(&urn, request, upstream).await;
        }

        let inputs = request
            .properties
            .as_ref()
            .map(struct_to_json)
            .unwrap_or_default();

        let logical_id = self
            .lookups
            .find_logical_resource_id(ProviderFamily::Classic, &urn)
            .map_err(|err| Status::internal(err.to_string()))?;
        let primary_id = self
            .lookups
            .find_primary_resource_id_classic(&token, &logical_id, &inputs)
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        debug!(
            token = token.as_str(),
            id = primary_id.as_str(),
            urn = %urn,
            "importing resource"
        );
        if self.mode == RunMode::CaptureImports {
            let mut properties: Vec<String> = inputs.keys().cloned().collect();
            properties.sort();
            self.collector.append(Capture {
                resource_type: token.as_str().to_string(),
                name: urn.name().to_string(),
                logical_name: logical_id.as_str().to_string(),
                id: primary_id.as_str().to_string(),
                properties,
            });
        }

        let read = upstream
            .read(pulumirpc::ReadRequest {
                id: primary_id.as_str().to_string(),
                urn: urn.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|err| Status::internal(format!("import failed: {}", err.message())))?
            .into_inner();

        Ok(pulumirpc::CreateResponse {
            id: read.id,
            properties: read.properties,
        })
    }
}
