//! Create interception for the `aws-native:` (Cloud Control) provider.
//!
//! Create is rewritten into a read of the already-deployed resource: the
//! inputs are reshaped into CFN form, the resolver produces the import ID,
//! and the upstream provider's Read supplies the outputs that are handed
//! back as the Create result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tonic::transport::Channel;
use tonic::Status;

use stackferry_core::Urn;
use stackferry_lookups::{Lookups, ProviderFamily};
use stackferry_metadata::{naming, native_source};
use stackferry_proto::pb::{json_to_struct, struct_to_json};
use stackferry_proto::pulumirpc;
use stackferry_proto::pulumirpc::resource_provider_client::ResourceProviderClient;
use tracing::debug;

use crate::capture::{Capture, CaptureCollector, SkippedCapture};
use crate::server::CreateInterceptor;
use crate::RunMode;

/// The provider state checkpoint keeps the original inputs alongside the
/// read outputs so the next plan can diff against what the program wrote.
const CHECKPOINT_INPUTS_KEY: &str = "__inputs";

const CUSTOM_RESOURCE_EMULATOR: &str = "aws-native:cloudformation:CustomResourceEmulator";

pub struct NativeCreateInterceptor {
    lookups: Arc<Lookups>,
    mode: RunMode,
    collector: Arc<CaptureCollector>,
}

impl NativeCreateInterceptor {
    pub fn new(lookups: Arc<Lookups>, mode: RunMode, collector: Arc<CaptureCollector>) -> Self {
        Self {
            lookups,
            mode,
            collector,
        }
    }
}

#[async_trait]
impl CreateInterceptor for NativeCreateInterceptor {
    async fn create(
        &self,
        request: pulumirpc::CreateRequest,
        mut upstream: ResourceProviderClient<Channel>,
    ) -> Result<pulumirpc::CreateResponse, Status> {
        let urn = Urn::parse(&request.urn)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;
        let token = urn.token();

        if token.as_str() == CUSTOM_RESOURCE_EMULATOR {
            if self.mode == RunMode::CaptureImports {
                self.collector.skip(SkippedCapture {
                    resource_type: token.as_str().to_string(),
                    logical_name: urn.name().to_string(),
                    reason: "resource type not supported for capture".to_string(),
                });
            }
            return Err(Status::unimplemented(
                "CustomResourceEmulator is not supported",
            ));
        }

        let inputs = request
            .properties
            .as_ref()
            .map(struct_to_json)
            .unwrap_or_default();
        reject_assets(&urn, &inputs)?;

        let metadata = native_source();
        let props = metadata
            .cfn_properties(&token, &inputs)
            .map_err(|err| Status::invalid_argument(err.to_string()))?;

        let logical_id = self
            .lookups
            .find_logical_resource_id(ProviderFamily::Native, &urn)
            .map_err(|err| Status::internal(err.to_string()))?;
        let primary_id = self
            .lookups
            .find_primary_resource_id_native(&token, &logical_id, &props)
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
            .map_err(|err| {
                Status::internal(format!(
                    "import failed: {} (props: {})",
                    err.message(),
                    Value::Object(props.clone())
                ))
            })?
            .into_inner();

        let mut outputs = read.properties.as_ref().map(struct_to_json).unwrap_or_default();

        // Cloud Control never returns write-only properties, so they carry
        // the values the program supplied; otherwise the engine would see
        // drift on the next plan.
        for write_only in metadata.write_only(&token) {
            if outputs.contains_key(write_only) {
                continue;
            }
            if let Some(value) = inputs.get(write_only) {
                outputs.insert(write_only.clone(), value.clone());
            }
        }

        let checkpoint = checkpoint_object(&inputs, outputs);

        Ok(pulumirpc::CreateResponse {
            id: read.id,
            properties: Some(json_to_struct(&checkpoint)),
        })
    }
}

/// The provider's Create state envelope: read outputs plus the raw inputs
/// under the checkpoint key.
fn checkpoint_object(
    inputs: &Map<String, Value>,
    mut outputs: Map<String, Value>,
) -> Map<String, Value> {
    outputs.insert(
        CHECKPOINT_INPUTS_KEY.to_string(),
        Value::Object(inputs.clone()),
    );
    outputs
}

fn reject_assets(urn: &Urn, inputs: &Map<String, Value>) -> Result<(), Status> {
    for value in inputs.values() {
        if naming::contains_asset(value) {
            return Err(Status::invalid_argument(format!(
                "resource {urn} has asset-typed inputs, which cannot be imported"
            )));
        }
    }
    Ok(())
}
