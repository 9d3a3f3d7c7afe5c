//! The Docker build provider is wrapped only so the engine talks to a
//! proxy-managed process; its Create passes through untouched.

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Status;

use stackferry_proto::pulumirpc;
use stackferry_proto::pulumirpc::resource_provider_client::ResourceProviderClient;

use crate::server::CreateInterceptor;

pub struct DockerCreateInterceptor;

#[async_trait]
impl CreateInterceptor for DockerCreateInterceptor {
    async fn create(
        &self,
        request: pulumirpc::CreateRequest,
        mut upstream: ResourceProviderClient<Channel>,
    ) -> Result<pulumirpc::CreateResponse, Status> {
        Ok(upstream.create(request).await?.into_inner())
    }
}
