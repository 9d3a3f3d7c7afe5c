//! The intercepting gRPC server fronting an upstream provider process.
//!
//! Every `ResourceProvider` method forwards to the upstream client
//! untouched except `Create`, which is delegated to the per-family
//! interceptor so resource creation becomes a read of the real cloud
//! resource.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};

use stackferry_proto::pulumirpc;
use stackferry_proto::pulumirpc::resource_provider_client::ResourceProviderClient;
use stackferry_proto::pulumirpc::resource_provider_server::{
    ResourceProvider, ResourceProviderServer,
};

/// Replacement behavior for the Create RPC.
#[async_trait]
pub trait CreateInterceptor: Send + Sync {
    async fn create(
        &self,
        request: pulumirpc::CreateRequest,
        upstream: ResourceProviderClient<Channel>,
    ) -> Result<pulumirpc::CreateResponse, Status>;
}

pub struct InterceptedProvider {
    upstream: ResourceProviderClient<Channel>,
    create: Arc<dyn CreateInterceptor>,
}

impl InterceptedProvider {
    pub fn new(upstream: ResourceProviderClient<Channel>, create: Arc<dyn CreateInterceptor>) -> Self {
        Self { upstream, create }
    }

    fn client(&self) -> ResourceProviderClient<Channel> {
        self.upstream.clone()
    }
}

/// Connect to an upstream provider process on its announced port.
pub async fn connect_upstream(port: u16) -> Result<ResourceProviderClient<Channel>, tonic::transport::Error> {
    let channel = Channel::from_shared(format!("http://127.0.0.1:{port}"))
        .expect("loopback uri is valid")
        .connect()
        .await?;
    Ok(ResourceProviderClient::new(channel))
}

/// Serve an intercepted provider on an ephemeral loopback port. Returns the
/// bound port and the server task handle; aborting the handle stops the
/// server.
pub async fn serve_intercepted(
    provider: InterceptedProvider,
) -> std::io::Result<(u16, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let incoming = TcpListenerStream::new(listener);
    let handle = tokio::spawn(async move {
        if let Err(err) = Server::builder()
            .add_service(ResourceProviderServer::new(provider))
            .serve_with_incoming(incoming)
            .await
        {
            tracing::warn!(%err, "intercepted provider server exited");
        }
    });
    Ok((port, handle))
}

#[async_trait]
impl ResourceProvider for InterceptedProvider {
    async fn handshake(
        &self,
        request: Request<pulumirpc::ProviderHandshakeRequest>,
    ) -> Result<Response<pulumirpc::ProviderHandshakeResponse>, Status> {
        self.client().handshake(request.into_inner()).await
    }

    async fn parameterize(
        &self,
        request: Request<pulumirpc::ParameterizeRequest>,
    ) -> Result<Response<pulumirpc::ParameterizeResponse>, Status> {
        self.client().parameterize(request.into_inner()).await
    }

    async fn get_schema(
        &self,
        request: Request<pulumirpc::GetSchemaRequest>,
    ) -> Result<Response<pulumirpc::GetSchemaResponse>, Status> {
        self.client().get_schema(request.into_inner()).await
    }

    async fn check_config(
        &self,
        request: Request<pulumirpc::CheckRequest>,
    ) -> Result<Response<pulumirpc::CheckResponse>, Status> {
        self.client().check_config(request.into_inner()).await
    }

    async fn diff_config(
        &self,
        request: Request<pulumirpc::DiffRequest>,
    ) -> Result<Response<pulumirpc::DiffResponse>, Status> {
        self.client().diff_config(request.into_inner()).await
    }

    async fn configure(
        &self,
        request: Request<pulumirpc::ConfigureRequest>,
    ) -> Result<Response<pulumirpc::ConfigureResponse>, Status> {
        self.client().configure(request.into_inner()).await
    }

    async fn invoke(
        &self,
        request: Request<pulumirpc::InvokeRequest>,
    ) -> Result<Response<pulumirpc::InvokeResponse>, Status> {
        self.client().invoke(request.into_inner()).await
    }

    async fn call(
        &self,
        request: Request<pulumirpc::CallRequest>,
    ) -> Result<Response<pulumirpc::CallResponse>, Status> {
        self.client().call(request.into_inner()).await
    }

    async fn check(
        &self,
        request: Request<pulumirpc::CheckRequest>,
    ) -> Result<Response<pulumirpc::CheckResponse>, Status> {
        self.client().check(request.into_inner()).await
    }

    async fn diff(
        &self,
        request: Request<pulumirpc::DiffRequest>,
    ) -> Result<Response<pulumirpc::DiffResponse>, Status> {
        self.client().diff(request.into_inner()).await
    }

    async fn create(
        &self,
        request: Request<pulumirpc::CreateRequest>,
    ) -> Result<Response<pulumirpc::CreateResponse>, Status> {
        let response = self
            .create
            .create(request.into_inner(), self.client())
            .await?;
        Ok(Response::new(response))
    }

    async fn read(
        &self,
        request: Request<pulumirpc::ReadRequest>,
    ) -> Result<Response<pulumirpc::ReadResponse>, Status> {
        self.client().read(request.into_inner()).await
    }

    async fn update(
        &self,
        request: Request<pulumirpc::UpdateRequest>,
    ) -> Result<Response<pulumirpc::UpdateResponse>, Status> {
        self.client().update(request.into_inner()).await
    }

    async fn delete(
        &self,
        request: Request<pulumirpc::DeleteRequest>,
    ) -> Result<Response<()>, Status> {
        self.client().delete(request.into_inner()).await
    }

    async fn construct(
        &self,
        request: Request<pulumirpc::ConstructRequest>,
    ) -> Result<Response<pulumirpc::ConstructResponse>, Status> {
        self.client().construct(request.into_inner()).await
    }

    async fn cancel(&self, _request: Request<()>) -> Result<Response<()>, Status> {
        self.client().cancel(()).await
    }

    async fn get_plugin_info(
        &self,
        _request: Request<()>,
    ) -> Result<Response<pulumirpc::PluginInfo>, Status> {
        self.client().get_plugin_info(()).await
    }

    async fn attach(
        &self,
        request: Request<pulumirpc::PluginAttach>,
    ) -> Result<Response<()>, Status> {
        self.client().attach(request.into_inner()).await
    }

    async fn get_mapping(
        &self,
        request: Request<pulumirpc::GetMappingRequest>,
    ) -> Result<Response<pulumirpc::GetMappingResponse>, Status> {
        self.client().get_mapping(request.into_inner()).await
    }

    async fn get_mappings(
        &self,
        request: Request<pulumirpc::GetMappingsRequest>,
    ) -> Result<Response<pulumirpc::GetMappingsResponse>, Status> {
        self.client().get_mappings(request.into_inner()).await
    }
}
