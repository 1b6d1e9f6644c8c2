//! gRPC plumbing over unix domain sockets
//!
//! Serves `cpuadvisor.CPUAdvisor/ListAndWatch` and dials the CPU plugin for
//! `GetCheckpoint`.

use crate::error::AdvisorError;
use crate::health::{components, HealthRegistry};
use crate::proto::{
    CpuAdvisor, CpuAdvisorServer, CpuPluginClient, Empty, GetCheckpointRequest,
    GetCheckpointResponse, ListAndWatchResponse,
};
use crate::server::{CheckpointSource, CpuServer, PluginConnector};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_stream::wrappers::{ReceiverStream, UnixListenerStream};
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tonic::{Request, Response, Status};
use tower::service_fn;
use tracing::{error, info};

/// Dial a gRPC endpoint listening on a unix socket
pub async fn connect_uds(path: impl AsRef<Path>, timeout: Duration) -> Result<Channel, AdvisorError> {
    let path = path.as_ref().to_path_buf();
    let display = path.display().to_string();

    if !path.exists() {
        return Err(AdvisorError::SocketMissing { path: display });
    }

    // the authority is ignored, the connector always dials the socket
    let endpoint = Endpoint::from_static("http://[::]:50051").connect_timeout(timeout);
    endpoint
        .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(path.clone())))
        .await
        .map_err(|source| AdvisorError::Dial {
            path: display,
            source,
        })
}

/// Bound a plugin call by `deadline`, reporting expiry as `DEADLINE_EXCEEDED`
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, AdvisorError>
where
    F: Future<Output = Result<Response<T>, Status>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(resp) => resp
            .map(Response::into_inner)
            .map_err(AdvisorError::GetCheckpoint),
        Err(_) => Err(AdvisorError::GetCheckpoint(Status::deadline_exceeded(
            format!("no checkpoint within {:?}", deadline),
        ))),
    }
}

/// Checkpoint source backed by a plugin gRPC client
#[derive(Clone)]
pub struct PluginClient {
    client: CpuPluginClient<Channel>,
    deadline: Duration,
}

impl PluginClient {
    pub fn new(channel: Channel, deadline: Duration) -> Self {
        Self {
            client: CpuPluginClient::new(channel),
            deadline,
        }
    }
}

#[async_trait]
impl CheckpointSource for PluginClient {
    async fn get_checkpoint(&self) -> Result<GetCheckpointResponse, AdvisorError> {
        let mut client = self.client.clone();
        let mut request = Request::new(GetCheckpointRequest {});
        request.set_timeout(self.deadline);
        with_deadline(self.deadline, client.get_checkpoint(request)).await
    }
}

/// Dials the plugin socket for every new session
#[derive(Debug, Clone)]
pub struct UdsPluginConnector {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UdsPluginConnector {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PluginConnector for UdsPluginConnector {
    async fn connect(&self) -> Result<Box<dyn CheckpointSource>, AdvisorError> {
        let channel = connect_uds(&self.socket_path, self.timeout).await?;
        Ok(Box::new(PluginClient::new(channel, self.timeout)))
    }
}

/// `CPUAdvisor` service implementation
pub struct CpuAdvisorService {
    server: Arc<CpuServer>,
    connector: Arc<dyn PluginConnector>,
}

impl CpuAdvisorService {
    pub fn new(server: Arc<CpuServer>, connector: Arc<dyn PluginConnector>) -> Self {
        Self { server, connector }
    }

    pub fn into_server(self) -> CpuAdvisorServer<Self> {
        CpuAdvisorServer::new(self)
    }
}

#[async_trait]
impl CpuAdvisor for CpuAdvisorService {
    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        info!("ListAndWatch called");
        let rx = self
            .server
            .clone()
            .list_and_watch(self.connector.as_ref())
            .await?;
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Serve the advisor on a unix socket until `shutdown` resolves.
///
/// A stale socket file left by a previous run is removed first.
pub async fn serve_uds<F>(
    service: CpuAdvisorService,
    socket_path: impl AsRef<Path>,
    health: HealthRegistry,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let socket_path = socket_path.as_ref();
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(socket = %socket_path.display(), "CPU advisor gRPC server listening");
    health.set_healthy(components::GRPC_SERVER).await;

    let result = Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown)
        .await;

    if let Err(e) = &result {
        error!(error = %e, "CPU advisor gRPC server failed");
        health
            .set_unhealthy(components::GRPC_SERVER, e.to_string())
            .await;
    }
    let _ = std::fs::remove_file(socket_path);
    result.map_err(Into::into)
}
