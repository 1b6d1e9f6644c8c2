//! Wire types for the advisor gRPC services
//!
//! With the `proto-gen` feature the types are generated from proto/ at build
//! time by tonic-build. Otherwise the checked-in definitions below are used;
//! they mirror the generated code and must be kept in sync with the schema.

#[cfg(feature = "proto-gen")]
pub mod advisorsvc {
    tonic::include_proto!("advisorsvc");
}

#[cfg(feature = "proto-gen")]
pub mod cpuadvisor {
    tonic::include_proto!("cpuadvisor");
}

#[cfg(not(feature = "proto-gen"))]
pub mod advisorsvc {
    use prost::Message;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Message)]
    pub struct Empty {}

    #[derive(Clone, PartialEq, Message)]
    pub struct CalculationResult {
        #[prost(map = "string, string", tag = "1")]
        pub values: HashMap<String, String>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct CalculationInfo {
        #[prost(string, tag = "1")]
        pub cgroup_path: String,
        #[prost(message, optional, tag = "2")]
        pub calculation_result: Option<CalculationResult>,
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod cpuadvisor {
    use prost::Message;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Message)]
    pub struct ListAndWatchResponse {
        #[prost(map = "string, message", tag = "1")]
        pub pod_entries: HashMap<String, CalculationEntries>,
        #[prost(message, repeated, tag = "2")]
        pub extra_entries: Vec<super::advisorsvc::CalculationInfo>,
        #[prost(bool, tag = "3")]
        pub allow_shared_cores_overlap_reclaimed_cores: bool,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct CalculationEntries {
        #[prost(map = "string, message", tag = "1")]
        pub container_entries: HashMap<String, CalculationInfo>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct CalculationInfo {
        #[prost(string, tag = "1")]
        pub owner_pool_name: String,
        #[prost(map = "int64, message", tag = "2")]
        pub calculation_results_by_numas: HashMap<i64, NumaCalculationResult>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct NumaCalculationResult {
        #[prost(message, repeated, tag = "1")]
        pub blocks: Vec<Block>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct Block {
        #[prost(uint64, tag = "1")]
        pub result: u64,
        #[prost(message, repeated, tag = "2")]
        pub overlap_targets: Vec<OverlapTarget>,
        #[prost(string, tag = "3")]
        pub block_id: String,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum OverlapType {
        OverlapWithPod = 0,
        OverlapWithPool = 1,
    }

    impl OverlapType {
        pub fn as_str_name(&self) -> &'static str {
            match self {
                OverlapType::OverlapWithPod => "OverlapWithPod",
                OverlapType::OverlapWithPool => "OverlapWithPool",
            }
        }
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct OverlapTarget {
        #[prost(string, tag = "1")]
        pub overlap_target_pool_name: String,
        #[prost(string, tag = "2")]
        pub overlap_target_pod_uid: String,
        #[prost(string, tag = "3")]
        pub overlap_target_container_name: String,
        #[prost(enumeration = "OverlapType", tag = "4")]
        pub overlap_type: i32,
        #[prost(string, tag = "5")]
        pub overlap_target_block_id: String,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct GetCheckpointRequest {}

    #[derive(Clone, PartialEq, Message)]
    pub struct GetCheckpointResponse {
        #[prost(map = "string, message", tag = "1")]
        pub entries: HashMap<String, AllocationEntries>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct AllocationEntries {
        #[prost(map = "string, message", tag = "1")]
        pub entries: HashMap<String, AllocationInfo>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct AllocationInfo {
        #[prost(bool, tag = "1")]
        pub ramp_up: bool,
        #[prost(string, tag = "2")]
        pub owner_pool_name: String,
        #[prost(map = "uint64, string", tag = "3")]
        pub topology_aware_assignments: HashMap<u64, String>,
        #[prost(map = "uint64, string", tag = "4")]
        pub original_topology_aware_assignments: HashMap<u64, String>,
    }

    pub mod cpu_advisor_server {
        use tonic::codegen::*;

        #[async_trait]
        pub trait CpuAdvisor: Send + Sync + 'static {
            type ListAndWatchStream: tokio_stream::Stream<
                    Item = std::result::Result<super::ListAndWatchResponse, tonic::Status>,
                > + Send
                + 'static;

            async fn list_and_watch(
                &self,
                request: tonic::Request<super::super::advisorsvc::Empty>,
            ) -> std::result::Result<tonic::Response<Self::ListAndWatchStream>, tonic::Status>;
        }

        #[derive(Debug)]
        pub struct CpuAdvisorServer<T: CpuAdvisor> {
            inner: Arc<T>,
        }

        impl<T: CpuAdvisor> CpuAdvisorServer<T> {
            pub fn new(inner: T) -> Self {
                Self::from_arc(Arc::new(inner))
            }

            pub fn from_arc(inner: Arc<T>) -> Self {
                Self { inner }
            }
        }

        impl<T, B> tonic::codegen::Service<http::Request<B>> for CpuAdvisorServer<T>
        where
            T: CpuAdvisor,
            B: Body + Send + 'static,
            B::Error: Into<StdError> + Send + 'static,
        {
            type Response = http::Response<tonic::body::BoxBody>;
            type Error = std::convert::Infallible;
            type Future = BoxFuture<Self::Response, Self::Error>;

            fn poll_ready(
                &mut self,
                _cx: &mut Context<'_>,
            ) -> Poll<std::result::Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, req: http::Request<B>) -> Self::Future {
                match req.uri().path() {
                    "/cpuadvisor.CPUAdvisor/ListAndWatch" => {
                        struct ListAndWatchSvc<T: CpuAdvisor>(pub Arc<T>);

                        impl<T: CpuAdvisor>
                            tonic::server::ServerStreamingService<super::super::advisorsvc::Empty>
                            for ListAndWatchSvc<T>
                        {
                            type Response = super::ListAndWatchResponse;
                            type ResponseStream = T::ListAndWatchStream;
                            type Future =
                                BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                            fn call(
                                &mut self,
                                request: tonic::Request<super::super::advisorsvc::Empty>,
                            ) -> Self::Future {
                                let inner = Arc::clone(&self.0);
                                let fut = async move { (*inner).list_and_watch(request).await };
                                Box::pin(fut)
                            }
                        }

                        let inner = Arc::clone(&self.inner);
                        let fut = async move {
                            let method = ListAndWatchSvc(inner);
                            let codec = tonic::codec::ProstCodec::default();
                            let mut grpc = tonic::server::Grpc::new(codec);
                            let res = grpc.server_streaming(method, req).await;
                            Ok(res)
                        };
                        Box::pin(fut)
                    }
                    _ => Box::pin(async move {
                        Ok(http::Response::builder()
                            .status(200)
                            .header("grpc-status", "12")
                            .header("content-type", "application/grpc")
                            .body(empty_body())
                            .unwrap())
                    }),
                }
            }
        }

        impl<T: CpuAdvisor> Clone for CpuAdvisorServer<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        impl<T: CpuAdvisor> tonic::server::NamedService for CpuAdvisorServer<T> {
            const NAME: &'static str = "cpuadvisor.CPUAdvisor";
        }
    }

    pub mod cpu_advisor_client {
        use tonic::codegen::*;

        #[derive(Debug, Clone)]
        pub struct CpuAdvisorClient<T> {
            inner: tonic::client::Grpc<T>,
        }

        impl CpuAdvisorClient<tonic::transport::Channel> {
            pub fn new(channel: tonic::transport::Channel) -> Self {
                let inner = tonic::client::Grpc::new(channel);
                Self { inner }
            }
        }

        impl<T> CpuAdvisorClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            pub async fn list_and_watch(
                &mut self,
                request: impl tonic::IntoRequest<super::super::advisorsvc::Empty>,
            ) -> Result<
                tonic::Response<tonic::codec::Streaming<super::ListAndWatchResponse>>,
                tonic::Status,
            > {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path =
                    http::uri::PathAndQuery::from_static("/cpuadvisor.CPUAdvisor/ListAndWatch");
                self.inner
                    .server_streaming(request.into_request(), path, codec)
                    .await
            }
        }
    }

    pub mod cpu_plugin_client {
        use tonic::codegen::*;

        #[derive(Debug, Clone)]
        pub struct CpuPluginClient<T> {
            inner: tonic::client::Grpc<T>,
        }

        impl CpuPluginClient<tonic::transport::Channel> {
            pub fn new(channel: tonic::transport::Channel) -> Self {
                let inner = tonic::client::Grpc::new(channel);
                Self { inner }
            }
        }

        impl<T> CpuPluginClient<T>
        where
            T: tonic::client::GrpcService<tonic::body::BoxBody>,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            pub async fn get_checkpoint(
                &mut self,
                request: impl tonic::IntoRequest<super::GetCheckpointRequest>,
            ) -> Result<tonic::Response<super::GetCheckpointResponse>, tonic::Status> {
                self.inner.ready().await.map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
                let codec = tonic::codec::ProstCodec::default();
                let path =
                    http::uri::PathAndQuery::from_static("/cpuadvisor.CPUPlugin/GetCheckpoint");
                self.inner.unary(request.into_request(), path, codec).await
            }
        }
    }
}

pub use advisorsvc::{CalculationInfo as ExtraCalculationInfo, CalculationResult, Empty};
pub use cpuadvisor::cpu_advisor_client::CpuAdvisorClient;
pub use cpuadvisor::cpu_advisor_server::{CpuAdvisor, CpuAdvisorServer};
pub use cpuadvisor::cpu_plugin_client::CpuPluginClient;
pub use cpuadvisor::*;
