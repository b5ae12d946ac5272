//! Wire definitions for the `cpuplane.v1.ControlPlane` gRPC API.
//!
//! The message structs, client and server below are written by hand against
//! prost/tonic instead of being generated at build time, so builds never
//! depend on a protoc binary. Field tags are part of the wire contract; keep
//! them stable.

pub mod cpuplane {
    pub mod v1 {
        use prost::Message;

        /// Placement hint carried by requests. Accepted on the wire for
        /// forward compatibility; the allocator choice is a startup concern.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum CpuAffinity {
            #[default]
            Default = 0,
            Compact = 1,
            Scatter = 2,
            Pool = 3,
        }

        impl CpuAffinity {
            pub fn as_str_name(&self) -> &'static str {
                match self {
                    CpuAffinity::Default => "DEFAULT",
                    CpuAffinity::Compact => "COMPACT",
                    CpuAffinity::Scatter => "SCATTER",
                    CpuAffinity::Pool => "POOL",
                }
            }

            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    0 => Some(CpuAffinity::Default),
                    1 => Some(CpuAffinity::Compact),
                    2 => Some(CpuAffinity::Scatter),
                    3 => Some(CpuAffinity::Pool),
                    _ => None,
                }
            }
        }

        /// Which lifecycle transition a reply acknowledges.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum AllocationState {
            #[default]
            Created = 0,
            Updated = 1,
            Deleted = 2,
        }

        impl AllocationState {
            pub fn as_str_name(&self) -> &'static str {
                match self {
                    AllocationState::Created => "CREATED",
                    AllocationState::Updated => "UPDATED",
                    AllocationState::Deleted => "DELETED",
                }
            }

            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    0 => Some(AllocationState::Created),
                    1 => Some(AllocationState::Updated),
                    2 => Some(AllocationState::Deleted),
                    _ => None,
                }
            }
        }

        /// CPU and memory requests/limits of a container or a whole pod.
        /// Memory rides as the big-endian bytes of an arbitrary-precision
        /// integer.
        #[derive(Clone, PartialEq, Message)]
        pub struct ResourceInfo {
            #[prost(int32, tag = "1")]
            pub requested_cpus: i32,
            #[prost(int32, tag = "2")]
            pub limit_cpus: i32,
            #[prost(bytes = "vec", tag = "3")]
            pub requested_memory: Vec<u8>,
            #[prost(bytes = "vec", tag = "4")]
            pub limit_memory: Vec<u8>,
            /// Values of [`CpuAffinity`].
            #[prost(int32, tag = "5")]
            pub cpu_affinity: i32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ContainerInfo {
            #[prost(string, tag = "1")]
            pub container_id: String,
            #[prost(string, tag = "2")]
            pub container_name: String,
            #[prost(message, optional, tag = "3")]
            pub resources: Option<ResourceInfo>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct CreatePodRequest {
            #[prost(string, tag = "1")]
            pub pod_id: String,
            #[prost(string, tag = "2")]
            pub pod_name: String,
            #[prost(string, tag = "3")]
            pub pod_namespace: String,
            #[prost(message, optional, tag = "4")]
            pub resources: Option<ResourceInfo>,
            #[prost(message, repeated, tag = "5")]
            pub containers: Vec<ContainerInfo>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct UpdatePodRequest {
            #[prost(string, tag = "1")]
            pub pod_id: String,
            #[prost(message, optional, tag = "2")]
            pub resources: Option<ResourceInfo>,
            #[prost(message, repeated, tag = "3")]
            pub containers: Vec<ContainerInfo>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct DeletePodRequest {
            #[prost(string, tag = "1")]
            pub pod_id: String,
        }

        /// Inclusive range of CPU ids.
        #[derive(Clone, Copy, PartialEq, Message)]
        pub struct CpuBucket {
            #[prost(int32, tag = "1")]
            pub start_cpu: i32,
            #[prost(int32, tag = "2")]
            pub end_cpu: i32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ContainerAllocationInfo {
            #[prost(string, tag = "1")]
            pub container_id: String,
            /// Values of [`AllocationState`].
            #[prost(int32, tag = "2")]
            pub state: i32,
            #[prost(message, repeated, tag = "3")]
            pub cpu_buckets: Vec<CpuBucket>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct PodAllocationReply {
            #[prost(string, tag = "1")]
            pub pod_id: String,
            /// Values of [`AllocationState`].
            #[prost(int32, tag = "2")]
            pub state: i32,
            #[prost(message, repeated, tag = "3")]
            pub cpu_buckets: Vec<CpuBucket>,
            #[prost(message, repeated, tag = "4")]
            pub containers_allocations: Vec<ContainerAllocationInfo>,
        }

        pub mod control_plane_client {
            use super::*;
            use tonic::codegen::*;
            use tonic::transport::Uri;

            #[derive(Debug, Clone)]
            pub struct ControlPlaneClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl ControlPlaneClient<tonic::transport::Channel> {
                pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
                where
                    D: TryInto<tonic::transport::Endpoint>,
                    D::Error: Into<StdError>,
                {
                    let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
                    Ok(Self::new(conn))
                }

                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> ControlPlaneClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub fn with_origin(inner: T, origin: Uri) -> Self {
                    let inner = tonic::client::Grpc::with_origin(inner, origin);
                    Self { inner }
                }

                pub async fn create_pod(
                    &mut self,
                    request: impl tonic::IntoRequest<CreatePodRequest>,
                ) -> Result<tonic::Response<PodAllocationReply>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/cpuplane.v1.ControlPlane/CreatePod",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn update_pod(
                    &mut self,
                    request: impl tonic::IntoRequest<UpdatePodRequest>,
                ) -> Result<tonic::Response<PodAllocationReply>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/cpuplane.v1.ControlPlane/UpdatePod",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn delete_pod(
                    &mut self,
                    request: impl tonic::IntoRequest<DeletePodRequest>,
                ) -> Result<tonic::Response<PodAllocationReply>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/cpuplane.v1.ControlPlane/DeletePod",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }

        pub mod control_plane_server {
            use super::*;
            use tonic::codegen::*;

            /// Implemented by the daemon front end; one method per request
            /// kind, each serialized on the daemon-wide state lock.
            #[async_trait]
            pub trait ControlPlane: Send + Sync + 'static {
                async fn create_pod(
                    &self,
                    request: tonic::Request<CreatePodRequest>,
                ) -> std::result::Result<tonic::Response<PodAllocationReply>, tonic::Status>;

                async fn update_pod(
                    &self,
                    request: tonic::Request<UpdatePodRequest>,
                ) -> std::result::Result<tonic::Response<PodAllocationReply>, tonic::Status>;

                async fn delete_pod(
                    &self,
                    request: tonic::Request<DeletePodRequest>,
                ) -> std::result::Result<tonic::Response<PodAllocationReply>, tonic::Status>;
            }

            #[derive(Debug)]
            pub struct ControlPlaneServer<T: ControlPlane> {
                inner: Arc<T>,
            }

            impl<T: ControlPlane> ControlPlaneServer<T> {
                pub fn new(inner: T) -> Self {
                    Self::from_arc(Arc::new(inner))
                }

                pub fn from_arc(inner: Arc<T>) -> Self {
                    Self { inner }
                }
            }

            impl<T: ControlPlane> Clone for ControlPlaneServer<T> {
                fn clone(&self) -> Self {
                    Self { inner: Arc::clone(&self.inner) }
                }
            }

            impl<T, B> tonic::codegen::Service<http::Request<B>> for ControlPlaneServer<T>
            where
                T: ControlPlane,
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
                        "/cpuplane.v1.ControlPlane/CreatePod" => {
                            struct CreatePodSvc<T: ControlPlane>(Arc<T>);
                            impl<T: ControlPlane> tonic::server::UnaryService<CreatePodRequest>
                                for CreatePodSvc<T>
                            {
                                type Response = PodAllocationReply;
                                type Future =
                                    BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                                fn call(
                                    &mut self,
                                    request: tonic::Request<CreatePodRequest>,
                                ) -> Self::Future {
                                    let inner = Arc::clone(&self.0);
                                    Box::pin(async move { inner.create_pod(request).await })
                                }
                            }
                            let inner = Arc::clone(&self.inner);
                            Box::pin(async move {
                                let mut grpc =
                                    tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                                Ok(grpc.unary(CreatePodSvc(inner), req).await)
                            })
                        }
                        "/cpuplane.v1.ControlPlane/UpdatePod" => {
                            struct UpdatePodSvc<T: ControlPlane>(Arc<T>);
                            impl<T: ControlPlane> tonic::server::UnaryService<UpdatePodRequest>
                                for UpdatePodSvc<T>
                            {
                                type Response = PodAllocationReply;
                                type Future =
                                    BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                                fn call(
                                    &mut self,
                                    request: tonic::Request<UpdatePodRequest>,
                                ) -> Self::Future {
                                    let inner = Arc::clone(&self.0);
                                    Box::pin(async move { inner.update_pod(request).await })
                                }
                            }
                            let inner = Arc::clone(&self.inner);
                            Box::pin(async move {
                                let mut grpc =
                                    tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                                Ok(grpc.unary(UpdatePodSvc(inner), req).await)
                            })
                        }
                        "/cpuplane.v1.ControlPlane/DeletePod" => {
                            struct DeletePodSvc<T: ControlPlane>(Arc<T>);
                            impl<T: ControlPlane> tonic::server::UnaryService<DeletePodRequest>
                                for DeletePodSvc<T>
                            {
                                type Response = PodAllocationReply;
                                type Future =
                                    BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                                fn call(
                                    &mut self,
                                    request: tonic::Request<DeletePodRequest>,
                                ) -> Self::Future {
                                    let inner = Arc::clone(&self.0);
                                    Box::pin(async move { inner.delete_pod(request).await })
                                }
                            }
                            let inner = Arc::clone(&self.inner);
                            Box::pin(async move {
                                let mut grpc =
                                    tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                                Ok(grpc.unary(DeletePodSvc(inner), req).await)
                            })
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

            impl<T: ControlPlane> tonic::server::NamedService for ControlPlaneServer<T> {
                const NAME: &'static str = "cpuplane.v1.ControlPlane";
            }
        }
    }
}

pub use cpuplane::v1::*;
