//! gRPC front end bridging the wire API to the daemon core.
//!
//! All three handlers funnel through one `Mutex<Daemon>`: that mutex is the
//! daemon-wide lock, so concurrent RPCs serialize and the persisted state
//! reflects a total order over accepted operations.

use crate::daemon::Daemon;
use crate::error::DaemonError;
use crate::models::AllocatedPodResources;
use crate::observability::DaemonMetrics;
use crate::proto::control_plane_server::ControlPlane;
use crate::proto::{
    AllocationState, ContainerAllocationInfo, CpuBucket, CreatePodRequest, DeletePodRequest,
    PodAllocationReply, UpdatePodRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use tracing::warn;

pub struct ControlPlaneService {
    daemon: Arc<Mutex<Daemon>>,
    metrics: DaemonMetrics,
}

impl ControlPlaneService {
    pub fn new(daemon: Arc<Mutex<Daemon>>) -> Self {
        Self { daemon, metrics: DaemonMetrics::new() }
    }
}

#[tonic::async_trait]
impl ControlPlane for ControlPlaneService {
    async fn create_pod(
        &self,
        request: Request<CreatePodRequest>,
    ) -> Result<Response<PodAllocationReply>, Status> {
        let req = request.into_inner();
        let pod_id = req.pod_id.clone();
        let started = Instant::now();

        let mut daemon = self.daemon.lock().await;
        let result = daemon.create_pod(&req).await;
        self.metrics
            .set_allocation_counts(daemon.state().pods.len(), daemon.state().allocated.len());
        drop(daemon);

        match result {
            Ok(resources) => {
                self.metrics
                    .observe_request("create", "ok", started.elapsed().as_secs_f64());
                Ok(Response::new(reply(pod_id, AllocationState::Created, &resources)))
            }
            Err(err) => {
                self.metrics
                    .observe_request("create", "error", started.elapsed().as_secs_f64());
                warn!(pod_id = %pod_id, %err, "create pod failed");
                Err(status_from(err))
            }
        }
    }

    async fn update_pod(
        &self,
        request: Request<UpdatePodRequest>,
    ) -> Result<Response<PodAllocationReply>, Status> {
        let req = request.into_inner();
        let pod_id = req.pod_id.clone();
        let started = Instant::now();

        let mut daemon = self.daemon.lock().await;
        let result = daemon.update_pod(&req).await;
        self.metrics
            .set_allocation_counts(daemon.state().pods.len(), daemon.state().allocated.len());
        drop(daemon);

        match result {
            Ok(resources) => {
                self.metrics
                    .observe_request("update", "ok", started.elapsed().as_secs_f64());
                Ok(Response::new(reply(pod_id, AllocationState::Updated, &resources)))
            }
            Err(err) => {
                self.metrics
                    .observe_request("update", "error", started.elapsed().as_secs_f64());
                warn!(pod_id = %pod_id, %err, "update pod failed");
                Err(status_from(err))
            }
        }
    }

    async fn delete_pod(
        &self,
        request: Request<DeletePodRequest>,
    ) -> Result<Response<PodAllocationReply>, Status> {
        let req = request.into_inner();
        let pod_id = req.pod_id.clone();
        let started = Instant::now();

        let mut daemon = self.daemon.lock().await;
        let result = daemon.delete_pod(&req).await;
        self.metrics
            .set_allocation_counts(daemon.state().pods.len(), daemon.state().allocated.len());
        drop(daemon);

        match result {
            Ok(()) => {
                self.metrics
                    .observe_request("delete", "ok", started.elapsed().as_secs_f64());
                Ok(Response::new(PodAllocationReply {
                    pod_id,
                    state: AllocationState::Deleted as i32,
                    cpu_buckets: Vec::new(),
                    containers_allocations: Vec::new(),
                }))
            }
            Err(err) => {
                self.metrics
                    .observe_request("delete", "error", started.elapsed().as_secs_f64());
                warn!(pod_id = %pod_id, %err, "delete pod failed");
                Err(status_from(err))
            }
        }
    }
}

fn reply(
    pod_id: String,
    state: AllocationState,
    resources: &AllocatedPodResources,
) -> PodAllocationReply {
    PodAllocationReply {
        pod_id,
        state: state as i32,
        cpu_buckets: resources.cpuset.iter().map(proto_bucket).collect(),
        containers_allocations: resources
            .container_resources
            .iter()
            .map(|resource| ContainerAllocationInfo {
                container_id: resource.container_id.clone(),
                state: state as i32,
                cpu_buckets: resource.cpuset.iter().map(proto_bucket).collect(),
            })
            .collect(),
    }
}

fn proto_bucket(bucket: &crate::cpuset::CpuBucket) -> CpuBucket {
    CpuBucket {
        start_cpu: bucket.start_cpu as i32,
        end_cpu: bucket.end_cpu as i32,
    }
}

fn status_from(err: DaemonError) -> Status {
    let message = err.to_string();
    match err {
        DaemonError::PodSpec(_)
        | DaemonError::CountingOverflow(_)
        | DaemonError::NotImplemented(_) => Status::invalid_argument(message),
        DaemonError::PodNotFound(_) | DaemonError::ContainerNotFound(_) => {
            Status::not_found(message)
        }
        DaemonError::Configuration(_) => Status::failed_precondition(message),
        DaemonError::CpusNotAvailable(_) => Status::resource_exhausted(message),
        DaemonError::MissingCgroup(_) | DaemonError::Runtime(_) => Status::internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{Allocator, DefaultAllocator};
    use crate::cpuset::CpuBucket as Bucket;
    use crate::policy::StaticPolicy;
    use crate::proto::{ContainerInfo, ResourceInfo};
    use crate::quantity::MemoryQuantity;
    use crate::test_support::{state_with_available, RecordingController};
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> ControlPlaneService {
        let ctrl = Arc::new(RecordingController::new());
        let mut state = state_with_available(&[Bucket::new(0, 15)]);
        state.state_path = dir.path().join("state.json");
        let daemon = Daemon::new(
            state,
            StaticPolicy::new(Allocator::Default(DefaultAllocator::new(ctrl))),
        );
        ControlPlaneService::new(Arc::new(Mutex::new(daemon)))
    }

    fn guaranteed(cid: &str, cpus: i32) -> ContainerInfo {
        ContainerInfo {
            container_id: format!("containerd://{cid}"),
            container_name: cid.to_string(),
            resources: Some(ResourceInfo {
                requested_cpus: cpus,
                limit_cpus: cpus,
                requested_memory: MemoryQuantity::new(64).to_bytes(),
                limit_memory: MemoryQuantity::new(64).to_bytes(),
                cpu_affinity: 0,
            }),
        }
    }

    fn create_request(pod_id: &str, containers: Vec<ContainerInfo>) -> CreatePodRequest {
        let resources = crate::validation::aggregate_pod_resources(&containers).unwrap();
        CreatePodRequest {
            pod_id: pod_id.to_string(),
            pod_name: format!("{pod_id}-name"),
            pod_namespace: "default".to_string(),
            resources: Some(resources),
            containers,
        }
    }

    #[tokio::test]
    async fn create_reply_carries_pod_and_container_buckets() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let reply = service
            .create_pod(Request::new(create_request("p1", vec![guaranteed("c1", 4)])))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(reply.pod_id, "p1");
        assert_eq!(reply.state, AllocationState::Created as i32);
        assert_eq!(reply.cpu_buckets.len(), 1);
        assert_eq!(reply.cpu_buckets[0].start_cpu, 0);
        assert_eq!(reply.cpu_buckets[0].end_cpu, 3);
        assert_eq!(reply.containers_allocations.len(), 1);
        assert_eq!(
            reply.containers_allocations[0].container_id,
            "containerd://c1"
        );
    }

    #[tokio::test]
    async fn delete_reply_acknowledges_without_buckets() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service
            .create_pod(Request::new(create_request("p1", vec![guaranteed("c1", 2)])))
            .await
            .unwrap();

        let reply = service
            .delete_pod(Request::new(DeletePodRequest { pod_id: "p1".to_string() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.state, AllocationState::Deleted as i32);
        assert!(reply.cpu_buckets.is_empty());
    }

    #[tokio::test]
    async fn error_kinds_map_to_status_codes() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let status = service
            .delete_pod(Request::new(DeletePodRequest { pod_id: "ghost".to_string() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let mut bad = create_request("p1", vec![guaranteed("c1", 2)]);
        bad.pod_namespace.clear();
        let status = service.create_pod(Request::new(bad)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = service
            .create_pod(Request::new(create_request("p1", vec![guaranteed("c1", 100)])))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
    }
}
