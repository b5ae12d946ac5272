//! Transactional pod lifecycle orchestration.
//!
//! Create is all-or-nothing: a failed container assignment rolls back every
//! earlier assignment of the same pod. Delete and update are lenient: they
//! push through all containers, collect per-container failures and report
//! them together, because a half-deleted pod must still disappear from the
//! node.

use crate::cpuset::CpuSet;
use crate::error::{DaemonError, Result};
use crate::models::{
    AllocatedContainerResource, AllocatedPodResources, Container, PodMetadata, QosClass,
};
use crate::policy::StaticPolicy;
use crate::proto::{ContainerInfo, CreatePodRequest, DeletePodRequest, UpdatePodRequest};
use crate::quantity::MemoryQuantity;
use crate::state::DaemonState;
use crate::validation::{self, ValidationError};
use tracing::{error, info};

pub struct Daemon {
    state: DaemonState,
    policy: StaticPolicy,
}

/// A container whose requested shape differs from its current record.
#[derive(Debug, Clone)]
struct ContainerUpdate {
    current: Container,
    wanted: Container,
}

type ContainerFailures = Vec<(String, DaemonError)>;

impl Daemon {
    pub fn new(state: DaemonState, policy: StaticPolicy) -> Self {
        Self { state, policy }
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Admits a pod and allocates all of its containers, or none of them.
    pub async fn create_pod(&mut self, req: &CreatePodRequest) -> Result<AllocatedPodResources> {
        validation::validate_create_pod_request(req).map_err(validation_error)?;
        info!(pod_id = %req.pod_id, containers = req.containers.len(), "create pod allocation");

        let mut pod_meta = PodMetadata {
            pod_id: req.pod_id.clone(),
            name: req.pod_name.clone(),
            namespace: req.pod_namespace.clone(),
            containers: Vec::new(),
        };
        // Metadata goes in before the first assignment; the per-namespace
        // allocator resolves the pod's namespace through it.
        self.state.pods.insert(req.pod_id.clone(), pod_meta.clone());

        let mut container_resources = Vec::new();
        for (index, info) in req.containers.iter().enumerate() {
            let assigned = match container_from_request(info, &req.pod_id) {
                Ok(container) => {
                    match self.policy.assign_container(&container, &mut self.state).await {
                        Ok(()) => Ok(container),
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            };
            let container = match assigned {
                Ok(container) => container,
                Err(err) => {
                    error!(cid = %info.container_id, %err, "cannot assign container");
                    self.rollback_containers(&req.pod_id, &req.containers[..index]).await;
                    self.state.pods.remove(&req.pod_id);
                    return Err(err);
                }
            };

            container_resources.push(AllocatedContainerResource {
                container_id: info.container_id.clone(),
                cpuset: self
                    .state
                    .allocated
                    .get(&info.container_id)
                    .cloned()
                    .unwrap_or_default(),
            });
            pod_meta.containers.push(container);
            self.state.pods.insert(req.pod_id.clone(), pod_meta.clone());
        }

        self.save_state().await?;
        info!(pod_id = %req.pod_id, "pod allocation created");
        Ok(pod_resources(container_resources))
    }

    /// Frees a pod's containers. Per-container failures are collected and the
    /// metadata is removed regardless, so a broken container cannot keep its
    /// pod alive in the state.
    pub async fn delete_pod(&mut self, req: &DeletePodRequest) -> Result<()> {
        validation::validate_delete_pod_request(req).map_err(validation_error)?;
        info!(pod_id = %req.pod_id, "delete pod allocation");

        let Some(pod) = self.state.pods.get(&req.pod_id).cloned() else {
            return Err(DaemonError::PodNotFound(format!(
                "pod {} not found in cpu state",
                req.pod_id
            )));
        };

        let failures = self.delete_containers(&pod.containers).await;
        self.state.pods.remove(&req.pod_id);

        if let Err(err) = self.state.save().await {
            error!(%err, "cannot save state");
        }

        info!(pod_id = %req.pod_id, "pod allocation deleted");
        match failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Reconciles a pod with a new container list: removed containers are
    /// freed, changed ones freed and reassigned, new ones assigned.
    /// Best-effort: failures are aggregated, not rolled back.
    pub async fn update_pod(&mut self, req: &UpdatePodRequest) -> Result<AllocatedPodResources> {
        validation::validate_update_pod_request(req).map_err(validation_error)?;

        let Some(mut pod) = self.state.pods.get(&req.pod_id).cloned() else {
            return Err(DaemonError::PodNotFound(format!(
                "pod {} does not exist, cannot update",
                req.pod_id
            )));
        };
        info!(pod_id = %req.pod_id, "update pod allocation");
        let current = pod.containers.clone();

        let deleted = deleted_containers(&current, &req.containers);
        let delete_failures = self.delete_containers(&deleted).await;

        let changed = changed_containers(&current, &req.containers)?;
        let (mut allocated, updated_records, update_failures) =
            self.update_containers(&changed).await;

        let added = added_containers(&current, &req.containers, &req.pod_id)?;
        let (added_allocated, added_records, add_failures) = self.add_containers(&added).await;
        allocated.extend(added_allocated);

        pod.containers = unmodified_containers(&current, &req.containers)?;
        pod.containers.extend(updated_records);
        pod.containers.extend(added_records);
        self.state.pods.insert(req.pod_id.clone(), pod);

        self.save_state().await?;
        info!(pod_id = %req.pod_id, "pod allocation updated");

        if !delete_failures.is_empty() || !update_failures.is_empty() || !add_failures.is_empty()
        {
            return Err(DaemonError::Runtime(format!(
                "delete errors: [{}], add errors: [{}], update errors: [{}]",
                format_failures(&delete_failures),
                format_failures(&add_failures),
                format_failures(&update_failures)
            )));
        }
        Ok(pod_resources(allocated))
    }

    /// Undoes the assignments of a partially created pod, most recent first.
    /// Freeing restores the bookkeeping; clearing widens the cgroup back so
    /// no pinning survives for a pod that was never admitted.
    async fn rollback_containers(&mut self, pod_id: &str, containers: &[ContainerInfo]) {
        for info in containers.iter().rev() {
            info!(cid = %info.container_id, "rolling back container");
            let container = match container_from_request(info, pod_id) {
                Ok(container) => container,
                Err(err) => {
                    error!(cid = %info.container_id, %err, "cannot materialize container");
                    continue;
                }
            };
            if let Err(err) = self.policy.delete_container(&container, &mut self.state).await {
                error!(cid = %container.cid, %err, "failed to free rolled back container");
            }
            if let Err(err) = self.policy.clear_container(&container, &mut self.state).await {
                error!(cid = %container.cid, %err, "failed to clear rolled back container");
            }
        }
    }

    async fn delete_containers(&mut self, containers: &[Container]) -> ContainerFailures {
        let mut failures = ContainerFailures::new();
        for container in containers {
            if let Err(err) = self.policy.delete_container(container, &mut self.state).await {
                error!(cid = %container.cid, %err, "cannot delete container");
                failures.push((container.cid.clone(), err));
            }
        }
        failures
    }

    async fn update_containers(
        &mut self,
        updates: &[ContainerUpdate],
    ) -> (Vec<AllocatedContainerResource>, Vec<Container>, ContainerFailures) {
        let mut allocated = Vec::new();
        let mut records = Vec::new();
        let mut failures = ContainerFailures::new();

        for update in updates {
            if let Err(err) = self
                .policy
                .delete_container(&update.current, &mut self.state)
                .await
            {
                failures.push((update.current.cid.clone(), err));
                continue;
            }
            if let Err(err) = self
                .policy
                .assign_container(&update.wanted, &mut self.state)
                .await
            {
                failures.push((update.current.cid.clone(), err));
                continue;
            }
            allocated.push(AllocatedContainerResource {
                container_id: update.wanted.cid.clone(),
                cpuset: self
                    .state
                    .allocated
                    .get(&update.wanted.cid)
                    .cloned()
                    .unwrap_or_default(),
            });
            records.push(update.wanted.clone());
        }
        (allocated, records, failures)
    }

    async fn add_containers(
        &mut self,
        added: &[Container],
    ) -> (Vec<AllocatedContainerResource>, Vec<Container>, ContainerFailures) {
        let mut allocated = Vec::new();
        let mut records = Vec::new();
        let mut failures = ContainerFailures::new();

        for container in added {
            if let Err(err) = self.policy.assign_container(container, &mut self.state).await {
                failures.push((container.cid.clone(), err));
                continue;
            }
            allocated.push(AllocatedContainerResource {
                container_id: container.cid.clone(),
                cpuset: self
                    .state
                    .allocated
                    .get(&container.cid)
                    .cloned()
                    .unwrap_or_default(),
            });
            records.push(container.clone());
        }
        (allocated, records, failures)
    }

    async fn save_state(&mut self) -> Result<()> {
        info!("saving state");
        self.state.save().await.map_err(|err| {
            error!(%err, "cannot save daemon state");
            DaemonError::Runtime(format!("cannot save daemon state: {err}"))
        })
    }
}

fn validation_error(err: ValidationError) -> DaemonError {
    if err.is_overflow() {
        DaemonError::CountingOverflow(err.to_string())
    } else {
        DaemonError::PodSpec(err.to_string())
    }
}

fn format_failures(failures: &ContainerFailures) -> String {
    failures
        .iter()
        .map(|(cid, err)| format!("cid: {cid}, err: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Union of the per-container buckets, compressed back into ranges.
fn pod_resources(container_resources: Vec<AllocatedContainerResource>) -> AllocatedPodResources {
    let mut union = CpuSet::new();
    for resource in &container_resources {
        union.merge(&CpuSet::from_buckets(&resource.cpuset));
    }
    AllocatedPodResources { cpuset: union.to_bucket_list(), container_resources }
}

/// Materializes the daemon-side container record, deriving QoS from the
/// request/limit relation: equal-and-positive is guaranteed, under-limit is
/// burstable, everything else best effort.
pub(crate) fn container_from_request(info: &ContainerInfo, pod_id: &str) -> Result<Container> {
    let resources = info
        .resources
        .as_ref()
        .ok_or_else(|| DaemonError::PodSpec("container resources are missing".to_string()))?;

    let requested_memory = MemoryQuantity::from_bytes(&resources.requested_memory)
        .map_err(|e| DaemonError::PodSpec(format!("request memory: {e}")))?;
    let limit_memory = MemoryQuantity::from_bytes(&resources.limit_memory)
        .map_err(|e| DaemonError::PodSpec(format!("limit memory: {e}")))?;

    let qos = if resources.requested_cpus == resources.limit_cpus
        && requested_memory == limit_memory
        && resources.requested_cpus > 0
    {
        QosClass::Guaranteed
    } else if resources.requested_cpus < resources.limit_cpus || requested_memory < limit_memory
    {
        QosClass::Burstable
    } else {
        QosClass::BestEffort
    };

    Ok(Container {
        cid: info.container_id.clone(),
        pod_id: pod_id.to_string(),
        name: info.container_name.clone(),
        cpus: resources.requested_cpus.max(0) as usize,
        qos,
    })
}

fn deleted_containers(current: &[Container], wanted: &[ContainerInfo]) -> Vec<Container> {
    current
        .iter()
        .filter(|container| !wanted.iter().any(|w| w.container_id == container.cid))
        .cloned()
        .collect()
}

fn changed_containers(
    current: &[Container],
    wanted: &[ContainerInfo],
) -> Result<Vec<ContainerUpdate>> {
    let mut changed = Vec::new();
    for info in wanted {
        if let Some(existing) = current.iter().find(|c| c.cid == info.container_id) {
            let materialized = container_from_request(info, &existing.pod_id)?;
            if materialized != *existing {
                changed.push(ContainerUpdate {
                    current: existing.clone(),
                    wanted: materialized,
                });
            }
        }
    }
    Ok(changed)
}

fn unmodified_containers(
    current: &[Container],
    wanted: &[ContainerInfo],
) -> Result<Vec<Container>> {
    let mut unmodified = Vec::new();
    for info in wanted {
        if let Some(existing) = current.iter().find(|c| c.cid == info.container_id) {
            if container_from_request(info, &existing.pod_id)? == *existing {
                unmodified.push(existing.clone());
            }
        }
    }
    Ok(unmodified)
}

fn added_containers(
    current: &[Container],
    wanted: &[ContainerInfo],
    pod_id: &str,
) -> Result<Vec<Container>> {
    wanted
        .iter()
        .filter(|info| !current.iter().any(|c| c.cid == info.container_id))
        .map(|info| container_from_request(info, pod_id))
        .collect()
}
