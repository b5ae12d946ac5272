//! Request validation and per-pod resource aggregation.
//!
//! Everything here runs before any state is touched; a request that fails
//! validation never reaches the allocators.

use crate::proto::{
    ContainerInfo, CreatePodRequest, DeletePodRequest, ResourceInfo, UpdatePodRequest,
};
use crate::quantity::MemoryQuantity;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pod spec does not include any containers")]
    NoContainers,
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("{0} cannot be less than 0")]
    Negative(&'static str),
    #[error("{0}: limit cannot be smaller than request")]
    LimitSmallerThanRequest(&'static str),
    #[error("{0}: invalid memory quantity")]
    InvalidQuantity(&'static str),
    #[error("pod {0} sum is not representable")]
    CountingOverflow(&'static str),
    #[error("container resources are missing")]
    MissingResources,
}

impl ValidationError {
    /// Overflow is its own error kind at the daemon boundary; everything
    /// else is a spec problem.
    pub fn is_overflow(&self) -> bool {
        matches!(self, ValidationError::CountingOverflow(_))
    }
}

/// Checks one resource block: nothing negative, limits at least as large as
/// requests, memory quantities decodable.
pub fn validate_resource_info(info: &ResourceInfo) -> Result<(), ValidationError> {
    if info.requested_cpus < 0 {
        return Err(ValidationError::Negative("request CPU"));
    }
    if info.limit_cpus < 0 {
        return Err(ValidationError::Negative("limit CPU"));
    }

    let requested_memory = MemoryQuantity::from_bytes(&info.requested_memory)
        .map_err(|_| ValidationError::InvalidQuantity("request memory"))?;
    if requested_memory.is_negative() {
        return Err(ValidationError::Negative("request memory"));
    }
    let limit_memory = MemoryQuantity::from_bytes(&info.limit_memory)
        .map_err(|_| ValidationError::InvalidQuantity("limit memory"))?;
    if limit_memory.is_negative() {
        return Err(ValidationError::Negative("limit memory"));
    }

    if info.limit_cpus < info.requested_cpus {
        return Err(ValidationError::LimitSmallerThanRequest("CPU"));
    }
    if limit_memory < requested_memory {
        return Err(ValidationError::LimitSmallerThanRequest("memory"));
    }
    Ok(())
}

/// Checks container identity and resources.
pub fn validate_containers(containers: &[ContainerInfo]) -> Result<(), ValidationError> {
    for container in containers {
        if container.container_id.is_empty() {
            return Err(ValidationError::EmptyField("container id"));
        }
        if container.container_name.is_empty() {
            return Err(ValidationError::EmptyField("container name"));
        }
        let resources = container
            .resources
            .as_ref()
            .ok_or(ValidationError::MissingResources)?;
        validate_resource_info(resources)?;
    }
    Ok(())
}

/// Sums container resources into a pod-level [`ResourceInfo`], reporting
/// overflow instead of wrapping. The CLI builds pod resources with this too.
pub fn aggregate_pod_resources(
    containers: &[ContainerInfo],
) -> Result<ResourceInfo, ValidationError> {
    let mut requested_cpus: i32 = 0;
    let mut limit_cpus: i32 = 0;
    let mut requested_memory = MemoryQuantity::ZERO;
    let mut limit_memory = MemoryQuantity::ZERO;

    for container in containers {
        let resources = container
            .resources
            .as_ref()
            .ok_or(ValidationError::MissingResources)?;

        requested_cpus = requested_cpus
            .checked_add(resources.requested_cpus)
            .filter(|sum| *sum >= 0)
            .ok_or(ValidationError::CountingOverflow("CPU request"))?;
        limit_cpus = limit_cpus
            .checked_add(resources.limit_cpus)
            .filter(|sum| *sum >= 0)
            .ok_or(ValidationError::CountingOverflow("CPU limit"))?;

        let request = MemoryQuantity::from_bytes(&resources.requested_memory)
            .map_err(|_| ValidationError::InvalidQuantity("request memory"))?;
        if request.is_negative() {
            return Err(ValidationError::CountingOverflow("memory request"));
        }
        requested_memory = requested_memory
            .checked_add(request)
            .map_err(|_| ValidationError::CountingOverflow("memory request"))?;

        let limit = MemoryQuantity::from_bytes(&resources.limit_memory)
            .map_err(|_| ValidationError::InvalidQuantity("limit memory"))?;
        if limit.is_negative() {
            return Err(ValidationError::CountingOverflow("memory limit"));
        }
        limit_memory = limit_memory
            .checked_add(limit)
            .map_err(|_| ValidationError::CountingOverflow("memory limit"))?;
    }

    Ok(ResourceInfo {
        requested_cpus,
        limit_cpus,
        requested_memory: requested_memory.to_bytes(),
        limit_memory: limit_memory.to_bytes(),
        cpu_affinity: 0,
    })
}

pub fn validate_create_pod_request(req: &CreatePodRequest) -> Result<(), ValidationError> {
    if req.containers.is_empty() {
        return Err(ValidationError::NoContainers);
    }
    if req.pod_id.is_empty() {
        return Err(ValidationError::EmptyField("pod id"));
    }
    if req.pod_name.is_empty() {
        return Err(ValidationError::EmptyField("pod name"));
    }
    if req.pod_namespace.is_empty() {
        return Err(ValidationError::EmptyField("pod namespace"));
    }
    let resources = req.resources.as_ref().ok_or(ValidationError::MissingResources)?;
    validate_resource_info(resources)?;
    validate_containers(&req.containers)?;
    aggregate_pod_resources(&req.containers)?;
    Ok(())
}

pub fn validate_update_pod_request(req: &UpdatePodRequest) -> Result<(), ValidationError> {
    if req.containers.is_empty() {
        return Err(ValidationError::NoContainers);
    }
    if req.pod_id.is_empty() {
        return Err(ValidationError::EmptyField("pod id"));
    }
    let resources = req.resources.as_ref().ok_or(ValidationError::MissingResources)?;
    validate_resource_info(resources)?;
    validate_containers(&req.containers)?;
    aggregate_pod_resources(&req.containers)?;
    Ok(())
}

pub fn validate_delete_pod_request(req: &DeletePodRequest) -> Result<(), ValidationError> {
    if req.pod_id.is_empty() {
        return Err(ValidationError::EmptyField("pod id"));
    }
    Ok(())
}
