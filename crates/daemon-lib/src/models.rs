//! Core data models for the allocation engine.

use crate::cpuset::CpuBucket;
use serde::{Deserialize, Serialize};

/// Kubernetes quality-of-service class, derived from request/limit equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosClass {
    Guaranteed,
    BestEffort,
    Burstable,
}

/// A container as the daemon tracks it: identity, parent pod, whole-CPU
/// request and QoS class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Opaque id including the runtime URL prefix (`containerd://...`).
    pub cid: String,
    /// Id of the parent pod.
    pub pod_id: String,
    pub name: String,
    /// Requested number of whole CPUs.
    pub cpus: usize,
    pub qos: QosClass,
}

/// Pod bookkeeping: identity plus the containers currently admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMetadata {
    pub pod_id: String,
    pub name: String,
    pub namespace: String,
    pub containers: Vec<Container>,
}

/// Allocation outcome for a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedContainerResource {
    pub container_id: String,
    pub cpuset: Vec<CpuBucket>,
}

/// Allocation outcome for a whole pod: the union of its containers' CPU
/// buckets plus the per-container breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatedPodResources {
    pub cpuset: Vec<CpuBucket>,
    pub container_resources: Vec<AllocatedContainerResource>,
}
