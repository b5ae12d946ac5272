//! gRPC client wrapper for the control plane API.

use crate::spec::ContainerSpec;
use anyhow::{Context, Result};
use cpuplane_lib::proto::control_plane_client::ControlPlaneClient;
use cpuplane_lib::proto::{
    ContainerInfo, CreatePodRequest, DeletePodRequest, PodAllocationReply, UpdatePodRequest,
};
use cpuplane_lib::validation;
use tonic::transport::Channel;

pub async fn connect(endpoint: &str) -> Result<ControlPlaneClient<Channel>> {
    ControlPlaneClient::connect(endpoint.to_string())
        .await
        .with_context(|| format!("cannot connect to {endpoint}"))
}

pub async fn create_pod(
    client: &mut ControlPlaneClient<Channel>,
    pod_id: String,
    name: String,
    namespace: String,
    specs: &[ContainerSpec],
) -> Result<PodAllocationReply> {
    let containers = to_container_infos(specs);
    let resources = validation::aggregate_pod_resources(&containers)?;
    let reply = client
        .create_pod(CreatePodRequest {
            pod_id,
            pod_name: name,
            pod_namespace: namespace,
            resources: Some(resources),
            containers,
        })
        .await?
        .into_inner();
    Ok(reply)
}

pub async fn update_pod(
    client: &mut ControlPlaneClient<Channel>,
    pod_id: String,
    specs: &[ContainerSpec],
) -> Result<PodAllocationReply> {
    let containers = to_container_infos(specs);
    let resources = validation::aggregate_pod_resources(&containers)?;
    let reply = client
        .update_pod(UpdatePodRequest {
            pod_id,
            resources: Some(resources),
            containers,
        })
        .await?
        .into_inner();
    Ok(reply)
}

pub async fn delete_pod(
    client: &mut ControlPlaneClient<Channel>,
    pod_id: String,
) -> Result<PodAllocationReply> {
    let reply = client
        .delete_pod(DeletePodRequest { pod_id })
        .await?
        .into_inner();
    Ok(reply)
}

fn to_container_infos(specs: &[ContainerSpec]) -> Vec<ContainerInfo> {
    specs.iter().map(ContainerSpec::to_container_info).collect()
}
