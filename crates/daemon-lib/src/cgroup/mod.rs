//! Cpuset cgroup writing.
//!
//! Translates a container into its kubelet slice path for the configured
//! (runtime, driver) pair and writes `cpuset.cpus` / `cpuset.mems` there,
//! under either hierarchy flavor. Deleting slices is left to the kubelet's
//! own garbage collection.

use crate::error::DaemonError;
use crate::fsutil;
use crate::models::{Container, QosClass};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::debug;

/// Placeholder for "leave this cpuset file alone".
pub const RESOURCE_NOT_SET: &str = "";

const CPUS_FILE: &str = "cpuset.cpus";
const MEMS_FILE: &str = "cpuset.mems";
const MEMORY_MIGRATE_FILE: &str = "cpuset.memory_migrate";

/// Container runtimes whose id prefixes and slice layouts we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Docker,
    Containerd,
    Kind,
}

impl ContainerRuntime {
    /// URL prefix carried by container ids of this runtime. Kind nodes run
    /// containerd internally, so ids still use the containerd prefix.
    fn url_prefix(self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker://",
            ContainerRuntime::Containerd | ContainerRuntime::Kind => "containerd://",
        }
    }

    fn scope_prefix(self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Containerd | ContainerRuntime::Kind => "cri-containerd",
        }
    }
}

impl FromStr for ContainerRuntime {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(ContainerRuntime::Docker),
            "containerd" => Ok(ContainerRuntime::Containerd),
            "kind" => Ok(ContainerRuntime::Kind),
            other => Err(DaemonError::Configuration(format!(
                "unknown container runtime {other:?}"
            ))),
        }
    }
}

/// Cgroup driver the kubelet was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupDriver {
    Systemd,
    Cgroupfs,
}

impl FromStr for CgroupDriver {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "systemd" => Ok(CgroupDriver::Systemd),
            "cgroupfs" => Ok(CgroupDriver::Cgroupfs),
            other => Err(DaemonError::Configuration(format!(
                "unknown cgroup driver {other:?}"
            ))),
        }
    }
}

/// Which cgroup hierarchy the host mounts at the cgroup root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupMode {
    /// cgroup v1: controllers in subdirectories, cpuset under `cpuset/`.
    Legacy,
    /// cgroup v2 unified hierarchy.
    Unified,
}

/// The unified hierarchy exposes `cgroup.controllers` at its root.
pub async fn detect_mode(cgroup_root: &Path) -> CgroupMode {
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        CgroupMode::Unified
    } else {
        CgroupMode::Legacy
    }
}

/// Relative path of the container's cpuset leaf inside the hierarchy.
pub fn slice_name(c: &Container, runtime: ContainerRuntime, driver: CgroupDriver) -> String {
    match (runtime, driver) {
        (ContainerRuntime::Kind, _) => slice_name_kind(c),
        (_, CgroupDriver::Systemd) => slice_name_systemd(c, runtime),
        (_, CgroupDriver::Cgroupfs) => slice_name_cgroupfs(c, runtime),
    }
}

fn qos_subpath(qos: QosClass) -> &'static str {
    match qos {
        QosClass::Guaranteed => "",
        QosClass::BestEffort => "besteffort/",
        QosClass::Burstable => "burstable/",
    }
}

fn slice_name_kind(c: &Container) -> String {
    format!(
        "kubelet/kubepods/{}pod{}/{}",
        qos_subpath(c.qos),
        c.pod_id,
        c.cid.replace("containerd://", "")
    )
}

fn slice_name_systemd(c: &Container, runtime: ContainerRuntime) -> String {
    let (slice_type, pod_type) = match c.qos {
        QosClass::Guaranteed => ("", ""),
        QosClass::BestEffort => ("kubepods-besteffort.slice/", "-besteffort"),
        QosClass::Burstable => ("kubepods-burstable.slice/", "-burstable"),
    };
    format!(
        "/kubepods.slice/{}kubepods{}-pod{}.slice/{}-{}.scope",
        slice_type,
        pod_type,
        c.pod_id.replace('-', "_"),
        runtime.scope_prefix(),
        c.cid.replace(runtime.url_prefix(), "")
    )
}

fn slice_name_cgroupfs(c: &Container, runtime: ContainerRuntime) -> String {
    format!(
        "/kubepods/{}pod{}/{}",
        qos_subpath(c.qos),
        c.pod_id,
        c.cid.replace(runtime.url_prefix(), "")
    )
}

/// Seam between the allocators and the cgroup filesystem, so tests can
/// substitute a recording writer.
#[async_trait]
pub trait CgroupController: Send + Sync {
    /// Writes `cpus` (and `mems` when non-empty) into the container's slice
    /// under `cgroup_root`.
    async fn update_cpuset(
        &self,
        cgroup_root: &Path,
        c: &Container,
        cpus: &str,
        mems: &str,
    ) -> Result<(), DaemonError>;
}

/// Production writer for both hierarchy flavors.
pub struct CpusetWriter {
    runtime: ContainerRuntime,
    driver: CgroupDriver,
    mode: CgroupMode,
    /// Extra path component between the v1 cpuset controller root and the
    /// kubelet slices, for hosts that nest them.
    sub_path: Option<PathBuf>,
}

impl CpusetWriter {
    pub fn new(
        runtime: ContainerRuntime,
        driver: CgroupDriver,
        mode: CgroupMode,
        sub_path: Option<PathBuf>,
    ) -> Self {
        Self { runtime, driver, mode, sub_path }
    }

    async fn write_unified(
        &self,
        cgroup_root: &Path,
        slice: &str,
        cpus: &str,
        mems: &str,
    ) -> Result<(), DaemonError> {
        let target = cgroup_root.join(slice.trim_start_matches('/'));
        let target = fsutil::validate_path_inside_base(&target, cgroup_root)
            .map_err(|e| DaemonError::Configuration(e.to_string()))?;

        write_cpuset_files(&target, cpus, mems).await
        // Memory migration is implicit in the unified hierarchy.
    }

    async fn write_legacy(
        &self,
        cgroup_root: &Path,
        slice: &str,
        cpus: &str,
        mems: &str,
    ) -> Result<(), DaemonError> {
        let mut target = cgroup_root.join("cpuset");
        if let Some(sub_path) = &self.sub_path {
            target.push(sub_path);
        }
        target.push(slice.trim_start_matches('/'));
        let target = fsutil::validate_path_inside_base(&target, cgroup_root)
            .map_err(|e| DaemonError::Configuration(e.to_string()))?;

        write_cpuset_files(&target, cpus, mems).await?;
        if !mems.is_empty() {
            // v1 moves already-faulted pages only when memory_migrate is set.
            write_file(&target.join(MEMORY_MIGRATE_FILE), "1").await?;
        }
        Ok(())
    }
}

async fn write_cpuset_files(target: &Path, cpus: &str, mems: &str) -> Result<(), DaemonError> {
    fs::create_dir_all(target)
        .await
        .map_err(|e| DaemonError::Runtime(format!("cannot create cgroup {target:?}: {e}")))?;
    write_file(&target.join(CPUS_FILE), cpus).await?;
    if !mems.is_empty() {
        write_file(&target.join(MEMS_FILE), mems).await?;
    }
    Ok(())
}

async fn write_file(path: &Path, contents: &str) -> Result<(), DaemonError> {
    fs::write(path, contents)
        .await
        .map_err(|e| DaemonError::Runtime(format!("cannot write {path:?}: {e}")))
}

#[async_trait]
impl CgroupController for CpusetWriter {
    async fn update_cpuset(
        &self,
        cgroup_root: &Path,
        c: &Container,
        cpus: &str,
        mems: &str,
    ) -> Result<(), DaemonError> {
        if self.runtime != ContainerRuntime::Kind
            && !c.cid.starts_with(self.runtime.url_prefix())
        {
            return Err(DaemonError::Configuration(
                "configured runtime does not match pod container runtime".to_string(),
            ));
        }

        let slice = slice_name(c, self.runtime, self.driver);
        debug!(cgroup_root = %cgroup_root.display(), slice = %slice, cpus, mems, "updating cpuset");

        match self.mode {
            CgroupMode::Unified => self.write_unified(cgroup_root, &slice, cpus, mems).await,
            CgroupMode::Legacy => self.write_legacy(cgroup_root, &slice, cpus, mems).await,
        }
    }
}
