//! Daemon configuration flags.

use clap::Parser;
use cpuplane_lib::allocator::{
    Allocator, DefaultAllocator, NumaAllocator, NumaNamespaceAllocator,
};
use cpuplane_lib::cgroup::{CgroupController, CgroupDriver, ContainerRuntime};
use cpuplane_lib::DaemonError;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Allocation policy selection, as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorPolicy {
    Default,
    Numa,
    NumaNamespace { buckets: usize },
    NumaNamespaceExclusive { buckets: usize },
}

impl FromStr for AllocatorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "default" {
            return Ok(Self::Default);
        }
        if s == "numa" {
            return Ok(Self::Numa);
        }
        // The exclusive prefix must be tried first; it contains the other.
        if let Some(raw) = s.strip_prefix("numa-namespace-exclusive=") {
            return parse_bucket_count(raw).map(|buckets| Self::NumaNamespaceExclusive { buckets });
        }
        if let Some(raw) = s.strip_prefix("numa-namespace=") {
            return parse_bucket_count(raw).map(|buckets| Self::NumaNamespace { buckets });
        }
        Err(format!(
            "unknown allocator {s:?}; expected default, numa, numa-namespace=<N> or \
             numa-namespace-exclusive=<N>"
        ))
    }
}

fn parse_bucket_count(raw: &str) -> Result<usize, String> {
    let buckets: usize = raw
        .parse()
        .map_err(|_| format!("bucket count must be a number, got {raw:?}"))?;
    if buckets == 0 {
        return Err("bucket count must be greater than 0".to_string());
    }
    Ok(buckets)
}

#[derive(Debug, Parser)]
#[command(name = "cpuplaned", version, about = "Node-local CPU pinning control plane")]
pub struct Config {
    /// gRPC listen port.
    #[arg(long, env = "CPUPLANE_PORT", default_value_t = 31000)]
    pub port: u16,

    /// HTTP port serving /healthz, /readyz and /metrics.
    #[arg(long, env = "CPUPLANE_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Allocation policy: default | numa | numa-namespace=<N> |
    /// numa-namespace-exclusive=<N>.
    #[arg(long, default_value = "default")]
    pub allocator: AllocatorPolicy,

    /// Additionally pin memory to the NUMA nodes of the allocated CPUs.
    /// Only valid with the numa-aware allocators.
    #[arg(long, default_value_t = false)]
    pub memory_pinning: bool,

    /// Container runtime: containerd | docker | kind.
    #[arg(long, default_value = "containerd")]
    pub runtime: ContainerRuntime,

    /// Cgroup driver the kubelet runs with: systemd | cgroupfs.
    #[arg(long, default_value = "systemd")]
    pub cgroup_driver: CgroupDriver,

    /// Root of the cgroup filesystem.
    #[arg(long, default_value = "/sys/fs/cgroup")]
    pub cgroup_path: PathBuf,

    /// Extra path component between the v1 cpuset root and the kubelet
    /// slices, for hosts that nest them.
    #[arg(long)]
    pub cgroup_sub_path: Option<PathBuf>,

    /// Sysfs node directory the topology is discovered from.
    #[arg(long, default_value = "/sys/devices/system/node")]
    pub topology_path: PathBuf,

    /// Path of the persisted daemon state.
    #[arg(long, default_value = "/var/lib/cpuplane/state.json")]
    pub state_path: PathBuf,
}

impl Config {
    /// Rejects option combinations the allocators cannot honor.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.memory_pinning && self.allocator == AllocatorPolicy::Default {
            return Err(DaemonError::Configuration(
                "memory pinning is available only for numa-aware allocators".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build_allocator(&self, ctrl: Arc<dyn CgroupController>) -> Allocator {
        match self.allocator {
            AllocatorPolicy::Default => Allocator::Default(DefaultAllocator::new(ctrl)),
            AllocatorPolicy::Numa => {
                Allocator::Numa(NumaAllocator::new(ctrl, self.memory_pinning))
            }
            AllocatorPolicy::NumaNamespace { buckets } => Allocator::NumaPerNamespace(
                NumaNamespaceAllocator::new(buckets, ctrl, false, self.memory_pinning),
            ),
            AllocatorPolicy::NumaNamespaceExclusive { buckets } => Allocator::NumaPerNamespace(
                NumaNamespaceAllocator::new(buckets, ctrl, true, self.memory_pinning),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_allocator_form() {
        assert_eq!("default".parse(), Ok(AllocatorPolicy::Default));
        assert_eq!("numa".parse(), Ok(AllocatorPolicy::Numa));
        assert_eq!(
            "numa-namespace=4".parse(),
            Ok(AllocatorPolicy::NumaNamespace { buckets: 4 })
        );
        assert_eq!(
            "numa-namespace-exclusive=2".parse(),
            Ok(AllocatorPolicy::NumaNamespaceExclusive { buckets: 2 })
        );
    }

    #[test]
    fn rejects_bad_allocator_strings() {
        assert!(AllocatorPolicy::from_str("static").is_err());
        assert!(AllocatorPolicy::from_str("numa-namespace=").is_err());
        assert!(AllocatorPolicy::from_str("numa-namespace=0").is_err());
        assert!(AllocatorPolicy::from_str("numa-namespace-exclusive=x").is_err());
    }

    #[test]
    fn full_command_line_parses() {
        let config = Config::try_parse_from([
            "cpuplaned",
            "--port",
            "31001",
            "--allocator",
            "numa-namespace-exclusive=3",
            "--memory-pinning",
            "--runtime",
            "kind",
            "--cgroup-driver",
            "cgroupfs",
            "--cgroup-path",
            "/tmp/cgroup",
            "--topology-path",
            "/tmp/node",
            "--state-path",
            "/tmp/state.json",
        ])
        .unwrap();
        assert_eq!(config.port, 31001);
        assert_eq!(
            config.allocator,
            AllocatorPolicy::NumaNamespaceExclusive { buckets: 3 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn memory_pinning_requires_numa_awareness() {
        let config = Config::try_parse_from(["cpuplaned", "--memory-pinning"]).unwrap();
        assert!(matches!(
            config.validate(),
            Err(DaemonError::Configuration(_))
        ));

        let config =
            Config::try_parse_from(["cpuplaned", "--memory-pinning", "--allocator", "numa"])
                .unwrap();
        assert!(config.validate().is_ok());
    }
}
