//! Command-line container specs.

use cpuplane_lib::proto::{ContainerInfo, ResourceInfo};
use cpuplane_lib::quantity::MemoryQuantity;
use std::str::FromStr;

/// One `--container` argument:
/// `id,name,cpu_request,cpu_limit[,mem_request,mem_limit]`.
/// Memory values are bytes; omitted memory means 0 on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub id: String,
    pub name: String,
    pub cpu_request: i32,
    pub cpu_limit: i32,
    pub memory_request: i64,
    pub memory_limit: i64,
}

impl FromStr for ContainerSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != 4 && fields.len() != 6 {
            return Err(format!(
                "expected id,name,cpu_request,cpu_limit[,mem_request,mem_limit], got {s:?}"
            ));
        }
        if fields[0].is_empty() || fields[1].is_empty() {
            return Err("container id and name cannot be empty".to_string());
        }

        let parse_int = |raw: &str, what: &str| -> Result<i64, String> {
            raw.parse::<i64>()
                .map_err(|_| format!("{what} must be a number, got {raw:?}"))
        };

        let cpu_request = parse_int(fields[2], "cpu_request")? as i32;
        let cpu_limit = parse_int(fields[3], "cpu_limit")? as i32;
        let (memory_request, memory_limit) = if fields.len() == 6 {
            (
                parse_int(fields[4], "mem_request")?,
                parse_int(fields[5], "mem_limit")?,
            )
        } else {
            (0, 0)
        };

        Ok(Self {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            cpu_request,
            cpu_limit,
            memory_request,
            memory_limit,
        })
    }
}

impl ContainerSpec {
    pub fn to_container_info(&self) -> ContainerInfo {
        ContainerInfo {
            container_id: self.id.clone(),
            container_name: self.name.clone(),
            resources: Some(ResourceInfo {
                requested_cpus: self.cpu_request,
                limit_cpus: self.cpu_limit,
                requested_memory: MemoryQuantity::new(self.memory_request).to_bytes(),
                limit_memory: MemoryQuantity::new(self.memory_limit).to_bytes(),
                cpu_affinity: 0,
            }),
        }
    }
}
