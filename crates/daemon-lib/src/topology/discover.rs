//! Sysfs topology discovery.
//!
//! Walks `node<N>/cpu<C>/topology/{package_id,die_id,core_id}` under the
//! kernel's node directory. Individual id files may be absent on stripped
//! down or virtualized hosts; those fields read as 0.

use super::{CpuInfo, TopologyError};
use std::path::Path;
use tokio::fs;

const NODE_PREFIX: &str = "node";
const CPU_PREFIX: &str = "cpu";
const TOPOLOGY_DIR: &str = "topology";
const PACKAGE_FILE: &str = "package_id";
const DIE_FILE: &str = "die_id";
const CORE_FILE: &str = "core_id";

pub(super) async fn discover(topology_path: &Path) -> Result<Vec<CpuInfo>, TopologyError> {
    let nodes = numbered_entries(topology_path, NODE_PREFIX)
        .await
        .map_err(|e| TopologyError::Load(format!("cannot list numa nodes: {e}")))?;

    let mut cpus = Vec::new();
    for node in nodes {
        let node_dir = topology_path.join(format!("{NODE_PREFIX}{node}"));
        let cpu_ids = numbered_entries(&node_dir, CPU_PREFIX).await.map_err(|e| {
            TopologyError::Load(format!("cannot list cpus of node {node}: {e}"))
        })?;
        for cpu in cpu_ids {
            let base = node_dir.join(format!("{CPU_PREFIX}{cpu}")).join(TOPOLOGY_DIR);
            cpus.push(CpuInfo {
                cpu,
                node,
                package: read_id_or_default(&base, PACKAGE_FILE).await,
                die: read_id_or_default(&base, DIE_FILE).await,
                core: read_id_or_default(&base, CORE_FILE).await,
            });
        }
    }
    Ok(cpus)
}

/// Directory entries named `<prefix><number>`, sorted by number.
async fn numbered_entries(path: &Path, prefix: &str) -> std::io::Result<Vec<usize>> {
    let mut entries = fs::read_dir(path).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(id) = parse_prefixed_number(&name.to_string_lossy(), prefix) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn parse_prefixed_number(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.parse().ok()
}

async fn read_id_or_default(base: &Path, file: &str) -> usize {
    match fs::read_to_string(base.join(file)).await {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_cpu(root: &Path, node: usize, cpu: usize, package: i64, die: i64, core: i64) {
        let topo = root
            .join(format!("node{node}"))
            .join(format!("cpu{cpu}"))
            .join("topology");
        fs::create_dir_all(&topo).await.unwrap();
        fs::write(topo.join("package_id"), format!("{package}\n"))
            .await
            .unwrap();
        fs::write(topo.join("die_id"), format!("{die}\n")).await.unwrap();
        fs::write(topo.join("core_id"), format!("{core}\n")).await.unwrap();
    }

    #[tokio::test]
    async fn discovers_nodes_and_cpus_sorted() {
        let dir = TempDir::new().unwrap();
        write_cpu(dir.path(), 1, 4, 0, 0, 2).await;
        write_cpu(dir.path(), 0, 3, 0, 0, 1).await;
        write_cpu(dir.path(), 0, 1, 0, 0, 0).await;
        // Entries that do not match the node<N> shape are skipped.
        fs::create_dir_all(dir.path().join("power")).await.unwrap();

        let cpus = discover(dir.path()).await.unwrap();
        let ids: Vec<(usize, usize, usize)> =
            cpus.iter().map(|c| (c.node, c.cpu, c.core)).collect();
        assert_eq!(ids, vec![(0, 1, 0), (0, 3, 1), (1, 4, 2)]);
    }

    #[tokio::test]
    async fn missing_id_files_default_to_zero() {
        let dir = TempDir::new().unwrap();
        let topo = dir.path().join("node0").join("cpu0").join("topology");
        fs::create_dir_all(&topo).await.unwrap();
        fs::write(topo.join("core_id"), "7\n").await.unwrap();

        let cpus = discover(dir.path()).await.unwrap();
        assert_eq!(cpus.len(), 1);
        assert_eq!(cpus[0].package, 0);
        assert_eq!(cpus[0].die, 0);
        assert_eq!(cpus[0].core, 7);
    }

    #[tokio::test]
    async fn unreadable_root_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-dir");
        assert!(matches!(
            discover(&missing).await,
            Err(TopologyError::Load(_))
        ));
    }
}
