//! Machine CPU topology as a tree.
//!
//! The tree root is the machine; inner levels are only those of
//! node/package/die/core that actually discriminate CPUs on this host, and
//! leaves are CPUs. Every node tracks how many of its leaf descendants are
//! free, so "give me n CPUs that are topologically close" is a search for the
//! deepest subtree with enough availability.

mod discover;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("not enough cpus available")]
    NotEnoughCpus,
    #[error("cpu {0} not found in topology")]
    CpuNotFound(usize),
    #[error("cannot read topology information: {0}")]
    Load(String),
}

/// Level of a topology tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyLevel {
    Machine,
    Node,
    Package,
    Die,
    Core,
    Cpu,
}

impl fmt::Display for TopologyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopologyLevel::Machine => "machine",
            TopologyLevel::Node => "node",
            TopologyLevel::Package => "package",
            TopologyLevel::Die => "die",
            TopologyLevel::Core => "core",
            TopologyLevel::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Per-CPU descriptor read from sysfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub cpu: usize,
    pub node: usize,
    pub package: usize,
    pub die: usize,
    pub core: usize,
}

impl CpuInfo {
    fn value_at(&self, level: TopologyLevel) -> usize {
        match level {
            TopologyLevel::Machine => 0,
            TopologyLevel::Node => self.node,
            TopologyLevel::Package => self.package,
            TopologyLevel::Die => self.die,
            TopologyLevel::Core => self.core,
            TopologyLevel::Cpu => self.cpu,
        }
    }
}

/// One node of the topology tree. For a leaf, `num_available` is 0 or 1; for
/// an inner node it is always the sum over its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub level: TopologyLevel,
    pub value: usize,
    pub num_available: usize,
    pub children: Vec<TopologyNode>,
}

impl TopologyNode {
    fn new(level: TopologyLevel, value: usize) -> Self {
        Self { level, value, num_available: 0, children: Vec::new() }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn available(&self) -> bool {
        self.num_available > 0
    }

    fn append(&mut self, path: &[(TopologyLevel, usize)]) {
        let Some(&(level, value)) = path.first() else {
            // Reached the leaf position for this CPU.
            self.num_available = 1;
            return;
        };
        self.num_available += 1;
        let index = match self.children.iter().position(|c| c.value == value) {
            Some(index) => index,
            None => {
                self.children.push(TopologyNode::new(level, value));
                self.children.len() - 1
            }
        };
        self.children[index].append(&path[1..]);
    }

    /// Deepest subtree with at least `n` free leaves. Returns the child-index
    /// path from `self` and the subtree depth; ties resolve to the first
    /// child in order.
    fn deepest_with_availability(&self, n: usize, depth: usize) -> Option<(Vec<usize>, usize)> {
        if self.num_available < n {
            return None;
        }
        let mut best: Option<(Vec<usize>, usize)> = None;
        for (index, child) in self.children.iter().enumerate() {
            if let Some((child_path, child_depth)) = child.deepest_with_availability(n, depth + 1)
            {
                if best.as_ref().map_or(true, |(_, d)| child_depth > *d) {
                    let mut path = Vec::with_capacity(child_path.len() + 1);
                    path.push(index);
                    path.extend(child_path);
                    best = Some((path, child_depth));
                }
            }
        }
        best.or(Some((Vec::new(), depth)))
    }

    /// Takes `n` free leaves depth-first in child order. The caller must have
    /// checked `n <= self.num_available`.
    fn take_leaves(&mut self, n: usize) -> Vec<usize> {
        if self.is_leaf() {
            self.num_available = 0;
            return vec![self.value];
        }
        let mut taken = Vec::with_capacity(n);
        for child in &mut self.children {
            if child.num_available == 0 {
                continue;
            }
            let want = (n - taken.len()).min(child.num_available);
            taken.extend(child.take_leaves(want));
            if taken.len() == n {
                break;
            }
        }
        self.num_available -= n;
        taken
    }

    /// Child-index path from `self` down to the leaf for `cpu`.
    fn find_leaf_path(&self, cpu: usize) -> Option<Vec<usize>> {
        if self.is_leaf() {
            return (self.value == cpu).then(Vec::new);
        }
        for (index, child) in self.children.iter().enumerate() {
            if let Some(mut path) = child.find_leaf_path(cpu) {
                path.insert(0, index);
                return Some(path);
            }
        }
        None
    }

    fn node_at(&self, path: &[usize]) -> &TopologyNode {
        let mut node = self;
        for &index in path {
            node = &node.children[index];
        }
        node
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        writeln!(
            f,
            "{}{} {} ({})",
            "   ".repeat(indent),
            self.level,
            self.value,
            self.num_available
        )?;
        for child in &self.children {
            child.render(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for TopologyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

/// Topology tree plus a flat per-CPU lookup (used for NUMA memory pinning).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaTopology {
    pub root: TopologyNode,
    pub cpu_info: BTreeMap<usize, CpuInfo>,
}

impl NumaTopology {
    /// Builds the tree from already-known CPU descriptors. Levels at which
    /// every CPU shares one value are elided; the CPU level always remains.
    pub fn from_cpu_info(cpus: &[CpuInfo]) -> Self {
        let inner_levels = [
            TopologyLevel::Node,
            TopologyLevel::Package,
            TopologyLevel::Die,
            TopologyLevel::Core,
        ];
        let mut levels: Vec<TopologyLevel> = inner_levels
            .into_iter()
            .filter(|&level| {
                cpus.first().map_or(false, |first| {
                    cpus[1..]
                        .iter()
                        .any(|cpu| cpu.value_at(level) != first.value_at(level))
                })
            })
            .collect();
        levels.push(TopologyLevel::Cpu);

        let mut root = TopologyNode::new(TopologyLevel::Machine, 0);
        for cpu in cpus {
            let path: Vec<(TopologyLevel, usize)> = levels
                .iter()
                .map(|&level| (level, cpu.value_at(level)))
                .collect();
            root.append(&path);
        }

        let cpu_info = cpus.iter().map(|info| (info.cpu, *info)).collect();
        Self { root, cpu_info }
    }

    /// Discovers the topology under the sysfs node directory
    /// (`/sys/devices/system/node` on a real host).
    pub async fn load(topology_path: &Path) -> Result<Self, TopologyError> {
        let cpus = discover::discover(topology_path).await?;
        Ok(Self::from_cpu_info(&cpus))
    }

    /// Number of free CPUs in the whole machine.
    pub fn num_available(&self) -> usize {
        self.root.num_available
    }

    /// Leaves in tree order.
    pub fn leaves(&self) -> Vec<&TopologyNode> {
        let mut leaves = Vec::new();
        let mut queue: VecDeque<&TopologyNode> = VecDeque::new();
        queue.push_back(&self.root);
        while let Some(node) = queue.pop_front() {
            if node.is_leaf() {
                leaves.push(node);
            } else {
                queue.extend(node.children.iter());
            }
        }
        leaves
    }

    /// Leaf for `cpu`, when present.
    pub fn find_cpu(&self, cpu: usize) -> Option<&TopologyNode> {
        let path = self.root.find_leaf_path(cpu)?;
        Some(self.root.node_at(&path))
    }

    /// Whether `cpu` exists and is currently free.
    pub fn is_available(&self, cpu: usize) -> bool {
        self.find_cpu(cpu).map_or(false, TopologyNode::available)
    }

    /// Takes `n` CPUs minimizing topology distance: the deepest subtree with
    /// enough free leaves is drained depth-first. Fails without side effects
    /// when fewer than `n` CPUs are free machine-wide.
    pub fn take(&mut self, n: usize) -> Result<Vec<usize>, TopologyError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let (path, _) = self
            .root
            .deepest_with_availability(n, 0)
            .ok_or(TopologyError::NotEnoughCpus)?;

        // Availability above the chosen subtree changes too; the subtree
        // itself is updated inside take_leaves.
        let mut node = &mut self.root;
        for &index in &path {
            node.num_available -= n;
            node = &mut node.children[index];
        }
        Ok(node.take_leaves(n))
    }

    /// Takes one specific CPU, updating availability along its path.
    pub fn take_cpu(&mut self, cpu: usize) -> Result<(), TopologyError> {
        let path = self
            .root
            .find_leaf_path(cpu)
            .ok_or(TopologyError::CpuNotFound(cpu))?;
        if self.root.node_at(&path).num_available == 0 {
            return Err(TopologyError::NotEnoughCpus);
        }
        let mut node = &mut self.root;
        node.num_available -= 1;
        for &index in &path {
            node = &mut node.children[index];
            node.num_available -= 1;
        }
        Ok(())
    }

    /// Returns `cpu` to the pool. A no-op when the CPU was never taken.
    pub fn release(&mut self, cpu: usize) -> Result<(), TopologyError> {
        let path = self
            .root
            .find_leaf_path(cpu)
            .ok_or(TopologyError::CpuNotFound(cpu))?;
        if self.root.node_at(&path).num_available > 0 {
            return Ok(());
        }
        let mut node = &mut self.root;
        node.num_available += 1;
        for &index in &path {
            node = &mut node.children[index];
            node.num_available += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 2 nodes x 2 cores x 2 CPUs; odd CPU ids on node 0, even on node 1.
    pub(crate) fn two_node_topology() -> NumaTopology {
        NumaTopology::from_cpu_info(&[
            CpuInfo { cpu: 1, node: 0, package: 0, die: 0, core: 0 },
            CpuInfo { cpu: 3, node: 0, package: 0, die: 0, core: 0 },
            CpuInfo { cpu: 5, node: 0, package: 0, die: 0, core: 1 },
            CpuInfo { cpu: 7, node: 0, package: 0, die: 0, core: 1 },
            CpuInfo { cpu: 2, node: 1, package: 0, die: 0, core: 0 },
            CpuInfo { cpu: 4, node: 1, package: 0, die: 0, core: 0 },
            CpuInfo { cpu: 6, node: 1, package: 0, die: 0, core: 1 },
            CpuInfo { cpu: 8, node: 1, package: 0, die: 0, core: 1 },
        ])
    }

    pub(crate) fn flat_topology(cpus: usize) -> NumaTopology {
        let infos: Vec<CpuInfo> = (0..cpus)
            .map(|cpu| CpuInfo { cpu, node: 0, package: 0, die: 0, core: cpu / 2 })
            .collect();
        NumaTopology::from_cpu_info(&infos)
    }

    /// num_available of every inner node must equal the sum over children.
    pub(crate) fn availability_is_consistent(node: &TopologyNode) -> bool {
        if node.is_leaf() {
            return node.num_available <= 1;
        }
        let sum: usize = node.children.iter().map(|c| c.num_available).sum();
        node.num_available == sum && node.children.iter().all(availability_is_consistent)
    }

    #[test]
    fn elides_uniform_levels() {
        let topology = two_node_topology();
        // package and die are uniform, so: machine -> node -> core -> cpu
        assert_eq!(topology.root.children[0].level, TopologyLevel::Node);
        assert_eq!(
            topology.root.children[0].children[0].level,
            TopologyLevel::Core
        );
        assert_eq!(
            topology.root.children[0].children[0].children[0].level,
            TopologyLevel::Cpu
        );
        assert_eq!(topology.num_available(), 8);
        assert!(availability_is_consistent(&topology.root));
    }

    #[test]
    fn take_prefers_smallest_enclosing_subtree() {
        let mut topology = two_node_topology();

        // Both CPUs of node 0 core 0 are the tightest fit for 2.
        assert_eq!(topology.take(2).unwrap(), vec![1, 3]);
        assert!(availability_is_consistent(&topology.root));

        // One CPU: any leaf under node 0 core 1 comes first.
        assert_eq!(topology.take(1).unwrap(), vec![5]);

        // Five CPUs only fit under the machine root.
        assert_eq!(topology.take(5).unwrap(), vec![7, 2, 4, 6, 8]);
        assert_eq!(topology.num_available(), 0);
        assert!(availability_is_consistent(&topology.root));
    }

    #[test]
    fn take_of_zero_is_empty_and_free() {
        let mut topology = two_node_topology();
        assert_eq!(topology.take(0).unwrap(), Vec::<usize>::new());
        assert_eq!(topology.num_available(), 8);
    }

    #[test]
    fn exhaustion_leaves_topology_untouched() {
        let mut topology = two_node_topology();
        let all = topology.take(8).unwrap();
        assert_eq!(all.len(), 8);

        let before = topology.clone();
        assert_eq!(topology.take(1), Err(TopologyError::NotEnoughCpus));
        assert_eq!(topology, before);

        let mut fresh = two_node_topology();
        assert_eq!(fresh.take(9), Err(TopologyError::NotEnoughCpus));
        assert_eq!(fresh.num_available(), 8);
        assert!(availability_is_consistent(&fresh.root));
    }

    #[test]
    fn release_restores_availability_once() {
        let mut topology = two_node_topology();
        assert_eq!(topology.take(2).unwrap(), vec![1, 3]);

        topology.release(1).unwrap();
        assert_eq!(topology.num_available(), 7);
        assert!(availability_is_consistent(&topology.root));

        // Releasing an already-free CPU must not inflate availability.
        topology.release(1).unwrap();
        assert_eq!(topology.num_available(), 7);

        assert_eq!(topology.release(42), Err(TopologyError::CpuNotFound(42)));
    }

    #[test]
    fn take_cpu_marks_one_leaf() {
        let mut topology = two_node_topology();
        topology.take_cpu(5).unwrap();
        assert!(!topology.is_available(5));
        assert_eq!(topology.num_available(), 7);
        assert!(availability_is_consistent(&topology.root));

        assert_eq!(topology.take_cpu(5), Err(TopologyError::NotEnoughCpus));
        assert_eq!(topology.take_cpu(42), Err(TopologyError::CpuNotFound(42)));
    }

    #[test]
    fn degenerate_single_node_machine_still_allocates() {
        let mut topology = flat_topology(4);
        // node/package/die uniform: machine -> core -> cpu
        assert_eq!(topology.root.children[0].level, TopologyLevel::Core);
        assert_eq!(topology.take(3).unwrap(), vec![0, 1, 2]);
        assert_eq!(topology.take(1).unwrap(), vec![3]);
    }

    #[test]
    fn leaves_are_in_tree_order() {
        let topology = two_node_topology();
        let ids: Vec<usize> = topology.leaves().iter().map(|l| l.value).collect();
        assert_eq!(ids, vec![1, 3, 5, 7, 2, 4, 6, 8]);
    }

    #[test]
    fn find_cpu_returns_leaves_only() {
        let topology = two_node_topology();
        let leaf = topology.find_cpu(4).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.value, 4);
        assert!(topology.find_cpu(0).is_none());
    }

    #[test]
    fn take_is_deterministic_for_fixed_history() {
        let runs: Vec<Vec<usize>> = (0..3)
            .map(|_| {
                let mut topology = two_node_topology();
                let mut order = topology.take(3).unwrap();
                order.extend(topology.take(2).unwrap());
                order
            })
            .collect();
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[1], runs[2]);
    }

    #[test]
    fn serde_round_trip() {
        let mut topology = two_node_topology();
        topology.take(3).unwrap();
        let encoded = serde_json::to_string(&topology).unwrap();
        let decoded: NumaTopology = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, topology);
    }
}
