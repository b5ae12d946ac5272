//! Per-namespace NUMA partitioning allocator.
//!
//! The topology's leaves are split into `num_buckets` contiguous buckets and
//! namespaces are assigned to buckets round-robin. Guaranteed containers pin
//! to individual free CPUs inside their namespace's bucket; non-guaranteed
//! containers share the whole bucket. In exclusive mode the shared pool
//! shrinks whenever a guaranteed container claims a CPU and grows back when
//! it leaves.

use super::numa::memory_pinning_if_enabled;
use crate::cgroup::CgroupController;
use crate::cpuset::{CpuBucket, CpuSet};
use crate::error::{DaemonError, Result};
use crate::models::{Container, QosClass};
use crate::state::DaemonState;
use std::sync::Arc;
use tracing::{info, warn};

pub struct NumaNamespaceAllocator {
    ctrl: Arc<dyn CgroupController>,
    num_buckets: usize,
    exclusive: bool,
    memory_pinning: bool,
}

/// Leaf view used while choosing CPUs inside a bucket.
#[derive(Debug, Clone, Copy)]
struct BucketLeaf {
    cpu: usize,
    available: bool,
}

impl NumaNamespaceAllocator {
    pub fn new(
        num_buckets: usize,
        ctrl: Arc<dyn CgroupController>,
        exclusive: bool,
        memory_pinning: bool,
    ) -> Self {
        Self { ctrl, num_buckets, exclusive, memory_pinning }
    }

    /// Leaves of the namespace's bucket, in topology order. The last bucket
    /// also takes the division remainder.
    fn bucket(&self, s: &DaemonState, namespace: &str) -> Result<Vec<BucketLeaf>> {
        let leaves = s.topology.leaves();
        let bucket_size = leaves.len() / self.num_buckets;

        let index = *s
            .namespaces
            .namespace_to_bucket
            .get(namespace)
            .ok_or_else(|| {
                DaemonError::CpusNotAvailable(format!(
                    "namespace cpu bucket not found for {namespace}"
                ))
            })?;

        let slice = if index == self.num_buckets - 1 {
            &leaves[bucket_size * index..]
        } else {
            &leaves[bucket_size * index..bucket_size * (index + 1)]
        };
        Ok(slice
            .iter()
            .map(|leaf| BucketLeaf { cpu: leaf.value, available: leaf.available() })
            .collect())
    }

    fn admit_namespace(&self, s: &mut DaemonState, namespace: &str) {
        let index = s.namespaces.next_bucket % self.num_buckets;
        s.namespaces
            .namespace_to_bucket
            .insert(namespace.to_string(), index);
        s.namespaces.next_bucket += 1;
        info!(namespace, bucket = index, "created namespace bucket");
    }

    pub(crate) async fn take_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        if c.qos == QosClass::Guaranteed && c.cpus == 0 {
            return Err(DaemonError::NotImplemented(
                "number of guaranteed container cpus shall be greater than 0".to_string(),
            ));
        }

        let namespace = s
            .pods
            .get(&c.pod_id)
            .map(|pod| pod.namespace.clone())
            .ok_or_else(|| {
                DaemonError::PodNotFound(format!("cannot retrieve pod {} metadata", c.pod_id))
            })?;

        if !s.namespaces.namespace_to_bucket.contains_key(&namespace) {
            self.admit_namespace(s, &namespace);
        }

        let bucket = self.bucket(s, &namespace)?;
        let index = s.namespaces.namespace_to_bucket[&namespace];
        *s.namespaces.bucket_to_num_containers.entry(index).or_insert(0) += 1;

        let cpu_ids = if c.qos == QosClass::Guaranteed {
            self.take_guaranteed_from_bucket(s, &bucket, c.cpus)?
        } else {
            // Non-guaranteed containers share the bucket; in exclusive mode
            // they are kept off exclusively held CPUs.
            bucket
                .iter()
                .filter(|leaf| !self.exclusive || leaf.available)
                .map(|leaf| leaf.cpu)
                .collect()
        };

        let allocated: Vec<CpuBucket> =
            cpu_ids.iter().map(|&cpu| CpuBucket::new(cpu, cpu)).collect();
        let cpus = cpu_ids
            .iter()
            .map(|cpu| cpu.to_string())
            .collect::<Vec<_>>()
            .join(",");
        s.allocated.insert(c.cid.clone(), allocated.clone());

        let mems = memory_pinning_if_enabled(self.memory_pinning, &s.topology, &cpu_ids);
        self.ctrl.update_cpuset(&s.cgroup_root, c, &cpus, &mems).await?;

        if self.exclusive && c.qos == QosClass::Guaranteed {
            let taken = CpuSet::from_buckets(&allocated);
            return self.repin_shared_containers(s, &namespace, &taken, Repin::Remove).await;
        }
        Ok(())
    }

    /// First-fit over the bucket's free leaves. The availability pre-check
    /// runs before any leaf is taken, so a shortfall has no side effects on
    /// the topology.
    fn take_guaranteed_from_bucket(
        &self,
        s: &mut DaemonState,
        bucket: &[BucketLeaf],
        wanted: usize,
    ) -> Result<Vec<usize>> {
        let num_available = bucket.iter().filter(|leaf| leaf.available).count();
        if num_available < wanted {
            return Err(DaemonError::CpusNotAvailable(format!(
                "not enough free cpus in namespace bucket: cannot allocate {wanted} cpus, \
                 only {num_available} processors available in bucket"
            )));
        }

        let mut cpu_ids = Vec::with_capacity(wanted);
        for leaf in bucket.iter().filter(|leaf| leaf.available) {
            s.topology
                .take_cpu(leaf.cpu)
                .map_err(|e| DaemonError::CpusNotAvailable(e.to_string()))?;
            cpu_ids.push(leaf.cpu);
            if cpu_ids.len() == wanted {
                break;
            }
        }
        Ok(cpu_ids)
    }

    pub(crate) async fn free_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        let freed = s.allocated.remove(&c.cid).ok_or_else(|| {
            DaemonError::ContainerNotFound(format!(
                "container {} not available for deletion",
                c.cid
            ))
        })?;

        let namespace = s
            .pods
            .get(&c.pod_id)
            .map(|pod| pod.namespace.clone())
            .ok_or_else(|| {
                DaemonError::PodNotFound(format!("cannot retrieve pod {} metadata", c.pod_id))
            })?;

        if let Some(index) = s.namespaces.namespace_to_bucket.get(&namespace).copied() {
            let count = s
                .namespaces
                .bucket_to_num_containers
                .entry(index)
                .or_insert(1);
            *count = count.saturating_sub(1);
            if *count == 0 {
                s.namespaces.bucket_to_num_containers.remove(&index);
                s.namespaces.namespace_to_bucket.remove(&namespace);
                info!(namespace = %namespace, bucket = index, "deleted namespace bucket");
            }
        }

        for bucket in &freed {
            for cpu in bucket.start_cpu..=bucket.end_cpu {
                s.topology
                    .release(cpu)
                    .map_err(|e| DaemonError::CpusNotAvailable(e.to_string()))?;
            }
        }

        if self.exclusive && c.qos == QosClass::Guaranteed {
            let released = CpuSet::from_buckets(&freed);
            return self
                .repin_shared_containers(s, &namespace, &released, Repin::Add)
                .await;
        }
        Ok(())
    }

    pub(crate) async fn clear_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        let cpus: CpuSet = s.topology.leaves().iter().map(|leaf| leaf.value).collect();
        let mems =
            memory_pinning_if_enabled(self.memory_pinning, &s.topology, &cpus.sorted());
        self.ctrl
            .update_cpuset(&s.cgroup_root, c, &cpus.to_cpu_string(), &mems)
            .await
    }

    /// Re-pins every non-guaranteed container of `namespace` after a
    /// guaranteed take (shrink) or free (grow). A mid-sequence write failure
    /// leaves earlier re-pins in place and surfaces the error.
    async fn repin_shared_containers(
        &self,
        s: &mut DaemonState,
        namespace: &str,
        cpus: &CpuSet,
        action: Repin,
    ) -> Result<()> {
        let mut targets = Vec::new();
        for (cid, allocated) in &s.allocated {
            let Some(container) = find_container(s, cid) else {
                warn!(cid = %cid, "cannot find container for reallocation");
                continue;
            };
            let same_namespace = s
                .pods
                .get(&container.pod_id)
                .map_or(false, |pod| pod.namespace == namespace);
            if !same_namespace || container.qos == QosClass::Guaranteed {
                continue;
            }

            let mut new_cpus = CpuSet::from_buckets(allocated);
            match action {
                Repin::Remove => new_cpus.remove_all(cpus),
                Repin::Add => new_cpus.merge(cpus),
            }
            targets.push((container, new_cpus));
        }

        for (container, new_cpus) in targets {
            info!(
                cid = %container.cid,
                reason = action.as_str(),
                cpuset = %new_cpus,
                "reallocating container"
            );
            let mems = memory_pinning_if_enabled(
                self.memory_pinning,
                &s.topology,
                &new_cpus.sorted(),
            );
            self.ctrl
                .update_cpuset(&s.cgroup_root, &container, &new_cpus.to_cpu_string(), &mems)
                .await?;
            s.allocated
                .insert(container.cid.clone(), new_cpus.to_bucket_list());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Repin {
    Remove,
    Add,
}

impl Repin {
    fn as_str(self) -> &'static str {
        match self {
            Repin::Remove => "remove",
            Repin::Add => "add",
        }
    }
}

fn find_container(s: &DaemonState, cid: &str) -> Option<Container> {
    s.pods
        .values()
        .flat_map(|pod| pod.containers.iter())
        .find(|container| container.cid == cid)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{container, pod, state_with_topology, RecordingController};
    use crate::topology::tests::{flat_topology, two_node_topology};

    fn allocator(
        num_buckets: usize,
        exclusive: bool,
    ) -> (NumaNamespaceAllocator, Arc<RecordingController>) {
        let ctrl = Arc::new(RecordingController::new());
        (
            NumaNamespaceAllocator::new(num_buckets, ctrl.clone(), exclusive, false),
            ctrl,
        )
    }

    /// Registers a pod and returns a container of it, mirroring the daemon's
    /// insert-metadata-then-assign order.
    fn admit(
        s: &mut DaemonState,
        pod_id: &str,
        namespace: &str,
        cid: &str,
        qos: QosClass,
        cpus: usize,
    ) -> Container {
        let c = container(cid, pod_id, qos, cpus);
        let mut meta = pod(pod_id, namespace);
        meta.containers.push(c.clone());
        s.pods.insert(pod_id.to_string(), meta);
        c
    }

    #[tokio::test]
    async fn namespaces_round_robin_across_buckets() {
        let (alloc, _ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());

        let c1 = admit(&mut state, "p1", "ns1", "containerd://c1", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c1, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://c1"], vec![CpuBucket::new(1, 1)]);

        let c2 = admit(&mut state, "p2", "ns2", "containerd://c2", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://c2"], vec![CpuBucket::new(2, 2)]);

        // Third namespace wraps around into ns1's bucket.
        let c3 = admit(&mut state, "p3", "ns3", "containerd://c3", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c3, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://c3"], vec![CpuBucket::new(3, 3)]);

        assert_eq!(state.namespaces.namespace_to_bucket["ns1"], 0);
        assert_eq!(state.namespaces.namespace_to_bucket["ns2"], 1);
        assert_eq!(state.namespaces.namespace_to_bucket["ns3"], 0);
        assert_eq!(state.namespaces.next_bucket, 3);
    }

    #[tokio::test]
    async fn guaranteed_cpus_stay_inside_the_namespace_bucket() {
        let (alloc, _ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());
        // Bucket 0 holds the first half of the leaves: 1,3,5,7.
        let c = admit(&mut state, "p1", "ns1", "containerd://c1", QosClass::Guaranteed, 4);
        alloc.take_cpus(&c, &mut state).await.unwrap();
        let cpus: Vec<usize> = state.allocated["containerd://c1"]
            .iter()
            .map(|b| b.start_cpu)
            .collect();
        assert_eq!(cpus, vec![1, 3, 5, 7]);
    }

    #[tokio::test]
    async fn bucket_exhaustion_fails_without_taking_leaves() {
        let (alloc, ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());

        let big = admit(&mut state, "p1", "ns1", "containerd://c1", QosClass::Guaranteed, 5);
        let err = alloc.take_cpus(&big, &mut state).await.unwrap_err();
        assert!(matches!(err, DaemonError::CpusNotAvailable(_)));
        assert!(err.to_string().contains("namespace bucket"));
        assert_eq!(state.topology.num_available(), 8);
        assert!(state.allocated.is_empty());
        assert!(ctrl.writes().is_empty());
    }

    #[tokio::test]
    async fn guaranteed_zero_cpus_is_not_implemented() {
        let (alloc, _ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());
        let c = admit(&mut state, "p1", "ns1", "containerd://c1", QosClass::Guaranteed, 0);
        assert!(matches!(
            alloc.take_cpus(&c, &mut state).await,
            Err(DaemonError::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn shared_containers_get_the_whole_bucket() {
        let (alloc, ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());
        let c = admit(&mut state, "p1", "ns1", "containerd://b1", QosClass::Burstable, 1);
        alloc.take_cpus(&c, &mut state).await.unwrap();

        assert_eq!(ctrl.last_write().unwrap().cpus, "1,3,5,7");
        // Shared pins do not consume topology availability.
        assert_eq!(state.topology.num_available(), 8);
    }

    #[tokio::test]
    async fn exclusive_mode_repins_shared_containers() {
        let (alloc, ctrl) = allocator(2, true);
        let mut state = state_with_topology(flat_topology(4));

        // Burstable container in ns1 spans its whole bucket [0,1].
        let burstable = admit(&mut state, "p1", "ns1", "containerd://b1", QosClass::Burstable, 0);
        alloc.take_cpus(&burstable, &mut state).await.unwrap();
        assert_eq!(
            state.allocated["containerd://b1"],
            vec![CpuBucket::new(0, 0), CpuBucket::new(1, 1)]
        );

        // A guaranteed container claims CPU 0; the burstable one shrinks to 1.
        let guaranteed =
            admit(&mut state, "p2", "ns1", "containerd://g1", QosClass::Guaranteed, 1);
        alloc.take_cpus(&guaranteed, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://g1"], vec![CpuBucket::new(0, 0)]);
        assert_eq!(state.allocated["containerd://b1"], vec![CpuBucket::new(1, 1)]);
        let repin = ctrl.writes().into_iter().last().unwrap();
        assert_eq!(repin.cid, "containerd://b1");
        assert_eq!(repin.cpus, "1");

        // Freeing the guaranteed container grows the shared pool back.
        alloc.free_cpus(&guaranteed, &mut state).await.unwrap();
        assert_eq!(
            state.allocated["containerd://b1"],
            vec![CpuBucket::new(0, 1)]
        );
        let regrow = ctrl.writes().into_iter().last().unwrap();
        assert_eq!(regrow.cpus, "0,1");
    }

    #[tokio::test]
    async fn exclusive_mode_hides_taken_cpus_from_new_shared_containers() {
        let (alloc, ctrl) = allocator(2, true);
        let mut state = state_with_topology(flat_topology(4));

        let guaranteed =
            admit(&mut state, "p1", "ns1", "containerd://g1", QosClass::Guaranteed, 1);
        alloc.take_cpus(&guaranteed, &mut state).await.unwrap();

        let burstable = admit(&mut state, "p2", "ns1", "containerd://b1", QosClass::Burstable, 0);
        alloc.take_cpus(&burstable, &mut state).await.unwrap();
        assert_eq!(ctrl.last_write().unwrap().cpus, "1");
    }

    #[tokio::test]
    async fn exclusive_repin_failure_surfaces_without_rollback() {
        let (alloc, ctrl) = allocator(2, true);
        let mut state = state_with_topology(flat_topology(4));

        let burstable = admit(&mut state, "p1", "ns1", "containerd://b1", QosClass::Burstable, 0);
        alloc.take_cpus(&burstable, &mut state).await.unwrap();

        ctrl.fail_for("containerd://b1");
        let guaranteed =
            admit(&mut state, "p2", "ns1", "containerd://g1", QosClass::Guaranteed, 1);
        let err = alloc.take_cpus(&guaranteed, &mut state).await.unwrap_err();
        assert!(matches!(err, DaemonError::Runtime(_)));

        // The guaranteed take stands even though the re-pin failed.
        assert!(!state.topology.is_available(0));
        assert_eq!(state.allocated["containerd://g1"], vec![CpuBucket::new(0, 0)]);
    }

    #[tokio::test]
    async fn namespace_mapping_is_dropped_with_its_last_container() {
        let (alloc, _ctrl) = allocator(2, false);
        let mut state = state_with_topology(two_node_topology());

        let c1 = admit(&mut state, "p1", "ns1", "containerd://c1", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c1, &mut state).await.unwrap();
        let c2 = admit(&mut state, "p2", "ns1", "containerd://c2", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.namespaces.bucket_to_num_containers[&0], 2);

        alloc.free_cpus(&c1, &mut state).await.unwrap();
        assert!(state.namespaces.namespace_to_bucket.contains_key("ns1"));

        alloc.free_cpus(&c2, &mut state).await.unwrap();
        assert!(!state.namespaces.namespace_to_bucket.contains_key("ns1"));
        assert!(state.namespaces.bucket_to_num_containers.is_empty());
        assert_eq!(state.topology.num_available(), 8);
    }

    #[tokio::test]
    async fn uneven_leaf_counts_give_the_remainder_to_the_last_bucket() {
        let (alloc, ctrl) = allocator(2, false);
        let mut state = state_with_topology(flat_topology(5));

        // floor(5/2) = 2: bucket 0 is [0,1], bucket 1 is [2,3,4].
        let c1 = admit(&mut state, "p1", "ns1", "containerd://b1", QosClass::Burstable, 0);
        alloc.take_cpus(&c1, &mut state).await.unwrap();
        assert_eq!(ctrl.last_write().unwrap().cpus, "0,1");

        let c2 = admit(&mut state, "p2", "ns2", "containerd://b2", QosClass::Burstable, 0);
        alloc.take_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(ctrl.last_write().unwrap().cpus, "2,3,4");
    }
}
