//! Table output for allocation replies.

use colored::Colorize;
use cpuplane_lib::proto::{AllocationState, CpuBucket, PodAllocationReply};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "CONTAINER")]
    container_id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "CPUS")]
    cpus: String,
}

pub fn print_reply(reply: &PodAllocationReply) {
    println!(
        "pod {} {} cpus [{}]",
        reply.pod_id.bold(),
        state_name(reply.state).green(),
        format_buckets(&reply.cpu_buckets)
    );

    if reply.containers_allocations.is_empty() {
        return;
    }
    let rows: Vec<AllocationRow> = reply
        .containers_allocations
        .iter()
        .map(|alloc| AllocationRow {
            container_id: alloc.container_id.clone(),
            state: state_name(alloc.state).to_string(),
            cpus: format_buckets(&alloc.cpu_buckets),
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn state_name(state: i32) -> &'static str {
    AllocationState::from_i32(state)
        .map(|state| state.as_str_name())
        .unwrap_or("UNKNOWN")
}

fn format_buckets(buckets: &[CpuBucket]) -> String {
    buckets
        .iter()
        .map(|bucket| {
            if bucket.start_cpu == bucket.end_cpu {
                bucket.start_cpu.to_string()
            } else {
                format!("{}-{}", bucket.start_cpu, bucket.end_cpu)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_format_as_ranges() {
        let buckets = vec![
            CpuBucket { start_cpu: 0, end_cpu: 9 },
            CpuBucket { start_cpu: 12, end_cpu: 12 },
        ];
        assert_eq!(format_buckets(&buckets), "0-9,12");
        assert_eq!(format_buckets(&[]), "");
    }

    #[test]
    fn unknown_states_do_not_panic() {
        assert_eq!(state_name(99), "UNKNOWN");
        assert_eq!(state_name(0), "CREATED");
    }
}
