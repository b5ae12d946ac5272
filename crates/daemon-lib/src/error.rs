//! Error kinds surfaced by the allocation core.
//!
//! Every fallible core operation returns a [`DaemonError`]; the kind decides
//! both the gRPC status code and whether the failure was the caller's fault
//! (spec, overflow) or the node's (cgroup, persistence).

use thiserror::Error;

/// Tagged error returned by daemon operations and their sub-components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    /// The pool, topology or namespace bucket has too few free CPUs.
    #[error("cpus not available: {0}")]
    CpusNotAvailable(String),

    /// Update or delete referenced a pod the daemon has never admitted.
    #[error("pod not found: {0}")]
    PodNotFound(String),

    /// A request failed validation. State is never mutated in this case.
    #[error("pod spec error: {0}")]
    PodSpec(String),

    /// Free of a container with no recorded allocation.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The effective cpuset could not be read at startup.
    #[error("missing cgroup: {0}")]
    MissingCgroup(String),

    /// Runtime/driver mismatch with a container id, or an option combination
    /// rejected at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A per-pod CPU or memory sum left its representable range.
    #[error("counting overflow: {0}")]
    CountingOverflow(String),

    /// Persistence or cgroup write failure, or an aggregation of best-effort
    /// update failures.
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
