/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Job descriptor, selection result, and the small policy-flag enums spec
//! §6 EXTERNAL INTERFACES names (`CR_CORE|CR_SOCKET|CR_CPU`, node-request
//! values, run modes, the `NO_VAL` sentinel).
//!
//! Mirrors the teacher crate's choice to type `SchedPolicy`/`CpuAffinity`
//! as exhaustive enums instead of passing raw integers around — here the
//! C core's bitmask `#define`s become [`ResourceType`] / [`NodeRequest`] /
//! [`SelectMode`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;

/// Sentinel meaning "unset" or "unlimited" for 16-/32-bit capacity fields,
/// matching the C core's `NO_VAL`.
pub const NO_VAL: u32 = u32::MAX;

pub fn is_no_val(v: u32) -> bool {
    v == NO_VAL
}

/// How CPUs are counted and bound: whole sockets, individual cores,
/// individual CPUs (hyperthreads), or — spec §4.8 step 4's "memory-only
/// resource type" — none at all. `Socket` makes whole-socket exclusivity
/// apply in [`crate::allocate::allocate_sc`]; `Core` and `Cpu` share the
/// same allocation code path (spec §4.1) and differ only in how the caller
/// interprets the resulting `cpu_count`. `MemoryOnly` means the job
/// consumes no consumable CPU/core/socket resource at all (`CR_MEMORY` set
/// with none of `CR_CORE|CR_SOCKET|CR_CPU`) — the driver's pass 0 treats a
/// feasible probe as sufficient and returns without running the
/// partition-row passes, since there is no core contention to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Core,
    Socket,
    Cpu,
    MemoryOnly,
}

impl ResourceType {
    pub fn whole_socket_only(self) -> bool {
        matches!(self, ResourceType::Socket)
    }

    pub fn is_memory_only(self) -> bool {
        matches!(self, ResourceType::MemoryOnly)
    }
}

/// Node-sharing precondition a job demands, consumed by
/// [`crate::feasibility::verify_node_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeRequest {
    #[default]
    Available,
    OneRow,
    Reserved,
}

/// Selection run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectMode {
    /// Compute feasibility only; never treated as a commitment.
    TestOnly,
    /// Compute the placement a future run would get, without committing.
    WillRun,
    /// Commit the placement now.
    RunNow,
}

/// Per-required-node CPU layout override: node index → CPU count to bind
/// there specifically, bypassing the usual capacity computation for that
/// node.
pub type RequiredNodeLayout = BTreeMap<usize, u32>;

/// A candidate job's requested shape. See spec §3 DATA MODEL.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub min_cpus: u32,
    /// `NO_VAL` = unlimited.
    pub max_cpus: u32,
    pub pn_min_cpus: u32,
    pub min_nodes: u32,
    /// `NO_VAL` = unlimited.
    pub max_nodes: u32,

    /// `NO_VAL` = unset.
    pub ntasks_per_node: u32,
    /// `NO_VAL` = unset.
    pub ntasks_per_socket: u32,
    /// `NO_VAL` = unset (no per-core cap beyond hardware threads).
    pub ntasks_per_core: u32,
    pub cpus_per_task: u32,

    pub min_cores_per_socket: u32,
    pub min_sockets_per_node: u32,
    /// `NO_VAL` = use hardware thread count unmodified.
    pub threads_per_core_cap: u32,

    pub overcommit: bool,
    pub whole_node: bool,
    pub shared: bool,
    pub contiguous: bool,

    pub core_spec: u32,

    pub required_nodes: Option<Bitmap>,
    pub required_node_layout: Option<RequiredNodeLayout>,

    pub req_switch: u32,
    pub wait4switch_ms: u64,

    pub partition: String,
    pub node_request: NodeRequest,
    pub resource_type: ResourceType,

    /// `CR_MEMORY` — whether memory feasibility is checked at all.
    pub memory_accounting: bool,
    /// `true` = `req_mem_mb` is per-CPU; `false` = per-node (whole job).
    pub mem_per_cpu: bool,
    pub req_mem_mb: u64,

    pub job_gres: String,
    /// Granularity (in CPUs) memory trimming backs off by; spec §4.2.
    pub cpu_alloc_size: u32,
}

impl Default for JobDescriptor {
    fn default() -> Self {
        Self {
            min_cpus: 1,
            max_cpus: NO_VAL,
            pn_min_cpus: 0,
            min_nodes: 1,
            max_nodes: NO_VAL,
            ntasks_per_node: NO_VAL,
            ntasks_per_socket: NO_VAL,
            ntasks_per_core: NO_VAL,
            cpus_per_task: 1,
            min_cores_per_socket: 1,
            min_sockets_per_node: 1,
            threads_per_core_cap: NO_VAL,
            overcommit: false,
            whole_node: false,
            shared: false,
            contiguous: false,
            core_spec: 0,
            required_nodes: None,
            required_node_layout: None,
            req_switch: 0,
            wait4switch_ms: 0,
            partition: String::new(),
            node_request: NodeRequest::default(),
            resource_type: ResourceType::Core,
            memory_accounting: false,
            mem_per_cpu: false,
            req_mem_mb: 0,
            job_gres: String::new(),
            cpu_alloc_size: 1,
        }
    }
}

impl JobDescriptor {
    /// spec §4.8 step 2: "overcommit-style job" — one task per node,
    /// counted in CPU units.
    pub fn overcommit_style(&self) -> bool {
        self.min_cpus == self.min_nodes
    }

    pub fn effective_max_cpus(&self) -> Option<u32> {
        if is_no_val(self.max_cpus) {
            None
        } else {
            Some(self.max_cpus)
        }
    }

    pub fn effective_max_nodes(&self) -> Option<u32> {
        if is_no_val(self.max_nodes) {
            None
        } else {
            Some(self.max_nodes)
        }
    }
}

/// Per-run mutable state the driver owns across passes/retries for a single
/// job: the switch-count SLA clock and the `best_switch` verdict. Spec §4.8
/// says the driver "updates `job_ptr.total_cpus`, `job_ptr.best_switch`,
/// `job_ptr.wait4switch_start`" — this crate keeps those as an explicit
/// caller-supplied struct rather than mutating `JobDescriptor` in place, so
/// the descriptor itself stays `Clone`-cheap and reusable across calls.
///
/// `now_ms` is supplied by the caller (not read from the wall clock inside
/// this crate) so that selection stays a pure function of its inputs —
/// required by the determinism invariant in spec §8.10.
#[derive(Debug, Clone, Default)]
pub struct JobRuntimeState {
    pub wait4switch_start_ms: Option<u64>,
    pub best_switch: bool,
    pub total_cpus: u32,
}

/// Output of a successful selection: which nodes, how many CPUs each, and
/// which exact cores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub node_bitmap: Bitmap,
    /// CPU count per node index; only entries for set bits in `node_bitmap`
    /// are meaningful.
    pub cpu_count: BTreeMap<usize, u32>,
    pub core_bitmap: Bitmap,
}

impl SelectionResult {
    pub fn total_cpus(&self) -> u32 {
        self.cpu_count.values().sum()
    }

    /// spec §4.8 step 9: allocated memory per selected node, per-CPU or
    /// per-node depending on `job.mem_per_cpu`. Returns `node index -> MB`.
    pub fn allocated_memory(&self, job: &JobDescriptor) -> BTreeMap<usize, u64> {
        let mut out = BTreeMap::new();
        if !job.memory_accounting {
            return out;
        }
        for (&node_idx, &cpus) in &self.cpu_count {
            let mb = if job.mem_per_cpu {
                job.req_mem_mb.saturating_mul(cpus as u64)
            } else {
                job.req_mem_mb
            };
            out.insert(node_idx, mb);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_val_predicate() {
        assert!(is_no_val(NO_VAL));
        assert!(!is_no_val(4));
    }

    #[test]
    fn overcommit_style_detection() {
        let mut job = JobDescriptor {
            min_cpus: 3,
            min_nodes: 3,
            ..Default::default()
        };
        assert!(job.overcommit_style());
        job.min_cpus = 6;
        assert!(!job.overcommit_style());
    }

    #[test]
    fn effective_max_cpus_none_when_no_val() {
        let job = JobDescriptor::default();
        assert_eq!(job.effective_max_cpus(), None);
        let job2 = JobDescriptor { max_cpus: 16, ..Default::default() };
        assert_eq!(job2.effective_max_cpus(), Some(16));
    }

    #[test]
    fn allocated_memory_per_cpu() {
        let job = JobDescriptor {
            memory_accounting: true,
            mem_per_cpu: true,
            req_mem_mb: 1000,
            ..Default::default()
        };
        let mut cpu_count = BTreeMap::new();
        cpu_count.insert(0usize, 4u32);
        let result = SelectionResult {
            node_bitmap: Bitmap::new(1),
            cpu_count,
            core_bitmap: Bitmap::new(1),
        };
        assert_eq!(result.allocated_memory(&job).get(&0), Some(&4000));
    }

    #[test]
    fn allocated_memory_per_node() {
        let job = JobDescriptor {
            memory_accounting: true,
            mem_per_cpu: false,
            req_mem_mb: 2048,
            ..Default::default()
        };
        let mut cpu_count = BTreeMap::new();
        cpu_count.insert(0usize, 4u32);
        cpu_count.insert(1usize, 2u32);
        let result = SelectionResult {
            node_bitmap: Bitmap::new(2),
            cpu_count,
            core_bitmap: Bitmap::new(1),
        };
        let mem = result.allocated_memory(&job);
        assert_eq!(mem.get(&0), Some(&2048));
        assert_eq!(mem.get(&1), Some(&2048));
    }

    #[test]
    fn allocated_memory_empty_when_not_tracked() {
        let job = JobDescriptor::default();
        let mut cpu_count = BTreeMap::new();
        cpu_count.insert(0usize, 4u32);
        let result = SelectionResult {
            node_bitmap: Bitmap::new(1),
            cpu_count,
            core_bitmap: Bitmap::new(1),
        };
        assert!(result.allocated_memory(&job).is_empty());
    }

    #[test]
    fn total_cpus_sums_only_cpu_count_map() {
        let mut cpu_count = BTreeMap::new();
        cpu_count.insert(0usize, 2u32);
        cpu_count.insert(2usize, 4u32);
        let result = SelectionResult {
            node_bitmap: Bitmap::new(3),
            cpu_count,
            core_bitmap: Bitmap::new(1),
        };
        assert_eq!(result.total_cpus(), 6);
    }
}
