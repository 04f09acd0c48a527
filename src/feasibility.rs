/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node feasibility wrapper (§4.2) and the node-state filter (§4.3).
//!
//! [`can_job_run_on_node`] wraps [`crate::allocate::allocate_sc`] with GRES
//! and memory checks to produce a single CPU count per node.
//! [`verify_node_state`] runs before any chooser pass and removes nodes that
//! fail exclusivity, sharing, memory, or GRES preconditions outright.

use std::ops::Range;

use crate::allocate::{allocate_sc, AllocateRequest};
use crate::bitmap::Bitmap;
use crate::error::FeasibilityReason;
use crate::gres::{GresFilter, GRES_UNLIMITED};
use crate::job::{is_no_val, JobDescriptor, NodeRequest};
use crate::node::{NodeRecord, NodeState, NodeTable, NodeUsage};
use crate::partition::PartitionTable;

/// Runs spec §4.2 for one node: GRES core filter, then [`allocate_sc`], then
/// memory trimming, then the GRES CPU-count bound. Returns the final CPU
/// count (`0` = infeasible). `avail_cores` is trimmed in place exactly as
/// [`allocate_sc`] does.
#[allow(clippy::too_many_arguments)]
pub fn can_job_run_on_node(
    node: &NodeRecord,
    core_range: Range<usize>,
    avail_cores: &mut Bitmap,
    part_usage: &Bitmap,
    job: &JobDescriptor,
    gres: &dyn GresFilter,
    usage: &NodeUsage,
    max_cpus_per_node: Option<u32>,
    test_only: bool,
) -> u32 {
    if usage.state == NodeState::Completing && !test_only {
        avail_cores.clear_range(core_range.start, core_range.end);
        return 0;
    }

    gres.core_filter(&job.job_gres, &usage.running_gres, avail_cores, core_range.clone(), &node.name);

    let alloc_req = AllocateRequest {
        node,
        core_range: core_range.clone(),
        whole_socket_only: job.resource_type.whole_socket_only(),
        min_cores_per_socket: job.min_cores_per_socket,
        min_sockets_per_node: job.min_sockets_per_node,
        threads_per_core_cap: job.threads_per_core_cap,
        tasks_per_core_cap: job.ntasks_per_core,
        tasks_per_socket: job.ntasks_per_socket,
        ntasks_per_node: job.ntasks_per_node,
        shared: job.shared,
        cpus_per_task: job.cpus_per_task,
        pn_min_cpus: job.pn_min_cpus,
        overcommit: job.overcommit,
        max_cpus_per_node,
    };

    let mut cpus = allocate_sc(&alloc_req, avail_cores, part_usage);
    if cpus == 0 {
        return 0;
    }

    let alloc_size = job.cpu_alloc_size.max(1);

    if job.memory_accounting {
        let avail_mem = usage.free_memory_mb(node);
        if job.mem_per_cpu {
            while cpus > 0 && job.req_mem_mb.saturating_mul(cpus as u64) > avail_mem {
                cpus = cpus.saturating_sub(alloc_size);
            }
            let below_ntasks = !is_no_val(job.ntasks_per_node) && cpus < job.ntasks_per_node;
            let below_cpus_per_task = cpus < job.cpus_per_task;
            if below_ntasks || below_cpus_per_task {
                avail_cores.clear_range(core_range.start, core_range.end);
                return 0;
            }
        } else if job.req_mem_mb > avail_mem {
            avail_cores.clear_range(core_range.start, core_range.end);
            return 0;
        }
    }

    let gres_cores = gres.job_test(&job.job_gres, &usage.running_gres, Some(avail_cores), core_range.clone(), &node.name);
    if gres_cores != GRES_UNLIMITED {
        let gres_cpus = gres_cores.saturating_mul(node.threads_per_core);
        while cpus > gres_cpus {
            if cpus < alloc_size {
                cpus = 0;
                break;
            }
            cpus = cpus.saturating_sub(alloc_size);
        }
    }

    if cpus == 0 {
        avail_cores.clear_range(core_range.start, core_range.end);
    }

    cpus
}

fn partition_touches_range(partitions: &PartitionTable, range: &Range<usize>, sharing_only: bool) -> bool {
    partitions.iter().any(|p| {
        if sharing_only && !p.flags.shared {
            return false;
        }
        p.rows.iter().any(|row| range.clone().any(|c| row.test(c)))
    })
}

/// Runs spec §4.3 over every set bit of `candidates`, returning the survivor
/// set. Errs with [`FeasibilityReason`] attached via the caller if a
/// required node is dropped — required-node failures are never
/// recoverable, so this returns `Err` naming the node and reason rather
/// than silently clearing it, leaving the required-node-is-fatal decision
/// to the caller (the driver, which knows the job's required-node bitmap).
pub fn verify_node_state(
    candidates: &Bitmap,
    node_table: &NodeTable,
    usages: &[NodeUsage],
    partitions: &PartitionTable,
    job: &JobDescriptor,
    gres: &dyn GresFilter,
) -> (Bitmap, Vec<FeasibilityReason>) {
    let mut survivors = candidates.copy();
    let mut reasons = Vec::new();

    for n in candidates.iter_ones() {
        let node = match node_table.get(n) {
            Some(node) => node,
            None => continue,
        };
        let usage = match usages.get(n) {
            Some(usage) => usage,
            None => continue,
        };
        let core_range = node_table.core_range(n);

        let reason = evaluate_node_state(node, usage, &core_range, partitions, job, gres);
        if let Some(reason) = reason {
            survivors.clear(n);
            reasons.push(reason);
        }
    }

    (survivors, reasons)
}

fn evaluate_node_state(
    node: &NodeRecord,
    usage: &NodeUsage,
    core_range: &Range<usize>,
    partitions: &PartitionTable,
    job: &JobDescriptor,
    gres: &dyn GresFilter,
) -> Option<FeasibilityReason> {
    if job.memory_accounting {
        // "scaled by expected CPUs per node when per-CPU memory" — the best
        // per-node estimate available before core selection runs is the
        // job's own per-node floor.
        let expected_cpus = if job.mem_per_cpu {
            job.pn_min_cpus.max(job.cpus_per_task).max(1) as u64
        } else {
            1
        };
        let needed = if job.mem_per_cpu {
            job.req_mem_mb.saturating_mul(expected_cpus)
        } else {
            job.req_mem_mb
        };
        let avail_mem = usage.free_memory_mb(node);
        if avail_mem < needed {
            return Some(FeasibilityReason::InsufficientMemory {
                node: node.name.clone(),
                available: avail_mem,
                needed,
            });
        }
    }

    let gres_cores = gres.job_test(&job.job_gres, &usage.running_gres, None, core_range.clone(), &node.name);
    if gres_cores == 0 {
        return Some(FeasibilityReason::GresUnavailable {
            node: node.name.clone(),
            job_gres: job.job_gres.clone(),
        });
    }

    match usage.state {
        NodeState::Reserved => Some(FeasibilityReason::NodeStateBlocked {
            node: node.name.clone(),
            state: usage.state,
        }),
        NodeState::OneRow => {
            if matches!(job.node_request, NodeRequest::Reserved | NodeRequest::Available) {
                Some(FeasibilityReason::ExclusivityConflict { node: node.name.clone() })
            } else if partition_touches_range(partitions, core_range, true) {
                Some(FeasibilityReason::ExclusivityConflict { node: node.name.clone() })
            } else {
                None
            }
        }
        NodeState::Available => {
            if job.node_request == NodeRequest::Reserved && partition_touches_range(partitions, core_range, false) {
                Some(FeasibilityReason::ExclusivityConflict { node: node.name.clone() })
            } else if job.node_request == NodeRequest::OneRow && partition_touches_range(partitions, core_range, true) {
                Some(FeasibilityReason::ExclusivityConflict { node: node.name.clone() })
            } else {
                None
            }
        }
        NodeState::Completing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gres::NullGres;
    use crate::job::{JobDescriptor, NO_VAL};
    use crate::node::NodeRecord;
    use crate::partition::{PartitionEntry, PartitionFlags};

    fn node(name: &str) -> NodeRecord {
        NodeRecord::new(name, 1, 4, 1, 8192)
    }

    #[test]
    fn can_job_run_on_node_basic_success() {
        let n = node("n1");
        let mut avail = Bitmap::new(4);
        avail.set_all();
        let usage_bmp = Bitmap::new(4);
        let job = JobDescriptor::default();
        let gres = NullGres;
        let usage = NodeUsage::default();

        let cpus = can_job_run_on_node(&n, 0..4, &mut avail, &usage_bmp, &job, &gres, &usage, None, false);
        assert_eq!(cpus, 4);
    }

    #[test]
    fn can_job_run_on_node_completing_blocks_unless_test_only() {
        let n = node("n1");
        let mut avail = Bitmap::new(4);
        avail.set_all();
        let usage_bmp = Bitmap::new(4);
        let job = JobDescriptor::default();
        let gres = NullGres;
        let usage = NodeUsage {
            state: NodeState::Completing,
            ..Default::default()
        };

        let cpus = can_job_run_on_node(&n, 0..4, &mut avail, &usage_bmp, &job, &gres, &usage, None, false);
        assert_eq!(cpus, 0);

        let mut avail2 = Bitmap::new(4);
        avail2.set_all();
        let cpus_test = can_job_run_on_node(&n, 0..4, &mut avail2, &usage_bmp, &job, &gres, &usage, None, true);
        assert_eq!(cpus_test, 4);
    }

    /// S4: memory-per-CPU cap trims CPU count.
    #[test]
    fn memory_per_cpu_trims_cpu_count() {
        let n = NodeRecord::new("n1", 1, 8, 1, 3000);
        let mut avail = Bitmap::new(8);
        avail.set_all();
        let usage_bmp = Bitmap::new(8);
        let job = JobDescriptor {
            memory_accounting: true,
            mem_per_cpu: true,
            req_mem_mb: 1000,
            ntasks_per_node: NO_VAL,
            ..Default::default()
        };
        let gres = NullGres;
        let usage = NodeUsage::default();

        let cpus = can_job_run_on_node(&n, 0..8, &mut avail, &usage_bmp, &job, &gres, &usage, None, false);
        assert_eq!(cpus, 3);
    }

    #[test]
    fn verify_node_state_drops_reserved_node() {
        let mut nodes = NodeTable::new();
        nodes.push(node("n1"));
        let mut candidates = Bitmap::new(1);
        candidates.set(0);
        let usages = vec![NodeUsage {
            state: NodeState::Reserved,
            ..Default::default()
        }];
        let partitions = PartitionTable::new();
        let job = JobDescriptor::default();
        let gres = NullGres;

        let (survivors, reasons) = verify_node_state(&candidates, &nodes, &usages, &partitions, &job, &gres);
        assert!(survivors.is_clear());
        assert_eq!(reasons.len(), 1);
    }

    #[test]
    fn verify_node_state_drops_on_gres_unavailable() {
        let mut nodes = NodeTable::new();
        nodes.push(node("n1"));
        let mut candidates = Bitmap::new(1);
        candidates.set(0);
        let usages = vec![NodeUsage::default()];
        let partitions = PartitionTable::new();
        let job = JobDescriptor {
            job_gres: "gpu:1".to_string(),
            ..Default::default()
        };

        struct ZeroGres;
        impl GresFilter for ZeroGres {
            fn core_filter(&self, _: &str, _: &str, _: &mut Bitmap, _: Range<usize>, _: &str) {}
            fn job_test(&self, _: &str, _: &str, _: Option<&Bitmap>, _: Range<usize>, _: &str) -> u32 {
                0
            }
        }

        let (survivors, reasons) = verify_node_state(&candidates, &nodes, &usages, &partitions, &job, &ZeroGres);
        assert!(survivors.is_clear());
        assert!(matches!(reasons[0], FeasibilityReason::GresUnavailable { .. }));
    }

    #[test]
    fn verify_node_state_keeps_available_node_untouched_by_sharing() {
        let mut nodes = NodeTable::new();
        nodes.push(node("n1"));
        let mut candidates = Bitmap::new(1);
        candidates.set(0);
        let usages = vec![NodeUsage::default()];
        let mut partitions = PartitionTable::new();
        partitions.push(PartitionEntry::new("p1", 1, PartitionFlags::default(), 4, 1));
        let job = JobDescriptor::default();
        let gres = NullGres;

        let (survivors, reasons) = verify_node_state(&candidates, &nodes, &usages, &partitions, &job, &gres);
        assert_eq!(survivors.popcount(), 1);
        assert!(reasons.is_empty());
    }
}
