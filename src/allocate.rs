/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-node core allocator (`allocate_sc`): the innermost loop of the whole
//! crate. Given one node's slice of the global core-availability bitmap and
//! the partition's current core usage there, decides how many CPUs the node
//! can contribute and which exact cores to bind.
//!
//! Whole-socket exclusivity, per-core, and per-CPU allocation all run
//! through [`allocate_sc`] — the policy only changes the `whole_socket_only`
//! flag and how the caller interprets the returned CPU count, matching the
//! "polymorphism by policy flag" note carried into SPEC_FULL.md's design
//! section.

use crate::bitmap::Bitmap;
use crate::job::{is_no_val, NO_VAL};
use crate::node::NodeRecord;

/// Parameters for one [`allocate_sc`] call. Grouped into a struct because
/// the job-shape inputs outnumber what reads well as positional arguments.
pub struct AllocateRequest<'a> {
    pub node: &'a NodeRecord,
    pub core_range: std::ops::Range<usize>,
    pub whole_socket_only: bool,
    pub min_cores_per_socket: u32,
    pub min_sockets_per_node: u32,
    /// `NO_VAL` = use the node's full hardware thread count. Distinct from
    /// `tasks_per_core_cap` below: this caps which hardware threads are
    /// usable at all (e.g. `--threads-per-core=1` disables SMT for the
    /// job), while `tasks_per_core_cap` caps how many tasks may land on a
    /// usable thread set (spec §3's "threads-per-core cap" vs
    /// "tasks-per-core").
    pub threads_per_core_cap: u32,
    /// `NO_VAL` = no cap beyond hardware thread count.
    pub tasks_per_core_cap: u32,
    /// `NO_VAL` = unset.
    pub tasks_per_socket: u32,
    /// `NO_VAL` = unset.
    pub ntasks_per_node: u32,
    pub shared: bool,
    pub cpus_per_task: u32,
    pub pn_min_cpus: u32,
    pub overcommit: bool,
    /// Partition's `max_cpus_per_node`, if finite.
    pub max_cpus_per_node: Option<u32>,
}

/// Clears every core of `node` (within `core_range`) from `avail_cores`.
/// Spec §4.1 failure semantics: "a zero return clears all cores of the node
/// from the availability map."
fn clear_node(avail_cores: &mut Bitmap, core_range: &std::ops::Range<usize>) {
    avail_cores.clear_range(core_range.start, core_range.end);
}

fn socket_range(core_range: &std::ops::Range<usize>, cores_per_socket: usize, socket: usize) -> std::ops::Range<usize> {
    let start = core_range.start + socket * cores_per_socket;
    let end = (start + cores_per_socket).min(core_range.end);
    start..end
}

fn clear_socket(avail_cores: &mut Bitmap, core_range: &std::ops::Range<usize>, cores_per_socket: usize, socket: usize) {
    let r = socket_range(core_range, cores_per_socket, socket);
    avail_cores.clear_range(r.start, r.end);
}

/// Runs spec §4.1 for one node. `avail_cores` is both input (which cores are
/// currently free) and output (trimmed down to exactly the selected cores
/// on success, or fully cleared for this node on failure). `part_usage`
/// marks cores currently occupied by the job's own partition on this node —
/// used only to compute `used_cpu_count` (step 3), never mutated.
///
/// Returns the number of CPUs this node can contribute; `0` means the node
/// is infeasible under these constraints.
pub fn allocate_sc(req: &AllocateRequest, avail_cores: &mut Bitmap, part_usage: &Bitmap) -> u32 {
    let sockets = req.node.sockets as usize;
    let cores_per_socket = req.node.cores_per_socket as usize;
    let threads = if is_no_val(req.threads_per_core_cap) {
        req.node.threads_per_core
    } else {
        req.node.threads_per_core.min(req.threads_per_core_cap.max(1))
    };
    let core_range = req.core_range.clone();

    let mut free_cores = vec![0u32; sockets];
    let mut used_cores = vec![0u32; sockets];
    let mut used_cpu_array = vec![false; sockets];

    // Step 1: tally free/used cores and partition usage per socket.
    for (local, c) in core_range.clone().enumerate() {
        let i = local / cores_per_socket;
        if i >= sockets {
            break;
        }
        if avail_cores.test(c) {
            free_cores[i] += 1;
        } else {
            used_cores[i] += 1;
        }
        if part_usage.test(c) {
            used_cpu_array[i] = true;
        }
    }

    // Step 2: whole-socket exclusivity drops any socket already touched.
    if req.whole_socket_only {
        for i in 0..sockets {
            if used_cores[i] > 0 && free_cores[i] > 0 {
                clear_socket(avail_cores, &core_range, cores_per_socket, i);
                free_cores[i] = 0;
            }
        }
    }

    // Step 3: free_cpu_count, and used_cpu_count by overwrite (spec §9 open
    // question: the last socket scanned with partition usage wins, not a
    // running sum across sockets).
    let free_cpu_count: u32 = free_cores.iter().map(|&f| f * threads).sum();
    let mut used_cpu_count = 0u32;
    for i in 0..sockets {
        if used_cpu_array[i] {
            used_cpu_count = used_cores[i] * threads;
        }
    }

    // Step 4: trim to the partition's max_cpus_per_node, lowest-index cores
    // released first.
    let mut free_cpu_count = free_cpu_count;
    if let Some(cap) = req.max_cpus_per_node {
        if free_cpu_count + used_cpu_count > cap {
            let mut excess = free_cpu_count + used_cpu_count - cap;
            'release: for (local, c) in core_range.clone().enumerate() {
                if excess == 0 {
                    break;
                }
                let i = local / cores_per_socket;
                if i >= sockets {
                    break 'release;
                }
                if avail_cores.test(c) && free_cores[i] > 0 {
                    avail_cores.clear(c);
                    free_cores[i] -= 1;
                    free_cpu_count = free_cpu_count.saturating_sub(threads);
                    excess = excess.saturating_sub(threads);
                }
            }
        }
    }

    // Step 5: sockets below min_cores_per_socket become unusable.
    for i in 0..sockets {
        if free_cores[i] < req.min_cores_per_socket && free_cores[i] > 0 {
            clear_socket(avail_cores, &core_range, cores_per_socket, i);
            free_cores[i] = 0;
        }
    }
    let viable_sockets = free_cores.iter().filter(|&&f| f > 0).count() as u32;
    if viable_sockets < req.min_sockets_per_node {
        clear_node(avail_cores, &core_range);
        return 0;
    }

    // Step 6.
    let free_core_count: u32 = free_cores.iter().sum();
    if free_core_count == 0 {
        clear_node(avail_cores, &core_range);
        return 0;
    }

    // Step 7.
    let t_prime = if is_no_val(req.tasks_per_core_cap) {
        threads
    } else {
        threads.min(req.tasks_per_core_cap)
    };
    let avail_cpus_base: u32 = free_cores.iter().map(|&f| f * t_prime).sum();
    let mut tasks = if !is_no_val(req.tasks_per_socket) {
        free_cores.iter().map(|&f| (f * t_prime).min(req.tasks_per_socket)).sum()
    } else {
        avail_cpus_base
    };
    let mut avail_cpus = avail_cpus_base;

    // Step 8.
    if !is_no_val(req.ntasks_per_node) && req.shared {
        tasks = tasks.min(req.ntasks_per_node);
    }

    // Step 9.
    if req.cpus_per_task >= 2 {
        tasks = tasks.min(avail_cpus / req.cpus_per_task);
        if !is_no_val(req.ntasks_per_node) {
            avail_cpus = tasks * req.cpus_per_task;
        }
    }

    // Step 10.
    if (!is_no_val(req.ntasks_per_node) && req.ntasks_per_node > tasks && !req.overcommit)
        || (req.pn_min_cpus > avail_cpus)
    {
        clear_node(avail_cores, &core_range);
        return 0;
    }

    // Step 11: per-socket cap during the core-selection walk.
    let cps = if !is_no_val(req.tasks_per_socket) {
        if req.cpus_per_task > 1 {
            req.tasks_per_socket * req.cpus_per_task
        } else {
            req.tasks_per_socket
        }
    } else {
        tasks
    };

    let mut per_socket_selected = vec![0u32; sockets];
    let mut cpu_count = 0u32;
    let mut remaining = avail_cpus;

    for (local, c) in core_range.clone().enumerate() {
        let i = local / cores_per_socket;
        if i >= sockets {
            break;
        }
        if !avail_cores.test(c) {
            continue;
        }
        if remaining == 0 {
            avail_cores.clear(c);
            continue;
        }
        if per_socket_selected[i] >= cps {
            avail_cores.clear(c);
            continue;
        }
        per_socket_selected[i] += 1;
        cpu_count += t_prime;
        remaining = remaining.saturating_sub(t_prime);
    }

    cpu_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRecord;

    fn req(node: &NodeRecord, range: std::ops::Range<usize>) -> AllocateRequest<'_> {
        AllocateRequest {
            node,
            core_range: range,
            whole_socket_only: false,
            min_cores_per_socket: 1,
            min_sockets_per_node: 1,
            threads_per_core_cap: NO_VAL,
            tasks_per_core_cap: NO_VAL,
            tasks_per_socket: NO_VAL,
            ntasks_per_node: NO_VAL,
            shared: false,
            cpus_per_task: 1,
            pn_min_cpus: 0,
            overcommit: false,
            max_cpus_per_node: None,
        }
    }

    /// S2: whole-socket exclusivity, socket 0 has a pre-used core.
    #[test]
    fn whole_socket_exclusivity_selects_only_clean_socket() {
        let node = NodeRecord::new("n1", 2, 4, 1, 8192);
        let mut avail = Bitmap::new(8);
        avail.set_range(0, 8);
        avail.clear(0); // socket 0's first core is in use elsewhere
        let usage = Bitmap::new(8);

        let mut r = req(&node, 0..8);
        r.whole_socket_only = true;
        let cpus = allocate_sc(&r, &mut avail, &usage);

        assert_eq!(cpus, 4);
        assert_eq!(avail.iter_ones().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    /// S3: tasks-per-socket=2, cpus-per-task=2, 2 sockets x 4 cores x 2 threads.
    #[test]
    fn tasks_per_socket_picks_two_cores_per_socket() {
        let node = NodeRecord::new("n1", 2, 4, 2, 16384);
        let mut avail = Bitmap::new(8);
        avail.set_all();
        let usage = Bitmap::new(8);

        let mut r = req(&node, 0..8);
        r.tasks_per_socket = 2;
        r.cpus_per_task = 2;
        let cpus = allocate_sc(&r, &mut avail, &usage);

        assert_eq!(cpus, 8);
        assert_eq!(avail.popcount(), 4);
        // 2 cores per socket
        assert_eq!(avail.iter_ones().filter(|&c| c < 4).count(), 2);
        assert_eq!(avail.iter_ones().filter(|&c| c >= 4).count(), 2);
    }

    /// `threads_per_core_cap` disables SMT for the job (e.g.
    /// `--threads-per-core=1`) even though the node has 2 hardware threads
    /// per core, independent of `tasks_per_core_cap`.
    #[test]
    fn threads_per_core_cap_disables_smt() {
        let node = NodeRecord::new("n1", 1, 4, 2, 8192);
        let mut avail = Bitmap::new(4);
        avail.set_all();
        let usage = Bitmap::new(4);

        let mut r = req(&node, 0..4);
        r.threads_per_core_cap = 1;
        let cpus = allocate_sc(&r, &mut avail, &usage);

        assert_eq!(cpus, 4);
        assert_eq!(avail.popcount(), 4);
    }

    #[test]
    fn basic_fit_uses_all_available_cores() {
        let node = NodeRecord::new("linux04", 1, 4, 1, 8192);
        let mut avail = Bitmap::new(4);
        avail.set_all();
        let usage = Bitmap::new(4);

        let r = req(&node, 0..4);
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 4);
        assert_eq!(avail.popcount(), 4);
    }

    #[test]
    fn min_sockets_per_node_rejects_when_unmet() {
        let node = NodeRecord::new("n1", 2, 4, 1, 8192);
        let mut avail = Bitmap::new(8);
        avail.set_range(0, 2); // only 2 free cores, both on socket 0
        let usage = Bitmap::new(8);

        let mut r = req(&node, 0..8);
        r.min_sockets_per_node = 2;
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 0);
        assert!(avail.is_clear());
    }

    #[test]
    fn min_cores_per_socket_drops_thin_socket() {
        let node = NodeRecord::new("n1", 2, 4, 1, 8192);
        let mut avail = Bitmap::new(8);
        avail.set(0); // socket 0 has only 1 free core
        avail.set_range(4, 8); // socket 1 fully free
        let usage = Bitmap::new(8);

        let mut r = req(&node, 0..8);
        r.min_cores_per_socket = 2;
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 4);
        assert_eq!(avail.iter_ones().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn max_cpus_per_node_trims_lowest_index_first() {
        let node = NodeRecord::new("n1", 1, 4, 1, 8192);
        let mut avail = Bitmap::new(4);
        avail.set_all();
        let usage = Bitmap::new(4);

        let mut r = req(&node, 0..4);
        r.max_cpus_per_node = Some(2);
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 2);
        assert_eq!(avail.iter_ones().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn pn_min_cpus_rejects_insufficient_node() {
        let node = NodeRecord::new("n1", 1, 2, 1, 8192);
        let mut avail = Bitmap::new(2);
        avail.set_all();
        let usage = Bitmap::new(2);

        let mut r = req(&node, 0..2);
        r.pn_min_cpus = 4;
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 0);
        assert!(avail.is_clear());
    }

    #[test]
    fn zero_free_cores_returns_zero() {
        let node = NodeRecord::new("n1", 1, 4, 1, 8192);
        let mut avail = Bitmap::new(4);
        let usage = Bitmap::new(4);

        let r = req(&node, 0..4);
        let cpus = allocate_sc(&r, &mut avail, &usage);
        assert_eq!(cpus, 0);
    }
}
