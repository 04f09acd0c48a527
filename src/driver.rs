/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Priority-layered placement driver (§4.8-§4.9): the top-level entry
//! point. Orchestrates the node-state filter, core-spec carve-out, and up
//! to five passes against progressively relaxed "free cores" baselines,
//! each delegating node selection to [`crate::chooser`] wrapped in
//! [`crate::chooser::knapsack::with_knapsack_mitigation`].

use tracing::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::chooser::{consecutive, knapsack::with_knapsack_mitigation, lln, topology, ChooserInput, ChooserPolicy};
use crate::error::{FeasibilityReason, SelectError};
use crate::feasibility::{can_job_run_on_node, verify_node_state};
use crate::gres::GresFilter;
use crate::job::{JobDescriptor, JobRuntimeState, SelectMode, SelectionResult};
use crate::node::{NodeTable, NodeUsage};
use crate::partition::PartitionTable;
use crate::topology::SwitchTable;

/// Everything [`select_job`] needs for one call. Scratch bitmaps (the
/// various `avail_cores`/`free_cores`/`part_core_map` views spec §4.8
/// names) are allocated on the stack inside the function body and dropped
/// on every exit path — Rust's ordinary scoping gives this "guaranteed
/// release" for free, without a manual resource-container type.
pub struct DriverInput<'a> {
    pub job: &'a JobDescriptor,
    pub candidates: Bitmap,
    pub mode: SelectMode,
    pub node_table: &'a NodeTable,
    pub node_usage: &'a [NodeUsage],
    pub partitions: &'a PartitionTable,
    pub switches: Option<&'a SwitchTable>,
    /// Caller-owned; never net-mutated (spec §5). `None` if the caller has
    /// no exclusions.
    pub excluded_cores: Option<&'a Bitmap>,
    pub gres: &'a dyn GresFilter,
    /// The controller's view of cluster size, checked against
    /// `node_table.len()`.
    pub cluster_node_count: usize,
    pub now_ms: u64,
    pub runtime: &'a mut JobRuntimeState,
}

struct AttemptOutcome {
    node_bitmap: Bitmap,
    cpu_count: std::collections::BTreeMap<usize, u32>,
    cores: Bitmap,
    best_switch: Option<bool>,
    leaf_switch_count: Option<u32>,
}

fn choose_policy(job: &JobDescriptor, partitions: &PartitionTable, switches: Option<&SwitchTable>) -> ChooserPolicy {
    let own_lln = partitions.find(&job.partition).map(|p| p.flags.lln).unwrap_or(false);
    if own_lln {
        ChooserPolicy::LeastLoadedNode
    } else if switches.is_some_and(|s| !s.is_empty()) {
        ChooserPolicy::Topology
    } else {
        ChooserPolicy::Consecutive
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_pass_capacities(
    node_table: &NodeTable,
    candidates: &Bitmap,
    free_baseline: &Bitmap,
    part_usage: &Bitmap,
    job: &JobDescriptor,
    gres: &dyn GresFilter,
    usages: &[NodeUsage],
    max_cpus_per_node: Option<u32>,
    test_only: bool,
) -> (Vec<u32>, Bitmap) {
    let mut cores = free_baseline.copy();
    let mut capacities = vec![0u32; node_table.len()];
    for n in candidates.iter_ones() {
        let Some(node) = node_table.get(n) else { continue };
        let Some(usage) = usages.get(n) else { continue };
        let core_range = node_table.core_range(n);
        let cap = can_job_run_on_node(node, core_range, &mut cores, part_usage, job, gres, usage, max_cpus_per_node, test_only);
        capacities[n] = cap;
    }
    (capacities, cores)
}

#[allow(clippy::too_many_arguments)]
fn attempt(
    node_table: &NodeTable,
    candidates: &Bitmap,
    free_baseline: &Bitmap,
    part_usage: &Bitmap,
    job: &JobDescriptor,
    gres: &dyn GresFilter,
    usages: &[NodeUsage],
    partitions: &PartitionTable,
    switches: Option<&SwitchTable>,
    policy: ChooserPolicy,
    min_nodes: u32,
    max_nodes: u32,
    min_cpus: u32,
    elapsed_ms: u64,
    test_only: bool,
) -> Option<AttemptOutcome> {
    let max_cpus_per_node = partitions.find(&job.partition).and_then(|p| p.max_cpus_per_node);
    let (capacities, cores) = compute_pass_capacities(
        node_table,
        candidates,
        free_baseline,
        part_usage,
        job,
        gres,
        usages,
        max_cpus_per_node,
        test_only,
    );

    let chooser_input = ChooserInput {
        candidates,
        capacities: &capacities,
        required_nodes: job.required_nodes.as_ref(),
        min_nodes,
        max_nodes,
        min_cpus,
        max_cpus: job.effective_max_cpus(),
        contiguous: job.contiguous,
    };

    match policy {
        ChooserPolicy::Consecutive => {
            let out = with_knapsack_mitigation(&chooser_input, job.whole_node, job.effective_max_cpus(), |i| consecutive::choose(i))?;
            Some(AttemptOutcome {
                node_bitmap: out.node_bitmap,
                cpu_count: out.cpu_count,
                cores,
                best_switch: None,
                leaf_switch_count: None,
            })
        }
        ChooserPolicy::LeastLoadedNode => {
            let out = with_knapsack_mitigation(&chooser_input, job.whole_node, job.effective_max_cpus(), |i| lln::choose(i))?;
            Some(AttemptOutcome {
                node_bitmap: out.node_bitmap,
                cpu_count: out.cpu_count,
                cores,
                best_switch: None,
                leaf_switch_count: None,
            })
        }
        ChooserPolicy::Topology => {
            let switches = switches?;
            let topo_ctx = topology::TopologyChooserInput {
                switches,
                req_switch: job.req_switch,
                wait4switch_ms: job.wait4switch_ms,
                elapsed_ms,
            };
            let out = with_knapsack_mitigation(&chooser_input, job.whole_node, job.effective_max_cpus(), |i| {
                topology::choose(i, &topo_ctx)
            })?;
            Some(AttemptOutcome {
                node_bitmap: out.output.node_bitmap,
                cpu_count: out.output.cpu_count,
                cores,
                best_switch: Some(out.best_switch),
                leaf_switch_count: Some(out.leaf_switch_count),
            })
        }
    }
}

/// Carves `job.core_spec` cores out of each selected node's range, round
/// robin from the highest socket and highest core index downward. Nodes
/// whose total core count does not exceed `core_spec` are dropped entirely
/// (cleared from both `candidates` and `avail_cores`).
fn apply_core_spec(node_table: &NodeTable, candidates: &mut Bitmap, avail_cores: &mut Bitmap, core_spec: u32) {
    if core_spec == 0 {
        return;
    }
    let nodes: Vec<usize> = candidates.iter_ones().collect();
    for n in nodes {
        let Some(node) = node_table.get(n) else { continue };
        let core_range = node_table.core_range(n);
        let sockets = node.sockets as usize;
        let cores_per_socket = node.cores_per_socket as usize;
        let total_cores = sockets * cores_per_socket;

        if total_cores <= core_spec as usize {
            candidates.clear(n);
            avail_cores.clear_range(core_range.start, core_range.end);
            continue;
        }

        let mut next_free_in_socket = vec![cores_per_socket as i64 - 1; sockets];
        let mut removed = 0u32;
        let mut socket = sockets;
        while removed < core_spec {
            socket = if socket == 0 { sockets - 1 } else { socket - 1 };
            let idx = next_free_in_socket[socket];
            if idx < 0 {
                continue;
            }
            let global = core_range.start + socket * cores_per_socket + idx as usize;
            avail_cores.clear(global);
            next_free_in_socket[socket] -= 1;
            removed += 1;
        }
    }
}

/// Top-level entry point: spec §4.8.
pub fn select_job(input: DriverInput) -> Result<SelectionResult, SelectError> {
    let DriverInput {
        job,
        mut candidates,
        mode,
        node_table,
        node_usage,
        partitions,
        switches,
        excluded_cores,
        gres,
        cluster_node_count,
        now_ms,
        runtime,
    } = input;

    if node_table.len() != cluster_node_count {
        return Err(SelectError::NodeCountMismatch {
            selected: 0,
            min: job.min_nodes,
            max: job.effective_max_nodes().unwrap_or(node_table.len() as u32),
        });
    }

    let test_only = mode == SelectMode::TestOnly;
    let total_cores = node_table.total_cores();

    let excluded: Option<Bitmap> = excluded_cores.and_then(|b| {
        if b.len() == total_cores {
            Some(b.copy())
        } else {
            warn!(expected = total_cores, actual = b.len(), "excluded-core bitmap size mismatch, ignoring exclusion");
            None
        }
    });

    if !test_only {
        let (survivors, reasons) = verify_node_state(&candidates, node_table, node_usage, partitions, job, gres);
        if let Some(required) = &job.required_nodes {
            for r in required.iter_ones() {
                if !survivors.test(r) {
                    let reason = reasons
                        .iter()
                        .find(|reason| reason.node() == node_table.get(r).map(|n| n.name.as_str()).unwrap_or(""))
                        .cloned()
                        .unwrap_or(FeasibilityReason::NodeStateBlocked {
                            node: node_table.get(r).map(|n| n.name.clone()).unwrap_or_default(),
                            state: crate::node::NodeState::Reserved,
                        });
                    return Err(SelectError::RequiredNodeUnusable {
                        node: node_table.get(r).map(|n| n.name.clone()).unwrap_or_default(),
                        reason,
                    });
                }
            }
        }
        candidates = survivors;
    }

    let min_cpus = if job.overcommit_style() {
        job.min_cpus.saturating_mul(job.cpus_per_task.max(1))
    } else {
        job.min_cpus
    };
    let min_nodes = job.min_nodes;
    let max_nodes = job.effective_max_nodes().unwrap_or(node_table.len() as u32);

    // Step 3: build avail_cores and carve out core-spec reservations.
    let mut avail_cores = Bitmap::new(total_cores);
    for n in candidates.iter_ones() {
        let range = node_table.core_range(n);
        avail_cores.set_range(range.start, range.end);
    }
    apply_core_spec(node_table, &mut candidates, &mut avail_cores, job.core_spec);

    if let Some(required) = &job.required_nodes {
        for r in required.iter_ones() {
            if !candidates.test(r) {
                return Err(SelectError::RequiredNodeUnusable {
                    node: node_table.get(r).map(|n| n.name.clone()).unwrap_or_default(),
                    reason: FeasibilityReason::InsufficientCores {
                        node: node_table.get(r).map(|n| n.name.clone()).unwrap_or_default(),
                        available: 0,
                        needed: 1,
                    },
                });
            }
        }
    }

    let policy = choose_policy(job, partitions, switches);
    let empty_usage = Bitmap::new(total_cores);

    let elapsed_ms = runtime
        .wait4switch_start_ms
        .map(|start| now_ms.saturating_sub(start))
        .unwrap_or(0);
    if job.req_switch > 0 && runtime.wait4switch_start_ms.is_none() {
        runtime.wait4switch_start_ms = Some(now_ms);
    }

    // Pass 0: probe against raw (partition-blind) availability.
    let probe = attempt(
        node_table,
        &candidates,
        &avail_cores,
        &empty_usage,
        job,
        gres,
        node_usage,
        partitions,
        switches,
        policy,
        min_nodes,
        max_nodes,
        min_cpus,
        elapsed_ms,
        test_only,
    );
    let probe = probe.ok_or_else(|| {
        debug!("pass 0 probe found no feasible placement");
        SelectError::InsufficientResources {
            nodes_considered: candidates.popcount(),
            reasons: Vec::new(),
        }
    })?;
    if let Some(false) = probe.best_switch {
        return Err(SelectError::TopologyBestSwitch { req_switch: job.req_switch });
    }
    if test_only || job.resource_type.is_memory_only() {
        return finalize(node_table, probe, runtime);
    }

    // Pass 1: strictly idle across every partition's rows.
    let mut idle = avail_cores.copy();
    if let Some(excl) = &excluded {
        idle.and_not_with(excl);
    }
    for p in partitions.iter() {
        for row in &p.rows {
            idle.and_not_with(row);
        }
    }
    let part_core_map = partitions.rows_of(&job.partition, total_cores);

    let pass1 = attempt(
        node_table,
        &candidates,
        &idle,
        &part_core_map,
        job,
        gres,
        node_usage,
        partitions,
        switches,
        policy,
        min_nodes,
        max_nodes,
        min_cpus,
        elapsed_ms,
        test_only,
    );

    let own_partition_shares = partitions.find(&job.partition).map(|p| p.flags.shared).unwrap_or(false);
    let job_can_share = job.shared && own_partition_shares;

    if !job_can_share {
        // Spec §4.8 step 5: "If the job forbids CPU sharing (non-gang,
        // one-row), stop here" — on success *or* failure. Falling through
        // into passes 2-4 would place a non-sharing job onto cores another
        // job's partition row is already using.
        return match pass1 {
            Some(outcome) => finalize(node_table, outcome, runtime),
            None => Err(SelectError::InsufficientResources {
                nodes_considered: candidates.popcount(),
                reasons: Vec::new(),
            }),
        };
    }
    let mut carry = pass1;

    // Pass 2: only higher-priority partitions' rows stay excluded. This
    // relaxed view becomes the new baseline for pass 3 and pass 4.
    let own_priority = partitions.find(&job.partition).map(|p| p.priority).unwrap_or(0);
    let mut relaxed_high = Bitmap::new(total_cores);
    for n in candidates.iter_ones() {
        let range = node_table.core_range(n);
        relaxed_high.set_range(range.start, range.end);
    }
    relaxed_high.and_not_with(&partitions.rows_above_priority(own_priority, total_cores));
    if let Some(excl) = &excluded {
        relaxed_high.and_not_with(excl);
    }

    let pass2 = attempt(
        node_table,
        &candidates,
        &relaxed_high,
        &part_core_map,
        job,
        gres,
        node_usage,
        partitions,
        switches,
        policy,
        min_nodes,
        max_nodes,
        min_cpus,
        elapsed_ms,
        test_only,
    );

    if pass2.is_none() && carry.is_none() {
        return Err(SelectError::InsufficientResources {
            nodes_considered: candidates.popcount(),
            reasons: Vec::new(),
        });
    }
    if pass2.is_some() {
        carry = pass2;
    }

    // Pass 3: higher- and equal-priority partitions' rows excluded, own
    // partition's own rows included (pass 4 re-admits one row at a time).
    let mut relaxed_eq = relaxed_high.copy();
    relaxed_eq.and_not_with(&partitions.rows_at_priority(own_priority, &job.partition, total_cores));
    if let Some(own) = partitions.find(&job.partition) {
        relaxed_eq.and_not_with(&own.union_rows(total_cores));
    }

    let pass3 = attempt(
        node_table,
        &candidates,
        &relaxed_eq,
        &part_core_map,
        job,
        gres,
        node_usage,
        partitions,
        switches,
        policy,
        min_nodes,
        max_nodes,
        min_cpus,
        elapsed_ms,
        test_only,
    );
    if pass3.is_some() {
        carry = pass3;
    }

    // Pass 4: fit into the job's own partition rows, densest first.
    if let Some(own) = partitions.find(&job.partition) {
        let row_limit = if job.node_request == crate::job::NodeRequest::OneRow {
            1
        } else {
            own.num_rows()
        };
        let density_order = own.rows_by_density();
        let mut pass4_result = None;

        for &row_idx in density_order.iter().take(row_limit) {
            let mut row_view = relaxed_eq.copy();
            row_view.or_with(&own.rows[row_idx]);
            let out = attempt(
                node_table,
                &candidates,
                &row_view,
                &part_core_map,
                job,
                gres,
                node_usage,
                partitions,
                switches,
                policy,
                min_nodes,
                max_nodes,
                min_cpus,
                elapsed_ms,
                test_only,
            );
            if out.is_some() {
                pass4_result = out;
                break;
            }
        }

        if pass4_result.is_none() {
            if let Some(empty_idx) = own.empty_row() {
                let mut row_view = relaxed_eq.copy();
                row_view.or_with(&own.rows[empty_idx]);
                pass4_result = attempt(
                    node_table,
                    &candidates,
                    &row_view,
                    &part_core_map,
                    job,
                    gres,
                    node_usage,
                    partitions,
                    switches,
                    policy,
                    min_nodes,
                    max_nodes,
                    min_cpus,
                    elapsed_ms,
                    test_only,
                );
            }
        }

        if pass4_result.is_some() {
            carry = pass4_result;
        }
    }

    match carry {
        Some(outcome) => finalize(node_table, outcome, runtime),
        None => Err(SelectError::InsufficientResources {
            nodes_considered: candidates.popcount(),
            reasons: Vec::new(),
        }),
    }
}

/// Spec §4.9: clear the core range of every node not in the final node
/// bitmap, and record the runtime SLA verdict.
fn finalize(node_table: &NodeTable, outcome: AttemptOutcome, runtime: &mut JobRuntimeState) -> Result<SelectionResult, SelectError> {
    let AttemptOutcome {
        node_bitmap,
        cpu_count,
        mut cores,
        best_switch,
        leaf_switch_count,
    } = outcome;

    for (n, _node) in node_table.iter() {
        if !node_bitmap.test(n) {
            let range = node_table.core_range(n);
            cores.clear_range(range.start, range.end);
        }
    }

    runtime.total_cpus = cpu_count.values().sum();
    if let Some(best) = best_switch {
        runtime.best_switch = best;
    }

    info!(
        nodes = node_bitmap.popcount(),
        cpus = runtime.total_cpus,
        leaf_switches = leaf_switch_count.unwrap_or(0),
        "job placement selected"
    );

    Ok(SelectionResult {
        node_bitmap,
        cpu_count,
        core_bitmap: cores,
    })
}
