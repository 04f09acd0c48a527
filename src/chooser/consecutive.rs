/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Consecutive-block best-fit chooser (§4.4): groups the candidate map into
//! runs of consecutive node indices, scores the runs, and greedily
//! allocates from the best-scoring run until demand is met.

use std::collections::BTreeMap;

use super::{enough_nodes, ChooserInput, ChooserOutput};
use crate::bitmap::Bitmap;

struct Run {
    start: usize,
    end: usize,
    /// CPUs contributable by non-required nodes in this run.
    cpus: u32,
    /// Count of non-required nodes in this run.
    node_count: u32,
    /// Index of the first required node in this run, if any.
    required_idx: Option<usize>,
}

/// Spec §4.4. Returns `None` if demand cannot be satisfied or a contiguity
/// requirement is violated.
pub fn choose(input: &ChooserInput) -> Option<ChooserOutput> {
    let n = input.candidates.len();
    let required = input
        .required_nodes
        .cloned()
        .unwrap_or_else(|| Bitmap::new(n));

    // Required nodes must all be candidates.
    for r in required.iter_ones() {
        if !input.candidates.test(r) {
            return None;
        }
    }

    let mut result = Bitmap::new(n);
    let mut cpu_count: BTreeMap<usize, u32> = BTreeMap::new();
    let mut rem_cpus: i64 = input.min_cpus as i64;
    let mut rem_nodes: i64 = input.min_nodes as i64;
    let mut total_cpus: u32 = 0;
    let required_count = required.popcount() as u32;

    for r in required.iter_ones() {
        let cap = input.capacities[r];
        if let Some(cap_limit) = input.max_cpus {
            if total_cpus.saturating_add(cap) > cap_limit {
                return None;
            }
        }
        result.set(r);
        cpu_count.insert(r, cap);
        total_cpus += cap;
        rem_cpus -= cap as i64;
        rem_nodes -= 1;
    }

    let mut working = input.candidates.copy();

    loop {
        let runs = build_runs_with_capacity(&working, &required, input.capacities);
        if runs.is_empty() {
            break;
        }

        let rem_cpus_u = rem_cpus.max(0) as u32;
        let rem_nodes_u = rem_nodes.max(0) as u32;

        let best = pick_best_run(&runs, rem_cpus_u, rem_nodes_u, input.min_nodes, required_count);
        let Some(best_idx) = best else { break };
        let run = &runs[best_idx];

        if input.contiguous && required_count > 0 && run.required_idx.is_none() {
            // A required node exists elsewhere, outside this run's block.
            return None;
        }

        let order: Vec<usize> = if let Some(req_idx) = run.required_idx {
            let mut v: Vec<usize> = (req_idx..run.end).collect();
            v.extend((run.start..req_idx).rev());
            v
        } else if rem_nodes_u <= 1 {
            // Single best-fit node: smallest sufficient capacity, else skip.
            let mut candidates: Vec<usize> = (run.start..run.end)
                .filter(|&i| working.test(i) && !required.test(i))
                .collect();
            candidates.sort_by_key(|&i| input.capacities[i]);
            candidates
        } else {
            (run.start..run.end).collect()
        };

        let mut progressed = false;
        for idx in order {
            if !working.test(idx) || required.test(idx) {
                continue;
            }
            if rem_cpus <= 0 && rem_nodes <= 0 {
                break;
            }
            let cap = input.capacities[idx];
            if let Some(cap_limit) = input.max_cpus {
                if total_cpus.saturating_add(cap) > cap_limit {
                    continue;
                }
            }
            result.set(idx);
            cpu_count.insert(idx, cap);
            total_cpus += cap;
            rem_cpus -= cap as i64;
            rem_nodes -= 1;
            progressed = true;
        }

        working.clear_range(run.start, run.end);

        if rem_cpus <= 0 && enough_nodes(result.popcount() as u32, rem_nodes.max(0) as u32, input.min_nodes, required_count) {
            break;
        }
        if !progressed {
            continue;
        }
    }

    if rem_cpus <= 0 && enough_nodes(result.popcount() as u32, 0, input.min_nodes, required_count) && result.popcount() as u32 <= input.max_nodes {
        Some(ChooserOutput { node_bitmap: result, cpu_count })
    } else {
        None
    }
}

fn build_runs_with_capacity(working: &Bitmap, required: &Bitmap, capacities: &[u32]) -> Vec<Run> {
    let n = working.len();
    let mut runs = Vec::new();
    let mut i = 0;
    while i < n {
        if !working.test(i) {
            i += 1;
            continue;
        }
        let start = i;
        let mut cpus = 0u32;
        let mut node_count = 0u32;
        let mut required_idx = None;
        let mut j = i;
        while j < n && working.test(j) {
            if required.test(j) {
                if required_idx.is_none() {
                    required_idx = Some(j);
                }
            } else {
                cpus += capacities[j];
                node_count += 1;
            }
            j += 1;
        }
        runs.push(Run { start, end: j, cpus, node_count, required_idx });
        i = j;
    }
    runs
}

/// Spec §4.4 step 3's tie-break order. Ties resolve to the last scanned run
/// (spec §9 open question: the source picks the last scanned; preserved
/// here for parity rather than normalized to first-scanned).
fn pick_best_run(runs: &[Run], rem_cpus: u32, rem_nodes: u32, min_nodes: u32, required_count: u32) -> Option<usize> {
    let mut best: Option<usize> = None;

    for (i, run) in runs.iter().enumerate() {
        if best.is_none() {
            best = Some(i);
            continue;
        }
        let b = &runs[best.unwrap()];

        let run_has_req = run.required_idx.is_some();
        let best_has_req = b.required_idx.is_some();
        if run_has_req != best_has_req {
            if run_has_req {
                best = Some(i);
            }
            continue;
        }

        let run_sufficient = run.cpus >= rem_cpus && enough_nodes(run.node_count, rem_nodes, min_nodes, required_count);
        let best_sufficient = b.cpus >= rem_cpus && enough_nodes(b.node_count, rem_nodes, min_nodes, required_count);

        if run_sufficient != best_sufficient {
            if run_sufficient {
                best = Some(i);
            }
            continue;
        }

        if run_sufficient {
            // tightest fit wins; ties go to the later run (last scanned).
            if run.cpus <= b.cpus {
                best = Some(i);
            }
        } else {
            // among insufficient runs, largest wins; ties go to later run.
            if run.cpus >= b.cpus {
                best = Some(i);
            }
        }
    }

    best
}
