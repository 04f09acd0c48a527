/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Network-topology (switch-tree) best-fit chooser (§4.6). Two phases:
//! locate a single switch that can cover the demand, then fill leaves
//! within that switch.

use std::collections::BTreeMap;

use super::{enough_nodes, ChooserInput, ChooserOutput};
use crate::bitmap::Bitmap;
use crate::topology::SwitchTable;

/// Extra inputs §4.6 needs beyond the shared [`ChooserInput`]: the switch
/// tree and the switch-count SLA (`req_switch`/`wait4switch`). `elapsed_ms`
/// is supplied by the caller (the driver), which owns the wall-clock
/// reading — this chooser stays a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct TopologyChooserInput<'a> {
    pub switches: &'a SwitchTable,
    pub req_switch: u32,
    pub wait4switch_ms: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TopologyChooserOutput {
    pub output: ChooserOutput,
    pub leaf_switch_count: u32,
    pub best_switch: bool,
}

struct SwitchScratch {
    table_idx: usize,
    level: u32,
    /// Nodes still to be placed (candidates minus required, minus already
    /// selected).
    nodes: Bitmap,
    node_count: u32,
    required_cpu: u32,
    /// Does the switch's original membership contain every required node?
    covers_required: bool,
}

/// Spec §4.6.
pub fn choose(input: &ChooserInput, topo: &TopologyChooserInput) -> Option<TopologyChooserOutput> {
    let n = input.candidates.len();
    let required = input.required_nodes.cloned().unwrap_or_else(|| Bitmap::new(n));
    let required_count = required.popcount() as u32;

    if topo.switches.is_empty() {
        return None;
    }

    // Phase 1 step 1-2: coverage check.
    if required_count > 0 {
        let mut union = Bitmap::new(n);
        let mut any_single_covers = false;
        for sw in topo.switches.iter() {
            union.or_with(&sw.node_bitmap);
            if sw.node_bitmap.superset_of(&required) {
                any_single_covers = true;
            }
        }
        if !union.superset_of(&required) || !any_single_covers {
            return None;
        }
    }

    let mut result = Bitmap::new(n);
    let mut cpu_count: BTreeMap<usize, u32> = BTreeMap::new();
    let mut rem_cpus: i64 = input.min_cpus as i64;
    let mut rem_nodes: i64 = input.min_nodes as i64;
    let mut total_cpus: u32 = 0;

    let mut scratch: Vec<SwitchScratch> = topo
        .switches
        .iter()
        .enumerate()
        .map(|(idx, sw)| {
            let mut nodes = sw.node_bitmap.copy();
            nodes.and_with(input.candidates);
            SwitchScratch {
                table_idx: idx,
                level: sw.level,
                nodes,
                node_count: 0,
                required_cpu: 0,
                covers_required: sw.node_bitmap.superset_of(&required),
            }
        })
        .collect();

    // Phase 1 step 3: pre-seat required nodes.
    for r in required.iter_ones() {
        if !input.candidates.test(r) {
            return None;
        }
        let cap = input.capacities[r];
        result.set(r);
        cpu_count.insert(r, cap);
        total_cpus += cap;
        rem_cpus -= cap as i64;
        rem_nodes -= 1;
        for s in scratch.iter_mut() {
            if s.nodes.test(r) {
                s.nodes.clear(r);
                s.required_cpu += cap;
            }
        }
    }
    for s in &mut scratch {
        s.node_count = s.nodes.popcount() as u32;
    }

    // Phase 1 step 4-5: choose the covering switch.
    let chosen_idx = pick_best_switch(&scratch, input, rem_cpus.max(0) as u32, rem_nodes.max(0) as u32, required_count, required_count > 0)?;

    let chosen_nodes = scratch[chosen_idx].nodes.copy();
    let chosen_level = scratch[chosen_idx].level;
    let chosen_table_idx = scratch[chosen_idx].table_idx;
    let _ = chosen_table_idx;

    // Phase 2 step 1: restrict to leaves under the chosen switch.
    // If the chosen switch IS a leaf, treat it as its own single leaf.
    let mut leaves: Vec<SwitchScratch> = if chosen_level == 0 {
        vec![SwitchScratch {
            table_idx: chosen_idx,
            level: 0,
            nodes: chosen_nodes.copy(),
            node_count: chosen_nodes.popcount() as u32,
            required_cpu: scratch[chosen_idx].required_cpu,
            covers_required: scratch[chosen_idx].covers_required,
        }]
    } else {
        topo.switches
            .iter()
            .enumerate()
            .filter(|(_, sw)| sw.is_leaf() && sw.node_bitmap.overlaps(&chosen_nodes))
            .map(|(idx, sw)| {
                let mut nodes = sw.node_bitmap.copy();
                nodes.and_with(&chosen_nodes);
                SwitchScratch {
                    table_idx: idx,
                    level: 0,
                    node_count: nodes.popcount() as u32,
                    required_cpu: 0,
                    covers_required: false,
                    nodes,
                }
            })
            .collect()
    };

    let mut leaf_switch_count = 0u32;
    loop {
        if rem_cpus <= 0 && rem_nodes <= 0 {
            break;
        }
        let rem_cpus_u = rem_cpus.max(0) as u32;
        let rem_nodes_u = rem_nodes.max(0) as u32;

        let Some(leaf_idx) = pick_best_switch(&leaves, input, rem_cpus_u, rem_nodes_u, required_count, false) else {
            break;
        };
        if leaves[leaf_idx].node_count == 0 {
            break;
        }
        leaf_switch_count += 1;

        let mut members: Vec<usize> = leaves[leaf_idx].nodes.iter_ones().filter(|&i| !result.test(i)).collect();
        members.sort_by_key(|&i| input.capacities[i]);

        for idx in members {
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
        }

        leaves[leaf_idx].nodes.clear_all();
        leaves[leaf_idx].node_count = 0;
    }

    if !(rem_cpus <= 0 && enough_nodes(result.popcount() as u32, 0, input.min_nodes, required_count)) {
        return None;
    }

    let best_switch = topo.req_switch == 0
        || topo.elapsed_ms >= topo.wait4switch_ms
        || leaf_switch_count <= topo.req_switch;

    Some(TopologyChooserOutput {
        output: ChooserOutput { node_bitmap: result, cpu_count },
        leaf_switch_count,
        best_switch,
    })
}

fn pick_best_switch(
    scratch: &[SwitchScratch],
    input: &ChooserInput,
    rem_cpus: u32,
    rem_nodes: u32,
    required_count: u32,
    must_cover_required: bool,
) -> Option<usize> {
    let mut best: Option<usize> = None;

    for (i, s) in scratch.iter().enumerate() {
        if must_cover_required && !s.covers_required {
            continue;
        }
        if s.node_count == 0 && s.required_cpu == 0 {
            continue;
        }
        let cpus: u32 = s.nodes.iter_ones().map(|n| input.capacities[n]).sum();

        let Some(bi) = best else {
            best = Some(i);
            continue;
        };
        let b = &scratch[bi];
        let b_cpus: u32 = b.nodes.iter_ones().map(|n| input.capacities[n]).sum();

        if s.level != b.level {
            if s.level < b.level {
                best = Some(i);
            }
            continue;
        }

        let s_sufficient = cpus >= rem_cpus && enough_nodes(s.node_count, rem_nodes, input.min_nodes, required_count);
        let b_sufficient = b_cpus >= rem_cpus && enough_nodes(b.node_count, rem_nodes, input.min_nodes, required_count);

        if s_sufficient != b_sufficient {
            if s_sufficient {
                best = Some(i);
            }
            continue;
        }

        if s.covers_required != b.covers_required {
            if s.covers_required {
                best = Some(i);
            }
            continue;
        }

        if s.covers_required && b.covers_required && cpus == b_cpus {
            if s.required_cpu >= b.required_cpu {
                best = Some(i);
            }
            continue;
        }

        if s_sufficient {
            if cpus <= b_cpus {
                best = Some(i);
            }
        } else if cpus >= b_cpus {
            best = Some(i);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Switch;

    fn bmp(n: usize, set: &[usize]) -> Bitmap {
        let mut b = Bitmap::new(n);
        for &i in set {
            b.set(i);
        }
        b
    }

    /// S5: switches {A:{n1,n2}, B:{n3,n4}, root:{A,B}}, required={n3(idx 2)},
    /// request n=2 -> picks switch B, leaf_switch_count=1.
    #[test]
    fn required_node_forces_covering_switch() {
        let n = 4; // n1=0 n2=1 n3=2 n4=3
        let candidates = bmp(n, &[0, 1, 2, 3]);
        let capacities = vec![2, 2, 2, 2];
        let required = bmp(n, &[2]);

        let mut switches = SwitchTable::new();
        switches.push(Switch { name: "A".into(), level: 0, link_speed: 1, node_bitmap: bmp(n, &[0, 1]) });
        switches.push(Switch { name: "B".into(), level: 0, link_speed: 1, node_bitmap: bmp(n, &[2, 3]) });
        switches.push(Switch { name: "root".into(), level: 1, link_speed: 1, node_bitmap: bmp(n, &[0, 1, 2, 3]) });

        let base = ChooserInput {
            candidates: &candidates,
            capacities: &capacities,
            required_nodes: Some(&required),
            min_nodes: 2,
            max_nodes: 2,
            min_cpus: 4,
            max_cpus: None,
            contiguous: false,
        };
        let topo = TopologyChooserInput {
            switches: &switches,
            req_switch: 0,
            wait4switch_ms: 0,
            elapsed_ms: 0,
        };

        let out = choose(&base, &topo).expect("should fit");
        assert!(out.output.node_bitmap.test(2));
        assert!(out.output.node_bitmap.test(3));
        assert_eq!(out.leaf_switch_count, 1);
        assert!(out.best_switch);
    }

    #[test]
    fn empty_switch_table_fails() {
        let n = 2;
        let candidates = bmp(n, &[0, 1]);
        let capacities = vec![2, 2];
        let switches = SwitchTable::new();
        let base = ChooserInput {
            candidates: &candidates,
            capacities: &capacities,
            required_nodes: None,
            min_nodes: 1,
            max_nodes: 2,
            min_cpus: 2,
            max_cpus: None,
            contiguous: false,
        };
        let topo = TopologyChooserInput {
            switches: &switches,
            req_switch: 0,
            wait4switch_ms: 0,
            elapsed_ms: 0,
        };
        assert!(choose(&base, &topo).is_none());
    }
}
