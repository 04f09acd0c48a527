/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Least-loaded-node chooser (§4.5): greedy highest-remaining-capacity
//! selection. Used when a partition carries the `LLN` flag.

use std::collections::BTreeMap;

use super::{ChooserInput, ChooserOutput};
use crate::bitmap::Bitmap;

/// Spec §4.5.
pub fn choose(input: &ChooserInput) -> Option<ChooserOutput> {
    let n = input.candidates.len();
    let required = input
        .required_nodes
        .cloned()
        .unwrap_or_else(|| Bitmap::new(n));

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
    let mut selected_count: u32 = 0;

    // Pre-seat required nodes exactly as §4.4.
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
        selected_count += 1;
    }

    let mut last_max: Option<u32> = None;

    while (rem_cpus > 0 || rem_nodes > 0) && selected_count < input.max_nodes {
        let mut best: Option<usize> = None;
        let mut best_cap = 0u32;

        for i in input.candidates.iter_ones() {
            if result.test(i) {
                continue;
            }
            let cap = input.capacities[i];
            if cap > best_cap {
                best_cap = cap;
                best = Some(i);
                if let Some(lm) = last_max {
                    if best_cap == lm {
                        break;
                    }
                }
            }
        }

        let Some(idx) = best else { break };
        if best_cap == 0 {
            break;
        }
        if let Some(cap_limit) = input.max_cpus {
            if total_cpus.saturating_add(best_cap) > cap_limit {
                // Node can't be used under the cap; drop it from
                // consideration by marking it selected-but-excluded would
                // corrupt accounting, so just stop — knapsack mitigation
                // handles this case upstream.
                break;
            }
        }

        result.set(idx);
        cpu_count.insert(idx, best_cap);
        total_cpus += best_cap;
        rem_cpus -= best_cap as i64;
        rem_nodes -= 1;
        selected_count += 1;
        last_max = Some(best_cap);
    }

    if rem_cpus <= 0 && rem_nodes <= 0 {
        Some(ChooserOutput { node_bitmap: result, cpu_count })
    } else {
        None
    }
}
