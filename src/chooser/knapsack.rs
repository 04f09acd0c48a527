/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Knapsack-mitigation wrapper (§4.7): the consecutive/LLN/topology choosers
//! all do a single best-fit pass and can fail on a demand shape that would
//! succeed if a few low-capacity nodes were dropped first (the textbook
//! knapsack pathology — many small items crowd out one that would fit
//! alone). This wrapper retries with those nodes progressively excluded.

use crate::bitmap::Bitmap;

use super::ChooserInput;

/// Runs `try_chooser` under spec §4.7's retry policy. `try_chooser` is
/// generic over which of the three chooser policies the caller already
/// bound — this wrapper only manipulates the candidate map between
/// attempts.
pub fn with_knapsack_mitigation<F, O>(
    base_input: &ChooserInput,
    whole_node_exclusive: bool,
    job_max_cpus: Option<u32>,
    mut try_chooser: F,
) -> Option<O>
where
    F: FnMut(&ChooserInput) -> Option<O>,
{
    let n = base_input.candidates.len();
    let required = base_input
        .required_nodes
        .cloned()
        .unwrap_or_else(|| Bitmap::new(n));

    let mut baseline = base_input.candidates.copy();
    for i in base_input.candidates.iter_ones() {
        let cap = base_input.capacities[i];
        let drop = cap == 0 || (whole_node_exclusive && job_max_cpus.is_some_and(|m| cap > m));
        if drop {
            if required.test(i) {
                return None;
            }
            baseline.clear(i);
        }
    }

    let first_attempt = ChooserInput {
        candidates: &baseline,
        ..base_input.clone()
    };
    if let Some(out) = try_chooser(&first_attempt) {
        return Some(out);
    }

    let candidate_indices: Vec<usize> = baseline.iter_ones().collect();
    let most_cpus = candidate_indices
        .iter()
        .map(|&i| base_input.capacities[i])
        .max()
        .unwrap_or(0);

    for threshold in 1..most_cpus {
        let mut working = baseline.copy();
        let mut changed = false;
        for &i in &candidate_indices {
            if required.test(i) {
                continue;
            }
            let cap = base_input.capacities[i];
            if cap > 0 && cap <= threshold {
                working.clear(i);
                changed = true;
            }
        }
        if !changed {
            continue;
        }
        let attempt = ChooserInput {
            candidates: &working,
            ..base_input.clone()
        };
        if let Some(out) = try_chooser(&attempt) {
            return Some(out);
        }
    }

    None
}
