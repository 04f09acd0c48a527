/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Two-layer error model: [`FeasibilityReason`] explains why one node was
//! rejected, [`SelectError`] explains why the whole call failed.
//!
//! Mirrors the teacher crate's `AdmissionReason`/`SchedulerError` split —
//! one enum the placement loop accumulates per-node without ever stopping
//! the scan, one enum the top-level entry point returns. Uses `thiserror`,
//! not `anyhow`: every variant here is a distinct, matchable outcome a
//! caller (an allocator, a `sinfo`/`squeue`-style reporting tool) branches
//! on, and there is no file-I/O boundary in this crate for `anyhow`'s
//! one-bag-of-context style to earn its keep.

use thiserror::Error;

/// Why a single candidate node was rejected. Collected by
/// [`crate::feasibility::verify_node_state`] and [`crate::allocate::allocate_sc`]
/// without aborting the overall scan — a node being infeasible is routine,
/// not exceptional.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeasibilityReason {
    #[error("node {node} is in state {state:?}, which does not accept new work")]
    NodeStateBlocked { node: String, state: crate::node::NodeState },

    #[error("node {node} requires exclusive use but is already shared")]
    ExclusivityConflict { node: String },

    #[error("node {node} has {available} free cores, job needs {needed}")]
    InsufficientCores { node: String, available: u32, needed: u32 },

    #[error("node {node} has {available}MB free memory, job needs {needed}MB")]
    InsufficientMemory { node: String, available: u64, needed: u64 },

    #[error("node {node} cannot satisfy min_cores_per_socket={min_cores_per_socket} within any socket")]
    SocketLayoutUnmet { node: String, min_cores_per_socket: u32 },

    #[error("node {node} offers {available_sockets} sockets with enough free cores, job needs min_sockets_per_node={needed}")]
    SocketCountUnmet { node: String, available_sockets: u32, needed: u32 },

    #[error("node {node}'s GRES cannot back job GRES request {job_gres:?}")]
    GresUnavailable { node: String, job_gres: String },

    #[error("node {node} core bitmap width {actual} does not match its node-table core range {expected}")]
    CoreBitmapSizeMismatch { node: String, expected: usize, actual: usize },
}

impl FeasibilityReason {
    pub fn node(&self) -> &str {
        match self {
            FeasibilityReason::NodeStateBlocked { node, .. }
            | FeasibilityReason::ExclusivityConflict { node }
            | FeasibilityReason::InsufficientCores { node, .. }
            | FeasibilityReason::InsufficientMemory { node, .. }
            | FeasibilityReason::SocketLayoutUnmet { node, .. }
            | FeasibilityReason::SocketCountUnmet { node, .. }
            | FeasibilityReason::GresUnavailable { node, .. }
            | FeasibilityReason::CoreBitmapSizeMismatch { node, .. } => node,
        }
    }

    /// Spec §7: a core-bitmap width mismatch is logged and the node is
    /// skipped, but it never aborts the whole selection call.
    pub fn is_fatal_if_required(&self) -> bool {
        !matches!(self, FeasibilityReason::CoreBitmapSizeMismatch { .. })
    }
}

/// Top-level outcome of [`crate::driver::select_job`].
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no feasible placement found across {nodes_considered} candidate node(s)")]
    InsufficientResources {
        nodes_considered: usize,
        reasons: Vec<FeasibilityReason>,
    },

    #[error("required node {node} is unusable: {reason}")]
    RequiredNodeUnusable { node: String, reason: FeasibilityReason },

    #[error("job requires contiguous nodes but no contiguous block of {min_nodes} was available")]
    ContiguityUnmet { min_nodes: u32 },

    #[error("placement would use {would_use} CPUs, exceeding max_cpus={limit}")]
    MaxCpuLimitExceeded { would_use: u32, limit: u32 },

    #[error("no switch at or below requested count {req_switch} could fit the job within the wait budget")]
    TopologyBestSwitch { req_switch: u32 },

    #[error("selected {selected} node(s), job requires between {min} and {max}")]
    NodeCountMismatch { selected: u32, min: u32, max: u32 },

    #[error("node {node} core bitmap width {actual} does not match its node-table core range {expected}")]
    CoreBitmapSizeMismatch { node: String, expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeState;

    #[test]
    fn feasibility_reason_node_accessor() {
        let r = FeasibilityReason::InsufficientCores {
            node: "n1".to_string(),
            available: 2,
            needed: 4,
        };
        assert_eq!(r.node(), "n1");
    }

    #[test]
    fn core_bitmap_mismatch_is_non_fatal() {
        let r = FeasibilityReason::CoreBitmapSizeMismatch {
            node: "n1".to_string(),
            expected: 8,
            actual: 4,
        };
        assert!(!r.is_fatal_if_required());
    }

    #[test]
    fn other_reasons_are_fatal_if_required() {
        let r = FeasibilityReason::NodeStateBlocked {
            node: "n1".to_string(),
            state: NodeState::Reserved,
        };
        assert!(r.is_fatal_if_required());
    }

    #[test]
    fn select_error_messages_are_informative() {
        let e = SelectError::NodeCountMismatch { selected: 1, min: 2, max: 4 };
        assert!(e.to_string().contains("selected 1"));
    }
}
