/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node geometry index, node records, and mutable node-usage state.
//!
//! [`NodeRecord`] is immutable for the duration of a selection call — it
//! mirrors hardware facts (socket/core/thread counts, memory, GRES) the
//! caller already knows. [`NodeUsage`] is the mutable, caller-owned
//! counterpart: currently allocated memory, running GRES, and the node's
//! sharing state.

use serde::{Deserialize, Serialize};

/// Hardware topology and capacity for one compute node.
///
/// Invariant (checked by [`NodeTable::push`]): for a table of `n` nodes,
/// `coremap_offset(i + 1) - coremap_offset(i) == sockets * cores_per_socket`
/// for every `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    /// Total logical CPUs. Usually `sockets * cores_per_socket *
    /// threads_per_core`, but may be lower if the hardware advertises
    /// fewer logical CPUs than the socket/core/thread product implies.
    pub total_cpus: u32,
    pub real_memory_mb: u64,
    /// Opaque GRES descriptor string, passed through to [`crate::gres::GresFilter`]
    /// unexamined by this crate.
    pub gres: String,
}

impl NodeRecord {
    pub fn new(
        name: impl Into<String>,
        sockets: u32,
        cores_per_socket: u32,
        threads_per_core: u32,
        real_memory_mb: u64,
    ) -> Self {
        let total_cpus = sockets * cores_per_socket * threads_per_core;
        Self {
            name: name.into(),
            sockets,
            cores_per_socket,
            threads_per_core,
            total_cpus,
            real_memory_mb,
            gres: String::new(),
        }
    }

    /// Number of cores on this node (sockets × cores_per_socket), i.e. the
    /// width of this node's slice of the global core bitmap.
    pub fn core_count(&self) -> u32 {
        self.sockets * self.cores_per_socket
    }
}

/// Sharing/exclusivity state of a node, consumed by
/// [`crate::feasibility::verify_node_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Available,
    OneRow,
    Reserved,
    Completing,
}

/// Mutable, caller-owned per-node allocation state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUsage {
    pub alloc_memory_mb: u64,
    /// Opaque "currently running GRES" descriptor, passed to
    /// [`crate::gres::GresFilter::job_test`] unexamined.
    pub running_gres: String,
    pub state: NodeState,
}

impl NodeUsage {
    pub fn free_memory_mb(&self, node: &NodeRecord) -> u64 {
        node.real_memory_mb.saturating_sub(self.alloc_memory_mb)
    }
}

/// Maps node index → [`NodeRecord`] and global core-bitmap offsets.
///
/// `coremap_offset(n)` is the index of the first core bit belonging to node
/// `n` in the crate's global core [`crate::bitmap::Bitmap`] space;
/// `coremap_offset(n + 1)` is one past its last. Nodes are stored and
/// indexed in the order they were pushed — that order *is* the global node
/// index used by every other bitmap in a selection call.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Vec<NodeRecord>,
    /// `offsets[i]` = coremap_offset(i); has `nodes.len() + 1` entries.
    offsets: Vec<u32>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            offsets: vec![0],
        }
    }

    pub fn push(&mut self, node: NodeRecord) -> usize {
        let idx = self.nodes.len();
        let next_offset = self.offsets[idx] + node.core_count();
        self.offsets.push(next_offset);
        self.nodes.push(node);
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&NodeRecord> {
        self.nodes.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &NodeRecord)> {
        self.nodes.iter().enumerate()
    }

    /// Total width of the global core bitmap this table implies.
    pub fn total_cores(&self) -> usize {
        *self.offsets.last().unwrap_or(&0) as usize
    }

    /// `[coremap_offset(n), coremap_offset(n + 1))` for node `n`.
    pub fn core_range(&self, n: usize) -> std::ops::Range<usize> {
        self.offsets[n] as usize..self.offsets[n + 1] as usize
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }
}
