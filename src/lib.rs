/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Consumable-resource node/core selection engine.
//!
//! Given a candidate job, a cluster of nodes with socket/core/thread
//! topology, the cores already allocated per scheduling partition, and the
//! job's requested shape, this crate decides which nodes to use and which
//! cores to bind on each — or rejects the job with a structured reason.
//!
//! # Module layout
//!
//! ```text
//! lib.rs
//! ├── bitmap/      – fixed-size bit arrays shared by every other module
//! ├── node/        – node geometry index, node record, node usage state
//! ├── partition/   – partition allocation table (priority rows)
//! ├── topology/    – switch tree for network-topology placement
//! ├── gres/        – generic-resource collaborator interface
//! ├── job/         – job descriptor, selection result, policy flags
//! ├── allocate/    – per-node core allocator (§4.1 `allocate_sc`)
//! ├── feasibility/ – per-node feasibility wrapper + node-state filter
//! ├── chooser/     – the three multi-node choosers + knapsack wrapper
//! ├── driver/      – priority-layered placement driver (`select_job`)
//! └── error/       – structured error types
//! ```
//!
//! # What this crate does *not* do
//!
//! Configuration parsing, RPC/daemon glue, node health/drain handling, GRES
//! plugin internals (only consumed through [`gres::GresFilter`]), task
//! distribution onto already-selected cores, memory accounting bookkeeping
//! after selection, and preemption policy are all external collaborators'
//! responsibility. This crate is synchronous, single-threaded per call, and
//! performs no I/O.

pub mod allocate;
pub mod bitmap;
pub mod chooser;
pub mod driver;
pub mod error;
pub mod feasibility;
pub mod gres;
pub mod job;
pub mod node;
pub mod partition;
pub mod topology;

pub use driver::{select_job, DriverInput};
pub use error::{FeasibilityReason, SelectError};
pub use job::{JobDescriptor, NodeRequest, ResourceType, SelectMode, SelectionResult, NO_VAL};
