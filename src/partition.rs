/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Partition allocation table: priority-ordered rows of core-usage bitmaps.
//!
//! A [`PartitionTable`] is an ordered list of [`PartitionEntry`] values, each
//! carrying `num_rows` core-usage [`Bitmap`]s (bits set = cores in use by
//! jobs assigned to that row). Rows are ordered with the most-preferred
//! placement first — used by driver pass 4 (§4.8) which tries its own
//! partition's rows in order.

use crate::bitmap::Bitmap;

/// Bit flags carried on a partition, consulted by the driver and the
/// node-state filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionFlags {
    /// Partition allows multiple jobs to share a core (gang scheduling /
    /// oversubscription is permitted within this partition).
    pub shared: bool,
    /// Least-loaded-node placement is this partition's default policy.
    pub lln: bool,
}

/// One partition's entry in the allocation table.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub name: String,
    pub priority: i64,
    pub flags: PartitionFlags,
    /// Core-usage bitmap per row, most-preferred row first. Length equals
    /// `num_rows`.
    pub rows: Vec<Bitmap>,
    /// Spec §4.1 step 4's partition CPU cap per node. `None` = unlimited.
    pub max_cpus_per_node: Option<u32>,
}

impl PartitionEntry {
    pub fn new(name: impl Into<String>, priority: i64, flags: PartitionFlags, core_space: usize, num_rows: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            flags,
            rows: (0..num_rows).map(|_| Bitmap::new(core_space)).collect(),
            max_cpus_per_node: None,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Union of every row's core-usage bitmap.
    pub fn union_rows(&self, core_space: usize) -> Bitmap {
        let mut out = Bitmap::new(core_space);
        for row in &self.rows {
            out.or_with(row);
        }
        out
    }

    /// `true` if any row has any core in use.
    pub fn is_busy(&self) -> bool {
        self.rows.iter().any(|r| r.any())
    }

    /// Row index (if any) whose bitmap has no set bits — a completely empty
    /// row, consulted by driver pass 4's fallback.
    pub fn empty_row(&self) -> Option<usize> {
        self.rows.iter().position(|r| r.is_clear())
    }

    /// Rows sorted most-used-first ("by density"), as §4.8 pass 4 requires.
    /// Returns indices, not a reordering of `self.rows`, so callers can
    /// still address rows by their original position.
    pub fn rows_by_density(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.rows.len()).collect();
        idx.sort_by_key(|&i| std::cmp::Reverse(self.rows[i].popcount()));
        idx
    }
}

/// Ordered collection of [`PartitionEntry`] values. Iteration order is
/// insertion order and is part of the crate's determinism contract (§5):
/// the driver must see partitions in the same stable order on every call.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: PartitionEntry) {
        self.entries.push(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter()
    }

    pub fn find(&self, name: &str) -> Option<&PartitionEntry> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of the rows of every partition with `priority` strictly
    /// greater than `priority`. Used by driver pass 2 (§4.8).
    pub fn rows_above_priority(&self, priority: i64, core_space: usize) -> Bitmap {
        let mut out = Bitmap::new(core_space);
        for p in &self.entries {
            if p.priority > priority {
                out.or_with(&p.union_rows(core_space));
            }
        }
        out
    }

    /// Union of the rows of every partition with `priority` equal to
    /// `priority`, excluding `exclude_name` (the job's own partition). Used
    /// by driver pass 3.
    pub fn rows_at_priority(&self, priority: i64, exclude_name: &str, core_space: usize) -> Bitmap {
        let mut out = Bitmap::new(core_space);
        for p in &self.entries {
            if p.priority == priority && p.name != exclude_name {
                out.or_with(&p.union_rows(core_space));
            }
        }
        out
    }

    /// Union of every row belonging to `name`. Used by driver pass 1 to
    /// build `part_core_map`.
    pub fn rows_of(&self, name: &str, core_space: usize) -> Bitmap {
        self.find(name)
            .map(|p| p.union_rows(core_space))
            .unwrap_or_else(|| Bitmap::new(core_space))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(b: &mut Bitmap, bits: &[usize]) {
        for &i in bits {
            b.set(i);
        }
    }

    #[test]
    fn union_rows_combines_all_rows() {
        let mut entry = PartitionEntry::new("p1", 1, PartitionFlags::default(), 8, 2);
        mark(&mut entry.rows[0], &[0, 1]);
        mark(&mut entry.rows[1], &[4]);
        let u = entry.union_rows(8);
        assert_eq!(u.iter_ones().collect::<Vec<_>>(), vec![0, 1, 4]);
    }

    #[test]
    fn empty_row_detection() {
        let mut entry = PartitionEntry::new("p1", 1, PartitionFlags::default(), 8, 3);
        mark(&mut entry.rows[0], &[0]);
        mark(&mut entry.rows[2], &[3]);
        assert_eq!(entry.empty_row(), Some(1));
    }

    #[test]
    fn rows_by_density_orders_most_used_first() {
        let mut entry = PartitionEntry::new("p1", 1, PartitionFlags::default(), 8, 3);
        mark(&mut entry.rows[0], &[0]);
        mark(&mut entry.rows[1], &[0, 1, 2]);
        mark(&mut entry.rows[2], &[0, 1]);
        assert_eq!(entry.rows_by_density(), vec![1, 2, 0]);
    }

    #[test]
    fn rows_above_and_at_priority() {
        let mut table = PartitionTable::new();
        let mut high = PartitionEntry::new("high", 10, PartitionFlags::default(), 8, 1);
        mark(&mut high.rows[0], &[0]);
        let mut mid_a = PartitionEntry::new("mid_a", 5, PartitionFlags::default(), 8, 1);
        mark(&mut mid_a.rows[0], &[1]);
        let mut mid_b = PartitionEntry::new("mid_b", 5, PartitionFlags::default(), 8, 1);
        mark(&mut mid_b.rows[0], &[2]);
        table.push(high);
        table.push(mid_a);
        table.push(mid_b);

        let above = table.rows_above_priority(5, 8);
        assert_eq!(above.iter_ones().collect::<Vec<_>>(), vec![0]);

        let at = table.rows_at_priority(5, "mid_a", 8);
        assert_eq!(at.iter_ones().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn rows_of_missing_partition_is_empty() {
        let table = PartitionTable::new();
        let r = table.rows_of("ghost", 4);
        assert!(r.is_clear());
    }
}
