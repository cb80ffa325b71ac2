//! Call-tree construction for printing.
//!
//! The engine records, per region, the set of distinct parents it was
//! observed under (plus an orphan count for starts directly above the
//! sentinel). Printing needs a tree, so this module flattens those parent
//! sets into `children` arrays under one of the four parent-selection
//! policies. The sentinel root acts as an implicit parent whose invocation
//! count is the region's orphan count.
//!
//! Any edge that would close a cycle is rejected and logged, never fatal.
//! A final sweep attaches regions left unreachable (only possible after a
//! rejection) to the root so the whole arena stays printable.

use crate::options::PrintMethod;
use crate::region::ThreadTable;

/// Build `children` arrays from the recorded parent sets. Safe to call
/// repeatedly; previous children are discarded first.
pub(crate) fn construct_tree(table: &mut ThreadTable, method: PrintMethod) {
    for region in table.arena.iter_mut() {
        region.children.clear();
    }

    for idx in 1..table.arena.len() {
        match method {
            PrintMethod::FirstParent => {
                let parent = table.arena[idx].parents.first().copied().unwrap_or(0);
                add_child(table, parent, idx);
            }
            PrintMethod::LastParent => {
                let parent = table.arena[idx].parents.last().copied().unwrap_or(0);
                add_child(table, parent, idx);
            }
            PrintMethod::MostFrequent => {
                // The root competes with the recorded parents, weighted by
                // the orphan count; ties keep the root.
                let mut parent = 0;
                let mut maxcount = table.arena[idx].norphan;
                for (n, &p) in table.arena[idx].parents.iter().enumerate() {
                    if table.arena[idx].parent_counts[n] > maxcount {
                        maxcount = table.arena[idx].parent_counts[n];
                        parent = p;
                    }
                }
                add_child(table, parent, idx);
            }
            PrintMethod::FullTree => {
                let parents = table.arena[idx].parents.clone();
                for parent in parents {
                    add_child(table, parent, idx);
                }
                if table.arena[idx].norphan > 0 || table.arena[idx].parents.is_empty() {
                    add_child(table, 0, idx);
                }
            }
        }
    }

    attach_unreachable(table);
    table.max_depth = max_print_depth(table, 0, 0);
}

/// Add `child` under `parent` unless the edge would close a cycle.
fn add_child(table: &mut ThreadTable, parent: usize, child: usize) -> bool {
    if parent == child {
        log::warn!(
            "region '{}' cannot be its own parent, edge skipped",
            table.arena[child].name
        );
        return false;
    }
    if is_descendant(table, child, parent) {
        log::warn!(
            "loop detected: not adding '{}' under '{}', proposed parent is in the child's descendant path",
            table.arena[child].name,
            table.arena[parent].name
        );
        return false;
    }
    table.arena[parent].children.push(child);
    true
}

/// Whether `target` appears in the descendant set of `node`. Breadth
/// before depth: direct children are the common case.
fn is_descendant(table: &ThreadTable, node: usize, target: usize) -> bool {
    let children = &table.arena[node].children;
    if children.contains(&target) {
        return true;
    }
    children
        .iter()
        .any(|&child| is_descendant(table, child, target))
}

/// Attach every region not reachable from the root directly to the root.
fn attach_unreachable(table: &mut ThreadTable) {
    let mut visited = vec![false; table.arena.len()];
    mark(table, 0, &mut visited);
    for idx in 1..table.arena.len() {
        if !visited[idx] {
            log::warn!(
                "region '{}' was unreachable after tree construction, attaching to the root",
                table.arena[idx].name
            );
            table.arena[0].children.push(idx);
            mark(table, idx, &mut visited);
        }
    }
}

fn mark(table: &ThreadTable, idx: usize, visited: &mut [bool]) {
    if visited[idx] {
        return;
    }
    visited[idx] = true;
    let children = table.arena[idx].children.clone();
    for child in children {
        mark(table, child, visited);
    }
}

/// Depth of the deepest subtree below `idx`, counting each child level as
/// one. With `idx = 0` this is how far the printed rows can indent.
pub(crate) fn max_print_depth(table: &ThreadTable, idx: usize, startdepth: usize) -> usize {
    let mut maxdepth = startdepth;
    for &child in &table.arena[idx].children {
        maxdepth = maxdepth.max(max_print_depth(table, child, startdepth + 1));
    }
    maxdepth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ThreadTable;

    /// Build a table where `child` was pushed under each `(parent, count)`
    /// and `norphan` times at the top level.
    fn seed(table: &mut ThreadTable, child: usize, parents: &[(usize, u64)], norphan: u64) {
        table.arena[child].parents = parents.iter().map(|&(p, _)| p).collect();
        table.arena[child].parent_counts = parents.iter().map(|&(_, c)| c).collect();
        table.arena[child].norphan = norphan;
    }

    fn new_table() -> ThreadTable {
        ThreadTable::new(1023, 0)
    }

    #[test]
    fn orphan_regions_become_children_of_the_root() {
        let mut table = new_table();
        let a = table.intern("a");
        seed(&mut table, a, &[], 2);
        construct_tree(&mut table, PrintMethod::FullTree);
        assert_eq!(table.arena[0].children, vec![a]);
        assert_eq!(table.max_depth, 1);
    }

    #[test]
    fn full_tree_links_every_distinct_parent() {
        let mut table = new_table();
        let a = table.intern("a");
        let b = table.intern("b");
        let c = table.intern("c");
        seed(&mut table, a, &[], 1);
        seed(&mut table, b, &[], 1);
        seed(&mut table, c, &[(a, 1), (b, 1)], 0);
        construct_tree(&mut table, PrintMethod::FullTree);
        assert_eq!(table.arena[a].children, vec![c]);
        assert_eq!(table.arena[b].children, vec![c]);
        assert_eq!(table.arena[0].children, vec![a, b]);
        assert_eq!(table.max_depth, 2);
    }

    #[test]
    fn first_and_last_parent_pick_the_ends() {
        let mut table = new_table();
        let a = table.intern("a");
        let b = table.intern("b");
        let c = table.intern("c");
        seed(&mut table, a, &[], 1);
        seed(&mut table, b, &[], 1);
        seed(&mut table, c, &[(a, 1), (b, 5)], 0);

        construct_tree(&mut table, PrintMethod::FirstParent);
        assert_eq!(table.arena[a].children, vec![c]);
        assert!(table.arena[b].children.is_empty());

        construct_tree(&mut table, PrintMethod::LastParent);
        assert!(table.arena[a].children.is_empty());
        assert_eq!(table.arena[b].children, vec![c]);
    }

    #[test]
    fn most_frequent_prefers_the_busiest_parent() {
        let mut table = new_table();
        let a = table.intern("a");
        let b = table.intern("b");
        let c = table.intern("c");
        seed(&mut table, a, &[], 1);
        seed(&mut table, b, &[], 1);
        seed(&mut table, c, &[(a, 2), (b, 7)], 1);
        construct_tree(&mut table, PrintMethod::MostFrequent);
        assert_eq!(table.arena[b].children, vec![c]);
        assert!(table.arena[a].children.is_empty());
        assert!(!table.arena[0].children.contains(&c));
    }

    #[test]
    fn most_frequent_keeps_root_on_ties() {
        let mut table = new_table();
        let a = table.intern("a");
        let c = table.intern("c");
        seed(&mut table, a, &[], 1);
        seed(&mut table, c, &[(a, 3)], 3);
        construct_tree(&mut table, PrintMethod::MostFrequent);
        assert!(table.arena[0].children.contains(&c));
        assert!(table.arena[a].children.is_empty());
    }

    #[test]
    fn cycle_edges_are_rejected_and_everything_stays_reachable() {
        // a and b each recorded the other as a parent; only one direction
        // can survive.
        let mut table = new_table();
        let a = table.intern("a");
        let b = table.intern("b");
        seed(&mut table, a, &[(b, 1)], 1);
        seed(&mut table, b, &[(a, 1)], 0);
        construct_tree(&mut table, PrintMethod::FullTree);

        let a_under_b = table.arena[b].children.contains(&a);
        let b_under_a = table.arena[a].children.contains(&b);
        assert!(a_under_b ^ b_under_a, "exactly one direction must survive");

        // Every region is reachable from the sentinel.
        let mut visited = vec![false; table.arena.len()];
        mark(&table, 0, &mut visited);
        assert!(visited.iter().all(|&v| v), "unreachable region remains");
    }

    #[test]
    fn reconstruction_does_not_duplicate_children() {
        let mut table = new_table();
        let a = table.intern("a");
        seed(&mut table, a, &[], 1);
        construct_tree(&mut table, PrintMethod::FullTree);
        construct_tree(&mut table, PrintMethod::FullTree);
        assert_eq!(table.arena[0].children, vec![a]);
    }
}
