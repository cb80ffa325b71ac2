//! Scenario: one region invoked under two different parents. With the
//! full-tree policy it must appear under both, be flagged with a star,
//! and carry per-parent counts in the detail section.

use std::fs;

use metronome::{ClockId, Options, PrintMethod, Timing};

#[test]
fn shared_child_is_starred_under_both_parents() {
    let timing = Timing::new(Options {
        time_source: ClockId::ClockGettime,
        method: PrintMethod::FullTree,
        ..Options::default()
    })
    .unwrap();

    timing.start("A").unwrap();
    timing.start("C").unwrap();
    timing.stop("C").unwrap();
    timing.stop("A").unwrap();
    timing.start("B").unwrap();
    timing.start("C").unwrap();
    timing.stop("C").unwrap();
    timing.stop("B").unwrap();

    assert_eq!(timing.query("C", None).unwrap().count, 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report");
    timing.write_report(&path).unwrap();
    let content = fs::read_to_string(&path).unwrap();

    // C prints once under A and once under B, both rows starred.
    let c_rows: Vec<&str> = content
        .lines()
        .take_while(|l| !l.starts_with("Multiple parent info"))
        .filter(|l| l.starts_with("* ") && l.contains('C'))
        .collect();
    assert_eq!(c_rows.len(), 2, "expected two starred C rows:\n{content}");

    // Detail section: one line per parent with its contribution, then the
    // child total.
    assert!(content.contains("Multiple parent info for thread 0:"), "{content}");
    let detail: Vec<&str> = content
        .lines()
        .skip_while(|l| !l.starts_with("Multiple parent info"))
        .collect();
    let a_line = detail.iter().find(|l| l.contains('A')).expect("A parent line");
    let b_line = detail.iter().find(|l| l.contains('B')).expect("B parent line");
    assert_eq!(a_line.split_whitespace().next(), Some("1"));
    assert_eq!(b_line.split_whitespace().next(), Some("1"));
}

#[test]
fn single_parent_policies_print_one_row() {
    for method in [PrintMethod::FirstParent, PrintMethod::LastParent] {
        let timing = Timing::new(Options {
            time_source: ClockId::ClockGettime,
            method,
            ..Options::default()
        })
        .unwrap();
        for parent in ["p1", "p2"] {
            timing.start(parent).unwrap();
            timing.start("kid").unwrap();
            timing.stop("kid").unwrap();
            timing.stop(parent).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report");
        timing.write_report(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        let kid_rows = content
            .lines()
            .take_while(|l| !l.starts_with("Multiple parent info"))
            .filter(|l| l.contains("kid"))
            .count();
        assert_eq!(
            kid_rows, 1,
            "{} should print kid exactly once:\n{content}",
            method.name()
        );
    }
}
