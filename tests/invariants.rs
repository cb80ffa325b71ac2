//! Structural invariants under a deterministic pseudo-random workload:
//! after any balanced sequence every region is off, counts match a shadow
//! model, and the name list enumerates in first-start order.

use std::collections::HashMap;

use metronome::{ClockId, Options, Timing};

/// Small deterministic generator so the workload is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn balanced_random_sequences_leave_no_region_on() {
    const NAMES: [&str; 6] = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    let timing = Timing::new(Options {
        time_source: ClockId::ClockGettime,
        ..Options::default()
    })
    .unwrap();

    let mut rng = Lcg(0x5eed);
    let mut stack: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, u64> = HashMap::new();
    let mut first_start: Vec<&str> = Vec::new();

    for _ in 0..2000 {
        let push = stack.len() < 40 && (stack.is_empty() || rng.next() % 2 == 0);
        if push {
            let name = NAMES[(rng.next() as usize) % NAMES.len()];
            timing.start(name).unwrap();
            stack.push(name);
            if !first_start.contains(&name) {
                first_start.push(name);
            }
        } else {
            let name = stack.pop().unwrap();
            timing.stop(name).unwrap();
            *counts.entry(name).or_insert(0) += 1;
        }
    }
    while let Some(name) = stack.pop() {
        timing.stop(name).unwrap();
        *counts.entry(name).or_insert(0) += 1;
    }

    for name in NAMES {
        if let Ok(snap) = timing.query(name, None) {
            assert!(!snap.on, "{name} left on");
            assert_eq!(snap.count, counts[name], "{name} count mismatch");
            assert!(snap.count >= snap.nrecurse, "{name} recursion bound");
            assert!(snap.wallclock >= 0.0, "{name} negative accumulation");
        } else {
            assert!(!counts.contains_key(name), "{name} timed but unknown");
        }
    }

    // The enumeration order is first-start order.
    let n = timing.get_nregions(None).unwrap();
    assert_eq!(n, first_start.len());
    for (idx, name) in first_start.iter().enumerate() {
        assert_eq!(timing.get_regionname(None, idx).unwrap(), *name);
    }

    // A balanced tail still works: depth returned to zero.
    timing.start("tail").unwrap();
    timing.stop("tail").unwrap();
    assert_eq!(timing.query("tail", None).unwrap().count, 1);
}

#[test]
fn report_after_heavy_workload_stays_consistent() {
    let timing = Timing::new(Options {
        time_source: ClockId::ClockGettime,
        ..Options::default()
    })
    .unwrap();

    let mut rng = Lcg(42);
    for _ in 0..300 {
        timing.start("outer").unwrap();
        if rng.next() % 2 == 0 {
            timing.start("left").unwrap();
            timing.stop("left").unwrap();
        } else {
            timing.start("right").unwrap();
            timing.start("leaf").unwrap();
            timing.stop("leaf").unwrap();
            timing.stop("right").unwrap();
        }
        timing.stop("outer").unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report");
    timing.write_report(&path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();

    let outer = timing.query("outer", None).unwrap();
    assert_eq!(outer.count, 300);
    assert!(content.contains("outer"), "{content}");
    assert!(content.contains("Total calls  ="), "{content}");
}
