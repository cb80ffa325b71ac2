//! Scenario: threaded isolation. Each thread owns its region set; the
//! cross-thread sorted section lines the same name up across threads and
//! appends a SUM row.

use std::fs;

use metronome::{ClockId, Options, Timing};

fn options() -> Options {
    Options {
        time_source: ClockId::ClockGettime,
        ..Options::default()
    }
}

#[test]
fn each_thread_keeps_its_own_counts() {
    let timing = Timing::new(options()).unwrap();

    timing.start("X").unwrap();
    timing.stop("X").unwrap();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            timing.start("X").unwrap();
            timing.stop("X").unwrap();
        });
    });

    assert_eq!(timing.query("X", Some(0)).unwrap().count, 1);
    assert_eq!(timing.query("X", Some(1)).unwrap().count, 1);
}

#[test]
fn threadsort_section_prints_rows_and_sum() {
    let timing = Timing::new(options()).unwrap();

    timing.start("X").unwrap();
    timing.stop("X").unwrap();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            timing.start("X").unwrap();
            timing.stop("X").unwrap();
        });
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report");
    timing.write_report(&path).unwrap();
    let content = fs::read_to_string(&path).unwrap();

    assert!(
        content.contains("Same stats sorted by timer for threaded regions:"),
        "{content}"
    );
    assert!(content.contains("Stats for thread 1:"), "{content}");

    let row = |prefix: &str| {
        content
            .lines()
            .find(|l| l.starts_with(prefix))
            .unwrap_or_else(|| panic!("missing '{prefix}' row:\n{content}"))
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };

    let t0 = row("000 ");
    let t1 = row("001 ");
    let sum = row("SUM ");
    assert_eq!(t0[1], "X");
    assert_eq!(t1[1], "X");
    assert_eq!(sum[1], "X");
    assert_eq!(t0[2], "1");
    assert_eq!(t1[2], "1");
    assert_eq!(sum[2], "2", "SUM row must add the counts:\n{content}");
}

#[test]
fn regions_unique_to_other_threads_stay_out_of_the_sort() {
    let timing = Timing::new(options()).unwrap();

    timing.start("shared").unwrap();
    timing.stop("shared").unwrap();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            timing.start("shared").unwrap();
            timing.stop("shared").unwrap();
            timing.start("worker_only").unwrap();
            timing.stop("worker_only").unwrap();
        });
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report");
    timing.write_report(&path).unwrap();
    let content = fs::read_to_string(&path).unwrap();

    let sorted: String = content
        .lines()
        .skip_while(|l| !l.contains("Same stats sorted by timer"))
        .take_while(|l| !l.starts_with("OVERHEAD."))
        .collect::<Vec<_>>()
        .join("\n");
    // The sorted section walks thread 0's list, so worker_only is absent
    // there while still present in thread 1's own tree.
    assert!(!sorted.contains("worker_only"), "{sorted}");
    assert!(content.contains("worker_only"), "{content}");
}

#[test]
fn thread_overflow_is_an_error() {
    let mut opts = options();
    opts.set(metronome::Opt::MaxThreads, 1).unwrap();
    let timing = Timing::new(opts).unwrap();
    timing.start("main").unwrap();
    timing.stop("main").unwrap();

    std::thread::scope(|scope| {
        let result = scope.spawn(|| timing.start("extra")).join().unwrap();
        assert!(matches!(
            result,
            Err(metronome::Error::ThreadOverflow { max: 1 })
        ));
    });
}
