//! Scenario: mismatched stops. Errors must leave running regions intact
//! so the caller can recover.

use metronome::{ClockId, Error, Options, Timing};

fn timing() -> Timing {
    Timing::new(Options {
        time_source: ClockId::ClockGettime,
        ..Options::default()
    })
    .unwrap()
}

#[test]
fn stop_of_unknown_region_is_recoverable() {
    let timing = timing();

    timing.start("A").unwrap();
    let err = timing.stop("B").unwrap_err();
    assert!(matches!(err, Error::UnknownTimer(name) if name == "B"));

    // A is still running and stops normally afterwards.
    assert!(timing.query("A", None).unwrap().on);
    timing.stop("A").unwrap();
    let a = timing.query("A", None).unwrap();
    assert!(!a.on);
    assert_eq!(a.count, 1);
}

#[test]
fn double_stop_is_rejected() {
    let timing = timing();
    timing.start("once").unwrap();
    timing.stop("once").unwrap();
    let err = timing.stop("once").unwrap_err();
    assert!(matches!(err, Error::UnbalancedStop(name) if name == "once"));
    // The failed stop must not inflate the count.
    assert_eq!(timing.query("once", None).unwrap().count, 1);
}

#[test]
fn errors_do_not_poison_later_timing() {
    let timing = timing();
    let _ = timing.stop("never_started");
    timing.start("fine").unwrap();
    timing.stop("fine").unwrap();
    assert_eq!(timing.query("fine", None).unwrap().count, 1);
}
