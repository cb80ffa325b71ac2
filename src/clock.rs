//! Underlying wallclock sources.
//!
//! A fixed driver table enumerates the sources the engine can time with.
//! Each source has a fallible `init` and a reentrant `now()` returning
//! monotonically increasing seconds as `f64` (with whatever monotonicity
//! the source itself provides). `initialize` re-runs init on the selected
//! source and falls back to `gettimeofday` on failure.
//!
//! The raw clock syscalls are declared inline with `#[repr(C)]` structs so
//! the hot path carries no binding-crate code. The TSC source reads the
//! cycle counter with a single `rdtsc` and converts with a ratio
//! discovered once at init from sysfs (preferred) or procfs.

use std::fs;

use crate::error::Error;

/// Identifiers for the fixed set of wallclock sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    /// `gettimeofday(2)`, the default and the fallback.
    Gettimeofday,
    /// x86 TSC cycle counter scaled by the discovered clock frequency.
    Nanotime,
    /// `MPI_Wtime` from an MPI collaborator (unavailable in this build).
    MpiWtime,
    /// `clock_gettime(CLOCK_REALTIME)`.
    ClockGettime,
    /// Real-microsecond clock from a counter-library collaborator
    /// (unavailable in this build).
    PapiRealUsec,
    /// Always returns zero. Useful for measuring library overhead.
    Placebo,
}

/// One row of the driver table.
pub struct ClockDriver {
    pub id: ClockId,
    pub name: &'static str,
}

/// Driver table, in selection order. `gettimeofday` first: it is the
/// default and the fallback target.
pub const DRIVERS: &[ClockDriver] = &[
    ClockDriver {
        id: ClockId::Gettimeofday,
        name: "gettimeofday",
    },
    ClockDriver {
        id: ClockId::Nanotime,
        name: "nanotime",
    },
    ClockDriver {
        id: ClockId::MpiWtime,
        name: "mpi_wtime",
    },
    ClockDriver {
        id: ClockId::ClockGettime,
        name: "clock_gettime",
    },
    ClockDriver {
        id: ClockId::PapiRealUsec,
        name: "papi_real_usec",
    },
    ClockDriver {
        id: ClockId::Placebo,
        name: "placebo",
    },
];

impl ClockId {
    pub fn name(self) -> &'static str {
        DRIVERS
            .iter()
            .find(|d| d.id == self)
            .map(|d| d.name)
            .unwrap_or("unknown")
    }
}

#[repr(C)]
struct Timespec {
    tv_sec: i64,
    tv_nsec: i64,
}

#[cfg(target_os = "linux")]
#[repr(C)]
struct Timeval {
    tv_sec: i64,
    tv_usec: i64,
}

#[cfg(target_os = "macos")]
#[repr(C)]
struct Timeval {
    tv_sec: i64,
    tv_usec: i32,
}

/// Same value on Linux and macOS.
const CLOCK_REALTIME: i32 = 0;

extern "C" {
    fn gettimeofday(tp: *mut Timeval, tz: *mut core::ffi::c_void) -> i32;
    fn clock_gettime(clk_id: i32, tp: *mut Timespec) -> i32;
}

fn read_gettimeofday() -> (i64, f64) {
    let mut tp = Timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let ret = unsafe { gettimeofday(&mut tp, core::ptr::null_mut()) };
    debug_assert!(ret == 0, "gettimeofday failed");
    (tp.tv_sec, f64::from(tp.tv_usec as i32) * 1.0e-6)
}

fn read_clock_gettime() -> (i64, f64) {
    let mut tp = Timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { clock_gettime(CLOCK_REALTIME, &mut tp) };
    debug_assert!(ret == 0, "clock_gettime(CLOCK_REALTIME) failed");
    (tp.tv_sec, tp.tv_nsec as f64 * 1.0e-9)
}

/// Read the cycle counter. Single inline instruction on x86_64.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn rdtsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn rdtsc() -> u64 {
    0
}

const MAX_FREQ_PATH: &str = "/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq";
const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Discover the CPU clock frequency in MHz, preferring the sysfs maximum
/// frequency over the current value in `/proc/cpuinfo` (which is wrong on
/// variable-frequency parts). Returns the frequency and where it came from.
fn discover_clock_freq(verbose: bool) -> Option<(f64, &'static str)> {
    if let Ok(contents) = fs::read_to_string(MAX_FREQ_PATH) {
        if let Some(first) = contents.lines().next() {
            if let Ok(khz) = first.trim().parse::<f64>() {
                if khz > 0.0 {
                    let mhz = khz * 0.001;
                    if verbose {
                        log::info!("using max clock freq {mhz} MHz from {MAX_FREQ_PATH}");
                    }
                    return Some((mhz, MAX_FREQ_PATH));
                }
            }
        }
    }

    if verbose {
        log::info!("no max clock freq available, trying {CPUINFO_PATH}");
    }

    let contents = fs::read_to_string(CPUINFO_PATH).ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("cpu MHz") {
            let digits = rest.trim_start_matches(|c: char| !c.is_ascii_digit());
            if let Ok(mhz) = digits.trim().parse::<f64>() {
                if mhz > 0.0 {
                    return Some((mhz, CPUINFO_PATH));
                }
            }
        }
    }
    None
}

/// The selected wallclock source plus whatever state its init captured.
///
/// `gettimeofday` and `clock_gettime` subtract a reference second taken at
/// init so the `f64` keeps sub-microsecond precision over long runs.
#[derive(Debug, Clone)]
pub(crate) struct Clock {
    id: ClockId,
    ref_sec: i64,
    cyc2sec: f64,
    freq_mhz: f64,
    freq_source: &'static str,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Clock {
            id: ClockId::Gettimeofday,
            ref_sec: 0,
            cyc2sec: 0.0,
            freq_mhz: 0.0,
            freq_source: "",
        }
    }

    pub(crate) fn id(&self) -> ClockId {
        self.id
    }

    pub(crate) fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Clock rate in MHz and its origin; meaningful for `Nanotime` only.
    pub(crate) fn freq(&self) -> (f64, &'static str) {
        (self.freq_mhz, self.freq_source)
    }

    /// Initialize `id` as the active source. On failure the previous
    /// source remains active and an error is returned.
    pub(crate) fn init(&mut self, id: ClockId, verbose: bool) -> Result<(), Error> {
        match id {
            ClockId::Gettimeofday => {
                let (sec, _) = read_gettimeofday();
                self.ref_sec = sec;
            }
            ClockId::ClockGettime => {
                let (sec, _) = read_clock_gettime();
                self.ref_sec = sec;
            }
            ClockId::Nanotime => {
                if !cfg!(target_arch = "x86_64") {
                    return Err(Error::TimeSourceUnavailable("nanotime"));
                }
                let (mhz, source) = discover_clock_freq(verbose)
                    .ok_or(Error::TimeSourceUnavailable("nanotime"))?;
                self.freq_mhz = mhz;
                self.freq_source = source;
                self.cyc2sec = 1.0 / (mhz * 1.0e6);
            }
            ClockId::MpiWtime => return Err(Error::TimeSourceUnavailable("mpi_wtime")),
            ClockId::PapiRealUsec => return Err(Error::TimeSourceUnavailable("papi_real_usec")),
            ClockId::Placebo => {}
        }
        self.id = id;
        if verbose {
            log::info!("underlying wallclock source is {}", self.name());
        }
        Ok(())
    }

    /// Current time in seconds. Reentrant; no side effects beyond reading
    /// the clock.
    #[inline]
    pub(crate) fn now(&self) -> f64 {
        match self.id {
            ClockId::Gettimeofday => {
                let (sec, frac) = read_gettimeofday();
                (sec - self.ref_sec) as f64 + frac
            }
            ClockId::ClockGettime => {
                let (sec, frac) = read_clock_gettime();
                (sec - self.ref_sec) as f64 + frac
            }
            ClockId::Nanotime => rdtsc() as f64 * self.cyc2sec,
            // Unreachable while their inits fail, but keep them total.
            ClockId::MpiWtime | ClockId::PapiRealUsec => 0.0,
            ClockId::Placebo => 0.0,
        }
    }

    /// Estimate the per-call cost of `now()` by timing 100 back-to-back
    /// reads.
    pub(crate) fn overhead(&self) -> f64 {
        let first = self.now();
        let mut last = first;
        for _ in 0..100 {
            last = self.now();
        }
        (0.01 * (last - first)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gettimeofday_advances() {
        let mut clock = Clock::new();
        clock.init(ClockId::Gettimeofday, false).unwrap();
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t1 >= 0.0, "reference subtraction keeps values small: {t1}");
        assert!(t2 >= t1, "time went backwards: {t1} -> {t2}");
        assert!(t1 < 10.0, "fresh clock should be near zero, got {t1}");
    }

    #[test]
    fn clock_gettime_advances() {
        let mut clock = Clock::new();
        clock.init(ClockId::ClockGettime, false).unwrap();
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let t2 = clock.now();
        assert!(t2 - t1 >= 0.001, "expected >=1ms elapsed, got {}", t2 - t1);
    }

    #[test]
    fn placebo_reads_zero() {
        let mut clock = Clock::new();
        clock.init(ClockId::Placebo, false).unwrap();
        assert_eq!(clock.now(), 0.0);
        assert_eq!(clock.now(), 0.0);
    }

    #[test]
    fn collaborator_sources_are_unavailable() {
        let mut clock = Clock::new();
        assert!(matches!(
            clock.init(ClockId::MpiWtime, false),
            Err(Error::TimeSourceUnavailable("mpi_wtime"))
        ));
        assert!(matches!(
            clock.init(ClockId::PapiRealUsec, false),
            Err(Error::TimeSourceUnavailable("papi_real_usec"))
        ));
        // Failed init leaves the previous source active.
        assert_eq!(clock.id(), ClockId::Gettimeofday);
    }

    #[test]
    fn overhead_estimate_is_small_and_nonnegative() {
        let mut clock = Clock::new();
        clock.init(ClockId::Gettimeofday, false).unwrap();
        let ovh = clock.overhead();
        assert!(ovh >= 0.0);
        assert!(ovh < 1.0e-3, "per-call overhead way too large: {ovh}");
    }

    #[test]
    fn driver_table_covers_every_id() {
        for driver in DRIVERS {
            assert_eq!(driver.id.name(), driver.name);
        }
        assert_eq!(DRIVERS.len(), 6);
    }
}
