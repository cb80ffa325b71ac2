//! In-process region timing.
//!
//! Bracket code regions with nested `start(name)` / `stop(name)` pairs
//! (recursion included), aggregate wallclock and CPU statistics per
//! region per thread, and print a hierarchical report at the end of the
//! run. Designed for codes where instrumentation overhead must stay in
//! the hundreds of nanoseconds and the same binary may run single- or
//! multi-threaded.
//!
//! ## Quick start
//!
//! ```no_run
//! use metronome as mt;
//!
//! fn main() -> Result<(), mt::Error> {
//!     mt::initialize()?;
//!
//!     mt::start("total")?;
//!     for _ in 0..1000 {
//!         mt::start("step")?;
//!         // work
//!         mt::stop("step")?;
//!     }
//!     mt::stop("total")?;
//!
//!     mt::report(0)?; // writes ./timing.0
//!     mt::finalize()
//! }
//! ```
//!
//! Options are set before `initialize`:
//!
//! ```no_run
//! use metronome as mt;
//! mt::set_option(mt::Opt::Cpu, 1).unwrap();
//! mt::set_option(mt::Opt::DepthLimit, 16).unwrap();
//! mt::set_time_source(mt::ClockId::Nanotime).ok(); // falls back if unavailable
//! mt::initialize().unwrap();
//! ```
//!
//! Hot loops can cache a [`Handle`] to skip the hash lookup, or lean on
//! the RAII [`guard`]:
//!
//! ```no_run
//! use metronome as mt;
//! # mt::initialize().unwrap();
//! let mut handle = mt::Handle::new();
//! for _ in 0..1_000_000 {
//!     mt::start_handle("inner", &mut handle).unwrap();
//!     mt::stop_handle("inner", &mut handle).unwrap();
//! }
//! {
//!     let _guard = mt::guard("scoped");
//!     // stops when the guard drops
//! }
//! ```
//!
//! The process-global functions wrap one [`Timing`] instance; tests and
//! embedders that need isolation can construct their own instances from
//! an [`Options`] block and call the same methods on them.
//!
//! Diagnostics (negative wallclock deltas, time-source fallback, cycle
//! rejections while building the printed tree) go through the `log`
//! facade; no logger is installed by the library.

#![allow(unsafe_code)]

mod clock;
mod counters;
mod cpu;
mod engine;
mod error;
mod global;
mod options;
mod region;
mod report;
mod summary;
mod threads;
mod tree;

pub use clock::{ClockDriver, ClockId, DRIVERS};
pub use counters::CounterAdapter;
pub use engine::{Guard, Handle, RegionSnapshot, Timing};
pub use error::Error;
pub use global::{
    disable, enable, finalize, get_nregions, get_regionname, get_threadstats, get_wallclock,
    guard, initialize, is_initialized, query, report, reset, set_adapter_option,
    set_counter_adapter, set_option, set_time_source, stamp, start, start_at, start_handle, stop,
    stop_at, stop_handle, write_report, GlobalGuard,
};
pub use options::{Opt, Options, PrintMethod, ThreadMode};
pub use summary::{EventExtrema, GlobalStats};
