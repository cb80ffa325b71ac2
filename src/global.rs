//! Process-global singleton.
//!
//! Instrumentation calls tend to be sprinkled through a whole program, so
//! the usual way to use this library is through these free functions,
//! which wrap one [`Timing`] instance living for the span between
//! [`initialize`] and [`finalize`]. Options are staged in the same slot
//! and frozen when `initialize` builds the instance; `finalize` drops it
//! and restores every default.
//!
//! Tests that want isolation should construct [`Timing`] values directly
//! instead of sharing this singleton.

use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::clock::{Clock, ClockId};
use crate::counters::CounterAdapter;
use crate::engine::{Handle, RegionSnapshot, Timing};
use crate::error::Error;
use crate::options::{Opt, Options};

struct GlobalState {
    opts: Options,
    adapter: Option<Arc<dyn CounterAdapter>>,
    timing: Option<Timing>,
}

fn state() -> &'static RwLock<GlobalState> {
    static STATE: OnceLock<RwLock<GlobalState>> = OnceLock::new();
    STATE.get_or_init(|| {
        RwLock::new(GlobalState {
            opts: Options::default(),
            adapter: None,
            timing: None,
        })
    })
}

fn read() -> RwLockReadGuard<'static, GlobalState> {
    state().read().unwrap_or_else(PoisonError::into_inner)
}

fn write() -> RwLockWriteGuard<'static, GlobalState> {
    state().write().unwrap_or_else(PoisonError::into_inner)
}

/// Pre-instance error path: log, abort when configured.
fn raise(abort: bool, err: Error) -> Error {
    log::error!("{err}");
    if abort {
        std::process::abort();
    }
    err
}

/// Set one option. Valid only before [`initialize`].
pub fn set_option(opt: Opt, value: i64) -> Result<(), Error> {
    let mut state = write();
    if state.timing.is_some() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::AlreadyInitialized));
    }
    state.opts.set(opt, value)
}

/// Offer an adapter-specific `(option, value)` pair to the installed
/// hardware-counter adapter. Valid only before [`initialize`].
pub fn set_adapter_option(option: i64, value: i64) -> Result<(), Error> {
    let state = write();
    if state.timing.is_some() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::AlreadyInitialized));
    }
    match &state.adapter {
        Some(adapter) if adapter.set_option(option, value) => Ok(()),
        _ => {
            let abort = state.opts.abort_on_error;
            Err(raise(abort, Error::BadOption(format!("adapter option {option}"))))
        }
    }
}

/// Select the wallclock source. Valid only before [`initialize`].
///
/// The selection is recorded even when the trial init fails and an error
/// is returned; `initialize` will retry it and silently fall back to
/// `gettimeofday` if it still fails.
pub fn set_time_source(id: ClockId) -> Result<(), Error> {
    let mut state = write();
    if state.timing.is_some() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::AlreadyInitialized));
    }
    state.opts.time_source = id;
    let mut trial = Clock::new();
    let verbose = state.opts.verbose;
    let abort = state.opts.abort_on_error;
    trial.init(id, verbose).map_err(|e| raise(abort, e))
}

/// Install a hardware-counter adapter. Valid only before [`initialize`].
pub fn set_counter_adapter(adapter: Arc<dyn CounterAdapter>) -> Result<(), Error> {
    let mut state = write();
    if state.timing.is_some() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::AlreadyInitialized));
    }
    state.adapter = Some(adapter);
    Ok(())
}

/// Build the global instance. Must run on a single thread with no
/// concurrent timing callers.
pub fn initialize() -> Result<(), Error> {
    let mut state = write();
    if state.timing.is_some() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::AlreadyInitialized));
    }
    let timing = match state.adapter.clone() {
        Some(adapter) => Timing::with_adapter(state.opts.clone(), adapter)?,
        None => Timing::new(state.opts.clone())?,
    };
    state.timing = Some(timing);
    Ok(())
}

/// Drop the global instance and restore every default. Must run on a
/// single thread with no concurrent timing callers.
pub fn finalize() -> Result<(), Error> {
    let mut state = write();
    if state.timing.take().is_none() {
        let abort = state.opts.abort_on_error;
        return Err(raise(abort, Error::NotInitialized));
    }
    state.opts = Options::default();
    state.adapter = None;
    Ok(())
}

/// Whether [`initialize`] has been called without a matching
/// [`finalize`].
pub fn is_initialized() -> bool {
    read().timing.is_some()
}

fn with_timing<T>(f: impl FnOnce(&Timing) -> Result<T, Error>) -> Result<T, Error> {
    let state = read();
    match &state.timing {
        Some(timing) => f(timing),
        None => Err(raise(state.opts.abort_on_error, Error::NotInitialized)),
    }
}

/// Start the named region on the calling thread.
pub fn start(name: &str) -> Result<(), Error> {
    with_timing(|t| t.start(name))
}

/// Stop the named region on the calling thread.
pub fn stop(name: &str) -> Result<(), Error> {
    with_timing(|t| t.stop(name))
}

/// Start with a caller-cached handle, skipping the hash walk after the
/// first call.
pub fn start_handle(name: &str, handle: &mut Handle) -> Result<(), Error> {
    with_timing(|t| t.start_handle(name, handle))
}

/// Stop with a caller-cached handle.
pub fn stop_handle(name: &str, handle: &mut Handle) -> Result<(), Error> {
    with_timing(|t| t.stop_handle(name, handle))
}

/// Start a region keyed by code address.
pub fn start_at(addr: usize) -> Result<(), Error> {
    with_timing(|t| t.start_at(addr))
}

/// Stop a region keyed by code address.
pub fn stop_at(addr: usize) -> Result<(), Error> {
    with_timing(|t| t.stop_at(addr))
}

/// Region that stops when the returned guard drops. Errors on the way in
/// or out are logged, not returned.
pub fn guard(name: &'static str) -> GlobalGuard {
    let _ = start(name);
    GlobalGuard { name }
}

/// RAII companion of [`guard`].
#[must_use = "dropping the guard immediately stops the region; bind it with `let _guard = ...`"]
pub struct GlobalGuard {
    name: &'static str,
}

impl Drop for GlobalGuard {
    fn drop(&mut self) {
        let _ = stop(self.name);
    }
}

/// Re-enable timing.
pub fn enable() -> Result<(), Error> {
    with_timing(|t| {
        t.enable();
        Ok(())
    })
}

/// Turn every timing call into a no-op until re-enabled.
pub fn disable() -> Result<(), Error> {
    with_timing(|t| {
        t.disable();
        Ok(())
    })
}

/// Zero all statistics while keeping region names.
pub fn reset() -> Result<(), Error> {
    with_timing(|t| {
        t.reset();
        Ok(())
    })
}

/// Current (wallclock, user, system) times in seconds.
pub fn stamp() -> Result<(f64, f64, f64), Error> {
    with_timing(|t| t.stamp())
}

/// Snapshot one region's statistics.
pub fn query(name: &str, thread: Option<usize>) -> Result<RegionSnapshot, Error> {
    with_timing(|t| t.query(name, thread))
}

/// Accumulated wallclock seconds for one region.
pub fn get_wallclock(name: &str, thread: Option<usize>) -> Result<f64, Error> {
    with_timing(|t| t.get_wallclock(name, thread))
}

/// Number of regions seen by a thread.
pub fn get_nregions(thread: Option<usize>) -> Result<usize, Error> {
    with_timing(|t| t.get_nregions(thread))
}

/// Name of the `idx`-th region on a thread, in first-start order.
pub fn get_regionname(thread: Option<usize>, idx: usize) -> Result<String, Error> {
    with_timing(|t| t.get_regionname(thread, idx))
}

/// Aggregate one region across this process's threads for an
/// interprocess reduction.
pub fn get_threadstats(rank: usize, name: &str) -> Result<crate::summary::GlobalStats, Error> {
    with_timing(|t| Ok(t.get_threadstats(rank, name)))
}

/// Write the report to `timing.<id>` in the current directory.
pub fn report(id: u32) -> Result<(), Error> {
    with_timing(|t| t.report(id))
}

/// Write the report to `path`, diverting to stderr if the file cannot be
/// created.
pub fn write_report(path: &std::path::Path) -> Result<(), Error> {
    with_timing(|t| t.write_report(path))
}
