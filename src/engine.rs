//! The timing engine.
//!
//! A [`Timing`] value owns everything: the frozen option block, the
//! selected clock, the thread registry, and one region table per thread
//! slot. Production code normally uses the process-global wrappers in
//! [`crate::global`]; tests construct private instances so they do not
//! have to share the singleton.
//!
//! Concurrency model: each thread slot's table sits behind its own mutex.
//! A thread only ever locks its own slot on the hot path, so the lock is
//! uncontended there; the reporter and the cross-thread queries lock other
//! slots only after timing activity has stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::{Clock, ClockId};
use crate::counters::CounterAdapter;
use crate::cpu;
use crate::error::Error;
use crate::options::Options;
use crate::region::{truncate_name, ThreadTable, MAX_STACK};
use crate::threads::ThreadRegistry;

/// Caches a resolved region so later starts and stops skip the hash
/// lookup. Filled on the first successful `start_handle`.
#[derive(Debug, Default)]
pub struct Handle {
    slot: usize,
    index: usize,
    set: bool,
}

impl Handle {
    pub const fn new() -> Self {
        Handle {
            slot: 0,
            index: 0,
            set: false,
        }
    }
}

/// Point-in-time view of one region, as returned by [`Timing::query`].
#[derive(Debug, Clone)]
pub struct RegionSnapshot {
    pub count: u64,
    pub nrecurse: u64,
    pub on: bool,
    /// Accumulated wallclock seconds.
    pub wallclock: f64,
    /// Accumulated user CPU seconds.
    pub usr: f64,
    /// Accumulated system CPU seconds.
    pub sys: f64,
    /// Accumulated hardware-counter values, one per adapter event.
    pub counters: Vec<i64>,
}

/// RAII guard: the region stops when the guard drops.
#[must_use = "dropping the guard immediately stops the region; bind it with `let _guard = ...`"]
pub struct Guard<'a> {
    timing: &'a Timing,
    name: &'a str,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        let _ = self.timing.stop(self.name);
    }
}

enum Key<'a> {
    Name(&'a str),
    Addr(usize),
}

impl Key<'_> {
    fn describe(&self) -> String {
        match self {
            Key::Name(name) => (*name).to_string(),
            Key::Addr(addr) => format!("{addr:x}"),
        }
    }
}

pub struct Timing {
    pub(crate) opts: Options,
    pub(crate) clock: Clock,
    pub(crate) ticks_per_sec: i64,
    pub(crate) registry: ThreadRegistry,
    pub(crate) adapter: Option<Arc<dyn CounterAdapter>>,
    disabled: AtomicBool,
    tables: Box<[Mutex<ThreadTable>]>,
}

impl Timing {
    /// Build a ready-to-time instance from an option block. Fails only if
    /// no time source can be brought up or the CPU tick rate is
    /// unavailable; a failing selected source downgrades to
    /// `gettimeofday` with a logged warning.
    pub fn new(opts: Options) -> Result<Self, Error> {
        Self::build(opts, None)
    }

    /// Like [`new`](Self::new) with a hardware-counter adapter installed.
    pub fn with_adapter(opts: Options, adapter: Arc<dyn CounterAdapter>) -> Result<Self, Error> {
        Self::build(opts, Some(adapter))
    }

    fn build(opts: Options, adapter: Option<Arc<dyn CounterAdapter>>) -> Result<Self, Error> {
        let mut clock = Clock::new();
        if let Err(err) = clock.init(opts.time_source, opts.verbose) {
            log::warn!(
                "failure initializing time source '{}', reverting to '{}': {err}",
                opts.time_source.name(),
                ClockId::Gettimeofday.name()
            );
            clock.init(ClockId::Gettimeofday, opts.verbose)?;
        }

        let ticks_per_sec = cpu::ticks_per_sec()?;
        let registry = ThreadRegistry::new(opts.thread_mode, opts.maxthreads);
        let nevents = adapter.as_ref().map_or(0, |a| a.nevents());
        let tables = (0..registry.max())
            .map(|_| Mutex::new(ThreadTable::new(opts.tablesize, nevents)))
            .collect();

        if opts.verbose {
            let t1 = clock.now();
            let t2 = clock.now();
            if t1 > t2 {
                log::warn!("negative delta-t = {:e} from back-to-back reads", t2 - t1);
            }
            log::info!(
                "underlying wallclock source is {}, per-call overhead est {:e} s",
                clock.name(),
                t2 - t1
            );
        }

        Ok(Timing {
            opts,
            clock,
            ticks_per_sec,
            registry,
            adapter,
            disabled: AtomicBool::new(false),
            tables,
        })
    }

    /// Central error path: log, abort when configured, otherwise hand the
    /// error back to the caller.
    fn raise(&self, err: Error) -> Error {
        log::error!("{err}");
        if self.opts.abort_on_error {
            std::process::abort();
        }
        err
    }

    fn slot(&self, t: usize) -> MutexGuard<'_, ThreadTable> {
        self.tables[t].lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_thread(&self) -> Result<usize, Error> {
        self.registry.current(self.adapter.as_deref())
    }

    /// Map an explicit thread index (bounds-checked) or `None` (the
    /// calling thread) to a slot.
    fn resolve_thread(&self, thread: Option<usize>) -> Result<usize, Error> {
        match thread {
            None => self.current_thread(),
            Some(t) if t < self.registry.max() => Ok(t),
            Some(_) => Err(Error::ThreadOverflow {
                max: self.registry.max(),
            }),
        }
    }

    /// Start the named region.
    pub fn start(&self, name: &str) -> Result<(), Error> {
        self.start_common(Key::Name(name), None)
    }

    /// Stop the named region.
    pub fn stop(&self, name: &str) -> Result<(), Error> {
        self.stop_common(Key::Name(name), None)
    }

    /// Start with a caller-cached handle; fills `handle` on first use so
    /// later calls skip the hash walk.
    pub fn start_handle(&self, name: &str, handle: &mut Handle) -> Result<(), Error> {
        self.start_common(Key::Name(name), Some(handle))
    }

    /// Stop with a caller-cached handle. The name is used only for
    /// diagnostics and for re-resolution when the handle belongs to a
    /// different thread.
    pub fn stop_handle(&self, name: &str, handle: &mut Handle) -> Result<(), Error> {
        if !handle.set {
            return Err(self.raise(Error::UnknownTimer(name.to_string())));
        }
        self.stop_common(Key::Name(name), Some(handle))
    }

    /// Start a region keyed by code address (auto-instrumentation entry).
    pub fn start_at(&self, addr: usize) -> Result<(), Error> {
        if addr == 0 {
            return Err(self.raise(Error::BadValue {
                option: "address",
                value: 0,
            }));
        }
        self.start_common(Key::Addr(addr), None)
    }

    /// Stop a region keyed by code address.
    pub fn stop_at(&self, addr: usize) -> Result<(), Error> {
        if addr == 0 {
            return Err(self.raise(Error::BadValue {
                option: "address",
                value: 0,
            }));
        }
        self.stop_common(Key::Addr(addr), None)
    }

    /// Start the named region and stop it when the returned guard drops.
    /// Errors on the way in or out are logged, not returned.
    pub fn guard<'a>(&'a self, name: &'a str) -> Guard<'a> {
        let _ = self.start(name);
        Guard { timing: self, name }
    }

    fn start_common(&self, key: Key<'_>, handle: Option<&mut Handle>) -> Result<(), Error> {
        if self.disabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let t = match self.current_thread() {
            Ok(t) => t,
            Err(err) => return Err(self.raise(err)),
        };
        let mut tab = self.slot(t);

        // Past the user depth limit: track depth, touch nothing else. The
        // matching stop undoes the increment the same way.
        if tab.depth >= self.opts.depthlimit {
            tab.depth += 1;
            return Ok(());
        }

        let cached = handle
            .as_ref()
            .filter(|h| h.set && h.slot == t)
            .map(|h| h.index);
        let existing = cached.or_else(|| match &key {
            Key::Name(name) => tab.find(truncate_name(name)),
            Key::Addr(addr) => tab.find_addr(*addr),
        });

        // Recursive re-entry: count it, leave the running measurement
        // alone so the reported time spans the outermost pair only.
        if let Some(idx) = existing {
            if tab.arena[idx].onflg {
                tab.arena[idx].recurselvl += 1;
                return Ok(());
            }
        }

        // Increment unconditionally so the matching stop's unconditional
        // decrement stays balanced.
        tab.depth += 1;
        if tab.depth > MAX_STACK - 1 {
            return Err(self.raise(Error::StackOverflow {
                name: key.describe(),
                max: MAX_STACK,
            }));
        }

        let idx = match existing {
            Some(idx) => idx,
            None => match key {
                Key::Name(name) => tab.intern(truncate_name(name)),
                Key::Addr(addr) => tab.intern_addr(addr),
            },
        };

        tab.record_parent(idx);

        let region = &mut tab.arena[idx];
        region.onflg = true;
        if self.opts.cpu {
            let (usr, sys) = cpu::cpustamp();
            region.cpu.last_user = usr;
            region.cpu.last_sys = sys;
        }
        if self.opts.wall {
            region.wall.last = self.clock.now();
        }
        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.start(t, &mut region.aux.last) {
                return Err(self.raise(err));
            }
        }

        if let Some(h) = handle {
            h.slot = t;
            h.index = idx;
            h.set = true;
        }
        Ok(())
    }

    fn stop_common(&self, key: Key<'_>, handle: Option<&mut Handle>) -> Result<(), Error> {
        if self.disabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Sample before any lookup to keep the bookkeeping cost out of
        // the measurement.
        let wall_now = if self.opts.wall { self.clock.now() } else { 0.0 };
        let (usr_now, sys_now) = if self.opts.cpu {
            cpu::cpustamp()
        } else {
            (0, 0)
        };

        let t = match self.current_thread() {
            Ok(t) => t,
            Err(err) => return Err(self.raise(err)),
        };
        let mut tab = self.slot(t);

        if tab.depth > self.opts.depthlimit {
            tab.depth -= 1;
            return Ok(());
        }

        let cached = handle
            .as_ref()
            .filter(|h| h.set && h.slot == t)
            .map(|h| h.index);
        let idx = match cached {
            Some(idx) => idx,
            None => {
                let found = match &key {
                    Key::Name(name) => tab.find(truncate_name(name)),
                    Key::Addr(addr) => tab.find_addr(*addr),
                };
                match found {
                    Some(idx) => idx,
                    None => return Err(self.raise(Error::UnknownTimer(key.describe()))),
                }
            }
        };

        if !tab.arena[idx].onflg {
            return Err(self.raise(Error::UnbalancedStop(tab.arena[idx].name.clone())));
        }

        tab.arena[idx].count += 1;

        // Unwinding a recursive layer: count it and keep the outermost
        // measurement running.
        if tab.arena[idx].recurselvl > 0 {
            tab.arena[idx].nrecurse += 1;
            tab.arena[idx].recurselvl -= 1;
            return Ok(());
        }

        tab.arena[idx].onflg = false;
        if tab.depth == 0 {
            return Err(self.raise(Error::UnbalancedStop(tab.arena[idx].name.clone())));
        }
        tab.depth -= 1;

        if let Some(adapter) = &self.adapter {
            let crate::region::AuxStats { last, accum } = &mut tab.arena[idx].aux;
            if let Err(err) = adapter.stop(t, last, accum) {
                return Err(self.raise(err));
            }
        }

        if self.opts.wall {
            let region = &mut tab.arena[idx];
            let delta = wall_now - region.wall.last;
            if delta < 0.0 {
                log::warn!(
                    "negative wallclock delta {delta:e} for region '{}'",
                    region.name
                );
            }
            region.wall.accum += delta;
            if region.count == 1 {
                region.wall.max = delta;
                region.wall.min = delta;
            } else {
                region.wall.max = region.wall.max.max(delta);
                region.wall.min = region.wall.min.min(delta);
            }
        }

        if self.opts.cpu {
            let region = &mut tab.arena[idx];
            region.cpu.accum_user += usr_now - region.cpu.last_user;
            region.cpu.accum_sys += sys_now - region.cpu.last_sys;
            region.cpu.last_user = usr_now;
            region.cpu.last_sys = sys_now;
        }
        Ok(())
    }

    /// Re-enable timing after [`disable`](Self::disable).
    pub fn enable(&self) {
        self.disabled.store(false, Ordering::Relaxed);
    }

    /// Make every timing call a no-op until re-enabled.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Relaxed);
    }

    /// Zero all statistics on every thread while keeping region names.
    pub fn reset(&self) {
        for t in 0..self.registry.count() {
            self.slot(t).reset();
        }
        if self.opts.verbose {
            log::info!("accumulators for all regions set to zero");
        }
    }

    /// Current (wallclock, user, system) times in seconds.
    pub fn stamp(&self) -> Result<(f64, f64, f64), Error> {
        let wall = self.clock.now();
        let (usr, sys) = cpu::cpustamp();
        let ticks = self.ticks_per_sec as f64;
        Ok((wall, usr as f64 / ticks, sys as f64 / ticks))
    }

    /// Snapshot one region's statistics. `thread` of `None` means the
    /// calling thread.
    pub fn query(&self, name: &str, thread: Option<usize>) -> Result<RegionSnapshot, Error> {
        let t = self.resolve_thread(thread).map_err(|e| self.raise(e))?;
        let tab = self.slot(t);
        let idx = tab
            .find(truncate_name(name))
            .ok_or_else(|| self.raise(Error::UnknownTimer(name.to_string())))?;
        let region = &tab.arena[idx];
        let ticks = self.ticks_per_sec as f64;
        Ok(RegionSnapshot {
            count: region.count,
            nrecurse: region.nrecurse,
            on: region.onflg,
            wallclock: region.wall.accum,
            usr: region.cpu.accum_user as f64 / ticks,
            sys: region.cpu.accum_sys as f64 / ticks,
            counters: region.aux.accum.clone(),
        })
    }

    /// Accumulated wallclock seconds for one region.
    pub fn get_wallclock(&self, name: &str, thread: Option<usize>) -> Result<f64, Error> {
        Ok(self.query(name, thread)?.wallclock)
    }

    /// Number of regions the given thread has seen.
    pub fn get_nregions(&self, thread: Option<usize>) -> Result<usize, Error> {
        let t = self.resolve_thread(thread).map_err(|e| self.raise(e))?;
        Ok(self.slot(t).nregions())
    }

    /// Name of the `idx`-th region (0-based, first-start order) on the
    /// given thread.
    pub fn get_regionname(&self, thread: Option<usize>, idx: usize) -> Result<String, Error> {
        let t = self.resolve_thread(thread).map_err(|e| self.raise(e))?;
        let tab = self.slot(t);
        tab.arena
            .get(idx + 1)
            .map(|r| r.name.clone())
            .ok_or_else(|| self.raise(Error::UnknownTimer(format!("region index {idx}"))))
    }

    /// Clone of one thread's region table, for reporting and summaries.
    pub(crate) fn snapshot(&self, t: usize) -> ThreadTable {
        self.slot(t).clone()
    }

    pub(crate) fn nthreads(&self) -> usize {
        self.registry.count()
    }
}
