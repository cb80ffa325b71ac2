//! Thread registry: maps each calling thread to a dense 0-based index.
//!
//! Three back-ends, selected in `Options`:
//!
//! - `Registry`: a fixed table of per-slot tokens. Lookups are lock-free
//!   linear scans; only a thread's first call takes the allocation mutex.
//! - `Cached`: the slot is assigned once from an atomic counter and
//!   memoized in a thread-local, mirroring a runtime-provided thread index.
//! - `Single`: always index 0.
//!
//! When a hardware-counter adapter is installed, its per-thread setup runs
//! during slot allocation (inside the mutex for the `Registry` back-end).
//!
//! Thread tokens come from a process-wide counter rather than
//! `std::thread::ThreadId` so they are plain integers the reporter can
//! print in the thread-map section.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::counters::CounterAdapter;
use crate::error::Error;
use crate::options::ThreadMode;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Process-unique token for this thread; 0 means unassigned.
    static TOKEN: Cell<u64> = const { Cell::new(0) };
    /// Memoized (registry instance, slot) for the `Cached` back-end.
    static CACHED: Cell<(u64, usize)> = const { Cell::new((0, 0)) };
}

fn thread_token() -> u64 {
    TOKEN.with(|cell| {
        let mut token = cell.get();
        if token == 0 {
            token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            cell.set(token);
        }
        token
    })
}

pub(crate) struct ThreadRegistry {
    mode: ThreadMode,
    max: usize,
    /// Distinguishes this registry's thread-local memos from those of any
    /// earlier instance in the same process.
    instance: u64,
    alloc: Mutex<()>,
    tokens: Box<[AtomicU64]>,
    nthreads: AtomicUsize,
}

impl ThreadRegistry {
    pub(crate) fn new(mode: ThreadMode, maxthreads: usize) -> Self {
        let max = match mode {
            ThreadMode::Single => 1,
            _ => maxthreads,
        };
        let tokens = (0..max).map(|_| AtomicU64::new(0)).collect();
        ThreadRegistry {
            mode,
            max,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            alloc: Mutex::new(()),
            tokens,
            nthreads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn mode(&self) -> ThreadMode {
        self.mode
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }

    /// Number of threads seen so far.
    pub(crate) fn count(&self) -> usize {
        self.nthreads.load(Ordering::Acquire).min(self.max)
    }

    /// Token recorded for logical index `t`.
    pub(crate) fn token(&self, t: usize) -> u64 {
        self.tokens[t].load(Ordering::Relaxed)
    }

    /// Stable 0-based index for the calling thread, allocating a slot on
    /// its first call.
    pub(crate) fn current(&self, adapter: Option<&dyn CounterAdapter>) -> Result<usize, Error> {
        match self.mode {
            ThreadMode::Registry => self.current_registry(adapter),
            ThreadMode::Cached => self.current_cached(adapter),
            ThreadMode::Single => self.current_single(adapter),
        }
    }

    fn current_registry(&self, adapter: Option<&dyn CounterAdapter>) -> Result<usize, Error> {
        let token = thread_token();

        // Fast path: our token has already been published.
        let n = self.nthreads.load(Ordering::Acquire);
        for t in 0..n {
            if self.tokens[t].load(Ordering::Relaxed) == token {
                return Ok(t);
            }
        }

        // First call from this thread: allocate the next slot under the
        // mutex. Only this thread could have added our token, so no
        // re-scan is needed.
        let _guard = self
            .alloc
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let n = self.nthreads.load(Ordering::Relaxed);
        if n >= self.max {
            return Err(Error::ThreadOverflow { max: self.max });
        }
        if let Some(adapter) = adapter {
            adapter.thread_init(n)?;
        }
        self.tokens[n].store(token, Ordering::Relaxed);
        self.nthreads.store(n + 1, Ordering::Release);
        Ok(n)
    }

    fn current_cached(&self, adapter: Option<&dyn CounterAdapter>) -> Result<usize, Error> {
        let memo = CACHED.with(|cell| {
            let (instance, slot) = cell.get();
            (instance == self.instance).then_some(slot)
        });
        if let Some(slot) = memo {
            return Ok(slot);
        }

        let t = self.nthreads.fetch_add(1, Ordering::AcqRel);
        if t >= self.max {
            return Err(Error::ThreadOverflow { max: self.max });
        }
        if let Some(adapter) = adapter {
            adapter.thread_init(t)?;
        }
        self.tokens[t].store(thread_token(), Ordering::Relaxed);
        CACHED.with(|cell| cell.set((self.instance, t)));
        Ok(t)
    }

    fn current_single(&self, adapter: Option<&dyn CounterAdapter>) -> Result<usize, Error> {
        if self.nthreads.load(Ordering::Acquire) == 0 {
            let _guard = self
                .alloc
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if self.nthreads.load(Ordering::Relaxed) == 0 {
                if let Some(adapter) = adapter {
                    adapter.thread_init(0)?;
                }
                self.tokens[0].store(thread_token(), Ordering::Relaxed);
                self.nthreads.store(1, Ordering::Release);
            }
        }
        Ok(0)
    }
}
