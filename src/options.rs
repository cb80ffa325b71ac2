//! Configuration block frozen at `initialize`.
//!
//! Options are set through [`set`](Options::set) with an [`Opt`] id and an
//! integer value (boolean options treat nonzero as true), or by writing the
//! fields directly when constructing a [`Timing`](crate::Timing) instance
//! by hand. After `initialize` the block is immutable apart from
//! enable/disable and reset.

use crate::clock::ClockId;
use crate::error::Error;

/// How the reporter picks parent links when flattening the recorded
/// parent sets into a printable tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMethod {
    /// Attach each region to the first parent it was observed under.
    FirstParent,
    /// Attach each region to the most recently observed parent.
    LastParent,
    /// Attach each region to the parent that invoked it most often.
    MostFrequent,
    /// Attach each region to every distinct parent.
    FullTree,
}

impl PrintMethod {
    pub fn name(self) -> &'static str {
        match self {
            PrintMethod::FirstParent => "first_parent",
            PrintMethod::LastParent => "last_parent",
            PrintMethod::MostFrequent => "most_frequent",
            PrintMethod::FullTree => "full_tree",
        }
    }

    fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(PrintMethod::FirstParent),
            1 => Some(PrintMethod::LastParent),
            2 => Some(PrintMethod::MostFrequent),
            3 => Some(PrintMethod::FullTree),
            _ => None,
        }
    }
}

/// Thread-registry back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// Shared slot table: lock-free scans, mutex-guarded first call per
    /// thread.
    Registry,
    /// Slot assigned once per thread and memoized in a thread-local,
    /// mirroring a runtime-provided thread index.
    Cached,
    /// Always thread 0.
    Single,
}

impl ThreadMode {
    pub fn name(self) -> &'static str {
        match self {
            ThreadMode::Registry => "registry",
            ThreadMode::Cached => "cached",
            ThreadMode::Single => "single",
        }
    }
}

/// Option identifiers accepted by [`Options::set`] and the process-global
/// [`set_option`](crate::set_option).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    /// Collect wallclock statistics (default on).
    Wall,
    /// Collect user/system CPU statistics (default off).
    Cpu,
    /// Abort the process on any timing error (default off).
    AbortOnError,
    /// Print the per-region overhead column (default on).
    Overhead,
    /// Maximum nesting depth before starts are silently suppressed.
    DepthLimit,
    /// Chatty option handling and clock setup.
    Verbose,
    /// Print wallclock also as a percentage of the first region on
    /// thread 0.
    Percent,
    /// Print the explanatory preamble (default on).
    PrintPreamble,
    /// Print the cross-thread sorted section (default on).
    PrintThreadSort,
    /// Print the multiple-parent detail section (default on).
    PrintMultParent,
    /// Print hash-collision diagnostics (default on).
    PrintCollisions,
    /// Print memory accounting (default off).
    PrintMemUsage,
    /// Parent-selection policy for the printed tree (values 0..=3).
    PrintMethod,
    /// Hash table size per thread (positive).
    TableSize,
    /// Maximum number of threads (positive).
    MaxThreads,
}

/// The full option block. Defaults match a plain
/// wallclock-only configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub wall: bool,
    pub cpu: bool,
    pub abort_on_error: bool,
    pub overhead: bool,
    pub depthlimit: usize,
    pub verbose: bool,
    pub percent: bool,
    pub print_preamble: bool,
    pub print_threadsort: bool,
    pub print_multparent: bool,
    pub print_collisions: bool,
    pub print_memusage: bool,
    pub method: PrintMethod,
    pub tablesize: usize,
    pub maxthreads: usize,
    pub thread_mode: ThreadMode,
    pub time_source: ClockId,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            wall: true,
            cpu: false,
            abort_on_error: false,
            overhead: true,
            depthlimit: usize::MAX,
            verbose: false,
            percent: false,
            print_preamble: true,
            print_threadsort: true,
            print_multparent: true,
            print_collisions: true,
            print_memusage: false,
            method: PrintMethod::FullTree,
            tablesize: 1023,
            maxthreads: 64,
            thread_mode: ThreadMode::Registry,
            time_source: ClockId::Gettimeofday,
        }
    }
}

impl Options {
    /// Apply one `(option, value)` pair. Boolean options treat any nonzero
    /// value as true. Fails with `BadValue` for out-of-range values.
    pub fn set(&mut self, opt: Opt, value: i64) -> Result<(), Error> {
        match opt {
            Opt::Wall => self.wall = value != 0,
            Opt::Cpu => self.cpu = value != 0,
            Opt::AbortOnError => self.abort_on_error = value != 0,
            Opt::Overhead => self.overhead = value != 0,
            Opt::DepthLimit => {
                if value < 0 {
                    return Err(Error::BadValue {
                        option: "depthlimit",
                        value,
                    });
                }
                self.depthlimit = value as usize;
            }
            Opt::Verbose => self.verbose = value != 0,
            Opt::Percent => self.percent = value != 0,
            Opt::PrintPreamble => self.print_preamble = value != 0,
            Opt::PrintThreadSort => self.print_threadsort = value != 0,
            Opt::PrintMultParent => self.print_multparent = value != 0,
            Opt::PrintCollisions => self.print_collisions = value != 0,
            Opt::PrintMemUsage => self.print_memusage = value != 0,
            Opt::PrintMethod => {
                self.method = PrintMethod::from_value(value).ok_or(Error::BadValue {
                    option: "print_method",
                    value,
                })?;
            }
            Opt::TableSize => {
                if value < 1 {
                    return Err(Error::BadValue {
                        option: "tablesize",
                        value,
                    });
                }
                self.tablesize = value as usize;
            }
            Opt::MaxThreads => {
                if value < 1 {
                    return Err(Error::BadValue {
                        option: "maxthreads",
                        value,
                    });
                }
                self.maxthreads = value as usize;
            }
        }
        if self.verbose {
            log::info!("option {opt:?} = {value}");
        }
        Ok(())
    }
}
