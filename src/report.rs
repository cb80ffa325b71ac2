//! Text report generation.
//!
//! The report works on snapshots of the per-thread tables, so it never
//! holds a slot lock for long and can be produced repeatedly. Section
//! order and numeric formats follow the long-standing conventions of this
//! kind of tool: per-thread indented call trees first, then the optional
//! cross-thread sort, multiple-parent detail, hash diagnostics, memory
//! accounting, and the thread map.
//!
//! Wallclock values print as `%9.3f` above 0.01 seconds and `%9.2e`
//! below; counts print as integers below one million and in scientific
//! form above.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::engine::Timing;
use crate::error::Error;
use crate::region::{Region, ThreadTable, PRINT_THRESHOLD};
use crate::tree;

const CPU_HEADER: &str = "Usr       sys       usr+sys   ";
const WALL_HEADER: &str = "Wallclock max       min       ";
const OVERHEAD_HEADER: &str = "UTR_Overhead  ";

fn fmt_wall(v: f64) -> String {
    if v < 0.01 {
        format!("{v:9.2e} ")
    } else {
        format!("{v:9.3} ")
    }
}

fn fmt_count(count: u64, width: usize) -> String {
    if count < PRINT_THRESHOLD {
        format!("{count:width$}")
    } else {
        format!("{:width$.1e}", count as f64)
    }
}

fn fmt_called_recurse(count: u64, nrecurse: u64) -> String {
    if nrecurse > 0 {
        format!("{} {} ", fmt_count(count, 8), fmt_count(nrecurse, 6))
    } else {
        format!("{}    -   ", fmt_count(count, 8))
    }
}

/// Rough equivalent of `%9.3g`.
fn fmt_general(v: f64) -> String {
    if v == 0.0 {
        format!("{:>9}", 0)
    } else if (0.01..1.0e5).contains(&v.abs()) {
        format!("{v:9.3}")
    } else {
        format!("{v:9.3e}")
    }
}

/// Fold `other` into `sum` for the cross-thread SUM row: counts add,
/// accumulators add, extremes extend.
fn add(sum: &mut Region, other: &Region, wall: bool, cpu: bool) {
    sum.count += other.count;
    if wall {
        sum.wall.accum += other.wall.accum;
        sum.wall.max = sum.wall.max.max(other.wall.max);
        sum.wall.min = sum.wall.min.min(other.wall.min);
    }
    if cpu {
        sum.cpu.accum_user += other.cpu.accum_user;
        sum.cpu.accum_sys += other.cpu.accum_sys;
    }
    for (a, b) in sum.aux.accum.iter_mut().zip(&other.aux.accum) {
        *a += b;
    }
}

impl Timing {
    /// Write the report to `timing.<id>` in the current directory.
    /// `id` must satisfy `0 <= id < 1_000_000`.
    pub fn report(&self, id: u32) -> Result<(), Error> {
        if id >= 1_000_000 {
            return Err(Error::BadValue {
                option: "report id",
                value: i64::from(id),
            });
        }
        self.write_report(Path::new(&format!("timing.{id}")))
    }

    /// Write the report to `path`. If the file cannot be created the
    /// report is diverted to stderr and the call still succeeds.
    pub fn write_report(&self, path: &Path) -> Result<(), Error> {
        match File::create(path) {
            Ok(file) => {
                let mut w = BufWriter::new(file);
                self.emit(&mut w)?;
                w.flush()?;
                Ok(())
            }
            Err(err) => {
                log::error!(
                    "could not open report file {}: {err}; writing report to stderr",
                    path.display()
                );
                let stderr = io::stderr();
                let mut lock = stderr.lock();
                self.emit(&mut lock)
            }
        }
    }

    pub(crate) fn emit(&self, w: &mut dyn Write) -> Result<(), Error> {
        let nthreads = self.nthreads();
        let mut tables: Vec<ThreadTable> = (0..nthreads).map(|t| self.snapshot(t)).collect();
        for table in &mut tables {
            tree::construct_tree(table, self.opts.method);
        }

        let utr_overhead = self.clock.overhead();
        let event_names: Vec<String> = match &self.adapter {
            Some(adapter) => (0..adapter.nevents())
                .map(|e| adapter.event_name(e).to_string())
                .collect(),
            None => Vec::new(),
        };

        self.emit_preamble(w, utr_overhead)?;

        // Base value for the optional percent column: the first real
        // region started on thread 0.
        let percent_base = tables
            .first()
            .and_then(|t| t.arena.get(1))
            .map(|r| (r.name.clone(), r.wall.accum));

        let mut overhead_sums = vec![0.0; nthreads];
        for (t, table) in tables.iter().enumerate() {
            if t > 0 {
                writeln!(w)?;
            }
            writeln!(w, "Stats for thread {t}:")?;
            self.emit_column_header(w, table, true, &percent_base, &event_names)?;
            self.emit_tree(w, table, 0, -1, &percent_base, utr_overhead, &event_names)?;

            // Two clock reads bracket every completed start/stop pair.
            let mut sum = 0.0;
            let mut totcount: u64 = 0;
            for region in &table.arena[1..] {
                sum += region.count as f64 * 2.0 * utr_overhead;
                totcount += region.count;
            }
            overhead_sums[t] = sum;
            if self.opts.wall && self.opts.overhead {
                writeln!(w)?;
            }
            writeln!(w, "Overhead sum = {} wallclock seconds", fmt_general(sum))?;
            if totcount < PRINT_THRESHOLD {
                writeln!(w, "Total calls  = {totcount}")?;
            } else {
                writeln!(w, "Total calls  = {:9.3e}", totcount as f64)?;
            }
        }

        if self.opts.print_threadsort && nthreads > 1 {
            self.emit_threadsort(w, &tables, &percent_base, utr_overhead, &overhead_sums, &event_names)?;
        }

        if self.opts.print_multparent {
            self.emit_multparent(w, &tables)?;
        }

        if self.opts.print_collisions {
            self.emit_collisions(w, &tables)?;
        }

        if self.opts.print_memusage {
            self.emit_memusage(w, &tables)?;
        }

        writeln!(w)?;
        writeln!(w, "Thread mapping:")?;
        for t in 0..nthreads {
            writeln!(w, "thread[{t}] = {}", self.registry.token(t))?;
        }
        Ok(())
    }

    fn emit_preamble(&self, w: &mut dyn Write, utr_overhead: f64) -> Result<(), Error> {
        if self.clock.id() == crate::clock::ClockId::Nanotime {
            let (mhz, source) = self.clock.freq();
            writeln!(w, "Clock rate = {mhz:.6} MHz")?;
            writeln!(w, "Source of clock rate was {source}")?;
            if source == "/proc/cpuinfo" {
                writeln!(
                    w,
                    "WARNING: The contents of /proc/cpuinfo can change in variable frequency CPUs"
                )?;
                writeln!(
                    w,
                    "Therefore the use of nanotime (register read) is not recommended on machines so equipped"
                )?;
            }
        }
        writeln!(w, "Threading was {}", self.registry.mode().name())?;
        writeln!(w, "Underlying timing routine was {}.", self.clock.name())?;
        writeln!(w, "Per-call utr overhead est: {utr_overhead:.3e} sec.")?;
        if self.opts.print_preamble {
            writeln!(
                w,
                "If overhead stats are printed, roughly half the estimated number is\n\
                 embedded in the wallclock stats for each timer.\n\
                 Print method was {}.",
                self.opts.method.name()
            )?;
            writeln!(
                w,
                "If a '%_of' field is present, it is w.r.t. the first timer for thread 0.\n\n\
                 A '*' in column 1 below means the timer had multiple parents, though the\n\
                 values printed are for all calls.\n\
                 Further down the listing may be more detailed information about multiple\n\
                 parents. Look for 'Multiple parent info'\n"
            )?;
        }
        Ok(())
    }

    fn emit_column_header(
        &self,
        w: &mut dyn Write,
        table: &ThreadTable,
        indented: bool,
        percent_base: &Option<(String, f64)>,
        event_names: &[String],
    ) -> Result<(), Error> {
        if indented {
            // +1 so region names are always indented past the margin.
            write!(w, "{}", "  ".repeat(table.max_depth + 1))?;
        }
        write!(w, "{}", " ".repeat(table.max_name_len))?;
        write!(w, "Called  Recurse ")?;
        if self.opts.cpu {
            write!(w, "{CPU_HEADER}")?;
        }
        if self.opts.wall {
            write!(w, "{WALL_HEADER}")?;
            if self.opts.percent {
                if let Some((name, _)) = percent_base {
                    write!(w, "%_of_{:5.5} ", name)?;
                }
            }
            if self.opts.overhead {
                write!(w, "{OVERHEAD_HEADER}")?;
            }
        }
        for name in event_names {
            write!(w, "{name:>15} ")?;
        }
        writeln!(w)?;
        Ok(())
    }

    /// Depth-first walk printing `idx` (unless it is the sentinel, flagged
    /// by `depth == -1`) and then its children.
    #[allow(clippy::too_many_arguments)]
    fn emit_tree(
        &self,
        w: &mut dyn Write,
        table: &ThreadTable,
        idx: usize,
        depth: i32,
        percent_base: &Option<(String, f64)>,
        utr_overhead: f64,
        event_names: &[String],
    ) -> Result<(), Error> {
        if depth > -1 {
            self.emit_stats(
                w,
                table,
                &table.arena[idx],
                depth as usize,
                true,
                percent_base,
                utr_overhead,
                event_names,
            )?;
        }
        for &child in &table.arena[idx].children {
            self.emit_tree(w, table, child, depth + 1, percent_base, utr_overhead, event_names)?;
        }
        Ok(())
    }

    /// One statistics row.
    #[allow(clippy::too_many_arguments)]
    fn emit_stats(
        &self,
        w: &mut dyn Write,
        table: &ThreadTable,
        region: &Region,
        depth: usize,
        indented: bool,
        percent_base: &Option<(String, f64)>,
        utr_overhead: f64,
        event_names: &[String],
    ) -> Result<(), Error> {
        if region.onflg && self.opts.verbose {
            log::warn!("region '{}' had not been turned off", region.name);
        }

        if indented {
            if region.parents.len() > 1 {
                write!(w, "* ")?;
            } else {
                write!(w, "  ")?;
            }
            write!(w, "{}", "  ".repeat(depth))?;
        }

        write!(w, "{}", region.name)?;
        write!(w, "{}", " ".repeat(table.max_name_len.saturating_sub(region.name.len())))?;
        if indented {
            write!(w, "{}", "  ".repeat(table.max_depth.saturating_sub(depth)))?;
        }

        write!(w, "{}", fmt_called_recurse(region.count, region.nrecurse))?;

        if self.opts.cpu {
            let ticks = self.ticks_per_sec as f64;
            let usr = region.cpu.accum_user as f64 / ticks;
            let sys = region.cpu.accum_sys as f64 / ticks;
            write!(w, "{usr:9.3} {sys:9.3} {:9.3} ", usr + sys)?;
        }

        if self.opts.wall {
            write!(w, "{}", fmt_wall(region.wall.accum))?;
            write!(w, "{}", fmt_wall(region.wall.max))?;
            write!(w, "{}", fmt_wall(region.wall.min))?;

            if self.opts.percent {
                if let Some((_, base)) = percent_base {
                    let ratio = if *base > 0.0 {
                        region.wall.accum * 100.0 / base
                    } else {
                        0.0
                    };
                    write!(w, " {ratio:9.2} ")?;
                }
            }

            if self.opts.overhead {
                write!(w, "{:13.3} ", region.count as f64 * 2.0 * utr_overhead)?;
            }
        }

        for (e, _) in event_names.iter().enumerate() {
            write!(w, "{:>15} ", region.aux.accum[e])?;
        }

        writeln!(w)?;
        Ok(())
    }

    fn emit_threadsort(
        &self,
        w: &mut dyn Write,
        tables: &[ThreadTable],
        percent_base: &Option<(String, f64)>,
        utr_overhead: f64,
        overhead_sums: &[f64],
        event_names: &[String],
    ) -> Result<(), Error> {
        writeln!(w, "\nSame stats sorted by timer for threaded regions:")?;
        write!(w, "Thd ")?;
        self.emit_column_header(w, &tables[0], false, percent_base, event_names)?;

        // Walk thread 0's regions in first-start order; regions that only
        // exist on other threads are not listed here.
        for region in &tables[0].arena[1..] {
            let mut sumstats = region.clone();
            let mut first = true;
            let mut foundany = false;
            for (t, table) in tables.iter().enumerate().skip(1) {
                let found = table.arena[1..].iter().find(|r| r.name == region.name);
                if let Some(other) = found {
                    if first {
                        first = false;
                        write!(w, "{:03} ", 0)?;
                        self.emit_stats(
                            w,
                            &tables[0],
                            region,
                            0,
                            false,
                            percent_base,
                            utr_overhead,
                            event_names,
                        )?;
                    }
                    foundany = true;
                    write!(w, "{t:03} ")?;
                    self.emit_stats(
                        w,
                        &tables[0],
                        other,
                        0,
                        false,
                        percent_base,
                        utr_overhead,
                        event_names,
                    )?;
                    add(&mut sumstats, other, self.opts.wall, self.opts.cpu);
                }
            }
            if foundany {
                write!(w, "SUM ")?;
                self.emit_stats(
                    w,
                    &tables[0],
                    &sumstats,
                    0,
                    false,
                    percent_base,
                    utr_overhead,
                    event_names,
                )?;
                writeln!(w)?;
            }
        }

        if self.opts.wall && self.opts.overhead {
            let mut total = 0.0;
            for (t, sum) in overhead_sums.iter().enumerate() {
                writeln!(
                    w,
                    "OVERHEAD.{t:03} (wallclock seconds) = {}",
                    fmt_general(*sum)
                )?;
                total += sum;
            }
            writeln!(
                w,
                "OVERHEAD.SUM (wallclock seconds) = {}",
                fmt_general(total)
            )?;
        }
        Ok(())
    }

    fn emit_multparent(&self, w: &mut dyn Write, tables: &[ThreadTable]) -> Result<(), Error> {
        for (t, table) in tables.iter().enumerate() {
            let multi: Vec<&Region> = table.arena[1..]
                .iter()
                .filter(|r| r.parents.len() > 1)
                .collect();
            if multi.is_empty() {
                continue;
            }

            writeln!(w, "\nMultiple parent info for thread {t}:")?;
            if self.opts.print_preamble && t == 0 {
                writeln!(
                    w,
                    "Columns are count and name for the listed child\n\
                     Rows are each parent, with their common child being the last entry, \
                     which is indented.\n\
                     Count next to each parent is the number of times it called the child.\n\
                     Count next to child is total number of times it was called by the \
                     listed parents.\n"
                )?;
            }

            for region in multi {
                if region.norphan > 0 {
                    writeln!(w, "{} {:<32}", fmt_count(region.norphan, 8), "ORPHAN")?;
                }
                for (n, &parent) in region.parents.iter().enumerate() {
                    writeln!(
                        w,
                        "{} {:<32}",
                        fmt_count(region.parent_counts[n], 8),
                        table.arena[parent].name
                    )?;
                }
                writeln!(w, "{}   {:<32}\n", fmt_count(region.count, 8), region.name)?;
            }
        }
        Ok(())
    }

    fn emit_collisions(&self, w: &mut dyn Write, tables: &[ThreadTable]) -> Result<(), Error> {
        for (t, table) in tables.iter().enumerate() {
            let mut first = true;
            let mut totent = 0usize;
            let mut num_zero = 0usize;
            let mut num_one = 0usize;
            let mut num_two = 0usize;
            let mut num_more = 0usize;
            let mut most = 0usize;

            for (i, bucket) in table.buckets.iter().enumerate() {
                let nument = bucket.len();
                if nument > 1 {
                    totent += nument - 1;
                    if first {
                        first = false;
                        writeln!(w, "\nthread {t} had some hash collisions:")?;
                    }
                    write!(w, "hashtable[{t}][{i}] had {nument} entries:")?;
                    for &idx in bucket {
                        write!(w, " {}", table.arena[idx].name)?;
                    }
                    writeln!(w)?;
                }
                match nument {
                    0 => num_zero += 1,
                    1 => num_one += 1,
                    2 => num_two += 1,
                    _ => num_more += 1,
                }
                most = most.max(nument);
            }

            if totent > 0 {
                writeln!(w, "Total collisions thread {t} = {totent}")?;
                writeln!(w, "Entry information:")?;
                writeln!(
                    w,
                    "num_zero = {num_zero} num_one = {num_one} num_two = {num_two} num_more = {num_more}"
                )?;
                writeln!(w, "Most = {most}")?;
            }
        }
        writeln!(w, "Size of hash table was {}", self.opts.tablesize)?;
        Ok(())
    }

    fn emit_memusage(&self, w: &mut dyn Write, tables: &[ThreadTable]) -> Result<(), Error> {
        let bucket_size = std::mem::size_of::<Vec<usize>>();
        let mut hashmem = (bucket_size * self.opts.tablesize * self.registry.max()) as f64;
        let mut regionmem = 0.0;
        let mut pchmem = 0.0;
        for table in tables {
            let numtimers = table.nregions();
            hashmem += (numtimers * std::mem::size_of::<usize>()) as f64;
            regionmem += (numtimers * std::mem::size_of::<Region>()) as f64;
            for region in &table.arena[1..] {
                pchmem += ((region.parents.len() + region.children.len())
                    * std::mem::size_of::<usize>()
                    + region.parent_counts.len() * std::mem::size_of::<u64>())
                    as f64;
            }
        }
        let totmem = hashmem + regionmem + pchmem;
        writeln!(w)?;
        writeln!(w, "Total memory usage = {:.3} KB", totmem * 0.001)?;
        writeln!(w, "Components:")?;
        writeln!(w, "Hashmem             = {:.3} KB", hashmem * 0.001)?;
        writeln!(w, "Regionmem           = {:.3} KB", regionmem * 0.001)?;
        writeln!(w, "Parent/child arrays = {:.3} KB", pchmem * 0.001)?;
        Ok(())
    }
}
