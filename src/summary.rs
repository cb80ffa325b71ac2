//! Per-rank records for an interprocess summary.
//!
//! The reduction itself (log-depth tree merge across ranks, root-side
//! printing) belongs to an external collaborator; the core only produces
//! the per-rank record and knows how to fold two records together. The
//! mean/M2 pair follows the Chan et al. parallel update so the merged
//! record carries a running mean and standard deviation of per-rank
//! wall-max values.

use crate::engine::Timing;
use crate::region::truncate_name;

/// Extremes of one hardware-counter event across threads/ranks, with the
/// (rank, thread) that produced them.
#[derive(Debug, Clone)]
pub struct EventExtrema {
    pub name: String,
    pub max: f64,
    pub max_rank: usize,
    pub max_thread: usize,
    pub min: f64,
    pub min_rank: usize,
    pub min_thread: usize,
}

/// One region's statistics aggregated over all threads of one rank,
/// mergeable across ranks by name.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub name: String,
    /// Calls summed over threads and merged ranks.
    pub totcalls: u64,
    /// Number of ranks that invoked this region.
    pub ntasks: u32,
    pub wallmax: f64,
    pub wallmax_rank: usize,
    pub wallmax_thread: usize,
    pub wallmin: f64,
    pub wallmin_rank: usize,
    pub wallmin_thread: usize,
    /// Running mean of per-rank wall-max values.
    pub mean: f64,
    /// Running sum of squared deviations (M2).
    pub m2: f64,
    pub events: Vec<EventExtrema>,
}

impl GlobalStats {
    /// Fold `other` into `self`. Records must describe the same region
    /// name; extrema keep their producers, calls and task counts add, and
    /// mean/M2 follow the parallel Welford update.
    pub fn merge(&mut self, other: &GlobalStats) {
        debug_assert_eq!(self.name, other.name);
        if other.ntasks == 0 {
            return;
        }
        if self.ntasks == 0 {
            *self = other.clone();
            return;
        }

        self.totcalls += other.totcalls;

        if other.wallmax > self.wallmax {
            self.wallmax = other.wallmax;
            self.wallmax_rank = other.wallmax_rank;
            self.wallmax_thread = other.wallmax_thread;
        }
        if other.wallmin < self.wallmin || self.wallmin == 0.0 {
            self.wallmin = other.wallmin;
            self.wallmin_rank = other.wallmin_rank;
            self.wallmin_thread = other.wallmin_thread;
        }

        for (mine, theirs) in self.events.iter_mut().zip(&other.events) {
            if theirs.max > mine.max {
                mine.max = theirs.max;
                mine.max_rank = theirs.max_rank;
                mine.max_thread = theirs.max_thread;
            }
            if theirs.min < mine.min || mine.min == 0.0 {
                mine.min = theirs.min;
                mine.min_rank = theirs.min_rank;
                mine.min_thread = theirs.min_thread;
            }
        }

        // Chan et al.: combine (n, mean, M2) of two partitions.
        let na = f64::from(self.ntasks);
        let nb = f64::from(other.ntasks);
        let n = na + nb;
        let delta = other.mean - self.mean;
        self.mean += delta * nb / n;
        self.m2 += other.m2 + delta * delta * na * nb / n;
        self.ntasks += other.ntasks;
    }

    /// Sample standard deviation of the per-rank wall-max values folded in
    /// so far.
    pub fn std_dev(&self) -> f64 {
        if self.ntasks > 1 {
            (self.m2 / f64::from(self.ntasks - 1)).sqrt()
        } else {
            0.0
        }
    }
}

impl Timing {
    /// Aggregate `name` across this rank's threads into a mergeable
    /// record. `rank` tags the extrema producers. A region no thread has
    /// seen yields a record with `ntasks == 0`.
    pub fn get_threadstats(&self, rank: usize, name: &str) -> GlobalStats {
        let name = truncate_name(name);
        let nevents = self.adapter.as_ref().map_or(0, |a| a.nevents());
        let mut global = GlobalStats {
            name: name.to_string(),
            totcalls: 0,
            ntasks: 0,
            wallmax: 0.0,
            wallmax_rank: rank,
            wallmax_thread: 0,
            wallmin: 0.0,
            wallmin_rank: rank,
            wallmin_thread: 0,
            mean: 0.0,
            m2: 0.0,
            events: (0..nevents)
                .map(|e| EventExtrema {
                    name: self
                        .adapter
                        .as_ref()
                        .map(|a| a.event_name(e).to_string())
                        .unwrap_or_default(),
                    max: 0.0,
                    max_rank: rank,
                    max_thread: 0,
                    min: 0.0,
                    min_rank: rank,
                    min_thread: 0,
                })
                .collect(),
        };

        let mut found = false;
        for t in 0..self.nthreads() {
            let table = self.snapshot(t);
            let Some(idx) = table.find(name) else {
                continue;
            };
            found = true;
            let region = &table.arena[idx];
            global.totcalls += region.count;

            if region.wall.accum > global.wallmax {
                global.wallmax = region.wall.accum;
                global.wallmax_rank = rank;
                global.wallmax_thread = t;
            }
            if region.wall.accum < global.wallmin || global.wallmin == 0.0 {
                global.wallmin = region.wall.accum;
                global.wallmin_rank = rank;
                global.wallmin_thread = t;
            }

            for (e, extrema) in global.events.iter_mut().enumerate() {
                let value = region.aux.accum[e] as f64;
                if value > extrema.max {
                    extrema.max = value;
                    extrema.max_rank = rank;
                    extrema.max_thread = t;
                }
                if value < extrema.min || extrema.min == 0.0 {
                    extrema.min = value;
                    extrema.min_rank = rank;
                    extrema.min_thread = t;
                }
            }
        }

        if found {
            global.ntasks = 1;
            global.mean = global.wallmax;
            global.m2 = 0.0;
        }
        global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, wallmax: f64, rank: usize) -> GlobalStats {
        GlobalStats {
            name: name.to_string(),
            totcalls: 1,
            ntasks: 1,
            wallmax,
            wallmax_rank: rank,
            wallmax_thread: 0,
            wallmin: wallmax,
            wallmin_rank: rank,
            wallmin_thread: 0,
            mean: wallmax,
            m2: 0.0,
            events: Vec::new(),
        }
    }

    #[test]
    fn merge_tracks_extrema_and_producers() {
        let mut a = record("work", 2.0, 0);
        let b = record("work", 5.0, 3);
        a.merge(&b);
        assert_eq!(a.totcalls, 2);
        assert_eq!(a.ntasks, 2);
        assert_eq!(a.wallmax, 5.0);
        assert_eq!(a.wallmax_rank, 3);
        assert_eq!(a.wallmin, 2.0);
        assert_eq!(a.wallmin_rank, 0);
    }

    #[test]
    fn merge_mean_and_m2_match_direct_computation() {
        let samples = [1.0, 2.0, 3.0, 4.0, 10.0];
        let mut merged = record("w", samples[0], 0);
        for (rank, &s) in samples.iter().enumerate().skip(1) {
            merged.merge(&record("w", s, rank));
        }
        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((merged.mean - mean).abs() < 1.0e-12);

        let m2: f64 = samples.iter().map(|s| (s - mean) * (s - mean)).sum();
        assert!((merged.m2 - m2).abs() < 1.0e-9);
        let sigma = (m2 / (samples.len() as f64 - 1.0)).sqrt();
        assert!((merged.std_dev() - sigma).abs() < 1.0e-9);
    }

    #[test]
    fn merging_an_empty_record_is_a_no_op() {
        let mut a = record("w", 2.0, 0);
        let mut empty = record("w", 0.0, 1);
        empty.ntasks = 0;
        empty.totcalls = 0;
        let before = a.clone();
        a.merge(&empty);
        assert_eq!(a.ntasks, before.ntasks);
        assert_eq!(a.mean, before.mean);
    }

    #[test]
    fn threadstats_sums_across_threads() {
        use crate::clock::ClockId;
        use crate::options::Options;
        let timing = crate::Timing::new(Options {
            time_source: ClockId::ClockGettime,
            ..Options::default()
        })
        .unwrap();
        timing.start("x").unwrap();
        timing.stop("x").unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                timing.start("x").unwrap();
                timing.stop("x").unwrap();
                timing.start("x").unwrap();
                timing.stop("x").unwrap();
            });
        });
        let global = timing.get_threadstats(7, "x");
        assert_eq!(global.totcalls, 3);
        assert_eq!(global.ntasks, 1);
        assert_eq!(global.wallmax_rank, 7);
        assert!(global.wallmax >= global.wallmin);

        let missing = timing.get_threadstats(7, "absent");
        assert_eq!(missing.ntasks, 0);
        assert_eq!(missing.totcalls, 0);
    }
}
