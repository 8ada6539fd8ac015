//! Back-off probability estimation.
//!
//! A `ProbabilityStructure` describes how one kind of trainer event is
//! projected into (history, future) pairs at each back-off level. Level 0 is
//! the most specific context; every following level drops conditioning
//! information, and the last level is generic enough that its counts are
//! always populated once training has seen the future at all.
//!
//! `Model` combines the per-level relative frequencies with deleted
//! interpolation:
//!
//! ```text
//! lambda_L = c(h_L) / (c(h_L) + ff * u(h_L) + ft)     (1 on the last level)
//! p        = sum_L  prod_{j<L} (1 - lambda_j) * lambda_L * c(h_L, f_L) / c(h_L)
//! ```
//!
//! where `u(h)` is the number of distinct futures seen with `h`. A level
//! whose history was never observed contributes nothing and passes all of
//! its weight to the next level.

use crate::event::{Event, Transition};
use crate::intern::EventInterner;
use crate::semiring::LOG_OF_ZERO;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Default diversity multiplier.
pub const DEFAULT_LAMBDA_FUDGE: f64 = 5.0;

/// Smoothing constants shared by every level of a structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothing {
    pub fudge: f64,
    pub fudge_term: f64,
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing {
            fudge: DEFAULT_LAMBDA_FUDGE,
            fudge_term: 0.0,
        }
    }
}

/// The back-off ladder for one kind of event.
///
/// Projections borrow the event and build fresh histories and futures; they
/// never modify the event they read.
pub trait ProbabilityStructure: Send + Sync {
    /// The trainer event this structure estimates.
    type Event;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// How many back-off levels exist.
    fn num_levels(&self) -> usize;

    /// Conditioning context at `level`.
    fn history(&self, event: &Self::Event, level: usize) -> Event;

    /// Predicted symbol at `level`.
    fn future(&self, event: &Self::Event, level: usize) -> Event;

    /// Smoothing constants.
    fn smoothing(&self) -> Smoothing {
        Smoothing::default()
    }

    /// Diversity multiplier at `level`.
    fn lambda_fudge(&self, _level: usize) -> f64 {
        self.smoothing().fudge
    }

    /// Additive term at `level`.
    fn lambda_fudge_term(&self, _level: usize) -> f64 {
        self.smoothing().fudge_term
    }
}

/// Counts observed with one history.
#[derive(Debug, Clone, Default)]
pub struct HistoryCounts {
    total: f64,
    futures: FxHashMap<Arc<Event>, f64>,
}

impl HistoryCounts {
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of distinct futures seen with this history.
    pub fn diversity(&self) -> usize {
        self.futures.len()
    }

    pub fn count(&self, future: &Event) -> f64 {
        self.futures.get(future).copied().unwrap_or(0.0)
    }
}

/// Trained counts for one back-off level.
#[derive(Debug, Clone, Default)]
pub struct CountsTable {
    histories: FxHashMap<Arc<Event>, HistoryCounts>,
}

impl CountsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` observations of a transition.
    pub fn add(&mut self, transition: &Transition, count: f64) {
        let entry = self.histories.entry(transition.history.clone()).or_default();
        entry.total += count;
        *entry.futures.entry(transition.future.clone()).or_insert(0.0) += count;
    }

    /// Counts for `history`, if it was ever observed.
    pub fn history(&self, history: &Event) -> Option<&HistoryCounts> {
        self.histories.get(history)
    }

    /// c(history)
    pub fn history_count(&self, history: &Event) -> f64 {
        self.history(history).map_or(0.0, HistoryCounts::total)
    }

    /// c(history, future)
    pub fn count(&self, history: &Event, future: &Event) -> f64 {
        self.history(history).map_or(0.0, |h| h.count(future))
    }

    /// c(transition)
    pub fn transition_count(&self, transition: &Transition) -> f64 {
        self.count(&transition.history, &transition.future)
    }

    /// Number of distinct histories.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Every stored transition with its count, in unspecified order.
    pub fn transitions(&self) -> impl Iterator<Item = (Transition, f64)> + '_ {
        self.histories.iter().flat_map(|(history, counts)| {
            counts
                .futures
                .iter()
                .map(move |(future, &c)| (Transition::new(history.clone(), future.clone()), c))
        })
    }
}

/// Accumulates counts for a structure before freezing them into a `Model`.
pub struct ModelBuilder<S: ProbabilityStructure> {
    structure: S,
    levels: Vec<CountsTable>,
    interner: EventInterner,
    observations: f64,
}

impl<S: ProbabilityStructure> ModelBuilder<S> {
    pub fn new(structure: S) -> Self {
        let levels = (0..structure.num_levels()).map(|_| CountsTable::new()).collect();
        ModelBuilder {
            structure,
            levels,
            interner: EventInterner::new(),
            observations: 0.0,
        }
    }

    /// Record `count` observations of `event` at every level.
    pub fn observe(&mut self, event: &S::Event, count: f64) {
        for (level, table) in self.levels.iter_mut().enumerate() {
            let history = self.interner.intern(self.structure.history(event, level));
            let future = self.interner.intern(self.structure.future(event, level));
            table.add(&Transition::new(history, future), count);
        }
        self.observations += count;
    }

    /// Freeze the counts.
    pub fn build(self) -> Model<S> {
        debug!(
            model = self.structure.name(),
            observations = self.observations,
            shared_events = self.interner.len(),
            "built model"
        );
        Model {
            structure: self.structure,
            levels: self.levels,
        }
    }
}

/// A structure with frozen counts. Immutable and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Model<S: ProbabilityStructure> {
    structure: S,
    levels: Vec<CountsTable>,
}

impl<S: ProbabilityStructure> Model<S> {
    pub fn structure(&self) -> &S {
        &self.structure
    }

    /// Counts at `level`.
    pub fn counts(&self, level: usize) -> &CountsTable {
        &self.levels[level]
    }

    /// Smoothed probability of the event's future given its history.
    pub fn estimate_prob(&self, event: &S::Event) -> f64 {
        let last = self.levels.len().saturating_sub(1);
        let mut prob = 0.0;
        let mut remaining = 1.0;

        for (level, table) in self.levels.iter().enumerate() {
            let history = self.structure.history(event, level);
            let counts = match table.history(&history) {
                Some(counts) if counts.total() > 0.0 => counts,
                _ => continue,
            };

            let total = counts.total();
            let lambda = if level == last {
                1.0
            } else {
                let diversity = counts.diversity() as f64;
                total
                    / (total
                        + self.structure.lambda_fudge(level) * diversity
                        + self.structure.lambda_fudge_term(level))
            };

            let future = self.structure.future(event, level);
            let estimate = counts.count(&future) / total;
            prob += remaining * lambda * estimate;
            remaining *= 1.0 - lambda;
            if remaining <= 0.0 {
                break;
            }
        }
        prob
    }

    /// Smoothed log probability; `LOG_OF_ZERO` when the future was never
    /// seen at any level.
    pub fn estimate_log_prob(&self, event: &S::Event) -> f64 {
        let prob = self.estimate_prob(event);
        if prob > 0.0 {
            prob.ln()
        } else {
            LOG_OF_ZERO
        }
    }
}
