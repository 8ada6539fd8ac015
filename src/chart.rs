//! Span-indexed chart with per-cell beam pruning.
//!
//! Cells are filled in strictly increasing span length. Once every cell of a
//! given length is complete the decoder seals that length, and any later
//! insertion into it is an error.
//!
//! The chart owns one pool reference for every item it stores. `insert`
//! takes over the caller's reference: an item that is pruned, dominated or
//! merged is put back immediately, and an evicted item is put back when it
//! leaves its cell.

use crate::item::{ItemSignature, Span};
use crate::intern::SymbolId;
use crate::pool::{ItemId, ItemPool, PoolError};
use crate::semiring::{LogInside, Semiring, LOG_OF_ZERO};
use crate::settings::Settings;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    #[error("span {span} is outside a sentence of {len} words")]
    InvalidSpan { span: Span, len: usize },
    #[error("cell {0} is sealed")]
    SealedCell(Span),
    #[error("span length {found} sealed out of order, expected {expected}")]
    OutOfOrder { expected: usize, found: usize },
    #[error("stale item {0:?}")]
    StaleItem(ItemId),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// How cells treat competing items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    /// Relative beam, cell limit and dominance: one-best decoding.
    #[default]
    Beam,
    /// No beam and no limit. Equivalent items pool their inside mass.
    Exhaustive,
}

/// Outcome of an insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    /// Stored as a new entry.
    Added,
    /// Stored in place of an equivalent, worse item.
    Replaced,
    /// Folded into an equivalent item (exhaustive mode).
    Merged,
    /// Outside the beam, zero probability, or evicted by the cell limit.
    Pruned,
    /// An equivalent item scores at least as well.
    Dominated,
}

impl Insertion {
    /// Whether the inserted item itself is now in the chart.
    pub fn is_stored(self) -> bool {
        matches!(self, Insertion::Added | Insertion::Replaced)
    }
}

/// Pruning parameters fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChartParams {
    pub mode: ChartMode,
    pub prune_margin: Option<f64>,
    pub cell_limit: Option<usize>,
    pub size: usize,
}

impl ChartParams {
    pub fn from_settings(settings: &Settings) -> Self {
        let beam = settings.chart_mode == ChartMode::Beam;
        ChartParams {
            mode: settings.chart_mode,
            prune_margin: settings.prune_margin().filter(|_| beam),
            cell_limit: settings.cell_limit().filter(|_| beam),
            size: settings.chart_size,
        }
    }
}

/// Counters kept across the whole sentence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChartStats {
    pub added: usize,
    pub replaced: usize,
    pub merged: usize,
    pub pruned: usize,
    pub dominated: usize,
    pub evicted: usize,
}

#[derive(Debug)]
struct Cell {
    items: Vec<ItemId>,
    max_log_prob: f64,
    by_signature: FxHashMap<ItemSignature, ItemId>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            items: Vec::new(),
            max_log_prob: LOG_OF_ZERO,
            by_signature: FxHashMap::default(),
        }
    }
}

impl Cell {
    fn remove(&mut self, id: ItemId, signature: &ItemSignature) {
        self.items.retain(|&other| other != id);
        if self.by_signature.get(signature) == Some(&id) {
            self.by_signature.remove(signature);
        }
    }

    fn clear(&mut self) -> Vec<ItemId> {
        self.max_log_prob = LOG_OF_ZERO;
        self.by_signature.clear();
        std::mem::take(&mut self.items)
    }
}

/// Triangular chart over one sentence: `cells[start][end]`.
#[derive(Debug)]
pub struct Chart {
    params: ChartParams,
    cells: Vec<Vec<Cell>>,
    n: usize,
    sealed: usize,
    stats: ChartStats,
}

impl Chart {
    pub fn new(params: ChartParams) -> Self {
        let mut chart = Chart {
            params,
            cells: Vec::new(),
            n: 0,
            sealed: 0,
            stats: ChartStats::default(),
        };
        chart.grow(params.size);
        chart
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(ChartParams::from_settings(settings))
    }

    pub fn params(&self) -> &ChartParams {
        &self.params
    }

    pub fn mode(&self) -> ChartMode {
        self.params.mode
    }

    /// Sentence length the chart is currently set up for.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Longest span length sealed so far.
    pub fn sealed_length(&self) -> usize {
        self.sealed
    }

    pub fn stats(&self) -> &ChartStats {
        &self.stats
    }

    fn grow(&mut self, n: usize) {
        if self.cells.len() < n + 1 {
            self.cells.resize_with(n + 1, Vec::new);
        }
        for row in &mut self.cells {
            if row.len() < n + 1 {
                row.resize_with(n + 1, Cell::default);
            }
        }
    }

    /// Recycle every item and prepare for a sentence of `n` words.
    pub fn reset(&mut self, n: usize, pool: &mut ItemPool) -> Result<(), ChartError> {
        self.clear(pool)?;
        self.grow(n);
        self.n = n;
        Ok(())
    }

    /// Put every stored item back into the pool.
    pub fn clear(&mut self, pool: &mut ItemPool) -> Result<(), ChartError> {
        for start in 0..self.n {
            for end in start + 1..=self.n {
                let items = self.cells[start][end].clear();
                pool.put_back_all(items)?;
            }
        }
        self.sealed = 0;
        self.stats = ChartStats::default();
        Ok(())
    }

    fn check_span(&self, span: Span) -> Result<(), ChartError> {
        if span.start >= span.end || span.end > self.n {
            return Err(ChartError::InvalidSpan { span, len: self.n });
        }
        Ok(())
    }

    fn cell(&self, span: Span) -> &Cell {
        &self.cells[span.start][span.end]
    }

    fn cell_mut(&mut self, span: Span) -> &mut Cell {
        &mut self.cells[span.start][span.end]
    }

    /// Items currently stored for `span`, in insertion order.
    pub fn items(&self, span: Span) -> &[ItemId] {
        if self.check_span(span).is_err() {
            return &[];
        }
        &self.cell(span).items
    }

    pub fn holds(&self, span: Span, id: ItemId) -> bool {
        self.items(span).contains(&id)
    }

    /// Best score stored for `span`.
    pub fn max_log_prob(&self, span: Span) -> f64 {
        if self.check_span(span).is_err() {
            return LOG_OF_ZERO;
        }
        self.cell(span).max_log_prob
    }

    /// Whether an item scoring `log_prob` would be pruned on arrival.
    pub fn outside_beam(&self, span: Span, log_prob: f64) -> bool {
        if self.params.mode == ChartMode::Exhaustive {
            return false;
        }
        if log_prob == LOG_OF_ZERO {
            return true;
        }
        match self.params.prune_margin {
            Some(margin) => log_prob < self.max_log_prob(span) - margin,
            None => false,
        }
    }

    /// Store `id` in the cell for `span`, taking over the caller's pool
    /// reference.
    pub fn insert(&mut self, span: Span, id: ItemId, pool: &mut ItemPool) -> Result<Insertion, ChartError> {
        self.insert_with(span, id, pool, true)
    }

    /// Store `id` without applying the beam or the cell limit. Used for the
    /// top items over the whole sentence, which nothing is built from.
    pub fn insert_unpruned(&mut self, span: Span, id: ItemId, pool: &mut ItemPool) -> Result<Insertion, ChartError> {
        self.insert_with(span, id, pool, false)
    }

    fn insert_with(
        &mut self,
        span: Span,
        id: ItemId,
        pool: &mut ItemPool,
        prune: bool,
    ) -> Result<Insertion, ChartError> {
        self.check_span(span)?;
        if span.len() <= self.sealed {
            return Err(ChartError::SealedCell(span));
        }
        let item = pool.get(id).ok_or(ChartError::StaleItem(id))?;
        let log_prob = item.log_prob;
        let inside = item.inside_log_prob;
        let signature = item.signature();

        if log_prob == LOG_OF_ZERO || (prune && self.outside_beam(span, log_prob)) {
            pool.put_back(id)?;
            self.stats.pruned += 1;
            return Ok(Insertion::Pruned);
        }

        match self.params.mode {
            ChartMode::Beam => self.insert_beam(span, id, log_prob, signature, pool, prune),
            ChartMode::Exhaustive => self.insert_exhaustive(span, id, log_prob, inside, signature, pool),
        }
    }

    fn insert_beam(
        &mut self,
        span: Span,
        id: ItemId,
        log_prob: f64,
        signature: ItemSignature,
        pool: &mut ItemPool,
        prune: bool,
    ) -> Result<Insertion, ChartError> {
        let mut outcome = Insertion::Added;
        if let Some(&existing) = self.cell(span).by_signature.get(&signature) {
            let existing_log_prob = pool.get(existing).ok_or(ChartError::StaleItem(existing))?.log_prob;
            if log_prob <= existing_log_prob {
                pool.put_back(id)?;
                self.stats.dominated += 1;
                return Ok(Insertion::Dominated);
            }
            self.cell_mut(span).remove(existing, &signature);
            pool.put_back(existing)?;
            outcome = Insertion::Replaced;
        }

        let cell = self.cell_mut(span);
        cell.items.push(id);
        cell.by_signature.insert(signature, id);
        if !prune {
            self.record(outcome);
            return Ok(outcome);
        }

        if log_prob > cell.max_log_prob {
            cell.max_log_prob = log_prob;
            if let Some(margin) = self.params.prune_margin {
                self.evict_below(span, log_prob - margin, pool)?;
            }
        }

        if let Some(limit) = self.params.cell_limit {
            while self.cell(span).items.len() > limit {
                let lowest = self.lowest(span, pool)?;
                self.evict(span, lowest, pool)?;
                if lowest == id {
                    self.stats.pruned += 1;
                    return Ok(Insertion::Pruned);
                }
            }
        }

        self.record(outcome);
        Ok(outcome)
    }

    fn record(&mut self, outcome: Insertion) {
        match outcome {
            Insertion::Replaced => self.stats.replaced += 1,
            _ => self.stats.added += 1,
        }
    }

    fn insert_exhaustive(
        &mut self,
        span: Span,
        id: ItemId,
        log_prob: f64,
        inside: f64,
        signature: ItemSignature,
        pool: &mut ItemPool,
    ) -> Result<Insertion, ChartError> {
        let existing = match self.cell(span).by_signature.get(&signature) {
            Some(&existing) => existing,
            None => {
                let cell = self.cell_mut(span);
                cell.items.push(id);
                cell.by_signature.insert(signature, id);
                cell.max_log_prob = cell.max_log_prob.max(log_prob);
                self.stats.added += 1;
                return Ok(Insertion::Added);
            }
        };

        let old = pool.get(existing).ok_or(ChartError::StaleItem(existing))?;
        let total = (LogInside::from_log_prob(old.inside_log_prob) + LogInside::from_log_prob(inside)).log_prob();

        // The better derivation keeps the entry; the pooled mass goes with it.
        let (keep, release) = if log_prob > old.log_prob {
            let cell = self.cell_mut(span);
            cell.remove(existing, &signature);
            cell.items.push(id);
            cell.by_signature.insert(signature, id);
            cell.max_log_prob = cell.max_log_prob.max(log_prob);
            (id, existing)
        } else {
            (existing, id)
        };
        if let Some(kept) = pool.get_mut(keep) {
            kept.inside_log_prob = total;
        }
        pool.put_back(release)?;
        self.stats.merged += 1;
        Ok(Insertion::Merged)
    }

    fn lowest(&self, span: Span, pool: &ItemPool) -> Result<ItemId, ChartError> {
        let mut lowest: Option<(ItemId, f64)> = None;
        for &id in &self.cell(span).items {
            let log_prob = pool.get(id).ok_or(ChartError::StaleItem(id))?.log_prob;
            // Ties go to the latest arrival.
            if lowest.map_or(true, |(_, best)| log_prob.total_cmp(&best).is_le()) {
                lowest = Some((id, log_prob));
            }
        }
        lowest.map(|(id, _)| id).ok_or(ChartError::InvalidSpan { span, len: self.n })
    }

    fn evict(&mut self, span: Span, id: ItemId, pool: &mut ItemPool) -> Result<(), ChartError> {
        let signature = pool.get(id).ok_or(ChartError::StaleItem(id))?.signature();
        self.cell_mut(span).remove(id, &signature);
        pool.put_back(id)?;
        self.stats.evicted += 1;
        trace!(%span, "evicted item");
        Ok(())
    }

    fn evict_below(&mut self, span: Span, threshold: f64, pool: &mut ItemPool) -> Result<(), ChartError> {
        let mut doomed = Vec::new();
        for &id in &self.cell(span).items {
            let item = pool.get(id).ok_or(ChartError::StaleItem(id))?;
            if item.log_prob < threshold {
                doomed.push(id);
            }
        }
        for id in doomed {
            self.evict(span, id, pool)?;
        }
        Ok(())
    }

    /// Mark every span of length `len` complete.
    pub fn seal_length(&mut self, len: usize) -> Result<(), ChartError> {
        if len != self.sealed + 1 {
            return Err(ChartError::OutOfOrder {
                expected: self.sealed + 1,
                found: len,
            });
        }
        self.sealed = len;
        debug!(len, items = self.num_items_of_length(len), "sealed span length");
        Ok(())
    }

    fn num_items_of_length(&self, len: usize) -> usize {
        (0..=self.n.saturating_sub(len))
            .map(|start| self.items(Span { start, end: start + len }).len())
            .sum()
    }

    /// Items stored across all cells.
    pub fn num_items(&self) -> usize {
        (1..=self.n).map(|len| self.num_items_of_length(len)).sum()
    }

    /// Best sentence-spanning item labelled `top`.
    pub fn best_item(&self, top: SymbolId, pool: &ItemPool) -> Option<ItemId> {
        if self.n == 0 {
            return None;
        }
        let mut best: Option<(ItemId, f64)> = None;
        for &id in self.items(Span::new(0, self.n)) {
            let item = match pool.get(id) {
                Some(item) if item.label == top => item,
                _ => continue,
            };
            if best.map_or(true, |(_, lp)| item.log_prob > lp) {
                best = Some((id, item.log_prob));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Semiring sum over the cell's items.
    pub fn cell_total<S: Semiring>(&self, span: Span, pool: &ItemPool) -> S {
        self.items(span)
            .iter()
            .filter_map(|&id| pool.get(id))
            .fold(S::zero(), |acc, item| acc + S::from_log_prob(item.inside_log_prob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Word;
    use crate::intern::SymbolTable;
    use crate::item::Item;
    use crate::semiring::Viterbi;

    struct Fixture {
        table: SymbolTable,
        pool: ItemPool,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                table: SymbolTable::new(),
                pool: ItemPool::new(16, None),
            }
        }

        /// A preterminal over `position` whose signature depends on `tag`.
        fn item(&mut self, position: usize, tag: &str, log_prob: f64) -> ItemId {
            let word = Word::new(self.table.intern("w"), self.table.intern(tag));
            self.pool.allocate(Item::preterminal(position, word, log_prob)).unwrap()
        }
    }

    fn params(mode: ChartMode, margin: Option<f64>, limit: Option<usize>) -> ChartParams {
        ChartParams {
            mode,
            prune_margin: margin,
            cell_limit: limit,
            size: 4,
        }
    }

    #[test]
    fn test_relative_beam() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, Some(2.0), None));
        chart.reset(3, &mut f.pool).unwrap();
        let span = Span::new(0, 1);

        let a = f.item(0, "A", -1.0);
        assert_eq!(chart.insert(span, a, &mut f.pool).unwrap(), Insertion::Added);
        let b = f.item(0, "B", -2.5);
        assert_eq!(chart.insert(span, b, &mut f.pool).unwrap(), Insertion::Added);
        let c = f.item(0, "C", -3.5);
        assert_eq!(chart.insert(span, c, &mut f.pool).unwrap(), Insertion::Pruned);
        assert!(!f.pool.is_live(c));
        assert!(chart.outside_beam(span, -3.5));
        assert!(!chart.outside_beam(span, -2.9));

        // A new best raises the floor and evicts b.
        let d = f.item(0, "D", 0.0);
        chart.insert(span, d, &mut f.pool).unwrap();
        assert_eq!(chart.items(span), &[a, d]);
        assert!(!f.pool.is_live(b));
        assert_eq!(chart.stats().evicted, 1);

        for &id in chart.items(span) {
            let lp = f.pool.get(id).unwrap().log_prob;
            assert!(lp >= chart.max_log_prob(span) - 2.0);
        }
    }

    #[test]
    fn test_cell_limit_evicts_lowest() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, None, Some(2)));
        chart.reset(2, &mut f.pool).unwrap();
        let span = Span::new(1, 2);

        let a = f.item(1, "A", -1.0);
        let b = f.item(1, "B", -3.0);
        let c = f.item(1, "C", -2.0);
        chart.insert(span, a, &mut f.pool).unwrap();
        chart.insert(span, b, &mut f.pool).unwrap();
        assert_eq!(chart.insert(span, c, &mut f.pool).unwrap(), Insertion::Added);
        assert_eq!(chart.items(span), &[a, c]);

        let d = f.item(1, "D", -5.0);
        assert_eq!(chart.insert(span, d, &mut f.pool).unwrap(), Insertion::Pruned);
        assert_eq!(chart.items(span).len(), 2);
        assert_eq!(f.pool.live_count(), 2);
    }

    #[test]
    fn test_dominance() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, None, None));
        chart.reset(1, &mut f.pool).unwrap();
        let span = Span::new(0, 1);

        let a = f.item(0, "NN", -2.0);
        chart.insert(span, a, &mut f.pool).unwrap();
        let worse = f.item(0, "NN", -3.0);
        assert_eq!(chart.insert(span, worse, &mut f.pool).unwrap(), Insertion::Dominated);
        let tie = f.item(0, "NN", -2.0);
        assert_eq!(chart.insert(span, tie, &mut f.pool).unwrap(), Insertion::Dominated);
        let better = f.item(0, "NN", -1.0);
        assert_eq!(chart.insert(span, better, &mut f.pool).unwrap(), Insertion::Replaced);

        assert_eq!(chart.items(span), &[better]);
        assert_eq!(f.pool.live_count(), 1);
    }

    #[test]
    fn test_exhaustive_merges_inside_mass() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Exhaustive, None, None));
        chart.reset(1, &mut f.pool).unwrap();
        let span = Span::new(0, 1);

        let half = 0.5f64.ln();
        let a = f.item(0, "NN", half);
        let b = f.item(0, "NN", half);
        let far = f.item(0, "VB", -1.0);
        assert_eq!(chart.insert(span, a, &mut f.pool).unwrap(), Insertion::Added);
        assert_eq!(chart.insert(span, b, &mut f.pool).unwrap(), Insertion::Merged);
        assert_eq!(chart.insert(span, far, &mut f.pool).unwrap(), Insertion::Added);
        assert!(!chart.outside_beam(span, -1000.0));

        let merged = f.pool.get(a).unwrap();
        assert!(merged.inside_log_prob.abs() < 1e-12);
        assert!((merged.log_prob - half).abs() < 1e-12);

        let viterbi: Viterbi = chart.cell_total(span, &f.pool);
        assert!(viterbi.value().abs() < 1e-12);
        let inside: LogInside = chart.cell_total(span, &f.pool);
        assert!(inside.value() > 0.0);
    }

    #[test]
    fn test_span_order_is_enforced() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, None, None));
        chart.reset(3, &mut f.pool).unwrap();

        assert_eq!(
            chart.seal_length(2),
            Err(ChartError::OutOfOrder { expected: 1, found: 2 })
        );
        chart.seal_length(1).unwrap();

        let late = f.item(2, "NN", -1.0);
        assert_eq!(
            chart.insert(Span::new(2, 3), late, &mut f.pool),
            Err(ChartError::SealedCell(Span::new(2, 3)))
        );
        assert!(matches!(
            chart.insert(Span::new(2, 5), late, &mut f.pool),
            Err(ChartError::InvalidSpan { .. })
        ));
    }

    #[test]
    fn test_best_item_and_clear() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, None, None));
        chart.reset(1, &mut f.pool).unwrap();
        let span = Span::new(0, 1);
        let top = f.table.intern("TOP");

        assert_eq!(chart.best_item(top, &f.pool), None);
        let a = f.item(0, "TOP", -4.0);
        let b = f.item(0, "NN", -1.0);
        chart.insert(span, a, &mut f.pool).unwrap();
        chart.insert(span, b, &mut f.pool).unwrap();
        assert_eq!(chart.best_item(top, &f.pool), Some(a));
        assert_eq!(chart.num_items(), 2);

        chart.clear(&mut f.pool).unwrap();
        assert_eq!(f.pool.live_count(), 0);
        assert_eq!(chart.sealed_length(), 0);
        assert!(chart.items(span).is_empty());
    }

    #[test]
    fn test_unpruned_insert_bypasses_limit() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Beam, Some(1.0), Some(1)));
        chart.reset(1, &mut f.pool).unwrap();
        let span = Span::new(0, 1);

        let a = f.item(0, "NN", -1.0);
        chart.insert(span, a, &mut f.pool).unwrap();
        let top = f.item(0, "TOP", -9.0);
        assert_eq!(chart.insert_unpruned(span, top, &mut f.pool).unwrap(), Insertion::Added);
        assert_eq!(chart.items(span), &[a, top]);
    }

    #[test]
    fn test_zero_probability_is_never_stored() {
        let mut f = Fixture::new();
        let mut chart = Chart::new(params(ChartMode::Exhaustive, None, None));
        chart.reset(1, &mut f.pool).unwrap();
        let zero = f.item(0, "NN", LOG_OF_ZERO);
        assert_eq!(
            chart.insert(Span::new(0, 1), zero, &mut f.pool).unwrap(),
            Insertion::Pruned
        );
    }
}
