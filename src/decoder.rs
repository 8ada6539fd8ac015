//! Bottom-up chart decoding.
//!
//! Spans are filled in order of increasing length. Length-one cells are
//! seeded with preterminals; longer cells attach a complete modifier to an
//! incomplete head across every split point. Each cell is then closed
//! best-first: sides with no outstanding requirements are stopped, and
//! complete items are projected to their parents.
//!
//! A head is expanded in one fixed order: right modifiers, the right stop,
//! left modifiers, then the left stop. Every tree therefore has exactly one
//! derivation, which keeps merged inside mass exact. When the whole sentence
//! has been covered, complete analyses are wrapped in the top label and the
//! best one is read back as a tree.
//!
//! # Example
//!
//! ```rust
//! use lexparse::decoder::Decoder;
//! use lexparse::grammar::RuleGrammar;
//! use lexparse::settings::Settings;
//!
//! let settings = Settings::default();
//! let mut grammar = RuleGrammar::new(&settings);
//! grammar.lexical("dog", "NN", 1.0).unwrap();
//! grammar.unary("NN", "NP", &[], &[], 1.0).unwrap();
//! grammar.top("NP", 1.0).unwrap();
//!
//! let mut decoder = Decoder::new(grammar, settings).unwrap();
//! let parse = decoder.parse(&["dog"], None).unwrap().unwrap();
//! assert_eq!(parse.tree.to_string(), "(NP (NN dog))");
//! ```

use crate::chart::{Chart, ChartError};
use crate::constraint::{constraints_from_skeleton, ConstraintError, ConstraintSet};
use crate::event::{Side, Word};
use crate::grammar::Grammar;
use crate::intern::SymbolId;
use crate::item::{Interior, Item, ItemKind, Span};
use crate::pool::{ItemId, ItemPool, PoolError};
use crate::semiring::{Viterbi, LOG_OF_ZERO};
use crate::settings::{Settings, SettingsError};
use crate::sexp::Sexp;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot parse an empty sentence")]
    EmptySentence,
    #[error("sentence of {len} words exceeds the limit of {max}")]
    SentenceTooLong { len: usize, max: usize },
    #[error("decoding cancelled")]
    Cancelled,
    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("chart: {0}")]
    Chart(#[from] ChartError),
    #[error("pool: {0}")]
    Pool(#[from] PoolError),
    #[error("constraints: {0}")]
    Constraint(#[from] ConstraintError),
}

/// The best analysis of a sentence.
#[derive(Clone, Debug, PartialEq)]
pub struct Parse {
    /// The tree below the top label.
    pub tree: Sexp,
    pub log_prob: f64,
    /// Mass of every derivation merged into the root; equals `log_prob` in
    /// beam mode.
    pub inside_log_prob: f64,
}

/// One decoder per thread. The grammar may be shared; the chart and pool
/// are private.
pub struct Decoder<G: Grammar> {
    grammar: G,
    settings: Settings,
    chart: Chart,
    pool: ItemPool,
    cancel: Option<Arc<AtomicBool>>,
    tokens: Vec<String>,
    sequence: u64,
}

impl<G: Grammar> Decoder<G> {
    pub fn new(grammar: G, settings: Settings) -> Result<Self, DecodeError> {
        settings.validate()?;
        Ok(Decoder {
            chart: Chart::from_settings(&settings),
            pool: ItemPool::from_settings(&settings),
            grammar,
            settings,
            cancel: None,
            tokens: Vec::new(),
            sequence: 0,
        })
    }

    /// Abort before the next span once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn grammar(&self) -> &G {
        &self.grammar
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The chart left by the last call to `parse`.
    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn pool(&self) -> &ItemPool {
        &self.pool
    }

    /// Parse with constraints built from a skeleton tree, using the
    /// configured constraint kind.
    pub fn parse_with_skeleton(&mut self, sentence: &[&str], skeleton: &Sexp) -> Result<Option<Parse>, DecodeError> {
        let constraints =
            constraints_from_skeleton(self.settings.constraint_kind, skeleton, self.grammar.vocabulary())?;
        self.parse(sentence, Some(constraints.as_ref()))
    }

    /// Find the best parse. `Ok(None)` means no analysis covers the sentence.
    pub fn parse(
        &mut self,
        sentence: &[&str],
        constraints: Option<&dyn ConstraintSet>,
    ) -> Result<Option<Parse>, DecodeError> {
        let n = sentence.len();
        if n == 0 {
            return Err(DecodeError::EmptySentence);
        }
        if n > self.settings.max_sentence_len {
            return Err(DecodeError::SentenceTooLong {
                len: n,
                max: self.settings.max_sentence_len,
            });
        }
        if let Some(constraints) = constraints {
            constraints.check_sentence(n)?;
        }

        self.chart.reset(n, &mut self.pool)?;
        self.tokens = sentence.iter().map(|t| t.to_string()).collect();
        let words: Vec<_> = sentence.iter().map(|t| self.grammar.lexicalize(t)).collect();

        for len in 1..=n {
            for start in 0..=n - len {
                self.check_cancelled()?;
                let span = Span::new(start, start + len);
                if len == 1 {
                    self.seed(span, words[start], constraints)?;
                } else {
                    self.join(span, constraints)?;
                }
                self.close_cell(span, constraints)?;
                if len == n {
                    self.add_top(span, constraints)?;
                }
            }
            self.chart.seal_length(len)?;
        }

        let top = self.grammar.vocabulary().top();
        let best = match self.chart.best_item(top, &self.pool) {
            Some(best) => best,
            None => {
                debug!(words = n, items = self.chart.num_items(), "no parse");
                return Ok(None);
            }
        };
        let root = self.item(best)?;
        let head = root.interior().map(|i| i.head_child).ok_or(ChartError::StaleItem(best))?;
        let parse = Parse {
            tree: self.tree(head)?,
            log_prob: root.log_prob,
            inside_log_prob: root.inside_log_prob,
        };
        info!(
            words = n,
            log_prob = parse.log_prob,
            items = self.chart.num_items(),
            pool = self.pool.live_count(),
            "parsed sentence"
        );
        Ok(Some(parse))
    }

    fn check_cancelled(&self) -> Result<(), DecodeError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(DecodeError::Cancelled),
            _ => Ok(()),
        }
    }

    fn item(&self, id: ItemId) -> Result<&Item, DecodeError> {
        Ok(self.pool.get(id).ok_or(ChartError::StaleItem(id))?)
    }

    /// Preterminals for the word at `span.start`.
    fn seed(&mut self, span: Span, word: SymbolId, constraints: Option<&dyn ConstraintSet>) -> Result<(), DecodeError> {
        for (tag, log_prob) in self.grammar.tags(word) {
            let item = Item::preterminal(span.start, Word::new(word, tag), log_prob);
            self.admit(item, constraints)?;
        }
        Ok(())
    }

    /// Attach complete modifiers to incomplete heads across every split.
    fn join(&mut self, span: Span, constraints: Option<&dyn ConstraintSet>) -> Result<(), DecodeError> {
        for split in span.start + 1..span.end {
            let left = Span::new(span.start, split);
            let right = Span::new(split, span.end);
            let left_items = self.chart.items(left).to_vec();
            let right_items = self.chart.items(right).to_vec();

            for &head in &left_items {
                for &modifier in &right_items {
                    self.attach(span, head, modifier, Side::Right, constraints)?;
                }
            }
            for &head in &right_items {
                for &modifier in &left_items {
                    self.attach(span, head, modifier, Side::Left, constraints)?;
                }
            }
        }
        Ok(())
    }

    fn attach(
        &mut self,
        span: Span,
        head_id: ItemId,
        modifier_id: ItemId,
        side: Side,
        constraints: Option<&dyn ConstraintSet>,
    ) -> Result<(), DecodeError> {
        let head = self.item(head_id)?;
        let modifier = self.item(modifier_id)?;
        if head.stopped(side) || !modifier.is_complete() {
            return Ok(());
        }
        if side == Side::Left && !head.stopped(Side::Right) {
            return Ok(());
        }

        let cost = self.grammar.modifier_log_prob(head, modifier, side);
        let log_prob = head.log_prob + modifier.log_prob + cost;
        if self.chart.outside_beam(span, log_prob) {
            return Ok(());
        }

        let mut item = head.clone();
        item.span = span;
        item.log_prob = log_prob;
        item.inside_log_prob = head.inside_log_prob + modifier.inside_log_prob + cost;
        let label = modifier.label;
        if let Some(interior) = item.interior_mut() {
            interior.children_mut(side).push(modifier_id);
            // A label the head still requires is discharged; anything else
            // attaches as an adjunct.
            if let Some(rest) = interior.subcat(side).remove(label) {
                interior.set_subcat(side, rest);
            }
        }
        self.admit(item, constraints)?;
        Ok(())
    }

    /// Stop and project best-first until the cell stops changing.
    fn close_cell(&mut self, span: Span, constraints: Option<&dyn ConstraintSet>) -> Result<(), DecodeError> {
        let mut agenda = PriorityQueue::new();
        for &id in self.chart.items(span) {
            let log_prob = self.item(id)?.log_prob;
            agenda.push(id, (Viterbi::new(log_prob), Reverse(self.sequence)));
            self.sequence += 1;
        }

        while let Some((id, _)) = agenda.pop() {
            if !self.chart.holds(span, id) {
                continue;
            }
            let item = self.item(id)?.clone();
            let mut derived = Vec::new();

            if item.is_complete() {
                for projection in self.grammar.projections(&item) {
                    derived.push(Item {
                        span,
                        label: projection.label,
                        head_word: item.head_word,
                        log_prob: item.log_prob + projection.log_prob,
                        inside_log_prob: item.inside_log_prob + projection.log_prob,
                        constraint: None,
                        kind: ItemKind::Interior(Interior {
                            head_label: item.label,
                            head_child: id,
                            left_children: Vec::new(),
                            right_children: Vec::new(),
                            left_subcat: projection.left_subcat,
                            right_subcat: projection.right_subcat,
                            left_stopped: false,
                            right_stopped: false,
                        }),
                    });
                }
            } else {
                for side in [Side::Right, Side::Left] {
                    if item.stopped(side) || !item.subcat(side).map_or(true, |s| s.is_empty()) {
                        continue;
                    }
                    if side == Side::Left && !item.stopped(Side::Right) {
                        continue;
                    }
                    let cost = self.grammar.stop_log_prob(&item, side);
                    let mut stopped = item.clone();
                    stopped.log_prob += cost;
                    stopped.inside_log_prob += cost;
                    if let Some(interior) = stopped.interior_mut() {
                        interior.stop(side);
                    }
                    derived.push(stopped);
                }
            }

            for new in derived {
                if let Some(new_id) = self.admit(new, constraints)? {
                    let log_prob = self.item(new_id)?.log_prob;
                    agenda.push(new_id, (Viterbi::new(log_prob), Reverse(self.sequence)));
                    self.sequence += 1;
                }
            }
        }
        trace!(%span, items = self.chart.items(span).len(), "closed cell");
        Ok(())
    }

    /// Wrap every complete analysis of the sentence in the top label.
    fn add_top(&mut self, span: Span, constraints: Option<&dyn ConstraintSet>) -> Result<(), DecodeError> {
        let vocab = self.grammar.vocabulary();
        let top = vocab.top();
        let empty = vocab.empty_subcat();

        let mut roots = Vec::new();
        for &id in self.chart.items(span) {
            let item = self.item(id)?;
            if item.label == top || !item.is_complete() {
                continue;
            }
            if constraints.map_or(false, |c| !c.is_satisfied_by_root(item)) {
                continue;
            }
            let cost = self.grammar.top_log_prob(item);
            if cost == LOG_OF_ZERO {
                continue;
            }
            roots.push(Item {
                span,
                label: top,
                head_word: item.head_word,
                log_prob: item.log_prob + cost,
                inside_log_prob: item.inside_log_prob + cost,
                constraint: None,
                kind: ItemKind::Interior(Interior {
                    head_label: item.label,
                    head_child: id,
                    left_children: Vec::new(),
                    right_children: Vec::new(),
                    left_subcat: empty.clone(),
                    right_subcat: empty.clone(),
                    left_stopped: true,
                    right_stopped: true,
                }),
            });
        }

        for root in roots {
            let id = self.pool.allocate(root)?;
            self.chart.insert_unpruned(span, id, &mut self.pool)?;
        }
        Ok(())
    }

    /// Close boundary sides, apply constraints and insert. Returns the new
    /// item's handle if the chart kept it.
    fn admit(&mut self, mut item: Item, constraints: Option<&dyn ConstraintSet>) -> Result<Option<ItemId>, DecodeError> {
        let n = self.chart.len();
        if !item.is_preterminal() {
            for side in Side::BOTH {
                let at_boundary = match side {
                    Side::Left => item.span.start == 0,
                    Side::Right => item.span.end == n,
                };
                if !at_boundary || item.stopped(side) {
                    continue;
                }
                // Nothing can ever attach here, so the requirements would
                // never be met.
                if !item.subcat(side).map_or(true, |s| s.is_empty()) {
                    return Ok(None);
                }
                let cost = self.grammar.stop_log_prob(&item, side);
                item.log_prob += cost;
                item.inside_log_prob += cost;
                if let Some(interior) = item.interior_mut() {
                    interior.stop(side);
                }
            }
        }

        let span = item.span;
        if item.log_prob == LOG_OF_ZERO || self.chart.outside_beam(span, item.log_prob) {
            return Ok(None);
        }

        if let Some(constraints) = constraints {
            if constraints.find_at_least_one_satisfying() {
                match constraints.constraint_satisfying(&item, &self.pool) {
                    Some(id) => item.constraint = Some(id),
                    None => return Ok(None),
                }
            }
            if constraints.find_no_violations() && constraints.contains_violation(&item) {
                return Ok(None);
            }
        }

        let id = self.pool.allocate(item)?;
        let outcome = self.chart.insert(span, id, &mut self.pool)?;
        Ok(outcome.is_stored().then_some(id))
    }

    /// Rebuild the tree below `id` from back-pointers.
    fn tree(&self, id: ItemId) -> Result<Sexp, DecodeError> {
        let item = self.item(id)?;
        let vocab = self.grammar.vocabulary();
        let label = Sexp::atom(vocab.resolve(item.label));

        let interior = match &item.kind {
            ItemKind::Preterminal => {
                let token = self.tokens.get(item.span.start).cloned().unwrap_or_default();
                return Ok(Sexp::List(vec![label, Sexp::Atom(token)]));
            }
            ItemKind::Interior(interior) => interior,
        };

        let mut children = vec![label];
        for &child in interior.left_children.iter().rev() {
            children.push(self.tree(child)?);
        }
        children.push(self.tree(interior.head_child)?);
        for &child in &interior.right_children {
            children.push(self.tree(child)?);
        }
        Ok(Sexp::List(children))
    }
}
