//! Scoring rules consumed by the decoder.
//!
//! The decoder only knows how to combine items; which combinations are
//! allowed and what they cost comes from a `Grammar`. `RuleGrammar` holds
//! explicit rule tables and is convenient for small hand-written grammars.
//! `ModelGrammar` scores with a trained `ModelSet`.

use crate::event::{HeadEvent, LexicalEvent, ModifierEvent, PriorEvent, Side, Word};
use crate::intern::SymbolId;
use crate::item::Item;
use crate::models::ModelSet;
use crate::semiring::{LOG_OF_ONE, LOG_OF_ZERO};
use crate::settings::{Settings, Vocabulary};
use crate::subcat::{Subcat, SubcatKind};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
    #[error("probability of {rule} must be in (0, 1], got {prob}")]
    InvalidProbability { rule: String, prob: f64 },
}

/// A unary step from a complete item to a new head projection.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub label: SymbolId,
    pub left_subcat: Subcat,
    pub right_subcat: Subcat,
    pub log_prob: f64,
}

pub trait Grammar {
    fn vocabulary(&self) -> &Vocabulary;

    fn subcat_kind(&self) -> SubcatKind {
        self.vocabulary().subcat_kind()
    }

    /// The word symbol a surface token is scored as.
    fn lexicalize(&self, token: &str) -> SymbolId;

    /// Candidate tags for a word with their log probabilities.
    fn tags(&self, word: SymbolId) -> Vec<(SymbolId, f64)>;

    /// Parents a complete item may project to.
    fn projections(&self, item: &Item) -> Vec<Projection>;

    /// Cost of attaching the complete `modifier` to `head` on `side`.
    fn modifier_log_prob(&self, head: &Item, modifier: &Item, side: Side) -> f64;

    /// Cost of closing `side` of `item`.
    fn stop_log_prob(&self, item: &Item, side: Side) -> f64;

    /// Cost of `item` being the sentence root.
    fn top_log_prob(&self, item: &Item) -> f64;
}

fn log_prob(rule: impl FnOnce() -> String, prob: f64) -> Result<f64, GrammarError> {
    if prob > 0.0 && prob <= 1.0 {
        Ok(prob.ln())
    } else {
        Err(GrammarError::InvalidProbability { rule: rule(), prob })
    }
}

/// Explicit rule tables. Anything not listed is impossible, except stops,
/// which default to probability one.
#[derive(Debug, Clone)]
pub struct RuleGrammar {
    vocab: Vocabulary,
    lexicon: FxHashMap<SymbolId, Vec<(SymbolId, f64)>>,
    unaries: FxHashMap<SymbolId, Vec<Projection>>,
    modifiers: FxHashMap<(SymbolId, SymbolId, SymbolId, Side), f64>,
    stops: FxHashMap<(SymbolId, Side), f64>,
    tops: FxHashMap<SymbolId, f64>,
}

impl RuleGrammar {
    pub fn new(settings: &Settings) -> Self {
        RuleGrammar {
            vocab: Vocabulary::new(settings),
            lexicon: FxHashMap::default(),
            unaries: FxHashMap::default(),
            modifiers: FxHashMap::default(),
            stops: FxHashMap::default(),
            tops: FxHashMap::default(),
        }
    }

    /// `tag -> word`
    pub fn lexical(&mut self, word: &str, tag: &str, prob: f64) -> Result<&mut Self, GrammarError> {
        let lp = log_prob(|| format!("{} -> {}", tag, word), prob)?;
        let word = self.vocab.intern(word);
        let tag = self.vocab.intern(tag);
        self.lexicon.entry(word).or_default().push((tag, lp));
        Ok(self)
    }

    /// `child -> parent`, requiring the given complements on each side.
    pub fn unary(
        &mut self,
        child: &str,
        parent: &str,
        left: &[&str],
        right: &[&str],
        prob: f64,
    ) -> Result<&mut Self, GrammarError> {
        let lp = log_prob(|| format!("{} -> {}", child, parent), prob)?;
        let child = self.vocab.intern(child);
        let label = self.vocab.intern(parent);
        let left: Vec<SymbolId> = left.iter().map(|l| self.vocab.intern(l)).collect();
        let right: Vec<SymbolId> = right.iter().map(|l| self.vocab.intern(l)).collect();
        let projection = Projection {
            label,
            left_subcat: self.vocab.subcat(left),
            right_subcat: self.vocab.subcat(right),
            log_prob: lp,
        };
        self.unaries.entry(child).or_default().push(projection);
        Ok(self)
    }

    /// `modifier` attaching on `side` of a `parent` headed by `head`.
    pub fn modifier(
        &mut self,
        parent: &str,
        head: &str,
        modifier: &str,
        side: Side,
        prob: f64,
    ) -> Result<&mut Self, GrammarError> {
        let lp = log_prob(|| format!("{} {} {} {}", parent, head, side, modifier), prob)?;
        let key = (
            self.vocab.intern(parent),
            self.vocab.intern(head),
            self.vocab.intern(modifier),
            side,
        );
        self.modifiers.insert(key, lp);
        Ok(self)
    }

    pub fn stop(&mut self, parent: &str, side: Side, prob: f64) -> Result<&mut Self, GrammarError> {
        let lp = log_prob(|| format!("{} {} stop", parent, side), prob)?;
        let parent = self.vocab.intern(parent);
        self.stops.insert((parent, side), lp);
        Ok(self)
    }

    /// `label` as the sentence root.
    pub fn top(&mut self, label: &str, prob: f64) -> Result<&mut Self, GrammarError> {
        let lp = log_prob(|| format!("top -> {}", label), prob)?;
        let label = self.vocab.intern(label);
        self.tops.insert(label, lp);
        Ok(self)
    }
}

impl Grammar for RuleGrammar {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn lexicalize(&self, token: &str) -> SymbolId {
        match self.vocab.get(token) {
            Some(id) if self.lexicon.contains_key(&id) => id,
            _ => self.vocab.unknown(),
        }
    }

    fn tags(&self, word: SymbolId) -> Vec<(SymbolId, f64)> {
        self.lexicon.get(&word).cloned().unwrap_or_default()
    }

    fn projections(&self, item: &Item) -> Vec<Projection> {
        self.unaries.get(&item.label).cloned().unwrap_or_default()
    }

    fn modifier_log_prob(&self, head: &Item, modifier: &Item, side: Side) -> f64 {
        let head_label = match head.head_label() {
            Some(label) => label,
            None => return LOG_OF_ZERO,
        };
        self.modifiers
            .get(&(head.label, head_label, modifier.label, side))
            .copied()
            .unwrap_or(LOG_OF_ZERO)
    }

    fn stop_log_prob(&self, item: &Item, side: Side) -> f64 {
        self.stops.get(&(item.label, side)).copied().unwrap_or(LOG_OF_ONE)
    }

    fn top_log_prob(&self, item: &Item) -> f64 {
        self.tops.get(&item.label).copied().unwrap_or(LOG_OF_ZERO)
    }
}

/// Scores with trained models. Preterminals cost nothing; the head word is
/// paid for when it is generated, either as a modifier word or by the root.
#[derive(Debug, Clone)]
pub struct ModelGrammar {
    models: Arc<ModelSet>,
}

impl ModelGrammar {
    pub fn new(models: Arc<ModelSet>) -> Self {
        models.log_summary();
        ModelGrammar { models }
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    fn modifier_event(&self, head: &Item, modifier: SymbolId, modifier_word: Word, side: Side) -> Option<ModifierEvent> {
        Some(ModifierEvent {
            parent: head.label,
            head: head.head_label()?,
            head_word: head.head_word,
            modifier,
            modifier_word,
            side,
            subcat: head.subcat(side)?.clone(),
            adjacent: head.adjacent(side),
        })
    }
}

impl Grammar for ModelGrammar {
    fn vocabulary(&self) -> &Vocabulary {
        self.models.vocabulary()
    }

    fn lexicalize(&self, token: &str) -> SymbolId {
        self.models.lexicalize(token)
    }

    fn tags(&self, word: SymbolId) -> Vec<(SymbolId, f64)> {
        self.models
            .tags_for(word)
            .iter()
            .map(|&tag| (tag, LOG_OF_ONE))
            .collect()
    }

    fn projections(&self, item: &Item) -> Vec<Projection> {
        let mut out = Vec::new();
        for &parent in self.models.parents_of(item.label) {
            let mut event = HeadEvent {
                parent,
                head: item.label,
                head_word: item.head_word,
                left_subcat: self.vocabulary().empty_subcat(),
                right_subcat: self.vocabulary().empty_subcat(),
            };
            let head = self.models.head_log_prob(&event);
            if head == LOG_OF_ZERO {
                continue;
            }
            let lefts = self.models.subcat_frames(parent, item.label, Side::Left);
            let rights = self.models.subcat_frames(parent, item.label, Side::Right);
            for left in lefts {
                event.left_subcat = left.clone();
                let left_lp = self.models.subcat_log_prob(&event, Side::Left);
                for right in rights {
                    event.right_subcat = right.clone();
                    let lp = head + left_lp + self.models.subcat_log_prob(&event, Side::Right);
                    if lp > LOG_OF_ZERO {
                        out.push(Projection {
                            label: parent,
                            left_subcat: left.clone(),
                            right_subcat: right.clone(),
                            log_prob: lp,
                        });
                    }
                }
            }
        }
        out
    }

    fn modifier_log_prob(&self, head: &Item, modifier: &Item, side: Side) -> f64 {
        self.modifier_event(head, modifier.label, modifier.head_word, side)
            .map_or(LOG_OF_ZERO, |event| self.models.modifier_log_prob(&event))
    }

    fn stop_log_prob(&self, item: &Item, side: Side) -> f64 {
        let stop = self.vocabulary().stop();
        let word = self.vocabulary().stop_word();
        self.modifier_event(item, stop, word, side)
            .map_or(LOG_OF_ZERO, |event| self.models.modifier_log_prob(&event))
    }

    fn top_log_prob(&self, item: &Item) -> f64 {
        let prior = self.models.prior_log_prob(&PriorEvent {
            label: item.label,
            head_word: item.head_word,
        });
        if prior == LOG_OF_ZERO {
            return prior;
        }
        prior
            + self.models.lexical_log_prob(&LexicalEvent {
                word: item.head_word,
            })
    }
}
