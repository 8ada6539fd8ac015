//! Concrete probability structures and the trained model collection.
//!
//! Each structure conditions on a small, generic set of features and backs
//! off by dropping the lexical head first, then the head tag. The linguistic
//! content is deliberately thin; what matters is that every structure obeys
//! the `ProbabilityStructure` protocol.

use crate::event::{
    Component, Event, EventError, HeadEvent, LexicalEvent, ModifierEvent, PriorEvent, Side,
    TrainerEvent, Word,
};
use crate::intern::SymbolId;
use crate::probability::{Model, ModelBuilder, ProbabilityStructure, Smoothing};
use crate::semiring::LOG_OF_ZERO;
use crate::settings::{Settings, Vocabulary};
use crate::sexp::{read_all, SexpError};
use crate::subcat::Subcat;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading training statistics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("record syntax: {0}")]
    Sexp(#[from] SexpError),
    #[error("record {index}: {source}")]
    Event {
        index: usize,
        #[source]
        source: EventError,
    },
}

impl From<&Settings> for Smoothing {
    fn from(settings: &Settings) -> Self {
        Smoothing {
            fudge: settings.lambda_fudge,
            fudge_term: settings.lambda_fudge_term,
        }
    }
}

fn sym(id: SymbolId) -> Component {
    Component::Symbol(id)
}

/// P(word | tag)
#[derive(Debug, Clone)]
pub struct LexicalStructure {
    smoothing: Smoothing,
}

impl LexicalStructure {
    pub fn new(smoothing: Smoothing) -> Self {
        LexicalStructure { smoothing }
    }
}

impl ProbabilityStructure for LexicalStructure {
    type Event = LexicalEvent;

    fn name(&self) -> &'static str {
        "lexical"
    }

    fn num_levels(&self) -> usize {
        1
    }

    fn history(&self, event: &LexicalEvent, _level: usize) -> Event {
        Event::new().with(sym(event.word.tag))
    }

    fn future(&self, event: &LexicalEvent, _level: usize) -> Event {
        Event::new().with(sym(event.word.word))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// P(parent | head label, head word)
#[derive(Debug, Clone)]
pub struct HeadStructure {
    smoothing: Smoothing,
}

impl HeadStructure {
    pub fn new(smoothing: Smoothing) -> Self {
        HeadStructure { smoothing }
    }
}

impl ProbabilityStructure for HeadStructure {
    type Event = HeadEvent;

    fn name(&self) -> &'static str {
        "head"
    }

    fn num_levels(&self) -> usize {
        3
    }

    fn history(&self, event: &HeadEvent, level: usize) -> Event {
        let mut history = Event::new().with(sym(event.head));
        if level < 2 {
            history.push(sym(event.head_word.tag));
        }
        if level < 1 {
            history.push(sym(event.head_word.word));
        }
        history
    }

    fn future(&self, event: &HeadEvent, _level: usize) -> Event {
        Event::new().with(sym(event.parent))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// P(subcat on one side | parent, head label, head word)
#[derive(Debug, Clone)]
pub struct SubcatStructure {
    side: Side,
    smoothing: Smoothing,
}

impl SubcatStructure {
    pub fn new(side: Side, smoothing: Smoothing) -> Self {
        SubcatStructure { side, smoothing }
    }

    pub fn side(&self) -> Side {
        self.side
    }
}

impl ProbabilityStructure for SubcatStructure {
    type Event = HeadEvent;

    fn name(&self) -> &'static str {
        match self.side {
            Side::Left => "left-subcat",
            Side::Right => "right-subcat",
        }
    }

    fn num_levels(&self) -> usize {
        3
    }

    fn history(&self, event: &HeadEvent, level: usize) -> Event {
        let mut history = Event::new().with(sym(event.parent)).with(sym(event.head));
        if level < 2 {
            history.push(sym(event.head_word.tag));
        }
        if level < 1 {
            history.push(sym(event.head_word.word));
        }
        history
    }

    fn future(&self, event: &HeadEvent, _level: usize) -> Event {
        Event::new().with(Component::Subcat(event.subcat(self.side).clone()))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// P(modifier label, modifier tag | side, parent, head, subcat, adjacency, head word)
#[derive(Debug, Clone)]
pub struct ModNonterminalStructure {
    smoothing: Smoothing,
}

impl ModNonterminalStructure {
    pub fn new(smoothing: Smoothing) -> Self {
        ModNonterminalStructure { smoothing }
    }
}

impl ProbabilityStructure for ModNonterminalStructure {
    type Event = ModifierEvent;

    fn name(&self) -> &'static str {
        "mod-nonterminal"
    }

    fn num_levels(&self) -> usize {
        3
    }

    fn history(&self, event: &ModifierEvent, level: usize) -> Event {
        let mut history = Event::new()
            .with(Component::Side(event.side))
            .with(sym(event.parent))
            .with(sym(event.head))
            .with(Component::Subcat(event.subcat.clone()))
            .with(Component::Flag(event.adjacent));
        if level < 2 {
            history.push(sym(event.head_word.tag));
        }
        if level < 1 {
            history.push(sym(event.head_word.word));
        }
        history
    }

    fn future(&self, event: &ModifierEvent, _level: usize) -> Event {
        Event::new()
            .with(sym(event.modifier))
            .with(sym(event.modifier_word.tag))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// P(modifier word | modifier label, modifier tag, side, parent, head word)
#[derive(Debug, Clone)]
pub struct ModWordStructure {
    smoothing: Smoothing,
}

impl ModWordStructure {
    pub fn new(smoothing: Smoothing) -> Self {
        ModWordStructure { smoothing }
    }
}

impl ProbabilityStructure for ModWordStructure {
    type Event = ModifierEvent;

    fn name(&self) -> &'static str {
        "mod-word"
    }

    fn num_levels(&self) -> usize {
        3
    }

    fn history(&self, event: &ModifierEvent, level: usize) -> Event {
        let mut history = Event::new().with(sym(event.modifier_word.tag));
        if level < 2 {
            history.push(sym(event.modifier));
        }
        if level < 1 {
            history.push(Component::Side(event.side));
            history.push(sym(event.parent));
            history.push(Component::Word(event.head_word));
        }
        history
    }

    fn future(&self, event: &ModifierEvent, _level: usize) -> Event {
        Event::new().with(sym(event.modifier_word.word))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// P(root label, root head tag | top)
#[derive(Debug, Clone)]
pub struct PriorStructure {
    top: SymbolId,
    smoothing: Smoothing,
}

impl PriorStructure {
    pub fn new(top: SymbolId, smoothing: Smoothing) -> Self {
        PriorStructure { top, smoothing }
    }
}

impl ProbabilityStructure for PriorStructure {
    type Event = PriorEvent;

    fn name(&self) -> &'static str {
        "prior"
    }

    fn num_levels(&self) -> usize {
        1
    }

    fn history(&self, _event: &PriorEvent, _level: usize) -> Event {
        Event::new().with(sym(self.top))
    }

    fn future(&self, event: &PriorEvent, _level: usize) -> Event {
        Event::new().with(sym(event.label)).with(sym(event.head_word.tag))
    }

    fn smoothing(&self) -> Smoothing {
        self.smoothing
    }
}

/// Collects trainer events and freezes them into a `ModelSet`.
pub struct ModelSetBuilder {
    vocab: Vocabulary,
    smoothing: Smoothing,
    unknown_word_threshold: u32,
    events: Vec<(TrainerEvent, f64)>,
}

impl ModelSetBuilder {
    pub fn new(settings: &Settings) -> Self {
        ModelSetBuilder {
            vocab: Vocabulary::new(settings),
            smoothing: Smoothing::from(settings),
            unknown_word_threshold: settings.unknown_word_threshold,
            events: Vec::new(),
        }
    }

    /// The vocabulary events are interned into.
    pub fn vocabulary_mut(&mut self) -> &mut Vocabulary {
        &mut self.vocab
    }

    pub fn observe(&mut self, event: TrainerEvent) {
        self.observe_count(event, 1.0);
    }

    pub fn observe_count(&mut self, event: TrainerEvent, count: f64) {
        self.events.push((event, count));
    }

    /// Read every record in `text` and observe it. Returns the number of
    /// records read.
    pub fn observe_records(&mut self, text: &str) -> Result<usize, ModelError> {
        let records = read_all(text)?;
        for (index, record) in records.iter().enumerate() {
            let (event, count) = TrainerEvent::record_from_sexp(record, &mut self.vocab)
                .map_err(|source| ModelError::Event { index, source })?;
            self.observe_count(event, count);
        }
        Ok(records.len())
    }

    pub fn build(self) -> ModelSet {
        let ModelSetBuilder {
            vocab,
            smoothing,
            unknown_word_threshold,
            events,
        } = self;

        let mut word_counts: FxHashMap<SymbolId, f64> = FxHashMap::default();
        for (event, count) in &events {
            if let TrainerEvent::Lexical(e) = event {
                *word_counts.entry(e.word.word).or_insert(0.0) += count;
            }
        }

        let stop = vocab.stop();
        let unknown = vocab.unknown();
        let threshold = f64::from(unknown_word_threshold);
        let is_rare = |word: SymbolId| {
            unknown_word_threshold > 0
                && word != stop
                && word_counts.get(&word).copied().unwrap_or(0.0) <= threshold
        };

        let mut lexical = ModelBuilder::new(LexicalStructure::new(smoothing));
        let mut head = ModelBuilder::new(HeadStructure::new(smoothing));
        let mut left_subcat = ModelBuilder::new(SubcatStructure::new(Side::Left, smoothing));
        let mut right_subcat = ModelBuilder::new(SubcatStructure::new(Side::Right, smoothing));
        let mut mod_nonterminal = ModelBuilder::new(ModNonterminalStructure::new(smoothing));
        let mut mod_word = ModelBuilder::new(ModWordStructure::new(smoothing));
        let mut prior = ModelBuilder::new(PriorStructure::new(vocab.top(), smoothing));

        let mut tags: FxHashMap<SymbolId, BTreeSet<SymbolId>> = FxHashMap::default();
        let mut unknown_tags: BTreeSet<SymbolId> = BTreeSet::new();
        let mut all_tags: BTreeSet<SymbolId> = BTreeSet::new();
        let mut parents: FxHashMap<SymbolId, BTreeSet<SymbolId>> = FxHashMap::default();
        let mut frames: FxHashMap<(SymbolId, SymbolId, Side), BTreeSet<Subcat>> = FxHashMap::default();

        for (event, count) in &events {
            let event = event.map_words(|w| {
                if is_rare(w.word) {
                    Word::new(unknown, w.tag)
                } else {
                    w
                }
            });
            match &event {
                TrainerEvent::Lexical(e) => {
                    tags.entry(e.word.word).or_default().insert(e.word.tag);
                    all_tags.insert(e.word.tag);
                    if e.word.word == unknown {
                        unknown_tags.insert(e.word.tag);
                    }
                    lexical.observe(e, *count);
                }
                TrainerEvent::Head(e) => {
                    parents.entry(e.head).or_default().insert(e.parent);
                    for side in Side::BOTH {
                        frames
                            .entry((e.parent, e.head, side))
                            .or_default()
                            .insert(e.subcat(side).clone());
                    }
                    head.observe(e, *count);
                    left_subcat.observe(e, *count);
                    right_subcat.observe(e, *count);
                }
                TrainerEvent::Modifier(e) => {
                    mod_nonterminal.observe(e, *count);
                    mod_word.observe(e, *count);
                }
                TrainerEvent::Prior(e) => {
                    prior.observe(e, *count);
                }
            }
        }

        if unknown_tags.is_empty() {
            unknown_tags = all_tags;
        }

        let models = ModelSet {
            vocab: Arc::new(vocab),
            lexical: lexical.build(),
            head: head.build(),
            left_subcat: left_subcat.build(),
            right_subcat: right_subcat.build(),
            mod_nonterminal: mod_nonterminal.build(),
            mod_word: mod_word.build(),
            prior: prior.build(),
            tags: tags
                .into_iter()
                .map(|(word, tags)| (word, tags.into_iter().collect()))
                .collect(),
            unknown_tags: unknown_tags.into_iter().collect(),
            parents: parents
                .into_iter()
                .map(|(label, parents)| (label, parents.into_iter().collect()))
                .collect(),
            frames: frames
                .into_iter()
                .map(|(key, frames)| (key, frames.into_iter().collect()))
                .collect(),
        };
        info!(
            events = events.len(),
            words = models.tags.len(),
            unknown_tags = models.unknown_tags.len(),
            "trained model set"
        );
        models
    }
}

/// Every trained model plus the lexicon derived from training.
///
/// Immutable once built; decoders on different threads share one instance
/// through `Arc<ModelSet>`.
#[derive(Debug)]
pub struct ModelSet {
    vocab: Arc<Vocabulary>,
    lexical: Model<LexicalStructure>,
    head: Model<HeadStructure>,
    left_subcat: Model<SubcatStructure>,
    right_subcat: Model<SubcatStructure>,
    mod_nonterminal: Model<ModNonterminalStructure>,
    mod_word: Model<ModWordStructure>,
    prior: Model<PriorStructure>,
    tags: FxHashMap<SymbolId, Vec<SymbolId>>,
    unknown_tags: Vec<SymbolId>,
    parents: FxHashMap<SymbolId, Vec<SymbolId>>,
    frames: FxHashMap<(SymbolId, SymbolId, Side), Vec<Subcat>>,
}

impl ModelSet {
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn shared_vocabulary(&self) -> Arc<Vocabulary> {
        self.vocab.clone()
    }

    /// Map a token to the word symbol the models were trained on.
    pub fn lexicalize(&self, token: &str) -> SymbolId {
        match self.vocab.get(token) {
            Some(id) if self.tags.contains_key(&id) => id,
            _ => self.vocab.unknown(),
        }
    }

    /// Tags observed with `word`, sorted; unknown words get the tags seen
    /// with rare training words.
    pub fn tags_for(&self, word: SymbolId) -> &[SymbolId] {
        self.tags
            .get(&word)
            .map(Vec::as_slice)
            .unwrap_or(&self.unknown_tags)
    }

    /// Labels observed projecting from `head`, sorted.
    pub fn parents_of(&self, head: SymbolId) -> &[SymbolId] {
        self.parents.get(&head).map_or(&[], Vec::as_slice)
    }

    /// Subcat frames observed for `parent` headed by `head` on `side`.
    pub fn subcat_frames(&self, parent: SymbolId, head: SymbolId, side: Side) -> &[Subcat] {
        self.frames.get(&(parent, head, side)).map_or(&[], Vec::as_slice)
    }

    pub fn lexical_log_prob(&self, event: &LexicalEvent) -> f64 {
        self.lexical.estimate_log_prob(event)
    }

    pub fn head_log_prob(&self, event: &HeadEvent) -> f64 {
        self.head.estimate_log_prob(event)
    }

    pub fn subcat_log_prob(&self, event: &HeadEvent, side: Side) -> f64 {
        match side {
            Side::Left => self.left_subcat.estimate_log_prob(event),
            Side::Right => self.right_subcat.estimate_log_prob(event),
        }
    }

    /// Label generation followed by word generation. A stop event only
    /// scores the label.
    pub fn modifier_log_prob(&self, event: &ModifierEvent) -> f64 {
        let label = self.mod_nonterminal.estimate_log_prob(event);
        if event.modifier == self.vocab.stop() || label == LOG_OF_ZERO {
            return label;
        }
        label + self.mod_word.estimate_log_prob(event)
    }

    pub fn prior_log_prob(&self, event: &PriorEvent) -> f64 {
        self.prior.estimate_log_prob(event)
    }

    pub(crate) fn log_summary(&self) {
        debug!(
            lexical = self.lexical.counts(0).len(),
            head = self.head.counts(0).len(),
            mod_nonterminal = self.mod_nonterminal.counts(0).len(),
            mod_word = self.mod_word.counts(0).len(),
            "model histories at level 0"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = "
        (count 2 (lex NN dog))
        (lex NN cat)
        (lex VBZ barks)
        (lex DT the)
        (head NP NN (dog NN) (DT) ())
        (head S VP (barks VBZ) (NP) ())
        (head VP VBZ (barks VBZ) () ())
        (mod NP NN (dog NN) DT (the DT) left (DT) adj)
        (mod NP NN (dog NN) +STOP+ (+STOP+ +STOP+) left () nonadj)
        (mod S VP (barks VBZ) NP (dog NN) left (NP) adj)
        (prior S (barks VBZ))
    ";

    fn trained(settings: &Settings) -> ModelSet {
        let mut builder = ModelSetBuilder::new(settings);
        assert_eq!(builder.observe_records(RECORDS).unwrap(), 11);
        builder.build()
    }

    fn sample_modifier(vocab: &mut Vocabulary) -> ModifierEvent {
        let np = vocab.intern("NP");
        let nn = vocab.intern("NN");
        let dog = vocab.intern("dog");
        let dt = vocab.intern("DT");
        let the = vocab.intern("the");
        ModifierEvent {
            parent: np,
            head: nn,
            head_word: Word::new(dog, nn),
            modifier: dt,
            modifier_word: Word::new(the, dt),
            side: Side::Left,
            subcat: vocab.subcat([dt]),
            adjacent: true,
        }
    }

    fn sample_head(vocab: &mut Vocabulary) -> HeadEvent {
        let s = vocab.intern("S");
        let vp = vocab.intern("VP");
        let np = vocab.intern("NP");
        let barks = vocab.intern("barks");
        let vbz = vocab.intern("VBZ");
        HeadEvent {
            parent: s,
            head: vp,
            head_word: Word::new(barks, vbz),
            left_subcat: vocab.subcat([np]),
            right_subcat: vocab.empty_subcat(),
        }
    }

    #[test]
    fn test_levels_coarsen_monotonically() {
        let mut vocab = Vocabulary::new(&Settings::default());
        let smoothing = Smoothing::default();
        let modifier = sample_modifier(&mut vocab);
        let head = sample_head(&mut vocab);

        fn check<S: ProbabilityStructure>(s: &S, e: &S::Event) {
            for level in 1..s.num_levels() {
                let finer = s.history(e, level - 1);
                let coarser = s.history(e, level);
                assert!(
                    coarser.is_projection_of(&finer),
                    "{} level {} is not a projection of level {}",
                    s.name(),
                    level,
                    level - 1
                );
            }
        }

        check(&HeadStructure::new(smoothing), &head);
        check(&SubcatStructure::new(Side::Left, smoothing), &head);
        check(&ModNonterminalStructure::new(smoothing), &modifier);
        check(&ModWordStructure::new(smoothing), &modifier);
    }

    #[test]
    fn test_lexicon() {
        let models = trained(&Settings::default());
        let vocab = models.vocabulary();
        let dog = models.lexicalize("dog");
        let nn = vocab.get("NN").unwrap();

        assert_eq!(models.tags_for(dog), &[nn]);
        assert_eq!(models.lexicalize("platypus"), vocab.unknown());
        // No rare words: unknown words may take any tag.
        assert_eq!(models.tags_for(vocab.unknown()).len(), 3);

        let np = vocab.get("NP").unwrap();
        assert_eq!(models.parents_of(nn), &[np]);
        let dt = vocab.get("DT").unwrap();
        let frames = models.subcat_frames(np, nn, Side::Left);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].labels(), &[dt]);
    }

    #[test]
    fn test_rare_words_become_unknown() {
        let settings = Settings {
            unknown_word_threshold: 1,
            ..Settings::default()
        };
        let models = trained(&settings);
        let vocab = models.vocabulary();

        // "dog" was seen twice and survives; "cat" was seen once.
        assert_ne!(models.lexicalize("dog"), vocab.unknown());
        assert_eq!(models.lexicalize("cat"), vocab.unknown());
        let nn = vocab.get("NN").unwrap();
        assert!(models.tags_for(vocab.unknown()).contains(&nn));
    }

    #[test]
    fn test_model_estimates() {
        let models = trained(&Settings::default());
        let mut vocab = (*models.shared_vocabulary()).clone();
        let modifier = sample_modifier(&mut vocab);
        let head = sample_head(&mut vocab);

        let lp = models.modifier_log_prob(&modifier);
        assert!(lp.is_finite() && lp <= 0.0);

        let lp = models.head_log_prob(&head);
        assert!(lp.is_finite() && lp <= 0.0);
        assert!(models.subcat_log_prob(&head, Side::Left).is_finite());

        let prior = PriorEvent {
            label: head.parent,
            head_word: head.head_word,
        };
        assert!((models.prior_log_prob(&prior) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_unseen_modifier_is_log_zero() {
        let models = trained(&Settings::default());
        let mut vocab = (*models.shared_vocabulary()).clone();
        let mut modifier = sample_modifier(&mut vocab);
        modifier.modifier = vocab.intern("ADVP");
        assert_eq!(models.modifier_log_prob(&modifier), LOG_OF_ZERO);
    }

    #[test]
    fn test_bad_record_reports_index() {
        let mut builder = ModelSetBuilder::new(&Settings::default());
        let err = builder.observe_records("(lex NN dog) (lex NN)").unwrap_err();
        assert!(matches!(err, ModelError::Event { index: 1, .. }));
        assert!(matches!(
            builder.observe_records("(lex NN dog"),
            Err(ModelError::Sexp(SexpError::UnexpectedEof))
        ));
    }

    #[test]
    fn test_model_set_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ModelSet>();
    }
}
