//! Events, transitions, and trainer event records.
//!
//! An `Event` is an ordered tuple of components. Probability structures
//! project a typed trainer event into a (history, future) pair of events at
//! each back-off level; the pair is a `Transition`, the lookup key of a
//! counts table.
//!
//! Trainer events have an external bracketed form so that training
//! statistics can be dumped and reloaded:
//!
//! ```text
//! (lex NN dog)
//! (head NP NN (dog NN) () (PP-C))
//! (mod NP NN (dog NN) JJ (big JJ) left () adj)
//! (prior S (barks VBZ))
//! (count 3 (lex NN dog))
//! ```

use crate::intern::SymbolId;
use crate::settings::Vocabulary;
use crate::sexp::Sexp;
use crate::subcat::Subcat;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while converting an event record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("event record must be a list, found {0}")]
    NotAList(String),
    #[error("unknown event type: {0}")]
    UnknownKind(String),
    #[error("{kind} event expects {expected} fields, found {found}")]
    Arity {
        kind: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("expected {expected} in {kind} event, found {found}")]
    Malformed {
        kind: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("invalid count: {0}")]
    InvalidCount(String),
}

/// Result type for event conversion.
pub type EventResult<T> = Result<T, EventError>;

/// Direction of modifier generation relative to the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lexical head: word plus part-of-speech tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Word {
    pub word: SymbolId,
    pub tag: SymbolId,
}

impl Word {
    pub fn new(word: SymbolId, tag: SymbolId) -> Self {
        Word { word, tag }
    }
}

/// One slot of a history or future.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Symbol(SymbolId),
    Word(Word),
    Subcat(Subcat),
    Side(Side),
    Flag(bool),
}

/// An ordered tuple of components; the unit of conditioning and prediction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Event {
    components: Vec<Component>,
}

impl Event {
    pub fn new() -> Self {
        Event::default()
    }

    /// Builder-style append.
    pub fn with(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether every component of `self` also occurs in `finer`.
    ///
    /// Back-off levels must satisfy this between consecutive histories.
    pub fn is_projection_of(&self, finer: &Event) -> bool {
        let mut remaining: Vec<&Component> = finer.components.iter().collect();
        self.components.iter().all(|c| {
            match remaining.iter().position(|r| *r == c) {
                Some(i) => {
                    remaining.swap_remove(i);
                    true
                }
                None => false,
            }
        })
    }
}

impl From<Vec<Component>> for Event {
    fn from(components: Vec<Component>) -> Self {
        Event { components }
    }
}

/// A (history, future) pair: the lookup key for probability estimation.
///
/// Equality and hashing are structural over both events. Published
/// transitions share canonical events and are never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transition {
    pub history: Arc<Event>,
    pub future: Arc<Event>,
}

impl Transition {
    pub fn new(history: Arc<Event>, future: Arc<Event>) -> Self {
        Transition { history, future }
    }
}

/// Preterminal emission: a tag generating its word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LexicalEvent {
    pub word: Word,
}

/// Head projection: a head child generating its parent and subcat frames.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HeadEvent {
    pub parent: SymbolId,
    pub head: SymbolId,
    pub head_word: Word,
    pub left_subcat: Subcat,
    pub right_subcat: Subcat,
}

impl HeadEvent {
    pub fn subcat(&self, side: Side) -> &Subcat {
        match side {
            Side::Left => &self.left_subcat,
            Side::Right => &self.right_subcat,
        }
    }
}

/// Modifier generation on one side of a head. A stop event carries the stop
/// symbol as its modifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModifierEvent {
    pub parent: SymbolId,
    pub head: SymbolId,
    pub head_word: Word,
    pub modifier: SymbolId,
    pub modifier_word: Word,
    pub side: Side,
    pub subcat: Subcat,
    pub adjacent: bool,
}

/// Generation of the sentence root label and head from the top symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PriorEvent {
    pub label: SymbolId,
    pub head_word: Word,
}

/// Any event observed while collecting training statistics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrainerEvent {
    Lexical(LexicalEvent),
    Head(HeadEvent),
    Modifier(ModifierEvent),
    Prior(PriorEvent),
}

impl TrainerEvent {
    /// Convert one event from its bracketed form.
    pub fn from_sexp(sexp: &Sexp, vocab: &mut Vocabulary) -> EventResult<TrainerEvent> {
        let fields = sexp
            .as_list()
            .ok_or_else(|| EventError::NotAList(sexp.to_string()))?;
        let kind = fields
            .first()
            .and_then(Sexp::as_atom)
            .ok_or_else(|| EventError::UnknownKind(sexp.to_string()))?;

        match kind {
            "lex" => {
                arity("lex", fields, 3)?;
                let tag = atom(vocab, "lex", &fields[1], "tag")?;
                let word = atom(vocab, "lex", &fields[2], "word")?;
                Ok(TrainerEvent::Lexical(LexicalEvent {
                    word: Word::new(word, tag),
                }))
            }
            "head" => {
                arity("head", fields, 6)?;
                Ok(TrainerEvent::Head(HeadEvent {
                    parent: atom(vocab, "head", &fields[1], "parent label")?,
                    head: atom(vocab, "head", &fields[2], "head label")?,
                    head_word: word(vocab, "head", &fields[3])?,
                    left_subcat: subcat(vocab, "head", &fields[4])?,
                    right_subcat: subcat(vocab, "head", &fields[5])?,
                }))
            }
            "mod" => {
                arity("mod", fields, 9)?;
                let side = match fields[6].as_atom() {
                    Some("left") => Side::Left,
                    Some("right") => Side::Right,
                    _ => return Err(malformed("mod", "left or right", &fields[6])),
                };
                let adjacent = match fields[8].as_atom() {
                    Some("adj") => true,
                    Some("nonadj") => false,
                    _ => return Err(malformed("mod", "adj or nonadj", &fields[8])),
                };
                Ok(TrainerEvent::Modifier(ModifierEvent {
                    parent: atom(vocab, "mod", &fields[1], "parent label")?,
                    head: atom(vocab, "mod", &fields[2], "head label")?,
                    head_word: word(vocab, "mod", &fields[3])?,
                    modifier: atom(vocab, "mod", &fields[4], "modifier label")?,
                    modifier_word: word(vocab, "mod", &fields[5])?,
                    side,
                    subcat: subcat(vocab, "mod", &fields[7])?,
                    adjacent,
                }))
            }
            "prior" => {
                arity("prior", fields, 3)?;
                Ok(TrainerEvent::Prior(PriorEvent {
                    label: atom(vocab, "prior", &fields[1], "label")?,
                    head_word: word(vocab, "prior", &fields[2])?,
                }))
            }
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }

    /// Convert a record, which is either a bare event (count 1) or
    /// `(count N event)`.
    pub fn record_from_sexp(sexp: &Sexp, vocab: &mut Vocabulary) -> EventResult<(TrainerEvent, f64)> {
        if let Some(fields) = sexp.as_list() {
            if fields.first().and_then(Sexp::as_atom) == Some("count") {
                arity("count", fields, 3)?;
                let raw = fields[1]
                    .as_atom()
                    .ok_or_else(|| EventError::InvalidCount(fields[1].to_string()))?;
                let count: f64 = raw
                    .parse()
                    .map_err(|_| EventError::InvalidCount(raw.to_string()))?;
                if !count.is_finite() || count <= 0.0 {
                    return Err(EventError::InvalidCount(raw.to_string()));
                }
                return Ok((TrainerEvent::from_sexp(&fields[2], vocab)?, count));
            }
        }
        Ok((TrainerEvent::from_sexp(sexp, vocab)?, 1.0))
    }

    /// Write the event back to its bracketed form.
    pub fn to_sexp(&self, vocab: &Vocabulary) -> Sexp {
        let sym = |id: SymbolId| Sexp::atom(vocab.resolve(id));
        let word = |w: &Word| Sexp::List(vec![sym(w.word), sym(w.tag)]);
        let subcat = |s: &Subcat| Sexp::List(s.labels().iter().map(|&l| sym(l)).collect());

        match self {
            TrainerEvent::Lexical(e) => {
                Sexp::List(vec![Sexp::atom("lex"), sym(e.word.tag), sym(e.word.word)])
            }
            TrainerEvent::Head(e) => Sexp::List(vec![
                Sexp::atom("head"),
                sym(e.parent),
                sym(e.head),
                word(&e.head_word),
                subcat(&e.left_subcat),
                subcat(&e.right_subcat),
            ]),
            TrainerEvent::Modifier(e) => Sexp::List(vec![
                Sexp::atom("mod"),
                sym(e.parent),
                sym(e.head),
                word(&e.head_word),
                sym(e.modifier),
                word(&e.modifier_word),
                Sexp::atom(e.side.as_str()),
                subcat(&e.subcat),
                Sexp::atom(if e.adjacent { "adj" } else { "nonadj" }),
            ]),
            TrainerEvent::Prior(e) => {
                Sexp::List(vec![Sexp::atom("prior"), sym(e.label), word(&e.head_word)])
            }
        }
    }

    /// Copy of this event with every lexical head passed through `f`.
    pub fn map_words(&self, f: impl Fn(Word) -> Word) -> TrainerEvent {
        match self {
            TrainerEvent::Lexical(e) => TrainerEvent::Lexical(LexicalEvent { word: f(e.word) }),
            TrainerEvent::Head(e) => TrainerEvent::Head(HeadEvent {
                head_word: f(e.head_word),
                ..e.clone()
            }),
            TrainerEvent::Modifier(e) => TrainerEvent::Modifier(ModifierEvent {
                head_word: f(e.head_word),
                modifier_word: f(e.modifier_word),
                ..e.clone()
            }),
            TrainerEvent::Prior(e) => TrainerEvent::Prior(PriorEvent {
                head_word: f(e.head_word),
                ..*e
            }),
        }
    }
}

fn arity(kind: &'static str, fields: &[Sexp], expected: usize) -> EventResult<()> {
    if fields.len() != expected {
        return Err(EventError::Arity {
            kind,
            expected: expected - 1,
            found: fields.len().saturating_sub(1),
        });
    }
    Ok(())
}

fn malformed(kind: &'static str, expected: &'static str, found: &Sexp) -> EventError {
    EventError::Malformed {
        kind,
        expected,
        found: found.to_string(),
    }
}

fn atom(vocab: &mut Vocabulary, kind: &'static str, sexp: &Sexp, what: &'static str) -> EventResult<SymbolId> {
    sexp.as_atom()
        .map(|s| vocab.intern(s))
        .ok_or_else(|| malformed(kind, what, sexp))
}

fn word(vocab: &mut Vocabulary, kind: &'static str, sexp: &Sexp) -> EventResult<Word> {
    match sexp.as_list() {
        Some([w, t]) => match (w.as_atom(), t.as_atom()) {
            (Some(w), Some(t)) => Ok(Word::new(vocab.intern(w), vocab.intern(t))),
            _ => Err(malformed(kind, "(word tag)", sexp)),
        },
        _ => Err(malformed(kind, "(word tag)", sexp)),
    }
}

fn subcat(vocab: &mut Vocabulary, kind: &'static str, sexp: &Sexp) -> EventResult<Subcat> {
    let items = sexp
        .as_list()
        .ok_or_else(|| malformed(kind, "subcat list", sexp))?;
    let mut labels = Vec::with_capacity(items.len());
    for item in items {
        labels.push(atom(vocab, kind, item, "subcat label")?);
    }
    Ok(vocab.subcat(labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::sexp::read_sexp;

    fn vocab() -> Vocabulary {
        Vocabulary::new(&Settings::default())
    }

    #[test]
    fn test_parse_modifier_event() {
        let mut vocab = vocab();
        let sexp = read_sexp("(mod NP NN (dog NN) JJ (big JJ) left () adj)").unwrap();
        let event = TrainerEvent::from_sexp(&sexp, &mut vocab).unwrap();

        match event {
            TrainerEvent::Modifier(m) => {
                assert_eq!(vocab.resolve(m.parent), "NP");
                assert_eq!(vocab.resolve(m.modifier_word.word), "big");
                assert_eq!(m.side, Side::Left);
                assert!(m.adjacent);
                assert!(m.subcat.is_empty());
            }
            other => panic!("expected modifier event, got {:?}", other),
        }
    }

    #[test]
    fn test_event_written_form_reads_back() {
        let mut vocab = vocab();
        let text = "(head S VP (barks VBZ) (NP-C) ())";
        let event = TrainerEvent::from_sexp(&read_sexp(text).unwrap(), &mut vocab).unwrap();
        assert_eq!(event.to_sexp(&vocab).to_string(), text);
    }

    #[test]
    fn test_count_record() {
        let mut vocab = vocab();
        let sexp = read_sexp("(count 3 (lex NN dog))").unwrap();
        let (event, count) = TrainerEvent::record_from_sexp(&sexp, &mut vocab).unwrap();
        assert!(matches!(event, TrainerEvent::Lexical(_)));
        assert_eq!(count, 3.0);
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        let mut vocab = vocab();
        let cases = [
            ("dog", "not a list"),
            ("(frob NN dog)", "unknown kind"),
            ("(lex NN)", "arity"),
            ("(prior S barks)", "word must be a pair"),
            ("(mod NP NN (dog NN) JJ (big JJ) up () adj)", "bad side"),
            ("(count -1 (lex NN dog))", "bad count"),
        ];
        for (text, why) in cases {
            let sexp = read_sexp(text).unwrap();
            assert!(
                TrainerEvent::record_from_sexp(&sexp, &mut vocab).is_err(),
                "accepted malformed record ({}): {}",
                why,
                text
            );
        }
    }

    #[test]
    fn test_projection_check() {
        let mut vocab = vocab();
        let np = vocab.intern("NP");
        let nn = vocab.intern("NN");
        let fine = Event::new().with(Component::Symbol(np)).with(Component::Symbol(nn));
        let coarse = Event::new().with(Component::Symbol(nn));

        assert!(coarse.is_projection_of(&fine));
        assert!(Event::new().is_projection_of(&coarse));
        assert!(!fine.is_projection_of(&coarse));
    }

    #[test]
    fn test_map_words_copies() {
        let mut vocab = vocab();
        let sexp = read_sexp("(prior S (barks VBZ))").unwrap();
        let event = TrainerEvent::from_sexp(&sexp, &mut vocab).unwrap();
        let unknown = vocab.unknown();
        let mapped = event.map_words(|w| Word::new(unknown, w.tag));

        assert_ne!(mapped, event);
        if let TrainerEvent::Prior(p) = event {
            assert_eq!(vocab.resolve(p.head_word.word), "barks");
        }
    }
}
