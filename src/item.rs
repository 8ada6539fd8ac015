//! Chart items: scored partial derivations over a span.
//!
//! An item is either a preterminal (a tag over one word) or an interior
//! constituent grown outward from a head child. Interior items carry the
//! subcat still required on each side and whether each side has been
//! stopped; an item with both sides stopped is complete and may be used as
//! a modifier or projected to a parent.

use crate::constraint::ConstraintId;
use crate::event::{Side, Word};
use crate::intern::SymbolId;
use crate::pool::ItemId;
use crate::subcat::Subcat;
use std::cmp::Ordering;
use std::fmt;

/// Half-open word range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start < end, "empty span {}..{}", start, end);
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `other` lies inside `self`.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Partial overlap: neither span contains the other but they share a word.
    pub fn crosses(&self, other: &Span) -> bool {
        (self.start < other.start && other.start < self.end && self.end < other.end)
            || (other.start < self.start && self.start < other.end && other.end < self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// The growth state of an interior item.
#[derive(Clone, Debug, PartialEq)]
pub struct Interior {
    pub head_label: SymbolId,
    pub head_child: ItemId,
    /// Left modifiers, nearest the head first.
    pub left_children: Vec<ItemId>,
    /// Right modifiers, nearest the head first.
    pub right_children: Vec<ItemId>,
    pub left_subcat: Subcat,
    pub right_subcat: Subcat,
    pub left_stopped: bool,
    pub right_stopped: bool,
}

impl Interior {
    pub fn children(&self, side: Side) -> &[ItemId] {
        match side {
            Side::Left => &self.left_children,
            Side::Right => &self.right_children,
        }
    }

    pub fn children_mut(&mut self, side: Side) -> &mut Vec<ItemId> {
        match side {
            Side::Left => &mut self.left_children,
            Side::Right => &mut self.right_children,
        }
    }

    pub fn subcat(&self, side: Side) -> &Subcat {
        match side {
            Side::Left => &self.left_subcat,
            Side::Right => &self.right_subcat,
        }
    }

    pub fn set_subcat(&mut self, side: Side, subcat: Subcat) {
        match side {
            Side::Left => self.left_subcat = subcat,
            Side::Right => self.right_subcat = subcat,
        }
    }

    pub fn stopped(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_stopped,
            Side::Right => self.right_stopped,
        }
    }

    pub fn stop(&mut self, side: Side) {
        match side {
            Side::Left => self.left_stopped = true,
            Side::Right => self.right_stopped = true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ItemKind {
    Preterminal,
    Interior(Interior),
}

/// A scored partial derivation.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub span: Span,
    pub label: SymbolId,
    pub head_word: Word,
    /// Best derivation score, used for pruning and decoding.
    pub log_prob: f64,
    /// Total mass of every merged derivation; equals `log_prob` unless the
    /// chart runs in exhaustive mode.
    pub inside_log_prob: f64,
    /// Constraint node this item satisfies, in tree-constrained parsing.
    pub constraint: Option<ConstraintId>,
    pub kind: ItemKind,
}

impl Item {
    pub fn preterminal(position: usize, word: Word, log_prob: f64) -> Self {
        Item {
            span: Span::new(position, position + 1),
            label: word.tag,
            head_word: word,
            log_prob,
            inside_log_prob: log_prob,
            constraint: None,
            kind: ItemKind::Preterminal,
        }
    }

    pub fn is_preterminal(&self) -> bool {
        matches!(self.kind, ItemKind::Preterminal)
    }

    pub fn interior(&self) -> Option<&Interior> {
        match &self.kind {
            ItemKind::Interior(interior) => Some(interior),
            ItemKind::Preterminal => None,
        }
    }

    pub fn interior_mut(&mut self) -> Option<&mut Interior> {
        match &mut self.kind {
            ItemKind::Interior(interior) => Some(interior),
            ItemKind::Preterminal => None,
        }
    }

    /// Preterminals are born complete.
    pub fn stopped(&self, side: Side) -> bool {
        self.interior().map_or(true, |i| i.stopped(side))
    }

    pub fn is_complete(&self) -> bool {
        self.stopped(Side::Left) && self.stopped(Side::Right)
    }

    pub fn subcat(&self, side: Side) -> Option<&Subcat> {
        self.interior().map(|i| i.subcat(side))
    }

    /// No modifier has attached on `side` yet.
    pub fn adjacent(&self, side: Side) -> bool {
        self.interior().map_or(true, |i| i.children(side).is_empty())
    }

    pub fn head_label(&self) -> Option<SymbolId> {
        self.interior().map(|i| i.head_label)
    }

    /// Every direct child: the head child first, then the modifiers.
    pub fn children(&self) -> Vec<ItemId> {
        match &self.kind {
            ItemKind::Preterminal => Vec::new(),
            ItemKind::Interior(i) => std::iter::once(i.head_child)
                .chain(i.left_children.iter().copied())
                .chain(i.right_children.iter().copied())
                .collect(),
        }
    }

    /// The key under which equivalent items compete in a cell.
    pub fn signature(&self) -> ItemSignature {
        let interior = self.interior();
        ItemSignature {
            label: self.label,
            head_word: self.head_word,
            head_label: interior.map(|i| i.head_label),
            left_subcat: interior.map(|i| i.left_subcat.clone()),
            right_subcat: interior.map(|i| i.right_subcat.clone()),
            left_stopped: self.stopped(Side::Left),
            right_stopped: self.stopped(Side::Right),
            left_adjacent: self.adjacent(Side::Left),
            right_adjacent: self.adjacent(Side::Right),
            constraint: self.constraint,
        }
    }

    /// Order by score, best last.
    pub fn cmp_score(&self, other: &Item) -> Ordering {
        self.log_prob.total_cmp(&other.log_prob)
    }
}

/// Everything future scoring of an item can depend on. Two items with the
/// same signature over the same span are interchangeable except for their
/// score.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemSignature {
    pub label: SymbolId,
    pub head_word: Word,
    pub head_label: Option<SymbolId>,
    pub left_subcat: Option<Subcat>,
    pub right_subcat: Option<Subcat>,
    pub left_stopped: bool,
    pub right_stopped: bool,
    pub left_adjacent: bool,
    pub right_adjacent: bool,
    pub constraint: Option<ConstraintId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::SymbolTable;
    use crate::subcat::SubcatKind;

    fn dog() -> (SymbolTable, Word) {
        let mut t = SymbolTable::new();
        let word = Word::new(t.intern("dog"), t.intern("NN"));
        (t, word)
    }

    #[test]
    fn test_span_relations() {
        let outer = Span::new(0, 4);
        let inner = Span::new(1, 3);
        let other = Span::new(2, 6);

        assert_eq!(outer.len(), 4);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.crosses(&other));
        assert!(other.crosses(&outer));
        assert!(!outer.crosses(&inner));
        assert!(!Span::new(0, 2).crosses(&Span::new(2, 4)));
    }

    #[test]
    fn test_preterminal_is_complete() {
        let (_t, word) = dog();
        let item = Item::preterminal(3, word, -1.0);
        assert!(item.is_preterminal());
        assert!(item.is_complete());
        assert_eq!(item.span, Span::new(3, 4));
        assert_eq!(item.label, word.tag);
        assert!(item.children().is_empty());
        assert!(item.subcat(Side::Left).is_none());
    }

    #[test]
    fn test_signature_distinguishes_growth_state() {
        let (mut t, word) = dog();
        let np = t.intern("NP");
        let head = ItemId::new(0, 0);
        let interior = Interior {
            head_label: word.tag,
            head_child: head,
            left_children: Vec::new(),
            right_children: Vec::new(),
            left_subcat: Subcat::empty(SubcatKind::Bag),
            right_subcat: Subcat::empty(SubcatKind::Bag),
            left_stopped: false,
            right_stopped: false,
        };
        let a = Item {
            span: Span::new(0, 1),
            label: np,
            head_word: word,
            log_prob: -2.0,
            inside_log_prob: -2.0,
            constraint: None,
            kind: ItemKind::Interior(interior),
        };

        let mut b = a.clone();
        b.log_prob = -5.0;
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.cmp_score(&b), Ordering::Greater);

        let mut c = a.clone();
        if let Some(i) = c.interior_mut() {
            i.stop(Side::Left);
        }
        assert_ne!(a.signature(), c.signature());
        assert!(!c.is_complete());
        assert!(c.stopped(Side::Left));
        assert_eq!(c.children(), vec![head]);
    }
}
