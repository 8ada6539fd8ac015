//! Constraints from a partial parse skeleton.
//!
//! Two implementations share the `ConstraintSet` interface:
//!
//! - `TreeConstraints` mirrors the skeleton node for node. Every item the
//!   decoder builds must be assigned a satisfying node, found constructively
//!   from the node already assigned to its head child, so local consistency
//!   implies global consistency and no violation scan is needed.
//! - `BracketConstraints` is a flat set of spans. Items are accepted unless
//!   they cross one of them.

use crate::intern::SymbolId;
use crate::item::{Item, ItemKind, Span};
use crate::pool::ItemPool;
use crate::settings::{ConstraintKind, Vocabulary};
use crate::sexp::{Sexp, MAX_DEPTH};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstraintError {
    #[error("skeleton has no words")]
    EmptyTree,
    #[error("constituent {0} has no children")]
    EmptyConstituent(String),
    #[error("skeleton label must be an atom, found {0}")]
    NonAtomLabel(String),
    #[error("skeleton covers {skeleton} words but the sentence has {sentence}")]
    LeafCount { skeleton: usize, sentence: usize },
    #[error("constraint parsing is disabled")]
    Disabled,
    #[error("skeleton nests deeper than {0}")]
    TooDeep(usize),
}

/// Index of a node in a `TreeConstraints` arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(u32);

impl ConstraintId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Restrictions on which items the decoder may build.
pub trait ConstraintSet {
    /// Whether the constraints form a tree isomorphic to the skeleton.
    fn has_tree_structure(&self) -> bool;

    /// Every item must be assigned a satisfying constraint.
    fn find_at_least_one_satisfying(&self) -> bool;

    /// Every item must be checked for violations.
    fn find_no_violations(&self) -> bool;

    /// Number of words the constraints were built for.
    fn num_words(&self) -> usize;

    /// The constraint `item` satisfies, if any.
    fn constraint_satisfying(&self, item: &Item, pool: &ItemPool) -> Option<ConstraintId>;

    /// Whether `item` violates any constraint.
    fn contains_violation(&self, item: &Item) -> bool;

    /// Whether a sentence-spanning `item` satisfies the whole set.
    fn is_satisfied_by_root(&self, item: &Item) -> bool;

    fn check_sentence(&self, len: usize) -> Result<(), ConstraintError> {
        if self.num_words() != len {
            return Err(ConstraintError::LeafCount {
                skeleton: self.num_words(),
                sentence: len,
            });
        }
        Ok(())
    }
}

/// Build the constraint set selected by `kind`.
pub fn constraints_from_skeleton(
    kind: ConstraintKind,
    skeleton: &Sexp,
    vocab: &Vocabulary,
) -> Result<Box<dyn ConstraintSet>, ConstraintError> {
    match kind {
        ConstraintKind::None => Err(ConstraintError::Disabled),
        ConstraintKind::Tree => Ok(Box::new(TreeConstraints::from_skeleton(skeleton, vocab)?)),
        ConstraintKind::Brackets => Ok(Box::new(BracketConstraints::from_skeleton(skeleton)?)),
    }
}

/// Strip function tags and indices: `NP-SBJ-1` becomes `NP`. Labels that
/// begin with a dash (`-NONE-`, `-LRB-`) are kept whole.
pub fn base_label(label: &str) -> &str {
    if label.starts_with('-') {
        return label;
    }
    match label.find(|c: char| c == '-' || c == '=') {
        Some(end) if end > 0 => &label[..end],
        _ => label,
    }
}

/// Node label requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintLabel {
    /// Untagged word: any preterminal matches.
    Any,
    /// Index into the skeleton's table of base labels.
    Base(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintNode {
    pub label: ConstraintLabel,
    pub span: Span,
    pub parent: Option<ConstraintId>,
    pub children: Vec<ConstraintId>,
}

impl ConstraintNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Tree-isomorphic constraints stored in an arena.
#[derive(Clone, Debug)]
pub struct TreeConstraints {
    nodes: Vec<ConstraintNode>,
    leaves: Vec<ConstraintId>,
    root: ConstraintId,
    base_labels: Vec<String>,
    /// Symbol -> index into `base_labels`, for every vocabulary symbol whose
    /// base form appears in the skeleton.
    symbol_bases: FxHashMap<SymbolId, u32>,
}

impl TreeConstraints {
    /// Build the node arena for `skeleton`.
    ///
    /// A two-element list `(X w)` is read as a preterminal: the word `w`
    /// must be tagged `X`. A bare word among two or more children leaves its
    /// tag free, so `(VP barks)` requires the tag `VP` while
    /// `(VP (VBZ barks))` describes a verb phrase.
    pub fn from_skeleton(skeleton: &Sexp, vocab: &Vocabulary) -> Result<Self, ConstraintError> {
        let mut builder = TreeBuilder::default();
        let root = builder.node(skeleton.strip_wrapper(), None)?;
        if builder.leaves.is_empty() {
            return Err(ConstraintError::EmptyTree);
        }

        let mut symbol_bases = FxHashMap::default();
        for (id, name) in vocab.symbols().iter() {
            let base = base_label(name);
            if let Some(index) = builder.base_labels.iter().position(|b| b == base) {
                symbol_bases.insert(id, index as u32);
            }
        }

        Ok(TreeConstraints {
            nodes: builder.nodes,
            leaves: builder.leaves,
            root,
            base_labels: builder.base_labels,
            symbol_bases,
        })
    }

    pub fn root(&self) -> ConstraintId {
        self.root
    }

    pub fn node(&self, id: ConstraintId) -> &ConstraintNode {
        &self.nodes[id.index()]
    }

    pub fn leaves(&self) -> &[ConstraintId] {
        &self.leaves
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Base label text of a node, `None` for untagged leaves.
    pub fn label_text(&self, id: ConstraintId) -> Option<&str> {
        match self.node(id).label {
            ConstraintLabel::Any => None,
            ConstraintLabel::Base(index) => Some(&self.base_labels[index as usize]),
        }
    }

    fn label_matches(&self, id: ConstraintId, item: &Item) -> bool {
        match self.node(id).label {
            ConstraintLabel::Any => item.is_preterminal(),
            ConstraintLabel::Base(index) => self.symbol_bases.get(&item.label) == Some(&index),
        }
    }

    /// Label match and span containment; a complete item must cover the
    /// node's span exactly.
    pub fn is_locally_satisfied_by(&self, id: ConstraintId, item: &Item) -> bool {
        let node = self.node(id);
        if !self.label_matches(id, item) || !node.span.contains(&item.span) {
            return false;
        }
        !item.is_complete() || node.span == item.span
    }
}

impl ConstraintSet for TreeConstraints {
    fn has_tree_structure(&self) -> bool {
        true
    }

    fn find_at_least_one_satisfying(&self) -> bool {
        true
    }

    fn find_no_violations(&self) -> bool {
        false
    }

    fn num_words(&self) -> usize {
        self.leaves.len()
    }

    fn constraint_satisfying(&self, item: &Item, pool: &ItemPool) -> Option<ConstraintId> {
        let interior = match &item.kind {
            ItemKind::Preterminal => {
                let leaf = *self.leaves.get(item.span.start)?;
                return self.is_locally_satisfied_by(leaf, item).then_some(leaf);
            }
            ItemKind::Interior(interior) => interior,
        };

        // A continuation keeps the node of the item it extends; a fresh
        // projection moves to the parent of its head child's node.
        let candidate = match item.constraint {
            Some(id) => id,
            None => {
                let head = pool.get(interior.head_child)?;
                self.node(head.constraint?).parent?
            }
        };
        if !self.is_locally_satisfied_by(candidate, item) {
            return None;
        }

        let modifiers_fit = interior
            .left_children
            .iter()
            .chain(interior.right_children.iter())
            .all(|&child| {
                pool.get(child)
                    .and_then(|c| c.constraint)
                    .map_or(false, |c| self.node(c).parent == Some(candidate))
            });
        modifiers_fit.then_some(candidate)
    }

    fn contains_violation(&self, _item: &Item) -> bool {
        false
    }

    fn is_satisfied_by_root(&self, item: &Item) -> bool {
        item.constraint == Some(self.root) && item.span == self.node(self.root).span
    }
}

#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<ConstraintNode>,
    leaves: Vec<ConstraintId>,
    base_labels: Vec<String>,
    depth: usize,
}

impl TreeBuilder {
    fn push(&mut self, label: ConstraintLabel, span: Span, parent: Option<ConstraintId>) -> ConstraintId {
        let id = ConstraintId(self.nodes.len() as u32);
        self.nodes.push(ConstraintNode {
            label,
            span,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    fn base(&mut self, label: &str) -> ConstraintLabel {
        let base = base_label(label);
        let index = match self.base_labels.iter().position(|b| b == base) {
            Some(index) => index,
            None => {
                self.base_labels.push(base.to_string());
                self.base_labels.len() - 1
            }
        };
        ConstraintLabel::Base(index as u32)
    }

    fn leaf(&mut self, label: ConstraintLabel, parent: Option<ConstraintId>) -> ConstraintId {
        let position = self.leaves.len();
        let id = self.push(label, Span::new(position, position + 1), parent);
        self.leaves.push(id);
        id
    }

    fn node(&mut self, sexp: &Sexp, parent: Option<ConstraintId>) -> Result<ConstraintId, ConstraintError> {
        let items = match sexp {
            Sexp::Atom(_) => return Ok(self.leaf(ConstraintLabel::Any, parent)),
            Sexp::List(items) => items,
        };
        let label = match items.first() {
            Some(Sexp::Atom(label)) => label,
            Some(other) => return Err(ConstraintError::NonAtomLabel(other.to_string())),
            None => return Err(ConstraintError::EmptyConstituent(sexp.to_string())),
        };

        // `(X w)` is always a preterminal, so X constrains the tag of w even
        // when X names a phrase.
        if sexp.is_preterminal() {
            let label = self.base(label);
            return Ok(self.leaf(label, parent));
        }
        if items.len() < 2 {
            return Err(ConstraintError::EmptyConstituent(sexp.to_string()));
        }
        if self.depth >= MAX_DEPTH {
            return Err(ConstraintError::TooDeep(MAX_DEPTH));
        }

        let label = self.base(label);
        let start = self.leaves.len();
        // Span is patched once the children are known.
        let id = self.push(label, Span { start, end: start + 1 }, parent);
        self.depth += 1;
        for child in &items[1..] {
            self.node(child, Some(id))?;
        }
        self.depth -= 1;
        self.nodes[id.index()].span = Span::new(start, self.leaves.len());
        Ok(id)
    }
}

/// Flat crossing-bracket constraints.
#[derive(Clone, Debug, Default)]
pub struct BracketConstraints {
    spans: Vec<Span>,
    num_words: usize,
}

impl BracketConstraints {
    pub fn new(spans: impl IntoIterator<Item = Span>, num_words: usize) -> Self {
        let mut spans: Vec<Span> = spans.into_iter().filter(|s| s.len() > 1).collect();
        spans.sort();
        spans.dedup();
        BracketConstraints { spans, num_words }
    }

    /// Every multi-word constituent of the skeleton becomes a bracket.
    pub fn from_skeleton(skeleton: &Sexp) -> Result<Self, ConstraintError> {
        let mut builder = TreeBuilder::default();
        builder.node(skeleton.strip_wrapper(), None)?;
        if builder.leaves.is_empty() {
            return Err(ConstraintError::EmptyTree);
        }
        let num_words = builder.leaves.len();
        Ok(Self::new(builder.nodes.iter().map(|n| n.span), num_words))
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }
}

impl ConstraintSet for BracketConstraints {
    fn has_tree_structure(&self) -> bool {
        false
    }

    fn find_at_least_one_satisfying(&self) -> bool {
        false
    }

    fn find_no_violations(&self) -> bool {
        true
    }

    fn num_words(&self) -> usize {
        self.num_words
    }

    fn constraint_satisfying(&self, _item: &Item, _pool: &ItemPool) -> Option<ConstraintId> {
        None
    }

    fn contains_violation(&self, item: &Item) -> bool {
        self.spans.iter().any(|s| s.crosses(&item.span))
    }

    fn is_satisfied_by_root(&self, item: &Item) -> bool {
        !self.contains_violation(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Word;
    use crate::item::Interior;
    use crate::pool::ItemId;
    use crate::settings::Settings;
    use crate::sexp::read_sexp;

    fn vocab() -> Vocabulary {
        let mut vocab = Vocabulary::new(&Settings::default());
        for s in ["S", "NP", "NP-C", "VP", "DT", "NN", "VBZ", "the", "dog", "barks"] {
            vocab.intern(s);
        }
        vocab
    }

    fn interior(
        vocab: &Vocabulary,
        label: &str,
        span: Span,
        head: ItemId,
        head_word: Word,
        left: Vec<ItemId>,
        stopped: bool,
    ) -> Item {
        Item {
            span,
            label: vocab.get(label).unwrap(),
            head_word,
            log_prob: 0.0,
            inside_log_prob: 0.0,
            constraint: None,
            kind: ItemKind::Interior(Interior {
                head_label: head_word.tag,
                head_child: head,
                left_children: left,
                right_children: Vec::new(),
                left_subcat: vocab.empty_subcat(),
                right_subcat: vocab.empty_subcat(),
                left_stopped: stopped,
                right_stopped: stopped,
            }),
        }
    }

    #[test]
    fn test_base_label() {
        assert_eq!(base_label("NP-SBJ-1"), "NP");
        assert_eq!(base_label("NP=2"), "NP");
        assert_eq!(base_label("-NONE-"), "-NONE-");
        assert_eq!(base_label("VP"), "VP");
    }

    #[test]
    fn test_two_element_list_constrains_the_tag() {
        let vocab = vocab();
        let pool = ItemPool::new(4, None);
        let barks = vocab.get("barks").unwrap();
        let vbz = Item::preterminal(2, Word::new(barks, vocab.get("VBZ").unwrap()), 0.0);

        let skeleton = read_sexp("(S (NP (DT the) (NN dog)) (VP barks))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.label_text(tree.leaves()[2]), Some("VP"));
        assert_eq!(tree.constraint_satisfying(&vbz, &pool), None);

        let skeleton = read_sexp("(S (NP (DT the) (NN dog)) (VP (VBZ barks)))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();
        assert_eq!(tree.constraint_satisfying(&vbz, &pool), Some(tree.leaves()[2]));

        // Bare words next to a sibling leave the tag free.
        let skeleton = read_sexp("(S (NP the dog) (VP (VBZ barks)))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();
        assert_eq!(tree.node(tree.leaves()[0]).label, ConstraintLabel::Any);
    }

    #[test]
    fn test_deep_skeleton_is_rejected() {
        let mut skeleton = read_sexp("(NN dog)").unwrap();
        for _ in 0..=MAX_DEPTH {
            skeleton = Sexp::List(vec![Sexp::atom("NP"), skeleton, Sexp::atom("dog")]);
        }
        assert_eq!(
            TreeConstraints::from_skeleton(&skeleton, &vocab()).unwrap_err(),
            ConstraintError::TooDeep(MAX_DEPTH)
        );
    }

    #[test]
    fn test_tree_shape() {
        let vocab = vocab();
        let skeleton = read_sexp("((S (NP-SBJ (DT the) (NN dog)) (VP (VBZ barks))))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();

        assert_eq!(tree.num_words(), 3);
        assert_eq!(tree.node(tree.root()).span, Span::new(0, 3));
        assert_eq!(tree.label_text(tree.root()), Some("S"));

        let np = tree.node(tree.root()).children[0];
        assert_eq!(tree.node(np).span, Span::new(0, 2));
        assert_eq!(tree.label_text(np), Some("NP"));
        for &leaf in tree.leaves() {
            assert!(tree.node(leaf).is_leaf());
        }
        assert_eq!(tree.node(tree.leaves()[1]).parent, Some(np));
        assert!(tree.check_sentence(3).is_ok());
        assert_eq!(
            tree.check_sentence(2),
            Err(ConstraintError::LeafCount { skeleton: 3, sentence: 2 })
        );
    }

    #[test]
    fn test_constructive_satisfaction() {
        let vocab = vocab();
        let skeleton = read_sexp("(S (NP (DT the) (NN dog)) (VP (VBZ barks)))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();
        let mut pool = ItemPool::new(8, None);

        let the = Word::new(vocab.get("the").unwrap(), vocab.get("DT").unwrap());
        let dog = Word::new(vocab.get("dog").unwrap(), vocab.get("NN").unwrap());

        let mut dt = Item::preterminal(0, the, 0.0);
        dt.constraint = tree.constraint_satisfying(&dt, &pool);
        assert_eq!(dt.constraint, Some(tree.leaves()[0]));
        let dt = pool.allocate(dt).unwrap();

        let mut nn = Item::preterminal(1, dog, 0.0);
        nn.constraint = tree.constraint_satisfying(&nn, &pool);
        let nn = pool.allocate(nn).unwrap();

        // A preterminal with the wrong tag has no leaf to satisfy.
        let wrong = Item::preterminal(1, Word::new(dog.word, vocab.get("VBZ").unwrap()), 0.0);
        assert_eq!(tree.constraint_satisfying(&wrong, &pool), None);

        // Fresh projection NN -> NP moves to the parent node.
        let np = interior(&vocab, "NP", Span::new(1, 2), nn, dog, Vec::new(), false);
        let np_node = tree.constraint_satisfying(&np, &pool).unwrap();
        assert_eq!(tree.label_text(np_node), Some("NP"));

        // Complete over (1,2) is not the node's exact span.
        let short = interior(&vocab, "NP", Span::new(1, 2), nn, dog, Vec::new(), true);
        assert_eq!(tree.constraint_satisfying(&short, &pool), None);

        // Continuation that attaches the determiner and stops.
        let mut full = interior(&vocab, "NP", Span::new(0, 2), nn, dog, vec![dt], true);
        full.constraint = Some(np_node);
        assert_eq!(tree.constraint_satisfying(&full, &pool), Some(np_node));

        // Augmented grammar labels match their base form.
        let np_c = interior(&vocab, "NP-C", Span::new(1, 2), nn, dog, Vec::new(), false);
        assert_eq!(tree.constraint_satisfying(&np_c, &pool), Some(np_node));

        // Wrong label.
        let vp = interior(&vocab, "VP", Span::new(1, 2), nn, dog, Vec::new(), false);
        assert_eq!(tree.constraint_satisfying(&vp, &pool), None);
    }

    #[test]
    fn test_untagged_leaves_match_any_tag() {
        let vocab = vocab();
        let skeleton = read_sexp("(S (NP the dog) (VP barks))").unwrap();
        let tree = TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap();
        let pool = ItemPool::new(1, None);

        let dog = Word::new(vocab.get("dog").unwrap(), vocab.get("VBZ").unwrap());
        let item = Item::preterminal(1, dog, 0.0);
        assert_eq!(tree.constraint_satisfying(&item, &pool), Some(tree.leaves()[1]));
    }

    #[test]
    fn test_ill_formed_skeletons() {
        let vocab = vocab();
        for (text, expected) in [
            ("(S)", ConstraintError::EmptyConstituent("(S)".into())),
            ("((NP dog) barks)", ConstraintError::NonAtomLabel("(NP dog)".into())),
        ] {
            let skeleton = read_sexp(text).unwrap();
            assert_eq!(TreeConstraints::from_skeleton(&skeleton, &vocab).unwrap_err(), expected);
        }
        let skeleton = read_sexp("(S dog)").unwrap();
        assert!(matches!(
            constraints_from_skeleton(ConstraintKind::None, &skeleton, &vocab),
            Err(ConstraintError::Disabled)
        ));
    }

    #[test]
    fn test_brackets() {
        let skeleton = read_sexp("(S (NP (DT the) (NN dog)) (VP (VBZ barks)))").unwrap();
        let brackets = BracketConstraints::from_skeleton(&skeleton).unwrap();
        assert_eq!(brackets.spans(), &[Span::new(0, 2), Span::new(0, 3)]);
        assert!(!brackets.has_tree_structure());
        assert!(brackets.find_no_violations());

        let vocab = vocab();
        let dog = Word::new(vocab.get("dog").unwrap(), vocab.get("NN").unwrap());
        let mut item = Item::preterminal(1, dog, 0.0);
        assert!(!brackets.contains_violation(&item));
        item.span = Span::new(1, 3);
        assert!(brackets.contains_violation(&item));
        item.span = Span::new(0, 3);
        assert!(brackets.is_satisfied_by_root(&item));
    }
}
