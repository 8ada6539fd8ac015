//! Lexparse: a head-lexicalized statistical chart parser.
//!
//! This crate provides:
//! - Back-off probability estimation over interned events
//! - Trained model sets for heads, subcategorization frames and modifiers
//! - An arena item pool with reference-counted back-pointers
//! - A span-indexed chart with a relative beam and a per-cell limit
//! - Tree and bracket constraints for skeleton-guided parsing
//! - A bottom-up decoder over any `Grammar`

pub mod chart;
pub mod constraint;
pub mod decoder;
pub mod event;
pub mod grammar;
pub mod intern;
pub mod item;
pub mod models;
pub mod pool;
pub mod probability;
pub mod semiring;
pub mod settings;
pub mod sexp;
pub mod subcat;

// Re-exports for convenience
pub use chart::{Chart, ChartError, ChartMode, Insertion};
pub use constraint::{constraints_from_skeleton, BracketConstraints, ConstraintError, ConstraintSet, TreeConstraints};
pub use decoder::{DecodeError, Decoder, Parse};
pub use event::{Event, Side, TrainerEvent, Word};
pub use grammar::{Grammar, GrammarError, ModelGrammar, RuleGrammar};
pub use intern::{SymbolId, SymbolTable};
pub use item::{Item, Span};
pub use models::{ModelError, ModelSet, ModelSetBuilder};
pub use pool::{ItemId, ItemPool, PoolError};
pub use probability::{Model, ModelBuilder, ProbabilityStructure, Smoothing};
pub use semiring::{LogInside, Semiring, Viterbi, LOG_OF_ONE, LOG_OF_ZERO};
pub use settings::{ConstraintKind, Settings, SettingsError, Vocabulary};
pub use sexp::{read_sexp, read_tree, Sexp, SexpError};
pub use subcat::{Subcat, SubcatKind};
