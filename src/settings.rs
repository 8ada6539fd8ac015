//! Parser settings and the vocabulary context built from them.
//!
//! `Settings` is plain data loaded from JSON. Every field has a default, so a
//! settings file only lists what it overrides. Implementation choices (chart
//! mode, subcat discharge order, constraint handling) are enums; an unknown
//! name fails deserialization, which is fatal before any decoding begins.

use crate::chart::ChartMode;
use crate::event::Word;
use crate::intern::{SymbolId, SymbolTable};
use crate::subcat::{Subcat, SubcatKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Which constraint set a skeleton is converted into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// Skeletons are not accepted.
    #[default]
    None,
    /// Tree-isomorphic constraints; every item needs a satisfying node.
    Tree,
    /// Flat crossing-bracket constraints; items are checked for violations.
    Brackets,
}

/// Tunable parameters of the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of items per chart cell.
    pub cell_limit: usize,
    /// Whether `cell_limit` is enforced.
    pub use_cell_limit: bool,
    /// Beam width as a natural-log probability margin below the cell best.
    pub prune_factor: f64,
    /// Whether the relative beam is enforced.
    pub use_prune: bool,
    /// Sentence length the chart is allocated for up front.
    pub chart_size: usize,
    /// Item slots the pool allocates up front.
    pub pool_capacity: usize,
    /// Hard cap on item slots; `None` lets the pool grow.
    pub pool_hard_cap: Option<usize>,
    /// Longest sentence the decoder accepts.
    pub max_sentence_len: usize,
    pub chart_mode: ChartMode,
    pub subcat_kind: SubcatKind,
    pub constraint_kind: ConstraintKind,
    pub top_label: String,
    pub stop_symbol: String,
    pub unknown_word: String,
    /// Training words seen at most this often are mapped to `unknown_word`.
    pub unknown_word_threshold: u32,
    /// Diversity multiplier in the back-off weight.
    pub lambda_fudge: f64,
    /// Additive term in the back-off weight.
    pub lambda_fudge_term: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cell_limit: 100,
            use_cell_limit: true,
            prune_factor: 4.0 * std::f64::consts::LN_10,
            use_prune: true,
            chart_size: 50,
            pool_capacity: 50_000,
            pool_hard_cap: None,
            max_sentence_len: 100,
            chart_mode: ChartMode::Beam,
            subcat_kind: SubcatKind::Bag,
            constraint_kind: ConstraintKind::None,
            top_label: "+TOP+".to_string(),
            stop_symbol: "+STOP+".to_string(),
            unknown_word: "+unknown+".to_string(),
            unknown_word_threshold: 0,
            lambda_fudge: 5.0,
            lambda_fudge_term: 0.0,
        }
    }
}

impl Settings {
    /// Parse settings from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Reject values no decoder can run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.use_cell_limit && self.cell_limit == 0 {
            return Err(SettingsError::Invalid("cell_limit must be positive".into()));
        }
        if self.use_prune && !(self.prune_factor >= 0.0) {
            return Err(SettingsError::Invalid(format!(
                "prune_factor must be a non-negative log margin, got {}",
                self.prune_factor
            )));
        }
        if let Some(cap) = self.pool_hard_cap {
            if cap == 0 || (self.use_cell_limit && cap < self.cell_limit) {
                return Err(SettingsError::Invalid(format!(
                    "pool_hard_cap {} cannot hold a single cell",
                    cap
                )));
            }
        }
        if self.max_sentence_len == 0 {
            return Err(SettingsError::Invalid("max_sentence_len must be positive".into()));
        }
        if !(self.lambda_fudge >= 0.0) || !(self.lambda_fudge_term >= 0.0) {
            return Err(SettingsError::Invalid("smoothing fudge values must be non-negative".into()));
        }
        let symbols = [&self.top_label, &self.stop_symbol, &self.unknown_word];
        if symbols.iter().any(|s| s.is_empty()) {
            return Err(SettingsError::Invalid("distinguished symbols must be non-empty".into()));
        }
        Ok(())
    }

    /// The beam margin in force, if any.
    pub fn prune_margin(&self) -> Option<f64> {
        self.use_prune.then_some(self.prune_factor)
    }

    /// The cell limit in force, if any.
    pub fn cell_limit(&self) -> Option<usize> {
        self.use_cell_limit.then_some(self.cell_limit)
    }
}

/// Symbols plus the distinguished constants every component needs.
///
/// Built once from `Settings` and passed by reference; there is no global
/// table.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: SymbolTable,
    subcat_kind: SubcatKind,
    top: SymbolId,
    stop: SymbolId,
    unknown: SymbolId,
}

impl Vocabulary {
    pub fn new(settings: &Settings) -> Self {
        let mut symbols = SymbolTable::new();
        let top = symbols.intern(&settings.top_label);
        let stop = symbols.intern(&settings.stop_symbol);
        let unknown = symbols.intern(&settings.unknown_word);
        Vocabulary {
            symbols,
            subcat_kind: settings.subcat_kind,
            top,
            stop,
            unknown,
        }
    }

    pub fn intern(&mut self, s: &str) -> SymbolId {
        self.symbols.intern(s)
    }

    pub fn get(&self, s: &str) -> Option<SymbolId> {
        self.symbols.get(s)
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        self.symbols.resolve(id)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn top(&self) -> SymbolId {
        self.top
    }

    pub fn stop(&self) -> SymbolId {
        self.stop
    }

    pub fn unknown(&self) -> SymbolId {
        self.unknown
    }

    /// The lexical head carried by stop events.
    pub fn stop_word(&self) -> Word {
        Word::new(self.stop, self.stop)
    }

    pub fn subcat_kind(&self) -> SubcatKind {
        self.subcat_kind
    }

    pub fn subcat(&self, labels: impl IntoIterator<Item = SymbolId>) -> Subcat {
        Subcat::new(self.subcat_kind, labels)
    }

    pub fn empty_subcat(&self) -> Subcat {
        Subcat::empty(self.subcat_kind)
    }
}
