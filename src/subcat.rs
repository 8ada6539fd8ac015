//! Subcategorization frames.
//!
//! A subcat is the multiset of argument labels a head still requires on one
//! side. It is created full when a head projects and is discharged one label
//! at a time as complements attach. A side may only be stopped once its
//! subcat is empty.

use crate::intern::SymbolId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How requirements are discharged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubcatKind {
    /// Order-free multiset.
    #[default]
    Bag,
    /// Requirements are discharged in the listed order, from the head outward.
    List,
}

/// The argument labels a head still requires on one side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subcat {
    kind: SubcatKind,
    labels: Vec<SymbolId>,
}

impl Subcat {
    /// Create a subcat requiring `labels`.
    pub fn new(kind: SubcatKind, labels: impl IntoIterator<Item = SymbolId>) -> Self {
        let mut labels: Vec<SymbolId> = labels.into_iter().collect();
        if kind == SubcatKind::Bag {
            labels.sort_unstable();
        }
        Subcat { kind, labels }
    }

    /// A subcat with no requirements.
    pub fn empty(kind: SubcatKind) -> Self {
        Subcat {
            kind,
            labels: Vec::new(),
        }
    }

    pub fn kind(&self) -> SubcatKind {
        self.kind
    }

    /// Whether `label` is still required.
    pub fn contains(&self, label: SymbolId) -> bool {
        match self.kind {
            SubcatKind::Bag => self.labels.binary_search(&label).is_ok(),
            SubcatKind::List => self.labels.contains(&label),
        }
    }

    /// Discharge one occurrence of `label`.
    ///
    /// Returns the reduced subcat, leaving `self` untouched, or `None` when the
    /// label cannot be discharged now. A list subcat only discharges its
    /// next requirement.
    pub fn remove(&self, label: SymbolId) -> Option<Subcat> {
        let position = match self.kind {
            SubcatKind::Bag => self.labels.binary_search(&label).ok()?,
            SubcatKind::List => {
                if self.labels.first() != Some(&label) {
                    return None;
                }
                0
            }
        };
        let mut labels = self.labels.clone();
        labels.remove(position);
        Some(Subcat {
            kind: self.kind,
            labels,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[SymbolId] {
        &self.labels
    }
}

impl fmt::Display for Subcat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", label.as_u32())?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::SymbolTable;

    fn labels() -> (SymbolTable, SymbolId, SymbolId) {
        let mut table = SymbolTable::new();
        let np = table.intern("NP-C");
        let s = table.intern("S-C");
        (table, np, s)
    }

    #[test]
    fn test_bag_discharges_in_any_order() {
        let (_t, np, s) = labels();
        let subcat = Subcat::new(SubcatKind::Bag, [s, np, np]);

        assert!(subcat.contains(np));
        let after = subcat.remove(s).unwrap();
        assert_eq!(after.len(), 2);
        let after = after.remove(np).unwrap().remove(np).unwrap();
        assert!(after.is_empty());
        assert!(after.remove(np).is_none());

        // Removal leaves the receiver untouched.
        assert_eq!(subcat.len(), 3);
    }

    #[test]
    fn test_list_discharges_in_order() {
        let (_t, np, s) = labels();
        let subcat = Subcat::new(SubcatKind::List, [np, s]);

        assert!(subcat.contains(s));
        assert!(subcat.remove(s).is_none());
        let after = subcat.remove(np).unwrap();
        assert_eq!(after.labels(), &[s]);
        assert!(after.remove(s).unwrap().is_empty());
    }

    #[test]
    fn test_bag_equality_ignores_construction_order() {
        let (_t, np, s) = labels();
        assert_eq!(
            Subcat::new(SubcatKind::Bag, [np, s]),
            Subcat::new(SubcatKind::Bag, [s, np])
        );
        assert_ne!(
            Subcat::new(SubcatKind::List, [np, s]),
            Subcat::new(SubcatKind::List, [s, np])
        );
    }

    #[test]
    fn test_empty_subcat() {
        let (_t, np, _s) = labels();
        let subcat = Subcat::empty(SubcatKind::Bag);
        assert!(subcat.is_empty());
        assert!(!subcat.contains(np));
        assert!(subcat.remove(np).is_none());
    }
}
