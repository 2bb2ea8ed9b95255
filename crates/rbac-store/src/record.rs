//! Rule records and the value codec.
//!
//! # Purpose
//! Converts between casbin rule vectors and the fixed-arity row stored in the
//! `casbin_rule` table.
//!
//! # Key invariants
//! - `(ptype, v0..v5)` is the full identity of a record; there is no surrogate id.
//! - Trailing empty slots are absent, not empty values: decoding truncates the
//!   value list at the last non-empty slot.
//! - Values are never joined into or split out of delimited text. Conditions
//!   such as `env == "dev" , ok` must survive storage byte for byte.
//!
//! # Common pitfalls
//! - A record whose slots are all empty represents no policy. Callers skip it;
//!   it is never written and never fed to the model.
use crate::errors::CodecError;
use serde::{Deserialize, Serialize};

/// Number of value columns in the rule table.
pub const MAX_SLOTS: usize = 6;

/// Column names in slot order; also the allowlist for filtered SQL.
pub(crate) const SLOT_COLUMNS: [&str; MAX_SLOTS] = ["v0", "v1", "v2", "v3", "v4", "v5"];

/// One stored policy or grouping statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRecord {
    pub ptype: String,
    pub values: [String; MAX_SLOTS],
}

impl RuleRecord {
    /// Build a record from a type discriminator and up to six raw values.
    ///
    /// Returns the record together with the index of the last non-empty value.
    /// `None` means every value is empty and the record must be skipped.
    ///
    /// # Errors
    /// - [`CodecError::MissingType`] for an empty `ptype`.
    /// - [`CodecError::TooManyValues`] when more than [`MAX_SLOTS`] values are given.
    ///
    /// # Example
    /// ```rust
    /// use rbac_store::RuleRecord;
    ///
    /// let values = vec!["alice".to_string(), "".to_string(), "read".to_string()];
    /// let (record, last) = RuleRecord::encode("p", &values).unwrap();
    /// assert_eq!(last, Some(2));
    /// assert_eq!(record.values[3], "");
    /// ```
    pub fn encode<S: AsRef<str>>(
        ptype: &str,
        values: &[S],
    ) -> Result<(Self, Option<usize>), CodecError> {
        if ptype.is_empty() {
            return Err(CodecError::MissingType);
        }
        if values.len() > MAX_SLOTS {
            return Err(CodecError::TooManyValues {
                ptype: ptype.to_string(),
                len: values.len(),
            });
        }
        let mut slots: [String; MAX_SLOTS] = Default::default();
        for (slot, value) in slots.iter_mut().zip(values) {
            *slot = value.as_ref().to_string();
        }
        let record = Self {
            ptype: ptype.to_string(),
            values: slots,
        };
        let last = record.last_non_empty();
        Ok((record, last))
    }

    /// Build a record from raw column values as read from a row.
    pub fn from_columns(ptype: String, values: [String; MAX_SLOTS]) -> Self {
        Self { ptype, values }
    }

    /// Index of the highest populated slot, or `None` if all slots are empty.
    pub fn last_non_empty(&self) -> Option<usize> {
        self.values.iter().rposition(|value| !value.is_empty())
    }

    pub fn is_degenerate(&self) -> bool {
        self.last_non_empty().is_none()
    }

    /// Decode into the value list handed to casbin.
    ///
    /// Empty holes before the last populated slot are kept; trailing empty
    /// slots are dropped. Degenerate records decode to `None`.
    pub fn to_values(&self) -> Option<Vec<String>> {
        let last = self.last_non_empty()?;
        Some(self.values[..=last].to_vec())
    }

    /// Model section this record belongs to (`"p"` or `"g"`), if recognizable.
    pub fn section(&self) -> Option<&'static str> {
        match self.ptype.as_bytes().first() {
            Some(b'p') => Some("p"),
            Some(b'g') => Some("g"),
            _ => None,
        }
    }
}

/// Which record types a [`RuleFilter`] applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMatch {
    /// Exactly this ptype, e.g. `g2`.
    Exact(String),
    /// Every ptype of a model section, e.g. all of `g`, `g2`, `g3`.
    Section(String),
}

impl TypeMatch {
    pub fn matches(&self, ptype: &str) -> bool {
        match self {
            TypeMatch::Exact(expected) => ptype == expected,
            TypeMatch::Section(section) => ptype.starts_with(section.as_str()),
        }
    }
}

/// Filter with casbin's field semantics.
///
/// `values[i]` constrains slot `field_index + i`; an empty value is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFilter {
    pub types: TypeMatch,
    pub field_index: usize,
    pub values: Vec<String>,
}

impl RuleFilter {
    pub fn new(types: TypeMatch, field_index: usize, values: Vec<String>) -> Self {
        Self {
            types,
            field_index,
            values,
        }
    }

    /// Slot constraints as `(slot index, value)` pairs, wildcards and
    /// out-of-range slots removed.
    pub fn constraints(&self) -> impl Iterator<Item = (usize, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(offset, value)| (self.field_index + offset, value.as_str()))
            .filter(|(slot, value)| *slot < MAX_SLOTS && !value.is_empty())
    }

    /// True when the filter references a slot the table does not have.
    pub fn out_of_range(&self) -> bool {
        self.values
            .iter()
            .enumerate()
            .any(|(offset, value)| self.field_index + offset >= MAX_SLOTS && !value.is_empty())
    }

    pub fn matches(&self, record: &RuleRecord) -> bool {
        if !self.types.matches(&record.ptype) || self.out_of_range() {
            return false;
        }
        self.constraints()
            .all(|(slot, value)| record.values[slot] == value)
    }
}
