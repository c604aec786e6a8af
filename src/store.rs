//! Entry storage interface consumed by the pipeline, plus an in-memory backend.

use crate::error::Result;
use crate::schema::{CaseRecord, CostRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Record selection by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum Selector {
    All,
    /// Exact reference, compared after normalization.
    Reference(String),
    /// Every reference belonging to a family key: the key followed by anything
    /// but another digit of the family number.
    Family(String),
}

impl Selector {
    pub fn matches(&self, reference: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Reference(expected) => {
                normalize_reference(reference) == normalize_reference(expected)
            }
            Selector::Family(key) => {
                let reference = normalize_reference(reference);
                match reference.strip_prefix(normalize_reference(key).as_str()) {
                    Some(rest) => !rest.starts_with(|c: char| c.is_ascii_digit()),
                    None => false,
                }
            }
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => write!(f, "*"),
            Selector::Reference(reference) => write!(f, "{reference}"),
            Selector::Family(key) => write!(f, "{key}*"),
        }
    }
}

fn normalize_reference(reference: &str) -> String {
    reference
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '/')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// A record that can live in an [`EntryStore`].
pub trait StoredEntry {
    /// Identity used for upserts; iteration runs in ascending identity order.
    fn entry_id(&self) -> String;

    /// Reference the [`Selector`] is matched against.
    fn reference(&self) -> &str;
}

impl StoredEntry for CaseRecord {
    fn entry_id(&self) -> String {
        self.reference.clone()
    }

    fn reference(&self) -> &str {
        &self.reference
    }
}

impl StoredEntry for CostRecord {
    fn entry_id(&self) -> String {
        self.id.clone()
    }

    fn reference(&self) -> &str {
        &self.case_reference
    }
}

pub trait EntryStore<T> {
    /// Lazily yields matching records in ascending identity order. A fresh call
    /// re-scans the store.
    fn iterate<'a>(&'a self, selector: &Selector) -> Result<Box<dyn Iterator<Item = T> + 'a>>;

    /// Identities of matching records, in iteration order.
    fn entry_ids(&self, selector: &Selector) -> Result<Vec<String>>;

    fn get(&self, entry_id: &str) -> Result<Option<T>>;

    /// Creates or overwrites a record by identity.
    fn upsert(&mut self, record: T) -> Result<T>;

    fn count_matching(&self, selector: &Selector) -> Result<usize>;

    fn delete_matching(&mut self, selector: &Selector) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct MemoryStore<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: StoredEntry + Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = T>) -> Self {
        let entries = records
            .into_iter()
            .map(|record| (record.entry_id(), record))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: StoredEntry + Clone> EntryStore<T> for MemoryStore<T> {
    fn iterate<'a>(&'a self, selector: &Selector) -> Result<Box<dyn Iterator<Item = T> + 'a>> {
        let selector = selector.clone();
        Ok(Box::new(
            self.entries
                .values()
                .filter(move |record| selector.matches(record.reference()))
                .cloned(),
        ))
    }

    fn entry_ids(&self, selector: &Selector) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(_, record)| selector.matches(record.reference()))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn get(&self, entry_id: &str) -> Result<Option<T>> {
        Ok(self.entries.get(entry_id).cloned())
    }

    fn upsert(&mut self, record: T) -> Result<T> {
        self.entries.insert(record.entry_id(), record.clone());
        Ok(record)
    }

    fn count_matching(&self, selector: &Selector) -> Result<usize> {
        Ok(self
            .entries
            .values()
            .filter(|record| selector.matches(record.reference()))
            .count())
    }

    fn delete_matching(&mut self, selector: &Selector) -> Result<usize> {
        let before = self.entries.len();
        self.entries
            .retain(|_, record| !selector.matches(record.reference()));
        Ok(before - self.entries.len())
    }
}
