//! Read-only access to the reference catalog.

use crate::code::{CodeLevel, HsCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: HsCode,

    pub title: String,

    /// Free keyword text used for matching
    #[serde(default)]
    pub keywords: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<HsCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CatalogEntry {
    pub fn new(code: HsCode, title: impl Into<String>, keywords: impl Into<String>) -> Self {
        Self {
            code,
            title: title.into(),
            keywords: keywords.into(),
            parent_code: None,
            embedding: None,
        }
    }

    pub fn level(&self) -> CodeLevel {
        self.code.level()
    }

    /// Title and keywords, the text compared against product descriptions.
    pub fn match_text(&self) -> String {
        if self.keywords.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.keywords)
        }
    }
}

/// Read access to catalog entries.
pub trait Catalog: Send + Sync {
    fn get(&self, code: &HsCode) -> Option<&CatalogEntry>;

    /// Entries whose parent is `code`.
    fn children(&self, code: &HsCode) -> Vec<&CatalogEntry>;

    fn entries(&self) -> Box<dyn Iterator<Item = &CatalogEntry> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Catalog held in memory, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: BTreeMap<HsCode, CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.code.clone(), e)).collect(),
        }
    }

    /// Load a JSON array of entries.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self::new(entries))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        self.entries.insert(entry.code.clone(), entry);
    }
}

impl Catalog for InMemoryCatalog {
    fn get(&self, code: &HsCode) -> Option<&CatalogEntry> {
        self.entries.get(code)
    }

    fn children(&self, code: &HsCode) -> Vec<&CatalogEntry> {
        self.entries
            .values()
            .filter(|e| e.parent_code.as_ref() == Some(code))
            .collect()
    }

    fn entries(&self) -> Box<dyn Iterator<Item = &CatalogEntry> + '_> {
        Box::new(self.entries.values())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
