//! File Catalog Maps
//!
//! Maps logical file names to physical locations. The on-disk format is
//! one entry per line:
//!
//! ```text
//! H1L1-INFERENCE_A-1000-64.hdf /data/run/results/H1L1-INFERENCE_A-1000-64.hdf site="local"
//! ```
//!
//! Catalogs are handed to sub-workflows so their own planners know which
//! inputs already exist.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};

use super::error::{PlanError, Result};

/// Physical location of one logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub pfn: String,
    pub site: String,
}

/// Ordered mapping from LFN to physical location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `lfn`.
    pub fn insert(&mut self, lfn: impl Into<String>, pfn: impl Into<String>, site: impl Into<String>) {
        self.entries.insert(
            lfn.into(),
            CatalogEntry {
                pfn: pfn.into(),
                site: site.into(),
            },
        );
    }

    pub fn get(&self, lfn: &str) -> Option<&CatalogEntry> {
        self.entries.get(lfn)
    }

    pub fn contains(&self, lfn: &str) -> bool {
        self.entries.contains_key(lfn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in LFN order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }

    /// Renders the catalog in map-file format.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(lfn, entry)| format!("{} {} site=\"{}\"\n", lfn, entry.pfn, entry.site))
            .collect()
    }

    /// Parses map-file text. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut catalog = Self::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(lfn), Some(pfn)) = (fields.next(), fields.next()) else {
                return Err(PlanError::Definition(format!(
                    "Catalog line {}: expected '<lfn> <pfn> site=\"<site>\"'",
                    number + 1
                )));
            };

            let mut site = "local".to_string();
            for attribute in fields {
                match attribute.split_once('=') {
                    Some(("site", value)) => site = value.trim_matches('"').to_string(),
                    Some(_) => {}
                    None => {
                        return Err(PlanError::Definition(format!(
                            "Catalog line {}: malformed attribute '{}'",
                            number + 1,
                            attribute
                        )))
                    }
                }
            }

            catalog.insert(lfn, pfn, site);
        }

        Ok(catalog)
    }

    /// Reads a map file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PlanError::io(path, e))?;
        let catalog = Self::parse(&text)?;
        debug!("Loaded {} catalog entries from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Writes the catalog to disk, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PlanError::io(parent, e))?;
            }
        }
        fs::write(path, self.render()).map_err(|e| PlanError::io(path, e))?;
        info!("Wrote {} catalog entries to {}", self.len(), path.display());
        Ok(())
    }
}
