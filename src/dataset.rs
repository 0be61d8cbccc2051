use crate::config::EngineConfig;
use crate::error::Result;
use crate::extractor::{extract_workbook, DroppedColumn, ExtractedSheet};
use crate::normalizer::{normalize_sheet, CanonicalNames};
use crate::schema::{DataBlock, NormalizedTable, SectionId};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// The normalized tables of one upload. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: BTreeMap<(SectionId, DataBlock), NormalizedTable>,
    source_name: Option<String>,
    loaded_at: Option<DateTime<Local>>,
    dropped_columns: Vec<DroppedColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub source_name: Option<String>,
    pub table_count: usize,
    pub detail_row_count: usize,
    pub dropped_column_count: usize,
}

impl Dataset {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_workbook(bytes: &[u8], source_name: &str, config: &EngineConfig) -> Result<Self> {
        let extracted = extract_workbook(bytes, &config.layout)?;
        Ok(Self::from_extracted(extracted, source_name, config))
    }

    pub fn from_extracted(
        extracted: ExtractedSheet,
        source_name: &str,
        config: &EngineConfig,
    ) -> Self {
        let names = CanonicalNames::new(&config.names);
        let tables = normalize_sheet(&extracted, &names);
        Self {
            tables,
            source_name: Some(source_name.to_string()),
            loaded_at: Some(Local::now()),
            dropped_columns: extracted.dropped_columns,
        }
    }

    /// Builds a dataset from already normalized tables.
    pub fn from_tables<I>(tables: I, source_name: &str) -> Self
    where
        I: IntoIterator<Item = NormalizedTable>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|table| ((table.section, table.block), table))
                .collect(),
            source_name: Some(source_name.to_string()),
            loaded_at: Some(Local::now()),
            dropped_columns: Vec::new(),
        }
    }

    pub fn table(&self, section: SectionId, block: DataBlock) -> Option<&NormalizedTable> {
        self.tables.get(&(section, block))
    }

    pub fn tables(&self) -> impl Iterator<Item = &NormalizedTable> {
        self.tables.values()
    }

    /// True before any workbook has been loaded.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Local>> {
        self.loaded_at
    }

    pub fn last_update_label(&self) -> Option<String> {
        self.loaded_at
            .map(|at| at.format("%Y/%m/%d %H:%M").to_string())
    }

    pub fn dropped_columns(&self) -> &[DroppedColumn] {
        &self.dropped_columns
    }

    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            source_name: self.source_name.clone(),
            table_count: self.tables.len(),
            detail_row_count: self
                .tables
                .values()
                .map(|table| table.detail_rows().count())
                .sum(),
            dropped_column_count: self.dropped_columns.len(),
        }
    }
}

/// Holds the current dataset. Uploads swap in a new `Arc` wholesale; readers
/// keep whichever snapshot they cloned.
#[derive(Debug)]
pub struct DatasetStore {
    current: RwLock<Arc<Dataset>>,
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::with_dataset(Dataset::empty())
    }

    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            current: RwLock::new(Arc::new(dataset)),
        }
    }

    pub fn current(&self) -> Arc<Dataset> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Installs `dataset` and returns the one it replaced.
    pub fn replace(&self, dataset: Dataset) -> Arc<Dataset> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(dataset))
    }

    /// Parses an upload and installs it. On failure the previous dataset stays active.
    pub fn load_workbook(
        &self,
        bytes: &[u8],
        source_name: &str,
        config: &EngineConfig,
    ) -> Result<LoadSummary> {
        let dataset = match Dataset::from_workbook(bytes, source_name, config) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(
                    "Failed to load '{}', keeping previous dataset: {}",
                    source_name, e
                );
                return Err(e);
            }
        };

        let summary = dataset.summary();
        let previous = self.replace(dataset);

        info!(
            "Loaded '{}': {} tables, {} detail rows",
            source_name, summary.table_count, summary.detail_row_count
        );
        if let Some(previous_name) = previous.source_name() {
            debug!("Replaced dataset '{}'", previous_name);
        }

        Ok(summary)
    }

    /// Loads a workbook from disk, e.g. a bundled sample at startup.
    pub fn load_path(&self, path: impl AsRef<Path>, config: &EngineConfig) -> Result<LoadSummary> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.load_workbook(&bytes, &source_name, config)
    }
}
