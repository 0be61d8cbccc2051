use crate::config::NameRules;
use crate::extractor::ExtractedSheet;
use crate::schema::{DataBlock, NormalizedRow, NormalizedTable, RowTable, SectionId};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Lookup tables derived from [`NameRules`].
#[derive(Debug, Clone, Default)]
pub struct CanonicalNames {
    channel_by_raw: HashMap<String, String>,
    raw_by_channel: BTreeMap<String, BTreeSet<String>>,
    plan_by_raw: HashMap<String, String>,
    aggregate_channels: BTreeSet<String>,
    aggregate_plans: BTreeSet<String>,
}

impl CanonicalNames {
    pub fn new(rules: &NameRules) -> Self {
        let mut names = Self {
            aggregate_channels: rules.aggregate_channels.clone(),
            aggregate_plans: rules.aggregate_plans.clone(),
            ..Self::default()
        };

        for (canonical, raw_labels) in &rules.channel_aliases {
            let expanded = names.raw_by_channel.entry(canonical.clone()).or_default();
            expanded.insert(canonical.clone());
            for raw in raw_labels {
                expanded.insert(raw.trim().to_string());
                names
                    .channel_by_raw
                    .insert(raw.trim().to_string(), canonical.clone());
            }
        }

        for (canonical, raw_labels) in &rules.plan_aliases {
            for raw in raw_labels {
                names
                    .plan_by_raw
                    .insert(raw.trim().to_string(), canonical.clone());
            }
        }

        names
    }

    pub fn canonical_channel(&self, raw: &str) -> String {
        let raw = raw.trim();
        self.channel_by_raw
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    pub fn canonical_plan(&self, raw: &str) -> String {
        let raw = raw.trim();
        self.plan_by_raw
            .get(raw)
            .cloned()
            .unwrap_or_else(|| raw.to_string())
    }

    /// Inverse of [`Self::canonical_channel`]: every raw label that collapses into `canonical`.
    pub fn raw_channel_labels(&self, canonical: &str) -> BTreeSet<String> {
        let canonical = canonical.trim();
        self.raw_by_channel
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([canonical.to_string()]))
    }

    pub fn is_aggregate_channel(&self, label: &str) -> bool {
        self.aggregate_channels.contains(label.trim())
    }

    pub fn is_aggregate_plan(&self, label: &str) -> bool {
        self.aggregate_plans.contains(label.trim())
    }

    /// Canonical channel names known from the alias table.
    pub fn canonical_channels(&self) -> Vec<String> {
        self.raw_by_channel.keys().cloned().collect()
    }
}

/// Resolves the channel hierarchy of one table and applies canonical names.
///
/// Records are walked in sheet order. A non-empty channel cell opens a new
/// channel group; blank-channel records belong to the last opened group.
/// Only a record's own labels mark it aggregate: a blank-channel record under
/// an aggregate header inherits that header as its channel but stays a
/// detail row. Records with no header above them are flagged too.
pub fn normalize_table(table: &RowTable, names: &CanonicalNames) -> NormalizedTable {
    let mut current_channel = String::new();
    let mut rows = Vec::with_capacity(table.records.len());

    for record in &table.records {
        let raw_channel = record.channel.trim();
        if !raw_channel.is_empty() {
            current_channel = raw_channel.to_string();
        }

        let orphan = current_channel.is_empty();
        if orphan {
            debug!(
                "{}/{} row {} has no channel header above it; excluded",
                table.section, table.block, record.source_row
            );
        }

        let is_aggregate = orphan
            || names.is_aggregate_channel(raw_channel)
            || names.is_aggregate_plan(&record.plan);

        rows.push(NormalizedRow {
            source_row: record.source_row,
            raw_channel: raw_channel.to_string(),
            inherited_channel: current_channel.clone(),
            channel: names.canonical_channel(&current_channel),
            plan: names.canonical_plan(&record.plan),
            is_aggregate,
            values: record.values.clone(),
        });
    }

    NormalizedTable {
        section: table.section,
        block: table.block,
        columns: table.columns.clone(),
        rows,
    }
}

pub fn normalize_sheet(
    extracted: &ExtractedSheet,
    names: &CanonicalNames,
) -> BTreeMap<(SectionId, DataBlock), NormalizedTable> {
    extracted
        .tables
        .iter()
        .map(|(key, table)| (*key, normalize_table(table, names)))
        .collect()
}
