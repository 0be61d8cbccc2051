//! # SFA Metrics
//!
//! A library for turning a sales/CRM PDCA workbook into filterable
//! plan-vs-actual metrics.
//!
//! ## Core Concepts
//!
//! - **Sections**: Fixed row ranges of the sheet (sales, acquisition, unit price, retention, indicators)
//! - **Data Blocks**: Four parallel column ranges per section (plan diff, plan ratio, actual, budget)
//! - **Hierarchy**: Sub-plan rows leave the channel cell empty and inherit the channel above them
//! - **Native Form**: Each section stores single-month, cumulative or point-in-time values;
//!   queries reconcile to the period type they ask for
//! - **Time Lag**: Funnel conversions divide by an earlier month's volume, per channel and transition
//!
//! ## Example
//!
//! ```rust,ignore
//! use sfa_metrics::*;
//!
//! let metrics = PdcaMetrics::new(EngineConfig::default());
//! let bytes = std::fs::read("pdca.xlsx")?;
//! metrics.load_workbook(&bytes, "pdca.xlsx")?;
//!
//! let may = MonthLabel::from_number(5).unwrap();
//! let kpi = metrics.kpi(
//!     &MetricQuery::new(SectionId::Sales, may)
//!         .with_period(PeriodType::Cumulative)
//!         .with_channels(["既存"]),
//! );
//! println!("{} / {} ({:.1}%)", kpi.actual, kpi.budget, kpi.achievement_rate);
//! ```

pub mod aggregator;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod normalizer;
pub mod period;
pub mod schema;
pub mod utils;

pub use aggregator::{
    achievement_rate, plan_difference, BreakdownItem, ChannelConversion, MetricsEngine,
    PerformanceLevel, StageConversion, StageKpi,
};
pub use config::{
    AchievementThresholds, ColumnRange, EngineConfig, FunnelConfig, NameRules, SectionLayout,
    SheetLayout, TimeLagTable,
};
pub use conversion::{ConversionEngine, ConversionTrend, FunnelStage, FunnelTransition};
pub use dataset::{Dataset, DatasetStore, LoadSummary};
pub use error::{MetricsError, Result};
pub use extractor::{extract_grid, extract_workbook, CellGrid, CellValue, ExtractedSheet, MemoryGrid};
pub use normalizer::{normalize_sheet, normalize_table, CanonicalNames};
pub use schema::*;
pub use utils::*;

use log::{debug, info};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Configuration plus the currently loaded dataset.
///
/// Every query works on one snapshot of the dataset, so a concurrent upload
/// never mixes two workbooks into a single answer.
pub struct PdcaMetrics {
    config: EngineConfig,
    store: DatasetStore,
}

impl PdcaMetrics {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: DatasetStore::new(),
        }
    }

    pub fn from_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = EngineConfig::from_path(path)?;
        info!(
            "Loaded configuration for sheet '{}'",
            config.layout.sheet_name
        );
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dataset(&self) -> Arc<Dataset> {
        self.store.current()
    }

    pub fn load_workbook(&self, bytes: &[u8], source_name: &str) -> Result<LoadSummary> {
        self.store.load_workbook(bytes, source_name, &self.config)
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadSummary> {
        self.store.load_path(path, &self.config)
    }

    pub fn kpi(&self, query: &MetricQuery) -> KpiResult {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).compute_kpi(query)
    }

    pub fn trend(&self, query: &TrendQuery) -> TrendSeries {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).compute_trend(query)
    }

    pub fn funnel(
        &self,
        month: MonthLabel,
        channels: &BTreeSet<String>,
        plans: &BTreeSet<String>,
    ) -> Vec<StageKpi> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).compute_funnel(month, channels, plans)
    }

    pub fn conversion(
        &self,
        transition: FunnelTransition,
        month: MonthLabel,
        channel: Option<&str>,
    ) -> StageConversion {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).stage_conversion(transition, month, channel)
    }

    /// Conversion cards for every funnel transition.
    pub fn conversions(&self, month: MonthLabel, channel: Option<&str>) -> Vec<StageConversion> {
        let dataset = self.dataset();
        let engine = MetricsEngine::new(&dataset, &self.config);
        debug!(
            "Computing {} conversions for {} (channel: {:?})",
            FunnelTransition::ALL.len(),
            month,
            channel
        );
        FunnelTransition::ALL
            .into_iter()
            .map(|transition| engine.stage_conversion(transition, month, channel))
            .collect()
    }

    /// Per-channel cards for a section, ordered by `query.data_type`.
    pub fn channel_breakdown(&self, query: &MetricQuery) -> Vec<BreakdownItem> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).channel_breakdown(query)
    }

    /// Per-plan cards for a section, ordered by `query.data_type`.
    pub fn plan_breakdown(&self, query: &MetricQuery) -> Vec<BreakdownItem> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).plan_breakdown(query)
    }

    pub fn channel_conversions(
        &self,
        transition: FunnelTransition,
        month: MonthLabel,
    ) -> Vec<ChannelConversion> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).channel_conversions(transition, month)
    }

    pub fn channel_options(&self, section: SectionId) -> Vec<String> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).channel_options(section)
    }

    pub fn plan_options(&self, section: SectionId, channels: &BTreeSet<String>) -> Vec<String> {
        let dataset = self.dataset();
        MetricsEngine::new(&dataset, &self.config).plan_options(section, channels)
    }

    pub fn performance_level(&self, rate: f64) -> PerformanceLevel {
        PerformanceLevel::classify(rate, &self.config.thresholds)
    }
}
