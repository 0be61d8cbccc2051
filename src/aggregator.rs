//! Plan-vs-actual KPIs, twelve-month trends and funnel summaries over one
//! loaded [`Dataset`].
//!
//! Every computation here is total: missing tables, filters that match
//! nothing and zero budgets all produce zeros, never errors.

use crate::config::{AchievementThresholds, EngineConfig};
use crate::conversion::{ConversionEngine, ConversionTrend, FunnelStage, FunnelTransition};
use crate::dataset::Dataset;
use crate::filter::{self, filter_plans, filter_table};
use crate::normalizer::CanonicalNames;
use crate::period::{
    last_actual_month, period_series, period_value, position, should_display_actual,
};
use crate::schema::{
    DataBlock, DataType, KpiResult, MetricQuery, MonthLabel, NormalizedTable, SectionId,
    TrendQuery, TrendSeries,
};
use crate::utils::{format_count, format_rate, percent};
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Actual / budget in percent; 0 whenever the budget is not positive.
pub fn achievement_rate(actual: f64, budget: f64) -> f64 {
    percent(actual, budget)
}

pub fn plan_difference(actual: f64, budget: f64) -> f64 {
    actual - budget
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    /// No rate to judge (rate is exactly 0).
    Neutral,
    Good,
    Warning,
    Danger,
    Critical,
}

impl PerformanceLevel {
    pub fn classify(rate: f64, thresholds: &AchievementThresholds) -> Self {
        if rate == 0.0 || !rate.is_finite() {
            Self::Neutral
        } else if rate >= thresholds.good {
            Self::Good
        } else if rate >= thresholds.warning {
            Self::Warning
        } else if rate >= thresholds.critical {
            Self::Danger
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageKpi {
    pub stage: FunnelStage,
    pub kpi: KpiResult,
    pub level: PerformanceLevel,
    pub trend: TrendSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageConversion {
    pub transition: FunnelTransition,
    pub month: MonthLabel,
    pub denominator_month: MonthLabel,
    pub actual_rate: f64,
    pub budget_rate: f64,
    /// Actual conversion rate relative to the planned one.
    pub achievement_rate: f64,
    pub actual_trend: ConversionTrend,
    pub budget_trend: ConversionTrend,
    /// Months up to the last one with actual volume in the `from` stage.
    pub valid_month_count: usize,
}

/// One channel or plan of a section, measured on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownItem {
    pub label: String,
    pub kpi: KpiResult,
    pub trend: TrendSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelConversion {
    pub channel: String,
    /// Acquisitions of the channel in the requested month.
    pub volume: f64,
    pub volume_trend: TrendSeries,
    pub conversion: StageConversion,
}

pub struct MetricsEngine<'a> {
    dataset: &'a Dataset,
    config: &'a EngineConfig,
    names: CanonicalNames,
}

impl<'a> MetricsEngine<'a> {
    pub fn new(dataset: &'a Dataset, config: &'a EngineConfig) -> Self {
        Self {
            dataset,
            config,
            names: CanonicalNames::new(&config.names),
        }
    }

    pub fn names(&self) -> &CanonicalNames {
        &self.names
    }

    fn filtered(
        &self,
        section: SectionId,
        block: DataBlock,
        channels: &BTreeSet<String>,
        plans: &BTreeSet<String>,
    ) -> NormalizedTable {
        match self.dataset.table(section, block) {
            Some(table) => filter_table(table, &self.names, channels, plans),
            None => NormalizedTable::empty(section, block),
        }
    }

    /// Actual and budget for one month.
    ///
    /// Actual is reported only when the month is not later than the section's
    /// last month with actual data; budget is always reported.
    pub fn compute_kpi(&self, query: &MetricQuery) -> KpiResult {
        if self.dataset.is_empty() {
            debug!("KPI requested for {} before any dataset was loaded", query.section);
            return KpiResult::zero();
        }

        let native = self.config.layout.native_form(query.section);

        let (actual, actual_available) = match self.dataset.table(query.section, DataBlock::Actual) {
            Some(table) => {
                let month_cols = table.month_columns();
                if should_display_actual(table, &month_cols, query.month) {
                    let filtered = filter_table(
                        table,
                        &self.names,
                        &query.channel_filter,
                        &query.plan_filter,
                    );
                    (
                        period_value(&filtered, &month_cols, query.month, native, query.period_type),
                        true,
                    )
                } else {
                    (0.0, false)
                }
            }
            None => (0.0, false),
        };

        let budget_table = self.filtered(
            query.section,
            DataBlock::Budget,
            &query.channel_filter,
            &query.plan_filter,
        );
        let budget = period_value(
            &budget_table,
            &budget_table.month_columns(),
            query.month,
            native,
            query.period_type,
        );

        let kpi = KpiResult::new(actual, budget, actual_available);
        debug!(
            "KPI {} {} {:?}: actual={} budget={} rate={}%",
            query.section,
            query.month,
            query.period_type,
            format_count(kpi.actual),
            format_count(kpi.budget),
            format_rate(kpi.achievement_rate)
        );

        kpi
    }

    /// Twelve-month actual and budget series.
    ///
    /// Actual values stop at the last month with non-zero filtered actual
    /// data and are zero-padded after it.
    pub fn compute_trend(&self, query: &TrendQuery) -> TrendSeries {
        let mut trend = TrendSeries::empty();
        if self.dataset.is_empty() {
            debug!("Trend requested for {} before any dataset was loaded", query.section);
            return trend;
        }

        let native = self.config.layout.native_form(query.section);

        let budget_table = self.filtered(
            query.section,
            DataBlock::Budget,
            &query.channel_filter,
            &query.plan_filter,
        );
        trend.budget_values = align_to_calendar(
            &trend.months,
            &budget_table.month_columns(),
            &period_series(
                &budget_table,
                &budget_table.month_columns(),
                native,
                query.period_type,
            ),
        );

        let actual_table = self.filtered(
            query.section,
            DataBlock::Actual,
            &query.channel_filter,
            &query.plan_filter,
        );
        let month_cols = actual_table.month_columns();
        let Some(last) = last_actual_month(&actual_table, &month_cols) else {
            return trend;
        };

        let actual_values = align_to_calendar(
            &trend.months,
            &month_cols,
            &period_series(&actual_table, &month_cols, native, query.period_type),
        );
        let count = last.number().map_or(0, |n| n as usize);

        for (idx, value) in actual_values.into_iter().enumerate().take(count) {
            trend.actual_values[idx] = value;
        }
        trend.actual_month_count = count;

        trend
    }

    pub fn channel_options(&self, section: SectionId) -> Vec<String> {
        self.dataset
            .table(section, DataBlock::Actual)
            .map(|table| filter::channel_options(table, &self.names))
            .unwrap_or_default()
    }

    pub fn plan_options(&self, section: SectionId, channels: &BTreeSet<String>) -> Vec<String> {
        self.dataset
            .table(section, DataBlock::Actual)
            .map(|table| filter::plan_options(table, &self.names, channels))
            .unwrap_or_default()
    }

    /// Indicator rows of one funnel stage, channel-filtered.
    pub fn stage_table(
        &self,
        block: DataBlock,
        stage: FunnelStage,
        channels: &BTreeSet<String>,
        plans: &BTreeSet<String>,
    ) -> NormalizedTable {
        let filtered = self.filtered(SectionId::Indicators, block, channels, plans);
        filter_plans(&filtered, self.config.funnel.plans(stage))
    }

    /// Calendar months up to the last one with indicator actuals under the
    /// given filters.
    fn funnel_month_count(&self, channels: &BTreeSet<String>, plans: &BTreeSet<String>) -> usize {
        let all_actual = self.filtered(SectionId::Indicators, DataBlock::Actual, channels, plans);
        last_actual_month(&all_actual, &all_actual.month_columns())
            .and_then(|m| m.number())
            .map_or(0, |n| n as usize)
    }

    fn stage_trend(
        &self,
        stage: FunnelStage,
        channels: &BTreeSet<String>,
        plans: &BTreeSet<String>,
        actual_month_count: usize,
    ) -> (NormalizedTable, NormalizedTable, TrendSeries) {
        let actual = self.stage_table(DataBlock::Actual, stage, channels, plans);
        let budget = self.stage_table(DataBlock::Budget, stage, channels, plans);

        let mut trend = TrendSeries::empty();
        for (idx, calendar_month) in trend.months.clone().into_iter().enumerate() {
            trend.budget_values[idx] = budget.month_total(calendar_month);
            if idx < actual_month_count {
                trend.actual_values[idx] = actual.month_total(calendar_month);
            }
        }
        trend.actual_month_count = actual_month_count;

        (actual, budget, trend)
    }

    /// One KPI per funnel stage for `month`, read from the indicators section.
    ///
    /// Actual figures are gated by the last month with data across all
    /// stages under the same filters, so every stage stops at the same month.
    pub fn compute_funnel(
        &self,
        month: MonthLabel,
        channels: &BTreeSet<String>,
        plans: &BTreeSet<String>,
    ) -> Vec<StageKpi> {
        let actual_month_count = self.funnel_month_count(channels, plans);

        FunnelStage::ALL
            .into_iter()
            .map(|stage| {
                let (actual, budget, trend) =
                    self.stage_trend(stage, channels, plans, actual_month_count);

                let available = month
                    .number()
                    .is_some_and(|n| (n as usize) <= actual_month_count);
                let actual_value = if available {
                    actual.month_total(month)
                } else {
                    0.0
                };
                let kpi = KpiResult::new(actual_value, budget.month_total(month), available);
                let level = PerformanceLevel::classify(kpi.achievement_rate, &self.config.thresholds);

                StageKpi {
                    stage,
                    kpi,
                    level,
                    trend,
                }
            })
            .collect()
    }

    /// Lag-aware conversion between the two stages of `transition`.
    pub fn stage_conversion(
        &self,
        transition: FunnelTransition,
        month: MonthLabel,
        channel: Option<&str>,
    ) -> StageConversion {
        let channels: BTreeSet<String> = channel.map(str::to_string).into_iter().collect();
        let no_plans = BTreeSet::new();
        let (from_stage, to_stage) = transition.stages();

        let from_actual = self.stage_table(DataBlock::Actual, from_stage, &channels, &no_plans);
        let to_actual = self.stage_table(DataBlock::Actual, to_stage, &channels, &no_plans);
        let from_budget = self.stage_table(DataBlock::Budget, from_stage, &channels, &no_plans);
        let to_budget = self.stage_table(DataBlock::Budget, to_stage, &channels, &no_plans);

        let actual_cols = from_actual.month_columns();
        let budget_cols = from_budget.month_columns();

        let engine = ConversionEngine::new(&self.config.time_lags);
        let actual_trend =
            engine.conversion_trend(&from_actual, &to_actual, transition, channel, &actual_cols);
        let budget_trend =
            engine.conversion_trend(&from_budget, &to_budget, transition, channel, &budget_cols);

        let actual_rate = actual_trend.rate_at(month);
        let budget_rate = budget_trend.rate_at(month);

        let valid_month_count = last_actual_month(&from_actual, &actual_cols)
            .and_then(|last| position(&actual_cols, last))
            .map_or(0, |idx| idx + 1);

        StageConversion {
            transition,
            month,
            denominator_month: engine.denominator_month(month, transition, channel, &actual_cols),
            actual_rate,
            budget_rate,
            achievement_rate: achievement_rate(actual_rate, budget_rate),
            actual_trend,
            budget_trend,
            valid_month_count,
        }
    }

    fn breakdown_item(&self, label: String, query: &MetricQuery) -> BreakdownItem {
        BreakdownItem {
            kpi: self.compute_kpi(query),
            trend: self.compute_trend(&query.trend()),
            label,
        }
    }

    /// KPI and trend for every channel of the section, each measured alone
    /// under the query's plan filter. The query's channel filter is ignored.
    pub fn channel_breakdown(&self, query: &MetricQuery) -> Vec<BreakdownItem> {
        let items = self
            .channel_options(query.section)
            .into_iter()
            .map(|channel| {
                let item_query = query.clone().with_channels([channel.clone()]);
                self.breakdown_item(channel, &item_query)
            })
            .collect();
        rank_breakdown(items, query.data_type)
    }

    /// KPI and trend for every plan of the section, each measured alone
    /// under the query's channel filter. The query's plan filter is ignored.
    pub fn plan_breakdown(&self, query: &MetricQuery) -> Vec<BreakdownItem> {
        let items = self
            .plan_options(query.section, &BTreeSet::new())
            .into_iter()
            .map(|plan| {
                let item_query = query.clone().with_plans([plan.clone()]);
                self.breakdown_item(plan, &item_query)
            })
            .collect();
        rank_breakdown(items, query.data_type)
    }

    /// `transition` computed per conversion channel, with each channel's
    /// acquisition volume alongside.
    ///
    /// Only configured channels present in the indicators section are
    /// listed, and a channel without rows for the transition's `from` stage
    /// is left out. Weakest achievement comes first; channels without a
    /// rate come last.
    pub fn channel_conversions(
        &self,
        transition: FunnelTransition,
        month: MonthLabel,
    ) -> Vec<ChannelConversion> {
        let present: BTreeSet<String> = self
            .channel_options(SectionId::Indicators)
            .into_iter()
            .collect();
        let (from_stage, _) = transition.stages();
        let no_plans = BTreeSet::new();

        let mut items: Vec<ChannelConversion> = self
            .config
            .conversion_channels
            .iter()
            .filter(|channel| present.contains(*channel))
            .filter_map(|channel| {
                let channels: BTreeSet<String> = [channel.clone()].into();
                let from_rows = self.stage_table(DataBlock::Actual, from_stage, &channels, &no_plans);
                if from_rows.rows.is_empty() {
                    debug!(
                        "Channel {} has no {:?} rows, skipping {:?}",
                        channel, from_stage, transition
                    );
                    return None;
                }

                let month_count = self.funnel_month_count(&channels, &no_plans);
                let (actual, _, volume_trend) =
                    self.stage_trend(FunnelStage::Acquisition, &channels, &no_plans, month_count);

                Some(ChannelConversion {
                    channel: channel.clone(),
                    volume: actual.month_total(month),
                    volume_trend,
                    conversion: self.stage_conversion(transition, month, Some(channel)),
                })
            })
            .collect();

        items.sort_by(|a, b| {
            weakest_first(a.conversion.achievement_rate, b.conversion.achievement_rate)
        });
        items
    }
}

/// Ascending achievement with zero (no rate) last.
fn weakest_first(a: f64, b: f64) -> Ordering {
    let key = |rate: f64| (rate == 0.0, if rate > 0.0 { rate } else { f64::INFINITY });
    let (a, b) = (key(a), key(b));
    a.0.cmp(&b.0).then(a.1.total_cmp(&b.1))
}

fn rank_breakdown(mut items: Vec<BreakdownItem>, data_type: DataType) -> Vec<BreakdownItem> {
    match data_type {
        DataType::Ratio => items.sort_by(|a, b| {
            weakest_first(a.kpi.achievement_rate, b.kpi.achievement_rate)
        }),
        DataType::Diff => items.sort_by(|a, b| a.kpi.difference.total_cmp(&b.kpi.difference)),
    }
    items
}

/// Places `values` (one per `month_cols` entry) on the January..December axis.
fn align_to_calendar(calendar: &[MonthLabel], month_cols: &[MonthLabel], values: &[f64]) -> Vec<f64> {
    calendar
        .iter()
        .map(|month| {
            position(month_cols, *month)
                .and_then(|idx| values.get(idx).copied())
                .unwrap_or(0.0)
        })
        .collect()
}
