use chrono::Month;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Header literal marking the yearly total column of a data block.
pub const TOTAL_MARKER: &str = "合計";

/// A column label of a data block: one calendar month or the yearly total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MonthLabel {
    Month(Month),
    Total,
}

impl MonthLabel {
    pub fn from_number(number: u32) -> Option<Self> {
        u8::try_from(number)
            .ok()
            .and_then(|n| Month::try_from(n).ok())
            .map(Self::Month)
    }

    /// 1-based month number, `None` for the total column.
    pub fn number(&self) -> Option<u32> {
        match self {
            Self::Month(month) => Some(month.number_from_month()),
            Self::Total => None,
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(self, Self::Total)
    }

    /// The fixed January..December axis used by every trend series.
    pub fn calendar() -> Vec<MonthLabel> {
        (1..=12).filter_map(Self::from_number).collect()
    }

    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if label == TOTAL_MARKER {
            return Some(Self::Total);
        }
        label
            .strip_suffix('月')
            .and_then(|n| n.trim().parse::<u32>().ok())
            .and_then(Self::from_number)
    }

    fn sort_key(&self) -> u32 {
        self.number().unwrap_or(13)
    }
}

impl PartialOrd for MonthLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MonthLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for MonthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Month(month) => write!(f, "{}月", month.number_from_month()),
            Self::Total => f.write_str(TOTAL_MARKER),
        }
    }
}

impl From<MonthLabel> for String {
    fn from(label: MonthLabel) -> Self {
        label.to_string()
    }
}

impl TryFrom<String> for MonthLabel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("'{}' is not a month label", value))
    }
}

/// Fixed partition of the PDCA sheet by row range.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    #[schemars(description = "Revenue rows, stored as single-month values")]
    Sales,
    #[schemars(description = "Acquisition counts, stored as year-to-date cumulative values")]
    Acquisition,
    #[schemars(description = "Average revenue per customer")]
    UnitPrice,
    #[schemars(description = "Retention rates")]
    Retention,
    #[schemars(description = "Funnel indicators (leads, meetings, commitments, acquisitions)")]
    Indicators,
}

impl SectionId {
    pub const ALL: [SectionId; 5] = [
        SectionId::Sales,
        SectionId::Acquisition,
        SectionId::UnitPrice,
        SectionId::Retention,
        SectionId::Indicators,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Acquisition => "acquisition",
            Self::UnitPrice => "unit_price",
            Self::Retention => "retention",
            Self::Indicators => "indicators",
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four parallel column ranges of every section.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DataBlock {
    PlanDiff,
    PlanRatio,
    Actual,
    Budget,
}

impl DataBlock {
    pub const ALL: [DataBlock; 4] = [
        DataBlock::PlanDiff,
        DataBlock::PlanRatio,
        DataBlock::Actual,
        DataBlock::Budget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanDiff => "plan_diff",
            Self::PlanRatio => "plan_ratio",
            Self::Actual => "actual",
            Self::Budget => "budget",
        }
    }
}

impl fmt::Display for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a plan-vs-actual pair is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Achievement rate, actual / budget in percent.
    #[default]
    Ratio,
    /// Plan difference, actual - budget.
    Diff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    #[default]
    Single,
    Cumulative,
}

/// The form in which a section stores its monthly values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NativeForm {
    #[schemars(description = "Each month holds that month's value alone")]
    SingleMonth,
    #[schemars(description = "Each month holds the running total since January")]
    Cumulative,
    #[schemars(
        description = "Each month holds a point-in-time figure (rates, averages) that is never summed over months"
    )]
    PointInTime,
}

pub type MonthValues = BTreeMap<MonthLabel, f64>;

/// A row as read from the sheet, before hierarchy resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRecord {
    /// 1-based sheet row this record was read from.
    pub source_row: u32,
    pub channel: String,
    pub plan: String,
    pub section: SectionId,
    pub values: MonthValues,
}

impl RowRecord {
    pub fn value(&self, month: MonthLabel) -> f64 {
        self.values.get(&month).copied().unwrap_or(0.0)
    }
}

/// Extractor output for one (section, data block) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowTable {
    pub section: SectionId,
    pub block: DataBlock,
    /// Recognized header columns in sheet order, total column included.
    pub columns: Vec<MonthLabel>,
    pub records: Vec<RowRecord>,
}

impl RowTable {
    pub fn month_columns(&self) -> Vec<MonthLabel> {
        month_columns(&self.columns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub source_row: u32,
    /// Channel cell exactly as read, empty for sub-plan rows.
    pub raw_channel: String,
    /// Raw channel after hierarchy inheritance.
    pub inherited_channel: String,
    /// Canonical display channel.
    pub channel: String,
    /// Canonical display plan.
    pub plan: String,
    pub is_aggregate: bool,
    pub values: MonthValues,
}

impl NormalizedRow {
    pub fn value(&self, month: MonthLabel) -> f64 {
        self.values.get(&month).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTable {
    pub section: SectionId,
    pub block: DataBlock,
    pub columns: Vec<MonthLabel>,
    pub rows: Vec<NormalizedRow>,
}

impl NormalizedTable {
    pub fn empty(section: SectionId, block: DataBlock) -> Self {
        Self {
            section,
            block,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Same section, block and columns, different rows.
    pub fn with_rows(&self, rows: Vec<NormalizedRow>) -> Self {
        Self {
            section: self.section,
            block: self.block,
            columns: self.columns.clone(),
            rows,
        }
    }

    pub fn month_columns(&self) -> Vec<MonthLabel> {
        month_columns(&self.columns)
    }

    pub fn detail_rows(&self) -> impl Iterator<Item = &NormalizedRow> {
        self.rows.iter().filter(|row| !row.is_aggregate)
    }

    /// Sum of one month over all non-aggregate rows.
    pub fn month_total(&self, month: MonthLabel) -> f64 {
        self.detail_rows().map(|row| row.value(month)).sum()
    }
}

fn month_columns(columns: &[MonthLabel]) -> Vec<MonthLabel> {
    columns.iter().copied().filter(|m| !m.is_total()).collect()
}

/// The unit of computation requested by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub section: SectionId,
    pub month: MonthLabel,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub period_type: PeriodType,
    /// Canonical channel names; empty means no channel filter.
    #[serde(default)]
    pub channel_filter: BTreeSet<String>,
    /// Canonical plan names; empty means no plan filter.
    #[serde(default)]
    pub plan_filter: BTreeSet<String>,
}

impl MetricQuery {
    pub fn new(section: SectionId, month: MonthLabel) -> Self {
        Self {
            section,
            month,
            data_type: DataType::default(),
            period_type: PeriodType::default(),
            channel_filter: BTreeSet::new(),
            plan_filter: BTreeSet::new(),
        }
    }

    pub fn with_period(mut self, period_type: PeriodType) -> Self {
        self.period_type = period_type;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_filter = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_plans<I, S>(mut self, plans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan_filter = plans.into_iter().map(Into::into).collect();
        self
    }

    pub fn trend(&self) -> TrendQuery {
        TrendQuery {
            section: self.section,
            data_type: self.data_type,
            period_type: self.period_type,
            channel_filter: self.channel_filter.clone(),
            plan_filter: self.plan_filter.clone(),
        }
    }
}

/// A [`MetricQuery`] without a month, for twelve-month series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendQuery {
    pub section: SectionId,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub period_type: PeriodType,
    #[serde(default)]
    pub channel_filter: BTreeSet<String>,
    #[serde(default)]
    pub plan_filter: BTreeSet<String>,
}

impl TrendQuery {
    pub fn at(&self, month: MonthLabel) -> MetricQuery {
        MetricQuery {
            section: self.section,
            month,
            data_type: self.data_type,
            period_type: self.period_type,
            channel_filter: self.channel_filter.clone(),
            plan_filter: self.plan_filter.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiResult {
    pub actual: f64,
    pub budget: f64,
    pub achievement_rate: f64,
    pub difference: f64,
    /// False when the queried month lies past the last month with actual data.
    pub actual_available: bool,
}

impl KpiResult {
    pub fn new(actual: f64, budget: f64, actual_available: bool) -> Self {
        Self {
            actual,
            budget,
            achievement_rate: crate::aggregator::achievement_rate(actual, budget),
            difference: actual - budget,
            actual_available,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, false)
    }

    /// The figure the presentation layer headlines for the given data type.
    pub fn headline(&self, data_type: DataType) -> f64 {
        match data_type {
            DataType::Ratio => self.achievement_rate,
            DataType::Diff => self.difference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSeries {
    /// Always January..December.
    pub months: Vec<MonthLabel>,
    pub actual_values: Vec<f64>,
    pub budget_values: Vec<f64>,
    /// Leading months carrying genuine actual data; the rest are zero-filled.
    pub actual_month_count: usize,
}

impl TrendSeries {
    pub fn empty() -> Self {
        let months = MonthLabel::calendar();
        let len = months.len();
        Self {
            months,
            actual_values: vec![0.0; len],
            budget_values: vec![0.0; len],
            actual_month_count: 0,
        }
    }

    /// Per-month achievement rates, `None` past the last actual month.
    pub fn achievement_rates(&self) -> Vec<Option<f64>> {
        self.actual_values
            .iter()
            .zip(&self.budget_values)
            .enumerate()
            .map(|(idx, (actual, budget))| {
                (idx < self.actual_month_count)
                    .then(|| crate::aggregator::achievement_rate(*actual, *budget))
            })
            .collect()
    }

    pub fn differences(&self) -> Vec<Option<f64>> {
        self.actual_values
            .iter()
            .zip(&self.budget_values)
            .enumerate()
            .map(|(idx, (actual, budget))| (idx < self.actual_month_count).then(|| actual - budget))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_label_parse_and_display() {
        assert_eq!(MonthLabel::parse("5月"), MonthLabel::from_number(5));
        assert_eq!(MonthLabel::parse("合計"), Some(MonthLabel::Total));
        assert_eq!(MonthLabel::parse("13月"), None);
        assert_eq!(MonthLabel::parse("May"), None);

        let may = MonthLabel::from_number(5).unwrap();
        assert_eq!(may.to_string(), "5月");
        assert_eq!(MonthLabel::Total.to_string(), "合計");
    }

    #[test]
    fn test_month_label_ordering_puts_total_last() {
        let mut labels = vec![
            MonthLabel::Total,
            MonthLabel::from_number(12).unwrap(),
            MonthLabel::from_number(1).unwrap(),
        ];
        labels.sort();
        assert_eq!(
            labels.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
            vec!["1月", "12月", "合計"]
        );
    }

    #[test]
    fn test_calendar_has_twelve_months() {
        let calendar = MonthLabel::calendar();
        assert_eq!(calendar.len(), 12);
        assert_eq!(calendar[0].number(), Some(1));
        assert_eq!(calendar[11].number(), Some(12));
    }

    #[test]
    fn test_month_label_serializes_as_label() {
        let json = serde_json::to_string(&MonthLabel::from_number(3).unwrap()).unwrap();
        assert_eq!(json, "\"3月\"");
        let back: MonthLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.number(), Some(3));
        assert!(serde_json::from_str::<MonthLabel>("\"Q1\"").is_err());
    }

    #[test]
    fn test_trend_rates_stop_at_actual_months() {
        let mut trend = TrendSeries::empty();
        trend.actual_values[0] = 50.0;
        trend.budget_values[0] = 100.0;
        trend.actual_month_count = 1;

        let rates = trend.achievement_rates();
        assert_eq!(rates[0], Some(50.0));
        assert_eq!(rates[1], None);
        assert_eq!(trend.differences()[0], Some(-50.0));
    }

    #[test]
    fn test_kpi_headline_follows_data_type() {
        let kpi = KpiResult::new(120.0, 100.0, true);
        assert!((kpi.headline(DataType::Ratio) - 120.0).abs() < 1e-9);
        assert!((kpi.headline(DataType::Diff) - 20.0).abs() < 1e-9);
    }
}
