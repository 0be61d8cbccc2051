use crate::conversion::{FunnelStage, FunnelTransition};
use crate::error::{MetricsError, Result};
use crate::schema::{DataBlock, NativeForm, SectionId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Everything the engine needs to know about the source workbook and the
/// business rules applied on top of it. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    #[serde(default)]
    pub layout: SheetLayout,
    #[serde(default)]
    pub names: NameRules,
    #[serde(default)]
    pub time_lags: TimeLagTable,
    #[serde(default)]
    pub thresholds: AchievementThresholds,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default = "default_conversion_channels")]
    #[schemars(
        description = "Canonical channels ranked side by side in per-channel conversion views, in display order"
    )]
    pub conversion_channels: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: SheetLayout::default(),
            names: NameRules::default(),
            time_lags: TimeLagTable::default(),
            thresholds: AchievementThresholds::default(),
            funnel: FunnelConfig::default(),
            conversion_channels: default_conversion_channels(),
        }
    }
}

fn default_conversion_channels() -> Vec<String> {
    ["新規web", "新規法人", "新規代理店", "クロスセル"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        self.thresholds.validate()?;

        for (stage, plans) in &self.funnel.stages {
            if plans.is_empty() {
                return Err(MetricsError::InvalidConfig(format!(
                    "Funnel stage {:?} has no indicator plans",
                    stage
                )));
            }
        }

        Ok(())
    }
}

/// Fixed geometry of the PDCA sheet.
///
/// Rows are 1-based sheet row numbers as shown in the spreadsheet UI.
/// Columns are 0-based indices (A = 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SheetLayout {
    #[schemars(description = "Name of the worksheet holding the PDCA table")]
    pub sheet_name: String,

    #[schemars(description = "1-based row holding month numbers (1-12) or the total marker")]
    pub header_row: u32,

    #[schemars(description = "0-based column holding the channel label")]
    pub channel_column: u32,

    #[schemars(description = "0-based column holding the plan label")]
    pub plan_column: u32,

    pub sections: BTreeMap<SectionId, SectionLayout>,

    pub blocks: BTreeMap<DataBlock, ColumnRange>,
}

impl SheetLayout {
    pub fn section(&self, section: SectionId) -> Option<&SectionLayout> {
        self.sections.get(&section)
    }

    /// Native form of a section; sections without a layout are treated as single-month.
    pub fn native_form(&self, section: SectionId) -> NativeForm {
        self.section(section)
            .map(|layout| layout.native_form)
            .unwrap_or(NativeForm::SingleMonth)
    }

    fn validate(&self) -> Result<()> {
        if self.sheet_name.trim().is_empty() {
            return Err(MetricsError::InvalidConfig(
                "sheet_name must not be empty".to_string(),
            ));
        }

        if self.header_row == 0 {
            return Err(MetricsError::InvalidConfig(
                "header_row is 1-based and must be at least 1".to_string(),
            ));
        }

        for (section, layout) in &self.sections {
            if layout.first_row == 0 || layout.last_row < layout.first_row {
                return Err(MetricsError::InvalidConfig(format!(
                    "Section {} has invalid row range {}..={}",
                    section, layout.first_row, layout.last_row
                )));
            }
        }

        for (block, range) in &self.blocks {
            if range.last_column < range.first_column {
                return Err(MetricsError::InvalidConfig(format!(
                    "Block {} has invalid column range {}..={}",
                    block, range.first_column, range.last_column
                )));
            }
        }

        for required in [DataBlock::Actual, DataBlock::Budget] {
            if !self.blocks.contains_key(&required) {
                return Err(MetricsError::InvalidConfig(format!(
                    "Block {} must be configured",
                    required
                )));
            }
        }

        Ok(())
    }
}

impl Default for SheetLayout {
    fn default() -> Self {
        let sections = [
            (SectionId::Sales, 4, 34, NativeForm::SingleMonth),
            (SectionId::Acquisition, 37, 63, NativeForm::Cumulative),
            (SectionId::UnitPrice, 65, 91, NativeForm::PointInTime),
            (SectionId::Retention, 93, 98, NativeForm::PointInTime),
            (SectionId::Indicators, 101, 135, NativeForm::SingleMonth),
        ]
        .into_iter()
        .map(|(section, first_row, last_row, native_form)| {
            (
                section,
                SectionLayout {
                    first_row,
                    last_row,
                    native_form,
                },
            )
        })
        .collect();

        let blocks = [
            (DataBlock::PlanDiff, 2, 14),
            (DataBlock::PlanRatio, 20, 32),
            (DataBlock::Actual, 38, 49),
            (DataBlock::Budget, 56, 68),
        ]
        .into_iter()
        .map(|(block, first_column, last_column)| {
            (
                block,
                ColumnRange {
                    first_column,
                    last_column,
                },
            )
        })
        .collect();

        Self {
            sheet_name: "25年PDCA".to_string(),
            header_row: 4,
            channel_column: 0,
            plan_column: 1,
            sections,
            blocks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SectionLayout {
    pub first_row: u32,
    pub last_row: u32,
    #[schemars(description = "Whether the section stores single-month, cumulative or point-in-time values")]
    pub native_form: NativeForm,
}

impl SectionLayout {
    pub fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.first_row..=self.last_row
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnRange {
    pub first_column: u32,
    pub last_column: u32,
}

impl ColumnRange {
    pub fn columns(&self) -> std::ops::RangeInclusive<u32> {
        self.first_column..=self.last_column
    }
}

/// Canonical naming and the labels that mark subtotal/total rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NameRules {
    #[schemars(
        description = "Canonical channel name -> raw sheet labels that collapse into it. Unlisted labels keep their trimmed raw name."
    )]
    #[serde(default)]
    pub channel_aliases: BTreeMap<String, Vec<String>>,

    #[schemars(description = "Canonical plan name -> raw sheet labels that collapse into it.")]
    #[serde(default)]
    pub plan_aliases: BTreeMap<String, Vec<String>>,

    #[schemars(description = "Channel labels marking section headers and totals")]
    #[serde(default)]
    pub aggregate_channels: BTreeSet<String>,

    #[schemars(description = "Plan labels marking subtotals and totals")]
    #[serde(default)]
    pub aggregate_plans: BTreeSet<String>,
}

impl Default for NameRules {
    fn default() -> Self {
        let channel_aliases = [
            ("既存", vec!["既存", "既存（25年以前）"]),
            (
                "フロー",
                vec!["フロー①", "フロー②", "フロー③", "フロー④", "フロー⑤", "フロー"],
            ),
            ("新規web", vec!["新規（WEB）"]),
            ("新規法人", vec!["新規（法人）"]),
            ("新規代理店", vec!["新規（代理店）"]),
        ]
        .into_iter()
        .map(|(canonical, raw)| {
            (
                canonical.to_string(),
                raw.into_iter().map(str::to_string).collect(),
            )
        })
        .collect();

        let aggregate_channels = [
            "売上高",
            "獲得件数（累月）",
            "客単価",
            "継続率",
            "指標",
            "合計",
            "total",
            "Total",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let aggregate_plans = ["計", "合計", "total", "Total", "チャネル別小計"]
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            channel_aliases,
            plan_aliases: BTreeMap::new(),
            aggregate_channels,
            aggregate_plans,
        }
    }
}

/// Months by which a conversion denominator trails its numerator, per
/// canonical channel and funnel transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TimeLagTable {
    pub lags: BTreeMap<String, BTreeMap<FunnelTransition, u32>>,
}

impl TimeLagTable {
    /// Unconfigured channels and transitions convert within the same month.
    pub fn lag(&self, channel: &str, transition: FunnelTransition) -> u32 {
        self.lags
            .get(channel)
            .and_then(|by_transition| by_transition.get(&transition))
            .copied()
            .unwrap_or(0)
    }

    pub fn set(&mut self, channel: impl Into<String>, transition: FunnelTransition, lag: u32) {
        self.lags
            .entry(channel.into())
            .or_default()
            .insert(transition, lag);
    }
}

impl Default for TimeLagTable {
    fn default() -> Self {
        let mut table = Self {
            lags: BTreeMap::new(),
        };
        table.set("新規web", FunnelTransition::ToAcquisition, 2);
        table.set("新規法人", FunnelTransition::ToCommitment, 2);
        table.set("新規代理店", FunnelTransition::ToMeeting, 0);
        table
    }
}

/// Achievement-rate cut-offs shared with the presentation layer's color coding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AchievementThresholds {
    pub critical: f64,
    pub warning: f64,
    pub good: f64,
}

impl AchievementThresholds {
    fn validate(&self) -> Result<()> {
        if !(self.critical <= self.warning && self.warning <= self.good) {
            return Err(MetricsError::InvalidConfig(format!(
                "Thresholds must be ordered critical <= warning <= good, got {} / {} / {}",
                self.critical, self.warning, self.good
            )));
        }
        Ok(())
    }
}

impl Default for AchievementThresholds {
    fn default() -> Self {
        Self {
            critical: 80.0,
            warning: 95.0,
            good: 100.0,
        }
    }
}

/// Which indicator plans make up each funnel stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FunnelConfig {
    pub stages: BTreeMap<FunnelStage, Vec<String>>,
}

impl FunnelConfig {
    pub fn plans(&self, stage: FunnelStage) -> &[String] {
        self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for FunnelConfig {
    fn default() -> Self {
        let stages = [
            (FunnelStage::LeadApproach, vec!["新規リード数", "アプローチ数"]),
            (FunnelStage::Meeting, vec!["商談ステージ"]),
            (FunnelStage::Consideration, vec!["具体検討ステージ"]),
            (FunnelStage::Commitment, vec!["内諾ステージ"]),
            (FunnelStage::Acquisition, vec!["新規アプリ獲得数（単月）"]),
        ]
        .into_iter()
        .map(|(stage, plans)| (stage, plans.into_iter().map(str::to_string).collect()))
        .collect();

        Self { stages }
    }
}
