//! Funnel conversion rates whose denominator month trails the numerator month
//! by a per-channel, per-transition lag.

use crate::config::TimeLagTable;
use crate::period::position;
use crate::schema::{MonthLabel, NormalizedTable};
use crate::utils::percent;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum FunnelStage {
    #[serde(rename = "リード・アプローチ")]
    LeadApproach,
    #[serde(rename = "商談")]
    Meeting,
    #[serde(rename = "具体検討")]
    Consideration,
    #[serde(rename = "内諾")]
    Commitment,
    #[serde(rename = "獲得")]
    Acquisition,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 5] = [
        FunnelStage::LeadApproach,
        FunnelStage::Meeting,
        FunnelStage::Consideration,
        FunnelStage::Commitment,
        FunnelStage::Acquisition,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::LeadApproach => "リード・アプローチ",
            Self::Meeting => "商談",
            Self::Consideration => "具体検討",
            Self::Commitment => "内諾",
            Self::Acquisition => "獲得",
        }
    }
}

/// A step between two adjacent funnel stages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum FunnelTransition {
    #[serde(rename = "to商談")]
    ToMeeting,
    #[serde(rename = "to具体検討")]
    ToConsideration,
    #[serde(rename = "to内諾")]
    ToCommitment,
    #[serde(rename = "to獲得")]
    ToAcquisition,
}

impl FunnelTransition {
    pub const ALL: [FunnelTransition; 4] = [
        FunnelTransition::ToMeeting,
        FunnelTransition::ToConsideration,
        FunnelTransition::ToCommitment,
        FunnelTransition::ToAcquisition,
    ];

    /// The transition from `from` to `to`, if the two stages are adjacent.
    pub fn between(from: FunnelStage, to: FunnelStage) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|transition| transition.stages() == (from, to))
    }

    /// (denominator stage, numerator stage)
    pub fn stages(&self) -> (FunnelStage, FunnelStage) {
        match self {
            Self::ToMeeting => (FunnelStage::LeadApproach, FunnelStage::Meeting),
            Self::ToConsideration => (FunnelStage::Meeting, FunnelStage::Consideration),
            Self::ToCommitment => (FunnelStage::Consideration, FunnelStage::Commitment),
            Self::ToAcquisition => (FunnelStage::Commitment, FunnelStage::Acquisition),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ToMeeting => "to商談",
            Self::ToConsideration => "to具体検討",
            Self::ToCommitment => "to内諾",
            Self::ToAcquisition => "to獲得",
        }
    }
}

/// Month-by-month (lagged denominator, numerator) pairs for sparklines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionTrend {
    pub months: Vec<MonthLabel>,
    pub denominator_months: Vec<MonthLabel>,
    pub denominators: Vec<f64>,
    pub numerators: Vec<f64>,
    pub rates: Vec<f64>,
}

impl ConversionTrend {
    pub fn rate_at(&self, month: MonthLabel) -> f64 {
        position(&self.months, month)
            .and_then(|idx| self.rates.get(idx).copied())
            .unwrap_or(0.0)
    }
}

pub struct ConversionEngine<'a> {
    lags: &'a TimeLagTable,
}

impl<'a> ConversionEngine<'a> {
    pub fn new(lags: &'a TimeLagTable) -> Self {
        Self { lags }
    }

    /// The month whose `from` stage volume converts into `current`'s `to` stage.
    ///
    /// Lags reaching before the first column clamp to the first column. A
    /// `current` month outside `month_cols` is returned unchanged.
    pub fn denominator_month(
        &self,
        current: MonthLabel,
        transition: FunnelTransition,
        channel: Option<&str>,
        month_cols: &[MonthLabel],
    ) -> MonthLabel {
        let lag = channel
            .map(|channel| self.lags.lag(channel, transition))
            .unwrap_or(0) as usize;

        match position(month_cols, current) {
            Some(idx) => month_cols[idx.saturating_sub(lag)],
            None => current,
        }
    }

    /// Percent of the lagged `from` volume that reached `to` in `current`; 0
    /// when there is no denominator volume.
    pub fn conversion_rate(
        &self,
        from: &NormalizedTable,
        to: &NormalizedTable,
        current: MonthLabel,
        transition: FunnelTransition,
        channel: Option<&str>,
        month_cols: &[MonthLabel],
    ) -> f64 {
        let denominator_month = self.denominator_month(current, transition, channel, month_cols);
        percent(
            to.month_total(current),
            from.month_total(denominator_month),
        )
    }

    /// Applies the lag lookup independently to every month of `month_cols`.
    pub fn conversion_trend(
        &self,
        from: &NormalizedTable,
        to: &NormalizedTable,
        transition: FunnelTransition,
        channel: Option<&str>,
        month_cols: &[MonthLabel],
    ) -> ConversionTrend {
        let mut trend = ConversionTrend {
            months: month_cols.to_vec(),
            denominator_months: Vec::with_capacity(month_cols.len()),
            denominators: Vec::with_capacity(month_cols.len()),
            numerators: Vec::with_capacity(month_cols.len()),
            rates: Vec::with_capacity(month_cols.len()),
        };

        for month in month_cols {
            let denominator_month =
                self.denominator_month(*month, transition, channel, month_cols);
            let denominator = from.month_total(denominator_month);
            let numerator = to.month_total(*month);

            trend.denominator_months.push(denominator_month);
            trend.denominators.push(denominator);
            trend.numerators.push(numerator);
            trend.rates.push(percent(numerator, denominator));
        }

        trend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataBlock, MonthValues, NormalizedRow, SectionId};

    fn months(n: u32) -> Vec<MonthLabel> {
        (1..=n).filter_map(MonthLabel::from_number).collect()
    }

    fn month(n: u32) -> MonthLabel {
        MonthLabel::from_number(n).unwrap()
    }

    fn stage_table(values: &[f64]) -> NormalizedTable {
        let cols = months(values.len() as u32);
        NormalizedTable {
            section: SectionId::Indicators,
            block: DataBlock::Actual,
            columns: cols.clone(),
            rows: vec![NormalizedRow {
                source_row: 101,
                raw_channel: "新規（WEB）".to_string(),
                inherited_channel: "新規（WEB）".to_string(),
                channel: "新規web".to_string(),
                plan: "stage".to_string(),
                is_aggregate: false,
                values: cols.into_iter().zip(values.iter().copied()).collect::<MonthValues>(),
            }],
        }
    }

    #[test]
    fn test_denominator_month_applies_channel_lag() {
        let lags = TimeLagTable::default();
        let engine = ConversionEngine::new(&lags);
        let cols = months(5);

        assert_eq!(
            engine.denominator_month(month(5), FunnelTransition::ToAcquisition, Some("新規web"), &cols),
            month(3)
        );
        assert_eq!(
            engine.denominator_month(month(5), FunnelTransition::ToCommitment, Some("新規法人"), &cols),
            month(3)
        );
        assert_eq!(
            engine.denominator_month(month(5), FunnelTransition::ToMeeting, Some("新規代理店"), &cols),
            month(5)
        );
    }

    #[test]
    fn test_unconfigured_lags_use_current_month() {
        let lags = TimeLagTable::default();
        let engine = ConversionEngine::new(&lags);
        let cols = months(5);

        assert_eq!(
            engine.denominator_month(month(4), FunnelTransition::ToAcquisition, Some("既存"), &cols),
            month(4)
        );
        assert_eq!(
            engine.denominator_month(month(4), FunnelTransition::ToMeeting, Some("新規web"), &cols),
            month(4)
        );
        assert_eq!(
            engine.denominator_month(month(4), FunnelTransition::ToAcquisition, None, &cols),
            month(4)
        );
    }

    #[test]
    fn test_lag_clamps_to_first_month() {
        let mut lags = TimeLagTable::default();
        lags.set("新規web", FunnelTransition::ToAcquisition, 7);
        let engine = ConversionEngine::new(&lags);
        let cols = months(5);

        assert_eq!(
            engine.denominator_month(month(2), FunnelTransition::ToAcquisition, Some("新規web"), &cols),
            month(1)
        );
    }

    #[test]
    fn test_conversion_rate_uses_lagged_denominator() {
        let lags = TimeLagTable::default();
        let engine = ConversionEngine::new(&lags);
        let cols = months(5);
        let from = stage_table(&[10.0, 20.0, 40.0, 80.0, 160.0]);
        let to = stage_table(&[1.0, 2.0, 3.0, 4.0, 10.0]);

        let rate = engine.conversion_rate(
            &from,
            &to,
            month(5),
            FunnelTransition::ToAcquisition,
            Some("新規web"),
            &cols,
        );
        assert!((rate - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominator_yields_zero() {
        let lags = TimeLagTable::default();
        let engine = ConversionEngine::new(&lags);
        let cols = months(3);
        let from = stage_table(&[0.0, 0.0, 0.0]);
        let to = stage_table(&[1.0, 2.0, 3.0]);

        let rate = engine.conversion_rate(
            &from,
            &to,
            month(2),
            FunnelTransition::ToMeeting,
            Some("新規web"),
            &cols,
        );
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn test_trend_applies_lag_per_month() {
        let lags = TimeLagTable::default();
        let engine = ConversionEngine::new(&lags);
        let cols = months(4);
        let from = stage_table(&[10.0, 20.0, 30.0, 40.0]);
        let to = stage_table(&[1.0, 2.0, 3.0, 4.0]);

        let trend = engine.conversion_trend(
            &from,
            &to,
            FunnelTransition::ToAcquisition,
            Some("新規web"),
            &cols,
        );

        assert_eq!(
            trend.denominator_months,
            vec![month(1), month(1), month(1), month(2)]
        );
        assert_eq!(trend.denominators, vec![10.0, 10.0, 10.0, 20.0]);
        assert_eq!(trend.numerators, vec![1.0, 2.0, 3.0, 4.0]);
        assert!((trend.rate_at(month(4)) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_transition_between_adjacent_stages_only() {
        assert_eq!(
            FunnelTransition::between(FunnelStage::Commitment, FunnelStage::Acquisition),
            Some(FunnelTransition::ToAcquisition)
        );
        assert_eq!(
            FunnelTransition::between(FunnelStage::LeadApproach, FunnelStage::Acquisition),
            None
        );
    }
}
