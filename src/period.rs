//! Single-month / cumulative reconciliation and actual-data gating.

use crate::schema::{MonthLabel, NativeForm, NormalizedTable, PeriodType};

/// Latest month whose summed detail value is non-zero.
///
/// Interior zero months do not stop the scan: with data in March and May but
/// not April, May is returned.
pub fn last_actual_month(table: &NormalizedTable, month_cols: &[MonthLabel]) -> Option<MonthLabel> {
    month_cols
        .iter()
        .rev()
        .find(|month| table.month_total(**month) != 0.0)
        .copied()
}

/// True for every month up to and including [`last_actual_month`], even
/// months whose own total is zero.
pub fn should_display_actual(
    table: &NormalizedTable,
    month_cols: &[MonthLabel],
    target: MonthLabel,
) -> bool {
    let Some(last) = last_actual_month(table, month_cols) else {
        return false;
    };

    match (position(month_cols, target), position(month_cols, last)) {
        (Some(target_idx), Some(last_idx)) => target_idx <= last_idx,
        _ => false,
    }
}

/// Running totals.
pub fn cumulative(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |total, value| {
            *total += value;
            Some(*total)
        })
        .collect()
}

/// Month-over-month deltas of a cumulative series, floored at zero so late
/// downward corrections never produce negative months.
pub fn single_month(values: &[f64]) -> Vec<f64> {
    let mut previous = 0.0;
    values
        .iter()
        .map(|value| {
            let delta = (value - previous).max(0.0);
            previous = *value;
            delta
        })
        .collect()
}

/// Converts a series stored in `native` form into the requested period type.
pub fn convert_series(values: &[f64], native: NativeForm, period_type: PeriodType) -> Vec<f64> {
    match (native, period_type) {
        (NativeForm::SingleMonth, PeriodType::Single)
        | (NativeForm::Cumulative, PeriodType::Cumulative)
        | (NativeForm::PointInTime, _) => values.to_vec(),
        (NativeForm::SingleMonth, PeriodType::Cumulative) => cumulative(values),
        (NativeForm::Cumulative, PeriodType::Single) => single_month(values),
    }
}

/// Summed detail values for each month column, in the requested period type.
pub fn period_series(
    table: &NormalizedTable,
    month_cols: &[MonthLabel],
    native: NativeForm,
    period_type: PeriodType,
) -> Vec<f64> {
    let totals: Vec<f64> = month_cols
        .iter()
        .map(|month| table.month_total(*month))
        .collect();
    convert_series(&totals, native, period_type)
}

/// One month of [`period_series`]; 0 for a month the table does not carry.
pub fn period_value(
    table: &NormalizedTable,
    month_cols: &[MonthLabel],
    month: MonthLabel,
    native: NativeForm,
    period_type: PeriodType,
) -> f64 {
    position(month_cols, month)
        .and_then(|idx| {
            period_series(table, month_cols, native, period_type)
                .get(idx)
                .copied()
        })
        .unwrap_or(0.0)
}

pub fn position(month_cols: &[MonthLabel], month: MonthLabel) -> Option<usize> {
    month_cols.iter().position(|candidate| *candidate == month)
}
