use rust_xlsxwriter::{Workbook, Worksheet};
use sfa_metrics::*;
use std::collections::BTreeSet;

type Row<'a> = (u32, &'a str, &'a str, &'a [f64], &'a [f64]);

fn month(n: u32) -> MonthLabel {
    MonthLabel::from_number(n).unwrap()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn row<'a>(
    row: u32,
    channel: &'a str,
    plan: &'a str,
    actual: &'a [f64],
    budget: &'a [f64],
) -> Row<'a> {
    (row, channel, plan, actual, budget)
}

fn write_headers(sheet: &mut Worksheet, layout: &SheetLayout) -> anyhow::Result<()> {
    let header_row0 = layout.header_row - 1;
    for (block, range) in &layout.blocks {
        for (offset, column) in range.columns().enumerate() {
            let column = column as u16;
            if offset < 12 {
                sheet.write_number(header_row0, column, (offset + 1) as f64)?;
            } else if *block == DataBlock::PlanRatio {
                sheet.write_string(header_row0, column, "差異")?;
            } else {
                sheet.write_string(header_row0, column, "合計")?;
            }
        }
    }
    Ok(())
}

fn write_rows(sheet: &mut Worksheet, layout: &SheetLayout, rows: &[Row]) -> anyhow::Result<()> {
    let actual = layout.blocks[&DataBlock::Actual].first_column as u16;
    let budget = layout.blocks[&DataBlock::Budget].first_column as u16;

    for (row, channel, plan, actual_values, budget_values) in rows {
        let row0 = row - 1;
        if !channel.is_empty() {
            sheet.write_string(row0, layout.channel_column as u16, *channel)?;
        }
        if !plan.is_empty() {
            sheet.write_string(row0, layout.plan_column as u16, *plan)?;
        }
        for (offset, value) in actual_values.iter().enumerate() {
            sheet.write_number(row0, actual + offset as u16, *value)?;
        }
        for (offset, value) in budget_values.iter().enumerate() {
            sheet.write_number(row0, budget + offset as u16, *value)?;
        }
    }
    Ok(())
}

/// A workbook laid out like the production PDCA sheet, with a few rows per section.
fn pdca_workbook(sheet_name: &str) -> anyhow::Result<Vec<u8>> {
    let layout = SheetLayout::default();
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    write_headers(sheet, &layout)?;

    let flat_100 = [100.0; 12];
    let flat_50 = [50.0; 12];
    let flat_20 = [20.0; 12];
    let cumulative_budget: Vec<f64> = (1..=12).map(|m| (m * 2) as f64).collect();
    let rows: Vec<Row> = vec![
        // Sales
        row(5, "売上高", "", &[1000.0; 12], &[1000.0; 12]),
        row(6, "既存", "プランA", &[100.0, 120.0, 130.0], &flat_100),
        row(7, "", "プランB", &[50.0, 40.0, 0.0], &flat_50),
        row(8, "新規（WEB）", "プランA", &[10.0, 20.0, 30.0, 40.0], &flat_20),
        row(9, "", "チャネル別小計", &[999.0; 12], &[999.0; 12]),
        // Acquisition (cumulative)
        row(38, "獲得件数（累月）", "", &[500.0; 12], &[500.0; 12]),
        row(39, "既存", "新規獲得", &[3.0, 5.0, 5.0, 9.0], &cumulative_budget),
        // Retention (point in time)
        row(94, "既存", "継続率", &[95.0, 96.0, 97.0, 98.0], &[95.0; 12]),
        // Indicators
        row(102, "新規（WEB）", "新規リード数", &[100.0, 200.0, 150.0, 100.0], &[100.0; 12]),
        row(103, "", "商談ステージ", &[40.0, 60.0, 50.0, 30.0], &[40.0; 12]),
        row(104, "", "具体検討ステージ", &[20.0, 30.0, 25.0, 10.0], &[20.0; 12]),
        row(105, "", "内諾ステージ", &[10.0, 12.0, 10.0, 8.0], &[10.0; 12]),
        row(106, "", "新規アプリ獲得数（単月）", &[4.0, 5.0, 6.0, 3.0], &[5.0; 12]),
    ];
    write_rows(sheet, &layout, &rows)?;

    // A stray text value in a data cell reads as 0.
    let actual = layout.blocks[&DataBlock::Actual].first_column as u16;
    sheet.write_string(7, actual + 4, "-")?;

    Ok(workbook.save_to_buffer()?)
}

fn loaded_metrics() -> anyhow::Result<PdcaMetrics> {
    let metrics = PdcaMetrics::new(EngineConfig::default());
    metrics.load_workbook(&pdca_workbook("25年PDCA")?, "pdca.xlsx")?;
    Ok(metrics)
}

#[test]
fn test_load_summary() -> anyhow::Result<()> {
    let metrics = PdcaMetrics::new(EngineConfig::default());
    let summary = metrics.load_workbook(&pdca_workbook("25年PDCA")?, "pdca.xlsx")?;

    assert_eq!(summary.source_name.as_deref(), Some("pdca.xlsx"));
    assert_eq!(summary.table_count, 20);
    assert_eq!(summary.dropped_column_count, 1);

    let dataset = metrics.dataset();
    assert!(dataset.last_update_label().is_some());

    let actual = dataset
        .table(SectionId::Sales, DataBlock::Actual)
        .expect("sales actual table");
    assert_eq!(actual.month_columns().len(), 12);
    assert_eq!(actual.detail_rows().count(), 3);

    let budget = dataset
        .table(SectionId::Sales, DataBlock::Budget)
        .expect("sales budget table");
    assert_eq!(budget.columns.last(), Some(&MonthLabel::Total));

    Ok(())
}

#[test]
fn test_sales_kpi() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let query = MetricQuery::new(SectionId::Sales, month(2)).with_channels(["既存"]);
    let kpi = metrics.kpi(&query);
    assert_eq!(kpi.actual, 160.0);
    assert_eq!(kpi.budget, 150.0);
    assert!((kpi.achievement_rate - 160.0 / 150.0 * 100.0).abs() < 1e-9);
    assert_eq!(kpi.difference, 10.0);
    assert_eq!(metrics.kpi(&query.trend().at(month(2))), kpi);

    let cumulative = metrics.kpi(&query.clone().with_period(PeriodType::Cumulative));
    assert_eq!(cumulative.actual, 310.0);
    assert_eq!(cumulative.budget, 300.0);

    let plan_only = metrics.kpi(
        &MetricQuery::new(SectionId::Sales, month(3))
            .with_channels(["既存", "新規web"])
            .with_plans(["プランA"]),
    );
    assert_eq!(plan_only.actual, 160.0);
    assert_eq!(plan_only.budget, 120.0);

    Ok(())
}

#[test]
fn test_actual_hidden_after_last_data_month() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let may = metrics.kpi(&MetricQuery::new(SectionId::Sales, month(5)));
    assert!(!may.actual_available);
    assert_eq!(may.actual, 0.0);
    assert_eq!(may.budget, 170.0);

    // 既存 has no April actuals, but the sheet as a whole does.
    let april = metrics.kpi(&MetricQuery::new(SectionId::Sales, month(4)).with_channels(["既存"]));
    assert!(april.actual_available);
    assert_eq!(april.actual, 0.0);

    Ok(())
}

#[test]
fn test_acquisition_reconciles_cumulative_storage() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let single = |m| metrics.kpi(&MetricQuery::new(SectionId::Acquisition, month(m)));
    assert_eq!(single(1).actual, 3.0);
    assert_eq!(single(2).actual, 2.0);
    assert_eq!(single(3).actual, 0.0);
    assert_eq!(single(4).actual, 4.0);
    assert_eq!(single(4).budget, 2.0);

    let cumulative = metrics.kpi(
        &MetricQuery::new(SectionId::Acquisition, month(4)).with_period(PeriodType::Cumulative),
    );
    assert_eq!(cumulative.actual, 9.0);
    assert_eq!(cumulative.budget, 8.0);

    Ok(())
}

#[test]
fn test_point_in_time_sections_ignore_period_type() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let query = MetricQuery::new(SectionId::Retention, month(3));
    let single = metrics.kpi(&query);
    let cumulative = metrics.kpi(&query.clone().with_period(PeriodType::Cumulative));
    assert_eq!(single, cumulative);
    assert_eq!(single.actual, 97.0);

    Ok(())
}

#[test]
fn test_trend_truncation_follows_filter() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let all = metrics.trend(&MetricQuery::new(SectionId::Sales, month(1)).trend());
    assert_eq!(all.actual_month_count, 4);
    assert_eq!(&all.actual_values[..5], &[160.0, 180.0, 160.0, 40.0, 0.0]);
    assert_eq!(all.budget_values, vec![170.0; 12]);

    let existing = metrics.trend(
        &MetricQuery::new(SectionId::Sales, month(1))
            .with_channels(["既存"])
            .with_period(PeriodType::Cumulative)
            .trend(),
    );
    assert_eq!(existing.actual_month_count, 3);
    assert_eq!(&existing.actual_values[..4], &[150.0, 310.0, 440.0, 0.0]);
    assert_eq!(existing.budget_values[11], 1800.0);

    let rates = existing.achievement_rates();
    assert!(rates[2].is_some());
    assert!(rates[3].is_none());

    Ok(())
}

#[test]
fn test_funnel_summary() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let funnel = metrics.funnel(month(2), &BTreeSet::new(), &BTreeSet::new());
    let stages: Vec<FunnelStage> = funnel.iter().map(|stage| stage.stage).collect();
    assert_eq!(stages, FunnelStage::ALL.to_vec());

    assert_eq!(funnel[0].kpi.actual, 200.0);
    assert_eq!(funnel[0].kpi.budget, 100.0);
    assert_eq!(funnel[0].level, PerformanceLevel::Good);
    assert_eq!(funnel[1].kpi.actual, 60.0);
    assert_eq!(funnel[4].trend.actual_month_count, 4);

    let other_channel = metrics.funnel(month(2), &set(&["既存"]), &BTreeSet::new());
    assert!(other_channel.iter().all(|stage| stage.kpi.actual == 0.0));

    Ok(())
}

#[test]
fn test_conversion_with_time_lag() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let card = metrics.conversion(FunnelTransition::ToAcquisition, month(4), Some("新規web"));
    assert_eq!(card.denominator_month, month(2));
    assert!((card.actual_rate - 25.0).abs() < 1e-9);
    assert!((card.budget_rate - 50.0).abs() < 1e-9);
    assert!((card.achievement_rate - 50.0).abs() < 1e-9);
    assert_eq!(card.valid_month_count, 4);

    let same_month = metrics.conversion(FunnelTransition::ToMeeting, month(2), Some("新規web"));
    assert_eq!(same_month.denominator_month, month(2));
    assert!((same_month.actual_rate - 30.0).abs() < 1e-9);

    let clamped = metrics.conversion(FunnelTransition::ToAcquisition, month(1), Some("新規web"));
    assert_eq!(clamped.denominator_month, month(1));
    assert!((clamped.actual_rate - 40.0).abs() < 1e-9);

    assert_eq!(metrics.conversions(month(3), None).len(), 4);

    Ok(())
}

#[test]
fn test_channel_and_plan_breakdowns() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let query = MetricQuery::new(SectionId::Sales, month(2));
    let channels = metrics.channel_breakdown(&query);
    let labels: Vec<&str> = channels.iter().map(|item| item.label.as_str()).collect();
    assert_eq!(labels, vec!["新規web", "既存"]);
    assert_eq!(channels[0].kpi.actual, 20.0);
    assert_eq!(channels[0].kpi.budget, 20.0);
    assert_eq!(channels[1].kpi.actual, 160.0);
    assert_eq!(channels[1].kpi.budget, 150.0);
    assert_eq!(channels[1].trend.actual_month_count, 3);

    let plans = metrics.plan_breakdown(
        &query
            .with_channels(["既存"])
            .with_data_type(DataType::Diff),
    );
    let labels: Vec<&str> = plans.iter().map(|item| item.label.as_str()).collect();
    assert_eq!(labels, vec!["プランB", "プランA"]);
    assert_eq!(plans[0].kpi.difference, -10.0);
    assert_eq!(plans[1].kpi.difference, 20.0);

    Ok(())
}

#[test]
fn test_channel_conversion_ranking() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let ranked = metrics.channel_conversions(FunnelTransition::ToAcquisition, month(4));
    assert_eq!(ranked.len(), 1);

    let web = &ranked[0];
    assert_eq!(web.channel, "新規web");
    assert_eq!(web.volume, 3.0);
    assert_eq!(web.volume_trend.actual_month_count, 4);
    assert_eq!(&web.volume_trend.actual_values[..5], &[4.0, 5.0, 6.0, 3.0, 0.0]);
    assert_eq!(web.volume_trend.budget_values, vec![5.0; 12]);
    assert_eq!(web.conversion.denominator_month, month(2));
    assert!((web.conversion.actual_rate - 25.0).abs() < 1e-9);
    assert!((web.conversion.achievement_rate - 50.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_filter_option_lists() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    assert_eq!(metrics.channel_options(SectionId::Sales), vec!["新規web", "既存"]);
    assert_eq!(
        metrics.plan_options(SectionId::Sales, &set(&["既存"])),
        vec!["プランA", "プランB"]
    );
    assert!(metrics
        .plan_options(SectionId::Sales, &set(&["存在しない"]))
        .is_empty());

    Ok(())
}

#[test]
fn test_missing_sheet_keeps_previous_dataset() -> anyhow::Result<()> {
    let metrics = loaded_metrics()?;

    let result = metrics.load_workbook(&pdca_workbook("Sheet1")?, "wrong.xlsx");
    match result {
        Err(MetricsError::SheetNotFound { sheet }) => assert_eq!(sheet, "25年PDCA"),
        other => panic!("expected SheetNotFound, got {:?}", other),
    }

    assert_eq!(metrics.dataset().source_name(), Some("pdca.xlsx"));
    assert_eq!(
        metrics.kpi(&MetricQuery::new(SectionId::Sales, month(1))).actual,
        160.0
    );

    Ok(())
}

#[test]
fn test_corrupt_upload_is_rejected() {
    let metrics = PdcaMetrics::new(EngineConfig::default());
    let result = metrics.load_workbook(b"PK\x03\x04 truncated", "broken.xlsx");
    assert!(matches!(&result, Err(e) if e.is_load_failure()));
    assert!(metrics.dataset().is_empty());
}

#[test]
fn test_config_from_file() -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    config.time_lags.set("新規web", FunnelTransition::ToAcquisition, 0);

    let path = std::env::temp_dir().join(format!("sfa-metrics-config-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    let metrics = PdcaMetrics::from_config_path(&path)?;
    std::fs::remove_file(&path)?;

    metrics.load_workbook(&pdca_workbook("25年PDCA")?, "pdca.xlsx")?;
    let card = metrics.conversion(FunnelTransition::ToAcquisition, month(4), Some("新規web"));
    assert_eq!(card.denominator_month, month(4));
    assert!((card.actual_rate - 3.0 / 8.0 * 100.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema_json = EngineConfig::schema_as_json().unwrap();
    assert!(schema_json.contains("sheet_name"));
    assert!(schema_json.contains("time_lags"));
    println!("Generated schema length: {} bytes", schema_json.len());
}
