//! Reads the PDCA worksheet into one [`RowTable`] per (section, data block).
//!
//! Month columns are discovered from the header row: a whole number 1-12
//! maps to that month, the literal `合計` maps to the total column, anything
//! else drops the column. Non-numeric data cells read as 0.

use crate::config::{ColumnRange, SheetLayout};
use crate::error::{MetricsError, Result};
use crate::schema::{DataBlock, MonthLabel, MonthValues, RowRecord, RowTable, SectionId};
use crate::utils::cell_reference;
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::Number(_) => false,
        }
    }

    /// Text of a label cell. Whole numbers print without a fraction.
    pub fn as_label(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(text) => text.trim().to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
        }
    }

    /// Numeric value of a data cell, `None` when it cannot be read as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Number(_) => None,
            Self::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Empty => None,
        }
    }
}

/// Read access to a worksheet by 0-based absolute row and column.
pub trait CellGrid {
    fn cell(&self, row: u32, column: u32) -> CellValue;
}

impl CellGrid for Range<Data> {
    fn cell(&self, row: u32, column: u32) -> CellValue {
        match self.get_value((row, column)) {
            None | Some(Data::Empty) => CellValue::Empty,
            Some(Data::Float(v)) => CellValue::Number(*v),
            Some(Data::Int(v)) => CellValue::Number(*v as f64),
            Some(Data::String(v)) => CellValue::Text(v.clone()),
            Some(Data::Bool(v)) => CellValue::Text(v.to_string()),
            Some(Data::DateTime(v)) => CellValue::Text(v.to_string()),
            Some(Data::DateTimeIso(v)) => CellValue::Text(v.clone()),
            Some(Data::DurationIso(v)) => CellValue::Text(v.clone()),
            Some(Data::Error(v)) => CellValue::Text(format!("{v:?}")),
        }
    }
}

/// In-memory grid keyed by 0-based (row, column).
#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a cell by 1-based sheet row and 0-based column.
    pub fn set(&mut self, row: u32, column: u32, value: CellValue) -> &mut Self {
        if let Some(row0) = row.checked_sub(1) {
            self.cells.insert((row0, column), value);
        }
        self
    }

    pub fn set_number(&mut self, row: u32, column: u32, value: f64) -> &mut Self {
        self.set(row, column, CellValue::Number(value))
    }

    pub fn set_text(&mut self, row: u32, column: u32, value: &str) -> &mut Self {
        self.set(row, column, CellValue::Text(value.to_string()))
    }
}

impl CellGrid for MemoryGrid {
    fn cell(&self, row: u32, column: u32) -> CellValue {
        self.cells
            .get(&(row, column))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }
}

/// A header cell whose content is neither a month number nor the total marker.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedColumn {
    pub block: DataBlock,
    pub column: u32,
    pub header: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedSheet {
    pub tables: BTreeMap<(SectionId, DataBlock), RowTable>,
    pub dropped_columns: Vec<DroppedColumn>,
}

impl ExtractedSheet {
    pub fn record_count(&self) -> usize {
        self.tables.values().map(|table| table.records.len()).sum()
    }
}

/// Parses workbook bytes. A missing sheet aborts the whole load.
pub fn extract_workbook(bytes: &[u8], layout: &SheetLayout) -> Result<ExtractedSheet> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;

    if !workbook
        .sheet_names()
        .iter()
        .any(|name| name == &layout.sheet_name)
    {
        return Err(MetricsError::SheetNotFound {
            sheet: layout.sheet_name.clone(),
        });
    }

    let range = workbook.worksheet_range(&layout.sheet_name)?;
    Ok(extract_grid(&range, layout))
}

pub fn extract_grid<G: CellGrid + ?Sized>(grid: &G, layout: &SheetLayout) -> ExtractedSheet {
    let mut extracted = ExtractedSheet::default();

    let mut headers = BTreeMap::new();
    for (block, range) in &layout.blocks {
        let (mapping, dropped) = header_months(grid, layout.header_row, *block, range);
        for column in &dropped {
            warn!(
                "Dropping column {} of block {}: unrecognized header '{}'",
                cell_reference(layout.header_row, column.column),
                block,
                column.header
            );
        }
        extracted.dropped_columns.extend(dropped);
        headers.insert(*block, mapping);
    }

    for (section, section_layout) in &layout.sections {
        for (block, mapping) in &headers {
            let mut records = Vec::new();

            for row in section_layout.rows() {
                // Sheet rows are 1-based; a range starting at 0 has no row 0.
                let Some(row0) = row.checked_sub(1) else {
                    continue;
                };
                let channel = grid.cell(row0, layout.channel_column).as_label();
                let plan = grid.cell(row0, layout.plan_column).as_label();

                if channel.is_empty() && plan.is_empty() {
                    continue;
                }

                let mut values = MonthValues::new();
                for (column, month) in mapping {
                    values.insert(*month, read_number(grid, row0, *column));
                }

                records.push(RowRecord {
                    source_row: row,
                    channel,
                    plan,
                    section: *section,
                    values,
                });
            }

            extracted.tables.insert(
                (*section, *block),
                RowTable {
                    section: *section,
                    block: *block,
                    columns: mapping.iter().map(|(_, month)| *month).collect(),
                    records,
                },
            );
        }
    }

    extracted
}

/// Maps each column of a block to its month label.
pub fn header_months<G: CellGrid + ?Sized>(
    grid: &G,
    header_row: u32,
    block: DataBlock,
    range: &ColumnRange,
) -> (Vec<(u32, MonthLabel)>, Vec<DroppedColumn>) {
    let mut mapping = Vec::new();
    let mut dropped = Vec::new();
    let Some(header_row0) = header_row.checked_sub(1) else {
        return (mapping, dropped);
    };

    for column in range.columns() {
        let header = grid.cell(header_row0, column);
        match month_from_header(&header) {
            Some(month) => mapping.push((column, month)),
            None if header.is_empty() => {}
            None => dropped.push(DroppedColumn {
                block,
                column,
                header: header.as_label(),
            }),
        }
    }

    (mapping, dropped)
}

pub fn month_from_header(header: &CellValue) -> Option<MonthLabel> {
    match header {
        CellValue::Number(n) if n.fract() == 0.0 && (1.0..=12.0).contains(n) => {
            MonthLabel::from_number(*n as u32)
        }
        CellValue::Text(text) if text.trim() == crate::schema::TOTAL_MARKER => {
            Some(MonthLabel::Total)
        }
        _ => None,
    }
}

fn read_number<G: CellGrid + ?Sized>(grid: &G, row0: u32, column: u32) -> f64 {
    let cell = grid.cell(row0, column);
    match cell.as_number() {
        Some(value) => value,
        None => {
            if !cell.is_empty() {
                debug!(
                    "Non-numeric value {:?} at {} read as 0",
                    cell,
                    cell_reference(row0 + 1, column)
                );
            }
            0.0
        }
    }
}
