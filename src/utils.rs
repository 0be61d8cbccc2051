/// Spreadsheet column letters for a 0-based column index (0 -> "A", 27 -> "AB").
pub fn column_letter(index: u32) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A1-style reference for a 1-based row and 0-based column.
pub fn cell_reference(row: u32, column: u32) -> String {
    format!("{}{}", column_letter(column), row)
}

/// Counts and amounts are shown as whole numbers.
pub fn format_count(value: f64) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else {
        0
    }
}

/// Rates are shown with one decimal place.
pub fn format_rate(value: f64) -> f64 {
    if value.is_finite() {
        (value * 10.0).round() / 10.0
    } else {
        0.0
    }
}

/// Divides and scales to percent; a non-positive denominator yields 0.
pub fn percent(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        let rate = numerator / denominator * 100.0;
        if rate.is_finite() {
            rate
        } else {
            0.0
        }
    } else {
        0.0
    }
}
