//! Page-number pagination as exposed at the API boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 1-indexed page request. `None` at the call site means pagination is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page_number: u64,
    pub page_row_count: u64,
}

impl PageRequest {
    pub fn new(page_number: u64, page_row_count: u64) -> Self {
        Self {
            page_number: page_number.max(1),
            page_row_count: page_row_count.max(1),
        }
    }

    /// Zero-indexed row offset, saturating for pages past any real table.
    pub fn skip(&self) -> u64 {
        (self.page_number - 1).saturating_mul(self.page_row_count)
    }

    pub fn page_count(&self, total_rows: u64) -> u64 {
        total_rows.div_ceil(self.page_row_count)
    }
}

/// Read `pageNumber`/`pageRowCount` from loosely typed input.
///
/// `pageNumber == 0` disables pagination. Missing or non-numeric values fall
/// back to page 1 and `default_row_count`; everything is clamped to at least 1.
pub fn read_pagination(
    page_number: Option<&Value>,
    page_row_count: Option<&Value>,
    default_row_count: u64,
) -> Option<PageRequest> {
    let number = page_number.and_then(numeric);
    if number == Some(0) {
        return None;
    }
    let rows = page_row_count
        .and_then(numeric)
        .map(clamp)
        .unwrap_or(default_row_count);
    Some(PageRequest::new(number.map(clamp).unwrap_or(1), rows))
}

fn clamp(value: i64) -> u64 {
    value.max(1) as u64
}

fn numeric(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
