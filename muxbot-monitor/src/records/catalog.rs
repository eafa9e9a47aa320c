//! Destination cell catalog
//!
//! Declarative mapping from record fields to spreadsheet cells. Each rule
//! lists candidate source fields in priority order; the first one with a
//! non-empty normalized value wins.

use super::Record;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Destination cell letter → value
pub type CellMap = BTreeMap<String, Value>;

/// Output format for normalized kick-off dates
const SHEET_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy)]
enum CellSource {
    /// First non-empty of these fields
    Fields(&'static [&'static str]),
    Constant(&'static str),
    /// Hours as a float; decimal comma accepted
    Duration(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
struct CellRule {
    cell: &'static str,
    source: CellSource,
    /// Value is a kick-off date (normalized on the fill-if-empty path)
    date: bool,
}

const fn fields(cell: &'static str, names: &'static [&'static str]) -> CellRule {
    CellRule {
        cell,
        source: CellSource::Fields(names),
        date: false,
    }
}

const fn date(cell: &'static str, names: &'static [&'static str]) -> CellRule {
    CellRule {
        cell,
        source: CellSource::Fields(names),
        date: true,
    }
}

const fn constant(cell: &'static str, value: &'static str) -> CellRule {
    CellRule {
        cell,
        source: CellSource::Constant(value),
        date: false,
    }
}

const DURATION_FIELDS: &[&str] = &["Aprox Duration (h)", "Apox Duration (h)"];

/// Cells of the bundle write and its fill-if-empty follow-up
const BUNDLE_CELLS: &[CellRule] = &[
    fields("H", &["Event Category", "Channel"]),
    fields("I", &["Country Available"]),
    fields("J", &["Season"]),
    fields("K", &["Phase ENG"]),
    fields("L", &["Type of Event"]),
    date("M_ARG", &["ARG | Kick-off", "ARG | K.O TIME VIEW", "ARG | START TIME VIEW"]),
    date("M_CHI", &["CHI | Kick-off", "CHI | START K.O VIEW", "CHI | START TIME VIEW"]),
    CellRule {
        cell: "N",
        source: CellSource::Duration(DURATION_FIELDS),
        date: false,
    },
    constant("T", "Available"),
    constant("U", "Available"),
    fields("V", &["Syndication", "PVC Synd Channel"]),
    fields("W", &["Timeline Markers", "TLM"]),
    fields("X", &["Dynamic Ad Insertion", "DAI?"]),
];

/// Cells of the one-time H/I/J/K fill
const INITIAL_FILL_CELLS: &[CellRule] = &[
    fields("H", &["Channel"]),
    fields("I", &["Country Available"]),
    fields("J", &["Season"]),
    fields("K", &["Phase ENG"]),
];

/// Enrichment fields cached on a session once records arrive
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentData {
    /// `Title ENG` of every record joined with `" | "`
    pub display_name: String,
    pub record_count: usize,
    /// Fields of the first record; source of every destination cell
    pub primary: Map<String, Value>,
}

impl EnrichmentData {
    /// None when no record matched
    pub fn from_records(records: &[Record]) -> Option<Self> {
        let primary = records.first()?;
        Some(Self {
            display_name: display_name(records),
            record_count: records.len(),
            primary: primary.fields.clone(),
        })
    }

    pub fn bundle_cells(&self) -> CellMap {
        build_cells(&self.primary, BUNDLE_CELLS, false)
    }

    /// Bundle cells with kick-off dates normalized
    pub fn backfill_cells(&self) -> CellMap {
        build_cells(&self.primary, BUNDLE_CELLS, true)
    }

    pub fn initial_fill_cells(&self) -> CellMap {
        build_cells(&self.primary, INITIAL_FILL_CELLS, false)
    }
}

fn build_cells(fields: &Map<String, Value>, rules: &[CellRule], normalize_dates: bool) -> CellMap {
    rules
        .iter()
        .map(|rule| {
            let value = match rule.source {
                CellSource::Fields(names) => {
                    let text = first_non_empty(fields, names);
                    if rule.date && normalize_dates {
                        Value::String(normalize_date(&text))
                    } else {
                        Value::String(text)
                    }
                }
                CellSource::Constant(text) => Value::String(text.to_string()),
                CellSource::Duration(names) => duration_hours(fields, names),
            };
            (rule.cell.to_string(), value)
        })
        .collect()
}

fn first_non_empty(fields: &Map<String, Value>, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| fields.get(*name))
        .map(normalize_field_value)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Render any field value as sheet text
///
/// null → "", scalar arrays → joined with ", ", other arrays and objects →
/// compact JSON, scalars → their string form.
pub fn normalize_field_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let scalars = items
                .iter()
                .all(|item| !matches!(item, Value::Array(_) | Value::Object(_)));
            if scalars {
                items
                    .iter()
                    .map(normalize_field_value)
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                value.to_string()
            }
        }
        Value::Object(_) => value.to_string(),
    }
}

/// Duration in hours; "" when missing, zero or unparseable
fn duration_hours(fields: &Map<String, Value>, names: &[&str]) -> Value {
    let raw = names
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|value| !value.is_null());

    match raw {
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(other) => normalize_field_value(other)
            .trim()
            .replacen(',', ".", 1)
            .parse::<f64>()
            .ok()
            .filter(|hours| *hours != 0.0)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(String::new())),
        None => Value::String(String::new()),
    }
}

/// Normalize a kick-off date to `yyyy-MM-dd HH:mm:ss`
///
/// Accepts RFC 3339 (converted to UTC), `"ARG - dd/MM/yyyy - HH:mm"` and
/// `"yyyy/MM/dd - HH:mm"` (both taken as wall-clock time). Anything else is
/// returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return String::new();
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return parsed.with_timezone(&Utc).format(SHEET_DATE_FORMAT).to_string();
    }

    if let Some(rest) = strip_country_prefix(text) {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(rest, "%d/%m/%Y - %H:%M") {
            return parsed.format(SHEET_DATE_FORMAT).to_string();
        }
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y/%m/%d - %H:%M") {
        return parsed.format(SHEET_DATE_FORMAT).to_string();
    }

    raw.to_string()
}

/// `"ARG - 16/09/2025 - 21:54"` → `"16/09/2025 - 21:54"`
fn strip_country_prefix(text: &str) -> Option<&str> {
    let (code, rest) = text.split_once(" - ")?;
    (code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())).then_some(rest)
}

/// Combined event name: non-empty `Title ENG` values joined with `" | "`
pub fn display_name(records: &[Record]) -> String {
    records
        .iter()
        .filter_map(|record| record.fields.get("Title ENG"))
        .map(normalize_field_value)
        .filter(|title| !title.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}
