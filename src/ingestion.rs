use std::fs::File;
use std::io::Read;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::errors::AppResult;

const LAT_ALIASES: &[&str] = &["lat", "latitude"];
const LNG_ALIASES: &[&str] = &["lng", "lon", "long", "longitude"];

/// One record of the input table, keyed by header name in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Cell text as it would be written back to CSV; missing cells are empty.
    pub fn text(&self, key: &str) -> String {
        self.get(key).map(cell_text).unwrap_or_default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn has_coordinates(&self, columns: &CoordinateColumns) -> bool {
        is_numeric(self.get(&columns.lat)) && is_numeric(self.get(&columns.lng))
    }
}

/// Names of the latitude and longitude columns, fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateColumns {
    pub lat: String,
    pub lng: String,
}

impl CoordinateColumns {
    /// Keeps explicitly configured names and infers the rest from the first row's headers.
    pub fn resolve(lat: Option<&str>, lng: Option<&str>, first_row: Option<&Row>) -> Self {
        let discover = |aliases: &[&str], fallback: &str| {
            first_row
                .and_then(|row| {
                    row.keys()
                        .find(|key| aliases.iter().any(|alias| key.eq_ignore_ascii_case(alias)))
                        .map(str::to_string)
                })
                .unwrap_or_else(|| fallback.to_string())
        };

        let columns = Self {
            lat: lat
                .map(str::to_string)
                .unwrap_or_else(|| discover(LAT_ALIASES, "lat")),
            lng: lng
                .map(str::to_string)
                .unwrap_or_else(|| discover(LNG_ALIASES, "lng")),
        };
        debug!(lat = %columns.lat, lng = %columns.lng, "resolved coordinate columns");
        columns
    }
}

/// A cell counts as numeric when its text parses as a finite number.
pub fn is_numeric(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(number)) => number.as_f64().is_some_and(f64::is_finite),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            !trimmed.is_empty() && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
        }
        _ => false,
    }
}

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

pub fn read_rows(path: impl AsRef<Path>) -> AppResult<Vec<Row>> {
    let path = path.as_ref();
    let rows = parse_rows(File::open(path)?)?;
    debug!(path = %path.display(), rows = rows.len(), "read input rows");
    Ok(rows)
}

pub fn parse_rows<R: Read>(reader: R) -> AppResult<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(Row::from_pairs(
            headers
                .iter()
                .enumerate()
                .map(|(idx, header)| (header, record.get(idx).unwrap_or_default())),
        ));
    }
    Ok(rows)
}
