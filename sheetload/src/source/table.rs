//! In-memory CSV table

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::debug;

use super::FetchError;
use crate::normalize::normalize_headers;
use crate::warehouse::{FieldType, SchemaField};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A parsed CSV file: header row plus data rows
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

impl CsvTable {
    /// Parse CSV bytes; the first row is the header
    ///
    /// Short rows are padded with empty fields. A row longer than the header
    /// is an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, FetchError> {
        debug!(len = bytes.len(), "CsvTable::parse: called");
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
            debug!("CsvTable::parse: no header row");
            return Err(FetchError::Empty);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let mut record = record?;
            if record.len() > headers.len() {
                return Err(FetchError::TooManyFields {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            while record.len() < headers.len() {
                record.push_field("");
            }
            rows.push(record);
        }

        debug!(columns = headers.len(), rows = rows.len(), "CsvTable::parse: complete");
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rewrite the header row with normalized column names
    pub fn normalize_headers(&mut self) {
        self.headers = normalize_headers(&self.headers);
    }

    /// Load schema from the current headers and the values in each column
    pub fn schema(&self) -> Vec<SchemaField> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let field_type = infer_field_type(self.rows.iter().filter_map(|r| r.get(i)));
                SchemaField::nullable(name.clone(), field_type)
            })
            .collect()
    }

    /// Serialize back to CSV with the current header row first
    pub fn to_csv(&self) -> Result<Vec<u8>, FetchError> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| FetchError::Io {
            location: "<buffer>".to_string(),
            source: e.into_error(),
        })
    }
}

fn is_integer(value: &str) -> bool {
    value.parse::<i64>().is_ok()
}

// f64 parsing also accepts "inf" and "NaN"; require a digit
fn is_float(value: &str) -> bool {
    value.parse::<f64>().is_ok() && value.bytes().any(|b| b.is_ascii_digit())
}

fn is_boolean(value: &str) -> bool {
    matches!(value, "true" | "false" | "True" | "False" | "TRUE" | "FALSE")
}

/// Narrowest type every non-empty value fits; empty cells are nulls
fn infer_field_type<'a>(values: impl Iterator<Item = &'a str>) -> FieldType {
    let values: Vec<&str> = values.filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return FieldType::String;
    }

    if values.iter().all(|v| is_integer(v)) {
        FieldType::Integer
    } else if values.iter().all(|v| is_float(v)) {
        FieldType::Float
    } else if values.iter().all(|v| is_boolean(v)) {
        FieldType::Boolean
    } else {
        FieldType::String
    }
}
