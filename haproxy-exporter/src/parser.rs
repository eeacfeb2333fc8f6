//! Decoding of the HAProxy CSV statistics payload.
//!
//! The payload arrives in chunks of arbitrary size. [`RecordReader`] splits it
//! into delimited records, and [`RowParser`] classifies each record into a
//! [`Row`] using the configured [`CsvLayout`].
//!
//! A malformed record never aborts the payload: it is reported as an error
//! item and reading carries on with the next record.

use serde::{Deserialize, Serialize};

use crate::error::CsvError;
use crate::fields::RowCategory;

const DEFAULT_DELIMITER: u8 = b',';
const DEFAULT_COMMENT: u8 = b'#';

/// Column positions that identify a row, and the minimum row length needed
/// to read them.
///
/// These moved between HAProxy releases, so they are configuration rather
/// than constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvLayout {
    /// Proxy name column (`pxname`).
    pub pxname_field: usize,
    /// Service name column (`svname`).
    pub svname_field: usize,
    /// Row category column (`type`).
    pub type_field: usize,
    /// Rows shorter than this are rejected before classification.
    pub min_field_count: usize,
}

impl CsvLayout {
    /// Every release since 1.4 has `type` as the 33rd column.
    pub const HAPROXY_1_4: Self = Self {
        pxname_field: 0,
        svname_field: 1,
        type_field: 32,
        min_field_count: 33,
    };
}

impl Default for CsvLayout {
    fn default() -> Self {
        Self::HAPROXY_1_4
    }
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Line on which the record started (1-based).
    pub line: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Incremental reader for delimiter separated records.
///
/// Follows the usual CSV rules: fields may be quoted (with `""` as an escaped
/// quote, and embedded delimiters or newlines), blank lines and lines starting
/// with the comment byte are skipped, and the first record fixes the field
/// count for the rest of the payload.
#[derive(Debug)]
pub struct RecordReader {
    delimiter: u8,
    comment: Option<u8>,
    pending: Vec<u8>,
    line: usize,
    field_count: Option<usize>,
}

impl RecordReader {
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            comment: Some(DEFAULT_COMMENT),
            pending: Vec::new(),
            line: 0,
            field_count: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_comment(mut self, comment: Option<u8>) -> Self {
        self.comment = comment;
        self
    }

    /// Consume a chunk and return every record it completes.
    ///
    /// Bytes after the last complete record are kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Record, CsvError>> {
        self.pending.extend_from_slice(chunk);
        let buffer = std::mem::take(&mut self.pending);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(end) = self.record_end(&buffer[start..]) {
            self.emit(&buffer[start..start + end], &mut records);
            start += end + 1;
        }

        self.pending = buffer[start..].to_vec();
        records
    }

    /// Flush the last record if the payload did not end with a newline.
    pub fn finish(&mut self) -> Vec<Result<Record, CsvError>> {
        let buffer = std::mem::take(&mut self.pending);
        let mut records = Vec::new();
        if !buffer.is_empty() {
            self.emit(&buffer, &mut records);
        }
        records
    }

    fn is_comment(&self, raw: &[u8]) -> bool {
        self.comment.is_some_and(|c| raw.first() == Some(&c))
    }

    /// Position of the newline terminating the first record in `data`.
    fn record_end(&self, data: &[u8]) -> Option<usize> {
        if self.is_comment(data) {
            return data.iter().position(|&b| b == b'\n');
        }

        let mut state = ScanState::FieldStart;
        for (i, &b) in data.iter().enumerate() {
            state = match (state, b) {
                (ScanState::Quoted, b'"') => ScanState::QuoteInQuoted,
                (ScanState::Quoted, _) => ScanState::Quoted,
                (_, b'\n') => return Some(i),
                (ScanState::FieldStart, b'"') | (ScanState::QuoteInQuoted, b'"') => {
                    ScanState::Quoted
                }
                (_, b) if b == self.delimiter => ScanState::FieldStart,
                _ => ScanState::Unquoted,
            };
        }
        None
    }

    fn emit(&mut self, raw: &[u8], records: &mut Vec<Result<Record, CsvError>>) {
        let line = self.line + 1;
        self.line += raw.iter().filter(|&&b| b == b'\n').count() + 1;

        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() || self.is_comment(raw) {
            return;
        }

        let result = self
            .decode(raw, line)
            .and_then(|fields| self.check_field_count(fields, line))
            .map(|fields| Record { line, fields });
        records.push(result);
    }

    fn decode(&self, raw: &[u8], line: usize) -> Result<Vec<String>, CsvError> {
        let text = std::str::from_utf8(raw).map_err(|_| CsvError::Utf8 { line })?;
        let delimiter = char::from(self.delimiter);

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut state = ScanState::FieldStart;

        for c in text.chars() {
            state = match state {
                ScanState::FieldStart if c == '"' => ScanState::Quoted,
                ScanState::FieldStart | ScanState::Unquoted if c == delimiter => {
                    fields.push(std::mem::take(&mut field));
                    ScanState::FieldStart
                }
                ScanState::FieldStart | ScanState::Unquoted if c == '"' => {
                    return Err(CsvError::BareQuote { line });
                }
                ScanState::FieldStart | ScanState::Unquoted => {
                    field.push(c);
                    ScanState::Unquoted
                }
                ScanState::Quoted if c == '"' => ScanState::QuoteInQuoted,
                ScanState::Quoted => {
                    field.push(c);
                    ScanState::Quoted
                }
                ScanState::QuoteInQuoted if c == '"' => {
                    field.push('"');
                    ScanState::Quoted
                }
                ScanState::QuoteInQuoted if c == delimiter => {
                    fields.push(std::mem::take(&mut field));
                    ScanState::FieldStart
                }
                ScanState::QuoteInQuoted => return Err(CsvError::Quote { line }),
            };
        }

        if state == ScanState::Quoted {
            return Err(CsvError::Quote { line });
        }
        fields.push(field);
        Ok(fields)
    }

    fn check_field_count(
        &mut self,
        fields: Vec<String>,
        line: usize,
    ) -> Result<Vec<String>, CsvError> {
        match self.field_count {
            None => {
                self.field_count = Some(fields.len());
                Ok(fields)
            }
            Some(expected) if expected == fields.len() => Ok(fields),
            Some(expected) => Err(CsvError::FieldCount {
                line,
                expected,
                got: fields.len(),
            }),
        }
    }
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}

/// A classified stats row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub line: usize,
    pub category: RowCategory,
    /// Proxy name, the frontend or backend the row belongs to.
    pub proxy: String,
    /// Service name: `FRONTEND`, `BACKEND` or the server name.
    pub service: String,
    pub fields: Vec<String>,
}

impl Row {
    /// Raw cell at `column`, if the row is long enough.
    pub fn field(&self, column: usize) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// Turns payload chunks into classified rows.
#[derive(Debug)]
pub struct RowParser {
    reader: RecordReader,
    layout: CsvLayout,
}

impl RowParser {
    pub fn new(layout: CsvLayout) -> Self {
        Self {
            reader: RecordReader::new(),
            layout,
        }
    }

    /// Consume a chunk and return the rows it completes.
    ///
    /// Rows of an unknown category are dropped silently.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Row, CsvError>> {
        let records = self.reader.feed(chunk);
        self.classify_all(records)
    }

    /// Flush the trailing row, if any.
    pub fn finish(&mut self) -> Vec<Result<Row, CsvError>> {
        let records = self.reader.finish();
        self.classify_all(records)
    }

    fn classify_all(&self, records: Vec<Result<Record, CsvError>>) -> Vec<Result<Row, CsvError>> {
        records
            .into_iter()
            .filter_map(|record| match record {
                Ok(record) => self.classify(record).transpose(),
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    /// Classify a record. Unknown `type` values yield `Ok(None)`.
    pub fn classify(&self, record: Record) -> Result<Option<Row>, CsvError> {
        let too_short = CsvError::TooShort {
            line: record.line,
            min: self.layout.min_field_count,
            got: record.fields.len(),
        };
        if record.fields.len() < self.layout.min_field_count {
            return Err(too_short);
        }

        let cell = |column: usize| record.fields.get(column).map(String::as_str);
        let (Some(proxy), Some(service), Some(kind)) = (
            cell(self.layout.pxname_field),
            cell(self.layout.svname_field),
            cell(self.layout.type_field),
        ) else {
            return Err(too_short);
        };

        let Some(category) = RowCategory::from_type_field(kind) else {
            return Ok(None);
        };
        let proxy = proxy.to_string();
        let service = service.to_string();

        Ok(Some(Row {
            line: record.line,
            category,
            proxy,
            service,
            fields: record.fields,
        }))
    }
}
