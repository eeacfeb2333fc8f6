//! Mapping from classified stats rows to metric observations.

use crate::fields::{
    Conversion, FieldRegistry, FieldSpec, MetricKind, RowCategory, SelectedMetricSet,
};
use crate::parser::Row;
use crate::status::parse_status_field;

/// One sample produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Fully qualified metric name.
    pub name: String,
    pub kind: MetricKind,
    /// Row labels followed by the column's constant labels.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Result of mapping a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    pub observations: Vec<Observation>,
    /// Cells that were present but could not be converted.
    pub failures: u64,
}

/// Convert a raw cell according to the column's conversion rule.
///
/// Returns `None` if the text is not a valid number. Status cells always
/// convert.
pub fn convert(field: &FieldSpec, raw: &str) -> Option<f64> {
    match field.conversion {
        Conversion::Status => Some(parse_status_field(raw)),
        Conversion::Integer => raw.parse::<i64>().ok().map(|v| v as f64),
        Conversion::MillisToSeconds => raw.parse::<f64>().ok().map(|ms| ms / 1000.0),
    }
}

/// Label pairs identifying the row's subject.
pub fn row_labels(row: &Row) -> Vec<(String, String)> {
    let values = match row.category {
        RowCategory::Frontend | RowCategory::Backend => vec![row.proxy.clone()],
        RowCategory::Server => vec![row.proxy.clone(), row.service.clone()],
        RowCategory::Other => Vec::new(),
    };

    row.category
        .label_names()
        .iter()
        .map(|name| name.to_string())
        .zip(values)
        .collect()
}

/// Applies the field tables to rows.
#[derive(Debug, Clone, Copy)]
pub struct MetricMapper<'a> {
    fields: &'a FieldRegistry,
    server_metrics: &'a SelectedMetricSet,
}

impl<'a> MetricMapper<'a> {
    pub fn new(fields: &'a FieldRegistry, server_metrics: &'a SelectedMetricSet) -> Self {
        Self {
            fields,
            server_metrics,
        }
    }

    /// Columns exported for a row category.
    ///
    /// Server rows only export the operator's selection.
    pub fn fields_for(&self, category: RowCategory) -> &'a [FieldSpec] {
        match category {
            RowCategory::Server => self.server_metrics.fields(),
            other => self.fields.table(other),
        }
    }

    /// Map every exported column of a row.
    ///
    /// Missing and empty cells are skipped without counting as failures.
    pub fn map_row(&self, row: &Row) -> MappedRow {
        let mut mapped = MappedRow::default();
        let fields = self.fields_for(row.category);
        if fields.is_empty() {
            return mapped;
        }

        let labels = row_labels(row);
        for field in fields {
            let raw = match row.field(field.column) {
                Some(raw) if !raw.is_empty() => raw,
                _ => continue,
            };

            let Some(value) = convert(field, raw) else {
                tracing::debug!(
                    line = row.line,
                    column = field.column,
                    value = raw,
                    "Cannot parse stats field"
                );
                mapped.failures += 1;
                continue;
            };

            let mut labels = labels.clone();
            labels.extend(
                field
                    .const_labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );

            mapped.observations.push(Observation {
                name: self.fields.metric_name(row.category, field),
                kind: field.kind,
                labels,
                value,
            });
        }

        mapped
    }
}
