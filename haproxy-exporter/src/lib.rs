//! Prometheus exporter for HAProxy statistics.
//!
//! Each request to the metrics endpoint triggers one scrape: the CSV
//! statistics are fetched from HAProxy, decoded row by row, mapped to labeled
//! observations and encoded for Prometheus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────>│  RowParser  │────>│MetricMapper │────>│ HTTP Server │
//! │ http/unix/  │     │ (CSV rows)  │     │(observations│     │ (/metrics)  │
//! │    file     │     │             │     │   + health) │     │             │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!        └──────────────── Exporter::collect (serialized) ──────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! haproxy-exporter --haproxy.scrape-uri 'unix:/run/haproxy/admin.sock'
//! haproxy-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod error;
pub mod exposition;
pub mod fields;
pub mod http;
pub mod mapping;
pub mod parser;
pub mod status;
pub mod transport;

pub use collector::{Exporter, Scrape, ScrapeOutcome, SharedExporter};
pub use config::ExporterConfig;
pub use error::{CsvError, ExporterError, Result, TransportError};
pub use fields::{FieldRegistry, FieldSpec, MetricDesc, MetricKind, RowCategory, SelectedMetricSet};
pub use http::HttpServer;
pub use mapping::{MetricMapper, Observation};
pub use parser::{CsvLayout, Row, RowParser};
pub use status::parse_status_field;
pub use transport::{ScrapeTarget, Transport};
