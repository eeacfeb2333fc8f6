//! The exporter: one serialized scrape per collect request.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{CsvError, Result};
use crate::fields::{FieldRegistry, MetricDesc, MetricKind, SelectedMetricSet};
use crate::mapping::{MetricMapper, Observation};
use crate::parser::{CsvLayout, Row, RowParser};
use crate::transport::{ScrapeTarget, StatsBody, Transport};

const UP_HELP: &str = "Was the last scrape of HAProxy successful";
const SCRAPES_HELP: &str = "Current total HAProxy scrapes";
const PARSE_FAILURES_HELP: &str = "Number of errors while parsing CSV";

/// Health of the exporter after a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// Whether the most recent fetch succeeded and its payload was read to the end.
    pub up: bool,
    /// Scrapes attempted since startup.
    pub total_scrapes: u64,
    /// Malformed rows and cells seen since startup.
    pub parse_failures: u64,
}

/// Everything one scrape produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Scrape {
    pub outcome: ScrapeOutcome,
    /// Row observations followed by the three health observations.
    pub observations: Vec<Observation>,
}

/// Counters that live as long as the process. Only touched under the scrape lock.
#[derive(Debug, Default)]
struct ScrapeCounters {
    total_scrapes: u64,
    parse_failures: u64,
}

/// HAProxy exporter.
///
/// Concurrent [`collect`](Self::collect) calls are serialized: each one holds
/// the scrape lock for the whole fetch, parse and map cycle.
pub struct Exporter {
    target: ScrapeTarget,
    transport: Transport,
    fields: Arc<FieldRegistry>,
    server_metrics: SelectedMetricSet,
    layout: CsvLayout,
    counters: Mutex<ScrapeCounters>,
    last_outcome: RwLock<Option<ScrapeOutcome>>,
}

impl Exporter {
    /// Create an exporter for a validated target.
    pub fn new(
        target: ScrapeTarget,
        fields: Arc<FieldRegistry>,
        server_metrics: SelectedMetricSet,
    ) -> Result<Self> {
        let transport = Transport::new(&target)?;

        Ok(Self {
            target,
            transport,
            fields,
            server_metrics,
            layout: CsvLayout::default(),
            counters: Mutex::new(ScrapeCounters::default()),
            last_outcome: RwLock::new(None),
        })
    }

    /// Use a different row layout.
    pub fn with_layout(mut self, layout: CsvLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    /// Outcome of the most recent completed scrape, without scraping.
    pub fn last_outcome(&self) -> Option<ScrapeOutcome> {
        *self.last_outcome.read()
    }

    /// Every metric this exporter can emit.
    ///
    /// Static: it never scrapes and never waits for one in progress.
    pub fn describe(&self) -> Vec<MetricDesc> {
        let mut descs = self.fields.describe(&self.server_metrics);
        descs.extend(self.health_descs());
        descs
    }

    fn health_descs(&self) -> [MetricDesc; 3] {
        let health = |name: &str, help: &'static str, kind: MetricKind| MetricDesc {
            name: self.fields.exporter_metric_name(name),
            help,
            kind,
            label_names: &[],
            const_labels: &[],
        };

        [
            health("up", UP_HELP, MetricKind::Gauge),
            health("exporter_scrapes_total", SCRAPES_HELP, MetricKind::Counter),
            health(
                "exporter_csv_parse_failures_total",
                PARSE_FAILURES_HELP,
                MetricKind::Counter,
            ),
        ]
    }

    fn health_observations(&self, outcome: &ScrapeOutcome) -> Vec<Observation> {
        let values = [
            if outcome.up { 1.0 } else { 0.0 },
            outcome.total_scrapes as f64,
            outcome.parse_failures as f64,
        ];

        self.health_descs()
            .into_iter()
            .zip(values)
            .map(|(desc, value)| Observation {
                name: desc.name,
                kind: desc.kind,
                labels: Vec::new(),
                value,
            })
            .collect()
    }

    /// Run one scrape and return its observations.
    ///
    /// Never fails: fetch and parse problems show up as `up = 0` and in the
    /// parse failure counter.
    pub async fn collect(&self) -> Scrape {
        let mut counters = self.counters.lock().await;
        counters.total_scrapes += 1;

        let mut observations = Vec::new();
        let up = match self.transport.fetch().await {
            Ok(body) => {
                let (up, failures) = self.read_body(body, &mut observations).await;
                counters.parse_failures += failures;
                up
            }
            Err(e) => {
                error!(uri = %self.target.uri(), error = %e, "Can't scrape HAProxy");
                false
            }
        };

        let outcome = ScrapeOutcome {
            up,
            total_scrapes: counters.total_scrapes,
            parse_failures: counters.parse_failures,
        };
        debug!(
            up,
            observations = observations.len(),
            total_scrapes = outcome.total_scrapes,
            parse_failures = outcome.parse_failures,
            "Scrape complete"
        );

        observations.extend(self.health_observations(&outcome));
        *self.last_outcome.write() = Some(outcome);

        Scrape {
            outcome,
            observations,
        }
    }

    /// Stream the payload through the parser and mapper.
    ///
    /// Returns whether the payload was read to the end, and the number of
    /// failures seen.
    async fn read_body(
        &self,
        mut body: StatsBody,
        observations: &mut Vec<Observation>,
    ) -> (bool, u64) {
        let mut parser = RowParser::new(self.layout);
        let mapper = MetricMapper::new(&self.fields, &self.server_metrics);
        let mut failures = 0;

        loop {
            match body.chunk().await {
                Ok(Some(chunk)) => {
                    failures += map_rows(&mapper, parser.feed(&chunk), observations);
                }
                Ok(None) => {
                    failures += map_rows(&mapper, parser.finish(), observations);
                    return (true, failures);
                }
                Err(e) => {
                    error!(uri = %self.target.uri(), error = %e, "Stats payload broke off");
                    return (false, failures + 1);
                }
            }
        }
    }
}

fn map_rows(
    mapper: &MetricMapper<'_>,
    rows: Vec<std::result::Result<Row, CsvError>>,
    observations: &mut Vec<Observation>,
) -> u64 {
    let mut failures = 0;
    for row in rows {
        match row {
            Ok(row) => {
                let mapped = mapper.map_row(&row);
                failures += mapped.failures;
                observations.extend(mapped.observations);
            }
            Err(e) => {
                warn!(line = e.line(), error = %e, "Skipping malformed stats row");
                failures += 1;
            }
        }
    }
    failures
}

/// Create a shareable exporter handle.
pub type SharedExporter = Arc<Exporter>;
