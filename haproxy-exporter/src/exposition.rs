//! Encoding a scrape in the OpenMetrics text format.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode as encode_registry;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::trace;

use crate::collector::Scrape;
use crate::fields::{MetricDesc, MetricKind};

/// Content type of [`encode`]'s output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

type Labels = Vec<(String, String)>;

/// A registered metric of either kind.
///
/// Metrics without labels are registered bare so they encode as
/// `name value` rather than `name{} value`.
#[derive(Clone)]
enum FamilyHandle {
    Counter(Family<Labels, Counter<f64, AtomicU64>>),
    Gauge(Family<Labels, Gauge<f64, AtomicU64>>),
    BareCounter(Counter<f64, AtomicU64>),
    BareGauge(Gauge<f64, AtomicU64>),
}

impl FamilyHandle {
    /// Create the metric for `desc` and register it.
    fn register(registry: &mut Registry, desc: &MetricDesc) -> Self {
        let bare = desc.label_names.is_empty() && desc.const_labels.is_empty();
        // The encoder appends the `_total` suffix itself.
        let counter_name = desc.name.strip_suffix("_total").unwrap_or(&desc.name);

        match (desc.kind, bare) {
            (MetricKind::Counter, false) => {
                let family = Family::default();
                registry.register(counter_name, desc.help, family.clone());
                Self::Counter(family)
            }
            (MetricKind::Counter, true) => {
                let counter = Counter::default();
                registry.register(counter_name, desc.help, counter.clone());
                Self::BareCounter(counter)
            }
            (MetricKind::Gauge, false) => {
                let family = Family::default();
                registry.register(desc.name.as_str(), desc.help, family.clone());
                Self::Gauge(family)
            }
            (MetricKind::Gauge, true) => {
                let gauge = Gauge::default();
                registry.register(desc.name.as_str(), desc.help, gauge.clone());
                Self::BareGauge(gauge)
            }
        }
    }

    fn observe(&self, labels: &Labels, value: f64) {
        match self {
            Self::Counter(family) => {
                family.get_or_create(labels).inc_by(value);
            }
            Self::Gauge(family) => {
                family.get_or_create(labels).set(value);
            }
            Self::BareCounter(counter) => {
                counter.inc_by(value);
            }
            Self::BareGauge(gauge) => {
                gauge.set(value);
            }
        }
    }
}

/// Encode a scrape.
///
/// `descs` decides which families exist and in which order they appear;
/// observations with no matching description are dropped.
pub fn encode(scrape: &Scrape, descs: &[MetricDesc]) -> Result<String, std::fmt::Error> {
    let mut registry = Registry::default();
    let mut families: HashMap<&str, FamilyHandle> = HashMap::with_capacity(descs.len());

    for desc in descs {
        // Columns sharing a name, like the response code classes, share a family.
        if !families.contains_key(desc.name.as_str()) {
            let family = FamilyHandle::register(&mut registry, desc);
            families.insert(desc.name.as_str(), family);
        }
    }

    for observation in &scrape.observations {
        match families.get(observation.name.as_str()) {
            Some(family) => family.observe(&observation.labels, observation.value),
            None => trace!(name = %observation.name, "No family for observation"),
        }
    }

    let mut output = String::new();
    encode_registry(&mut output, &registry)?;
    Ok(output)
}
