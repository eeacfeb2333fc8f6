//! Static description of the HAProxy CSV columns we export.
//!
//! Each row category (frontend, backend, server) has its own table of
//! [`FieldSpec`]s keyed by column position. Column layouts for reference:
//!
//! ```text
//! HAProxy 1.4
//! pxname,svname,qcur,qmax,scur,smax,slim,stot,bin,bout,dreq,dresp,ereq,econ,eresp,wretr,wredis,status,weight,act,bck,chkfail,chkdown,lastchg,downtime,qlimit,pid,iid,sid,throttle,lbtot,tracked,type,rate,rate_lim,rate_max,check_status,check_code,check_duration,hrsp_1xx,hrsp_2xx,hrsp_3xx,hrsp_4xx,hrsp_5xx,hrsp_other,hanafail,req_rate,req_rate_max,req_tot,cli_abrt,srv_abrt,
//! HAProxy 1.5
//! ...,comp_in,comp_out,comp_byp,comp_rsp,lastsess,
//! HAProxy 1.5.19
//! ...,last_chk,last_agt,qtime,ctime,rtime,ttime,
//! HAProxy 1.7
//! ...,agent_status,agent_code,agent_duration,check_desc,agent_desc,check_rise,check_fall,check_health,agent_rise,agent_fall,agent_health,addr,cookie,mode,algo,conn_rate,conn_rate_max,conn_tot,intercepted,dcon,dses
//! ```

use std::collections::BTreeSet;

use crate::error::{ExporterError, Result};

/// Column holding the server health status.
pub const STATUS_FIELD: usize = 17;

/// Classification of a stats row, from the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowCategory {
    Frontend,
    Backend,
    Server,
    /// Listeners and other row types we do not export.
    Other,
}

impl RowCategory {
    /// Decode the `type` column. Unknown values yield `None`.
    pub fn from_type_field(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::Frontend),
            "1" => Some(Self::Backend),
            "2" => Some(Self::Server),
            "3" => Some(Self::Other),
            _ => None,
        }
    }

    /// Subsystem segment used in metric names.
    pub fn subsystem(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Server => "server",
            Self::Other => "other",
        }
    }

    /// Names of the labels taken from the row itself.
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            Self::Frontend => &["frontend"],
            Self::Backend => &["backend"],
            Self::Server => &["backend", "server"],
            Self::Other => &[],
        }
    }
}

/// Whether a metric only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// How the raw cell text becomes a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Base-10 integer.
    Integer,
    /// Health status token, see [`crate::status::parse_status_field`].
    Status,
    /// Floating point milliseconds, exported in seconds.
    MillisToSeconds,
}

/// One exported column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// 0-based column position in the CSV row.
    pub column: usize,
    /// Metric name below the `<namespace>_<subsystem>_` prefix.
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub conversion: Conversion,
    /// Labels fixed by the column rather than taken from the row.
    pub const_labels: &'static [(&'static str, &'static str)],
}

impl FieldSpec {
    const fn gauge(column: usize, name: &'static str, help: &'static str) -> Self {
        Self {
            column,
            name,
            help,
            kind: MetricKind::Gauge,
            conversion: Conversion::Integer,
            const_labels: &[],
        }
    }

    const fn counter(column: usize, name: &'static str, help: &'static str) -> Self {
        Self {
            column,
            name,
            help,
            kind: MetricKind::Counter,
            conversion: Conversion::Integer,
            const_labels: &[],
        }
    }

    const fn http_responses(column: usize, code: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            column,
            name: "http_responses_total",
            help: "Total of HTTP responses",
            kind: MetricKind::Counter,
            conversion: Conversion::Integer,
            const_labels: code,
        }
    }

    const fn status(help: &'static str) -> Self {
        Self {
            column: STATUS_FIELD,
            name: "up",
            help,
            kind: MetricKind::Gauge,
            conversion: Conversion::Status,
            const_labels: &[],
        }
    }

    const fn millis_to_seconds(column: usize, name: &'static str, help: &'static str) -> Self {
        Self {
            column,
            name,
            help,
            kind: MetricKind::Gauge,
            conversion: Conversion::MillisToSeconds,
            const_labels: &[],
        }
    }
}

const CODE_1XX: &[(&str, &str)] = &[("code", "1xx")];
const CODE_2XX: &[(&str, &str)] = &[("code", "2xx")];
const CODE_3XX: &[(&str, &str)] = &[("code", "3xx")];
const CODE_4XX: &[(&str, &str)] = &[("code", "4xx")];
const CODE_5XX: &[(&str, &str)] = &[("code", "5xx")];
const CODE_OTHER: &[(&str, &str)] = &[("code", "other")];

const FRONTEND_FIELDS: &[FieldSpec] = &[
    FieldSpec::gauge(4, "current_sessions", "Current number of active sessions"),
    FieldSpec::gauge(
        5,
        "max_sessions",
        "Maximum observed number of active sessions",
    ),
    FieldSpec::gauge(6, "limit_sessions", "Configured session limit"),
    FieldSpec::counter(7, "sessions_total", "Total number of sessions"),
    FieldSpec::counter(8, "bytes_in_total", "Current total of incoming bytes"),
    FieldSpec::counter(9, "bytes_out_total", "Current total of outgoing bytes"),
    FieldSpec::counter(
        10,
        "requests_denied_total",
        "Total of requests denied for security",
    ),
    FieldSpec::counter(12, "request_errors_total", "Total of request errors"),
    FieldSpec::gauge(
        33,
        "current_session_rate",
        "Current number of sessions per second over last elapsed second",
    ),
    FieldSpec::gauge(
        34,
        "limit_session_rate",
        "Configured limit on new sessions per second",
    ),
    FieldSpec::gauge(
        35,
        "max_session_rate",
        "Maximum observed number of sessions per second",
    ),
    FieldSpec::http_responses(39, CODE_1XX),
    FieldSpec::http_responses(40, CODE_2XX),
    FieldSpec::http_responses(41, CODE_3XX),
    FieldSpec::http_responses(42, CODE_4XX),
    FieldSpec::http_responses(43, CODE_5XX),
    FieldSpec::http_responses(44, CODE_OTHER),
    FieldSpec::counter(48, "http_requests_total", "Total HTTP requests"),
    FieldSpec::counter(
        51,
        "compressor_bytes_in_total",
        "Number of HTTP response bytes fed to the compressor",
    ),
    FieldSpec::counter(
        52,
        "compressor_bytes_out_total",
        "Number of HTTP response bytes emitted by the compressor",
    ),
    FieldSpec::counter(
        53,
        "compressor_bytes_bypassed_total",
        "Number of bytes that bypassed the HTTP compressor",
    ),
    FieldSpec::counter(
        54,
        "http_responses_compressed_total",
        "Number of HTTP responses that were compressed",
    ),
    FieldSpec::counter(79, "connections_total", "Total number of connections"),
];

const BACKEND_FIELDS: &[FieldSpec] = &[
    FieldSpec::gauge(
        2,
        "current_queue",
        "Current number of queued requests not assigned to any server",
    ),
    FieldSpec::gauge(
        3,
        "max_queue",
        "Maximum observed number of queued requests not assigned to any server",
    ),
    FieldSpec::gauge(4, "current_sessions", "Current number of active sessions"),
    FieldSpec::gauge(
        5,
        "max_sessions",
        "Maximum observed number of active sessions",
    ),
    FieldSpec::gauge(6, "limit_sessions", "Configured session limit"),
    FieldSpec::counter(7, "sessions_total", "Total number of sessions"),
    FieldSpec::counter(8, "bytes_in_total", "Current total of incoming bytes"),
    FieldSpec::counter(9, "bytes_out_total", "Current total of outgoing bytes"),
    FieldSpec::counter(13, "connection_errors_total", "Total of connection errors"),
    FieldSpec::counter(14, "response_errors_total", "Total of response errors"),
    FieldSpec::counter(15, "retry_warnings_total", "Total of retry warnings"),
    FieldSpec::counter(
        16,
        "redispatch_warnings_total",
        "Total of redispatch warnings",
    ),
    FieldSpec::status("Current health status of the backend (1 = UP, 0 = DOWN)"),
    FieldSpec::gauge(18, "weight", "Total weight of the servers in the backend"),
    FieldSpec::gauge(19, "current_server", "Current number of active servers"),
    FieldSpec::counter(
        30,
        "server_selected_total",
        "Total number of times a server was selected, either for new sessions, or when re-dispatching",
    ),
    FieldSpec::gauge(
        33,
        "current_session_rate",
        "Current number of sessions per second over last elapsed second",
    ),
    FieldSpec::gauge(
        35,
        "max_session_rate",
        "Maximum number of sessions per second",
    ),
    FieldSpec::http_responses(39, CODE_1XX),
    FieldSpec::http_responses(40, CODE_2XX),
    FieldSpec::http_responses(41, CODE_3XX),
    FieldSpec::http_responses(42, CODE_4XX),
    FieldSpec::http_responses(43, CODE_5XX),
    FieldSpec::http_responses(44, CODE_OTHER),
    FieldSpec::counter(
        51,
        "compressor_bytes_in_total",
        "Number of HTTP response bytes fed to the compressor",
    ),
    FieldSpec::counter(
        52,
        "compressor_bytes_out_total",
        "Number of HTTP response bytes emitted by the compressor",
    ),
    FieldSpec::counter(
        53,
        "compressor_bytes_bypassed_total",
        "Number of bytes that bypassed the HTTP compressor",
    ),
    FieldSpec::counter(
        54,
        "http_responses_compressed_total",
        "Number of HTTP responses that were compressed",
    ),
    FieldSpec::millis_to_seconds(
        58,
        "http_queue_time_average_seconds",
        "Avg. HTTP queue time for last 1024 successful connections",
    ),
    FieldSpec::millis_to_seconds(
        59,
        "http_connect_time_average_seconds",
        "Avg. HTTP connect time for last 1024 successful connections",
    ),
    FieldSpec::millis_to_seconds(
        60,
        "http_response_time_average_seconds",
        "Avg. HTTP response time for last 1024 successful connections",
    ),
    FieldSpec::millis_to_seconds(
        61,
        "http_total_time_average_seconds",
        "Avg. HTTP total time for last 1024 successful connections",
    ),
];

const SERVER_FIELDS: &[FieldSpec] = &[
    FieldSpec::gauge(
        2,
        "current_queue",
        "Current number of queued requests assigned to this server",
    ),
    FieldSpec::gauge(
        3,
        "max_queue",
        "Maximum observed number of queued requests assigned to this server",
    ),
    FieldSpec::gauge(4, "current_sessions", "Current number of active sessions"),
    FieldSpec::gauge(
        5,
        "max_sessions",
        "Maximum observed number of active sessions",
    ),
    FieldSpec::gauge(6, "limit_sessions", "Configured session limit"),
    FieldSpec::counter(7, "sessions_total", "Total number of sessions"),
    FieldSpec::counter(8, "bytes_in_total", "Current total of incoming bytes"),
    FieldSpec::counter(9, "bytes_out_total", "Current total of outgoing bytes"),
    FieldSpec::counter(13, "connection_errors_total", "Total of connection errors"),
    FieldSpec::counter(14, "response_errors_total", "Total of response errors"),
    FieldSpec::counter(15, "retry_warnings_total", "Total of retry warnings"),
    FieldSpec::counter(
        16,
        "redispatch_warnings_total",
        "Total of redispatch warnings",
    ),
    FieldSpec::status("Current health status of the server (1 = UP, 0 = DOWN)"),
    FieldSpec::gauge(18, "weight", "Current weight of the server"),
    FieldSpec::counter(
        21,
        "check_failures_total",
        "Total number of failed health checks",
    ),
    FieldSpec::counter(24, "downtime_seconds_total", "Total downtime in seconds"),
    FieldSpec::counter(
        30,
        "server_selected_total",
        "Total number of times a server was selected, either for new sessions, or when re-dispatching",
    ),
    FieldSpec::gauge(
        33,
        "current_session_rate",
        "Current number of sessions per second over last elapsed second",
    ),
    FieldSpec::gauge(
        35,
        "max_session_rate",
        "Maximum observed number of sessions per second",
    ),
    FieldSpec::gauge(
        38,
        "check_duration_milliseconds",
        "Previously run health check duration, in milliseconds",
    ),
    FieldSpec::http_responses(39, CODE_1XX),
    FieldSpec::http_responses(40, CODE_2XX),
    FieldSpec::http_responses(41, CODE_3XX),
    FieldSpec::http_responses(42, CODE_4XX),
    FieldSpec::http_responses(43, CODE_5XX),
    FieldSpec::http_responses(44, CODE_OTHER),
];

/// Description of one metric identity the exporter can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    /// Fully qualified metric name.
    pub name: String,
    pub help: &'static str,
    pub kind: MetricKind,
    /// Labels whose values come from the scraped row.
    pub label_names: &'static [&'static str],
    /// Labels with fixed values.
    pub const_labels: &'static [(&'static str, &'static str)],
}

/// Subset of the server table chosen by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedMetricSet {
    fields: Vec<FieldSpec>,
}

impl SelectedMetricSet {
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether the given column is exported.
    pub fn contains(&self, column: usize) -> bool {
        self.fields.iter().any(|f| f.column == column)
    }
}

/// The field tables for all row categories, plus the metric namespace.
///
/// Built once at startup and handed to the [`crate::Exporter`].
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    namespace: String,
    frontend: Vec<FieldSpec>,
    backend: Vec<FieldSpec>,
    server: Vec<FieldSpec>,
}

impl FieldRegistry {
    /// Registry with the standard HAProxy tables.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            frontend: FRONTEND_FIELDS.to_vec(),
            backend: BACKEND_FIELDS.to_vec(),
            server: SERVER_FIELDS.to_vec(),
        }
    }

    /// Registry with custom tables.
    ///
    /// Tables are sorted by column; a column may appear only once per table.
    pub fn with_tables(
        namespace: impl Into<String>,
        frontend: Vec<FieldSpec>,
        backend: Vec<FieldSpec>,
        server: Vec<FieldSpec>,
    ) -> Result<Self> {
        Ok(Self {
            namespace: namespace.into(),
            frontend: checked_table("frontend", frontend)?,
            backend: checked_table("backend", backend)?,
            server: checked_table("server", server)?,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full field table for a row category. [`RowCategory::Other`] has none.
    pub fn table(&self, category: RowCategory) -> &[FieldSpec] {
        match category {
            RowCategory::Frontend => &self.frontend,
            RowCategory::Backend => &self.backend,
            RowCategory::Server => &self.server,
            RowCategory::Other => &[],
        }
    }

    /// Fully qualified name of a column metric.
    pub fn metric_name(&self, category: RowCategory, field: &FieldSpec) -> String {
        format!("{}_{}_{}", self.namespace, category.subsystem(), field.name)
    }

    /// Fully qualified name of an exporter-level metric.
    pub fn exporter_metric_name(&self, name: &str) -> String {
        format!("{}_{}", self.namespace, name)
    }

    /// Every server column, comma separated. This is the default selection.
    pub fn server_fields_string(&self) -> String {
        self.server
            .iter()
            .map(|f| f.column)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The whole server table as a selection.
    pub fn all_server_metrics(&self) -> SelectedMetricSet {
        SelectedMetricSet {
            fields: self.server.clone(),
        }
    }

    /// Select server metrics from a comma separated list of column numbers.
    ///
    /// An empty filter selects nothing. Any entry that is not an integer fails
    /// the whole selection; integers with no matching column, negative ones
    /// included, are ignored.
    pub fn select_server_metrics(&self, filter: &str) -> Result<SelectedMetricSet> {
        if filter.is_empty() {
            return Ok(SelectedMetricSet::default());
        }

        let mut selected = BTreeSet::new();
        for entry in filter.split(',') {
            let column = entry
                .trim()
                .parse::<i64>()
                .map_err(|_| ExporterError::InvalidMetricField(entry.to_string()))?;
            if let Ok(column) = usize::try_from(column) {
                selected.insert(column);
            }
        }

        let fields = self
            .server
            .iter()
            .filter(|f| selected.contains(&f.column))
            .copied()
            .collect();

        Ok(SelectedMetricSet { fields })
    }

    /// Describe every column metric: all frontend and backend columns plus
    /// the selected server columns.
    pub fn describe(&self, server: &SelectedMetricSet) -> Vec<MetricDesc> {
        let tables = [
            (RowCategory::Frontend, self.frontend.as_slice()),
            (RowCategory::Backend, self.backend.as_slice()),
            (RowCategory::Server, server.fields()),
        ];

        tables
            .into_iter()
            .flat_map(|(category, fields)| {
                fields.iter().map(move |field| MetricDesc {
                    name: self.metric_name(category, field),
                    help: field.help,
                    kind: field.kind,
                    label_names: category.label_names(),
                    const_labels: field.const_labels,
                })
            })
            .collect()
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new("haproxy")
    }
}

fn checked_table(table: &'static str, mut fields: Vec<FieldSpec>) -> Result<Vec<FieldSpec>> {
    fields.sort_by_key(|f| f.column);
    if let Some(pair) = fields.windows(2).find(|w| w[0].column == w[1].column) {
        return Err(ExporterError::DuplicateColumn {
            table,
            column: pair[0].column,
        });
    }
    Ok(fields)
}
