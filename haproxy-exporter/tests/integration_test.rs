//! Integration tests for the HAProxy exporter.
//!
//! These tests drive full scrapes against in-process stand-ins for HAProxy:
//! an HTTP stats page, the stats unix socket, and listeners that never answer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

use haproxy_exporter::{
    Exporter, FieldRegistry, HttpServer, Observation, Scrape, ScrapeOutcome, ScrapeTarget,
};

const TIMEOUT: Duration = Duration::from_secs(5);

const SERVER_WITHOUT_CHECKS: &str = "test,127.0.0.1:8080,0,0,0,0,0,0,0,0,,0,,0,0,0,0,no check,1,1,0,0,,,0,,1,1,1,,0,,2,0,,0,,,,0,0,0,0,0,0,0,,,,0,0,,,,,,,,,,,";

/// One row is missing a comma between `status` and `weight`.
const BROKEN_CSV: &str = "\
foo,FRONTEND,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,0,,0,L4OK,,0,,,,,,,0,,,,0,0,,,,,,,,,,,
foo,bug-missing-comma,0,0,0,0,,0,0,0,,0,,0,0,0,0,DRAIN (agent)1,1,0,0,0,5007,0,,1,8,1,,0,,2,0,,0,L4OK,,0,,,,,,,0,,,,0,0,,,,,,,,,,,
foo,foo-instance-0,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,0,,0,L4OK,,0,,,,,,,0,,,,0,0,,,,,,,,,,,
foo,BACKEND,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,0,,0,L4OK,,0,,,,,,,0,,,,0,0,,,,,,,,,,,
";

/// Rows end right after the `type` column.
const OLDER_VERSIONS: &str = "\
foo,FRONTEND,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,
foo,foo-instance-0,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,
foo,BACKEND,0,0,0,0,,0,0,0,,0,,0,0,0,0,UP,1,1,0,0,0,5007,0,,1,8,1,,0,,2,
";

/// Helper to serve a fixed stats page on a random port.
async fn mock_haproxy(status: StatusCode, response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move || async move { (status, response) });

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Helper to accept connections and never answer them.
async fn stalled_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

fn stats_uri(addr: SocketAddr) -> String {
    format!("http://{}/;csv", addr)
}

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/haproxy.csv")
}

/// Helper to create an exporter exporting every server column.
fn create_exporter(uri: &str, timeout: Duration) -> Exporter {
    let target = ScrapeTarget::new(uri, true, timeout).unwrap();
    let fields = Arc::new(FieldRegistry::default());
    let server_metrics = fields.all_server_metrics();
    Exporter::new(target, fields, server_metrics).unwrap()
}

/// Observations that came from stats rows, not the health metrics.
fn row_observations(scrape: &Scrape) -> Vec<&Observation> {
    scrape
        .observations
        .iter()
        .filter(|o| !o.name.starts_with("haproxy_up") && !o.name.starts_with("haproxy_exporter_"))
        .collect()
}

/// Value of the series with `name` and exactly `labels`.
fn sample(scrape: &Scrape, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    scrape
        .observations
        .iter()
        .find(|o| {
            o.name == name
                && o.labels.len() == labels.len()
                && o
                    .labels
                    .iter()
                    .zip(labels)
                    .all(|((k, v), (ek, ev))| k == ek && v == ev)
        })
        .map(|o| o.value)
}

#[tokio::test]
async fn test_invalid_config() {
    let addr = mock_haproxy(StatusCode::OK, "not,enough,fields").await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;

    assert_eq!(
        scrape.outcome,
        ScrapeOutcome {
            up: true,
            total_scrapes: 1,
            parse_failures: 1
        }
    );
    assert!(row_observations(&scrape).is_empty());
}

#[tokio::test]
async fn test_server_without_checks() {
    let addr = mock_haproxy(StatusCode::OK, SERVER_WITHOUT_CHECKS).await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;
    let labels = [("backend", "test"), ("server", "127.0.0.1:8080")];

    assert!(scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 0);
    assert_eq!(row_observations(&scrape).len(), 25);
    assert_eq!(sample(&scrape, "haproxy_server_up", &labels), Some(1.0));
    assert_eq!(sample(&scrape, "haproxy_server_weight", &labels), Some(1.0));
    assert_eq!(sample(&scrape, "haproxy_server_bytes_in_total", &labels), Some(0.0));
    assert_eq!(
        sample(&scrape, "haproxy_server_check_duration_milliseconds", &labels),
        None
    );
}

#[tokio::test]
async fn test_server_broken_csv() {
    let addr = mock_haproxy(StatusCode::OK, BROKEN_CSV).await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;

    assert!(scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 1);

    let up: Vec<_> = scrape
        .observations
        .iter()
        .filter(|o| o.name == "haproxy_server_up")
        .map(|o| o.labels[1].1.as_str())
        .collect();
    assert_eq!(up, vec!["FRONTEND", "foo-instance-0", "BACKEND"]);
}

#[tokio::test]
async fn test_older_haproxy_versions() {
    let addr = mock_haproxy(StatusCode::OK, OLDER_VERSIONS).await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;

    assert!(scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 0);
    assert_eq!(
        sample(
            &scrape,
            "haproxy_server_downtime_seconds_total",
            &[("backend", "foo"), ("server", "foo-instance-0")]
        ),
        Some(0.0)
    );
    assert!(
        row_observations(&scrape)
            .iter()
            .all(|o| !o.name.ends_with("http_responses_total"))
    );
}

#[tokio::test]
async fn test_empty_payload() {
    let addr = mock_haproxy(StatusCode::OK, "").await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;

    assert!(scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 0);
    assert_eq!(scrape.observations.len(), 3);
}

#[tokio::test]
async fn test_not_found() {
    let addr = mock_haproxy(StatusCode::NOT_FOUND, "Not Found").await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let scrape = exporter.collect().await;

    assert_eq!(
        scrape.outcome,
        ScrapeOutcome {
            up: false,
            total_scrapes: 1,
            parse_failures: 0
        }
    );
    assert!(row_observations(&scrape).is_empty());
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);
    let scrape = exporter.collect().await;

    assert!(!scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 0);
}

#[tokio::test]
async fn test_deadline() {
    let addr = stalled_listener().await;
    let exporter = create_exporter(&stats_uri(addr), Duration::from_millis(200));

    let scrape = tokio::time::timeout(Duration::from_secs(5), exporter.collect())
        .await
        .expect("scrape must give up at the deadline");

    assert_eq!(
        scrape.outcome,
        ScrapeOutcome {
            up: false,
            total_scrapes: 1,
            parse_failures: 0
        }
    );
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let err = ScrapeTarget::new("gopher://gopher.quux.org", true, TIMEOUT).unwrap_err();
    assert_eq!(err.to_string(), r#"unsupported scheme: "gopher""#);
}

#[tokio::test]
async fn test_file_fixture() {
    let uri = reqwest::Url::from_file_path(fixture_path()).unwrap().to_string();
    let exporter = create_exporter(&uri, TIMEOUT);

    let scrape = exporter.collect().await;

    assert!(scrape.outcome.up);
    assert_eq!(scrape.outcome.parse_failures, 0);
    assert_eq!(row_observations(&scrape).len(), 158);

    assert_eq!(
        sample(&scrape, "haproxy_server_up", &[("backend", "app"), ("server", "web1")]),
        Some(1.0)
    );
    assert_eq!(
        sample(&scrape, "haproxy_server_up", &[("backend", "app"), ("server", "web2")]),
        Some(0.0)
    );
    assert_eq!(
        sample(&scrape, "haproxy_frontend_sessions_total", &[("frontend", "http-in")]),
        Some(5012.0)
    );
    assert_eq!(
        sample(
            &scrape,
            "haproxy_frontend_http_responses_total",
            &[("frontend", "http-in"), ("code", "2xx")]
        ),
        Some(4800.0)
    );
    assert_eq!(
        sample(
            &scrape,
            "haproxy_backend_http_total_time_average_seconds",
            &[("backend", "app")]
        ),
        Some(1.25)
    );
    assert_eq!(
        sample(&scrape, "haproxy_backend_current_server", &[("backend", "app")]),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_server_metric_selection() {
    let uri = reqwest::Url::from_file_path(fixture_path()).unwrap().to_string();
    let target = ScrapeTarget::new(uri, true, TIMEOUT).unwrap();
    let fields = Arc::new(FieldRegistry::default());
    let server_metrics = fields.select_server_metrics("17,39").unwrap();
    let exporter = Exporter::new(target, fields, server_metrics).unwrap();

    let scrape = exporter.collect().await;

    let server_names: Vec<_> = scrape
        .observations
        .iter()
        .filter(|o| o.name.starts_with("haproxy_server_"))
        .map(|o| o.name.as_str())
        .collect();
    assert_eq!(
        server_names,
        vec![
            "haproxy_server_up",
            "haproxy_server_http_responses_total",
            "haproxy_server_up",
            "haproxy_server_http_responses_total",
        ]
    );
}

#[tokio::test]
async fn test_collect_is_idempotent() {
    let addr = mock_haproxy(StatusCode::OK, BROKEN_CSV).await;
    let exporter = create_exporter(&stats_uri(addr), TIMEOUT);

    let first = exporter.collect().await;
    let second = exporter.collect().await;

    assert_eq!(row_observations(&first), row_observations(&second));
    assert_eq!(first.outcome.total_scrapes, 1);
    assert_eq!(second.outcome.total_scrapes, 2);
    assert_eq!(second.outcome.parse_failures, 2);
}

#[tokio::test]
async fn test_http_server_metrics_endpoint() {
    let stats = mock_haproxy(StatusCode::OK, SERVER_WITHOUT_CHECKS).await;
    let exporter = Arc::new(create_exporter(&stats_uri(stats), TIMEOUT));

    // Find a free port, then release it for the server to bind.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(exporter, addr, "/metrics".to_string());
    let server_handle = tokio::spawn(async move {
        let _ = server.run(shutdown_rx).await;
    });

    // Retry until the server has bound its listener.
    let client = reqwest::Client::new();
    let url = format!("http://{}/metrics", addr);
    let mut attempts = 0;
    let response = loop {
        match client.get(&url).send().await {
            Ok(response) => break response,
            Err(e) if attempts < 50 => {
                attempts += 1;
                tracing::debug!(error = %e, attempts, "Metrics server not up yet");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("metrics server never came up: {e}"),
        }
    };

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), server_handle).await;

    assert!(body.contains("# TYPE haproxy_up gauge"));
    assert!(body.contains("\nhaproxy_up 1.0\n"));
    assert!(body.contains("haproxy_server_up{backend=\"test\",server=\"127.0.0.1:8080\"} 1.0"));
    assert!(body.contains("# TYPE haproxy_exporter_csv_parse_failures counter"));
}

/// Helper to answer with a 200 that promises more body than it sends.
///
/// After one stats row the connection is closed, or held open when `stall`
/// is set.
async fn truncated_haproxy(stall: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 100000\r\n\r\n{SERVER_WITHOUT_CHECKS}\n"
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
            if stall {
                held.push(stream);
            }
        }
    });
    addr
}

async fn assert_broken_body(stall: bool) {
    let addr = truncated_haproxy(stall).await;
    let exporter = create_exporter(&stats_uri(addr), Duration::from_millis(500));

    let scrape = tokio::time::timeout(Duration::from_secs(5), exporter.collect())
        .await
        .expect("scrape must end when the body breaks off");

    assert_eq!(
        scrape.outcome,
        ScrapeOutcome {
            up: false,
            total_scrapes: 1,
            parse_failures: 1
        }
    );
    // The row that arrived before the break is still reported.
    let server = row_observations(&scrape)
        .into_iter()
        .filter(|o| o.name.starts_with("haproxy_server_"))
        .count();
    assert_eq!(server, 25);
}

#[tokio::test]
async fn test_body_closed_mid_stream() {
    assert_broken_body(false).await;
}

#[tokio::test]
async fn test_body_stalled_mid_stream() {
    assert_broken_body(true).await;
}

#[cfg(unix)]
mod unix_socket {
    use super::*;
    use tokio::net::UnixListener;

    /// Helper to answer `show stat` on a unix socket, once per connection.
    fn serve_socket(listener: UnixListener, response: &'static str) {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut command = [0u8; 10];
                if stream.read_exact(&mut command).await.is_err() || &command != b"show stat\n" {
                    continue;
                }
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
    }

    #[tokio::test]
    async fn test_unix_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haproxy.sock");
        serve_socket(UnixListener::bind(&path).unwrap(), SERVER_WITHOUT_CHECKS);

        let exporter = create_exporter(&format!("unix:{}", path.display()), TIMEOUT);
        let scrape = exporter.collect().await;

        assert!(scrape.outcome.up);
        assert_eq!(scrape.outcome.parse_failures, 0);
        assert_eq!(
            sample(
                &scrape,
                "haproxy_server_up",
                &[("backend", "test"), ("server", "127.0.0.1:8080")]
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_unix_domain_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");

        let exporter = create_exporter(&format!("unix:{}", path.display()), TIMEOUT);
        let scrape = exporter.collect().await;

        assert!(!scrape.outcome.up);
        assert_eq!(scrape.outcome.parse_failures, 0);
    }

    #[tokio::test]
    async fn test_unix_domain_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("haproxy.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let exporter = create_exporter(
            &format!("unix:{}", path.display()),
            Duration::from_millis(200),
        );
        let scrape = exporter.collect().await;

        assert_eq!(
            scrape.outcome,
            ScrapeOutcome {
                up: false,
                total_scrapes: 1,
                parse_failures: 0
            }
        );
    }
}
