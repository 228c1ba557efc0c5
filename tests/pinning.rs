//! End-to-end pinning against local fixtures.

use async_trait::async_trait;
use hostpin::config::{DomainSettings, FallbackPolicy, Settings, StaticEntry};
use hostpin::optimizer::{self, Optimizer};
use hostpin::{Candidate, CandidateSource, HostsFile, ProbeEngine, Report, Thresholds, UpdateOptions};
use std::net::IpAddr;
use tokio::net::TcpListener;

const HOSTS: &str = "\
127.0.0.1 localhost
# managed below
192.0.2.10 github.com
";

struct ListSource(Vec<&'static str>);

#[async_trait]
impl CandidateSource for ListSource {
    fn name(&self) -> &str {
        "list"
    }

    async fn list_candidates(&self, _domain: &str) -> hostpin::Result<Vec<Candidate>> {
        Ok(self
            .0
            .iter()
            .map(|ip| Candidate::new(ip.parse().unwrap(), "list"))
            .collect())
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn settings(port: u16) -> Settings {
    let domain = |name: &str, fallback: &str| DomainSettings {
        measure_throughput: Some(false),
        fallback: vec![StaticEntry {
            address: ip(fallback),
            region: None,
        }],
        ..DomainSettings::new(name)
    };
    let mut settings = Settings {
        domains: vec![
            domain("github.com", "192.0.2.1"),
            domain("raw.githubusercontent.com", "192.0.2.2"),
        ],
        thresholds: Thresholds::latency_only(1_000.0),
        fallback: FallbackPolicy::Static,
        ..Settings::default()
    };
    settings.probe.port = port;
    settings.probe.connect_timeout_ms = 500;
    settings
}

#[tokio::test]
async fn test_run_pins_and_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let settings = settings(port);
    let domains = settings.domain_names();

    let engine = ProbeEngine::new(settings.probe.clone()).unwrap();
    let optimizer = Optimizer::new(settings, Box::new(ListSource(vec!["127.0.0.2", "127.0.0.1"])), engine);
    let outcomes = optimizer.optimize_all(&domains).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.applied == Some(ip("127.0.0.1"))));
    assert!(outcomes.iter().all(|o| !o.fallback));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts");
    std::fs::write(&path, HOSTS).unwrap();
    let hosts = HostsFile::new(&path);
    let mapping = optimizer::mapping(&outcomes);

    let first = hosts.update(&mapping, UpdateOptions::default()).unwrap();
    assert!(first.is_modified());
    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        written,
        "127.0.0.1 localhost\n# managed below\n127.0.0.1 github.com\n127.0.0.1 raw.githubusercontent.com\n"
    );

    let second = hosts.update(&mapping, UpdateOptions::default()).unwrap();
    assert!(!second.is_modified());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    assert_eq!(hosts.lookup("GitHub.com").unwrap(), Some(ip("127.0.0.1")));

    let report_path = dir.path().join("report.json");
    Report::new(None, &outcomes).write(&report_path).unwrap();
    let report: Report = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].address, "127.0.0.1");
}

#[tokio::test]
async fn test_unreachable_candidates_fall_back_without_touching_on_dry_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let settings = settings(port);

    let engine = ProbeEngine::new(settings.probe.clone()).unwrap();
    let optimizer = Optimizer::new(settings, Box::new(ListSource(vec!["127.0.0.2"])), engine);
    let outcome = optimizer.optimize("github.com").await;

    assert!(outcome.selection.is_empty());
    assert_eq!(outcome.results.len(), 1);
    assert!(!outcome.results[0].is_reachable());
    assert_eq!(outcome.applied, Some(ip("192.0.2.1")));
    assert!(outcome.fallback);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hosts");
    std::fs::write(&path, HOSTS).unwrap();
    let hosts = HostsFile::new(&path);

    let update = hosts
        .update(
            &optimizer::mapping(&[outcome]),
            UpdateOptions {
                dry_run: true,
                backup: false,
            },
        )
        .unwrap();

    assert!(update.is_modified());
    assert!(update.content.contains("192.0.2.1 github.com"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), HOSTS);
}
