//! Per-domain orchestration.
//!
//! For each domain: list candidates, probe them, select the best one, and
//! apply the fallback policy when nothing qualifies.

use crate::config::settings::{FallbackPolicy, Settings, SourceKind};
use crate::error::Result;
use crate::probe::{
    select_best, Candidate, CandidateSource, CompositeSource, ProbeEngine, ProbeResult,
    ProbeTarget, SelectionOutcome,
};
use std::net::IpAddr;

/// Everything decided for one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainOutcome {
    pub domain: String,
    pub candidates: Vec<Candidate>,
    /// One result per candidate, in candidate order
    pub results: Vec<ProbeResult>,
    pub selection: SelectionOutcome,
    /// Address to pin, chosen or fallback
    pub applied: Option<IpAddr>,
    /// Whether `applied` came from the fallback policy
    pub fallback: bool,
}

impl DomainOutcome {
    fn without_candidates(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            candidates: Vec::new(),
            results: Vec::new(),
            selection: SelectionOutcome::empty(),
            applied: None,
            fallback: false,
        }
    }
}

/// Runs source, engine and selector for configured domains.
pub struct Optimizer {
    settings: Settings,
    source: Box<dyn CandidateSource>,
    engine: ProbeEngine,
}

impl Optimizer {
    pub fn new(settings: Settings, source: Box<dyn CandidateSource>, engine: ProbeEngine) -> Self {
        Self {
            settings,
            source,
            engine,
        }
    }

    /// Build the sources named by `kinds` (or the configured ones) and the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if a source or the engine cannot be constructed.
    pub fn from_settings(settings: Settings, kinds: Option<&[SourceKind]>) -> Result<Self> {
        let kinds = kinds.map_or_else(|| settings.sources.clone(), <[SourceKind]>::to_vec);
        let source = CompositeSource::from_settings(&settings, &kinds)?;
        let engine = ProbeEngine::new(settings.probe.clone())?;
        Ok(Self::new(settings, Box::new(source), engine))
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn source(&self) -> &dyn CandidateSource {
        self.source.as_ref()
    }

    pub fn engine(&self) -> &ProbeEngine {
        &self.engine
    }

    /// Probe and select for one domain. Never fails: problems end up as an
    /// outcome without a chosen address.
    pub async fn optimize(&self, domain: &str) -> DomainOutcome {
        let mut outcome = match self.source.list_candidates(domain).await {
            Ok(candidates) => {
                tracing::info!("{domain}: probing {} candidates", candidates.len());
                let target = ProbeTarget::from_settings(&self.settings, domain);
                let results = self.engine.probe_all(&target, &candidates).await;
                let selection = select_best(&results, &self.settings.thresholds_for(domain));
                DomainOutcome {
                    domain: domain.to_string(),
                    applied: selection.chosen.as_ref().map(|c| c.address),
                    candidates,
                    results,
                    selection,
                    fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!("{domain}: {e}");
                DomainOutcome::without_candidates(domain)
            }
        };

        match (&outcome.selection.chosen, &outcome.selection.metrics) {
            (Some(chosen), Some(metrics)) => {
                tracing::info!(
                    "{domain}: chose {} ({:.1} ms, {}/{} valid)",
                    chosen,
                    metrics.latency_ms.unwrap_or_default(),
                    outcome.selection.valid,
                    outcome.selection.considered
                );
            }
            _ => self.apply_fallback(&mut outcome),
        }
        outcome
    }

    fn apply_fallback(&self, outcome: &mut DomainOutcome) {
        let domain = &outcome.domain;
        match self.settings.fallback {
            FallbackPolicy::Skip => {
                tracing::warn!("{domain}: no valid candidate, leaving hosts entry alone");
            }
            FallbackPolicy::Static => {
                let address = self
                    .settings
                    .domain(domain)
                    .and_then(|d| d.fallback.first())
                    .map(|entry| entry.address);
                match address {
                    Some(address) => {
                        tracing::warn!("{domain}: no valid candidate, falling back to {address}");
                        outcome.applied = Some(address);
                        outcome.fallback = true;
                    }
                    None => tracing::warn!("{domain}: no valid candidate and no static entry"),
                }
            }
        }
    }

    /// Optimize each domain in turn.
    pub async fn optimize_all(&self, domains: &[String]) -> Vec<DomainOutcome> {
        let mut outcomes = Vec::with_capacity(domains.len());
        for domain in domains {
            outcomes.push(self.optimize(domain).await);
        }
        outcomes
    }
}

/// Hosts mapping for the outcomes that have an address to pin.
#[must_use]
pub fn mapping(outcomes: &[DomainOutcome]) -> Vec<(String, IpAddr)> {
    outcomes
        .iter()
        .filter_map(|o| o.applied.map(|address| (o.domain.clone(), address)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{DomainSettings, StaticEntry};
    use crate::error::Error;
    use crate::probe::Thresholds;
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    const DOMAIN: &str = "pinned.test";

    struct FakeSource(Option<Vec<&'static str>>);

    #[async_trait]
    impl CandidateSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
            match &self.0 {
                Some(ips) => Ok(ips
                    .iter()
                    .map(|ip| Candidate::new(ip.parse().unwrap(), "fake"))
                    .collect()),
                None => Err(Error::source_unavailable(domain, "offline")),
            }
        }
    }

    fn settings(port: u16, fallback: FallbackPolicy) -> Settings {
        let mut settings = Settings {
            domains: vec![DomainSettings {
                measure_throughput: Some(false),
                fallback: vec![StaticEntry {
                    address: "192.0.2.1".parse().unwrap(),
                    region: None,
                }],
                ..DomainSettings::new(DOMAIN)
            }],
            thresholds: Thresholds::new(1_000.0, 1.0),
            fallback,
            ..Settings::default()
        };
        settings.probe.port = port;
        settings.probe.connect_timeout_ms = 500;
        settings
    }

    fn optimizer(port: u16, fallback: FallbackPolicy, ips: Option<Vec<&'static str>>) -> Optimizer {
        let settings = settings(port, fallback);
        let engine = ProbeEngine::new(settings.probe.clone()).unwrap();
        Optimizer::new(settings, Box::new(FakeSource(ips)), engine)
    }

    #[tokio::test]
    async fn test_reachable_candidate_is_applied() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let optimizer = optimizer(port, FallbackPolicy::Static, Some(vec!["127.0.0.2", "127.0.0.1"]));

        let outcome = optimizer.optimize(DOMAIN).await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.applied, Some("127.0.0.1".parse().unwrap()));
        assert!(!outcome.fallback);
        assert_eq!(outcome.selection.valid, 1);
    }

    #[tokio::test]
    async fn test_static_fallback_when_nothing_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let optimizer = optimizer(port, FallbackPolicy::Static, Some(vec!["127.0.0.2"]));

        let outcome = optimizer.optimize(DOMAIN).await;

        assert!(outcome.selection.is_empty());
        assert_eq!(outcome.applied, Some("192.0.2.1".parse().unwrap()));
        assert!(outcome.fallback);
    }

    #[tokio::test]
    async fn test_skip_policy_leaves_domain_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let optimizer = optimizer(port, FallbackPolicy::Skip, Some(vec!["127.0.0.2"]));

        let outcomes = optimizer.optimize_all(&[DOMAIN.to_string()]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].applied.is_none());
        assert!(mapping(&outcomes).is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_source_uses_fallback() {
        let optimizer = optimizer(443, FallbackPolicy::Static, None);

        let outcome = optimizer.optimize(DOMAIN).await;

        assert!(outcome.candidates.is_empty());
        assert!(outcome.results.is_empty());
        assert!(outcome.fallback);
    }

    #[tokio::test]
    async fn test_unconfigured_domain_without_fallback() {
        let optimizer = optimizer(443, FallbackPolicy::Static, None);

        let outcome = optimizer.optimize("unknown.test").await;

        assert!(outcome.applied.is_none());
        assert!(!outcome.fallback);
    }

    #[test]
    fn test_mapping_keeps_order() {
        let mut first = DomainOutcome::without_candidates("a.test");
        first.applied = Some("192.0.2.1".parse().unwrap());
        let second = DomainOutcome::without_candidates("b.test");
        let mut third = DomainOutcome::without_candidates("c.test");
        third.applied = Some("192.0.2.3".parse().unwrap());

        let pairs = mapping(&[first, second, third]);

        assert_eq!(
            pairs,
            vec![
                ("a.test".to_string(), "192.0.2.1".parse().unwrap()),
                ("c.test".to_string(), "192.0.2.3".parse().unwrap()),
            ]
        );
    }
}
