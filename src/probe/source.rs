//! Candidate sources.
//!
//! A candidate source turns a domain name into a list of addresses worth
//! probing. Remote sources (the ping-test site, DoH endpoints, public
//! resolvers) are tried first; the static table from the settings is the
//! last resort when none of them produced anything.

#![allow(clippy::missing_errors_doc)]

use crate::config::settings::{PingSiteSettings, Settings, SourceKind, StaticEntry};
use crate::error::{Error, Result};
use crate::probe::types::Candidate;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::proto::rr::RecordType;
use trust_dns_resolver::TokioAsyncResolver;

/// Timeout of a single DoH or plain DNS lookup.
const LOOKUP_TIMEOUT_SECS: u64 = 20;

/// Browser user agent; the ping-test site rejects obvious bots.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Something that can list candidate addresses for a domain.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Short tag used in logs.
    fn name(&self) -> &str;

    /// List candidates for `domain`.
    ///
    /// Fails with [`Error::SourceUnavailable`] when no data could be
    /// obtained. An empty list is a valid answer.
    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>>;
}

/// Merge candidate lists, keeping the first occurrence of each address.
#[must_use]
pub fn merge_candidates(lists: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|c| seen.insert(c.address))
        .collect()
}

/// Build an HTTP client with a request timeout.
fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()?)
}

// ---------------------------------------------------------------------------
// Static table
// ---------------------------------------------------------------------------

/// Hard-coded well-known addresses per domain.
pub struct StaticSource {
    table: HashMap<String, Vec<StaticEntry>>,
}

impl StaticSource {
    #[must_use]
    pub fn new(table: HashMap<String, Vec<StaticEntry>>) -> Self {
        let table = table
            .into_iter()
            .map(|(domain, entries)| (domain.to_ascii_lowercase(), entries))
            .collect();
        Self { table }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings
                .domains
                .iter()
                .map(|d| (d.name.clone(), d.fallback.clone()))
                .collect(),
        )
    }

    /// Candidates for `domain`, empty for unknown domains.
    #[must_use]
    pub fn lookup(&self, domain: &str) -> Vec<Candidate> {
        self.table
            .get(&domain.to_ascii_lowercase())
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| Candidate {
                        address: e.address,
                        source: "static".to_string(),
                        region: e.region.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
        Ok(self.lookup(domain))
    }
}

// ---------------------------------------------------------------------------
// Ping-test site
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PingResponse {
    data: PingData,
}

#[derive(Debug, Deserialize)]
struct PingData {
    #[serde(default)]
    node_list: Vec<PingNode>,
}

#[derive(Debug, Deserialize)]
struct PingNode {
    #[serde(default)]
    node_name: String,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    timeout: i64,
}

/// Extract candidates from a ping-test site response.
///
/// Timed-out nodes and nodes outside `region_labels` are dropped. Addresses
/// keep first-seen order; the region is the name of the first node reporting the address.
///
/// # Errors
///
/// Returns `Error::Json` when the body is not a ping result.
pub fn parse_ping_response(body: &str, region_labels: &[String]) -> Result<Vec<Candidate>> {
    let response: PingResponse = serde_json::from_str(body)?;

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for node in response.data.node_list {
        if node.timeout > 0 {
            continue;
        }
        if !region_labels.is_empty()
            && !region_labels
                .iter()
                .any(|label| node.node_name.contains(label.as_str()))
        {
            continue;
        }
        let Ok(address) = node.ip.trim().parse::<IpAddr>() else {
            tracing::debug!("ping site returned invalid IP {:?}", node.ip);
            continue;
        };
        if seen.insert(address) {
            candidates.push(Candidate::new(address, "ping-site").with_region(node.node_name));
        }
    }

    Ok(candidates)
}

/// Candidates scraped from the ping-test site.
pub struct PingSiteSource {
    client: Client,
    settings: PingSiteSettings,
}

impl PingSiteSource {
    pub fn new(settings: PingSiteSettings) -> Result<Self> {
        let client = http_client(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self { client, settings })
    }

    async fn fetch(&self, domain: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.settings.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(REFERER, &self.settings.url)
            .body(format!("host={domain}&number=2"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl CandidateSource for PingSiteSource {
    fn name(&self) -> &str {
        "ping-site"
    }

    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
        let body = self
            .fetch(domain)
            .await
            .map_err(|e| Error::source_unavailable(domain, format!("ping site: {e}")))?;
        let candidates = parse_ping_response(&body, &self.settings.region_labels)
            .map_err(|e| Error::source_unavailable(domain, format!("ping site: {e}")))?;

        if candidates.is_empty() {
            tracing::info!("ping site: no node in the home region answered for {domain}");
        }
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// DNS over HTTPS
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Extract A/AAAA addresses from a DoH JSON answer.
///
/// # Errors
///
/// Returns an error when the body is not a DoH answer or its status is
/// not NOERROR.
pub fn parse_doh_answer(body: &str) -> Result<Vec<IpAddr>> {
    let response: DohResponse = serde_json::from_str(body)?;
    if response.status != 0 {
        return Err(Error::network(format!("DoH status {}", response.status)));
    }

    Ok(response
        .answer
        .into_iter()
        .filter(|a| a.record_type == 1 || a.record_type == 28)
        .filter_map(|a| a.data.trim().parse().ok())
        .collect())
}

/// Candidates from DNS-over-HTTPS JSON endpoints.
pub struct DohSource {
    client: Client,
    endpoints: Vec<String>,
}

impl DohSource {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        let client = http_client(Duration::from_secs(LOOKUP_TIMEOUT_SECS))?;
        Ok(Self { client, endpoints })
    }

    async fn query(&self, endpoint: &str, domain: &str) -> Result<Vec<Candidate>> {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{endpoint}{separator}name={domain}&type=1");
        let body = self
            .client
            .get(&url)
            .header(ACCEPT, "application/dns-json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let tag = reqwest::Url::parse(endpoint)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("doh:{h}")))
            .unwrap_or_else(|| "doh".to_string());

        Ok(parse_doh_answer(&body)?
            .into_iter()
            .map(|address| Candidate::new(address, tag.clone()))
            .collect())
    }
}

#[async_trait]
impl CandidateSource for DohSource {
    fn name(&self) -> &str {
        "doh"
    }

    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
        let queries = self.endpoints.iter().map(|endpoint| async move {
            let result = self.query(endpoint, domain).await;
            if let Err(e) = &result {
                tracing::debug!("DoH {endpoint} failed for {domain}: {e}");
            }
            result
        });
        let results = futures::future::join_all(queries).await;

        let answered: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
        if answered.is_empty() {
            return Err(Error::source_unavailable(domain, "every DoH endpoint failed"));
        }
        Ok(merge_candidates(answered))
    }
}

// ---------------------------------------------------------------------------
// Plain DNS
// ---------------------------------------------------------------------------

/// Candidates from A lookups against individual public resolvers.
///
/// Each resolver is queried on its own, since resolvers in different
/// networks hand out different CDN edges.
pub struct ResolverSource {
    resolvers: Vec<(IpAddr, TokioAsyncResolver)>,
}

impl ResolverSource {
    pub fn new(servers: &[IpAddr]) -> Result<Self> {
        Self::with_options(servers, 53, Duration::from_secs(LOOKUP_TIMEOUT_SECS))
    }

    /// Resolvers listening on `port`, each lookup bounded by `timeout`.
    pub fn with_options(servers: &[IpAddr], port: u16, timeout: Duration) -> Result<Self> {
        let mut resolvers = Vec::with_capacity(servers.len());
        for &server in servers {
            let config = ResolverConfig::from_parts(
                None,
                vec![],
                NameServerConfigGroup::from_ips_clear(&[server], port, true),
            );
            let mut opts = ResolverOpts::default();
            opts.timeout = timeout;
            opts.attempts = 1;
            opts.cache_size = 0;
            resolvers.push((server, TokioAsyncResolver::tokio(config, opts)?));
        }
        Ok(Self { resolvers })
    }

    async fn query(resolver: &TokioAsyncResolver, domain: &str) -> Result<Vec<IpAddr>> {
        let fqdn = if domain.ends_with('.') {
            domain.to_string()
        } else {
            format!("{domain}.")
        };
        let response = resolver.lookup(fqdn, RecordType::A).await?;
        Ok(response
            .iter()
            .filter_map(|r| r.as_a().map(|ip| IpAddr::V4(*ip)))
            .collect())
    }
}

#[async_trait]
impl CandidateSource for ResolverSource {
    fn name(&self) -> &str {
        "dns"
    }

    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
        let queries = self.resolvers.iter().map(|(server, resolver)| async move {
            match Self::query(resolver, domain).await {
                Ok(ips) => Some(
                    ips.into_iter()
                        .map(|ip| Candidate::new(ip, format!("dns:{server}")))
                        .collect::<Vec<_>>(),
                ),
                Err(e) => {
                    tracing::debug!("resolver {server} failed for {domain}: {e}");
                    None
                }
            }
        });
        let answered: Vec<_> = futures::future::join_all(queries)
            .await
            .into_iter()
            .flatten()
            .collect();

        if answered.is_empty() {
            return Err(Error::source_unavailable(domain, "every resolver failed"));
        }
        Ok(merge_candidates(answered))
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Remote sources merged in order, with the static table as fallback.
pub struct CompositeSource {
    remotes: Vec<Box<dyn CandidateSource>>,
    fallback: StaticSource,
}

impl CompositeSource {
    #[must_use]
    pub fn new(remotes: Vec<Box<dyn CandidateSource>>, fallback: StaticSource) -> Self {
        Self { remotes, fallback }
    }

    /// Build the sources named by `kinds` from `settings`.
    pub fn from_settings(settings: &Settings, kinds: &[SourceKind]) -> Result<Self> {
        let mut remotes: Vec<Box<dyn CandidateSource>> = Vec::new();
        for kind in kinds {
            let source: Box<dyn CandidateSource> = match kind {
                SourceKind::PingSite => Box::new(PingSiteSource::new(settings.ping_site.clone())?),
                SourceKind::Doh => Box::new(DohSource::new(settings.doh_endpoints.clone())?),
                SourceKind::Dns => Box::new(ResolverSource::new(&settings.dns_resolvers)?),
                SourceKind::Static => Box::new(StaticSource::from_settings(settings)),
            };
            remotes.push(source);
        }
        Ok(Self::new(remotes, StaticSource::from_settings(settings)))
    }
}

#[async_trait]
impl CandidateSource for CompositeSource {
    fn name(&self) -> &str {
        "composite"
    }

    async fn list_candidates(&self, domain: &str) -> Result<Vec<Candidate>> {
        let mut lists = Vec::new();
        for source in &self.remotes {
            match source.list_candidates(domain).await {
                Ok(candidates) => {
                    tracing::debug!("{}: {} candidates for {domain}", source.name(), candidates.len());
                    lists.push(candidates);
                }
                Err(e) => tracing::warn!("{e}"),
            }
        }

        let merged = merge_candidates(lists);
        if !merged.is_empty() {
            return Ok(merged);
        }

        let fallback = self.fallback.lookup(domain);
        if fallback.is_empty() {
            return Err(Error::source_unavailable(
                domain,
                "no remote candidates and no static entry",
            ));
        }
        tracing::info!("using static table for {domain}");
        Ok(fallback)
    }
}
