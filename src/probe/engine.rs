//! Candidate probing.
//!
//! Every candidate gets a connect-latency measurement (TCP handshake, or
//! ICMP echo when configured). Reachable candidates then get a bounded
//! download through an HTTP client whose resolution of the domain is
//! pinned to that one address. Probes run concurrently with a bounded
//! fan-out and a total join; a run deadline cancels whatever is still
//! outstanding, which is then reported as unreachable.

#![allow(clippy::missing_errors_doc)]

use crate::config::settings::{LatencyMethod, ProbeSettings, Settings};
use crate::error::{Error, Result};
use crate::probe::types::{Candidate, ProbeResult};
use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use surge_ping::{PingIdentifier, PingSequence};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// ICMP payload size in bytes.
const ICMP_PAYLOAD_SIZE: usize = 32;

/// What is being probed: the domain the candidates claim to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Hostname used for the pinned throughput request
    pub domain: String,
    /// Path fetched for the throughput measurement
    pub path: String,
    /// Whether the throughput step runs at all
    pub measure_throughput: bool,
}

impl ProbeTarget {
    pub fn new(domain: impl Into<String>, path: impl Into<String>, measure_throughput: bool) -> Self {
        Self {
            domain: domain.into(),
            path: path.into(),
            measure_throughput,
        }
    }

    /// Target for `domain` as configured in `settings`.
    #[must_use]
    pub fn from_settings(settings: &Settings, domain: &str) -> Self {
        let domain_settings = settings.domain_or_default(domain);
        Self::new(
            domain,
            domain_settings.probe_path,
            settings.measures_throughput(domain),
        )
    }
}

/// Probe engine.
///
/// # Example
///
/// ```ignore
/// let engine = ProbeEngine::new(settings.probe.clone())?;
/// let target = ProbeTarget::from_settings(&settings, "github.com");
/// let results = engine.probe_all(&target, &candidates).await;
/// assert_eq!(results.len(), candidates.len());
/// ```
pub struct ProbeEngine {
    settings: ProbeSettings,
    icmp: Option<surge_ping::Client>,
}

impl ProbeEngine {
    /// Create a probe engine.
    ///
    /// # Errors
    ///
    /// Returns an error if ICMP probing is configured and the ICMP socket
    /// cannot be opened (usually missing permissions).
    pub fn new(settings: ProbeSettings) -> Result<Self> {
        let icmp = match settings.method {
            LatencyMethod::Tcp => None,
            LatencyMethod::Icmp => Some(
                surge_ping::Client::new(&surge_ping::Config::default())
                    .map_err(|e| Error::network(format!("cannot open ICMP socket: {e}")))?,
            ),
        };
        Ok(Self { settings, icmp })
    }

    #[must_use]
    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probe every candidate and return one result per candidate, in input order.
    ///
    /// Waits for all probes. Probes still running when the run deadline
    /// passes are cancelled and reported as unreachable.
    pub async fn probe_all(&self, target: &ProbeTarget, candidates: &[Candidate]) -> Vec<ProbeResult> {
        let deadline = tokio::time::Instant::now() + self.settings.run_timeout();
        let concurrency = self.settings.max_concurrency.max(1);

        stream::iter(candidates.iter().cloned())
            .map(|candidate| async move {
                let outcome = tokio::time::timeout_at(deadline, self.probe(target, &candidate)).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!("{} cancelled at run deadline", candidate.address);
                        ProbeResult::unreachable(candidate, "run deadline exceeded")
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Probe a single candidate.
    pub async fn probe(&self, target: &ProbeTarget, candidate: &Candidate) -> ProbeResult {
        let address = candidate.address;

        let latency_ms = match self.measure_latency(address).await {
            Ok(latency) => latency,
            Err(e) => {
                tracing::debug!("{address} unreachable: {e}");
                return ProbeResult::unreachable(candidate.clone(), e.to_string());
            }
        };

        if !target.measure_throughput {
            tracing::debug!("{address}: {latency_ms:.1} ms");
            return ProbeResult::reachable(candidate.clone(), latency_ms, None);
        }

        match self.measure_throughput(target, address).await {
            Ok(bps) => {
                tracing::debug!("{address}: {latency_ms:.1} ms, {:.1} KiB/s", bps / 1024.0);
                ProbeResult::reachable(candidate.clone(), latency_ms, Some(bps))
            }
            Err(e) => {
                tracing::debug!("{address}: {latency_ms:.1} ms, throughput failed: {e}");
                ProbeResult {
                    error: Some(format!("throughput: {e}")),
                    ..ProbeResult::reachable(candidate.clone(), latency_ms, None)
                }
            }
        }
    }

    /// Connect latency in milliseconds.
    async fn measure_latency(&self, address: IpAddr) -> Result<f64> {
        match &self.icmp {
            Some(client) => self.icmp_latency(client, address).await,
            None => self.tcp_latency(address).await,
        }
    }

    async fn tcp_latency(&self, address: IpAddr) -> Result<f64> {
        let socket = SocketAddr::new(address, self.settings.port);
        let start = Instant::now();

        match timeout(self.settings.connect_timeout(), TcpStream::connect(socket)).await {
            Ok(Ok(stream)) => {
                let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                drop(stream);
                Ok(elapsed)
            }
            Ok(Err(e)) => Err(Error::network(format!("connect {socket}: {e}"))),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn icmp_latency(&self, client: &surge_ping::Client, address: IpAddr) -> Result<f64> {
        // The shared client is bound to an IPv4 socket.
        if address.is_ipv6() {
            return Err(Error::network("ICMP probing does not support IPv6"));
        }

        let payload = [0u8; ICMP_PAYLOAD_SIZE];
        let mut pinger = client.pinger(address, PingIdentifier(rand_id())).await;
        pinger.timeout(self.settings.connect_timeout());

        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_packet, rtt)) => Ok(rtt.as_secs_f64() * 1000.0),
            Err(e) => Err(Error::network(format!("ping {address}: {e}"))),
        }
    }

    /// Download throughput in bytes per second through a connection pinned to `address`.
    async fn measure_throughput(&self, target: &ProbeTarget, address: IpAddr) -> Result<f64> {
        let port = self.settings.port;
        let client = Client::builder()
            .resolve(&target.domain, SocketAddr::new(address, port))
            .timeout(self.settings.download_timeout())
            .redirect(Policy::none())
            .no_proxy()
            .build()?;

        let path = if target.path.starts_with('/') {
            target.path.clone()
        } else {
            format!("/{}", target.path)
        };
        let url = format!("{}://{}:{port}{path}", self.settings.scheme, target.domain);

        let start = Instant::now();
        let mut response = client.get(&url).send().await?;
        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            if received >= self.settings.max_download_bytes {
                break;
            }
        }
        let secs = start.elapsed().as_secs_f64();

        if received == 0 {
            return Err(Error::network(format!(
                "{url} returned an empty body ({})",
                response.status()
            )));
        }
        Ok(received as f64 / secs.max(f64::EPSILON))
    }
}

/// Generate a ping identifier.
fn rand_id() -> u16 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 65536) as u16
}
