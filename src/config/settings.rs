//! Runtime settings.
//!
//! Every tunable of a run lives here and is passed explicitly to the
//! candidate sources, the probe engine and the optimizer. All fields have
//! defaults, so a partial JSON file only overrides what it names.

use crate::error::{Error, Result};
use crate::probe::types::Thresholds;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where candidate addresses come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Scraped result of the ping-test site
    PingSite,
    /// DNS-over-HTTPS JSON endpoints
    Doh,
    /// Plain DNS against public resolvers
    Dns,
    /// Built-in fallback table
    Static,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PingSite => write!(f, "ping-site"),
            Self::Doh => write!(f, "doh"),
            Self::Dns => write!(f, "dns"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// How connect latency is measured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMethod {
    /// TCP handshake to the probe port
    #[default]
    Tcp,
    /// One ICMP echo (needs raw socket permission)
    Icmp,
}

/// What to do with a domain when no candidate is chosen.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Pin the first address of the static table
    #[default]
    Static,
    /// Leave the domain out of the hosts update
    Skip,
}

/// A well-known address for a domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticEntry {
    pub address: IpAddr,
    #[serde(default)]
    pub region: Option<String>,
}

impl StaticEntry {
    fn v4(octets: [u8; 4], region: &str) -> Self {
        Self {
            address: IpAddr::from(octets),
            region: Some(region.to_string()),
        }
    }
}

/// Per-domain settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainSettings {
    /// Hostname to pin
    pub name: String,
    /// Path fetched for the throughput measurement
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Overrides `probe.measure_throughput` for this domain
    #[serde(default)]
    pub measure_throughput: Option<bool>,
    /// Static fallback table
    #[serde(default)]
    pub fallback: Vec<StaticEntry>,
}

fn default_probe_path() -> String {
    "/".to_string()
}

impl DomainSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe_path: default_probe_path(),
            measure_throughput: None,
            fallback: Vec::new(),
        }
    }
}

/// Ping-test site scraping settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PingSiteSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// A node is kept when its name contains one of these labels
    pub region_labels: Vec<String>,
}

impl Default for PingSiteSettings {
    fn default() -> Self {
        Self {
            url: "https://www.itdog.cn/tc/ping/".to_string(),
            timeout_secs: 20,
            region_labels: ["北京", "上海", "广州", "深圳", "成都"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Probe engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    pub port: u16,
    /// URL scheme of the throughput request ("https" or "http")
    pub scheme: String,
    pub method: LatencyMethod,
    pub connect_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub max_download_bytes: u64,
    pub max_concurrency: usize,
    pub run_timeout_secs: u64,
    pub measure_throughput: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: 443,
            scheme: "https".to_string(),
            method: LatencyMethod::Tcp,
            connect_timeout_ms: 2_000,
            download_timeout_ms: 10_000,
            max_download_bytes: 1024 * 1024,
            max_concurrency: 16,
            run_timeout_secs: 60,
            measure_throughput: true,
        }
    }
}

impl ProbeSettings {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Complete settings of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub domains: Vec<DomainSettings>,
    /// Remote sources, tried in order; the static table is always the last resort
    pub sources: Vec<SourceKind>,
    pub ping_site: PingSiteSettings,
    pub doh_endpoints: Vec<String>,
    pub dns_resolvers: Vec<IpAddr>,
    pub probe: ProbeSettings,
    pub thresholds: Thresholds,
    pub fallback: FallbackPolicy,
    /// Hosts file path (platform default when absent)
    pub hosts_path: Option<PathBuf>,
    /// IP geolocation endpoint used for the report
    pub geo_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            domains: default_domains(),
            sources: vec![SourceKind::PingSite, SourceKind::Doh],
            ping_site: PingSiteSettings::default(),
            doh_endpoints: vec![
                "https://cloudflare-dns.com/dns-query".to_string(),
                "https://dns.alidns.com/resolve".to_string(),
                "https://dns.google/resolve".to_string(),
            ],
            dns_resolvers: vec![
                IpAddr::from([223, 5, 5, 5]),
                IpAddr::from([119, 29, 29, 29]),
                IpAddr::from([8, 8, 8, 8]),
            ],
            probe: ProbeSettings::default(),
            thresholds: Thresholds::default(),
            fallback: FallbackPolicy::Static,
            hosts_path: None,
            geo_url: "http://ip-api.com/json/".to_string(),
        }
    }
}

fn default_domains() -> Vec<DomainSettings> {
    let github = DomainSettings {
        fallback: vec![
            StaticEntry::v4([140, 82, 112, 3], "us-east"),
            StaticEntry::v4([140, 82, 113, 3], "us-east"),
            StaticEntry::v4([140, 82, 114, 4], "us-east"),
            StaticEntry::v4([20, 205, 243, 166], "ap-southeast"),
            StaticEntry::v4([20, 27, 177, 113], "ap-northeast"),
        ],
        ..DomainSettings::new("github.com")
    };

    let raw = DomainSettings {
        probe_path: "/github/gitignore/main/README.md".to_string(),
        fallback: (108..=111)
            .map(|octet| StaticEntry::v4([185, 199, octet, 133], "anycast"))
            .collect(),
        ..DomainSettings::new("raw.githubusercontent.com")
    };

    let fastly = DomainSettings {
        measure_throughput: Some(false),
        fallback: vec![
            StaticEntry::v4([151, 101, 1, 194], "anycast"),
            StaticEntry::v4([199, 232, 69, 194], "anycast"),
        ],
        ..DomainSettings::new("github.global.ssl.fastly.net")
    };

    let assets = DomainSettings {
        measure_throughput: Some(false),
        fallback: (108..=111)
            .map(|octet| StaticEntry::v4([185, 199, octet, 153], "anycast"))
            .collect(),
        ..DomainSettings::new("assets-cdn.github.com")
    };

    vec![github, raw, fastly, assets]
}

impl Settings {
    /// Look up a domain's settings (ASCII case-insensitive).
    #[must_use]
    pub fn domain(&self, name: &str) -> Option<&DomainSettings> {
        self.domains
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Settings for `name`, or defaults when the domain is not configured.
    #[must_use]
    pub fn domain_or_default(&self, name: &str) -> DomainSettings {
        self.domain(name)
            .cloned()
            .unwrap_or_else(|| DomainSettings::new(name))
    }

    #[must_use]
    pub fn domain_names(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }

    /// Whether throughput is measured for `domain`.
    #[must_use]
    pub fn measures_throughput(&self, domain: &str) -> bool {
        self.domain(domain)
            .and_then(|d| d.measure_throughput)
            .unwrap_or(self.probe.measure_throughput)
    }

    /// Thresholds in effect for `domain`.
    ///
    /// The throughput floor is dropped when throughput is not measured.
    #[must_use]
    pub fn thresholds_for(&self, domain: &str) -> Thresholds {
        if self.measures_throughput(domain) {
            self.thresholds
        } else {
            Thresholds::latency_only(self.thresholds.max_latency_ms)
        }
    }

    /// Hosts file to update.
    #[must_use]
    pub fn hosts_path(&self) -> PathBuf {
        self.hosts_path
            .clone()
            .unwrap_or_else(crate::hosts::default_hosts_path)
    }

    /// Check the settings for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(Error::config("no domains configured"));
        }
        if let Some(d) = self.domains.iter().find(|d| d.name.trim().is_empty()) {
            return Err(Error::config(format!("empty domain name ({d:?})")));
        }
        if self.probe.port == 0 {
            return Err(Error::config("probe.port must not be 0"));
        }
        if self.probe.max_concurrency == 0 {
            return Err(Error::config("probe.max_concurrency must be at least 1"));
        }
        if !matches!(self.probe.scheme.as_str(), "http" | "https") {
            return Err(Error::config(format!(
                "probe.scheme must be http or https, got {}",
                self.probe.scheme
            )));
        }
        if self.thresholds.max_latency_ms <= 0.0 {
            return Err(Error::config("thresholds.max_latency_ms must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.domains.len(), 4);
        assert_eq!(settings.probe.port, 443);
        assert_eq!(settings.thresholds.max_latency_ms, 500.0);
        assert!(settings
            .domain("GitHub.com")
            .is_some_and(|d| d.fallback.len() == 5));
    }

    #[test]
    fn test_every_default_domain_has_a_static_table() {
        for domain in Settings::default().domains {
            assert!(!domain.fallback.is_empty(), "{} has no fallback", domain.name);
            assert!(domain.fallback.iter().all(|e| e.address.is_ipv4()));
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "probe": { "port": 8443 }, "fallback": "skip" }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.probe.port, 8443);
        assert_eq!(settings.probe.connect_timeout_ms, 2_000);
        assert_eq!(settings.fallback, FallbackPolicy::Skip);
        assert_eq!(settings.domains.len(), 4);
    }

    #[test]
    fn test_per_domain_throughput_override() {
        let settings = Settings::default();
        assert!(settings.measures_throughput("github.com"));
        assert!(!settings.measures_throughput("assets-cdn.github.com"));
        assert_eq!(
            settings.thresholds_for("assets-cdn.github.com").min_throughput_bps,
            None
        );
        assert!(settings.thresholds_for("example.org").min_throughput_bps.is_some());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.probe.scheme = "ftp".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.probe.max_concurrency = 0;
        assert!(settings.validate().is_err());

        let settings = Settings {
            domains: vec![],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
