//! hostpin - pin the fastest GitHub addresses in the hosts file
//!
//! Binary entry point for the hostpin CLI application.

#![warn(clippy::all, warnings)]
#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use hostpin::cache::{self, platform_invalidator};
use hostpin::cli::{self, Commands, OutputFormat};
use hostpin::config::{ConfigLoader, FallbackPolicy, Settings, SourceKind};
use hostpin::hosts::{HostsFile, UpdateOptions};
use hostpin::optimizer::{self, DomainOutcome, Optimizer};
use hostpin::probe::{select_best, Candidate, ProbeResult, ProbeSummary, ProbeTarget};
use hostpin::report::{self, Report, ReportEntry};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set up logging based on verbosity level.
///
/// Logs go to stderr so that JSON/CSV output on stdout stays clean.
fn setup_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().without_time().with_writer(std::io::stderr))
        .init();
}

fn format_latency(latency_ms: Option<f64>) -> String {
    latency_ms.map_or_else(|| "timeout".to_string(), |l| format!("{l:.1}ms"))
}

fn format_throughput(throughput_bps: Option<f64>) -> String {
    throughput_bps.map_or_else(|| "-".to_string(), |t| format!("{:.1}KiB/s", t / 1024.0))
}

fn sources_override(sources: &[SourceKind]) -> Option<&[SourceKind]> {
    (!sources.is_empty()).then_some(sources)
}

/// Print probe results in the requested format.
fn print_results(results: &[ProbeResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(',');
            println!("#Idx{sep}IP{sep}Source{sep}Region{sep}Latency(ms){sep}Throughput(B/s){sep}Error");
            for (idx, r) in results.iter().enumerate() {
                println!(
                    "{}{sep}{}{sep}{}{sep}{}{sep}{:.1}{sep}{:.0}{sep}{}",
                    idx + 1,
                    r.candidate.address,
                    r.candidate.source,
                    r.candidate.region.as_deref().unwrap_or(""),
                    r.latency_ms.unwrap_or(-1.0),
                    r.throughput_bps.unwrap_or(-1.0),
                    r.error.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Table => {
            println!(
                "{:<4} {:<40} {:<14} {:<10} {:<12} {}",
                "#", "IP", "Source", "Region", "Latency", "Throughput"
            );
            println!("{}", "-".repeat(96));
            for (idx, r) in results.iter().enumerate() {
                let status = if r.is_reachable() { "✓" } else { "✗" };
                println!(
                    "{:<4} {:<40} {:<14} {:<10} {:<12} {}",
                    format!("{status}{}", idx + 1),
                    r.candidate.address,
                    r.candidate.source,
                    r.candidate.region.as_deref().unwrap_or("-"),
                    format_latency(r.latency_ms),
                    format_throughput(r.throughput_bps)
                );
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &ProbeSummary) {
    println!(
        "\nReachable: {}/{} ({:.0}%), throughput measured: {}",
        summary.reachable,
        summary.total,
        summary.reachable_rate(),
        summary.measured
    );
    if let (Some(min), Some(avg), Some(max)) =
        (summary.min_latency, summary.avg_latency, summary.max_latency)
    {
        println!("Latency: min {min:.1}ms / avg {avg:.1}ms / max {max:.1}ms");
    }
}

/// Print per-domain outcomes of a run.
fn print_outcomes(outcomes: &[DomainOutcome], format: OutputFormat) -> Result<()> {
    let entries: Vec<ReportEntry> = outcomes.iter().map(ReportEntry::from_outcome).collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(',');
            println!("Domain{sep}Address{sep}Latency(ms){sep}Throughput(B/s){sep}Fallback");
            for e in &entries {
                println!(
                    "{}{sep}{}{sep}{:.1}{sep}{:.0}{sep}{}",
                    e.domain,
                    e.address,
                    e.latency_ms.unwrap_or(-1.0),
                    e.throughput_bps.unwrap_or(-1.0),
                    e.fallback
                );
            }
        }
        OutputFormat::Table => {
            println!(
                "\n{:<32} {:<40} {:<10} {:<14} {}",
                "Domain", "Address", "Latency", "Throughput", "Note"
            );
            println!("{}", "-".repeat(110));
            for e in &entries {
                let note = if e.fallback {
                    "fallback".to_string()
                } else {
                    e.source.clone().unwrap_or_default()
                };
                println!(
                    "{:<32} {:<40} {:<10} {:<14} {}",
                    e.domain,
                    e.address,
                    e.latency_ms.map_or_else(|| "-".to_string(), |l| format!("{l:.1}ms")),
                    format_throughput(e.throughput_bps),
                    note
                );
            }
        }
    }
    Ok(())
}

/// Arguments of the `run` command.
struct RunArgs {
    domains: Vec<String>,
    hosts: Option<PathBuf>,
    dry_run: bool,
    backup: bool,
    no_flush: bool,
    report: Option<PathBuf>,
    geo: bool,
    sources: Vec<SourceKind>,
    skip_fallback: bool,
}

/// Optimize domains, update the hosts file, flush the cache and report.
async fn run_pin(mut settings: Settings, args: RunArgs, format: OutputFormat) -> Result<()> {
    if args.skip_fallback {
        settings.fallback = FallbackPolicy::Skip;
    }
    if let Some(path) = args.hosts {
        settings.hosts_path = Some(path);
    }
    let domains = if args.domains.is_empty() {
        settings.domain_names()
    } else {
        args.domains
    };
    let hosts = HostsFile::new(settings.hosts_path());
    let geo_url = settings.geo_url.clone();

    let optimizer = Optimizer::from_settings(settings, sources_override(&args.sources))
        .context("failed to set up candidate sources")?;
    let outcomes = optimizer.optimize_all(&domains).await;
    print_outcomes(&outcomes, format)?;

    let mapping = optimizer::mapping(&outcomes);
    if mapping.is_empty() {
        tracing::warn!("no address to pin, hosts file left alone");
    } else {
        let update = hosts
            .update(
                &mapping,
                UpdateOptions {
                    dry_run: args.dry_run,
                    backup: args.backup,
                },
            )
            .with_context(|| format!("failed to update {}", hosts.path().display()))?;

        if update.is_modified() && !args.dry_run && !args.no_flush {
            cache::flush_best_effort(platform_invalidator().as_ref()).await;
        }
    }

    if let Some(path) = args.report {
        let region = if args.geo {
            report::lookup_region(&geo_url).await
        } else {
            None
        };
        Report::new(region, &outcomes)
            .write(&path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!("report written to {}", path.display());
    }

    Ok(())
}

/// Probe one domain and print every result plus the selection.
async fn run_probe(
    settings: Settings,
    domain: String,
    ips: Vec<String>,
    sources: &[SourceKind],
    sort_by_latency: bool,
    format: OutputFormat,
) -> Result<()> {
    let optimizer = Optimizer::from_settings(settings, sources_override(sources))
        .context("failed to set up candidate sources")?;

    let candidates = if ips.is_empty() {
        optimizer
            .source()
            .list_candidates(&domain)
            .await
            .with_context(|| format!("no candidates for {domain}"))?
    } else {
        ConfigLoader::from_args(ips).context("invalid --ip value")?
    };

    tracing::info!("probing {} candidates for {domain}", candidates.len());
    let target = ProbeTarget::from_settings(optimizer.settings(), &domain);
    let results = optimizer.engine().probe_all(&target, &candidates).await;
    let selection = select_best(&results, &optimizer.settings().thresholds_for(&domain));

    let mut shown = results.clone();
    if sort_by_latency {
        shown.sort_by(|a, b| match (a.latency_ms, b.latency_ms) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }
    print_results(&shown, format)?;

    if format == OutputFormat::Table {
        print_summary(&ProbeSummary::from_results(&results));
        match (&selection.chosen, &selection.metrics) {
            (Some(chosen), Some(metrics)) => println!(
                "Best: {chosen} {} {} ({}/{} valid)",
                format_latency(metrics.latency_ms),
                format_throughput(metrics.throughput_bps),
                selection.valid,
                selection.considered
            ),
            _ => println!("Best: none ({} reachable addresses, none valid)", selection.considered),
        }
    }
    Ok(())
}

/// List candidates for a domain.
async fn run_candidates(
    settings: Settings,
    domain: String,
    sources: &[SourceKind],
    format: OutputFormat,
) -> Result<()> {
    let optimizer = Optimizer::from_settings(settings, sources_override(sources))
        .context("failed to set up candidate sources")?;
    let candidates: Vec<Candidate> = optimizer
        .source()
        .list_candidates(&domain)
        .await
        .with_context(|| format!("no candidates for {domain}"))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&candidates)?),
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(',');
            println!("#Idx{sep}IP{sep}Source{sep}Region");
            for (idx, c) in candidates.iter().enumerate() {
                let region = c.region.as_deref().unwrap_or("");
                println!("{}{sep}{}{sep}{}{sep}{region}", idx + 1, c.address, c.source);
            }
        }
        OutputFormat::Table => {
            println!("Candidates for {domain} ({}):\n", candidates.len());
            println!("{:<4} {:<40} {:<14} {}", "#", "IP", "Source", "Region");
            println!("{}", "-".repeat(70));
            for (idx, c) in candidates.iter().enumerate() {
                println!(
                    "{:<4} {:<40} {:<14} {}",
                    idx + 1,
                    c.address,
                    c.source,
                    c.region.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

/// Show what the hosts file pins for each configured domain.
fn run_status(settings: &Settings, hosts: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let hosts = HostsFile::new(hosts.unwrap_or_else(|| settings.hosts_path()));
    let content = hosts
        .read()
        .with_context(|| format!("failed to read {}", hosts.path().display()))?;

    let pinned: Vec<(String, Option<std::net::IpAddr>)> = settings
        .domain_names()
        .into_iter()
        .map(|domain| {
            let address = hostpin::hosts::lookup(&content, &domain);
            (domain, address)
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let value: Vec<_> = pinned
                .iter()
                .map(|(domain, address)| serde_json::json!({ "domain": domain, "address": address }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Csv | OutputFormat::Tsv => {
            let sep = format.separator().unwrap_or(',');
            println!("Domain{sep}Address");
            for (domain, address) in &pinned {
                let address = address.map(|a| a.to_string()).unwrap_or_default();
                println!("{domain}{sep}{address}");
            }
        }
        OutputFormat::Table => {
            println!("Hosts file: {}\n", hosts.path().display());
            println!("{:<32} {}", "Domain", "Pinned");
            println!("{}", "-".repeat(60));
            for (domain, address) in &pinned {
                let address = address.map_or_else(|| "-".to_string(), |a| a.to_string());
                println!("{domain:<32} {address}");
            }
        }
    }
    Ok(())
}

/// Main entry point for the hostpin CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("hostpin crashed: {panic_info}");
    }));

    let (cli, verbose) = cli::parse_verbose();
    setup_logging(verbose, cli.quiet);

    tracing::debug!("hostpin starting...");

    if let Some(Commands::Completions { shell }) = cli.command {
        cli::print_completions(shell);
        return Ok(());
    }

    let settings = ConfigLoader::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Some(Commands::Run {
            domains,
            hosts,
            dry_run,
            backup,
            no_flush,
            report,
            geo,
            sources,
            skip_fallback,
        }) => {
            let args = RunArgs {
                domains,
                hosts,
                dry_run,
                backup,
                no_flush,
                report,
                geo,
                sources,
                skip_fallback,
            };
            run_pin(settings, args, cli.format).await?;
        }

        Some(Commands::Probe {
            domain,
            ips,
            sources,
            sort_by_latency,
        }) => {
            run_probe(settings, domain, ips, &sources, sort_by_latency, cli.format).await?;
        }

        Some(Commands::Candidates { domain, sources }) => {
            run_candidates(settings, domain, &sources, cli.format).await?;
        }

        Some(Commands::Flush) => {
            let invalidator = platform_invalidator();
            invalidator
                .invalidate()
                .await
                .with_context(|| format!("{} failed (root privileges may be required)", invalidator.name()))?;
            println!("DNS cache flushed ({})", invalidator.name());
        }

        Some(Commands::Config { output }) => match output {
            Some(path) => {
                ConfigLoader::export(&settings, &path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Settings exported to: {}", path.display());
            }
            None => println!("{}", serde_json::to_string_pretty(&settings)?),
        },

        Some(Commands::Status { hosts }) => run_status(&settings, hosts, cli.format)?,

        Some(Commands::Completions { .. }) => {}

        None => run_status(&settings, None, cli.format)?,
    }

    Ok(())
}
