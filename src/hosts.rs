//! Hosts file maintenance.
//!
//! Rewrites the entries of managed hostnames and leaves everything else
//! alone: comments, blank lines, malformed lines and unrelated entries are
//! passed through byte for byte. The new content is assembled completely
//! before anything is written, and a file that needs no change is never
//! rewritten.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Platform hosts file location.
#[must_use]
pub fn default_hosts_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// What happened to one managed hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// An existing entry now points at a new address
    Updated,
    /// The entry already pointed at the address
    Unchanged,
    /// No entry existed; one was appended
    Added,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostsChange {
    pub domain: String,
    pub kind: ChangeKind,
    pub previous: Option<IpAddr>,
    pub address: IpAddr,
}

/// Result of applying a mapping to hosts file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsUpdate {
    pub content: String,
    pub changes: Vec<HostsChange>,
}

impl HostsUpdate {
    /// Whether the content differs from the input.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.changes.iter().any(|c| c.kind != ChangeKind::Unchanged)
    }
}

/// A parsed `address host [host...] [# comment]` line.
struct Entry<'a> {
    address: IpAddr,
    hosts: Vec<&'a str>,
    comment: Option<&'a str>,
}

fn parse_entry(line: &str) -> Option<Entry<'_>> {
    let (body, comment) = match line.find('#') {
        Some(i) => (&line[..i], Some(&line[i..])),
        None => (line, None),
    };
    let mut fields = body.split_whitespace();
    let address = fields.next()?.parse().ok()?;
    let hosts: Vec<&str> = fields.collect();
    if hosts.is_empty() {
        return None;
    }
    Some(Entry {
        address,
        hosts,
        comment,
    })
}

fn format_entry(address: IpAddr, hosts: &[&str], comment: Option<&str>) -> String {
    let mut line = format!("{address} {}", hosts.join(" "));
    if let Some(comment) = comment {
        line.push(' ');
        line.push_str(comment);
    }
    line
}

fn target_of(mapping: &[(String, IpAddr)], host: &str) -> Option<IpAddr> {
    mapping
        .iter()
        .find(|(domain, _)| domain.eq_ignore_ascii_case(host))
        .map(|(_, address)| *address)
}

/// Apply `mapping` (domain → address) to hosts file `content`.
///
/// A managed hostname sitting on a line with a different address is moved
/// to its own `<address> <hostname>` line right where it was; the rest of
/// the original line is kept. Managed hostnames without any entry are
/// appended at the end. Line endings and the presence of a final newline
/// follow the input.
#[must_use]
pub fn apply(content: &str, mapping: &[(String, IpAddr)]) -> HostsUpdate {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = content.is_empty() || content.ends_with('\n');
    let mut lines: Vec<String> = Vec::new();
    let mut changes = Vec::new();
    let mut present: HashSet<String> = HashSet::new();

    for line in content.lines() {
        let Some(entry) = parse_entry(line) else {
            lines.push(line.to_string());
            continue;
        };

        let mut keep: Vec<&str> = Vec::new();
        let mut moved: Vec<(IpAddr, Vec<&str>)> = Vec::new();

        for &host in &entry.hosts {
            let Some(address) = target_of(mapping, host) else {
                keep.push(host);
                continue;
            };
            present.insert(host.to_ascii_lowercase());

            if address == entry.address {
                keep.push(host);
                changes.push(HostsChange {
                    domain: host.to_string(),
                    kind: ChangeKind::Unchanged,
                    previous: Some(entry.address),
                    address,
                });
                continue;
            }

            changes.push(HostsChange {
                domain: host.to_string(),
                kind: ChangeKind::Updated,
                previous: Some(entry.address),
                address,
            });
            match moved.iter_mut().find(|(a, _)| *a == address) {
                Some((_, hosts)) => hosts.push(host),
                None => moved.push((address, vec![host])),
            }
        }

        if moved.is_empty() {
            lines.push(line.to_string());
            continue;
        }
        // The comment stays with the original line, or follows the first
        // moved hostname when nothing else is left on it.
        let mut comment = entry.comment;
        if !keep.is_empty() {
            lines.push(format_entry(entry.address, &keep, comment.take()));
        }
        for (address, hosts) in &moved {
            lines.push(format_entry(*address, hosts, comment.take()));
        }
    }

    for (domain, address) in mapping {
        if present.insert(domain.to_ascii_lowercase()) {
            lines.push(format!("{address} {domain}"));
            changes.push(HostsChange {
                domain: domain.clone(),
                kind: ChangeKind::Added,
                previous: None,
                address: *address,
            });
        }
    }

    let update = HostsUpdate {
        content: String::new(),
        changes,
    };
    if !update.is_modified() {
        return HostsUpdate {
            content: content.to_string(),
            ..update
        };
    }

    let mut rendered = lines.join(newline);
    if trailing_newline {
        rendered.push_str(newline);
    }
    HostsUpdate {
        content: rendered,
        ..update
    }
}

/// Address currently pinned for `domain` (first matching entry line).
#[must_use]
pub fn lookup(content: &str, domain: &str) -> Option<IpAddr> {
    content.lines().filter_map(parse_entry).find_map(|entry| {
        entry
            .hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(domain))
            .then_some(entry.address)
    })
}

/// Options for [`HostsFile::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Compute and log the changes without writing
    pub dry_run: bool,
    /// Copy the file to `<name>.bak.<unix-ts>` before writing
    pub backup: bool,
}

/// A hosts file on disk.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file; a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::SinkWrite` when the file exists but cannot be read.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::sink_write(&self.path, e)),
        }
    }

    /// Address currently pinned for `domain`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn lookup(&self, domain: &str) -> Result<Option<IpAddr>> {
        Ok(lookup(&self.read()?, domain))
    }

    /// Apply `mapping` and write the result if anything changed.
    ///
    /// # Errors
    ///
    /// Returns `Error::SinkWrite` when the file cannot be read, backed up or
    /// written. The file is left untouched in that case.
    pub fn update(&self, mapping: &[(String, IpAddr)], options: UpdateOptions) -> Result<HostsUpdate> {
        let content = self.read()?;
        let update = apply(&content, mapping);

        for change in &update.changes {
            match (change.kind, change.previous) {
                (ChangeKind::Updated, Some(previous)) => {
                    tracing::info!("updated: {} {} -> {}", change.domain, previous, change.address);
                }
                (ChangeKind::Added, _) => {
                    tracing::info!("added: {} -> {}", change.domain, change.address);
                }
                _ => tracing::info!("unchanged: {} already at {}", change.domain, change.address),
            }
        }

        if !update.is_modified() {
            tracing::debug!("{} is up to date", self.path.display());
            return Ok(update);
        }
        if options.dry_run {
            tracing::info!("dry run: {} not written", self.path.display());
            return Ok(update);
        }

        if options.backup && self.path.exists() {
            let backup = self.backup()?;
            tracing::info!("backup written to {}", backup.display());
        }
        self.write(&update.content)?;
        Ok(update)
    }

    /// Copy the file to `<name>.bak.<unix-ts>` next to it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SinkWrite` when the copy fails.
    pub fn backup(&self) -> Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let backup = self
            .path
            .with_file_name(format!("{file_name}.bak.{}", chrono::Utc::now().timestamp()));
        fs::copy(&self.path, &backup).map_err(|e| Error::sink_write(&backup, e))?;
        Ok(backup)
    }

    /// Replace the file content.
    ///
    /// Writes a temporary file next to the target and renames it over the
    /// target, or in place when the rename is refused (bind-mounted files).
    fn write(&self, content: &str) -> Result<()> {
        match self.write_via_rename(content) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!("rename into {} failed ({e}), writing in place", self.path.display());
                fs::write(&self.path, content).map_err(|e| Error::sink_write(&self.path, e))
            }
        }
    }

    fn write_via_rename(&self, content: &str) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
