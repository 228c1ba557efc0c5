//! OS DNS cache invalidation.
//!
//! After the hosts file changes, the resolver cache of the OS may still hand
//! out old answers. The platform-specific flush is hidden behind
//! [`CacheInvalidator`], picked once at startup by [`platform_invalidator`].
//! Failures are reported but never fatal.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Something that can flush the OS resolver cache.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Short description used in logs.
    fn name(&self) -> &str;

    /// Flush the cache.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheInvalidation` when the flush failed.
    async fn invalidate(&self) -> Result<()>;
}

/// Runs a fixed sequence of commands; each must exit successfully.
#[derive(Debug, Clone)]
pub struct CommandInvalidator {
    name: String,
    commands: Vec<Vec<String>>,
}

impl CommandInvalidator {
    pub fn new(name: impl Into<String>, commands: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            commands: commands
                .iter()
                .map(|argv| argv.iter().map(ToString::to_string).collect())
                .collect(),
        }
    }
}

#[async_trait]
impl CacheInvalidator for CommandInvalidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invalidate(&self) -> Result<()> {
        for argv in &self.commands {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let line = argv.join(" ");
            tracing::debug!("running {line}");

            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| Error::CacheInvalidation(format!("{line}: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::CacheInvalidation(format!(
                    "{line}: {} {}",
                    output.status,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }
}

/// Does nothing; used where no flush mechanism is known.
#[derive(Debug, Clone, Default)]
pub struct NoopInvalidator {
    reason: String,
}

impl NoopInvalidator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    fn name(&self) -> &str {
        "none"
    }

    async fn invalidate(&self) -> Result<()> {
        tracing::warn!("DNS cache not flushed: {}", self.reason);
        Ok(())
    }
}

/// Locate `program` on `PATH`.
#[must_use]
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// The invalidator for the running platform.
#[must_use]
pub fn platform_invalidator() -> Box<dyn CacheInvalidator> {
    if cfg!(target_os = "windows") {
        Box::new(CommandInvalidator::new("ipconfig", &[&["ipconfig", "/flushdns"]]))
    } else if cfg!(target_os = "macos") {
        Box::new(CommandInvalidator::new(
            "mDNSResponder",
            &[&["dscacheutil", "-flushcache"], &["killall", "-HUP", "mDNSResponder"]],
        ))
    } else if cfg!(target_os = "linux") {
        if find_in_path("resolvectl").is_some() {
            Box::new(CommandInvalidator::new("resolvectl", &[&["resolvectl", "flush-caches"]]))
        } else if find_in_path("systemd-resolve").is_some() {
            Box::new(CommandInvalidator::new(
                "systemd-resolve",
                &[&["systemd-resolve", "--flush-caches"]],
            ))
        } else {
            Box::new(NoopInvalidator::new("neither resolvectl nor systemd-resolve found"))
        }
    } else {
        Box::new(NoopInvalidator::new("unsupported platform, flush manually"))
    }
}

/// Flush, logging instead of failing. Returns whether the flush succeeded.
pub async fn flush_best_effort(invalidator: &dyn CacheInvalidator) -> bool {
    match invalidator.invalidate().await {
        Ok(()) => {
            tracing::info!("DNS cache flushed ({})", invalidator.name());
            true
        }
        Err(e) => {
            tracing::warn!("{e} (root privileges may be required)");
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_commands() {
        let invalidator = CommandInvalidator::new("true", &[&["true"], &["true"]]);
        invalidator.invalidate().await.unwrap();
        assert!(flush_best_effort(&invalidator).await);
    }

    #[tokio::test]
    async fn test_failing_command_is_reported() {
        let invalidator = CommandInvalidator::new("false", &[&["true"], &["false"]]);
        let err = invalidator.invalidate().await.unwrap_err();
        assert!(matches!(err, Error::CacheInvalidation(ref msg) if msg.starts_with("false")));
        assert!(!flush_best_effort(&invalidator).await);
    }

    #[tokio::test]
    async fn test_missing_program_is_not_fatal() {
        let invalidator = CommandInvalidator::new("missing", &[&["hostpin-no-such-program"]]);
        assert!(!flush_best_effort(&invalidator).await);
    }

    #[tokio::test]
    async fn test_noop() {
        assert!(flush_best_effort(&NoopInvalidator::new("test")).await);
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("hostpin-no-such-program").is_none());
    }

    #[test]
    fn test_platform_invalidator_is_selected() {
        assert!(!platform_invalidator().name().is_empty());
    }
}
