//! Configuration management for imagesauce.
//!
//! Reads configuration from environment variables. `main` loads a `.env`
//! file first (via dotenvy), so values there act as defaults that the real
//! environment overrides.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::process::{Escalation, HostRunner};

/// Default delay after `umount` so the loop device is released.
pub const DEFAULT_UNMOUNT_SETTLE: Duration = Duration::from_secs(1);

/// Host resolver configuration copied into the image during customization.
pub const DEFAULT_HOST_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Default customization delegate program.
pub const DEFAULT_CHIMG: &str = "chimg";

/// Default SBOM generator program.
pub const DEFAULT_SBOM_TOOL: &str = "cpc-sbom";

/// imagesauce configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// How privileged commands are escalated (IMAGESAUCE_ESCALATION)
    pub escalation: Escalation,
    /// Limit for every external command; None waits forever (IMAGESAUCE_COMMAND_TIMEOUT)
    pub command_timeout: Option<Duration>,
    /// Pause after unmounting (IMAGESAUCE_UNMOUNT_SETTLE_MS)
    pub unmount_settle: Duration,
    /// Resolver file injected into the mounted root (IMAGESAUCE_HOST_RESOLV_CONF)
    pub host_resolv_conf: PathBuf,
    /// Customization delegate binary (IMAGESAUCE_CHIMG)
    pub chimg_program: String,
    /// SBOM generator binary (IMAGESAUCE_SBOM_TOOL)
    pub sbom_program: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            escalation: Escalation::Sudo,
            command_timeout: None,
            unmount_settle: DEFAULT_UNMOUNT_SETTLE,
            host_resolv_conf: PathBuf::from(DEFAULT_HOST_RESOLV_CONF),
            chimg_program: DEFAULT_CHIMG.to_string(),
            sbom_program: DEFAULT_SBOM_TOOL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("IMAGESAUCE_ESCALATION") {
            config.escalation = Escalation::parse(&value);
        }

        if let Some(value) = lookup("IMAGESAUCE_COMMAND_TIMEOUT") {
            let secs: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("IMAGESAUCE_COMMAND_TIMEOUT is not a number: {}", value))?;
            // 0 disables the limit
            config.command_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(value) = lookup("IMAGESAUCE_UNMOUNT_SETTLE_MS") {
            let ms: u64 = value.trim().parse().with_context(|| {
                format!("IMAGESAUCE_UNMOUNT_SETTLE_MS is not a number: {}", value)
            })?;
            config.unmount_settle = Duration::from_millis(ms);
        }

        if let Some(value) = lookup("IMAGESAUCE_HOST_RESOLV_CONF") {
            config.host_resolv_conf = PathBuf::from(value);
        }

        if let Some(value) = lookup("IMAGESAUCE_CHIMG") {
            config.chimg_program = value;
        }

        if let Some(value) = lookup("IMAGESAUCE_SBOM_TOOL") {
            config.sbom_program = value;
        }

        Ok(config)
    }

    /// Command runner honoring the escalation and timeout settings.
    pub fn runner(&self) -> Result<HostRunner> {
        HostRunner::new(self.escalation.clone(), self.command_timeout)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  IMAGESAUCE_ESCALATION: {:?}", self.escalation);
        match self.command_timeout {
            Some(timeout) => println!("  IMAGESAUCE_COMMAND_TIMEOUT: {}s", timeout.as_secs()),
            None => println!("  IMAGESAUCE_COMMAND_TIMEOUT: none"),
        }
        println!(
            "  IMAGESAUCE_UNMOUNT_SETTLE_MS: {}",
            self.unmount_settle.as_millis()
        );
        println!(
            "  IMAGESAUCE_HOST_RESOLV_CONF: {}",
            self.host_resolv_conf.display()
        );
        println!("  IMAGESAUCE_CHIMG: {}", self.chimg_program);
        println!("  IMAGESAUCE_SBOM_TOOL: {}", self.sbom_program);
    }
}
