//! Seeded snaps of the mounted root.
//!
//! Snaps are not in the dpkg database; on images that preseed them they are
//! described by `/var/lib/snapd/seed/seed.yaml`:
//!
//! ```yaml
//! snaps:
//!   - name: core22
//!     channel: latest/stable
//!     file: core22_1380.snap
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Location of the seed description inside a root filesystem.
pub const SEED_YAML: &str = "var/lib/snapd/seed/seed.yaml";

/// Adds the root's snaps to an existing manifest.
pub trait SnapInventory {
    fn append(&self, root: &Path, manifest: &Path) -> Result<()>;
}

/// Reads the snapd seed of the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedInventory;

impl SnapInventory for SeedInventory {
    fn append(&self, root: &Path, manifest: &Path) -> Result<()> {
        let seed_path = root.join(SEED_YAML);
        if !seed_path.exists() {
            info!("No snap seed at {}, no snaps to add", seed_path.display());
            return Ok(());
        }

        let content = fs::read_to_string(&seed_path)
            .with_context(|| format!("Failed to read {}", seed_path.display()))?;
        let snaps = parse_seed(&content)
            .with_context(|| format!("Failed to parse {}", seed_path.display()))?;

        let mut out = OpenOptions::new()
            .append(true)
            .create(true)
            .open(manifest)
            .with_context(|| format!("Failed to open {}", manifest.display()))?;
        for snap in &snaps {
            debug!("Seeded snap {} rev {}", snap.name, snap.revision);
            writeln!(out, "{}", snap.manifest_line())?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Seed {
    #[serde(default)]
    snaps: Vec<SeedSnap>,
}

#[derive(Debug, Deserialize)]
struct SeedSnap {
    name: String,
    #[serde(default)]
    channel: Option<String>,
    file: String,
}

/// One seeded snap as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapEntry {
    pub name: String,
    pub channel: String,
    pub revision: String,
}

impl SnapEntry {
    /// `snap:<name>\t<channel>\t<revision>`
    pub fn manifest_line(&self) -> String {
        format!("snap:{}\t{}\t{}", self.name, self.channel, self.revision)
    }
}

/// Parse a seed.yaml document.
pub fn parse_seed(content: &str) -> Result<Vec<SnapEntry>> {
    let seed: Seed = serde_yaml::from_str(content)?;
    Ok(seed
        .snaps
        .into_iter()
        .map(|snap| SnapEntry {
            revision: revision_from_file(&snap.file),
            channel: snap.channel.unwrap_or_else(|| "stable".to_string()),
            name: snap.name,
        })
        .collect())
}

/// `core22_1380.snap` -> `1380`
fn revision_from_file(file: &str) -> String {
    let stem = file.strip_suffix(".snap").unwrap_or(file);
    match stem.rsplit_once('_') {
        Some((_, revision)) => revision.to_string(),
        None => stem.to_string(),
    }
}
