//! Provenance artifacts for a customized root filesystem.
//!
//! Given a base path `B`, the generator writes:
//! - `B.manifest` - installed debs (`name<TAB>version`) followed by seeded snaps
//! - `B.filelist` - every path in the root, sorted
//! - `B.sbom.spdx` - SBOM (optional), with the tool's stderr in `B.sbom.log`
//!
//! `B.sbom` is only used as the SBOM document name.

mod filelist;
mod packages;
mod sbom;
mod snap;

pub use filelist::{list_root, write_filelist};
pub use packages::write_package_manifest;
pub use sbom::generate_sbom;
pub use snap::{parse_seed, SeedInventory, SnapEntry, SnapInventory};

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::CustomizeError;
use crate::process::CommandRunner;

/// Output paths derived from one base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestArtifacts {
    pub manifest: PathBuf,
    pub filelist: PathBuf,
    /// Label passed to the SBOM tool, not a file.
    pub sbom_document_name: String,
    pub sbom: PathBuf,
    pub sbom_log: PathBuf,
}

impl ManifestArtifacts {
    pub fn from_base(base: &Path) -> Self {
        Self {
            manifest: with_suffix(base, ".manifest"),
            filelist: with_suffix(base, ".filelist"),
            sbom_document_name: with_suffix(base, ".sbom").to_string_lossy().into_owned(),
            sbom: with_suffix(base, ".sbom.spdx"),
            sbom_log: with_suffix(base, ".sbom.log"),
        }
    }

    /// Artifacts that must not be silently replaced.
    fn guarded(&self) -> [&Path; 3] {
        [self.manifest.as_path(), self.filelist.as_path(), self.sbom.as_path()]
    }
}

/// Append `suffix` to the full path (no extension replacement).
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestOptions {
    pub generate_sbom: bool,
    pub overwrite: bool,
}

/// Writes the provenance artifacts for a mounted root.
pub struct ManifestGenerator<'a> {
    runner: &'a dyn CommandRunner,
    snaps: &'a dyn SnapInventory,
    sbom_program: &'a str,
}

impl<'a> ManifestGenerator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        snaps: &'a dyn SnapInventory,
        sbom_program: &'a str,
    ) -> Self {
        Self {
            runner,
            snaps,
            sbom_program,
        }
    }

    pub fn generate(
        &self,
        root: &Path,
        base: &Path,
        options: ManifestOptions,
    ) -> Result<ManifestArtifacts, CustomizeError> {
        let artifacts = ManifestArtifacts::from_base(base);
        check_collisions(&artifacts, options.overwrite)?;
        if let Some(parent) = artifacts.manifest.parent() {
            fs::create_dir_all(parent).map_err(|e| CustomizeError::Artifact {
                artifact: "manifest",
                source: anyhow::Error::new(e)
                    .context(format!("Failed to create {}", parent.display())),
            })?;
        }

        info!("Adding packages to manifest...");
        write_package_manifest(self.runner, root, &artifacts.manifest).map_err(|source| {
            CustomizeError::Artifact {
                artifact: "package manifest",
                source,
            }
        })?;

        info!("Adding snaps to manifest...");
        self.snaps
            .append(root, &artifacts.manifest)
            .map_err(|source| CustomizeError::Artifact {
                artifact: "snap manifest",
                source,
            })?;
        info!("Manifest generated: {}", artifacts.manifest.display());

        info!("Generating filelist...");
        write_filelist(root, &artifacts.filelist).map_err(|source| CustomizeError::Artifact {
            artifact: "filelist",
            source,
        })?;
        info!("Filelist generated: {}", artifacts.filelist.display());

        if options.generate_sbom {
            generate_sbom(self.runner, self.sbom_program, root, &artifacts).map_err(
                |source| CustomizeError::Artifact {
                    artifact: "SBOM",
                    source,
                },
            )?;
            info!("SBOM generation succeeded!");
        }

        info!("Done creating manifest and filelist!");
        Ok(artifacts)
    }
}

/// Refuse to clobber existing artifacts unless `overwrite`, in which case remove them.
fn check_collisions(artifacts: &ManifestArtifacts, overwrite: bool) -> Result<(), CustomizeError> {
    for path in artifacts.guarded() {
        if !path.exists() {
            continue;
        }
        if !overwrite {
            return Err(CustomizeError::ArtifactCollision(path.to_path_buf()));
        }
        warn!("File {} already exists. Overwriting...", path.display());
        fs::remove_file(path).map_err(|e| CustomizeError::Artifact {
            artifact: "manifest (removing stale file)",
            source: anyhow::Error::new(e)
                .context(format!("Failed to remove {}", path.display())),
        })?;
    }
    Ok(())
}
