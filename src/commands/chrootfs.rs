//! chrootfs command - customize a root directory that is already in place.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::info;

use imagesauce::config::Config;
use imagesauce::delegate::{ChimgDelegate, CustomizationDelegate};
use imagesauce::manifest::{ManifestGenerator, ManifestOptions, SeedInventory};

use super::require_exists;

pub struct ChrootfsArgs {
    pub config: PathBuf,
    pub rootfs: PathBuf,
    pub output_files_name: Option<PathBuf>,
    pub generate_sbom: bool,
    pub overwrite: bool,
}

/// Execute the chrootfs command.
pub fn cmd_chrootfs(args: ChrootfsArgs, config: &Config) -> Result<()> {
    if args.output_files_name.is_none() && (args.generate_sbom || args.overwrite) {
        bail!("--generate-sbom and --overwrite require --output-files-name");
    }
    require_exists("Config file", &args.config)?;
    require_exists("Root filesystem", &args.rootfs)?;

    let runner = config.runner()?;
    let delegate = ChimgDelegate::new(&runner, config.chimg_program.as_str());
    delegate.apply(&args.config, &args.rootfs)?;

    if let Some(base) = &args.output_files_name {
        let snaps = SeedInventory;
        let generator = ManifestGenerator::new(&runner, &snaps, &config.sbom_program);
        let artifacts = generator.generate(
            &args.rootfs,
            base,
            ManifestOptions {
                generate_sbom: args.generate_sbom,
                overwrite: args.overwrite,
            },
        )?;
        info!("Manifest written to {}", artifacts.manifest.display());
    }

    Ok(())
}
