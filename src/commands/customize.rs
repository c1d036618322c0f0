//! customize-image command.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use imagesauce::config::Config;
use imagesauce::customizer::{ImageCustomizer, ImageJob};
use imagesauce::delegate::ChimgDelegate;
use imagesauce::manifest::SeedInventory;

use super::require_exists;

pub struct CustomizeArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mount: PathBuf,
    pub config: PathBuf,
    pub overwrite: bool,
    pub generate_sbom: bool,
    pub no_manifest: bool,
}

/// Execute the customize-image command.
pub fn cmd_customize_image(args: CustomizeArgs, config: &Config) -> Result<()> {
    require_exists("Config file", &args.config)?;
    require_exists("Input image", &args.input)?;

    let mut job = ImageJob::new(
        &args.input,
        &args.output,
        &args.mount,
        &args.config,
        args.overwrite,
    )?;
    if !args.no_manifest {
        job = job.with_provenance(args.generate_sbom)?;
    }

    let runner = config.runner()?;
    let delegate = ChimgDelegate::new(&runner, config.chimg_program.as_str());
    let snaps = SeedInventory;

    let mut customizer = ImageCustomizer::new(job, &runner, &delegate, &snaps, config);
    let output = customizer.run()?;

    info!("Customized image written to {}", output.display());
    Ok(())
}
