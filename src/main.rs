//! imagesauce - disk image customizer.
//!
//! Mounts the root partition of a raw or qcow2 image, lets chimg modify it
//! in a chroot and writes the result back in the input's format, together
//! with a package manifest, a file list and optionally an SBOM.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use imagesauce::config::Config;
use imagesauce::logging::{self, LogLevel};

#[derive(Parser)]
#[command(name = "imagesauce")]
#[command(about = "Customize cloud disk images with chimg")]
#[command(
    after_help = "EXAMPLE:\n  imagesauce --log-level debug --log-console customize-image \\\n    jammy-minimal.img jammy-custom.img mount2 add-cloud-init-daily-ppa.yaml --overwrite"
)]
struct Cli {
    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    /// Append log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to the console (default when no --log-file is given)
    #[arg(long, global = true)]
    log_console: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Customize a disk image
    CustomizeImage {
        /// The input image file (raw or qcow2)
        input_image_file: PathBuf,
        /// The output image file, written in the input's format
        output_image_path: PathBuf,
        /// Where the image's root partition is mounted
        target_mount_point: PathBuf,
        /// The chimg config file
        chimg_config_file: PathBuf,
        /// Overwrite existing output image and artifacts
        #[arg(long)]
        overwrite: bool,
        /// Also generate an SBOM next to the manifest
        #[arg(long)]
        generate_sbom: bool,
        /// Skip manifest and filelist generation
        #[arg(long)]
        no_manifest: bool,
    },

    /// Customize an already prepared root filesystem directory
    Chrootfs {
        /// The chimg config file
        chimg_config_file: PathBuf,
        /// The root filesystem directory
        rootfs: PathBuf,
        /// Base path for manifest, filelist and SBOM
        #[arg(long)]
        output_files_name: Option<PathBuf>,
        /// Also generate an SBOM (requires --output-files-name)
        #[arg(long)]
        generate_sbom: bool,
        /// Overwrite existing artifacts (requires --output-files-name)
        #[arg(long)]
        overwrite: bool,
    },

    /// Run preflight checks (verify host tools before customizing)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    logging::init(cli.log_level, cli.log_file.as_deref(), cli.log_console)?;

    match cli.command {
        Commands::CustomizeImage {
            input_image_file,
            output_image_path,
            target_mount_point,
            chimg_config_file,
            overwrite,
            generate_sbom,
            no_manifest,
        } => {
            commands::cmd_customize_image(
                commands::CustomizeArgs {
                    input: input_image_file,
                    output: output_image_path,
                    mount: target_mount_point,
                    config: chimg_config_file,
                    overwrite,
                    generate_sbom,
                    no_manifest,
                },
                &config,
            )?;
        }

        Commands::Chrootfs {
            chimg_config_file,
            rootfs,
            output_files_name,
            generate_sbom,
            overwrite,
        } => {
            commands::cmd_chrootfs(
                commands::ChrootfsArgs {
                    config: chimg_config_file,
                    rootfs,
                    output_files_name,
                    generate_sbom,
                    overwrite,
                },
                &config,
            )?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}
