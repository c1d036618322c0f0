//! Format detection and raw staging of input images.
//!
//! The customizer always works on a raw copy of the input. qcow2 inputs are
//! converted to raw for the mount and converted back at the end; anything
//! else is treated as raw and copied byte for byte.

use anyhow::Context;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::error::CustomizeError;
use crate::process::{Cmd, CommandRunner};

/// On-disk format of the input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    Qcow2,
}

impl ImageFormat {
    /// Classify the output of `file <image>`.
    pub fn from_file_output(output: &str) -> Self {
        if output.contains("QCOW") {
            ImageFormat::Qcow2
        } else {
            ImageFormat::Raw
        }
    }

    /// Name understood by `qemu-img -f/-O`.
    pub fn qemu_name(self) -> &'static str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Qcow2 => "qcow2",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qemu_name())
    }
}

/// Run `file` on the input and report its format.
pub fn detect(runner: &dyn CommandRunner, input: &Path) -> anyhow::Result<ImageFormat> {
    let result = runner.run(
        Cmd::new("file")
            .arg_path(input)
            .error_msg("Failed to inspect input image type"),
    )?;
    Ok(ImageFormat::from_file_output(&result.stdout))
}

/// Produce the raw working copy of `input` at `working`.
pub fn detect_and_stage(
    runner: &dyn CommandRunner,
    input: &Path,
    working: &Path,
) -> Result<ImageFormat, CustomizeError> {
    let format = detect(runner, input).map_err(|e| CustomizeError::staging(input, e))?;

    match format {
        ImageFormat::Qcow2 => {
            info!("Converting input qcow2 image to raw image...");
            convert(runner, input, ImageFormat::Qcow2, working, ImageFormat::Raw)
                .map_err(|e| CustomizeError::staging(input, e))?;
        }
        ImageFormat::Raw => {
            info!("Image is already raw. Copying to {}", working.display());
            fs::copy(input, working)
                .with_context(|| {
                    format!("Failed to copy {} to {}", input.display(), working.display())
                })
                .map_err(|e| CustomizeError::staging(input, e))?;
        }
    }

    info!(
        "Converted or copied image for modifying to: {}",
        working.display()
    );
    Ok(format)
}

/// Write the working image to `output` in its original format and drop the working copy.
pub fn finalize(
    runner: &dyn CommandRunner,
    working: &Path,
    output: &Path,
    format: ImageFormat,
) -> Result<(), CustomizeError> {
    if output.exists() {
        fs::remove_file(output)
            .with_context(|| format!("Failed to remove existing {}", output.display()))
            .map_err(|e| CustomizeError::finalize(output, e))?;
        info!("Removed existing output image file");
    }

    match format {
        ImageFormat::Qcow2 => {
            info!(
                "Converting raw image back to qcow2 at: {}",
                output.display()
            );
            convert(runner, working, ImageFormat::Raw, output, ImageFormat::Qcow2)
                .map_err(|e| CustomizeError::finalize(output, e))?;
        }
        ImageFormat::Raw => {
            info!("Copying raw image to: {}", output.display());
            fs::copy(working, output)
                .with_context(|| format!("Failed to copy {}", working.display()))
                .map_err(|e| CustomizeError::finalize(output, e))?;
        }
    }

    remove_working_image(working);
    info!("New image is available at: {}", output.display());
    Ok(())
}

/// Best-effort removal of the working image.
pub fn remove_working_image(working: &Path) {
    if fs::symlink_metadata(working).is_err() {
        return;
    }
    match fs::remove_file(working) {
        Ok(()) => info!("Removed temporary interim modified image file successfully."),
        Err(e) => warn!(
            "Failed to remove modified image file {}: {}",
            working.display(),
            e
        ),
    }
}

fn convert(
    runner: &dyn CommandRunner,
    src: &Path,
    src_format: ImageFormat,
    dst: &Path,
    dst_format: ImageFormat,
) -> anyhow::Result<()> {
    runner.run(
        Cmd::new("qemu-img")
            .args(["convert", "-f", src_format.qemu_name()])
            .args(["-O", dst_format.qemu_name()])
            .arg_path(src)
            .arg_path(dst)
            .error_msg("qemu-img convert failed"),
    )?;
    Ok(())
}
