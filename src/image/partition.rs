//! Locating the root filesystem partition inside a raw disk image.

use anyhow::anyhow;
use std::path::Path;
use tracing::info;

use crate::error::CustomizeError;
use crate::process::{Cmd, CommandRunner};

/// Partition type label of the filesystem we mount.
const ROOT_PARTITION_TYPE: &str = "Linux filesystem";

/// Byte offset of the root filesystem partition in `image`.
pub fn locate(runner: &dyn CommandRunner, image: &Path) -> Result<u64, CustomizeError> {
    let offset_error = |source: anyhow::Error| CustomizeError::Offset {
        image: image.to_path_buf(),
        source,
    };

    let result = runner
        .run(
            Cmd::new("fdisk")
                .arg("-l")
                .arg_path(image)
                .error_msg("fdisk -l failed"),
        )
        .map_err(offset_error)?;

    let offset = parse_partition_offset(&result.stdout).ok_or_else(|| {
        offset_error(anyhow!(
            "no '{}' partition with a known sector size in fdisk output",
            ROOT_PARTITION_TYPE
        ))
    })?;

    info!("Root partition starts at byte offset {}", offset);
    Ok(offset)
}

/// Compute `start sector * logical sector size` from `fdisk -l` output.
///
/// Returns None if either value is missing or unparsable.
pub fn parse_partition_offset(fdisk_output: &str) -> Option<u64> {
    let start_sector: u64 = fdisk_output
        .lines()
        .find(|line| line.contains(ROOT_PARTITION_TYPE))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;

    // "Sector size (logical/physical): 512 bytes / 4096 bytes"
    let sector_size: u64 = fdisk_output
        .lines()
        .find(|line| line.contains("Sector size"))?
        .split_whitespace()
        .nth(3)?
        .parse()
        .ok()?;

    start_sector.checked_mul(sector_size)
}
