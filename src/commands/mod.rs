//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `customize` - Customize a disk image end to end
//! - `chrootfs` - Customize an already prepared root directory
//! - `preflight` - Run preflight checks

mod chrootfs;
mod customize;
mod preflight;

pub use chrootfs::{cmd_chrootfs, ChrootfsArgs};
pub use customize::{cmd_customize_image, CustomizeArgs};
pub use preflight::cmd_preflight;

use anyhow::{bail, Result};
use std::path::Path;

/// Bail unless `path` exists.
fn require_exists(what: &str, path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("{} {} does not exist", what, path.display());
    }
    Ok(())
}
