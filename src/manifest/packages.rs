//! Debian package list of the mounted root.

use anyhow::Result;
use std::path::Path;

use crate::process::{Cmd, CommandRunner};

/// Write `dpkg-query --show` output for the root's package database to `manifest`.
pub fn write_package_manifest(
    runner: &dyn CommandRunner,
    root: &Path,
    manifest: &Path,
) -> Result<()> {
    let admindir = root.join("var/lib/dpkg");
    runner.run(
        Cmd::new("dpkg-query")
            .arg("--show")
            .arg(format!("--admindir={}", admindir.display()))
            .stdout_to(manifest)
            .error_msg("dpkg-query failed"),
    )?;
    Ok(())
}
