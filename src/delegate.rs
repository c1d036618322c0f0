//! The component that actually changes the mounted root.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::process::{Cmd, CommandRunner};

/// Applies a declarative configuration to a mounted root filesystem.
pub trait CustomizationDelegate {
    fn apply(&self, config: &Path, root: &Path) -> Result<()>;
}

/// Runs `chimg chrootfs <config> <root>`.
pub struct ChimgDelegate<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
}

impl<'a> ChimgDelegate<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

impl CustomizationDelegate for ChimgDelegate<'_> {
    fn apply(&self, config: &Path, root: &Path) -> Result<()> {
        if !config.exists() {
            bail!("config file {} does not exist", config.display());
        }
        if !root.exists() {
            bail!("rootfs path {} does not exist", root.display());
        }

        let result = self.runner.run(
            Cmd::new(&self.program)
                .arg("chrootfs")
                .arg_path(config)
                .arg_path(root)
                .privileged()
                .error_msg(format!("{} chrootfs failed", self.program)),
        )?;
        for line in result.stdout.lines() {
            debug!("{}: {}", self.program, line);
        }

        info!(
            "Successfully invoked {} chrootfs with config file: {}",
            self.program,
            config.display()
        );
        Ok(())
    }
}
