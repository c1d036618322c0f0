//! Loop mounting of the working image.

use anyhow::{anyhow, Context};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::CustomizeError;
use crate::process::{Cmd, CommandRunner};

/// An active loop mount of a partition inside an image file.
///
/// Must be released with [`MountHandle::unmount`] or
/// [`MountHandle::force_unmount`]; dropping a mounted handle only warns.
#[derive(Debug)]
pub struct MountHandle {
    target: PathBuf,
    mounted: bool,
}

impl MountHandle {
    /// Mount the filesystem at `offset` bytes into `image` onto `target`.
    pub fn mount(
        runner: &dyn CommandRunner,
        image: &Path,
        offset: u64,
        target: &Path,
    ) -> Result<Self, CustomizeError> {
        let mount_error = |source: anyhow::Error| CustomizeError::Mount {
            action: "mount image at",
            target: target.to_path_buf(),
            source,
        };

        fs::create_dir_all(target)
            .with_context(|| format!("Failed to create mount point {}", target.display()))
            .map_err(mount_error)?;

        let result = runner
            .run(
                Cmd::new("mount")
                    .arg("-o")
                    .arg(format!("loop,offset={}", offset))
                    .arg_path(image)
                    .arg_path(target)
                    .privileged()
                    .allow_fail(),
            )
            .map_err(mount_error)?;

        if !result.success() {
            let stderr = result.stderr_trimmed();
            return Err(mount_error(if stderr.is_empty() {
                anyhow!("mount exited with code {}", result.code())
            } else {
                anyhow!("mount exited with code {}: {}", result.code(), stderr)
            }));
        }

        info!("Mounted successfully at {}", target.display());
        Ok(Self {
            target: target.to_path_buf(),
            mounted: true,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Unmount and wait `settle` for the loop device to be released.
    ///
    /// Calling this on a handle that is no longer mounted only warns.
    pub fn unmount(
        &mut self,
        runner: &dyn CommandRunner,
        settle: Duration,
    ) -> Result<(), CustomizeError> {
        if !self.mounted {
            warn!("{} is not mounted, skipping unmount", self.target.display());
            return Ok(());
        }

        let unmount_error = |source: anyhow::Error| CustomizeError::Mount {
            action: "unmount",
            target: self.target.clone(),
            source,
        };

        info!("Unmounting image...");
        let cmd = Cmd::new("umount")
            .arg_path(&self.target)
            .privileged()
            .error_msg("umount failed");
        let result = runner.execute(&cmd).map_err(unmount_error)?;

        if !result.success() {
            // Something else (e.g. a chroot teardown) may have unmounted it already.
            if is_mount_point(runner, &self.target).map_err(unmount_error)? {
                return Err(unmount_error(
                    cmd.check(result)
                        .err()
                        .unwrap_or_else(|| anyhow!("umount failed")),
                ));
            }
            warn!(
                "{} was already unmounted: {}",
                self.target.display(),
                result.stderr_trimmed()
            );
            self.mounted = false;
            return Ok(());
        }
        self.mounted = false;

        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    /// Unmount during failure recovery; problems are logged, never returned.
    pub fn force_unmount(&mut self, runner: &dyn CommandRunner, settle: Duration) {
        if let Err(e) = self.unmount(runner, settle) {
            warn!("{:#}", anyhow::Error::new(e));
        }
    }
}

/// `mountpoint -q` exits 0 only when `target` is an active mount point.
fn is_mount_point(runner: &dyn CommandRunner, target: &Path) -> anyhow::Result<bool> {
    let result = runner.run(
        Cmd::new("mountpoint")
            .arg("-q")
            .arg_path(target)
            .allow_fail(),
    )?;
    Ok(result.success())
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        if self.mounted {
            warn!(
                "{} is still mounted; unmount it manually with 'umount {}'",
                self.target.display(),
                self.target.display()
            );
        }
    }
}
