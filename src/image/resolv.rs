//! Temporary host resolv.conf inside the mounted root.
//!
//! Tools run in a chroot of the image need working name resolution, but the
//! image's own `/etc/resolv.conf` (usually a symlink into systemd-resolved's
//! runtime directory) dangles outside a booted system. The host's file is
//! swapped in for the duration of the customization and the original is put
//! back afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::CustomizeError;
use crate::process::{Cmd, CommandRunner};

/// What [`install`] found and did, needed by [`restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvShimState {
    /// A resolv.conf (file or symlink) was present in the image.
    pub existed: bool,
    /// The original was copied to `resolv.conf.bak`.
    pub backed_up: bool,
}

/// `<root>/etc/resolv.conf`
pub fn resolv_path(root: &Path) -> PathBuf {
    root.join("etc").join("resolv.conf")
}

/// `<root>/etc/resolv.conf.bak`
pub fn backup_path(root: &Path) -> PathBuf {
    root.join("etc").join("resolv.conf.bak")
}

/// True for regular files and symlinks, dangling or not.
fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Replace the image's resolv.conf with `host_resolv` as a regular file.
pub fn install(
    runner: &dyn CommandRunner,
    root: &Path,
    host_resolv: &Path,
) -> Result<ResolvShimState, CustomizeError> {
    let shim_error = |source: anyhow::Error| CustomizeError::Shim {
        action: "install",
        root: root.to_path_buf(),
        source,
    };

    let resolv = resolv_path(root);
    let backup = backup_path(root);
    let mut state = ResolvShimState::default();

    if lexists(&resolv) {
        state.existed = true;
        info!("Backing up existing resolv.conf (may be a symlink)");
        match runner.run(
            Cmd::new("cp")
                .arg("-a")
                .arg_path(&resolv)
                .arg_path(&backup)
                .privileged()
                .error_msg("Failed to back up resolv.conf"),
        ) {
            Ok(_) => state.backed_up = true,
            Err(e) => warn!("{:#}. Proceeding without backup.", e),
        }

        runner
            .run(Cmd::new("rm").arg("-f").arg_path(&resolv).privileged())
            .map_err(shim_error)?;
    }

    runner
        .run(
            Cmd::new("cp")
                .arg_path(host_resolv)
                .arg_path(&resolv)
                .privileged()
                .error_msg("Failed to copy host resolv.conf into the image"),
        )
        .map_err(shim_error)?;

    if let Ok(listing) = runner.run(
        Cmd::new("ls")
            .arg("-l")
            .arg_path(&resolv)
            .privileged()
            .allow_fail(),
    ) {
        debug!("{}", listing.stdout_trimmed());
    }

    Ok(state)
}

/// Put the image's original resolv.conf back, or remove the injected one.
pub fn restore(
    runner: &dyn CommandRunner,
    root: &Path,
    state: ResolvShimState,
) -> Result<(), CustomizeError> {
    let shim_error = |source: anyhow::Error| CustomizeError::Shim {
        action: "restore",
        root: root.to_path_buf(),
        source,
    };

    let resolv = resolv_path(root);
    let backup = backup_path(root);

    runner
        .run(Cmd::new("rm").arg("-f").arg_path(&resolv).privileged())
        .map_err(shim_error)?;

    if state.backed_up && lexists(&backup) {
        info!("Restoring original resolv.conf");
        runner
            .run(
                Cmd::new("mv")
                    .arg_path(&backup)
                    .arg_path(&resolv)
                    .privileged()
                    .error_msg("Failed to move resolv.conf backup into place"),
            )
            .map_err(shim_error)?;
    } else {
        info!("Removed temporary resolv.conf");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let root = Path::new("/mnt/image");
        assert_eq!(resolv_path(root), PathBuf::from("/mnt/image/etc/resolv.conf"));
        assert_eq!(
            backup_path(root),
            PathBuf::from("/mnt/image/etc/resolv.conf.bak")
        );
    }

    #[test]
    fn test_lexists_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("resolv.conf");
        std::os::unix::fs::symlink("../run/systemd/resolve/stub-resolv.conf", &link).unwrap();

        assert!(!link.exists());
        assert!(lexists(&link));
    }
}
