//! Image customization lifecycle.
//!
//! Drives one job through
//! `Created -> Staged -> Mounted -> ShimInstalled -> Delegated -> ShimRestored -> Unmounted -> Finalized`.
//! Any failure after the image is mounted goes through [`ImageCustomizer::fail`],
//! which unmounts and discards the working image before the error is returned.

use anyhow::{anyhow, Context};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::delegate::CustomizationDelegate;
use crate::error::CustomizeError;
use crate::image::{format, partition, resolv, ImageFormat, MountHandle, ResolvShimState};
use crate::manifest::{ManifestArtifacts, ManifestGenerator, ManifestOptions, SnapInventory};
use crate::process::CommandRunner;
use crate::timing::Timer;

/// Provenance to record for the customized root before it is unmounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRequest {
    pub base: PathBuf,
    pub options: ManifestOptions,
}

/// One customization run.
#[derive(Debug)]
pub struct ImageJob {
    input: PathBuf,
    output: PathBuf,
    working: PathBuf,
    mount: PathBuf,
    config: PathBuf,
    overwrite: bool,
    format: Option<ImageFormat>,
    shim: Option<ResolvShimState>,
    provenance: Option<ProvenanceRequest>,
}

impl ImageJob {
    /// Fails if `output` exists and `overwrite` is not set.
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        mount: impl Into<PathBuf>,
        config: impl Into<PathBuf>,
        overwrite: bool,
    ) -> Result<Self, CustomizeError> {
        let input = input.into();
        let output = output.into();

        if output.exists() && !overwrite {
            return Err(CustomizeError::Precondition(format!(
                "Output file {} already exists. Use --overwrite to overwrite existing files.",
                output.display()
            )));
        }

        let working = working_path(&input);
        if working == output {
            return Err(CustomizeError::Precondition(format!(
                "Output file {} would be used as the working image. Choose another output path.",
                output.display()
            )));
        }

        Ok(Self {
            working,
            input,
            output,
            mount: mount.into(),
            config: config.into(),
            overwrite,
            format: None,
            shim: None,
            provenance: None,
        })
    }

    /// Record manifest, filelist and optionally an SBOM next to the output.
    ///
    /// Existing artifacts are rejected here, before the image is touched,
    /// unless the job overwrites.
    pub fn with_provenance(mut self, generate_sbom: bool) -> Result<Self, CustomizeError> {
        let base = self.output.with_extension("");
        if !self.overwrite {
            let artifacts = ManifestArtifacts::from_base(&base);
            for path in [&artifacts.manifest, &artifacts.filelist, &artifacts.sbom] {
                if path.exists() {
                    return Err(CustomizeError::ArtifactCollision(path.clone()));
                }
            }
        }

        self.provenance = Some(ProvenanceRequest {
            base,
            options: ManifestOptions {
                generate_sbom,
                overwrite: self.overwrite,
            },
        });
        Ok(self)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Raw copy that is mounted and modified.
    pub fn working(&self) -> &Path {
        &self.working
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount
    }

    pub fn config(&self) -> &Path {
        &self.config
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Known once the input has been staged.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn provenance(&self) -> Option<&ProvenanceRequest> {
        self.provenance.as_ref()
    }

    /// Whether the image had its own resolv.conf, once the shim is installed.
    pub fn resolv_conf_existed(&self) -> Option<bool> {
        self.shim.map(|state| state.existed)
    }
}

/// `image.qcow2` -> `image.modifying`; an input already named
/// `*.modifying` gets `.modifying` appended so it is never its own working copy.
fn working_path(input: &Path) -> PathBuf {
    let working = input.with_extension("modifying");
    if working != input {
        return working;
    }
    let mut appended = input.as_os_str().to_os_string();
    appended.push(".modifying");
    PathBuf::from(appended)
}

/// Lifecycle position of an [`ImageCustomizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Staged,
    Mounted,
    ShimInstalled,
    Delegated,
    ShimRestored,
    Unmounted,
    Finalized,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "created",
            Stage::Staged => "staged",
            Stage::Mounted => "mounted",
            Stage::ShimInstalled => "shim installed",
            Stage::Delegated => "delegated",
            Stage::ShimRestored => "shim restored",
            Stage::Unmounted => "unmounted",
            Stage::Finalized => "finalized",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Runs an [`ImageJob`] to completion.
pub struct ImageCustomizer<'a> {
    job: ImageJob,
    runner: &'a dyn CommandRunner,
    delegate: &'a dyn CustomizationDelegate,
    snaps: &'a dyn SnapInventory,
    config: &'a Config,
    stage: Stage,
    mount: Option<MountHandle>,
}

impl<'a> ImageCustomizer<'a> {
    pub fn new(
        job: ImageJob,
        runner: &'a dyn CommandRunner,
        delegate: &'a dyn CustomizationDelegate,
        snaps: &'a dyn SnapInventory,
        config: &'a Config,
    ) -> Self {
        Self {
            job,
            runner,
            delegate,
            snaps,
            config,
            stage: Stage::Created,
            mount: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn job(&self) -> &ImageJob {
        &self.job
    }

    /// Customize the image and return the path of the new output image.
    pub fn run(&mut self) -> Result<PathBuf, CustomizeError> {
        let timer = Timer::start(Stage::Staged);
        self.stage_image().inspect_err(|_| self.stage = Stage::Failed)?;
        timer.finish();

        let timer = Timer::start(Stage::Mounted);
        self.mount_image().inspect_err(|_| self.stage = Stage::Failed)?;
        timer.finish();

        let timer = Timer::start(Stage::ShimInstalled);
        if let Err(e) = self.install_shim() {
            return Err(self.fail(e));
        }
        timer.finish();

        let timer = Timer::start(Stage::Delegated);
        if let Err(source) = self.customize_root() {
            let root = self.job.mount.clone();
            return Err(self.fail(CustomizeError::Delegation { root, source }));
        }
        timer.finish();

        let timer = Timer::start(Stage::Finalized);
        self.teardown().inspect_err(|_| self.stage = Stage::Failed)?;
        timer.finish();

        Ok(self.job.output.clone())
    }

    fn stage_image(&mut self) -> Result<(), CustomizeError> {
        let working = &self.job.working;
        for parent in [working.parent(), self.job.output.parent()].into_iter().flatten() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))
                .map_err(|e| CustomizeError::staging(&self.job.input, e))?;
        }
        fs::create_dir_all(&self.job.mount)
            .with_context(|| format!("Failed to create mount point {}", self.job.mount.display()))
            .map_err(|e| CustomizeError::staging(&self.job.input, e))?;

        if fs::symlink_metadata(working).is_ok() {
            warn!("Removing stale working image {}", working.display());
            fs::remove_file(working)
                .with_context(|| format!("Failed to remove {}", working.display()))
                .map_err(|e| CustomizeError::staging(&self.job.input, e))?;
        }

        if !self.job.input.exists() {
            return Err(CustomizeError::Precondition(format!(
                "Input image {} does not exist",
                self.job.input.display()
            )));
        }

        let detected = format::detect_and_stage(self.runner, &self.job.input, working)?;
        info!("Input image format: {}", detected);
        self.job.format = Some(detected);
        self.stage = Stage::Staged;
        Ok(())
    }

    fn mount_image(&mut self) -> Result<(), CustomizeError> {
        let offset = partition::locate(self.runner, &self.job.working)?;
        let handle = MountHandle::mount(self.runner, &self.job.working, offset, &self.job.mount)?;
        self.mount = Some(handle);
        self.stage = Stage::Mounted;
        Ok(())
    }

    fn install_shim(&mut self) -> Result<(), CustomizeError> {
        let state = resolv::install(self.runner, &self.job.mount, &self.config.host_resolv_conf)?;
        self.job.shim = Some(state);
        self.stage = Stage::ShimInstalled;
        Ok(())
    }

    fn customize_root(&mut self) -> anyhow::Result<()> {
        let root = &self.job.mount;
        info!("Customizing {} with {}", root.display(), self.job.config.display());
        self.delegate.apply(&self.job.config, root)?;

        if let Some(request) = &self.job.provenance {
            let generator =
                ManifestGenerator::new(self.runner, self.snaps, &self.config.sbom_program);
            generator.generate(root, &request.base, request.options)?;
        }

        self.stage = Stage::Delegated;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), CustomizeError> {
        if let Some(state) = self.job.shim {
            if let Err(e) = resolv::restore(self.runner, &self.job.mount, state) {
                if let Some(mount) = self.mount.as_mut() {
                    mount.force_unmount(self.runner, self.config.unmount_settle);
                }
                return Err(e);
            }
        }
        self.stage = Stage::ShimRestored;

        if let Some(mount) = self.mount.as_mut() {
            mount.unmount(self.runner, self.config.unmount_settle)?;
        }
        self.stage = Stage::Unmounted;

        let format = self.job.format.ok_or_else(|| {
            CustomizeError::finalize(&self.job.output, anyhow!("input image was never staged"))
        })?;
        format::finalize(self.runner, &self.job.working, &self.job.output, format)?;
        self.stage = Stage::Finalized;
        Ok(())
    }

    /// Recover from a failure while the image is mounted.
    ///
    /// The resolv.conf shim is left in place: the working image is deleted
    /// right after the unmount.
    fn fail(&mut self, err: CustomizeError) -> CustomizeError {
        error!("Failed after reaching stage '{}': {}", self.stage, err);
        self.stage = Stage::Failed;

        if let Some(mount) = self.mount.as_mut() {
            info!("Cleaning up. Unmounting {}", mount.target().display());
            mount.force_unmount(self.runner, self.config.unmount_settle);
        }
        format::remove_working_image(&self.job.working);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_paths() {
        let job = ImageJob::new(
            "/srv/images/jammy.qcow2",
            "/srv/out/jammy-custom.qcow2",
            "/mnt/jammy",
            "/srv/chimg.yaml",
            false,
        )
        .unwrap();

        assert_eq!(job.working(), Path::new("/srv/images/jammy.modifying"));
        assert_eq!(job.format(), None);
        assert_eq!(job.resolv_conf_existed(), None);
        assert!(job.provenance().is_none());
    }

    #[test]
    fn test_working_path_without_extension() {
        let job = ImageJob::new("disk", "out.img", "/mnt/x", "c.yaml", false).unwrap();
        assert_eq!(job.working(), Path::new("disk.modifying"));
    }

    #[test]
    fn test_working_path_never_equals_input() {
        assert_eq!(
            working_path(Path::new("images/golden.modifying")),
            PathBuf::from("images/golden.modifying.modifying")
        );
        assert_eq!(working_path(Path::new("a.img")), PathBuf::from("a.modifying"));
    }

    #[test]
    fn test_output_equal_to_working_rejected() {
        let err = ImageJob::new("jammy.qcow2", "jammy.modifying", "/mnt/x", "c.yaml", true)
            .unwrap_err();
        assert!(matches!(err, CustomizeError::Precondition(_)));
    }

    #[test]
    fn test_existing_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.qcow2");
        fs::write(&output, "old").unwrap();

        let err = ImageJob::new("in.qcow2", &output, "/mnt/x", "c.yaml", false).unwrap_err();
        assert!(matches!(err, CustomizeError::Precondition(_)));
        assert_eq!(fs::read_to_string(&output).unwrap(), "old");

        assert!(ImageJob::new("in.qcow2", &output, "/mnt/x", "c.yaml", true).is_ok());
    }

    #[test]
    fn test_provenance_base_strips_extension() {
        let job = ImageJob::new("in.qcow2", "out/jammy.qcow2", "/mnt/x", "c.yaml", false)
            .unwrap()
            .with_provenance(true)
            .unwrap();

        let request = job.provenance().unwrap();
        assert_eq!(request.base, PathBuf::from("out/jammy"));
        assert!(request.options.generate_sbom);
        assert!(!request.options.overwrite);
    }

    #[test]
    fn test_provenance_collision_detected_early() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.manifest"), "bash\t5.1\n").unwrap();

        let err = ImageJob::new("in.img", dir.path().join("out.img"), "/mnt/x", "c.yaml", false)
            .unwrap()
            .with_provenance(false)
            .unwrap_err();
        assert!(matches!(err, CustomizeError::ArtifactCollision(_)));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::ShimInstalled.to_string(), "shim installed");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}
